//! GRBL response classification.
//!
//! Classifies newline-terminated frames from the firmware by a fixed
//! grammar: acknowledgments, errors, alarms, status reports, settings,
//! welcome banner, and feedback messages. Unrecognizable frames classify
//! as `Message` so firmware debug text never crashes the parser.

use super::status::StatusReport;
use serde::{Deserialize, Serialize};

/// A classified firmware frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GrblResponse {
    /// `ok` — the oldest unacknowledged command completed
    Ok,
    /// `error:<n>` — the oldest unacknowledged command was rejected
    Error(u8),
    /// `ALARM:<n>` — firmware safety stop
    Alarm(u8),
    /// `<...>` — periodic status report
    Status(StatusReport),
    /// `$n=value` — one line of the settings dump
    Setting {
        /// Setting number.
        number: u16,
        /// Setting value as reported.
        value: String,
    },
    /// `Grbl 1.1h ['$' for help]` — startup/welcome banner
    Welcome {
        /// Version portion of the banner (e.g. "1.1h").
        version: String,
    },
    /// `[...]` — feedback message (build info, `[MSG:...]`, parser state)
    Feedback(String),
    /// Anything else the grammar does not recognize
    Message(String),
}

/// Classify a single trimmed line. Empty lines yield None.
pub fn parse_line(line: &str) -> Option<GrblResponse> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line == "ok" {
        return Some(GrblResponse::Ok);
    }

    if let Some(code) = line.strip_prefix("error:") {
        if let Ok(code) = code.trim().parse::<u8>() {
            return Some(GrblResponse::Error(code));
        }
    }

    if let Some(code) = line.strip_prefix("ALARM:") {
        if let Ok(code) = code.trim().parse::<u8>() {
            return Some(GrblResponse::Alarm(code));
        }
    }

    if line.starts_with('<') && line.ends_with('>') {
        if let Some(report) = StatusReport::parse(line) {
            return Some(GrblResponse::Status(report));
        }
        // Bracketed but unparseable: fall through to Message
    }

    if line.starts_with('$') {
        if let Some((number, value)) = line[1..].split_once('=') {
            if let Ok(number) = number.trim().parse::<u16>() {
                return Some(GrblResponse::Setting {
                    number,
                    value: value.trim().to_string(),
                });
            }
        }
    }

    if let Some(rest) = line.strip_prefix("Grbl ") {
        let version = rest.split_whitespace().next().unwrap_or(rest).to_string();
        return Some(GrblResponse::Welcome { version });
    }

    if line.starts_with('[') && line.ends_with(']') {
        return Some(GrblResponse::Feedback(
            line[1..line.len() - 1].to_string(),
        ));
    }

    Some(GrblResponse::Message(line.to_string()))
}
