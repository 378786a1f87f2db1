//! Job streaming on top of the feeder.
//!
//! The sender walks a loaded g-code program line by line, keeping a small
//! lookahead window queued in the feeder so the character-counting flow
//! control always has work available without swallowing the whole program
//! into memory-resident queues. Progress, ETA, and tool-change detection
//! all key off the per-line acknowledgment stream.

use crate::feeder::{Command, Feeder};
use crate::settings::DEFAULT_RX_BUFFER_SIZE;
use grblkit_core::{Result, SenderError, SenderEvent, SenderStatus};
use std::time::Instant;
use uuid::Uuid;

/// How many job lines to keep queued in the feeder ahead of the budget
const LOOKAHEAD_LINES: usize = 8;

/// What to do when the firmware rejects a job line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Stop the job on the first `error:<n>`
    #[default]
    FailFast,
    /// Log the rejection and keep streaming
    Continue,
}

/// How to treat `M6` tool-change lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolChangePolicy {
    /// Drain in-flight lines, pause the workflow, and skip the line.
    /// Stock GRBL has no tool changer and rejects M6 outright, so the
    /// line is counted as complete without ever reaching the firmware.
    #[default]
    Pause,
    /// Stream the line like any other (grblHAL and derivatives accept it)
    Passthrough,
}

/// A loaded g-code program
#[derive(Debug, Clone)]
pub struct Job {
    /// Job identifier
    pub id: Uuid,
    /// Display name, usually the source file name
    pub name: String,
    /// Program lines, trimmed, blank lines removed
    pub lines: Vec<String>,
}

impl Job {
    /// Build a job from raw program text. Lines are trimmed and blank
    /// lines dropped; an effectively empty program, or one with a line the
    /// stock receive buffer could never carry, is rejected.
    pub fn from_text(name: impl Into<String>, text: &str) -> Result<Self> {
        let lines: Vec<String> = text
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();

        if lines.is_empty() {
            return Err(SenderError::InvalidJob {
                reason: "program contains no commands".to_string(),
            }
            .into());
        }

        let job = Self {
            id: Uuid::new_v4(),
            name: name.into(),
            lines,
        };
        job.validate(DEFAULT_RX_BUFFER_SIZE)?;
        Ok(job)
    }

    /// Check that every line fits the given receive-buffer budget (newline
    /// included). A line that doesn't could never be streamed and fails the
    /// whole load rather than erroring mid-job.
    pub fn validate(&self, budget: usize) -> Result<()> {
        for (index, line) in self.lines.iter().enumerate() {
            let size = line.len() + 1;
            if size > budget {
                return Err(SenderError::InvalidJob {
                    reason: format!(
                        "line {} is {} bytes on the wire, over the {}-byte receive buffer",
                        index + 1,
                        size,
                        budget
                    ),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Number of lines in the program
    pub fn total_lines(&self) -> usize {
        self.lines.len()
    }
}

/// Result of consuming one acknowledgment or rejection
#[derive(Debug, Clone)]
pub enum AckOutcome {
    /// The ack did not belong to the active job
    NotOurs,
    /// Progress update
    Progress(SenderStatus),
    /// Final line acknowledged
    Completed {
        /// Job identifier.
        job_id: Uuid,
        /// Seconds the job took.
        elapsed_secs: f64,
    },
    /// Line rejected and the error policy stops the job
    Failed {
        /// Job identifier.
        job_id: Uuid,
        /// Line number (zero-based) that was rejected.
        line: usize,
    },
}

/// Streams the loaded job through the feeder.
///
/// Holds the only copy of the job cursor: `sent` lines have been handed to
/// the feeder, `received` lines have been acknowledged. The invariant
/// `received <= sent <= total` holds at every step.
pub struct Sender {
    job: Option<Job>,
    active: bool,
    sent: usize,
    received: usize,
    tool_changes: usize,
    start_time: Option<Instant>,
    finish_time: Option<Instant>,
    pending_tool_change: bool,
    /// Error handling policy for the active job
    pub error_policy: ErrorPolicy,
    /// Tool-change handling policy for the active job
    pub tool_change_policy: ToolChangePolicy,
}

impl Default for Sender {
    fn default() -> Self {
        Self::new()
    }
}

impl Sender {
    /// A sender with no job loaded and default policies
    pub fn new() -> Self {
        Self {
            job: None,
            active: false,
            sent: 0,
            received: 0,
            tool_changes: 0,
            start_time: None,
            finish_time: None,
            pending_tool_change: false,
            error_policy: ErrorPolicy::default(),
            tool_change_policy: ToolChangePolicy::default(),
        }
    }

    /// Load a job, replacing any previous one. Rejected while streaming.
    pub fn load(&mut self, job: Job) -> Result<SenderEvent> {
        if self.active {
            return Err(SenderError::NotIdle {
                state: "Running".to_string(),
            }
            .into());
        }

        let event = SenderEvent::Loaded {
            job_id: job.id,
            total_lines: job.total_lines(),
        };
        tracing::info!(job = %job.name, lines = job.total_lines(), "job loaded");
        self.job = Some(job);
        self.reset_cursor();
        Ok(event)
    }

    /// Begin streaming the loaded job from line zero
    pub fn start(&mut self) -> Result<()> {
        if self.job.is_none() {
            return Err(SenderError::NoJobLoaded.into());
        }
        if self.active {
            return Err(SenderError::NotIdle {
                state: "Running".to_string(),
            }
            .into());
        }

        self.reset_cursor();
        self.active = true;
        self.start_time = Some(Instant::now());
        Ok(())
    }

    /// Feed lines to the feeder up to the lookahead window.
    ///
    /// Returns true when a tool-change hold should be raised: the cursor
    /// reached an M6 line under [`ToolChangePolicy::Pause`] and every line
    /// before it has been acknowledged.
    pub fn pump(&mut self, feeder: &mut Feeder) -> Result<bool> {
        if !self.active || self.pending_tool_change {
            return Ok(false);
        }

        let Some(job) = &self.job else {
            return Ok(false);
        };
        let total = job.lines.len();

        while self.sent < total && feeder.queued_len() < LOOKAHEAD_LINES {
            let text = self.job.as_ref().map(|j| j.lines[self.sent].clone());
            let Some(text) = text else { break };

            if is_tool_change(&text) && self.tool_change_policy == ToolChangePolicy::Pause {
                if self.received < self.sent {
                    // Drain in-flight lines before raising the hold
                    return Ok(false);
                }
                tracing::info!(line = self.sent + 1, command = %text, "tool change");
                self.tool_changes += 1;
                // Counted complete without transmission
                self.sent += 1;
                self.received += 1;
                self.pending_tool_change = true;
                return Ok(true);
            }

            feeder.enqueue(Command::job_line(self.sent, text))?;
            self.sent += 1;
        }

        Ok(false)
    }

    /// The workflow resumed after a tool-change hold; streaming may continue
    pub fn tool_change_acknowledged(&mut self) {
        self.pending_tool_change = false;
    }

    /// Whether the sender is waiting for a tool-change acknowledgment
    pub fn is_pending_tool_change(&self) -> bool {
        self.pending_tool_change
    }

    /// Consume an acknowledgment for the given job line
    pub fn on_ack(&mut self, line: usize) -> AckOutcome {
        if !self.active {
            return AckOutcome::NotOurs;
        }
        let Some(job) = &self.job else {
            return AckOutcome::NotOurs;
        };

        self.received += 1;
        tracing::trace!(line = line + 1, received = self.received, "line acked");

        if self.received >= job.total_lines() {
            self.finish_time = Some(Instant::now());
            let elapsed = self.elapsed_secs();
            let job_id = job.id;
            self.active = false;
            return AckOutcome::Completed {
                job_id,
                elapsed_secs: elapsed,
            };
        }

        match self.status() {
            Some(status) => AckOutcome::Progress(status),
            None => AckOutcome::NotOurs,
        }
    }

    /// Consume a rejection for the given job line, per the error policy
    pub fn on_error(&mut self, line: usize) -> AckOutcome {
        if !self.active {
            return AckOutcome::NotOurs;
        }
        let Some(job) = &self.job else {
            return AckOutcome::NotOurs;
        };

        match self.error_policy {
            ErrorPolicy::FailFast => {
                let job_id = job.id;
                self.active = false;
                self.finish_time = Some(Instant::now());
                AckOutcome::Failed { job_id, line }
            }
            ErrorPolicy::Continue => {
                tracing::warn!(line = line + 1, "line rejected, continuing");
                self.on_ack(line)
            }
        }
    }

    /// Abort the active job at the current cursor: the line at the cursor
    /// could not be handed to the flow control. Returns the job id and the
    /// failed line number.
    pub fn fail_current(&mut self) -> Option<(Uuid, usize)> {
        if !self.active {
            return None;
        }
        let job_id = self.job.as_ref()?.id;
        self.active = false;
        self.pending_tool_change = false;
        self.finish_time = Some(Instant::now());
        Some((job_id, self.sent))
    }

    /// Stop the active job. The job stays loaded for a restart.
    pub fn stop(&mut self) -> Option<SenderEvent> {
        if !self.active {
            return None;
        }
        self.active = false;
        self.pending_tool_change = false;
        self.finish_time = Some(Instant::now());
        self.job.as_ref().map(|j| SenderEvent::Stopped { job_id: j.id })
    }

    /// Abandon the job without an event of its own (connection loss, alarm)
    pub fn abandon(&mut self) {
        self.active = false;
        self.pending_tool_change = false;
        self.finish_time = Some(Instant::now());
    }

    /// Unload the job entirely, stopping it first if needed
    pub fn unload(&mut self) -> Option<SenderEvent> {
        self.active = false;
        self.pending_tool_change = false;
        self.reset_cursor();
        self.job.take().map(|_| SenderEvent::Unloaded)
    }

    /// Whether a job is actively streaming
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The loaded job, if any
    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    /// Lines handed to the feeder so far
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Lines acknowledged so far
    pub fn received(&self) -> usize {
        self.received
    }

    /// Current progress, once a job is loaded
    pub fn status(&self) -> Option<SenderStatus> {
        let job = self.job.as_ref()?;
        let elapsed = self.elapsed_secs();

        // ETA assumes uniform per-line duration; it converges as the
        // acknowledged fraction grows
        let remaining = job.total_lines().saturating_sub(self.received);
        let estimated_remaining_secs = if self.received > 0 && self.active {
            Some(elapsed / self.received as f64 * remaining as f64)
        } else {
            None
        };

        Some(SenderStatus {
            job_id: job.id,
            total_lines: job.total_lines(),
            sent: self.sent,
            received: self.received,
            tool_changes: self.tool_changes,
            elapsed_secs: elapsed,
            estimated_remaining_secs,
        })
    }

    /// Running time while active, frozen at the finish once the job
    /// completed, failed, or was stopped.
    fn elapsed_secs(&self) -> f64 {
        match (self.start_time, self.finish_time) {
            (Some(start), Some(end)) => end.saturating_duration_since(start).as_secs_f64(),
            (Some(start), None) => start.elapsed().as_secs_f64(),
            _ => 0.0,
        }
    }

    fn reset_cursor(&mut self) {
        self.sent = 0;
        self.received = 0;
        self.tool_changes = 0;
        self.start_time = None;
        self.finish_time = None;
        self.pending_tool_change = false;
    }
}

/// Whether a line contains an `M6`/`M06` tool-change word.
///
/// Scans g-code words rather than substrings so `M60` and comments don't
/// false-positive.
pub fn is_tool_change(line: &str) -> bool {
    has_m_word(line, &[6])
}

/// Whether a line contains an `M0`/`M1` program-pause word
pub fn is_program_pause(line: &str) -> bool {
    has_m_word(line, &[0, 1])
}

fn has_m_word(line: &str, codes: &[u16]) -> bool {
    let line = strip_comments(line);
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].eq_ignore_ascii_case(&b'M') {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > start {
                if let Ok(code) = line[start..end].parse::<u16>() {
                    if codes.contains(&code) {
                        return true;
                    }
                }
                i = end;
                continue;
            }
        }
        i += 1;
    }
    false
}

/// Drop `;` line comments and `(...)` inline comments
fn strip_comments(line: &str) -> String {
    let line = line.split(';').next().unwrap_or("");
    let mut out = String::with_capacity(line.len());
    let mut depth = 0usize;
    for c in line.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn sender_with_job(text: &str) -> Sender {
        let mut sender = Sender::new();
        sender.load(Job::from_text("test.nc", text).unwrap()).unwrap();
        sender
    }

    #[test]
    fn test_job_from_text_drops_blank_lines() {
        let job = Job::from_text("t", "G0 X1\n\n  \nG0 X2\n").unwrap();
        assert_eq!(job.total_lines(), 2);
        assert_eq!(job.lines[1], "G0 X2");
    }

    #[test]
    fn test_empty_job_rejected() {
        assert!(Job::from_text("t", "\n  \n").is_err());
    }

    #[test]
    fn test_oversized_line_rejected_at_load() {
        // 200 characters plus the newline can never fit the 127-byte buffer
        let program = format!("G0 X1\nG1 X0 ({})\nG0 X2", "c".repeat(200));
        let err = Job::from_text("t", &program).unwrap_err();
        assert!(matches!(
            err,
            grblkit_core::Error::Sender(grblkit_core::SenderError::InvalidJob { .. })
        ));

        // A tighter firmware buffer rejects lines the stock one accepts
        let job = Job::from_text("t", "G1 X123.456 Y123.456").unwrap();
        assert!(job.validate(64).is_ok());
        assert!(job.validate(10).is_err());
    }

    #[test]
    fn test_stream_and_complete() {
        let mock = MockTransport::new();
        let mut feeder = Feeder::new(mock.clone());
        let mut sender = sender_with_job("G0 X1\nG0 X2\nG0 X3");
        sender.start().unwrap();

        sender.pump(&mut feeder).unwrap();
        feeder.pump().unwrap();
        assert_eq!(mock.written_commands(), vec!["G0 X1", "G0 X2", "G0 X3"]);
        assert_eq!(sender.sent(), 3);

        for line in 0..2 {
            feeder.on_ack();
            match sender.on_ack(line) {
                AckOutcome::Progress(status) => {
                    assert_eq!(status.received, line + 1);
                    assert!(status.received <= status.sent);
                }
                other => panic!("expected progress, got {:?}", other),
            }
        }

        feeder.on_ack();
        assert!(matches!(sender.on_ack(2), AckOutcome::Completed { .. }));
        assert!(!sender.is_active());
    }

    #[test]
    fn test_lookahead_window() {
        let mock = MockTransport::new();
        let mut feeder = Feeder::new(mock);
        let program = (0..20)
            .map(|i| format!("G1 X{}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let mut sender = sender_with_job(&program);
        sender.start().unwrap();

        // The feeder queue is never drained, so the window fills and stops
        sender.pump(&mut feeder).unwrap();
        assert_eq!(sender.sent(), LOOKAHEAD_LINES);
        assert_eq!(feeder.queued_len(), LOOKAHEAD_LINES);
    }

    #[test]
    fn test_fail_fast_stops_job() {
        let mock = MockTransport::new();
        let mut feeder = Feeder::new(mock);
        let mut sender = sender_with_job("G0 X1\nG91.5\nG0 X2");
        sender.start().unwrap();
        sender.pump(&mut feeder).unwrap();

        feeder.on_ack();
        sender.on_ack(0);
        feeder.on_error();
        match sender.on_error(1) {
            AckOutcome::Failed { line, .. } => assert_eq!(line, 1),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!sender.is_active());
    }

    #[test]
    fn test_continue_policy_keeps_streaming() {
        let mock = MockTransport::new();
        let mut feeder = Feeder::new(mock);
        let mut sender = sender_with_job("G0 X1\nG91.5");
        sender.error_policy = ErrorPolicy::Continue;
        sender.start().unwrap();
        sender.pump(&mut feeder).unwrap();

        feeder.on_ack();
        sender.on_ack(0);
        feeder.on_error();
        // The rejection of the last line still completes the job
        assert!(matches!(sender.on_error(1), AckOutcome::Completed { .. }));
    }

    #[test]
    fn test_tool_change_waits_for_drain() {
        let mock = MockTransport::new();
        let mut feeder = Feeder::new(mock.clone());
        let mut sender = sender_with_job("G0 X1\nM6 T2\nG0 X2");
        sender.start().unwrap();

        // First pump sends line 0, then parks on the M6 until it drains
        let hold = sender.pump(&mut feeder).unwrap();
        assert!(!hold);
        feeder.pump().unwrap();
        assert_eq!(mock.written_commands(), vec!["G0 X1"]);

        feeder.on_ack();
        sender.on_ack(0);
        let hold = sender.pump(&mut feeder).unwrap();
        assert!(hold);
        assert!(sender.is_pending_tool_change());
        // The M6 line itself is never transmitted
        assert_eq!(mock.written_commands(), vec!["G0 X1"]);

        sender.tool_change_acknowledged();
        sender.pump(&mut feeder).unwrap();
        feeder.pump().unwrap();
        assert_eq!(mock.written_commands(), vec!["G0 X1", "G0 X2"]);

        let status = sender.status().unwrap();
        assert_eq!(status.tool_changes, 1);
    }

    #[test]
    fn test_tool_change_passthrough() {
        let mock = MockTransport::new();
        let mut feeder = Feeder::new(mock.clone());
        let mut sender = sender_with_job("M6 T2\nG0 X2");
        sender.tool_change_policy = ToolChangePolicy::Passthrough;
        sender.start().unwrap();

        let hold = sender.pump(&mut feeder).unwrap();
        assert!(!hold);
        feeder.pump().unwrap();
        assert_eq!(mock.written_commands(), vec!["M6 T2", "G0 X2"]);
    }

    #[test]
    fn test_tool_change_detection() {
        assert!(is_tool_change("M6"));
        assert!(is_tool_change("M06 T3"));
        assert!(is_tool_change("T2 M6"));
        assert!(is_tool_change("m6"));
        assert!(!is_tool_change("M60"));
        assert!(!is_tool_change("G1 X6"));
        assert!(!is_tool_change("; M6 in a comment"));
        assert!(!is_tool_change("(M6) G0 X1"));
    }

    #[test]
    fn test_program_pause_detection() {
        assert!(is_program_pause("M0"));
        assert!(is_program_pause("M1"));
        assert!(is_program_pause("M00 (insert part)"));
        assert!(!is_program_pause("M10"));
        assert!(!is_program_pause("G1 X0"));
    }

    #[test]
    fn test_stop_keeps_job_loaded() {
        let mock = MockTransport::new();
        let mut feeder = Feeder::new(mock);
        let mut sender = sender_with_job("G0 X1\nG0 X2");
        sender.start().unwrap();
        sender.pump(&mut feeder).unwrap();

        assert!(matches!(sender.stop(), Some(SenderEvent::Stopped { .. })));
        assert!(!sender.is_active());
        assert!(sender.job().is_some());

        // Restart begins again from line zero
        sender.start().unwrap();
        assert_eq!(sender.sent(), 0);
    }

    #[test]
    fn test_load_rejected_while_active() {
        let mut sender = sender_with_job("G0 X1");
        sender.start().unwrap();
        assert!(sender.load(Job::from_text("other", "G0 X9").unwrap()).is_err());
    }

    #[test]
    fn test_elapsed_frozen_after_completion() {
        let mock = MockTransport::new();
        let mut feeder = Feeder::new(mock);
        let mut sender = sender_with_job("G0 X1");
        sender.start().unwrap();
        sender.pump(&mut feeder).unwrap();

        feeder.on_ack();
        let elapsed_at_finish = match sender.on_ack(0) {
            AckOutcome::Completed { elapsed_secs, .. } => elapsed_secs,
            other => panic!("expected completion, got {:?}", other),
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        let status = sender.status().unwrap();
        assert_eq!(status.elapsed_secs, elapsed_at_finish);
    }

    #[test]
    fn test_fail_current_marks_cursor_line() {
        let mock = MockTransport::new();
        let mut feeder = Feeder::new(mock);
        let program = (0..12)
            .map(|i| format!("G1 X{}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let mut sender = sender_with_job(&program);
        sender.start().unwrap();
        sender.pump(&mut feeder).unwrap();

        // The lookahead window stopped the cursor at line 8
        let (job_id, line) = sender.fail_current().unwrap();
        assert_eq!(job_id, sender.job().unwrap().id);
        assert_eq!(line, LOOKAHEAD_LINES);
        assert!(!sender.is_active());
        assert!(sender.fail_current().is_none());
    }

    #[test]
    fn test_eta_appears_after_first_ack() {
        let mock = MockTransport::new();
        let mut feeder = Feeder::new(mock);
        let mut sender = sender_with_job("G0 X1\nG0 X2\nG0 X3\nG0 X4");
        sender.start().unwrap();
        sender.pump(&mut feeder).unwrap();

        assert!(sender.status().unwrap().estimated_remaining_secs.is_none());
        feeder.on_ack();
        sender.on_ack(0);
        assert!(sender.status().unwrap().estimated_remaining_secs.is_some());
    }
}
