//! GRBL status report parsing.
//!
//! Parses the `<State|MPos:x,y,z|...>` bracketed report into a
//! [`StatusReport`] and resolves it into a [`ControllerSnapshot`].
//!
//! GRBL can be configured (via $10) to report either `MPos` or `WPos`, and
//! only includes `WCO:` intermittently. The resolver keeps the last seen
//! offset sticky so the missing coordinate space can always be derived
//! (WPos = MPos - WCO).

use grblkit_core::{ControllerSnapshot, MachineState, OverrideState, PinState, Position};
use serde::{Deserialize, Serialize};

/// Fields parsed from a single status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Active machine state (first field, always present)
    pub state: MachineState,
    /// Machine position, if reported
    pub mpos: Option<Position>,
    /// Work position, if reported
    pub wpos: Option<Position>,
    /// Work coordinate offset, if reported
    pub wco: Option<Position>,
    /// Override percentages (`Ov:feed,rapid,spindle`)
    pub overrides: Option<OverrideState>,
    /// Feed rate from `F:` or `FS:`
    pub feed_rate: Option<f64>,
    /// Spindle speed from `S:` or `FS:`
    pub spindle_speed: Option<f64>,
    /// `Bf:` planner blocks free
    pub planner_blocks_free: Option<u16>,
    /// `Bf:` receive-buffer bytes free
    pub buffer_bytes_free: Option<u16>,
    /// `Pn:` pin flags
    pub pins: Option<PinState>,
}

impl StatusReport {
    /// Parse a `<...>` status line. Returns None if the line is not a
    /// status report or its state field is unrecognizable.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('<') || !line.ends_with('>') {
            return None;
        }

        let mut parts = line[1..line.len() - 1].split('|');
        let state = MachineState::parse(parts.next()?)?;

        let mut report = Self {
            state,
            mpos: None,
            wpos: None,
            wco: None,
            overrides: None,
            feed_rate: None,
            spindle_speed: None,
            planner_blocks_free: None,
            buffer_bytes_free: None,
            pins: None,
        };

        for part in parts {
            let part = part.trim();
            if let Some(pos) = part.strip_prefix("MPos:") {
                report.mpos = parse_position(pos);
            } else if let Some(pos) = part.strip_prefix("WPos:") {
                report.wpos = parse_position(pos);
            } else if let Some(pos) = part.strip_prefix("WCO:") {
                report.wco = parse_position(pos);
            } else if let Some(ov) = part.strip_prefix("Ov:") {
                report.overrides = parse_overrides(ov);
            } else if let Some(fs) = part.strip_prefix("FS:") {
                let mut values = fs.split(',');
                report.feed_rate = values.next().and_then(|v| v.trim().parse().ok());
                report.spindle_speed = values.next().and_then(|v| v.trim().parse().ok());
            } else if let Some(f) = part.strip_prefix("F:") {
                report.feed_rate = f.trim().parse().ok();
            } else if let Some(bf) = part.strip_prefix("Bf:") {
                let mut values = bf.split(',');
                report.planner_blocks_free = values.next().and_then(|v| v.trim().parse().ok());
                report.buffer_bytes_free = values.next().and_then(|v| v.trim().parse().ok());
            } else if let Some(pn) = part.strip_prefix("Pn:") {
                report.pins = Some(PinState::parse(pn));
            }
            // A:, Ln:, and other accessory fields are not needed by the engine
        }

        Some(report)
    }

    /// Resolve this report into a fresh snapshot.
    ///
    /// `sticky_wco` is the last offset seen on any earlier report; it is
    /// used (and updated) to derive whichever coordinate space the firmware
    /// omitted.
    pub fn resolve(&self, sticky_wco: &mut Option<Position>) -> ControllerSnapshot {
        if self.wco.is_some() {
            *sticky_wco = self.wco;
        }
        let wco = self.wco.or(*sticky_wco);

        let (mpos, wpos) = match (self.mpos, self.wpos, wco) {
            (Some(m), Some(w), _) => (m, w),
            (Some(m), None, Some(offset)) => (m, m.minus(&offset)),
            (None, Some(w), Some(offset)) => (w.plus(&offset), w),
            (Some(m), None, None) => (m, m),
            (None, Some(w), None) => (w, w),
            (None, None, _) => (Position::default(), Position::default()),
        };

        ControllerSnapshot {
            active_state: self.state,
            mpos,
            wpos,
            wco,
            overrides: self.overrides.unwrap_or_default(),
            feed_rate: self.feed_rate,
            spindle_speed: self.spindle_speed,
            buffer_bytes_free: self.buffer_bytes_free,
            planner_blocks_free: self.planner_blocks_free,
            pins: self.pins.unwrap_or_default(),
            alarm_code: None,
        }
    }
}

fn parse_position(field: &str) -> Option<Position> {
    let coords: Vec<f64> = field
        .split(',')
        .filter_map(|s| s.trim().parse::<f64>().ok())
        .collect();

    if coords.len() < 3 {
        return None;
    }

    Some(Position {
        x: coords[0],
        y: coords[1],
        z: coords[2],
        a: coords.get(3).copied(),
        b: coords.get(4).copied(),
        c: coords.get(5).copied(),
    })
}

fn parse_overrides(field: &str) -> Option<OverrideState> {
    let values: Vec<u16> = field
        .split(',')
        .filter_map(|s| s.trim().parse::<u16>().ok())
        .collect();

    if values.len() < 3 {
        return None;
    }

    Some(OverrideState {
        feed: values[0],
        rapid: values[1],
        spindle: values[2],
    })
}
