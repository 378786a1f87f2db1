//! Core data model for the streaming engine.
//!
//! Defines machine positions, the firmware-reported active state, the
//! application-level workflow state, hold reasons, and the wholesale-replaced
//! controller snapshot consumed by the UI layer.

use serde::{Deserialize, Serialize};

/// A machine or work coordinate position.
///
/// X/Y/Z are always present; rotary axes are optional and omitted by most
/// three-axis machines.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X-axis position
    pub x: f64,
    /// Y-axis position
    pub y: f64,
    /// Z-axis position
    pub z: f64,
    /// A axis (4th axis) position
    pub a: Option<f64>,
    /// B axis (5th axis) position
    pub b: Option<f64>,
    /// C axis (6th axis) position
    pub c: Option<f64>,
}

impl Position {
    /// Create a new position with X, Y, Z coordinates
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            a: None,
            b: None,
            c: None,
        }
    }

    /// Component-wise subtraction, used to derive work coordinates
    /// (WPos = MPos - WCO).
    pub fn minus(&self, other: &Position) -> Position {
        Position {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
            a: combine_opt(self.a, other.a, |l, r| l - r),
            b: combine_opt(self.b, other.b, |l, r| l - r),
            c: combine_opt(self.c, other.c, |l, r| l - r),
        }
    }

    /// Component-wise addition, used to derive machine coordinates
    /// (MPos = WPos + WCO).
    pub fn plus(&self, other: &Position) -> Position {
        Position {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
            a: combine_opt(self.a, other.a, |l, r| l + r),
            b: combine_opt(self.b, other.b, |l, r| l + r),
            c: combine_opt(self.c, other.c, |l, r| l + r),
        }
    }
}

fn combine_opt(lhs: Option<f64>, rhs: Option<f64>, op: impl Fn(f64, f64) -> f64) -> Option<f64> {
    match (lhs, rhs) {
        (Some(l), Some(r)) => Some(op(l, r)),
        (l, None) => l,
        _ => None,
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "X{:.3} Y{:.3} Z{:.3}", self.x, self.y, self.z)
    }
}

/// Firmware-reported active state, as it appears in the first field of a
/// `<...>` status report.
///
/// Hold and Door carry the sub-state digit reported by GRBL 1.1
/// (e.g. `Hold:0` = hold complete, `Hold:1` = hold in progress).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    /// Idle and ready for commands
    Idle,
    /// Executing motion
    Run,
    /// Feed hold, with optional sub-state
    Hold(Option<u8>),
    /// Jog motion in progress
    Jog,
    /// Alarm state, all motion locked out
    Alarm,
    /// Safety door open, with optional sub-state
    Door(Option<u8>),
    /// Check mode (G-code verified without motion)
    Check,
    /// Homing cycle in progress
    Home,
    /// Low-power sleep
    Sleep,
}

impl MachineState {
    /// Parse the state field of a status report (e.g. `Idle`, `Hold:0`).
    pub fn parse(field: &str) -> Option<Self> {
        let (name, sub) = match field.split_once(':') {
            Some((name, sub)) => (name, sub.trim().parse::<u8>().ok()),
            None => (field, None),
        };

        match name.trim() {
            "Idle" => Some(Self::Idle),
            "Run" => Some(Self::Run),
            "Hold" => Some(Self::Hold(sub)),
            "Jog" => Some(Self::Jog),
            "Alarm" => Some(Self::Alarm),
            "Door" => Some(Self::Door(sub)),
            "Check" => Some(Self::Check),
            "Home" => Some(Self::Home),
            "Sleep" => Some(Self::Sleep),
            _ => None,
        }
    }

    /// Whether the machine is held (feed hold or safety door).
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Hold(_) | Self::Door(_))
    }
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Run => write!(f, "Run"),
            Self::Hold(Some(sub)) => write!(f, "Hold:{}", sub),
            Self::Hold(None) => write!(f, "Hold"),
            Self::Jog => write!(f, "Jog"),
            Self::Alarm => write!(f, "Alarm"),
            Self::Door(Some(sub)) => write!(f, "Door:{}", sub),
            Self::Door(None) => write!(f, "Door"),
            Self::Check => write!(f, "Check"),
            Self::Home => write!(f, "Home"),
            Self::Sleep => write!(f, "Sleep"),
        }
    }
}

/// Connection lifecycle of the controller session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected to any controller
    #[default]
    Disconnected,
    /// Transport opened, session starting
    Connecting,
    /// Soft query and settings dump sent, waiting for recognizable frames
    Identifying,
    /// Firmware identified, streaming allowed
    Ready,
    /// Identification failed (firmware not detected)
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Identifying => write!(f, "Identifying"),
            Self::Ready => write!(f, "Ready"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Application-level workflow state shown to the operator.
///
/// Owned exclusively by the workflow reducer; no other component computes
/// this independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkflowState {
    /// No job running
    #[default]
    Idle,
    /// Job streaming in progress
    Running,
    /// Job paused, see the associated hold reason
    Paused,
    /// Check-mode dry run (no motion)
    Testing,
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Paused => write!(f, "Paused"),
            Self::Testing => write!(f, "Testing"),
        }
    }
}

/// Cause of a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldCause {
    /// Operator-initiated feed hold
    FeedHold,
    /// Safety door open
    Door,
    /// Program pause embedded in the G-code (M0/M1)
    ProgramPause,
    /// Tool change requested (M6-class line)
    ToolChange,
}

impl HoldCause {
    /// Holds that require an explicit acknowledgment before resume takes
    /// effect (tool seated, door closed).
    pub fn requires_acknowledgement(&self) -> bool {
        matches!(self, Self::ToolChange | Self::Door)
    }
}

impl std::fmt::Display for HoldCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FeedHold => write!(f, "Feed Hold"),
            Self::Door => write!(f, "Door"),
            Self::ProgramPause => write!(f, "M0/M1"),
            Self::ToolChange => write!(f, "Tool Change"),
        }
    }
}

/// Why the workflow is paused, with an optional free-text comment for
/// display (e.g. the G-code comment preceding an M0).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldReason {
    /// The cause of the hold
    pub cause: HoldCause,
    /// Optional free-text comment for display
    pub comment: Option<String>,
}

impl HoldReason {
    /// Create a hold reason without a comment
    pub fn new(cause: HoldCause) -> Self {
        Self {
            cause,
            comment: None,
        }
    }

    /// Create a hold reason with a display comment
    pub fn with_comment(cause: HoldCause, comment: impl Into<String>) -> Self {
        Self {
            cause,
            comment: Some(comment.into()),
        }
    }
}

impl std::fmt::Display for HoldReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.comment {
            Some(comment) => write!(f, "{} ({})", self.cause, comment),
            None => write!(f, "{}", self.cause),
        }
    }
}

/// Override percentages reported in the `Ov:` status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideState {
    /// Feed override percentage
    pub feed: u16,
    /// Rapid override percentage
    pub rapid: u16,
    /// Spindle override percentage
    pub spindle: u16,
}

impl Default for OverrideState {
    fn default() -> Self {
        Self {
            feed: 100,
            rapid: 100,
            spindle: 100,
        }
    }
}

/// Input pin states reported in the `Pn:` status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PinState {
    /// X limit switch triggered
    pub limit_x: bool,
    /// Y limit switch triggered
    pub limit_y: bool,
    /// Z limit switch triggered
    pub limit_z: bool,
    /// Probe input triggered
    pub probe: bool,
    /// Safety door input open
    pub door: bool,
    /// Feed-hold input asserted
    pub hold: bool,
    /// Soft-reset input asserted
    pub reset: bool,
    /// Cycle-start input asserted
    pub start: bool,
}

impl PinState {
    /// Parse the `Pn:` field character flags (e.g. `XYZPDHRS`).
    pub fn parse(flags: &str) -> Self {
        let mut pins = Self::default();
        for ch in flags.chars() {
            match ch {
                'X' => pins.limit_x = true,
                'Y' => pins.limit_y = true,
                'Z' => pins.limit_z = true,
                'P' => pins.probe = true,
                'D' => pins.door = true,
                'H' => pins.hold = true,
                'R' => pins.reset = true,
                'S' => pins.start = true,
                _ => {}
            }
        }
        pins
    }

    /// Whether any pin is asserted.
    pub fn any(&self) -> bool {
        self.limit_x
            || self.limit_y
            || self.limit_z
            || self.probe
            || self.door
            || self.hold
            || self.reset
            || self.start
    }
}

/// The latest parsed status report.
///
/// Replaced wholesale on every status frame; never partially mutated, so
/// concurrent readers never observe a torn snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    /// Active machine state
    pub active_state: MachineState,
    /// Machine position
    pub mpos: Position,
    /// Work position
    pub wpos: Position,
    /// Work coordinate offset, if reported
    pub wco: Option<Position>,
    /// Override percentages
    pub overrides: OverrideState,
    /// Current feed rate (units/min), if reported
    pub feed_rate: Option<f64>,
    /// Current spindle speed (RPM), if reported
    pub spindle_speed: Option<f64>,
    /// Free bytes in the firmware receive buffer (`Bf:` field)
    pub buffer_bytes_free: Option<u16>,
    /// Free planner blocks (`Bf:` field)
    pub planner_blocks_free: Option<u16>,
    /// Input pin states
    pub pins: PinState,
    /// Last alarm code, if the machine is alarmed
    pub alarm_code: Option<u8>,
}

impl Default for ControllerSnapshot {
    fn default() -> Self {
        Self {
            active_state: MachineState::Idle,
            mpos: Position::default(),
            wpos: Position::default(),
            wco: None,
            overrides: OverrideState::default(),
            feed_rate: None,
            spindle_speed: None,
            buffer_bytes_free: None,
            planner_blocks_free: None,
            pins: PinState::default(),
            alarm_code: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_state_parse() {
        assert_eq!(MachineState::parse("Idle"), Some(MachineState::Idle));
        assert_eq!(MachineState::parse("Run"), Some(MachineState::Run));
        assert_eq!(
            MachineState::parse("Hold:0"),
            Some(MachineState::Hold(Some(0)))
        );
        assert_eq!(
            MachineState::parse("Door:1"),
            Some(MachineState::Door(Some(1)))
        );
        assert_eq!(MachineState::parse("Hold"), Some(MachineState::Hold(None)));
        assert_eq!(MachineState::parse("Garbage"), None);
    }

    #[test]
    fn test_machine_state_held() {
        assert!(MachineState::Hold(Some(1)).is_held());
        assert!(MachineState::Door(None).is_held());
        assert!(!MachineState::Run.is_held());
    }

    #[test]
    fn test_position_minus() {
        let mpos = Position::new(10.0, 20.0, 5.0);
        let wco = Position::new(1.0, 2.0, 3.0);
        let wpos = mpos.minus(&wco);
        assert_eq!(wpos.x, 9.0);
        assert_eq!(wpos.y, 18.0);
        assert_eq!(wpos.z, 2.0);
    }

    #[test]
    fn test_pin_state_parse() {
        let pins = PinState::parse("XP");
        assert!(pins.limit_x);
        assert!(pins.probe);
        assert!(!pins.door);
        assert!(pins.any());
        assert!(!PinState::parse("").any());
    }

    #[test]
    fn test_hold_reason_display() {
        assert_eq!(HoldReason::new(HoldCause::FeedHold).to_string(), "Feed Hold");
        assert_eq!(
            HoldReason::new(HoldCause::ProgramPause).to_string(),
            "M0/M1"
        );
        assert_eq!(
            HoldReason::with_comment(HoldCause::ToolChange, "T2").to_string(),
            "Tool Change (T2)"
        );
    }

    #[test]
    fn test_hold_acknowledgement_rules() {
        assert!(HoldCause::ToolChange.requires_acknowledgement());
        assert!(HoldCause::Door.requires_acknowledgement());
        assert!(!HoldCause::FeedHold.requires_acknowledgement());
        assert!(!HoldCause::ProgramPause.requires_acknowledgement());
    }

    #[test]
    fn test_snapshot_serialization() {
        let snapshot = ControllerSnapshot {
            active_state: MachineState::Hold(Some(0)),
            alarm_code: None,
            ..Default::default()
        };
        let json = serde_json::to_string(&snapshot).expect("Should serialize");
        let parsed: ControllerSnapshot =
            serde_json::from_str(&json).expect("Should deserialize");
        assert_eq!(parsed, snapshot);
    }
}
