//! GRBL wire protocol.
//!
//! Line-oriented: commands are ASCII lines terminated by `\n`; real-time
//! commands are single unterminated control bytes; responses classify by a
//! fixed grammar (see [`response::parse_line`]).

pub mod codes;
pub mod response;
pub mod status;

pub use codes::{alarm_description, error_description};
pub use response::{parse_line, GrblResponse};
pub use status::StatusReport;

/// Real-time control bytes, sent unterminated and never counted against the
/// receive-buffer budget.
pub mod realtime {
    /// Status report query
    pub const STATUS_QUERY: u8 = b'?';
    /// Feed hold
    pub const FEED_HOLD: u8 = b'!';
    /// Cycle start / resume
    pub const CYCLE_START: u8 = b'~';
    /// Soft reset (Ctrl-X)
    pub const SOFT_RESET: u8 = 0x18;
    /// Jog cancel
    pub const JOG_CANCEL: u8 = 0x85;
}
