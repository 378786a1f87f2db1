//! Error handling for GrblKit
//!
//! Provides error types for all layers of the engine:
//! - Connection errors (transport open/close/IO failures)
//! - Protocol errors (unparseable firmware frames)
//! - Controller errors (alarms, rejected commands, handshake failures)
//! - Feeder errors (queue validation)
//! - Sender errors (job validation and lifecycle)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Represents failures of the underlying byte transport. These are fatal to
/// the session: the workflow is forced back to idle and the caller must
/// reconnect explicitly.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Port not found
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Connection lost mid-session
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Not connected
    #[error("Transport not connected")]
    NotConnected,

    /// I/O error
    #[error("I/O error: {reason}")]
    IoError {
        /// The reason for the I/O error.
        reason: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// Protocol error type
///
/// Represents unparseable or unexpected frames from the firmware. These are
/// recovered locally (logged and dropped) and never crash the parser.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// A frame that could not be classified by the grammar
    #[error("Malformed frame: {line:?}")]
    MalformedFrame {
        /// The raw line that failed to parse.
        line: String,
    },

    /// An acknowledgment arrived with no command in flight
    #[error("Unsolicited acknowledgment (no command in flight)")]
    UnsolicitedAck,
}

/// Controller error type
///
/// Represents firmware-level failures: alarms, rejected commands, and
/// handshake problems.
#[derive(Error, Debug, Clone)]
pub enum ControllerError {
    /// Controller is not connected
    #[error("Controller not connected")]
    NotConnected,

    /// Controller is already connected
    #[error("Controller already connected")]
    AlreadyConnected,

    /// No recognizable firmware frame within the identification window
    #[error("Firmware not detected within {timeout_ms}ms")]
    FirmwareNotDetected {
        /// The identification timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Firmware rejected a command with `error:<code>`
    #[error("Command rejected (error:{code}): {description}")]
    CommandRejected {
        /// The numeric error code from the firmware.
        code: u8,
        /// Human-readable description of the error code.
        description: String,
        /// The offending command text, if known.
        command: Option<String>,
    },

    /// Firmware raised `ALARM:<code>`
    #[error("Alarm {code}: {description}")]
    Alarm {
        /// The numeric alarm code from the firmware.
        code: u8,
        /// Human-readable description of the alarm code.
        description: String,
    },

    /// Normal sends are blocked until an explicit unlock or reset
    #[error("Controller is alarmed; unlock or reset before sending")]
    Locked,
}

/// Feeder error type
#[derive(Error, Debug, Clone)]
pub enum FeederError {
    /// A single command exceeds the entire receive-buffer budget
    #[error("Command of {size} bytes exceeds the {budget}-byte buffer budget")]
    OversizedCommand {
        /// Size of the rejected command in bytes, including the newline.
        size: usize,
        /// The configured receive-buffer budget in bytes.
        budget: usize,
    },
}

/// Sender error type
#[derive(Error, Debug, Clone)]
pub enum SenderError {
    /// Job failed validation at load time
    #[error("Invalid job: {reason}")]
    InvalidJob {
        /// The reason the job was rejected.
        reason: String,
    },

    /// No job is loaded
    #[error("No job loaded")]
    NoJobLoaded,

    /// Start requested while the workflow is not idle
    #[error("Cannot start: workflow is {state}")]
    NotIdle {
        /// The current workflow state name.
        state: String,
    },
}

/// Main error type for GrblKit
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Feeder error
    #[error(transparent)]
    Feeder(#[from] FeederError),

    /// Sender error
    #[error(transparent)]
    Sender(#[from] SenderError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this error is fatal to the session (forces workflow idle)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Connection(
                ConnectionError::ConnectionLost { .. } | ConnectionError::NotConnected
            )
        )
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is an alarm
    pub fn is_alarm(&self) -> bool {
        matches!(self, Error::Controller(ControllerError::Alarm { .. }))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_command_display() {
        let err = FeederError::OversizedCommand {
            size: 200,
            budget: 127,
        };
        assert!(err.to_string().contains("200"));
        assert!(err.to_string().contains("127"));
    }

    #[test]
    fn test_fatal_classification() {
        let lost: Error = ConnectionError::ConnectionLost {
            reason: "unplugged".to_string(),
        }
        .into();
        assert!(lost.is_fatal());

        let rejected: Error = ControllerError::CommandRejected {
            code: 20,
            description: "Unsupported command".to_string(),
            command: Some("M6 T2".to_string()),
        }
        .into();
        assert!(!rejected.is_fatal());
        assert!(!rejected.is_alarm());
    }
}
