//! Event type definitions for the engine.
//!
//! All cross-component notification happens through these typed events.
//! Events are cloneable and serializable for logging and replay.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ConnectionState, ControllerSnapshot, HoldReason, WorkflowState};

/// Root event enum for everything the engine emits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoreEvent {
    /// Transport/connection lifecycle
    Connection(ConnectionEvent),
    /// Controller state machine and firmware frames
    Controller(ControllerEvent),
    /// Feeder queue status
    Feeder(FeederStatus),
    /// Job streaming lifecycle and progress
    Sender(SenderEvent),
    /// Workflow state transitions
    Workflow(WorkflowEvent),
}

impl CoreEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            CoreEvent::Connection(_) => EventCategory::Connection,
            CoreEvent::Controller(_) => EventCategory::Controller,
            CoreEvent::Feeder(_) => EventCategory::Feeder,
            CoreEvent::Sender(_) => EventCategory::Sender,
            CoreEvent::Workflow(_) => EventCategory::Workflow,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            CoreEvent::Connection(e) => e.description(),
            CoreEvent::Controller(e) => e.description(),
            CoreEvent::Feeder(e) => e.description(),
            CoreEvent::Sender(e) => e.description(),
            CoreEvent::Workflow(e) => e.description(),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Transport/connection lifecycle events.
    Connection,
    /// Controller state machine events.
    Controller,
    /// Feeder queue events.
    Feeder,
    /// Job streaming events.
    Sender,
    /// Workflow state events.
    Workflow,
}

/// Reason a connection was closed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// User requested disconnect
    UserRequested,
    /// Connection lost unexpectedly
    ConnectionLost,
    /// Handshake or watchdog timeout
    Timeout,
    /// Error occurred
    Error(String),
}

/// Transport/connection lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Serial port (or other transport) opened.
    Opened {
        /// Transport path that was opened.
        port: String,
        /// Firmware welcome banner, once identified.
        firmware: Option<String>,
    },
    /// Transport closed.
    Closed {
        /// Transport path that was closed.
        port: String,
        /// Why the transport closed.
        reason: DisconnectReason,
    },
    /// Open attempt failed.
    Failed {
        /// Transport path that failed to open.
        port: String,
        /// Error message describing the failure.
        error: String,
    },
}

impl ConnectionEvent {
    fn description(&self) -> String {
        match self {
            ConnectionEvent::Opened { port, firmware } => match firmware {
                Some(fw) => format!("Opened {} ({})", port, fw),
                None => format!("Opened {}", port),
            },
            ConnectionEvent::Closed { port, reason } => {
                format!("Closed {}: {:?}", port, reason)
            }
            ConnectionEvent::Failed { port, error } => {
                format!("Open failed on {}: {}", port, error)
            }
        }
    }
}

/// Controller state machine events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControllerEvent {
    /// Connection lifecycle state changed.
    StateChanged {
        /// Previous connection state.
        old: ConnectionState,
        /// New connection state.
        new: ConnectionState,
    },
    /// A fresh status snapshot was parsed.
    Status(ControllerSnapshot),
    /// Firmware raised an alarm.
    Alarm {
        /// Alarm code number.
        code: u8,
        /// Human-readable alarm description.
        description: String,
    },
    /// Firmware rejected a command.
    CommandError {
        /// Error code number.
        code: u8,
        /// Human-readable error description.
        description: String,
        /// The offending command text, if known.
        command: Option<String>,
        /// Job line number the command belonged to, if any.
        line: Option<usize>,
    },
    /// Firmware banner or `[...]` feedback message.
    Message(String),
}

impl ControllerEvent {
    fn description(&self) -> String {
        match self {
            ControllerEvent::StateChanged { old, new } => {
                format!("Connection: {} -> {}", old, new)
            }
            ControllerEvent::Status(snapshot) => {
                format!("Status: {}", snapshot.active_state)
            }
            ControllerEvent::Alarm { code, description } => {
                format!("Alarm {}: {}", code, description)
            }
            ControllerEvent::CommandError {
                code,
                description,
                command,
                ..
            } => match command {
                Some(cmd) => format!("error:{} ({}) on {:?}", code, description, cmd),
                None => format!("error:{} ({})", code, description),
            },
            ControllerEvent::Message(msg) => format!("Message: {}", msg),
        }
    }
}

/// Feeder queue status, emitted whenever the queue shape changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeederStatus {
    /// Commands waiting in the pending FIFO
    pub queued: usize,
    /// Commands sent but not yet acknowledged
    pub in_flight: usize,
    /// Bytes sent but not yet acknowledged
    pub pending_bytes: usize,
    /// Whether the feeder is held
    pub held: bool,
}

impl FeederStatus {
    fn description(&self) -> String {
        format!(
            "Feeder: {} queued, {} in flight ({} bytes){}",
            self.queued,
            self.in_flight,
            self.pending_bytes,
            if self.held { ", held" } else { "" }
        )
    }
}

/// Job streaming progress, recomputed on every acknowledgment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderStatus {
    /// Job identifier
    pub job_id: Uuid,
    /// Total lines in the job
    pub total_lines: usize,
    /// Lines handed to the feeder
    pub sent: usize,
    /// Lines acknowledged by the firmware
    pub received: usize,
    /// Tool changes detected so far
    pub tool_changes: usize,
    /// Seconds elapsed since the job started
    pub elapsed_secs: f64,
    /// Estimated seconds remaining, once at least one line is acknowledged
    pub estimated_remaining_secs: Option<f64>,
}

/// Job streaming lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SenderEvent {
    /// A job was loaded.
    Loaded {
        /// Job identifier.
        job_id: Uuid,
        /// Total lines in the job.
        total_lines: usize,
    },
    /// Progress update.
    Status(SenderStatus),
    /// The job ran to completion.
    Completed {
        /// Job identifier.
        job_id: Uuid,
        /// Seconds the job took.
        elapsed_secs: f64,
    },
    /// The job was stopped before completion.
    Stopped {
        /// Job identifier.
        job_id: Uuid,
    },
    /// A line of the job was rejected by the firmware.
    Errored {
        /// Job identifier.
        job_id: Uuid,
        /// Line number (zero-based) that errored.
        line: usize,
    },
    /// The job was unloaded.
    Unloaded,
}

impl SenderEvent {
    fn description(&self) -> String {
        match self {
            SenderEvent::Loaded {
                job_id,
                total_lines,
            } => format!("Job {} loaded: {} lines", job_id, total_lines),
            SenderEvent::Status(status) => {
                format!(
                    "Progress: {}/{} sent, {} acked",
                    status.sent, status.total_lines, status.received
                )
            }
            SenderEvent::Completed {
                job_id,
                elapsed_secs,
            } => format!("Job {} completed in {:.1}s", job_id, elapsed_secs),
            SenderEvent::Stopped { job_id } => format!("Job {} stopped", job_id),
            SenderEvent::Errored { job_id, line } => {
                format!("Job {} errored at line {}", job_id, line + 1)
            }
            SenderEvent::Unloaded => "Job unloaded".to_string(),
        }
    }
}

/// Workflow state transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkflowEvent {
    /// The workflow state changed.
    StateChanged {
        /// New workflow state.
        state: WorkflowState,
        /// Hold reason, when paused.
        hold_reason: Option<HoldReason>,
    },
}

impl WorkflowEvent {
    fn description(&self) -> String {
        match self {
            WorkflowEvent::StateChanged { state, hold_reason } => match hold_reason {
                Some(reason) => format!("Workflow: {} ({})", state, reason),
                None => format!("Workflow: {}", state),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_category() {
        let event = CoreEvent::Connection(ConnectionEvent::Opened {
            port: "/dev/ttyUSB0".to_string(),
            firmware: Some("Grbl 1.1h".to_string()),
        });
        assert_eq!(event.category(), EventCategory::Connection);

        let event = CoreEvent::Workflow(WorkflowEvent::StateChanged {
            state: WorkflowState::Running,
            hold_reason: None,
        });
        assert_eq!(event.category(), EventCategory::Workflow);
    }

    #[test]
    fn test_event_description() {
        let event = CoreEvent::Connection(ConnectionEvent::Opened {
            port: "/dev/ttyUSB0".to_string(),
            firmware: Some("Grbl 1.1h".to_string()),
        });
        assert!(event.description().contains("Opened"));
        assert!(event.description().contains("Grbl"));
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Feeder(FeederStatus {
            queued: 3,
            in_flight: 2,
            pending_bytes: 80,
            held: false,
        });
        let json = serde_json::to_string(&event).expect("Should serialize");
        let parsed: CoreEvent = serde_json::from_str(&json).expect("Should deserialize");

        if let CoreEvent::Feeder(status) = parsed {
            assert_eq!(status.pending_bytes, 80);
        } else {
            panic!("Wrong event type after deserialization");
        }
    }
}
