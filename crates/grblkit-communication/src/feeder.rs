//! Outbound command queue with character-counting flow control.
//!
//! Implements the de-facto GRBL streaming protocol: the sum of byte-lengths
//! of commands sent-but-not-yet-acknowledged never exceeds the firmware's
//! advertised receive buffer. Real-time commands (single control bytes)
//! bypass both the queue and the budget and are written immediately, even
//! while held or alarmed.

use crate::protocol::realtime;
use crate::transport::Transport;
use grblkit_core::{FeederError, FeederStatus, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::settings::DEFAULT_RX_BUFFER_SIZE;

/// Command priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Queued, budget-counted, newline-terminated
    Normal,
    /// Single unterminated control byte, sent immediately
    Realtime,
}

/// An outbound command. Immutable once enqueued.
#[derive(Debug, Clone)]
pub struct Command {
    /// Unique command id
    pub id: Uuid,
    /// Command text (for realtime commands, the single control character)
    pub text: String,
    /// Priority class
    pub kind: CommandKind,
    /// Job line number (zero-based), when submitted by the sender
    pub line: Option<usize>,
}

impl Command {
    /// A normal queued command
    pub fn normal(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            kind: CommandKind::Normal,
            line: None,
        }
    }

    /// A normal command tagged with its job line number
    pub fn job_line(line: usize, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            kind: CommandKind::Normal,
            line: Some(line),
        }
    }

    /// A real-time control byte
    pub fn realtime(byte: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: (byte as char).to_string(),
            kind: CommandKind::Realtime,
            line: None,
        }
    }

    /// Bytes this command occupies on the wire (newline included for
    /// normal commands).
    pub fn size_bytes(&self) -> usize {
        match self.kind {
            CommandKind::Normal => self.text.len() + 1,
            CommandKind::Realtime => 1,
        }
    }
}

/// Entry in the pending FIFO
#[derive(Debug, Clone)]
struct QueueEntry {
    command: Command,
    #[allow(dead_code)]
    enqueued_at: Instant,
}

/// A command written to the transport but not yet acknowledged
#[derive(Debug, Clone)]
pub struct InFlight {
    /// Command id
    pub id: Uuid,
    /// Command text
    pub text: String,
    /// Wire size used for budget accounting
    pub size: usize,
    /// Job line number, if the command belongs to the active job
    pub line: Option<usize>,
}

/// Priority command queue with byte-budget flow control.
///
/// Exclusively owns the pending FIFO, the in-flight record, and the byte
/// counters; acknowledgments are consumed strictly FIFO to match the
/// firmware's send-order protocol.
pub struct Feeder {
    transport: Arc<dyn Transport>,
    pending: VecDeque<QueueEntry>,
    in_flight: VecDeque<InFlight>,
    pending_bytes: usize,
    budget: usize,
    held: bool,
    blocked: bool,
}

impl Feeder {
    /// Create a feeder over the given transport with the stock GRBL budget
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pending: VecDeque::new(),
            in_flight: VecDeque::new(),
            pending_bytes: 0,
            budget: DEFAULT_RX_BUFFER_SIZE,
            held: false,
            blocked: false,
        }
    }

    /// Override the byte budget (identified firmware capability)
    pub fn set_budget(&mut self, budget: usize) {
        self.budget = budget;
    }

    /// The configured byte budget
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Accept a command.
    ///
    /// Real-time commands are written to the transport immediately,
    /// regardless of budget, hold, or alarm state. Normal commands join the
    /// pending FIFO; a command that could never fit the budget is rejected
    /// here rather than deadlocking the pump.
    pub fn enqueue(&mut self, command: Command) -> Result<()> {
        match command.kind {
            CommandKind::Realtime => {
                let byte = command.text.as_bytes().first().copied().unwrap_or(b'?');
                tracing::trace!("realtime 0x{:02x}", byte);
                self.transport.write_bytes(&[byte])
            }
            CommandKind::Normal => {
                let size = command.size_bytes();
                if size > self.budget {
                    return Err(FeederError::OversizedCommand {
                        size,
                        budget: self.budget,
                    }
                    .into());
                }
                self.pending.push_back(QueueEntry {
                    command,
                    enqueued_at: Instant::now(),
                });
                Ok(())
            }
        }
    }

    /// Move pending commands to the wire while the budget allows.
    ///
    /// Returns the number of commands written. Does nothing while held
    /// (feed hold / workflow pause) or blocked (alarm lockout).
    pub fn pump(&mut self) -> Result<usize> {
        if self.held || self.blocked {
            return Ok(0);
        }

        let mut written = 0;
        loop {
            let size = match self.pending.front() {
                Some(entry) => entry.command.size_bytes(),
                None => break,
            };
            if self.pending_bytes + size > self.budget {
                break;
            }

            // Budget holds; commit the send
            let Some(entry) = self.pending.pop_front() else {
                break;
            };
            let mut wire = entry.command.text.clone().into_bytes();
            wire.push(b'\n');
            self.transport.write_bytes(&wire)?;

            tracing::debug!("> {}", entry.command.text);
            self.pending_bytes += size;
            self.in_flight.push_back(InFlight {
                id: entry.command.id,
                text: entry.command.text,
                size,
                line: entry.command.line,
            });
            written += 1;
        }

        Ok(written)
    }

    /// Consume one `ok`: retire the oldest in-flight command and free its
    /// bytes. Returns the retired record, or None on an unsolicited ack
    /// (the byte counter fails safe by never going negative).
    pub fn on_ack(&mut self) -> Option<InFlight> {
        match self.in_flight.pop_front() {
            Some(record) => {
                self.pending_bytes = self.pending_bytes.saturating_sub(record.size);
                Some(record)
            }
            None => {
                tracing::warn!("unsolicited ok with no command in flight");
                None
            }
        }
    }

    /// Consume one `error:<n>`: same accounting as an ack, the firmware
    /// frees the buffer space either way.
    pub fn on_error(&mut self) -> Option<InFlight> {
        self.on_ack()
    }

    /// Stop dequeueing normal commands. In-flight commands are left to be
    /// acknowledged normally; motion is stopped by the real-time feed-hold
    /// byte, independent of this queue.
    pub fn hold(&mut self) {
        self.held = true;
    }

    /// Allow the pump to dequeue again
    pub fn resume(&mut self) {
        self.held = false;
    }

    /// Whether the feeder is held
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Alarm lockout: block normal sends until an explicit unlock/reset
    pub fn block(&mut self) {
        self.blocked = true;
    }

    /// Clear the alarm lockout
    pub fn unblock(&mut self) {
        self.blocked = false;
    }

    /// Whether normal sends are blocked by an alarm
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Drop everything still waiting in the FIFO (alarm handling)
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Full reset: pending, in-flight, counters, hold and lockout flags.
    /// Used on reconnect and soft reset; the firmware remembers nothing
    /// across a reset, so neither do we.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.in_flight.clear();
        self.pending_bytes = 0;
        self.held = false;
        self.blocked = false;
    }

    /// Commands waiting in the FIFO
    pub fn queued_len(&self) -> usize {
        self.pending.len()
    }

    /// Commands sent but not yet acknowledged
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Bytes sent but not yet acknowledged
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// Current queue shape, for the feeder status event
    pub fn status(&self) -> FeederStatus {
        FeederStatus {
            queued: self.pending.len(),
            in_flight: self.in_flight.len(),
            pending_bytes: self.pending_bytes,
            held: self.held,
        }
    }
}

/// Build the standard status query command
pub fn status_query() -> Command {
    Command::realtime(realtime::STATUS_QUERY)
}
