//! Byte transport abstraction.
//!
//! The engine consumes an opaque duplex byte channel: ordered, reliable,
//! byte-oriented. Concrete transports (serial/USB today) implement
//! [`Transport`]; tests use [`MockTransport`].

pub mod serial;

use grblkit_core::{ConnectionError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

pub use serial::{list_ports, SerialPortInfo, SerialTransport};

/// Parameters for opening a transport
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Port path (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout in milliseconds (kept short so the IO loop can spin)
    pub timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            timeout_ms: 10,
        }
    }
}

/// An ordered, reliable, byte-oriented duplex channel.
///
/// Methods take `&self`; implementations use interior mutability so a single
/// handle can be shared between the feeder (writes) and the reader task.
pub trait Transport: Send + Sync {
    /// Write raw bytes. Ordering is the only guarantee the engine relies on;
    /// completion timing is fire-and-forget.
    fn write_bytes(&self, data: &[u8]) -> Result<()>;

    /// Read whatever is available into `buf`, returning the number of bytes
    /// read. Returns `Ok(0)` when no data arrived within the read timeout.
    fn read_available(&self, buf: &mut [u8]) -> Result<usize>;

    /// Whether the transport is open
    fn is_open(&self) -> bool;

    /// Close the transport
    fn close(&self) -> Result<()>;

    /// Human-readable description (port path) for events and logs
    fn description(&self) -> String;
}

/// In-memory transport for tests and dry runs.
///
/// Everything written is captured; received data is scripted by pushing
/// lines that the reader task will pick up on its next poll.
#[derive(Default)]
pub struct MockTransport {
    written: Mutex<Vec<u8>>,
    rx: Mutex<VecDeque<u8>>,
    closed: Mutex<bool>,
}

impl MockTransport {
    /// Create an open mock transport
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script a line the engine will "receive" (newline appended)
    pub fn push_line(&self, line: &str) {
        let mut rx = self.rx.lock();
        rx.extend(line.as_bytes());
        rx.push_back(b'\n');
    }

    /// Everything written so far, as raw bytes
    pub fn written_bytes(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    /// Everything written so far, split into newline-terminated commands.
    /// Realtime control bytes appear as single-character entries.
    pub fn written_commands(&self) -> Vec<String> {
        let bytes = self.written.lock();
        let mut commands = Vec::new();
        let mut current = String::new();
        for &b in bytes.iter() {
            match b {
                b'\n' => {
                    commands.push(std::mem::take(&mut current));
                }
                // realtime bytes are unterminated single-byte commands
                b'!' | b'~' | b'?' | 0x18 | 0x85 if current.is_empty() => {
                    commands.push((b as char).to_string());
                }
                _ => current.push(b as char),
            }
        }
        if !current.is_empty() {
            commands.push(current);
        }
        commands
    }

    /// Drop all captured writes
    pub fn clear_written(&self) {
        self.written.lock().clear();
    }

    /// Simulate the device disappearing: subsequent reads and writes fail
    pub fn disconnect(&self) {
        *self.closed.lock() = true;
    }
}

impl Transport for MockTransport {
    fn write_bytes(&self, data: &[u8]) -> Result<()> {
        if *self.closed.lock() {
            return Err(ConnectionError::ConnectionLost {
                reason: "mock transport closed".to_string(),
            }
            .into());
        }
        self.written.lock().extend_from_slice(data);
        Ok(())
    }

    fn read_available(&self, buf: &mut [u8]) -> Result<usize> {
        if *self.closed.lock() {
            return Err(ConnectionError::ConnectionLost {
                reason: "mock transport closed".to_string(),
            }
            .into());
        }
        let mut rx = self.rx.lock();
        let n = buf.len().min(rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = rx.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn is_open(&self) -> bool {
        !*self.closed.lock()
    }

    fn close(&self) -> Result<()> {
        *self.closed.lock() = true;
        Ok(())
    }

    fn description(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_write_capture() {
        let mock = MockTransport::new();
        mock.write_bytes(b"G0 X0\n").unwrap();
        mock.write_bytes(&[b'?']).unwrap();
        mock.write_bytes(b"G1 X1\n").unwrap();

        let commands = mock.written_commands();
        assert_eq!(commands, vec!["G0 X0", "?", "G1 X1"]);
    }

    #[test]
    fn test_mock_scripted_reads() {
        let mock = MockTransport::new();
        mock.push_line("ok");

        let mut buf = [0u8; 16];
        let n = mock.read_available(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ok\n");

        // Nothing left
        assert_eq!(mock.read_available(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        mock.disconnect();
        assert!(!mock.is_open());
        assert!(mock.write_bytes(b"G0\n").is_err());
        let mut buf = [0u8; 4];
        assert!(mock.read_available(&mut buf).is_err());
    }
}
