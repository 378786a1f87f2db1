//! Serial port transport.
//!
//! Direct hardware connection to CNC controllers via USB or RS-232:
//! - Port enumeration filtered to CNC-plausible device names
//! - Short read timeout so the IO loop can spin without blocking
//! - Interior mutability so one handle serves reader and writer

use super::{ConnectionParams, Transport};
use grblkit_core::{ConnectionError, Result};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::time::Duration;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,
    /// Port description (e.g., "USB Serial Port")
    pub description: String,
    /// Manufacturer name if available
    pub manufacturer: Option<String>,
    /// USB vendor ID if applicable
    pub vid: Option<u16>,
    /// USB product ID if applicable
    pub pid: Option<u16>,
}

/// List available serial ports, filtered to CNC controller patterns:
/// - Windows: COM*
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectionError::IoError {
            reason: format!("Failed to enumerate ports: {}", e),
        }
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_cnc_port(&port.port_name))
        .map(|port| {
            let (description, manufacturer, vid, pid) = match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => (
                    format!(
                        "USB {} {}",
                        usb.manufacturer.as_deref().unwrap_or("Device"),
                        usb.product.as_deref().unwrap_or("Serial Port")
                    ),
                    usb.manufacturer.clone(),
                    Some(usb.vid),
                    Some(usb.pid),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth Serial".to_string(), None, None, None)
                }
                serialport::SerialPortType::PciPort => ("PCI Serial".to_string(), None, None, None),
                _ => ("Serial Port".to_string(), None, None, None),
            };
            SerialPortInfo {
                port_name: port.port_name.clone(),
                description,
                manufacturer,
                vid,
                pid,
            }
        })
        .collect())
}

fn is_cnc_port(port_name: &str) -> bool {
    if port_name.starts_with("COM") && port_name[3..].chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }
    if port_name.starts_with("/dev/cu.usbserial-") || port_name.starts_with("/dev/cu.usbmodem") {
        return true;
    }
    false
}

/// Serial transport backed by the `serialport` crate
pub struct SerialTransport {
    port: Mutex<Option<Box<dyn serialport::SerialPort>>>,
    path: String,
}

impl SerialTransport {
    /// Open a serial port with the given parameters
    pub fn open(params: &ConnectionParams) -> Result<Self> {
        let port = serialport::new(&params.port, params.baud_rate)
            .timeout(Duration::from_millis(params.timeout_ms))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", params.port, e);
                ConnectionError::FailedToOpen {
                    port: params.port.clone(),
                    reason: e.to_string(),
                }
            })?;

        Ok(Self {
            port: Mutex::new(Some(port)),
            path: params.port.clone(),
        })
    }
}

impl Transport for SerialTransport {
    fn write_bytes(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or(ConnectionError::NotConnected)?;
        port.write_all(data).map_err(|e| {
            ConnectionError::ConnectionLost {
                reason: format!("write failed: {}", e),
            }
            .into()
        })
    }

    fn read_available(&self, buf: &mut [u8]) -> Result<usize> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or(ConnectionError::NotConnected)?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            // A timed-out read just means no data arrived this cycle
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(ConnectionError::ConnectionLost {
                reason: format!("read failed: {}", e),
            }
            .into()),
        }
    }

    fn is_open(&self) -> bool {
        self.port.lock().is_some()
    }

    fn close(&self) -> Result<()> {
        // Dropping the port handle closes the device
        self.port.lock().take();
        Ok(())
    }

    fn description(&self) -> String {
        self.path.clone()
    }
}
