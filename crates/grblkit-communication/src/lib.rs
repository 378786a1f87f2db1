//! # GrblKit Communication
//!
//! Streaming engine for GRBL-family CNC controllers: serial transport,
//! wire protocol, character-counting flow control, job streaming, and the
//! workflow state machine.
//!
//! The layering, bottom to top:
//! - [`transport`] — the raw byte channel (serial hardware or a test mock)
//! - [`protocol`] — frame classification and status report parsing
//! - [`feeder`] — the flow-controlled command queue
//! - [`sender`] — job streaming over the feeder
//! - [`workflow`] — the Idle/Running/Paused/Testing reducer
//! - [`controller`] — the session that ties them together
//!
//! ## Example
//!
//! ```no_run
//! use grblkit_communication::controller::GrblController;
//! use grblkit_communication::sender::Job;
//! use grblkit_communication::transport::ConnectionParams;
//!
//! # fn main() -> grblkit_core::Result<()> {
//! let controller = GrblController::new();
//! let mut receiver = controller.bus().receiver();
//!
//! controller.connect(&ConnectionParams {
//!     port: "/dev/ttyUSB0".to_string(),
//!     ..Default::default()
//! })?;
//!
//! let job = Job::from_text("square.nc", "G90\nG0 X0 Y0\nG1 X10 F500\n")?;
//! controller.load_job(job)?;
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod feeder;
pub mod protocol;
pub mod sender;
pub mod settings;
pub mod transport;
pub mod workflow;

pub use controller::GrblController;
pub use feeder::{Command, CommandKind, Feeder};
pub use protocol::GrblResponse;
pub use sender::{ErrorPolicy, Job, Sender, ToolChangePolicy};
pub use settings::{FirmwareSettings, DEFAULT_RX_BUFFER_SIZE};
pub use transport::{list_ports, ConnectionParams, MockTransport, SerialTransport, Transport};
pub use workflow::{ResumeOutcome, WorkflowController};
