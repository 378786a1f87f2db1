//! GRBL controller session.
//!
//! [`GrblController`] is the async front door: it opens the transport,
//! spawns the IO task that frames incoming bytes into lines and drives the
//! periodic status poll, and exposes the command surface by locking the
//! synchronous [`ControllerCore`]. One controller manages at most one
//! session at a time.

mod core;

pub use self::core::{
    ControllerCore, IDENTIFY_TIMEOUT, RX_WATCHDOG_TIMEOUT, STATUS_POLL_INTERVAL,
};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use grblkit_core::{
    ConnectionState, ControllerError, ControllerSnapshot, DisconnectReason, EventBus,
    FeederStatus, HoldReason, Result, SenderStatus, WorkflowState,
};

use crate::sender::{ErrorPolicy, Job, ToolChangePolicy};
use crate::transport::serial::SerialTransport;
use crate::transport::{ConnectionParams, Transport};
use crate::workflow::ResumeOutcome;

/// How often the IO task drains the transport
const READ_INTERVAL: Duration = Duration::from_millis(10);

struct Session {
    core: Arc<Mutex<ControllerCore>>,
    task: JoinHandle<()>,
    shutdown_tx: mpsc::Sender<()>,
}

/// Async controller session manager.
///
/// Owns the event bus for the lifetime of the controller; sessions come
/// and go underneath it, so subscriptions survive reconnects.
pub struct GrblController {
    bus: Arc<EventBus>,
    session: Mutex<Option<Session>>,
}

impl Default for GrblController {
    fn default() -> Self {
        Self::new()
    }
}

impl GrblController {
    /// A controller with a fresh event bus and no session
    pub fn new() -> Self {
        Self {
            bus: Arc::new(EventBus::new()),
            session: Mutex::new(None),
        }
    }

    /// The event bus. Subscribe before connecting to observe the whole
    /// session lifecycle.
    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Open a serial port and start a session
    pub fn connect(&self, params: &ConnectionParams) -> Result<()> {
        let transport = SerialTransport::open(params)?;
        self.connect_with_transport(Arc::new(transport), &params.port)
    }

    /// Start a session over an already-open transport (tests, TCP bridges)
    pub fn connect_with_transport(
        &self,
        transport: Arc<dyn Transport>,
        port: &str,
    ) -> Result<()> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(ControllerError::AlreadyConnected.into());
        }

        let core = Arc::new(Mutex::new(ControllerCore::new(
            transport.clone(),
            port,
            self.bus.clone(),
        )));
        core.lock().begin_identification()?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(io_loop(transport, core.clone(), shutdown_rx));

        *session = Some(Session {
            core,
            task,
            shutdown_tx,
        });
        Ok(())
    }

    /// Close the session and wait for the IO task to finish
    pub async fn disconnect(&self) -> Result<()> {
        let session = self.session.lock().take();
        let Some(session) = session else {
            return Err(ControllerError::NotConnected.into());
        };

        // A send failure means the task already exited on its own
        let _ = session.shutdown_tx.send(()).await;
        if tokio::time::timeout(Duration::from_secs(1), session.task)
            .await
            .is_err()
        {
            tracing::warn!("IO task did not stop in time");
        }
        Ok(())
    }

    /// Whether a session exists and has completed identification
    pub fn is_connected(&self) -> bool {
        self.with_core(|core| Ok(core.connection_state() == ConnectionState::Ready))
            .unwrap_or(false)
    }

    // ---- command surface ---------------------------------------------------

    /// Queue a g-code or `$` system command line
    pub fn send_command(&self, text: &str) -> Result<()> {
        self.with_core(|core| core.send_command(text))
    }

    /// Feed hold: stop motion now, pause the workflow
    pub fn feed_hold(&self) -> Result<()> {
        self.with_core(|core| core.feed_hold())
    }

    /// Acknowledge a tool-change or door hold
    pub fn acknowledge_hold(&self) -> Result<bool> {
        self.with_core(|core| Ok(core.acknowledge_hold()))
    }

    /// Request a resume; see [`ResumeOutcome`] for the gating rules
    pub fn resume(&self) -> Result<ResumeOutcome> {
        self.with_core(|core| core.resume())
    }

    /// Soft reset (Ctrl-X)
    pub fn soft_reset(&self) -> Result<()> {
        self.with_core(|core| core.soft_reset())
    }

    /// `$X` — clear the alarm lockout
    pub fn unlock(&self) -> Result<()> {
        self.with_core(|core| core.unlock())
    }

    /// `$H` — run the homing cycle
    pub fn home(&self) -> Result<()> {
        self.with_core(|core| core.home())
    }

    /// `$J=` jog motion
    pub fn jog(&self, motion: &str) -> Result<()> {
        self.with_core(|core| core.jog(motion))
    }

    /// Cancel an in-progress jog
    pub fn jog_cancel(&self) -> Result<()> {
        self.with_core(|core| core.jog_cancel())
    }

    /// `$C` — toggle check mode
    pub fn toggle_check_mode(&self) -> Result<()> {
        self.with_core(|core| core.toggle_check_mode())
    }

    // ---- job surface -------------------------------------------------------

    /// Load a job for streaming
    pub fn load_job(&self, job: Job) -> Result<()> {
        self.with_core(|core| core.load_job(job))
    }

    /// Start streaming the loaded job
    pub fn start_job(&self) -> Result<()> {
        self.with_core(|core| core.start_job())
    }

    /// Dry-run the loaded job in check mode
    pub fn start_job_test(&self) -> Result<()> {
        self.with_core(|core| core.start_job_test())
    }

    /// Stop the active job (the job stays loaded)
    pub fn stop_job(&self) -> Result<()> {
        self.with_core(|core| core.stop_job())
    }

    /// Unload the job
    pub fn unload_job(&self) -> Result<()> {
        self.with_core(|core| core.unload_job())
    }

    /// Set the error policy for subsequent jobs
    pub fn set_error_policy(&self, policy: ErrorPolicy) -> Result<()> {
        self.with_core(|core| {
            core.sender_mut().error_policy = policy;
            Ok(())
        })
    }

    /// Set the tool-change policy for subsequent jobs
    pub fn set_tool_change_policy(&self, policy: ToolChangePolicy) -> Result<()> {
        self.with_core(|core| {
            core.sender_mut().tool_change_policy = policy;
            Ok(())
        })
    }

    // ---- observers ---------------------------------------------------------

    /// Latest parsed status snapshot
    pub fn snapshot(&self) -> Result<ControllerSnapshot> {
        self.with_core(|core| Ok(core.snapshot()))
    }

    /// Connection lifecycle state (Disconnected when no session exists)
    pub fn connection_state(&self) -> ConnectionState {
        self.with_core(|core| Ok(core.connection_state()))
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Workflow state
    pub fn workflow_state(&self) -> Result<WorkflowState> {
        self.with_core(|core| Ok(core.workflow_state()))
    }

    /// Why the workflow is paused, if it is
    pub fn hold_reason(&self) -> Result<Option<HoldReason>> {
        self.with_core(|core| Ok(core.hold_reason()))
    }

    /// Firmware banner observed this session
    pub fn firmware_version(&self) -> Result<Option<String>> {
        self.with_core(|core| Ok(core.firmware_version()))
    }

    /// Job streaming progress
    pub fn sender_status(&self) -> Result<Option<SenderStatus>> {
        self.with_core(|core| Ok(core.sender_status()))
    }

    /// Feeder queue shape
    pub fn feeder_status(&self) -> Result<FeederStatus> {
        self.with_core(|core| Ok(core.feeder_status()))
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut ControllerCore) -> Result<R>) -> Result<R> {
        let session = self.session.lock();
        match session.as_ref() {
            Some(session) => f(&mut session.core.lock()),
            None => Err(ControllerError::NotConnected.into()),
        }
    }
}

/// The session IO task: drains the transport into lines, delivers them to
/// the core, and drives the periodic tick. Exits on shutdown, transport
/// failure, identification timeout, or watchdog expiry.
async fn io_loop(
    transport: Arc<dyn Transport>,
    core: Arc<Mutex<ControllerCore>>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut read_buf = [0u8; 512];
    let mut line_buf: Vec<u8> = Vec::with_capacity(256);
    let mut poll = tokio::time::interval(STATUS_POLL_INTERVAL);
    let mut read_tick = tokio::time::interval(READ_INTERVAL);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    read_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                core.lock().on_transport_closed(DisconnectReason::UserRequested);
                break;
            }
            _ = poll.tick() => {
                if core.lock().tick().is_err() {
                    break;
                }
            }
            _ = read_tick.tick() => {
                match transport.read_available(&mut read_buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        if deliver_lines(&core, &mut line_buf, &read_buf[..n]).is_err() {
                            core.lock()
                                .on_transport_closed(DisconnectReason::ConnectionLost);
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("transport read failed: {}", e);
                        core.lock().on_transport_closed(DisconnectReason::ConnectionLost);
                        break;
                    }
                }
            }
        }
    }
    tracing::debug!("IO task stopped");
}

/// Frame incoming bytes into `\n`-terminated lines and hand each to the
/// core. Carriage returns are tolerated anywhere.
fn deliver_lines(
    core: &Arc<Mutex<ControllerCore>>,
    line_buf: &mut Vec<u8>,
    bytes: &[u8],
) -> Result<()> {
    for &byte in bytes {
        match byte {
            b'\n' => {
                let line = String::from_utf8_lossy(line_buf).to_string();
                line_buf.clear();
                core.lock().on_line(&line)?;
            }
            b'\r' => {}
            _ => line_buf.push(byte),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[tokio::test]
    async fn test_connect_rejects_double_session() {
        let controller = GrblController::new();
        let mock = MockTransport::new();
        controller
            .connect_with_transport(mock.clone(), "/dev/ttyUSB0")
            .unwrap();
        assert!(controller
            .connect_with_transport(MockTransport::new(), "/dev/ttyUSB1")
            .is_err());
        controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_session_identifies_from_handshake() {
        let controller = GrblController::new();
        let mock = MockTransport::new();
        controller
            .connect_with_transport(mock.clone(), "/dev/ttyUSB0")
            .unwrap();
        assert!(!controller.is_connected());

        mock.push_line("Grbl 1.1h ['$' for help]");
        mock.push_line("$10=1");
        mock.push_line("ok");
        mock.push_line("ok");

        // Give the IO task a few read intervals
        for _ in 0..20 {
            if controller.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(controller.is_connected());
        assert_eq!(
            controller.firmware_version().unwrap(),
            Some("Grbl 1.1h".to_string())
        );
        controller.disconnect().await.unwrap();
        assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_without_session() {
        let controller = GrblController::new();
        assert!(controller.disconnect().await.is_err());
    }
}
