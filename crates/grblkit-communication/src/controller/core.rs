//! Synchronous controller state machine.
//!
//! [`ControllerCore`] owns the feeder, sender, workflow reducer, settings,
//! and the latest snapshot, and is the single writer for all of them. The
//! async session (in the parent module) locks the core to deliver firmware
//! frames and timer ticks; the public API methods lock it to issue
//! commands. Everything observable leaves through the event bus.

use std::sync::Arc;
use std::time::{Duration, Instant};

use grblkit_core::{
    ConnectionError, ConnectionState, ControllerError, ControllerEvent, ControllerSnapshot,
    CoreEvent, DisconnectReason, EventBus, FeederStatus, HoldCause, HoldReason, MachineState,
    Position, Result, SenderError, SenderEvent, WorkflowState,
};

use crate::feeder::{Command, Feeder};
use crate::protocol::{alarm_description, error_description, parse_line, realtime, GrblResponse};
use crate::protocol::status::StatusReport;
use crate::sender::{is_program_pause, AckOutcome, Job, Sender};
use crate::settings::FirmwareSettings;
use crate::transport::Transport;
use crate::workflow::{ResumeOutcome, WorkflowController};

/// How long identification may take before the session is declared dead
pub const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(5);
/// Status poll interval once identifying or ready
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Silence on an established session longer than this means the link died
pub const RX_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(5);

/// The controller state machine. Single-threaded by construction; callers
/// serialize access through a mutex.
pub struct ControllerCore {
    transport: Arc<dyn Transport>,
    port: String,
    bus: Arc<EventBus>,
    connection_state: ConnectionState,
    feeder: Feeder,
    sender: Sender,
    workflow: WorkflowController,
    settings: FirmwareSettings,
    snapshot: ControllerSnapshot,
    sticky_wco: Option<Position>,
    firmware_version: Option<String>,
    last_alarm: Option<u8>,
    last_feeder_status: Option<FeederStatus>,
    identify_started: Option<Instant>,
    ident_report_seen: bool,
    ident_settings_seen: bool,
    last_rx: Option<Instant>,
}

impl ControllerCore {
    /// A core over an open transport, ready to begin identification
    pub fn new(transport: Arc<dyn Transport>, port: impl Into<String>, bus: Arc<EventBus>) -> Self {
        let feeder = Feeder::new(transport.clone());
        Self {
            transport,
            port: port.into(),
            bus,
            connection_state: ConnectionState::Connecting,
            feeder,
            sender: Sender::new(),
            workflow: WorkflowController::new(),
            settings: FirmwareSettings::default(),
            snapshot: ControllerSnapshot::default(),
            sticky_wco: None,
            firmware_version: None,
            last_alarm: None,
            last_feeder_status: None,
            identify_started: None,
            ident_report_seen: false,
            ident_settings_seen: false,
            last_rx: None,
        }
    }

    // ---- session lifecycle -------------------------------------------------

    /// Begin identification: probe with a status query and request the
    /// settings dump and build info. The session is promoted to Ready only
    /// once a status report (or welcome banner) and a settings line have
    /// both been observed; arbitrary chatter from a non-GRBL device never
    /// qualifies.
    pub fn begin_identification(&mut self) -> Result<()> {
        self.set_connection_state(ConnectionState::Identifying);
        self.identify_started = Some(Instant::now());
        self.transport.write_bytes(&[realtime::STATUS_QUERY])?;
        // Through the feeder so the trailing oks are accounted for
        self.feeder.enqueue(Command::normal("$$"))?;
        self.feeder.enqueue(Command::normal("$I"))?;
        self.pump()
    }

    /// Periodic tick from the session task: status polling, identification
    /// timeout, and the receive watchdog.
    pub fn tick(&mut self) -> Result<()> {
        match self.connection_state {
            ConnectionState::Identifying => {
                self.transport.write_bytes(&[realtime::STATUS_QUERY])?;
                let expired = self
                    .identify_started
                    .map(|t| t.elapsed() > IDENTIFY_TIMEOUT)
                    .unwrap_or(false);
                if expired {
                    tracing::error!(port = %self.port, "firmware not detected");
                    self.set_connection_state(ConnectionState::Error);
                    if let Err(e) = self.transport.close() {
                        tracing::debug!("transport close: {}", e);
                    }
                    self.publish(CoreEvent::Connection(
                        grblkit_core::ConnectionEvent::Closed {
                            port: self.port.clone(),
                            reason: DisconnectReason::Timeout,
                        },
                    ));
                    return Err(ControllerError::FirmwareNotDetected {
                        timeout_ms: IDENTIFY_TIMEOUT.as_millis() as u64,
                    }
                    .into());
                }
            }
            ConnectionState::Ready => {
                self.transport.write_bytes(&[realtime::STATUS_QUERY])?;
                let silent = self
                    .last_rx
                    .map(|t| t.elapsed() > RX_WATCHDOG_TIMEOUT)
                    .unwrap_or(false);
                if silent {
                    tracing::error!(port = %self.port, "receive watchdog expired");
                    self.on_transport_closed(DisconnectReason::Timeout);
                    return Err(ConnectionError::ConnectionLost {
                        reason: "no frames received".to_string(),
                    }
                    .into());
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The transport is gone (deliberately or not). Tears the session down
    /// to Disconnected and abandons any active job.
    pub fn on_transport_closed(&mut self, reason: DisconnectReason) {
        if let Some(event) = self.sender.stop() {
            self.publish(CoreEvent::Sender(event));
        }
        self.feeder.reset();
        if let Some(event) = self.workflow.force_idle() {
            self.publish(CoreEvent::Workflow(event));
        }
        if let Err(e) = self.transport.close() {
            tracing::debug!("transport close: {}", e);
        }
        self.set_connection_state(ConnectionState::Disconnected);
        self.publish(CoreEvent::Connection(grblkit_core::ConnectionEvent::Closed {
            port: self.port.clone(),
            reason,
        }));
    }

    // ---- frame dispatch ----------------------------------------------------

    /// Handle one newline-terminated frame from the firmware
    pub fn on_line(&mut self, line: &str) -> Result<()> {
        self.last_rx = Some(Instant::now());
        let Some(response) = parse_line(line) else {
            return Ok(());
        };

        match response {
            GrblResponse::Ok => self.handle_ack()?,
            GrblResponse::Error(code) => self.handle_error(code)?,
            GrblResponse::Alarm(code) => self.handle_alarm(code),
            GrblResponse::Status(report) => {
                self.ident_report_seen = true;
                self.handle_status(report);
            }
            GrblResponse::Setting { number, value } => {
                self.ident_settings_seen = true;
                self.settings.apply(number, &value);
            }
            GrblResponse::Welcome { version } => {
                self.ident_report_seen = true;
                self.handle_welcome(&version);
            }
            GrblResponse::Feedback(msg) => {
                if let Some(rx) = self.settings.apply_build_info(&msg) {
                    tracing::info!(rx, "firmware receive buffer");
                    self.feeder.set_budget(rx);
                }
                self.publish(CoreEvent::Controller(ControllerEvent::Message(msg)));
            }
            // Unrecognized chatter: reported, never a state change
            GrblResponse::Message(msg) => {
                self.publish(CoreEvent::Controller(ControllerEvent::Message(msg)));
            }
        }

        if self.connection_state == ConnectionState::Identifying
            && self.ident_report_seen
            && self.ident_settings_seen
        {
            self.promote_ready();
        }
        Ok(())
    }

    fn handle_ack(&mut self) -> Result<()> {
        if let Some(record) = self.feeder.on_ack() {
            if let Some(line) = record.line {
                let outcome = self.sender.on_ack(line);
                self.route_sender_outcome(outcome);
                if is_program_pause(&record.text) {
                    if let Some(event) = self
                        .workflow
                        .pause(HoldReason::new(HoldCause::ProgramPause))
                    {
                        self.feeder.hold();
                        self.publish(CoreEvent::Workflow(event));
                    }
                }
            }
        }
        self.pump()
    }

    fn handle_error(&mut self, code: u8) -> Result<()> {
        let record = self.feeder.on_error();
        let description = error_description(code).to_string();
        tracing::warn!(code, %description, command = ?record.as_ref().map(|r| &r.text), "command rejected");

        self.publish(CoreEvent::Controller(ControllerEvent::CommandError {
            code,
            description,
            command: record.as_ref().map(|r| r.text.clone()),
            line: record.as_ref().and_then(|r| r.line),
        }));

        if let Some(line) = record.and_then(|r| r.line) {
            let outcome = self.sender.on_error(line);
            if let AckOutcome::Failed { .. } = &outcome {
                // Fail-fast: nothing queued behind the rejection may run
                self.feeder.clear_pending();
            }
            self.route_sender_outcome(outcome);
        }
        self.pump()
    }

    fn handle_alarm(&mut self, code: u8) {
        let description = alarm_description(code).to_string();
        tracing::error!(code, %description, "alarm");

        self.last_alarm = Some(code);
        self.snapshot.active_state = MachineState::Alarm;
        self.snapshot.alarm_code = Some(code);

        // Normal sends stay locked out until $X, reset, or homing
        self.feeder.clear_pending();
        self.feeder.block();

        if let Some(event) = self.sender.stop() {
            self.publish(CoreEvent::Sender(event));
        }
        if let Some(event) = self.workflow.force_idle() {
            self.publish(CoreEvent::Workflow(event));
        }
        self.publish(CoreEvent::Controller(ControllerEvent::Alarm {
            code,
            description,
        }));
        self.publish_feeder_status();
    }

    fn handle_status(&mut self, report: StatusReport) {
        let mut snapshot = report.resolve(&mut self.sticky_wco);
        if snapshot.active_state == MachineState::Alarm {
            snapshot.alarm_code = self.last_alarm;
        }

        // A held machine pauses the workflow even when the hold originated
        // at the machine (physical button, door switch)
        if snapshot.active_state.is_held() {
            let cause = match snapshot.active_state {
                MachineState::Door(_) => HoldCause::Door,
                _ => HoldCause::FeedHold,
            };
            if let Some(event) = self.workflow.pause(HoldReason::new(cause)) {
                self.feeder.hold();
                self.publish(CoreEvent::Workflow(event));
            }
        }

        self.snapshot = snapshot.clone();
        self.publish(CoreEvent::Controller(ControllerEvent::Status(snapshot)));
    }

    fn handle_welcome(&mut self, version: &str) {
        let banner = format!("Grbl {}", version);
        let was_ready = self.connection_state == ConnectionState::Ready;
        self.firmware_version = Some(banner.clone());

        if was_ready {
            // The firmware restarted under us; its buffer is empty and any
            // stream position is meaningless
            tracing::warn!("firmware reset mid-session");
            if let Some(event) = self.sender.stop() {
                self.publish(CoreEvent::Sender(event));
            }
            self.feeder.reset();
            self.last_alarm = None;
            self.sticky_wco = None;
            self.snapshot = ControllerSnapshot::default();
            if let Some(event) = self.workflow.force_idle() {
                self.publish(CoreEvent::Workflow(event));
            }
            self.publish_feeder_status();
        }

        self.publish(CoreEvent::Controller(ControllerEvent::Message(banner)));
    }

    fn promote_ready(&mut self) {
        self.set_connection_state(ConnectionState::Ready);
        self.publish(CoreEvent::Connection(grblkit_core::ConnectionEvent::Opened {
            port: self.port.clone(),
            firmware: self.firmware_version.clone(),
        }));
    }

    // ---- command surface ---------------------------------------------------

    /// Queue a g-code or `$` system command line
    pub fn send_command(&mut self, text: impl Into<String>) -> Result<()> {
        self.require_ready()?;
        if self.feeder.is_blocked() {
            return Err(ControllerError::Locked.into());
        }
        self.feeder.enqueue(Command::normal(text))?;
        self.pump()
    }

    /// Issue a feed hold: stop motion now, pause the workflow
    pub fn feed_hold(&mut self) -> Result<()> {
        self.require_ready()?;
        self.transport.write_bytes(&[realtime::FEED_HOLD])?;
        if let Some(event) = self.workflow.pause(HoldReason::new(HoldCause::FeedHold)) {
            self.feeder.hold();
            self.publish(CoreEvent::Workflow(event));
        }
        Ok(())
    }

    /// Acknowledge an acknowledgment-gated hold (tool seated, door closed)
    pub fn acknowledge_hold(&mut self) -> bool {
        self.workflow.acknowledge_hold()
    }

    /// Request a resume. Refused (without side effects) while an
    /// unacknowledged tool-change or door hold is active.
    pub fn resume(&mut self) -> Result<ResumeOutcome> {
        self.require_ready()?;
        let outcome = self.workflow.try_resume();
        if let ResumeOutcome::Resumed(event) = &outcome {
            self.transport.write_bytes(&[realtime::CYCLE_START])?;
            self.feeder.resume();
            self.sender.tool_change_acknowledged();
            self.publish(CoreEvent::Workflow(event.clone()));
            self.pump()?;
        }
        Ok(outcome)
    }

    /// Soft reset (Ctrl-X): immediate firmware restart, all queues dropped
    pub fn soft_reset(&mut self) -> Result<()> {
        self.transport.write_bytes(&[realtime::SOFT_RESET])?;
        if let Some(event) = self.sender.stop() {
            self.publish(CoreEvent::Sender(event));
        }
        self.feeder.reset();
        self.last_alarm = None;
        self.snapshot = ControllerSnapshot::default();
        if let Some(event) = self.workflow.force_idle() {
            self.publish(CoreEvent::Workflow(event));
        }
        self.publish_feeder_status();
        Ok(())
    }

    /// `$X` — clear the alarm lockout without homing
    pub fn unlock(&mut self) -> Result<()> {
        self.require_ready()?;
        self.feeder.unblock();
        self.last_alarm = None;
        self.feeder.enqueue(Command::normal("$X"))?;
        self.pump()
    }

    /// `$H` — run the homing cycle
    pub fn home(&mut self) -> Result<()> {
        self.require_ready()?;
        self.feeder.unblock();
        self.last_alarm = None;
        self.feeder.enqueue(Command::normal("$H"))?;
        self.pump()
    }

    /// `$J=` jog motion. `motion` is the jog body, e.g. `G91 X10 F1000`;
    /// the `$J=` prefix is added if missing.
    pub fn jog(&mut self, motion: &str) -> Result<()> {
        self.require_ready()?;
        if self.feeder.is_blocked() {
            return Err(ControllerError::Locked.into());
        }
        let line = if motion.starts_with("$J=") {
            motion.to_string()
        } else {
            format!("$J={}", motion)
        };
        self.feeder.enqueue(Command::normal(line))?;
        self.pump()
    }

    /// Cancel an in-progress jog without touching the queue semantics of
    /// a running job
    pub fn jog_cancel(&mut self) -> Result<()> {
        self.require_ready()?;
        self.transport.write_bytes(&[realtime::JOG_CANCEL])
    }

    /// `$C` — toggle check mode (g-code verified without motion)
    pub fn toggle_check_mode(&mut self) -> Result<()> {
        self.require_ready()?;
        self.feeder.enqueue(Command::normal("$C"))?;
        self.pump()
    }

    // ---- job surface -------------------------------------------------------

    /// Load a job for streaming. Every line must fit the identified
    /// receive buffer, which may be tighter than the stock default.
    pub fn load_job(&mut self, job: Job) -> Result<()> {
        job.validate(self.feeder.budget())?;
        let event = self.sender.load(job)?;
        self.publish(CoreEvent::Sender(event));
        Ok(())
    }

    /// Start streaming the loaded job
    pub fn start_job(&mut self) -> Result<()> {
        self.require_ready()?;
        if !self.workflow.is_idle() {
            return Err(SenderError::NotIdle {
                state: self.workflow.state().to_string(),
            }
            .into());
        }
        if self.feeder.is_blocked() {
            return Err(ControllerError::Locked.into());
        }
        self.sender.start()?;
        if let Some(event) = self.workflow.start_running() {
            self.publish(CoreEvent::Workflow(event));
        }
        self.pump()
    }

    /// Dry-run the loaded job in check mode. The firmware parses every
    /// line without motion; check mode is toggled off again on completion.
    pub fn start_job_test(&mut self) -> Result<()> {
        self.require_ready()?;
        if !self.workflow.is_idle() {
            return Err(SenderError::NotIdle {
                state: self.workflow.state().to_string(),
            }
            .into());
        }
        self.feeder.enqueue(Command::normal("$C"))?;
        self.sender.start()?;
        if let Some(event) = self.workflow.start_testing() {
            self.publish(CoreEvent::Workflow(event));
        }
        self.pump()
    }

    /// Stop the active job: reset the firmware, drop all queues, land Idle.
    /// The job stays loaded for a restart from line zero.
    pub fn stop_job(&mut self) -> Result<()> {
        if let Some(event) = self.sender.stop() {
            self.publish(CoreEvent::Sender(event));
        }
        self.transport.write_bytes(&[realtime::SOFT_RESET])?;
        self.feeder.reset();
        if let Some(event) = self.workflow.force_idle() {
            self.publish(CoreEvent::Workflow(event));
        }
        self.publish_feeder_status();
        Ok(())
    }

    /// Unload the job entirely
    pub fn unload_job(&mut self) -> Result<()> {
        if self.sender.is_active() {
            self.stop_job()?;
        }
        if let Some(event) = self.sender.unload() {
            self.publish(CoreEvent::Sender(event));
        }
        Ok(())
    }

    // ---- shared plumbing ---------------------------------------------------

    /// Advance the sender and feeder, raising a tool-change hold when the
    /// sender parks on an M6 line.
    ///
    /// A job line the feeder refuses (the budget shrank after load) fails
    /// the job, never the session.
    fn pump(&mut self) -> Result<()> {
        match self.sender.pump(&mut self.feeder) {
            Ok(true) => {
                if let Some(event) = self
                    .workflow
                    .pause(HoldReason::new(HoldCause::ToolChange))
                {
                    self.feeder.hold();
                    self.publish(CoreEvent::Workflow(event));
                }
            }
            Ok(false) => {}
            Err(err) => {
                tracing::error!("job line refused: {}", err);
                self.feeder.clear_pending();
                if let Some((job_id, line)) = self.sender.fail_current() {
                    self.publish(CoreEvent::Sender(SenderEvent::Errored { job_id, line }));
                }
                if let Some(event) = self.workflow.force_idle() {
                    self.publish(CoreEvent::Workflow(event));
                }
            }
        }
        self.feeder.pump()?;
        self.publish_feeder_status();
        Ok(())
    }

    fn route_sender_outcome(&mut self, outcome: AckOutcome) {
        match outcome {
            AckOutcome::Progress(status) => {
                self.publish(CoreEvent::Sender(SenderEvent::Status(status)));
            }
            AckOutcome::Completed {
                job_id,
                elapsed_secs,
            } => {
                self.publish(CoreEvent::Sender(SenderEvent::Completed {
                    job_id,
                    elapsed_secs,
                }));
                if self.workflow.state() == WorkflowState::Testing {
                    // Leave check mode behind us
                    if let Err(e) = self.feeder.enqueue(Command::normal("$C")) {
                        tracing::warn!("check mode toggle: {}", e);
                    }
                }
                if let Some(event) = self.workflow.force_idle() {
                    self.publish(CoreEvent::Workflow(event));
                }
            }
            AckOutcome::Failed { job_id, line } => {
                self.publish(CoreEvent::Sender(SenderEvent::Errored { job_id, line }));
                if let Some(event) = self.workflow.force_idle() {
                    self.publish(CoreEvent::Workflow(event));
                }
            }
            AckOutcome::NotOurs => {}
        }
    }

    fn publish_feeder_status(&mut self) {
        let status = self.feeder.status();
        if self.last_feeder_status != Some(status) {
            self.last_feeder_status = Some(status);
            self.publish(CoreEvent::Feeder(status));
        }
    }

    fn set_connection_state(&mut self, new: ConnectionState) {
        if self.connection_state == new {
            return;
        }
        let old = self.connection_state;
        self.connection_state = new;
        tracing::info!(%old, %new, "connection state");
        self.publish(CoreEvent::Controller(ControllerEvent::StateChanged {
            old,
            new,
        }));
    }

    fn require_ready(&self) -> Result<()> {
        if self.connection_state != ConnectionState::Ready {
            return Err(ControllerError::NotConnected.into());
        }
        Ok(())
    }

    fn publish(&self, event: CoreEvent) {
        self.bus.publish(event);
    }

    // ---- accessors ---------------------------------------------------------

    /// Latest parsed status snapshot
    pub fn snapshot(&self) -> ControllerSnapshot {
        self.snapshot.clone()
    }

    /// Connection lifecycle state
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    /// Workflow state
    pub fn workflow_state(&self) -> WorkflowState {
        self.workflow.state()
    }

    /// Why the workflow is paused, if it is
    pub fn hold_reason(&self) -> Option<HoldReason> {
        self.workflow.hold_reason().cloned()
    }

    /// Firmware banner observed this session
    pub fn firmware_version(&self) -> Option<String> {
        self.firmware_version.clone()
    }

    /// Settings captured from the `$$` dump
    pub fn settings(&self) -> &FirmwareSettings {
        &self.settings
    }

    /// Job streaming progress, if a job is loaded
    pub fn sender_status(&self) -> Option<grblkit_core::SenderStatus> {
        self.sender.status()
    }

    /// Current feeder queue shape
    pub fn feeder_status(&self) -> FeederStatus {
        self.feeder.status()
    }

    /// Mutable sender access for policy configuration
    pub fn sender_mut(&mut self) -> &mut Sender {
        &mut self.sender
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::ErrorPolicy;
    use crate::transport::MockTransport;

    fn ready_core() -> (ControllerCore, Arc<MockTransport>) {
        let mock = MockTransport::new();
        let bus = Arc::new(EventBus::new());
        let mut core = ControllerCore::new(mock.clone(), "/dev/ttyUSB0", bus);
        core.begin_identification().unwrap();
        core.on_line("Grbl 1.1h ['$' for help]").unwrap();
        core.on_line("$10=1").unwrap();
        core.on_line("ok").unwrap(); // settings dump acknowledged
        core.on_line("ok").unwrap(); // build info acknowledged
        mock.clear_written();
        (core, mock)
    }

    #[test]
    fn test_identification_needs_report_and_settings() {
        let mock = MockTransport::new();
        let bus = Arc::new(EventBus::new());
        let mut core = ControllerCore::new(mock.clone(), "/dev/ttyUSB0", bus);
        core.begin_identification().unwrap();
        assert_eq!(core.connection_state(), ConnectionState::Identifying);

        // Neither half alone qualifies
        core.on_line("Grbl 1.1h ['$' for help]").unwrap();
        assert_eq!(core.connection_state(), ConnectionState::Identifying);
        core.on_line("<Idle|MPos:0.000,0.000,0.000>").unwrap();
        assert_eq!(core.connection_state(), ConnectionState::Identifying);

        core.on_line("$10=1").unwrap();
        assert_eq!(core.connection_state(), ConnectionState::Ready);
        assert_eq!(core.firmware_version(), Some("Grbl 1.1h".to_string()));
    }

    #[test]
    fn test_identification_ignores_chatter() {
        let mock = MockTransport::new();
        let bus = Arc::new(EventBus::new());
        let mut core = ControllerCore::new(mock, "/dev/ttyUSB0", bus);
        core.begin_identification().unwrap();

        // A modem answering on the wrong port must never look like GRBL
        core.on_line("AT+CWMODE=1").unwrap();
        core.on_line("ok").unwrap();
        core.on_line("ready.").unwrap();
        assert_eq!(core.connection_state(), ConnectionState::Identifying);

        core.on_line("<Idle|MPos:0.000,0.000,0.000>").unwrap();
        core.on_line("$0=10").unwrap();
        assert_eq!(core.connection_state(), ConnectionState::Ready);
    }

    #[test]
    fn test_commands_rejected_before_ready() {
        let mock = MockTransport::new();
        let bus = Arc::new(EventBus::new());
        let mut core = ControllerCore::new(mock, "/dev/ttyUSB0", bus);
        assert!(core.send_command("G0 X1").is_err());
    }

    #[test]
    fn test_manual_command_round_trip() {
        let (mut core, mock) = ready_core();
        core.send_command("G0 X10").unwrap();
        assert_eq!(mock.written_commands(), vec!["G0 X10"]);
        assert_eq!(core.feeder_status().in_flight, 1);

        core.on_line("ok").unwrap();
        assert_eq!(core.feeder_status().in_flight, 0);
    }

    #[test]
    fn test_settings_dump_captured() {
        let (mut core, _mock) = ready_core();
        core.on_line("$22=1").unwrap();
        core.on_line("$110=2000.000").unwrap();
        assert!(core.settings().homing_enabled);
        assert!(core.settings().dump_seen());
    }

    #[test]
    fn test_alarm_locks_out_sends() {
        let (mut core, _mock) = ready_core();
        core.on_line("ALARM:1").unwrap();

        let err = core.send_command("G0 X1").unwrap_err();
        assert!(matches!(
            err,
            grblkit_core::Error::Controller(ControllerError::Locked)
        ));
        assert_eq!(core.snapshot().alarm_code, Some(1));

        core.unlock().unwrap();
        assert!(core.send_command("G0 X1").is_ok());
    }

    #[test]
    fn test_alarm_aborts_job() {
        let (mut core, _mock) = ready_core();
        core.load_job(Job::from_text("t", "G0 X1\nG0 X2\nG0 X3").unwrap())
            .unwrap();
        core.start_job().unwrap();
        assert_eq!(core.workflow_state(), WorkflowState::Running);

        core.on_line("ok").unwrap();
        core.on_line("ALARM:1").unwrap();

        assert_eq!(core.workflow_state(), WorkflowState::Idle);
        assert_eq!(core.feeder_status().queued, 0);
        assert!(core.sender_status().is_some()); // job stays loaded
    }

    #[test]
    fn test_job_completes() {
        let (mut core, mock) = ready_core();
        core.load_job(Job::from_text("t", "G0 X1\nG0 X2").unwrap())
            .unwrap();
        core.start_job().unwrap();
        assert_eq!(mock.written_commands(), vec!["G0 X1", "G0 X2"]);

        core.on_line("ok").unwrap();
        core.on_line("ok").unwrap();
        assert_eq!(core.workflow_state(), WorkflowState::Idle);
        assert!(!core.sender_mut().is_active());
    }

    #[test]
    fn test_error_fail_fast_aborts() {
        let (mut core, _mock) = ready_core();
        core.sender_mut().error_policy = ErrorPolicy::FailFast;
        core.load_job(Job::from_text("t", "G0 X1\nG91.5\nG0 X2").unwrap())
            .unwrap();
        core.start_job().unwrap();

        core.on_line("ok").unwrap();
        core.on_line("error:33").unwrap();
        assert_eq!(core.workflow_state(), WorkflowState::Idle);
        assert_eq!(core.feeder_status().queued, 0);
    }

    #[test]
    fn test_program_pause_holds_workflow() {
        let (mut core, _mock) = ready_core();
        core.load_job(Job::from_text("t", "G0 X1\nM0\nG0 X2").unwrap())
            .unwrap();
        core.start_job().unwrap();

        core.on_line("ok").unwrap(); // G0 X1
        core.on_line("ok").unwrap(); // M0 acked; firmware holds
        assert_eq!(core.workflow_state(), WorkflowState::Paused);
        assert_eq!(core.hold_reason().unwrap().cause, HoldCause::ProgramPause);

        // M0 needs no acknowledgment, cycle start resumes
        assert!(matches!(core.resume().unwrap(), ResumeOutcome::Resumed(_)));
        assert_eq!(core.workflow_state(), WorkflowState::Running);
    }

    #[test]
    fn test_door_hold_requires_acknowledgment() {
        let (mut core, _mock) = ready_core();
        core.load_job(Job::from_text("t", "G0 X1\nG0 X2").unwrap())
            .unwrap();
        core.start_job().unwrap();

        core.on_line("<Door:1|MPos:0.000,0.000,0.000>").unwrap();
        assert_eq!(core.workflow_state(), WorkflowState::Paused);
        assert_eq!(core.hold_reason().unwrap().cause, HoldCause::Door);

        assert!(matches!(
            core.resume().unwrap(),
            ResumeOutcome::NeedsAcknowledgement(_)
        ));
        assert!(core.acknowledge_hold());
        assert!(matches!(core.resume().unwrap(), ResumeOutcome::Resumed(_)));
    }

    #[test]
    fn test_welcome_mid_session_resets_everything() {
        let (mut core, _mock) = ready_core();
        core.load_job(Job::from_text("t", "G0 X1\nG0 X2").unwrap())
            .unwrap();
        core.start_job().unwrap();

        core.on_line("Grbl 1.1h ['$' for help]").unwrap();
        assert_eq!(core.workflow_state(), WorkflowState::Idle);
        assert_eq!(core.feeder_status().in_flight, 0);
        assert_eq!(core.connection_state(), ConnectionState::Ready);
    }

    #[test]
    fn test_jog_prefixes_command() {
        let (mut core, mock) = ready_core();
        core.jog("G91 X10 F1000").unwrap();
        assert_eq!(mock.written_commands(), vec!["$J=G91 X10 F1000"]);
    }

    #[test]
    fn test_oversized_job_line_rejected_at_load() {
        let (mut core, _mock) = ready_core();
        let job = Job {
            id: uuid::Uuid::new_v4(),
            name: "t".to_string(),
            lines: vec!["G0 X1".to_string(), "X".repeat(200)],
        };
        assert!(core.load_job(job).is_err());
        // Nothing started: no job, workflow untouched
        assert!(core.sender_status().is_none());
        assert_eq!(core.workflow_state(), WorkflowState::Idle);
    }

    #[test]
    fn test_build_info_tightens_budget() {
        let (mut core, _mock) = ready_core();
        core.on_line("[OPT:V,15,64]").unwrap();
        assert_eq!(core.settings().rx_buffer_size, 64);

        // A command the tighter buffer cannot carry is refused up front
        let long = format!("G1 X0 ({})", "c".repeat(90));
        assert!(core.send_command(long).is_err());
        assert!(core.send_command("G0 X1").is_ok());
    }

    #[test]
    fn test_shrunken_budget_fails_job_not_session() {
        let (mut core, _mock) = ready_core();
        let mut lines: Vec<String> = (0..9).map(|i| format!("G0 X{}", i)).collect();
        lines.push("G1 X123.456 Y123.456 Z-12.345".to_string());
        core.load_job(Job::from_text("t", &lines.join("\n")).unwrap())
            .unwrap();
        core.start_job().unwrap();

        // The firmware turns out to have a 20-byte buffer; the long line
        // beyond the lookahead window can no longer be enqueued
        core.on_line("[OPT:V,15,20]").unwrap();
        core.on_line("ok").unwrap();

        assert!(!core.sender_mut().is_active());
        assert_eq!(core.workflow_state(), WorkflowState::Idle);
        // The session itself is unharmed
        assert_eq!(core.connection_state(), ConnectionState::Ready);
    }
}
