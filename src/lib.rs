//! # GrblKit
//!
//! A streaming engine for GRBL-family CNC controllers. This facade crate
//! re-exports the core data model and the communication engine; see
//! `grblkit-communication` for the engine itself.

pub use grblkit_communication::{
    controller, feeder, protocol, sender, settings, transport, workflow,
};
pub use grblkit_communication::{
    Command, ConnectionParams, ErrorPolicy, GrblController, Job, MockTransport, ResumeOutcome,
    ToolChangePolicy, Transport,
};
pub use grblkit_core::{
    ConnectionEvent, ConnectionState, ControllerEvent, ControllerSnapshot, CoreEvent, Error,
    EventBus, EventFilter, HoldCause, HoldReason, MachineState, Result, SenderEvent,
    WorkflowEvent, WorkflowState,
};

/// Initialize tracing with an env-filter (`RUST_LOG`), defaulting to `info`.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
