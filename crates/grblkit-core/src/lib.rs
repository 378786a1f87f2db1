//! # GrblKit Core
//!
//! Core types, errors, and events for GrblKit.
//! Provides the fundamental abstractions shared by the communication layer
//! and its consumers: machine/workflow state, hold reasons, the controller
//! snapshot, the error taxonomy, and the event bus.

pub mod error;
pub mod event_bus;
pub mod types;

pub use error::{
    ConnectionError, ControllerError, Error, FeederError, ProtocolError, Result, SenderError,
};

pub use event_bus::{
    ConnectionEvent, ControllerEvent, CoreEvent, DisconnectReason, EventBus, EventCategory,
    EventFilter, FeederStatus, SenderEvent, SenderStatus, SubscriptionId, WorkflowEvent,
};

pub use types::{
    ConnectionState, ControllerSnapshot, HoldCause, HoldReason, MachineState, OverrideState,
    PinState, Position, WorkflowState,
};
