//! Typed event distribution for the engine.
//!
//! Components never reach into each other's internals; everything the UI or
//! another component needs to know arrives as a [`CoreEvent`] through an
//! owned [`EventBus`].

mod bus;
mod events;

pub use bus::{EventBus, EventFilter, SubscriptionId};
pub use events::{
    ConnectionEvent, ControllerEvent, CoreEvent, DisconnectReason, EventCategory, FeederStatus,
    SenderEvent, SenderStatus, WorkflowEvent,
};
