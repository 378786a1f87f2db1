//! Event bus implementation.
//!
//! An owned bus, created by the controller session and handed to consumers
//! by reference. There is deliberately no global instance: every bus has an
//! owner, which keeps notification ordering independent of registration
//! order across unrelated components.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{CoreEvent, EventCategory};

/// Subscription handle for unsubscribing from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Filter to receive only specific event types
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    /// Receive all events.
    #[default]
    All,
    /// Receive events matching any of these categories.
    Categories(Vec<EventCategory>),
}

impl EventFilter {
    /// Check if an event matches this filter
    pub fn matches(&self, event: &CoreEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Categories(categories) => categories.contains(&event.category()),
        }
    }
}

/// Type alias for event handler functions
type EventHandler = Box<dyn Fn(CoreEvent) + Send + Sync>;

/// Event bus for engine-wide event distribution
pub struct EventBus {
    /// Broadcast channel sender
    sender: broadcast::Sender<CoreEvent>,
    /// Registered synchronous handlers
    handlers: Arc<RwLock<HashMap<SubscriptionId, (EventFilter, EventHandler)>>>,
}

impl EventBus {
    /// Create a new event bus with the default channel capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with a specific broadcast capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish an event to all subscribers
    ///
    /// Synchronous handlers run on the publishing thread; async receivers
    /// get the event through the broadcast channel. Publishing with no
    /// subscribers is not an error.
    pub fn publish(&self, event: CoreEvent) {
        tracing::trace!("event: {}", event.description());

        let handlers = self.handlers.read();
        for (_, (filter, handler)) in handlers.iter() {
            if filter.matches(&event) {
                handler(event.clone());
            }
        }
        drop(handlers);

        // send fails only when no async receivers exist
        let _ = self.sender.send(event);
    }

    /// Subscribe with a synchronous handler
    ///
    /// The handler is called on the publishing thread and should return
    /// quickly to avoid blocking event dispatch.
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(CoreEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.handlers.write().insert(id, (filter, Box::new(handler)));
        tracing::debug!("Subscription {} added", id);
        id
    }

    /// Get a broadcast receiver for async event consumption
    pub fn receiver(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Unsubscribe a synchronous handler
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.handlers.write().remove(&id).is_some();
        if removed {
            tracing::debug!("Subscription {} removed", id);
        }
        removed
    }

    /// Number of registered synchronous handlers
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::events::{ConnectionEvent, FeederStatus, WorkflowEvent};
    use crate::types::WorkflowState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn opened() -> CoreEvent {
        CoreEvent::Connection(ConnectionEvent::Opened {
            port: "/dev/ttyUSB0".to_string(),
            firmware: Some("Grbl 1.1h".to_string()),
        })
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new();

        let id = bus.subscribe(EventFilter::All, |_| {});
        assert_eq!(bus.subscriber_count(), 1);

        assert!(bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), 0);

        // Double unsubscribe should return false
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn test_event_delivery() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let _id = bus.subscribe(EventFilter::All, move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(opened());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_filtering() {
        let bus = EventBus::new();
        let connection_count = Arc::new(AtomicUsize::new(0));
        let workflow_count = Arc::new(AtomicUsize::new(0));

        let cc = connection_count.clone();
        bus.subscribe(
            EventFilter::Categories(vec![EventCategory::Connection]),
            move |_| {
                cc.fetch_add(1, Ordering::SeqCst);
            },
        );

        let wc = workflow_count.clone();
        bus.subscribe(
            EventFilter::Categories(vec![EventCategory::Workflow]),
            move |_| {
                wc.fetch_add(1, Ordering::SeqCst);
            },
        );

        bus.publish(opened());
        bus.publish(CoreEvent::Workflow(WorkflowEvent::StateChanged {
            state: WorkflowState::Running,
            hold_reason: None,
        }));

        assert_eq!(connection_count.load(Ordering::SeqCst), 1);
        assert_eq!(workflow_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        // Must not panic or error
        bus.publish(CoreEvent::Feeder(FeederStatus {
            queued: 0,
            in_flight: 0,
            pending_bytes: 0,
            held: false,
        }));
    }

    #[tokio::test]
    async fn test_async_receiver() {
        let bus = EventBus::new();
        let mut receiver = bus.receiver();

        bus.publish(opened());

        let received = receiver.try_recv();
        assert!(received.is_ok());

        if let Ok(CoreEvent::Connection(ConnectionEvent::Opened { port, .. })) = received {
            assert_eq!(port, "/dev/ttyUSB0");
        } else {
            panic!("Wrong event received");
        }
    }
}
