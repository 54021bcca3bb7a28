//! Event stream for resource lifecycle observability.
//!
//! Emission is fire-and-forget and synchronous; subscribers each own an
//! unbounded `crossbeam-channel` receiver and fall off the bus when they
//! drop it. Subscription lifetimes are independent of any resource
//! instance, so a manager restart never leaves dangling handlers.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use fabrik_model::ResourceId;

use crate::lifecycle::LifecyclePhase;

/// Events emitted during resource lifecycle and persistence operations.
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    /// A resource entered the graph (boot hydration or explicit create).
    Added {
        /// The resource id.
        id: ResourceId,
        /// Its type tag.
        type_tag: String,
    },
    /// `on_initialize` completed.
    Initialized {
        /// The resource id.
        id: ResourceId,
    },
    /// `on_start` completed.
    Started {
        /// The resource id.
        id: ResourceId,
    },
    /// `on_stop` completed.
    Stopped {
        /// The resource id.
        id: ResourceId,
    },
    /// The resource was persisted.
    Saved {
        /// The resource id.
        id: ResourceId,
        /// Partner resources whose reference membership changed.
        affected: Vec<ResourceId>,
    },
    /// The resource left the graph.
    Destroyed {
        /// The resource id.
        id: ResourceId,
        /// Hard delete (`true`) or soft delete (`false`).
        permanent: bool,
    },
    /// A lifecycle hook failed; the resource's siblings keep running.
    LifecycleFailed {
        /// The resource id.
        id: ResourceId,
        /// Which hook failed.
        phase: LifecyclePhase,
        /// Failure description.
        error: String,
    },
}

impl ResourceEvent {
    /// The resource this event concerns.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        match self {
            Self::Added { id, .. }
            | Self::Initialized { id }
            | Self::Started { id }
            | Self::Stopped { id }
            | Self::Saved { id, .. }
            | Self::Destroyed { id, .. }
            | Self::LifecycleFailed { id, .. } => *id,
        }
    }
}

/// Synchronous broadcast bus for [`ResourceEvent`]s.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<ResourceEvent>>>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an event to all current subscribers.
    ///
    /// Non-blocking; disconnected subscribers are pruned on the way.
    pub fn emit(&self, event: ResourceEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }

    /// Subscribe to all events emitted after this call.
    ///
    /// Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ResourceEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: i64) -> ResourceId {
        ResourceId::new(raw).unwrap()
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(ResourceEvent::Initialized { id: id(1) });
    }

    #[test]
    fn all_subscribers_receive() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();

        bus.emit(ResourceEvent::Started { id: id(3) });

        assert!(matches!(
            rx1.try_recv().unwrap(),
            ResourceEvent::Started { .. }
        ));
        assert!(matches!(
            rx2.try_recv().unwrap(),
            ResourceEvent::Started { .. }
        ));
    }

    #[test]
    fn dropped_receiver_is_pruned_on_next_emit() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        assert_eq!(bus.subscriber_count(), 1);
        bus.emit(ResourceEvent::Stopped { id: id(2) });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
