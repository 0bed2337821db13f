//! Broadcast event bus

use super::types::{EventEnvelope, EventStats, OrchestratorEvent};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Default channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Publish/subscribe channel for orchestrator events.
///
/// Backed by a bounded tokio broadcast channel: slow subscribers observe
/// `RecvError::Lagged` instead of blocking publishers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
    stats: Arc<RwLock<EventStats>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            stats: Arc::new(RwLock::new(EventStats::default())),
            capacity,
        }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: OrchestratorEvent) {
        let envelope = EventEnvelope::new(event);
        let name = envelope.name();

        self.stats.write().record_event(name);

        // No receivers is the normal state when nobody listens
        if self.tx.send(envelope).is_err() {
            debug!(event = name, "Event published without subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn stats(&self) -> EventStats {
        self.stats.read().clone()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(OrchestratorEvent::QueueCreated {
            queue: "jobs".to_string(),
        });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.name(), "queue:created");
        assert_eq!(bus.stats().count("queue:created"), 1);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(OrchestratorEvent::QueueDeleted {
            queue: "jobs".to_string(),
        });
        assert_eq!(bus.stats().total_events, 1);
        assert_eq!(bus.capacity(), DEFAULT_EVENT_CAPACITY);
    }
}
