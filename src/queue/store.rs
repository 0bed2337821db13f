//! Queue state storage

use super::config::QueueConfig;
use super::error::{QueueError, QueueResult};
use super::message::{delivery_order, Message};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Lease held by a received, not yet settled message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightLease {
    pub received_at: DateTime<Utc>,
    pub invisible_until: DateTime<Utc>,
}

/// Runtime state of one queue
#[derive(Debug, Clone)]
pub struct QueueState {
    pub config: QueueConfig,

    /// Live messages in delivery order; in-flight ones included
    pub messages: Vec<Message>,

    /// Message id -> lease
    pub in_flight: HashMap<String, InFlightLease>,
}

impl QueueState {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            messages: Vec::new(),
            in_flight: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.config.max_size
    }

    /// Append and re-establish delivery order
    pub fn enqueue(&mut self, message: Message) {
        self.messages.push(message);
        let fifo = self.config.fifo;
        self.messages.sort_by(|a, b| delivery_order(a, b, fifo));
    }

    pub fn find(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn find_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    pub fn find_by_deduplication_id(&self, dedup_id: &str) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.deduplication_id() == Some(dedup_id))
    }

    /// Remove a message and any lease on it
    pub fn remove(&mut self, message_id: &str) -> Option<Message> {
        self.in_flight.remove(message_id);
        let index = self.messages.iter().position(|m| m.id == message_id)?;
        Some(self.messages.remove(index))
    }

    pub fn is_in_flight(&self, message_id: &str) -> bool {
        self.in_flight.contains_key(message_id)
    }

    pub fn lease(&mut self, message_id: &str, now: DateTime<Utc>) {
        let invisible_until =
            now + ChronoDuration::milliseconds(self.config.visibility_timeout_ms as i64);
        self.in_flight.insert(
            message_id.to_string(),
            InFlightLease {
                received_at: now,
                invisible_until,
            },
        );
    }

    /// Release leases whose visibility timeout elapsed; returns released ids
    pub fn release_expired_leases(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, lease)| lease.invisible_until <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.in_flight.remove(id);
        }

        expired
    }

    /// Drop messages older than the retention period
    pub fn drop_retention_expired(&mut self, now: DateTime<Utc>) -> Vec<Message> {
        let retention = ChronoDuration::milliseconds(self.config.message_retention_period_ms as i64);
        let (expired, kept): (Vec<Message>, Vec<Message>) = std::mem::take(&mut self.messages)
            .into_iter()
            .partition(|m| now - m.created_at >= retention);

        self.messages = kept;
        for message in &expired {
            self.in_flight.remove(&message.id);
        }

        expired
    }

    /// Remove everything, returning how many messages were dropped
    pub fn purge(&mut self) -> usize {
        let count = self.messages.len();
        self.messages.clear();
        self.in_flight.clear();
        count
    }
}

/// Shared handle to one queue's state
pub type SharedQueue = Arc<Mutex<QueueState>>;

/// Shared handle to one dead-letter collection
pub type SharedDeadLetters = Arc<Mutex<Vec<Message>>>;

/// Storage of queue state and dead-letter collections
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Prepare the backend
    async fn init(&self) -> QueueResult<()>;

    /// Release the backend; state is discarded for in-memory stores
    async fn close(&self) -> QueueResult<()>;

    /// Register a queue; fails when the name is taken
    fn insert_queue(&self, state: QueueState) -> QueueResult<SharedQueue>;

    fn get_queue(&self, name: &str) -> Option<SharedQueue>;

    fn remove_queue(&self, name: &str) -> Option<SharedQueue>;

    fn queue_names(&self) -> Vec<String>;

    /// Dead-letter collection, created on first use
    fn dead_letters(&self, name: &str) -> SharedDeadLetters;

    fn get_dead_letters(&self, name: &str) -> Option<SharedDeadLetters>;

    fn remove_dead_letters(&self, name: &str) -> Option<SharedDeadLetters>;
}

/// In-memory queue store
#[derive(Clone, Default)]
pub struct InMemoryQueueStore {
    queues: Arc<DashMap<String, SharedQueue>>,
    dead_letters: Arc<DashMap<String, SharedDeadLetters>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn init(&self) -> QueueResult<()> {
        tracing::debug!("In-memory queue store initialized");
        Ok(())
    }

    async fn close(&self) -> QueueResult<()> {
        self.queues.clear();
        self.dead_letters.clear();
        tracing::debug!("In-memory queue store closed");
        Ok(())
    }

    fn insert_queue(&self, state: QueueState) -> QueueResult<SharedQueue> {
        match self.queues.entry(state.name().to_string()) {
            Entry::Occupied(entry) => Err(QueueError::QueueAlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                let shared = Arc::new(Mutex::new(state));
                entry.insert(shared.clone());
                Ok(shared)
            }
        }
    }

    fn get_queue(&self, name: &str) -> Option<SharedQueue> {
        self.queues.get(name).map(|entry| entry.value().clone())
    }

    fn remove_queue(&self, name: &str) -> Option<SharedQueue> {
        self.queues.remove(name).map(|(_, queue)| queue)
    }

    fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn dead_letters(&self, name: &str) -> SharedDeadLetters {
        self.dead_letters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .value()
            .clone()
    }

    fn get_dead_letters(&self, name: &str) -> Option<SharedDeadLetters> {
        self.dead_letters.get(name).map(|entry| entry.value().clone())
    }

    fn remove_dead_letters(&self, name: &str) -> Option<SharedDeadLetters> {
        self.dead_letters.remove(name).map(|(_, dl)| dl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::message::{Priority, SendOptions};
    use serde_json::json;

    fn message(priority: Priority) -> Message {
        Message::new("t", json!(null), &SendOptions::new().with_priority(priority), 0)
    }

    #[test]
    fn test_enqueue_keeps_priority_order() {
        let mut state = QueueState::new(QueueConfig::new("jobs"));
        let low = message(Priority::Low);
        let critical = message(Priority::Critical);
        let normal = message(Priority::Normal);

        state.enqueue(low.clone());
        state.enqueue(critical.clone());
        state.enqueue(normal.clone());

        let order: Vec<&str> = state.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, vec![critical.id.as_str(), normal.id.as_str(), low.id.as_str()]);
    }

    #[test]
    fn test_lease_release() {
        let mut state = QueueState::new(QueueConfig::new("jobs").with_visibility_timeout_ms(100));
        let msg = message(Priority::Normal);
        let id = msg.id.clone();
        state.enqueue(msg);

        let now = Utc::now();
        state.lease(&id, now);
        assert!(state.is_in_flight(&id));
        assert!(state.release_expired_leases(now).is_empty());

        let released = state.release_expired_leases(now + ChronoDuration::milliseconds(150));
        assert_eq!(released, vec![id.clone()]);
        assert!(!state.is_in_flight(&id));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_remove_clears_lease() {
        let mut state = QueueState::new(QueueConfig::new("jobs"));
        let msg = message(Priority::Normal);
        let id = msg.id.clone();
        state.enqueue(msg);
        state.lease(&id, Utc::now());

        assert!(state.remove(&id).is_some());
        assert!(state.in_flight.is_empty());
        assert!(state.remove(&id).is_none());
    }

    #[test]
    fn test_retention_drop() {
        let mut state = QueueState::new(QueueConfig::new("jobs"));
        state.enqueue(message(Priority::Normal));
        let far_future = Utc::now() + ChronoDuration::days(5);
        assert_eq!(state.drop_retention_expired(far_future).len(), 1);
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_store_rejects_duplicate_queue() {
        let store = InMemoryQueueStore::new();
        store.init().await.unwrap();
        store
            .insert_queue(QueueState::new(QueueConfig::new("jobs")))
            .unwrap();
        let err = store
            .insert_queue(QueueState::new(QueueConfig::new("jobs")))
            .unwrap_err();
        assert!(matches!(err, QueueError::QueueAlreadyExists(_)));
        assert_eq!(store.queue_names(), vec!["jobs".to_string()]);
    }

    #[test]
    fn test_store_close_discards_state() {
        let store = InMemoryQueueStore::new();
        store
            .insert_queue(QueueState::new(QueueConfig::new("jobs")))
            .unwrap();
        store.dead_letters("jobs-dlq").lock().push(message(Priority::Low));

        tokio_test::block_on(store.close()).unwrap();
        assert!(store.get_queue("jobs").is_none());
        assert!(store.get_dead_letters("jobs-dlq").is_none());
    }
}
