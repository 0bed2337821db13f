//! Queue manager: queue registry, message lifecycle and consumer loops

use super::backoff::BackoffPolicy;
use super::config::{ConsumerConfig, QueueConfig, QueueManagerConfig, RetryPolicy};
use super::error::{QueueError, QueueResult};
use super::handler::MessageHandler;
use super::message::{
    Message, ReceiveOptions, SendOptions, DEDUPLICATION_ID_HEADER, MAX_DELAY_SECONDS,
    REASON_PROCESSING_FAILED, REASON_TTL_EXPIRED,
};
use super::metrics::QUEUE_METRICS;
use super::stats::{QueueStats, Throughput};
use super::store::{InMemoryQueueStore, QueueState, QueueStore, SharedQueue};
use crate::events::{EventBus, OrchestratorEvent};
use crate::monitoring::{labels, MetricQuery, MetricType, MonitoringContext, MonitoringSystem};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Longest visibility timeout accepted by `change_message_visibility` (12h)
const MAX_VISIBILITY_TIMEOUT_MS: u64 = 43_200_000;

/// Running consumer loop
struct ConsumerHandle {
    config: ConsumerConfig,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// How a rejection is retried
#[derive(Debug, Clone)]
struct RejectPolicy {
    backoff: BackoffPolicy,
    /// Tighter dead-letter threshold than the queue's, if any
    max_attempts: Option<u32>,
}

enum RejectOutcome {
    Retry { retry_count: u32, delay_ms: u64 },
    DeadLetter { message: Message, dead_letter_queue: Option<String> },
}

/// In-memory queue manager.
///
/// Messages move `visible -> in flight -> acknowledged | rejected`; rejected
/// messages come back after a jittered backoff or are dead-lettered once they
/// reach the queue's `max_receive_count`. Every transition records a metric in
/// the [`MonitoringSystem`] and publishes an [`OrchestratorEvent`].
pub struct QueueManager {
    config: QueueManagerConfig,
    store: Arc<dyn QueueStore>,
    monitoring: Arc<MonitoringSystem>,
    events: EventBus,
    handlers: DashMap<String, Arc<dyn MessageHandler>>,
    consumers: DashMap<String, ConsumerHandle>,
}

impl QueueManager {
    pub fn new(config: QueueManagerConfig, monitoring: Arc<MonitoringSystem>, events: EventBus) -> Self {
        Self::with_store(config, Arc::new(InMemoryQueueStore::new()), monitoring, events)
    }

    pub fn with_store(
        config: QueueManagerConfig,
        store: Arc<dyn QueueStore>,
        monitoring: Arc<MonitoringSystem>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            store,
            monitoring,
            events,
            handlers: DashMap::new(),
            consumers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &QueueManagerConfig {
        &self.config
    }

    pub fn monitoring(&self) -> &Arc<MonitoringSystem> {
        &self.monitoring
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Initialize the store and create the queues declared in configuration
    pub async fn init(&self) -> QueueResult<()> {
        self.store.init().await?;
        for queue in self.config.queues.clone() {
            self.create_queue(queue)?;
        }
        Ok(())
    }

    /// Stop every consumer and close the store
    pub async fn shutdown(&self) -> QueueResult<()> {
        for queue_name in self.active_consumers() {
            self.stop_consuming(&queue_name).await?;
        }
        self.store.close().await?;
        info!("Queue manager stopped");
        Ok(())
    }

    fn queue(&self, name: &str) -> QueueResult<SharedQueue> {
        self.store
            .get_queue(name)
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    // ========================================================================
    // Queue registry
    // ========================================================================

    pub fn create_queue(&self, config: QueueConfig) -> QueueResult<QueueConfig> {
        let config = config.validated()?;
        self.store.insert_queue(QueueState::new(config.clone()))?;

        if let Some(ref dlq) = config.dead_letter_queue {
            self.store.dead_letters(dlq);
        }

        QUEUE_METRICS
            .queue_depth
            .with_label_values(&[&config.name])
            .set(0.0);

        info!(
            queue_name = %config.name,
            max_size = config.max_size,
            dead_letter_queue = ?config.dead_letter_queue,
            "Queue created"
        );
        self.events.publish(OrchestratorEvent::QueueCreated {
            queue: config.name.clone(),
        });
        Ok(config)
    }

    /// Stop the queue's consumer, then discard its messages and the
    /// dead-letter store it references unless another queue still uses it
    pub async fn delete_queue(&self, name: &str) -> QueueResult<()> {
        self.queue(name)?;
        self.stop_consuming(name).await?;

        let queue = self
            .store
            .remove_queue(name)
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))?;
        let dead_letter_queue = queue.lock().config.dead_letter_queue.clone();

        if let Some(dlq) = dead_letter_queue {
            let still_referenced = self.store.queue_names().iter().any(|other| {
                self.store
                    .get_queue(other)
                    .map(|q| q.lock().config.dead_letter_queue.as_deref() == Some(dlq.as_str()))
                    .unwrap_or(false)
            });
            if !still_referenced {
                self.store.remove_dead_letters(&dlq);
            }
        }

        let _ = QUEUE_METRICS.queue_depth.remove_label_values(&[name]);
        info!(queue_name = %name, "Queue deleted");
        self.events.publish(OrchestratorEvent::QueueDeleted {
            queue: name.to_string(),
        });
        Ok(())
    }

    /// Registered queue configurations sorted by name
    pub fn list_queues(&self) -> Vec<QueueConfig> {
        self.store
            .queue_names()
            .iter()
            .filter_map(|name| self.store.get_queue(name))
            .map(|queue| queue.lock().config.clone())
            .collect()
    }

    pub fn get_queue_config(&self, name: &str) -> QueueResult<QueueConfig> {
        Ok(self.queue(name)?.lock().config.clone())
    }

    /// Drop every message of a queue, returning how many were removed
    pub fn purge_queue(&self, name: &str) -> QueueResult<usize> {
        let count = self.queue(name)?.lock().purge();

        QUEUE_METRICS.queue_depth.with_label_values(&[name]).set(0.0);
        info!(queue_name = %name, count = count, "Queue purged");
        self.events.publish(OrchestratorEvent::QueuePurged {
            queue: name.to_string(),
            count,
        });
        Ok(count)
    }

    // ========================================================================
    // Message lifecycle
    // ========================================================================

    pub fn send_message(
        &self,
        queue_name: &str,
        message_type: &str,
        payload: serde_json::Value,
        options: SendOptions,
    ) -> QueueResult<String> {
        let queue = self.queue(queue_name)?;

        if let Some(delay_seconds) = options.delay_seconds {
            if delay_seconds > MAX_DELAY_SECONDS {
                return Err(QueueError::Validation(format!(
                    "delay_seconds {} exceeds maximum of {}",
                    delay_seconds, MAX_DELAY_SECONDS
                )));
            }
        }

        let (message_id, priority, depth) = {
            let mut state = queue.lock();

            if state.is_full() {
                warn!(queue_name = %queue_name, max_size = state.config.max_size, "Queue is full");
                return Err(QueueError::QueueFull {
                    queue: queue_name.to_string(),
                    max_size: state.config.max_size,
                });
            }

            if state.config.content_based_deduplication {
                if let Some(dedup_id) = options.headers.get(DEDUPLICATION_ID_HEADER) {
                    if let Some(existing) = state.find_by_deduplication_id(dedup_id) {
                        debug!(
                            queue_name = %queue_name,
                            message_id = %existing.id,
                            deduplication_id = %dedup_id,
                            "Duplicate send ignored"
                        );
                        return Ok(existing.id.clone());
                    }
                }
            }

            let message = Message::new(message_type, payload, &options, state.config.delay_seconds);
            let sent = (message.id.clone(), message.priority());
            state.enqueue(message);
            (sent.0, sent.1, state.len())
        };

        let priority_label = priority.to_string();
        self.monitoring.record_metric(
            "messages_sent",
            MetricType::Counter,
            1.0,
            labels([
                ("queue", queue_name),
                ("type", message_type),
                ("priority", priority_label.as_str()),
            ]),
            Some(&MonitoringContext::from(&options.context)),
        );
        QUEUE_METRICS
            .messages_sent
            .with_label_values(&[queue_name, priority_label.as_str()])
            .inc();
        QUEUE_METRICS
            .queue_depth
            .with_label_values(&[queue_name])
            .set(depth as f64);

        debug!(
            queue_name = %queue_name,
            message_id = %message_id,
            message_type = %message_type,
            priority = %priority,
            "Message sent"
        );
        self.events.publish(OrchestratorEvent::MessageSent {
            queue: queue_name.to_string(),
            message_id: message_id.clone(),
            message_type: message_type.to_string(),
            priority,
        });
        Ok(message_id)
    }

    /// Receive up to `max_messages`, long polling for `wait_time` when the
    /// queue has nothing deliverable
    pub async fn receive_messages(
        &self,
        queue_name: &str,
        options: ReceiveOptions,
    ) -> QueueResult<Vec<Message>> {
        let deadline = Instant::now() + options.wait_time;

        let batch = loop {
            let batch = self.receive_once(queue_name, options.max_messages)?;
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                break batch;
            }
            let remaining = deadline - now;
            tokio::time::sleep(remaining.min(self.config.long_poll_interval())).await;
        };

        if !batch.is_empty() {
            self.monitoring.record_metric(
                "messages_received",
                MetricType::Counter,
                batch.len() as f64,
                labels([("queue", queue_name)]),
                None,
            );
            QUEUE_METRICS
                .messages_received
                .with_label_values(&[queue_name])
                .inc_by(batch.len() as f64);

            debug!(queue_name = %queue_name, count = batch.len(), "Messages received");
            self.events.publish(OrchestratorEvent::MessagesReceived {
                queue: queue_name.to_string(),
                message_ids: batch.iter().map(|m| m.id.clone()).collect(),
            });
        }

        Ok(batch)
    }

    /// One sweep-and-scan pass over the queue
    fn receive_once(&self, queue_name: &str, max_messages: usize) -> QueueResult<Vec<Message>> {
        let queue = self.queue(queue_name)?;
        let now = Utc::now();

        let (batch, released, retention_dropped, ttl_expired, dead_letter_queue, depth) = {
            let mut state = queue.lock();
            let released = state.release_expired_leases(now);
            let retention_dropped = state.drop_retention_expired(now);

            let mut batch = Vec::new();
            let mut expired_ids = Vec::new();
            for message in state.messages.iter() {
                if batch.len() >= max_messages {
                    break;
                }
                if state.is_in_flight(&message.id) || message.is_delayed(now) {
                    continue;
                }
                if message.is_expired(now) {
                    expired_ids.push(message.id.clone());
                    continue;
                }
                batch.push(message.clone());
            }

            let ttl_expired: Vec<Message> = expired_ids
                .iter()
                .filter_map(|id| state.remove(id))
                .collect();
            for message in &batch {
                state.lease(&message.id, now);
            }

            (
                batch,
                released,
                retention_dropped,
                ttl_expired,
                state.config.dead_letter_queue.clone(),
                state.len(),
            )
        };

        for message_id in released {
            debug!(queue_name = %queue_name, message_id = %message_id, "Visibility timeout expired");
            self.monitoring.increment_counter(
                "messages_visibility_expired",
                1.0,
                labels([("queue", queue_name)]),
            );
            QUEUE_METRICS
                .visibility_expired
                .with_label_values(&[queue_name])
                .inc();
            self.events.publish(OrchestratorEvent::MessageVisibilityExpired {
                queue: queue_name.to_string(),
                message_id,
            });
        }

        if !retention_dropped.is_empty() {
            warn!(
                queue_name = %queue_name,
                count = retention_dropped.len(),
                "Messages dropped after retention period"
            );
            self.monitoring.increment_counter(
                "messages_expired_retention",
                retention_dropped.len() as f64,
                labels([("queue", queue_name)]),
            );
        }

        for message in ttl_expired {
            self.dead_letter(queue_name, dead_letter_queue.as_deref(), message, REASON_TTL_EXPIRED);
        }

        QUEUE_METRICS
            .queue_depth
            .with_label_values(&[queue_name])
            .set(depth as f64);

        Ok(batch)
    }

    /// Settle a message successfully
    pub fn acknowledge_message(&self, queue_name: &str, message_id: &str) -> QueueResult<()> {
        let queue = self.queue(queue_name)?;
        let depth = {
            let mut state = queue.lock();
            state
                .remove(message_id)
                .ok_or_else(|| QueueError::message_not_found(queue_name, message_id))?;
            state.len()
        };

        self.monitoring.increment_counter(
            "messages_acknowledged",
            1.0,
            labels([("queue", queue_name)]),
        );
        QUEUE_METRICS
            .messages_acknowledged
            .with_label_values(&[queue_name])
            .inc();
        QUEUE_METRICS
            .queue_depth
            .with_label_values(&[queue_name])
            .set(depth as f64);

        debug!(queue_name = %queue_name, message_id = %message_id, "Message acknowledged");
        self.events.publish(OrchestratorEvent::MessageAcknowledged {
            queue: queue_name.to_string(),
            message_id: message_id.to_string(),
        });
        Ok(())
    }

    /// Settle a message as failed: retry after backoff, or dead-letter once
    /// the queue's `max_receive_count` is reached
    pub fn reject_message(&self, queue_name: &str, message_id: &str, reason: &str) -> QueueResult<()> {
        let policy = RejectPolicy {
            backoff: self.config.backoff.clone(),
            max_attempts: None,
        };
        self.reject_with_policy(queue_name, message_id, reason, &policy)
    }

    fn reject_with_policy(
        &self,
        queue_name: &str,
        message_id: &str,
        reason: &str,
        policy: &RejectPolicy,
    ) -> QueueResult<()> {
        let queue = self.queue(queue_name)?;
        let now = Utc::now();

        let outcome = {
            let mut state = queue.lock();
            state.in_flight.remove(message_id);

            let max_attempts = policy
                .max_attempts
                .map(|attempts| attempts.min(state.config.max_receive_count))
                .unwrap_or(state.config.max_receive_count);

            let retry_count = {
                let message = state
                    .find_mut(message_id)
                    .ok_or_else(|| QueueError::message_not_found(queue_name, message_id))?;
                message.metadata.retry_count += 1;
                message.metadata.retry_count
            };

            if retry_count >= max_attempts {
                let message = state
                    .remove(message_id)
                    .ok_or_else(|| QueueError::message_not_found(queue_name, message_id))?;
                RejectOutcome::DeadLetter {
                    message,
                    dead_letter_queue: state.config.dead_letter_queue.clone(),
                }
            } else {
                let delay = policy.backoff.delay(retry_count);
                let delay_ms = delay.as_millis() as u64;
                if let Some(message) = state.find_mut(message_id) {
                    message.scheduled_at = Some(now + ChronoDuration::milliseconds(delay_ms as i64));
                }
                RejectOutcome::Retry {
                    retry_count,
                    delay_ms,
                }
            }
        };

        self.monitoring.increment_counter(
            "messages_rejected",
            1.0,
            labels([("queue", queue_name), ("reason", reason)]),
        );
        QUEUE_METRICS
            .messages_rejected
            .with_label_values(&[queue_name])
            .inc();

        let (retry_count, dead_lettered) = match outcome {
            RejectOutcome::Retry {
                retry_count,
                delay_ms,
            } => {
                info!(
                    queue_name = %queue_name,
                    message_id = %message_id,
                    reason = %reason,
                    retry_count = retry_count,
                    delay_ms = delay_ms,
                    "Message rejected, scheduled for retry"
                );
                (retry_count, false)
            }
            RejectOutcome::DeadLetter {
                message,
                dead_letter_queue,
            } => {
                let retry_count = message.metadata.retry_count;
                self.dead_letter(queue_name, dead_letter_queue.as_deref(), message, reason);
                (retry_count, true)
            }
        };

        self.events.publish(OrchestratorEvent::MessageRejected {
            queue: queue_name.to_string(),
            message_id: message_id.to_string(),
            reason: reason.to_string(),
            retry_count,
            dead_lettered,
        });
        Ok(())
    }

    /// Annotate and move a message into the queue's dead-letter store
    fn dead_letter(
        &self,
        queue_name: &str,
        dead_letter_queue: Option<&str>,
        mut message: Message,
        reason: &str,
    ) {
        message.mark_dead_lettered(reason, queue_name);
        let message_id = message.id.clone();

        match dead_letter_queue {
            Some(dlq) => {
                self.store.dead_letters(dlq).lock().push(message);
                warn!(
                    queue_name = %queue_name,
                    message_id = %message_id,
                    dead_letter_queue = %dlq,
                    reason = %reason,
                    "Message moved to dead letter queue"
                );
            }
            None => {
                warn!(
                    queue_name = %queue_name,
                    message_id = %message_id,
                    reason = %reason,
                    "Message dropped, queue has no dead letter queue"
                );
            }
        }

        self.monitoring.increment_counter(
            "messages_dead_lettered",
            1.0,
            labels([("queue", queue_name), ("reason", reason)]),
        );
        QUEUE_METRICS
            .messages_dead_lettered
            .with_label_values(&[queue_name, reason])
            .inc();

        self.events.publish(OrchestratorEvent::MessageDeadLettered {
            queue: queue_name.to_string(),
            message_id,
            dead_letter_queue: dead_letter_queue.map(str::to_string),
            reason: reason.to_string(),
        });
    }

    /// Move a received message's visibility deadline to `now + timeout_ms`
    pub fn change_message_visibility(
        &self,
        queue_name: &str,
        message_id: &str,
        timeout_ms: u64,
    ) -> QueueResult<()> {
        if timeout_ms > MAX_VISIBILITY_TIMEOUT_MS {
            return Err(QueueError::Validation(format!(
                "visibility timeout {}ms exceeds maximum {}ms",
                timeout_ms, MAX_VISIBILITY_TIMEOUT_MS
            )));
        }

        let queue = self.queue(queue_name)?;
        let mut state = queue.lock();
        let lease = state
            .in_flight
            .get_mut(message_id)
            .ok_or_else(|| QueueError::message_not_found(queue_name, message_id))?;
        lease.invisible_until = Utc::now() + ChronoDuration::milliseconds(timeout_ms as i64);

        debug!(
            queue_name = %queue_name,
            message_id = %message_id,
            timeout_ms = timeout_ms,
            "Message visibility changed"
        );
        Ok(())
    }

    // ========================================================================
    // Dead letters
    // ========================================================================

    /// Contents of a dead-letter store, oldest first
    pub fn get_dead_letter_messages(&self, dead_letter_queue: &str) -> QueueResult<Vec<Message>> {
        self.store
            .get_dead_letters(dead_letter_queue)
            .map(|dl| dl.lock().clone())
            .ok_or_else(|| QueueError::QueueNotFound(dead_letter_queue.to_string()))
    }

    /// Move up to `limit` dead letters back into `target_queue`, oldest
    /// first, bounded by the target's free capacity
    pub fn redrive_dead_letters(
        &self,
        dead_letter_queue: &str,
        target_queue: &str,
        limit: Option<usize>,
    ) -> QueueResult<usize> {
        let dead_letters = self
            .store
            .get_dead_letters(dead_letter_queue)
            .ok_or_else(|| QueueError::QueueNotFound(dead_letter_queue.to_string()))?;
        let queue = self.queue(target_queue)?;

        let (moved, depth) = {
            let mut dead = dead_letters.lock();
            let mut state = queue.lock();

            let capacity = state.config.max_size.saturating_sub(state.len());
            let count = dead.len().min(capacity).min(limit.unwrap_or(usize::MAX));

            for mut message in dead.drain(..count) {
                message.reset_for_redrive();
                state.enqueue(message);
            }
            (count, state.len())
        };

        QUEUE_METRICS
            .queue_depth
            .with_label_values(&[target_queue])
            .set(depth as f64);

        info!(
            dead_letter_queue = %dead_letter_queue,
            target_queue = %target_queue,
            count = moved,
            "Dead letters redriven"
        );
        self.events.publish(OrchestratorEvent::MessagesRedriven {
            dead_letter_queue: dead_letter_queue.to_string(),
            target_queue: target_queue.to_string(),
            count: moved,
        });
        Ok(moved)
    }

    // ========================================================================
    // Handlers and consumers
    // ========================================================================

    /// Register the handler for a key; a later registration replaces it
    pub fn register_handler(&self, key: &str, handler: impl MessageHandler + 'static) {
        self.register_shared_handler(key, Arc::new(handler));
    }

    pub fn register_shared_handler(&self, key: &str, handler: Arc<dyn MessageHandler>) {
        if self.handlers.insert(key.to_string(), handler).is_some() {
            info!(handler = %key, "Message handler replaced");
        } else {
            info!(handler = %key, "Message handler registered");
        }
    }

    pub fn unregister_handler(&self, key: &str) -> bool {
        self.handlers.remove(key).is_some()
    }

    /// Spawn the polling loop for `config.queue_name`
    pub fn start_consuming(self: &Arc<Self>, config: ConsumerConfig) -> QueueResult<()> {
        let config = config.validated()?;
        self.queue(&config.queue_name)?;

        match self.consumers.entry(config.queue_name.clone()) {
            Entry::Occupied(entry) => Err(QueueError::ConsumerAlreadyRunning(entry.key().clone())),
            Entry::Vacant(entry) => {
                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                let task = tokio::spawn(self.clone().run_consumer(config.clone(), shutdown_rx));

                info!(
                    queue_name = %config.queue_name,
                    handler = %config.handler_key(),
                    batch_size = config.batch_size,
                    max_concurrency = config.max_concurrency,
                    "Consumer started"
                );
                self.events.publish(OrchestratorEvent::ConsumerStarted {
                    queue: config.queue_name.clone(),
                    handler: config.handler_key().to_string(),
                });
                QUEUE_METRICS.active_consumers.inc();

                entry.insert(ConsumerHandle {
                    config,
                    shutdown_tx,
                    task,
                });
                Ok(())
            }
        }
    }

    /// Stop a queue's consumer after its current poll; no-op when none runs
    pub async fn stop_consuming(&self, queue_name: &str) -> QueueResult<()> {
        let Some((_, handle)) = self.consumers.remove(queue_name) else {
            self.queue(queue_name)?;
            debug!(queue_name = %queue_name, "No consumer running");
            return Ok(());
        };

        let _ = handle.shutdown_tx.send(true);
        if let Err(e) = handle.task.await {
            error!(queue_name = %queue_name, error = %e, "Consumer task ended abnormally");
        }

        QUEUE_METRICS.active_consumers.dec();
        info!(queue_name = %queue_name, "Consumer stopped");
        self.events.publish(OrchestratorEvent::ConsumerStopped {
            queue: queue_name.to_string(),
        });
        Ok(())
    }

    /// Queues with a running consumer, sorted
    pub fn active_consumers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.consumers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn consumer_config(&self, queue_name: &str) -> Option<ConsumerConfig> {
        self.consumers
            .get(queue_name)
            .map(|handle| handle.config.clone())
    }

    async fn run_consumer(self: Arc<Self>, config: ConsumerConfig, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let policy = Arc::new(self.consumer_reject_policy(&config.retry_policy));
        let config = Arc::new(config);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Leases of an abandoned batch lapse through the visibility sweep
                    tokio::select! {
                        _ = self.poll_once(&config, &policy) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!(queue_name = %config.queue_name, "Consumer loop exited");
    }

    fn consumer_reject_policy(&self, retry_policy: &RetryPolicy) -> RejectPolicy {
        RejectPolicy {
            backoff: self
                .config
                .backoff
                .with_overrides(retry_policy.backoff_multiplier, retry_policy.max_backoff_ms),
            max_attempts: Some(retry_policy.max_retries.saturating_add(1)),
        }
    }

    /// One consumer tick: receive a batch and run the handler over it,
    /// at most `max_concurrency` messages at a time
    async fn poll_once(self: &Arc<Self>, config: &Arc<ConsumerConfig>, policy: &Arc<RejectPolicy>) {
        let queue_name = config.queue_name.as_str();

        let handler = match self.handlers.get(config.handler_key()) {
            Some(entry) => entry.value().clone(),
            None => {
                warn!(
                    queue_name = %queue_name,
                    handler = %config.handler_key(),
                    "No handler registered, skipping poll"
                );
                return;
            }
        };

        let options = ReceiveOptions::new(config.batch_size)
            .with_wait_time(std::time::Duration::from_secs(config.wait_time_seconds));
        let batch = match self.receive_messages(queue_name, options).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(queue_name = %queue_name, error = %e, "Consumer receive failed");
                return;
            }
        };

        let _: Vec<()> = futures::stream::iter(batch)
            .map(|message| {
                let manager = Arc::clone(self);
                let handler = Arc::clone(&handler);
                let config = Arc::clone(config);
                let policy = Arc::clone(policy);

                async move {
                    manager
                        .process_message(&config, &policy, handler, message)
                        .await
                }
            })
            .buffer_unordered(config.max_concurrency)
            .collect()
            .await;
    }

    async fn process_message(
        &self,
        config: &ConsumerConfig,
        policy: &RejectPolicy,
        handler: Arc<dyn MessageHandler>,
        message: Message,
    ) {
        let queue_name = config.queue_name.as_str();
        let message_id = message.id.clone();
        let context = message.context();
        let started = Instant::now();

        let result = match AssertUnwindSafe(handler.handle(message, context))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("message handler panicked")),
        };

        let elapsed = started.elapsed();
        let outcome = if result.is_ok() { "success" } else { "failure" };
        QUEUE_METRICS
            .handler_duration
            .with_label_values(&[queue_name, outcome])
            .observe(elapsed.as_secs_f64());
        self.monitoring.record_histogram(
            "message_processing_duration_ms",
            elapsed.as_secs_f64() * 1000.0,
            labels([("queue", queue_name), ("outcome", outcome)]),
        );

        match result {
            Ok(()) => {
                if config.auto_ack {
                    if let Err(e) = self.acknowledge_message(queue_name, &message_id) {
                        warn!(
                            queue_name = %queue_name,
                            message_id = %message_id,
                            error = %e,
                            "Auto-acknowledge failed"
                        );
                    }
                }
            }
            Err(e) => {
                error!(
                    queue_name = %queue_name,
                    message_id = %message_id,
                    error = %e,
                    "Message handler failed"
                );
                if let Err(e) =
                    self.reject_with_policy(queue_name, &message_id, REASON_PROCESSING_FAILED, policy)
                {
                    warn!(
                        queue_name = %queue_name,
                        message_id = %message_id,
                        error = %e,
                        "Reject after handler failure failed"
                    );
                }
            }
        }
    }

    // ========================================================================
    // Stats
    // ========================================================================

    pub fn get_queue_stats(&self, queue_name: &str) -> QueueResult<QueueStats> {
        let queue = self.queue(queue_name)?;
        let now = Utc::now();

        let (mut stats, dead_letter_queue) = {
            let state = queue.lock();
            (
                QueueStats::from_state(&state, now),
                state.config.dead_letter_queue.clone(),
            )
        };

        stats.dead_letter_count = dead_letter_queue
            .and_then(|dlq| self.store.get_dead_letters(&dlq))
            .map(|dl| dl.lock().len())
            .unwrap_or(0);

        let window = self.config.throughput_window();
        let window_start = now
            - ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::seconds(60));
        let query = MetricQuery::new()
            .since(window_start)
            .with_label("queue", queue_name);
        let minutes = window.as_secs_f64() / 60.0;

        stats.throughput = Throughput {
            sent_per_minute: self.monitoring.sum_metric("messages_sent", &query) / minutes,
            received_per_minute: self.monitoring.sum_metric("messages_received", &query) / minutes,
            window_secs: window.as_secs(),
        };

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::MonitoringConfig;
    use crate::queue::message::Priority;
    use serde_json::json;

    fn manager() -> QueueManager {
        let events = EventBus::new(1024);
        let monitoring = Arc::new(MonitoringSystem::new(MonitoringConfig::default(), events.clone()));
        let config = QueueManagerConfig {
            backoff: BackoffPolicy::fixed(0, 2.0, 0),
            ..Default::default()
        };
        QueueManager::new(config, monitoring, events)
    }

    #[test]
    fn test_create_duplicate_queue() {
        let manager = manager();
        manager.create_queue(QueueConfig::new("jobs")).unwrap();
        assert!(matches!(
            manager.create_queue(QueueConfig::new("jobs")),
            Err(QueueError::QueueAlreadyExists(_))
        ));
        assert!(matches!(
            manager.create_queue(QueueConfig::new("bad").with_max_size(0)),
            Err(QueueError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_send_receive_ack() {
        let manager = manager();
        manager.create_queue(QueueConfig::new("jobs")).unwrap();
        let id = manager
            .send_message("jobs", "echo", json!({"v": 1}), SendOptions::new())
            .unwrap();

        let batch = manager
            .receive_messages("jobs", ReceiveOptions::new(10))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);

        // in flight, so not redelivered
        assert!(manager
            .receive_messages("jobs", ReceiveOptions::new(10))
            .await
            .unwrap()
            .is_empty());

        manager.acknowledge_message("jobs", &id).unwrap();
        assert_eq!(manager.get_queue_stats("jobs").unwrap().message_count, 0);
        assert!(matches!(
            manager.acknowledge_message("jobs", &id),
            Err(QueueError::MessageNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_reject_reschedules_then_dead_letters() {
        let manager = manager();
        manager
            .create_queue(
                QueueConfig::new("jobs")
                    .with_max_receive_count(2)
                    .with_dead_letter_queue("jobs-dlq"),
            )
            .unwrap();
        let id = manager
            .send_message("jobs", "echo", json!(null), SendOptions::new())
            .unwrap();

        manager.receive_messages("jobs", ReceiveOptions::new(1)).await.unwrap();
        manager.reject_message("jobs", &id, "bad").unwrap();
        let stats = manager.get_queue_stats("jobs").unwrap();
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.in_flight_count, 0);

        manager.receive_messages("jobs", ReceiveOptions::new(1)).await.unwrap();
        manager.reject_message("jobs", &id, "bad").unwrap();

        assert_eq!(manager.get_queue_stats("jobs").unwrap().message_count, 0);
        let dead = manager.get_dead_letter_messages("jobs-dlq").unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].dead_letter_reason(), Some("bad"));
        assert_eq!(manager.get_queue_stats("jobs").unwrap().dead_letter_count, 1);
    }

    #[tokio::test]
    async fn test_priority_order() {
        let manager = manager();
        manager.create_queue(QueueConfig::new("jobs")).unwrap();
        for priority in [Priority::Low, Priority::Critical, Priority::Normal] {
            manager
                .send_message(
                    "jobs",
                    "t",
                    json!(priority.to_string()),
                    SendOptions::new().with_priority(priority),
                )
                .unwrap();
        }

        let batch = manager
            .receive_messages("jobs", ReceiveOptions::new(3))
            .await
            .unwrap();
        let order: Vec<Priority> = batch.iter().map(|m| m.priority()).collect();
        assert_eq!(order, vec![Priority::Critical, Priority::Normal, Priority::Low]);
    }

    #[test]
    fn test_change_visibility_requires_in_flight() {
        let manager = manager();
        manager.create_queue(QueueConfig::new("jobs")).unwrap();
        let id = manager
            .send_message("jobs", "t", json!(null), SendOptions::new())
            .unwrap();
        assert!(matches!(
            manager.change_message_visibility("jobs", &id, 1000),
            Err(QueueError::MessageNotFound { .. })
        ));
        assert!(matches!(
            manager.change_message_visibility("jobs", &id, MAX_VISIBILITY_TIMEOUT_MS + 1),
            Err(QueueError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_consuming_unknown_queue() {
        let manager = manager();
        assert!(matches!(
            manager.stop_consuming("missing").await,
            Err(QueueError::QueueNotFound(_))
        ));
        manager.create_queue(QueueConfig::new("jobs")).unwrap();
        assert!(manager.stop_consuming("jobs").await.is_ok());
    }
}
