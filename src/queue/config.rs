//! Queue, consumer and manager configuration

use super::backoff::BackoffPolicy;
use super::error::{QueueError, QueueResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Configuration of a single named queue
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct QueueConfig {
    /// Unique queue name
    #[validate(length(min = 1, max = 256))]
    pub name: String,

    /// Maximum number of live messages
    #[serde(default = "default_max_size")]
    #[validate(range(min = 1, max = 1_000_000))]
    pub max_size: usize,

    /// How long a received message stays invisible without ack/reject (ms)
    #[serde(default = "default_visibility_timeout_ms")]
    #[validate(range(max = 43_200_000))]
    pub visibility_timeout_ms: u64,

    /// How long a message may stay in the queue at all (ms)
    #[serde(default = "default_message_retention_period_ms")]
    #[validate(range(min = 60_000, max = 1_209_600_000))]
    pub message_retention_period_ms: u64,

    /// Name of the dead-letter store for terminally failed messages
    #[serde(default)]
    pub dead_letter_queue: Option<String>,

    /// Rejections before a message is dead-lettered
    #[serde(default = "default_max_receive_count")]
    #[validate(range(min = 1, max = 1000))]
    pub max_receive_count: u32,

    /// Default delivery delay for new messages (seconds)
    #[serde(default)]
    #[validate(range(max = 900))]
    pub delay_seconds: u64,

    /// Strict creation-order delivery, priority ignored
    #[serde(default)]
    pub fifo: bool,

    /// Deduplicate sends carrying the same `deduplicationId` header
    #[serde(default)]
    pub content_based_deduplication: bool,
}

impl QueueConfig {
    /// Queue with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_size: default_max_size(),
            visibility_timeout_ms: default_visibility_timeout_ms(),
            message_retention_period_ms: default_message_retention_period_ms(),
            dead_letter_queue: None,
            max_receive_count: default_max_receive_count(),
            delay_seconds: 0,
            fifo: false,
            content_based_deduplication: false,
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_visibility_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.visibility_timeout_ms = timeout_ms;
        self
    }

    pub fn with_dead_letter_queue(mut self, dlq: impl Into<String>) -> Self {
        self.dead_letter_queue = Some(dlq.into());
        self
    }

    pub fn with_max_receive_count(mut self, count: u32) -> Self {
        self.max_receive_count = count;
        self
    }

    pub fn with_delay_seconds(mut self, delay: u64) -> Self {
        self.delay_seconds = delay;
        self
    }

    pub fn with_fifo(mut self, fifo: bool) -> Self {
        self.fifo = fifo;
        self
    }

    pub fn with_content_based_deduplication(mut self, enabled: bool) -> Self {
        self.content_based_deduplication = enabled;
        self
    }

    /// Run field validation plus the checks the derive cannot express
    pub fn validated(self) -> QueueResult<Self> {
        self.validate()?;

        if !is_valid_name(&self.name) {
            return Err(QueueError::Validation(format!(
                "queue name '{}' may only contain alphanumerics, '-', '_', '.' and ':'",
                self.name
            )));
        }

        if let Some(ref dlq) = self.dead_letter_queue {
            if !is_valid_name(dlq) {
                return Err(QueueError::Validation(format!(
                    "dead letter queue name '{}' is invalid",
                    dlq
                )));
            }
            if dlq == &self.name {
                return Err(QueueError::Validation(
                    "a queue cannot be its own dead letter queue".to_string(),
                ));
            }
        }

        Ok(self)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }
}

/// Retry behaviour applied by a consumer loop when its handler fails
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct RetryPolicy {
    #[serde(default = "default_retry_max_retries")]
    #[validate(range(max = 100))]
    pub max_retries: u32,

    #[serde(default = "default_backoff_multiplier")]
    #[validate(range(min = 1.0, max = 10.0))]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_backoff_ms")]
    #[validate(range(max = 3_600_000))]
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_retry_max_retries(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Binding of one queue to one handler
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ConsumerConfig {
    #[validate(length(min = 1, max = 256))]
    pub queue_name: String,

    /// Handler registry key; the queue name when unset
    #[serde(default)]
    pub handler: Option<String>,

    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 100))]
    pub batch_size: usize,

    /// Long-poll wait per receive (seconds)
    #[serde(default)]
    #[validate(range(max = 20))]
    pub wait_time_seconds: u64,

    /// Handlers running at once within a batch
    #[serde(default = "default_max_concurrency")]
    #[validate(range(min = 1, max = 100))]
    pub max_concurrency: usize,

    #[serde(default = "default_true")]
    pub auto_ack: bool,

    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

impl ConsumerConfig {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            handler: None,
            batch_size: default_batch_size(),
            wait_time_seconds: 0,
            max_concurrency: default_max_concurrency(),
            auto_ack: true,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    pub fn with_wait_time_seconds(mut self, wait: u64) -> Self {
        self.wait_time_seconds = wait;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Key used to look up the handler
    pub fn handler_key(&self) -> &str {
        self.handler.as_deref().unwrap_or(&self.queue_name)
    }

    pub fn validated(self) -> QueueResult<Self> {
        self.validate()?;
        self.retry_policy.validate()?;
        Ok(self)
    }
}

/// Manager-wide tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueManagerConfig {
    /// Consumer polling interval (ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Re-scan interval while long polling (ms)
    #[serde(default = "default_long_poll_interval_ms")]
    pub long_poll_interval_ms: u64,

    /// Window used to derive queue throughput (seconds)
    #[serde(default = "default_throughput_window_secs")]
    pub throughput_window_secs: u64,

    /// Backoff applied to rejected messages
    #[serde(default)]
    pub backoff: BackoffPolicy,

    /// Queues created at startup
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            long_poll_interval_ms: default_long_poll_interval_ms(),
            throughput_window_secs: default_throughput_window_secs(),
            backoff: BackoffPolicy::default(),
            queues: Vec::new(),
        }
    }
}

impl QueueManagerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn long_poll_interval(&self) -> Duration {
        Duration::from_millis(self.long_poll_interval_ms.max(1))
    }

    pub fn throughput_window(&self) -> Duration {
        Duration::from_secs(self.throughput_window_secs.max(1))
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

fn default_max_size() -> usize {
    10_000
}

fn default_visibility_timeout_ms() -> u64 {
    30_000
}

fn default_message_retention_period_ms() -> u64 {
    345_600_000 // 4 days
}

fn default_max_receive_count() -> u32 {
    3
}

fn default_retry_max_retries() -> u32 {
    3
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    300_000
}

fn default_batch_size() -> usize {
    10
}

fn default_max_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_long_poll_interval_ms() -> u64 {
    50
}

fn default_throughput_window_secs() -> u64 {
    60
}
