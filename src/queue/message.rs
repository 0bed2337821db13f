//! Message model for the queue manager

use crate::monitoring::MonitoringContext;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};

/// Header carrying the caller-supplied deduplication key
pub const DEDUPLICATION_ID_HEADER: &str = "deduplicationId";

/// Header recording why a message was dead-lettered
pub const DEAD_LETTER_REASON_HEADER: &str = "deadLetterReason";

/// Header recording the queue a dead-lettered message came from
pub const ORIGINAL_QUEUE_HEADER: &str = "originalQueue";

/// Dead-letter reason for messages whose TTL elapsed before delivery
pub const REASON_TTL_EXPIRED: &str = "TTL_EXPIRED";

/// Rejection reason used by consumer loops when a handler fails
pub const REASON_PROCESSING_FAILED: &str = "PROCESSING_FAILED";

/// Default message time-to-live (one hour)
pub const DEFAULT_TTL_MS: u64 = 3_600_000;

/// Default per-message retry budget
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Longest delivery delay a message may ask for (15 minutes)
pub const MAX_DELAY_SECONDS: u64 = 900;

/// Delivery priority; declaration order is ascending urgency
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Correlation fields travelling with a message and handed to its handler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContext {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub workflow_id: Option<String>,
    pub execution_id: Option<String>,
    pub agent_id: Option<String>,
    pub source: Option<String>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
}

impl MessageContext {
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }
}

impl From<&MessageContext> for MonitoringContext {
    fn from(context: &MessageContext) -> Self {
        MonitoringContext {
            user_id: context.user_id.clone(),
            session_id: context.session_id.clone(),
            workflow_id: context.workflow_id.clone(),
            execution_id: context.execution_id.clone(),
            agent_id: context.agent_id.clone(),
        }
    }
}

/// Delivery metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(flatten)]
    pub context: MessageContext,

    /// Creation timestamp
    pub timestamp: DateTime<Utc>,

    /// Number of rejections so far
    pub retry_count: u32,

    /// Retry budget requested by the producer
    pub max_retries: u32,

    pub priority: Priority,

    /// Time-to-live in milliseconds, measured from creation
    pub ttl_ms: u64,
}

/// A unit of work routed through one queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,

    /// Application-defined routing tag
    #[serde(rename = "type")]
    pub message_type: String,

    pub payload: serde_json::Value,

    pub headers: HashMap<String, String>,

    pub metadata: MessageMetadata,

    pub created_at: DateTime<Utc>,

    /// Not deliverable before this instant
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Build a message from send options, stamping id and timestamps
    pub fn new(
        message_type: impl Into<String>,
        payload: serde_json::Value,
        options: &SendOptions,
        default_delay_seconds: u64,
    ) -> Self {
        let now = Utc::now();
        let delay_seconds = options
            .delay_seconds
            .unwrap_or(default_delay_seconds)
            .min(MAX_DELAY_SECONDS);
        let scheduled_at = if delay_seconds > 0 {
            Some(now + ChronoDuration::seconds(delay_seconds as i64))
        } else {
            None
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_type: message_type.into(),
            payload,
            headers: options.headers.clone(),
            metadata: MessageMetadata {
                context: options.context.clone(),
                timestamp: now,
                retry_count: 0,
                max_retries: options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                priority: options.priority.unwrap_or_default(),
                ttl_ms: options.ttl_ms.unwrap_or(DEFAULT_TTL_MS),
            },
            created_at: now,
            scheduled_at,
        }
    }

    pub fn priority(&self) -> Priority {
        self.metadata.priority
    }

    /// `None` when the TTL reaches past the representable time range,
    /// which means the message never expires
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.metadata.ttl_ms)
            .ok()
            .and_then(ChronoDuration::try_milliseconds)
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
    }

    /// TTL elapsed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map_or(false, |at| now >= at)
    }

    /// Scheduled for a future instant (delay or retry backoff)
    pub fn is_delayed(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.map(|at| at > now).unwrap_or(false)
    }

    pub fn age(&self, now: DateTime<Utc>) -> ChronoDuration {
        now - self.created_at
    }

    pub fn deduplication_id(&self) -> Option<&str> {
        self.headers.get(DEDUPLICATION_ID_HEADER).map(String::as_str)
    }

    /// Context handed to the handler
    pub fn context(&self) -> MessageContext {
        self.metadata.context.clone()
    }

    /// Annotate for the dead-letter store
    pub fn mark_dead_lettered(&mut self, reason: &str, original_queue: &str) {
        self.headers
            .insert(DEAD_LETTER_REASON_HEADER.to_string(), reason.to_string());
        self.headers
            .insert(ORIGINAL_QUEUE_HEADER.to_string(), original_queue.to_string());
    }

    /// Strip dead-letter annotations and reset retry state for redelivery.
    /// `created_at` restarts so TTL and retention count from the redrive.
    pub fn reset_for_redrive(&mut self) {
        self.headers.remove(DEAD_LETTER_REASON_HEADER);
        self.headers.remove(ORIGINAL_QUEUE_HEADER);
        self.metadata.retry_count = 0;
        self.scheduled_at = None;
        self.created_at = Utc::now();
    }

    pub fn dead_letter_reason(&self) -> Option<&str> {
        self.headers.get(DEAD_LETTER_REASON_HEADER).map(String::as_str)
    }
}

/// Delivery order: priority descending, then creation ascending.
/// FIFO queues ignore priority.
pub fn delivery_order(a: &Message, b: &Message, fifo: bool) -> std::cmp::Ordering {
    if fifo {
        a.created_at.cmp(&b.created_at)
    } else {
        b.priority()
            .cmp(&a.priority())
            .then_with(|| a.created_at.cmp(&b.created_at))
    }
}

/// Producer-side options for `send_message`
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub headers: HashMap<String, String>,
    pub context: MessageContext,
    pub priority: Option<Priority>,
    pub ttl_ms: Option<u64>,
    pub delay_seconds: Option<u64>,
    pub max_retries: Option<u32>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn with_delay_seconds(mut self, delay_seconds: u64) -> Self {
        self.delay_seconds = Some(delay_seconds);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_deduplication_id(self, id: impl Into<String>) -> Self {
        self.with_header(DEDUPLICATION_ID_HEADER, id)
    }

    pub fn with_context(mut self, context: MessageContext) -> Self {
        self.context = context;
        self
    }
}

/// Consumer-side options for `receive_messages`
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// Batch upper bound
    pub max_messages: usize,

    /// Long-poll wait when nothing is eligible
    pub wait_time: std::time::Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 1,
            wait_time: std::time::Duration::ZERO,
        }
    }
}

impl ReceiveOptions {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages,
            ..Default::default()
        }
    }

    pub fn with_wait_time(mut self, wait_time: std::time::Duration) -> Self {
        self.wait_time = wait_time;
        self
    }
}
