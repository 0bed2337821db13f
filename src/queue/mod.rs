//! In-process message queues
//!
//! Named, bounded, priority-ordered queues with visibility timeouts,
//! jittered retry backoff, dead-letter stores and polling consumers.

pub mod backoff;
pub mod config;
pub mod error;
pub mod handler;
pub mod manager;
pub mod message;
pub mod metrics;
pub mod stats;
pub mod store;

pub use backoff::BackoffPolicy;
pub use config::{ConsumerConfig, QueueConfig, QueueManagerConfig, RetryPolicy};
pub use error::{QueueError, QueueResult};
pub use handler::MessageHandler;
pub use manager::QueueManager;
pub use message::{
    Message, MessageContext, MessageMetadata, Priority, ReceiveOptions, SendOptions,
    DEAD_LETTER_REASON_HEADER, DEDUPLICATION_ID_HEADER, DEFAULT_MAX_RETRIES, DEFAULT_TTL_MS,
    MAX_DELAY_SECONDS, ORIGINAL_QUEUE_HEADER, REASON_PROCESSING_FAILED, REASON_TTL_EXPIRED,
};
pub use metrics::{gather_metrics, init_queue_metrics, QUEUE_METRICS};
pub use stats::{QueueStats, Throughput};
pub use store::{InMemoryQueueStore, QueueState, QueueStore};
