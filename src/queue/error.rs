//! Error types for queue operations

use crate::error::AppError;

/// Result type for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Errors that can occur during queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Queue is not registered
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// Queue name already registered
    #[error("Queue already exists: {0}")]
    QueueAlreadyExists(String),

    /// Message id unknown to the queue
    #[error("Message {message_id} not found in queue {queue}")]
    MessageNotFound { queue: String, message_id: String },

    /// Queue is at capacity
    #[error("Queue {queue} is full (max size {max_size})")]
    QueueFull { queue: String, max_size: usize },

    /// Configuration failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// A consumer is already running for the queue
    #[error("Consumer already running for queue: {0}")]
    ConsumerAlreadyRunning(String),

    /// Backend store failure
    #[error("Store error: {0}")]
    Store(String),
}

impl QueueError {
    pub fn message_not_found(queue: &str, message_id: &str) -> Self {
        QueueError::MessageNotFound {
            queue: queue.to_string(),
            message_id: message_id.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for QueueError {
    fn from(err: validator::ValidationErrors) -> Self {
        QueueError::Validation(err.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::QueueNotFound(_) | QueueError::MessageNotFound { .. } => {
                AppError::NotFound(err.to_string())
            }
            QueueError::QueueAlreadyExists(_) | QueueError::ConsumerAlreadyRunning(_) => {
                AppError::Conflict(err.to_string())
            }
            QueueError::QueueFull { .. } => AppError::Capacity(err.to_string()),
            QueueError::Validation(msg) => AppError::Validation(msg),
            QueueError::Store(msg) => AppError::Internal(msg),
        }
    }
}
