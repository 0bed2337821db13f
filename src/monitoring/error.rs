//! Error types for monitoring operations

use crate::error::AppError;

/// Result type for monitoring operations
pub type MonitoringResult<T> = std::result::Result<T, MonitoringError>;

/// Errors that can occur in monitoring operations
#[derive(Debug, thiserror::Error)]
pub enum MonitoringError {
    /// Alert id unknown
    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    /// Alert id already registered
    #[error("Alert already exists: {0}")]
    AlertAlreadyExists(String),

    /// Trace id unknown
    #[error("Trace not found: {0}")]
    TraceNotFound(String),

    /// Span id unknown within the trace
    #[error("Span {span_id} not found in trace {trace_id}")]
    SpanNotFound { trace_id: String, span_id: String },

    /// Trace already sealed by finish
    #[error("Trace already finished: {0}")]
    TraceFinished(String),

    /// Invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// An alert action could not be carried out
    #[error("Alert action failed: {0}")]
    ActionFailed(String),

    /// Export serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for MonitoringError {
    fn from(err: serde_json::Error) -> Self {
        MonitoringError::Serialization(err.to_string())
    }
}

impl From<MonitoringError> for AppError {
    fn from(err: MonitoringError) -> Self {
        match err {
            MonitoringError::AlertNotFound(_)
            | MonitoringError::TraceNotFound(_)
            | MonitoringError::SpanNotFound { .. } => AppError::NotFound(err.to_string()),
            MonitoringError::AlertAlreadyExists(_) | MonitoringError::TraceFinished(_) => {
                AppError::Conflict(err.to_string())
            }
            MonitoringError::Validation(msg) => AppError::Validation(msg),
            MonitoringError::Serialization(msg) => AppError::Serialization(msg),
            MonitoringError::ActionFailed(msg) => AppError::Processing(msg),
        }
    }
}
