//! Omni Orchestrator
//!
//! An in-process message queue manager paired with a monitoring system:
//! queues with priorities, visibility timeouts, retries and dead letters,
//! plus metrics, threshold alerts, traces, health checks and a dashboard.

pub mod config;
pub mod error;
pub mod events;
pub mod monitoring;
pub mod queue;

pub use config::Config;
pub use error::{AppError, Result};
pub use events::{EventBus, EventEnvelope, OrchestratorEvent};
pub use monitoring::MonitoringSystem;
pub use queue::QueueManager;
