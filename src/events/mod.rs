//! Orchestrator event bus
//!
//! Queue and monitoring components publish typed [`OrchestratorEvent`]s;
//! anything interested (audit logging, webhook delivery, tests) subscribes.

pub mod bus;
pub mod types;

pub use bus::{EventBus, DEFAULT_EVENT_CAPACITY};
pub use types::{EventEnvelope, EventStats, OrchestratorEvent};
