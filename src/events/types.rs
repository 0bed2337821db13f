//! Domain events published on the event bus

use crate::monitoring::{Alert, AlertEvent, HealthCheck, Metric, Span, Trace};
use crate::queue::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Everything the orchestrator announces to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    QueueCreated {
        queue: String,
    },
    QueueDeleted {
        queue: String,
    },
    QueuePurged {
        queue: String,
        count: usize,
    },
    MessageSent {
        queue: String,
        message_id: String,
        message_type: String,
        priority: Priority,
    },
    MessagesReceived {
        queue: String,
        message_ids: Vec<String>,
    },
    MessageAcknowledged {
        queue: String,
        message_id: String,
    },
    MessageRejected {
        queue: String,
        message_id: String,
        reason: String,
        retry_count: u32,
        dead_lettered: bool,
    },
    MessageDeadLettered {
        queue: String,
        message_id: String,
        dead_letter_queue: Option<String>,
        reason: String,
    },
    MessageVisibilityExpired {
        queue: String,
        message_id: String,
    },
    MessagesRedriven {
        dead_letter_queue: String,
        target_queue: String,
        count: usize,
    },
    ConsumerStarted {
        queue: String,
        handler: String,
    },
    ConsumerStopped {
        queue: String,
    },
    MetricRecorded {
        metric: Metric,
    },
    AlertCreated {
        alert: Alert,
    },
    AlertUpdated {
        alert: Alert,
    },
    AlertDeleted {
        alert_id: String,
    },
    AlertFired {
        alert: Alert,
        event: AlertEvent,
    },
    AlertResolved {
        alert: Alert,
        event: AlertEvent,
    },
    /// Request for an external notifier
    AlertNotify {
        alert: Alert,
        event: AlertEvent,
    },
    /// Request for external webhook delivery
    AlertWebhook {
        alert: Alert,
        event: AlertEvent,
    },
    TraceStarted {
        trace_id: String,
        operation_name: String,
    },
    TraceFinished {
        trace: Trace,
    },
    SpanStarted {
        trace_id: String,
        span_id: String,
        operation_name: String,
    },
    SpanFinished {
        span: Span,
    },
    HealthRecorded {
        check: HealthCheck,
    },
    MonitoringCleanup {
        metrics_removed: usize,
        alert_events_removed: usize,
        traces_removed: usize,
    },
}

impl OrchestratorEvent {
    /// Stable event name
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorEvent::QueueCreated { .. } => "queue:created",
            OrchestratorEvent::QueueDeleted { .. } => "queue:deleted",
            OrchestratorEvent::QueuePurged { .. } => "queue:purged",
            OrchestratorEvent::MessageSent { .. } => "message:sent",
            OrchestratorEvent::MessagesReceived { .. } => "messages:received",
            OrchestratorEvent::MessageAcknowledged { .. } => "message:acknowledged",
            OrchestratorEvent::MessageRejected { .. } => "message:rejected",
            OrchestratorEvent::MessageDeadLettered { .. } => "message:dead_lettered",
            OrchestratorEvent::MessageVisibilityExpired { .. } => "message:visibility_expired",
            OrchestratorEvent::MessagesRedriven { .. } => "messages:redriven",
            OrchestratorEvent::ConsumerStarted { .. } => "consumer:started",
            OrchestratorEvent::ConsumerStopped { .. } => "consumer:stopped",
            OrchestratorEvent::MetricRecorded { .. } => "metric:recorded",
            OrchestratorEvent::AlertCreated { .. } => "alert:created",
            OrchestratorEvent::AlertUpdated { .. } => "alert:updated",
            OrchestratorEvent::AlertDeleted { .. } => "alert:deleted",
            OrchestratorEvent::AlertFired { .. } => "alert:fired",
            OrchestratorEvent::AlertResolved { .. } => "alert:resolved",
            OrchestratorEvent::AlertNotify { .. } => "alert:notify",
            OrchestratorEvent::AlertWebhook { .. } => "alert:webhook",
            OrchestratorEvent::TraceStarted { .. } => "trace:started",
            OrchestratorEvent::TraceFinished { .. } => "trace:finished",
            OrchestratorEvent::SpanStarted { .. } => "span:started",
            OrchestratorEvent::SpanFinished { .. } => "span:finished",
            OrchestratorEvent::HealthRecorded { .. } => "health:recorded",
            OrchestratorEvent::MonitoringCleanup { .. } => "monitoring:cleanup",
        }
    }

    /// Queue the event concerns, if any
    pub fn queue(&self) -> Option<&str> {
        match self {
            OrchestratorEvent::QueueCreated { queue }
            | OrchestratorEvent::QueueDeleted { queue }
            | OrchestratorEvent::QueuePurged { queue, .. }
            | OrchestratorEvent::MessageSent { queue, .. }
            | OrchestratorEvent::MessagesReceived { queue, .. }
            | OrchestratorEvent::MessageAcknowledged { queue, .. }
            | OrchestratorEvent::MessageRejected { queue, .. }
            | OrchestratorEvent::MessageDeadLettered { queue, .. }
            | OrchestratorEvent::MessageVisibilityExpired { queue, .. }
            | OrchestratorEvent::ConsumerStarted { queue, .. }
            | OrchestratorEvent::ConsumerStopped { queue } => Some(queue),
            OrchestratorEvent::MessagesRedriven { target_queue, .. } => Some(target_queue),
            _ => None,
        }
    }
}

/// Event wrapper carrying id and publish time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event: OrchestratorEvent,
}

impl EventEnvelope {
    pub fn new(event: OrchestratorEvent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn name(&self) -> &'static str {
        self.event.name()
    }
}

/// Publish counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_name: HashMap<String, u64>,
    pub last_event_time: Option<DateTime<Utc>>,
}

impl EventStats {
    pub fn record_event(&mut self, name: &str) {
        self.total_events += 1;
        *self.events_by_name.entry(name.to_string()).or_insert(0) += 1;
        self.last_event_time = Some(Utc::now());
    }

    pub fn count(&self, name: &str) -> u64 {
        self.events_by_name.get(name).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = OrchestratorEvent::QueueCreated {
            queue: "jobs".to_string(),
        };
        assert_eq!(event.name(), "queue:created");
        assert_eq!(event.queue(), Some("jobs"));

        let event = OrchestratorEvent::AlertDeleted {
            alert_id: "a1".to_string(),
        };
        assert_eq!(event.name(), "alert:deleted");
        assert!(event.queue().is_none());
    }

    #[test]
    fn test_event_serialization_tag() {
        let envelope = EventEnvelope::new(OrchestratorEvent::MessageAcknowledged {
            queue: "jobs".to_string(),
            message_id: "m1".to_string(),
        });
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["event"]["type"], "message_acknowledged");
        assert_eq!(json["event"]["message_id"], "m1");
    }

    #[test]
    fn test_event_stats() {
        let mut stats = EventStats::default();
        stats.record_event("message:sent");
        stats.record_event("message:sent");
        stats.record_event("alert:fired");

        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.count("message:sent"), 2);
        assert_eq!(stats.count("queue:deleted"), 0);
        assert!(stats.last_event_time.is_some());
    }
}
