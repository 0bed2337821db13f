//! Scoped trace and span handles

use super::error::MonitoringResult;
use super::system::MonitoringSystem;
use super::traces::{LogLevel, Span, Trace, TraceStatus};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

fn abandoned_metadata() -> HashMap<String, serde_json::Value> {
    let mut metadata = HashMap::new();
    metadata.insert("abandoned".to_string(), json!(true));
    metadata
}

/// Owns an open trace. Dropping it without [`TraceGuard::finish`] finishes
/// the trace with status error and `{"abandoned": true}` metadata.
pub struct TraceGuard {
    monitoring: Arc<MonitoringSystem>,
    trace_id: String,
    finished: bool,
}

impl TraceGuard {
    pub(crate) fn new(monitoring: Arc<MonitoringSystem>, trace_id: String) -> Self {
        Self {
            monitoring,
            trace_id,
            finished: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.trace_id
    }

    /// Open a top-level span
    pub fn span(&self, operation_name: &str) -> MonitoringResult<SpanGuard> {
        let span_id = self.monitoring.add_span(&self.trace_id, operation_name, None)?;
        Ok(SpanGuard::new(self.monitoring.clone(), self.trace_id.clone(), span_id))
    }

    pub fn finish(
        mut self,
        status: TraceStatus,
        metadata: HashMap<String, serde_json::Value>,
    ) -> MonitoringResult<Trace> {
        self.finished = true;
        self.monitoring.finish_trace(&self.trace_id, status, metadata)
    }
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        if let Err(e) =
            self.monitoring
                .finish_trace(&self.trace_id, TraceStatus::Error, abandoned_metadata())
        {
            debug!(trace_id = %self.trace_id, error = %e, "Abandoned trace could not be finished");
        }
    }
}

/// Owns an open span; same drop semantics as [`TraceGuard`]
pub struct SpanGuard {
    monitoring: Arc<MonitoringSystem>,
    trace_id: String,
    span_id: String,
    finished: bool,
}

impl SpanGuard {
    fn new(monitoring: Arc<MonitoringSystem>, trace_id: String, span_id: String) -> Self {
        Self {
            monitoring,
            trace_id,
            span_id,
            finished: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.span_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Open a child span
    pub fn child(&self, operation_name: &str) -> MonitoringResult<SpanGuard> {
        let span_id =
            self.monitoring
                .add_span(&self.trace_id, operation_name, Some(&self.span_id))?;
        Ok(SpanGuard::new(self.monitoring.clone(), self.trace_id.clone(), span_id))
    }

    pub fn log(
        &self,
        level: LogLevel,
        message: &str,
        fields: HashMap<String, serde_json::Value>,
    ) -> MonitoringResult<()> {
        self.monitoring
            .add_span_log(&self.trace_id, &self.span_id, level, message, fields)
    }

    pub fn finish(mut self, status: TraceStatus) -> MonitoringResult<Span> {
        self.finished = true;
        self.monitoring
            .finish_span(&self.trace_id, &self.span_id, status)
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let result = self
            .monitoring
            .add_span_log(
                &self.trace_id,
                &self.span_id,
                LogLevel::Warn,
                "span abandoned",
                abandoned_metadata(),
            )
            .and_then(|_| {
                self.monitoring
                    .finish_span(&self.trace_id, &self.span_id, TraceStatus::Error)
            });

        if let Err(e) = result {
            debug!(
                trace_id = %self.trace_id,
                span_id = %self.span_id,
                error = %e,
                "Abandoned span could not be finished"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::monitoring::config::MonitoringConfig;

    fn monitoring() -> Arc<MonitoringSystem> {
        Arc::new(MonitoringSystem::new(
            MonitoringConfig::default(),
            EventBus::new(64),
        ))
    }

    #[test]
    fn test_explicit_finish() {
        let monitoring = monitoring();
        let guard = monitoring.trace("op", None);
        let span = guard.span("step").unwrap();
        span.finish(TraceStatus::Success).unwrap();
        let trace = guard.finish(TraceStatus::Success, HashMap::new()).unwrap();

        assert_eq!(trace.status, Some(TraceStatus::Success));
        assert!(!trace.metadata.contains_key("abandoned"));
        assert_eq!(trace.spans[0].status, Some(TraceStatus::Success));
    }

    #[test]
    fn test_dropped_trace_is_abandoned() {
        let monitoring = monitoring();
        let trace_id = {
            let guard = monitoring.trace("op", None);
            guard.id().to_string()
        };

        let trace = monitoring.get_trace(&trace_id).unwrap();
        assert_eq!(trace.status, Some(TraceStatus::Error));
        assert_eq!(trace.metadata.get("abandoned"), Some(&json!(true)));
    }

    #[test]
    fn test_dropped_span_is_abandoned() {
        let monitoring = monitoring();
        let guard = monitoring.trace("op", None);
        let span_id = {
            let span = guard.span("step").unwrap();
            let child = span.child("inner").unwrap();
            child.finish(TraceStatus::Success).unwrap();
            span.id().to_string()
        };

        let trace = monitoring.get_trace(guard.id()).unwrap();
        let span = trace.span(&span_id).unwrap();
        assert_eq!(span.status, Some(TraceStatus::Error));
        assert_eq!(span.logs.len(), 1);
        assert_eq!(trace.spans.len(), 2);
        assert_eq!(trace.spans[1].parent_span_id.as_deref(), Some(span_id.as_str()));

        guard.finish(TraceStatus::Success, HashMap::new()).unwrap();
    }

    #[test]
    fn test_error_path_finishes_trace() {
        fn failing_step(monitoring: &Arc<MonitoringSystem>) -> Result<(), String> {
            let _guard = monitoring.trace("failing", None);
            Err("boom".to_string())
        }

        let monitoring = monitoring();
        assert!(failing_step(&monitoring).is_err());

        let traces = monitoring.get_traces(&crate::monitoring::TraceFilter::new().operation("failing"));
        assert_eq!(traces.len(), 1);
        assert!(traces[0].is_finished());
    }
}
