//! Traces, spans and trace storage

use super::error::{MonitoringError, MonitoringResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use strum::{Display, EnumString};

/// Final status of a trace or span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TraceStatus {
    Success,
    Error,
    Timeout,
}

/// Severity of a span log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured log attached to a span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLog {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub fields: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub id: String,
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub operation_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Unset while the span is open
    pub status: Option<TraceStatus>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub logs: Vec<SpanLog>,
}

impl Span {
    pub fn new(trace_id: &str, operation_name: &str, parent_span_id: Option<&str>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            trace_id: trace_id.to_string(),
            parent_span_id: parent_span_id.map(str::to_string),
            operation_name: operation_name.to_string(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            status: None,
            tags: HashMap::new(),
            logs: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn finish(&mut self, status: TraceStatus) {
        let end = Utc::now();
        self.duration_ms = Some((end - self.start_time).num_milliseconds().max(0));
        self.end_time = Some(end);
        self.status = Some(status);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub operation_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Unset while the trace is open
    pub status: Option<TraceStatus>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub spans: Vec<Span>,
}

impl Trace {
    pub fn new(operation_name: &str, tags: HashMap<String, String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation_name: operation_name.to_string(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            status: None,
            tags,
            metadata: HashMap::new(),
            spans: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn span(&self, span_id: &str) -> Option<&Span> {
        self.spans.iter().find(|s| s.id == span_id)
    }

    pub fn span_mut(&mut self, span_id: &str) -> MonitoringResult<&mut Span> {
        let trace_id = self.id.clone();
        self.spans
            .iter_mut()
            .find(|s| s.id == span_id)
            .ok_or_else(|| MonitoringError::SpanNotFound {
                trace_id,
                span_id: span_id.to_string(),
            })
    }

    /// Seal the trace; fails if already sealed
    pub fn finish(
        &mut self,
        status: TraceStatus,
        metadata: HashMap<String, serde_json::Value>,
    ) -> MonitoringResult<()> {
        self.ensure_open()?;
        let end = Utc::now();
        self.duration_ms = Some((end - self.start_time).num_milliseconds().max(0));
        self.end_time = Some(end);
        self.status = Some(status);
        self.metadata.extend(metadata);
        Ok(())
    }

    pub fn ensure_open(&self) -> MonitoringResult<()> {
        if self.is_finished() {
            Err(MonitoringError::TraceFinished(self.id.clone()))
        } else {
            Ok(())
        }
    }
}

/// Filter for `get_traces`
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    pub operation_name: Option<String>,
    pub status: Option<TraceStatus>,
    /// Inclusive lower bound on start time
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on start time
    pub end: Option<DateTime<Utc>>,
    pub tags: HashMap<String, String>,
    pub limit: Option<usize>,
}

impl TraceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }

    pub fn status(mut self, status: TraceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, trace: &Trace) -> bool {
        if let Some(ref op) = self.operation_name {
            if &trace.operation_name != op {
                return false;
            }
        }
        if let Some(status) = self.status {
            if trace.status != Some(status) {
                return false;
            }
        }
        if self.start.map(|s| trace.start_time < s).unwrap_or(false) {
            return false;
        }
        if self.end.map(|e| trace.start_time > e).unwrap_or(false) {
            return false;
        }
        self.tags.iter().all(|(k, v)| trace.tags.get(k) == Some(v))
    }
}

/// Storage for traces
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn init(&self) -> MonitoringResult<()>;

    async fn close(&self) -> MonitoringResult<()>;

    fn insert_trace(&self, trace: Trace);

    fn get_trace(&self, id: &str) -> Option<Trace>;

    /// Mutate a trace in place and return the updated copy
    fn update_trace(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut Trace) -> MonitoringResult<()>,
    ) -> MonitoringResult<Trace>;

    /// Matching traces, newest first
    fn list_traces(&self, filter: &TraceFilter) -> Vec<Trace>;

    fn count(&self) -> usize;

    /// Drop traces started before `cutoff`
    fn prune(&self, cutoff: DateTime<Utc>) -> usize;
}

/// In-memory trace store
#[derive(Clone, Default)]
pub struct InMemoryTraceStore {
    traces: Arc<DashMap<String, Trace>>,
}

impl InMemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TraceStore for InMemoryTraceStore {
    async fn init(&self) -> MonitoringResult<()> {
        Ok(())
    }

    async fn close(&self) -> MonitoringResult<()> {
        self.traces.clear();
        Ok(())
    }

    fn insert_trace(&self, trace: Trace) {
        self.traces.insert(trace.id.clone(), trace);
    }

    fn get_trace(&self, id: &str) -> Option<Trace> {
        self.traces.get(id).map(|entry| entry.clone())
    }

    fn update_trace(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut Trace) -> MonitoringResult<()>,
    ) -> MonitoringResult<Trace> {
        let mut entry = self
            .traces
            .get_mut(id)
            .ok_or_else(|| MonitoringError::TraceNotFound(id.to_string()))?;
        apply(entry.value_mut())?;
        Ok(entry.value().clone())
    }

    fn list_traces(&self, filter: &TraceFilter) -> Vec<Trace> {
        let mut traces: Vec<Trace> = self
            .traces
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        traces.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        if let Some(limit) = filter.limit {
            traces.truncate(limit);
        }
        traces
    }

    fn count(&self) -> usize {
        self.traces.len()
    }

    fn prune(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.traces.len();
        self.traces.retain(|_, trace| trace.start_time >= cutoff);
        before.saturating_sub(self.traces.len())
    }
}
