//! Metric records, queries and summaries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};

/// Kind of a recorded metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

/// One appended metric observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub labels: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Build a label map from string pairs
pub fn labels<const N: usize>(pairs: [(&str, &str); N]) -> HashMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Correlation context merged into metric labels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringContext {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub workflow_id: Option<String>,
    pub execution_id: Option<String>,
    pub agent_id: Option<String>,
}

impl MonitoringContext {
    pub fn new() -> Self {
        Self::default()
    }

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

    /// Context fields as labels; unset fields are omitted
    pub fn labels(&self) -> HashMap<String, String> {
        [
            ("user_id", &self.user_id),
            ("session_id", &self.session_id),
            ("workflow_id", &self.workflow_id),
            ("execution_id", &self.execution_id),
            ("agent_id", &self.agent_id),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| (key.to_string(), v.clone())))
        .collect()
    }

    /// Caller labels win over context labels on key collisions
    pub fn merge_labels(&self, labels: HashMap<String, String>) -> HashMap<String, String> {
        let mut merged = self.labels();
        merged.extend(labels);
        merged
    }
}

/// Filter for `get_metrics`
#[derive(Debug, Clone, Default)]
pub struct MetricQuery {
    /// Inclusive lower bound
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub end: Option<DateTime<Utc>>,
    /// Every pair must be present on the metric
    pub labels: HashMap<String, String>,
    /// Keep only the most recent N after filtering
    pub limit: Option<usize>,
}

impl MetricQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, metric: &Metric) -> bool {
        if self.start.map(|s| metric.timestamp < s).unwrap_or(false) {
            return false;
        }
        if self.end.map(|e| metric.timestamp > e).unwrap_or(false) {
            return false;
        }
        self.labels
            .iter()
            .all(|(k, v)| metric.labels.get(k) == Some(v))
    }

    /// Filter a series already in timestamp order
    pub fn apply(&self, series: &[Metric]) -> Vec<Metric> {
        let matched: Vec<Metric> = series.iter().filter(|m| self.matches(m)).cloned().collect();
        match self.limit {
            Some(limit) if matched.len() > limit => matched[matched.len() - limit..].to_vec(),
            _ => matched,
        }
    }
}

/// Aggregate view over one metric series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub name: String,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub latest: Option<f64>,
    pub latest_timestamp: Option<DateTime<Utc>>,
}

impl MetricSummary {
    pub fn from_series(name: &str, series: &[Metric]) -> Self {
        if series.is_empty() {
            return Self {
                name: name.to_string(),
                count: 0,
                min: 0.0,
                max: 0.0,
                avg: 0.0,
                latest: None,
                latest_timestamp: None,
            };
        }

        let (min, max, sum) = series.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), m| (min.min(m.value), max.max(m.value), sum + m.value),
        );
        let last = series.last();

        Self {
            name: name.to_string(),
            count: series.len(),
            min,
            max,
            avg: sum / series.len() as f64,
            latest: last.map(|m| m.value),
            latest_timestamp: last.map(|m| m.timestamp),
        }
    }
}
