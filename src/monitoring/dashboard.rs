//! Dashboard read model derived from current monitoring state

use super::alerts::{AlertEvent, AlertStatus};
use super::health::{overall_status, HealthCheck, HealthStatus};
use super::metrics::Metric;
use super::traces::{Trace, TraceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Latest value of a metric and its change from the previous one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTrend {
    pub latest: f64,
    pub previous: Option<f64>,
    /// `latest - previous`; zero for single-sample series
    pub trend: f64,
    pub timestamp: DateTime<Utc>,
    pub samples: usize,
}

impl MetricTrend {
    pub fn from_series(series: &[Metric]) -> Option<Self> {
        let last = series.last()?;
        let previous = series.len().checked_sub(2).map(|i| series[i].value);

        Some(Self {
            latest: last.value,
            previous,
            trend: previous.map(|p| last.value - p).unwrap_or(0.0),
            timestamp: last.timestamp,
            samples: series.len(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertOverview {
    pub total: usize,
    pub enabled: usize,
    /// Firing events in history
    pub firing_events: usize,
    /// Resolved events in history
    pub resolved_events: usize,
    pub currently_firing: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceOverview {
    pub total: usize,
    pub finished: usize,
    /// Percentage of finished traces with status success; zero without data
    pub success_rate: f64,
    /// Mean duration of finished traces (ms)
    pub average_duration_ms: f64,
}

impl TraceOverview {
    pub fn from_traces(traces: &[Trace]) -> Self {
        let finished: Vec<&Trace> = traces.iter().filter(|t| t.is_finished()).collect();
        if finished.is_empty() {
            return Self {
                total: traces.len(),
                ..Default::default()
            };
        }

        let successes = finished
            .iter()
            .filter(|t| t.status == Some(TraceStatus::Success))
            .count();
        let total_duration: i64 = finished.iter().filter_map(|t| t.duration_ms).sum();

        Self {
            total: traces.len(),
            finished: finished.len(),
            success_rate: successes as f64 / finished.len() as f64 * 100.0,
            average_duration_ms: total_duration as f64 / finished.len() as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthOverview {
    pub overall: HealthStatus,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
}

impl HealthOverview {
    pub fn from_checks(checks: &[HealthCheck]) -> Self {
        let count = |status: HealthStatus| checks.iter().filter(|c| c.status == status).count();
        Self {
            overall: overall_status(checks),
            healthy: count(HealthStatus::Healthy),
            degraded: count(HealthStatus::Degraded),
            unhealthy: count(HealthStatus::Unhealthy),
        }
    }
}

/// Complete dashboard snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardData {
    pub generated_at: DateTime<Utc>,
    pub metrics: HashMap<String, MetricTrend>,
    pub alerts: AlertOverview,
    pub traces: TraceOverview,
    pub health: HealthOverview,
}

/// Count firing and resolved events
pub fn count_alert_events(events: &[AlertEvent]) -> (usize, usize) {
    events.iter().fold((0, 0), |(firing, resolved), e| match e.status {
        AlertStatus::Firing => (firing + 1, resolved),
        AlertStatus::Resolved => (firing, resolved + 1),
    })
}
