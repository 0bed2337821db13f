//! Monitoring configuration

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the monitoring system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoringConfig {
    /// Alert evaluation tick (seconds)
    #[serde(default = "default_alert_evaluation_interval_secs")]
    pub alert_evaluation_interval_secs: u64,

    /// Retention cleanup tick (seconds)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// How long a firing event keeps its alert "currently firing" (seconds)
    #[serde(default = "default_firing_window_secs")]
    pub firing_window_secs: u64,

    #[serde(default = "default_metrics_retention_days")]
    pub metrics_retention_days: u32,

    #[serde(default = "default_alert_retention_days")]
    pub alert_retention_days: u32,

    #[serde(default = "default_trace_retention_days")]
    pub trace_retention_days: u32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            alert_evaluation_interval_secs: default_alert_evaluation_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            firing_window_secs: default_firing_window_secs(),
            metrics_retention_days: default_metrics_retention_days(),
            alert_retention_days: default_alert_retention_days(),
            trace_retention_days: default_trace_retention_days(),
        }
    }
}

impl MonitoringConfig {
    pub fn alert_evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.alert_evaluation_interval_secs.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn firing_window(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.firing_window_secs as i64)
    }

    pub fn metrics_retention(&self) -> ChronoDuration {
        ChronoDuration::days(self.metrics_retention_days as i64)
    }

    pub fn alert_retention(&self) -> ChronoDuration {
        ChronoDuration::days(self.alert_retention_days as i64)
    }

    pub fn trace_retention(&self) -> ChronoDuration {
        ChronoDuration::days(self.trace_retention_days as i64)
    }
}

fn default_alert_evaluation_interval_secs() -> u64 {
    60
}

fn default_cleanup_interval_secs() -> u64 {
    86_400
}

fn default_firing_window_secs() -> u64 {
    300
}

fn default_metrics_retention_days() -> u32 {
    30
}

fn default_alert_retention_days() -> u32 {
    90
}

fn default_trace_retention_days() -> u32 {
    7
}
