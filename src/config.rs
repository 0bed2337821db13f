use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::monitoring::MonitoringConfig;
use crate::queue::QueueManagerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Event bus configuration
    #[serde(default)]
    pub events: EventsConfig,

    /// Queue manager configuration, including queues created at startup
    #[serde(default)]
    pub queue: QueueManagerConfig,

    /// Monitoring system configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Config {
    /// Load configuration from the embedded defaults, an optional file and
    /// the environment.
    ///
    /// The file is `path` when given, otherwise `CONFIG_PATH`, otherwise
    /// `config/local.toml`. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let config_path = match path {
            Some(path) => path.to_string_lossy().into_owned(),
            None => std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/local.toml".to_string()),
        };

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (ORCH_QUEUE__POLL_INTERVAL_MS=...)
            .add_source(
                config::Environment::with_prefix("ORCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Register the Prometheus queue metrics at startup
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Broadcast channel capacity; slow subscribers lag past this
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_embedded_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/orchestrator.toml"))).unwrap();
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.events.capacity, DEFAULT_EVENT_CAPACITY);
        assert_eq!(config.queue.poll_interval_ms, 1000);
        assert_eq!(config.monitoring.alert_evaluation_interval_secs, 60);
        assert!(config.queue.queues.is_empty());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[observability]
json_logs = true

[queue]
poll_interval_ms = 250

[[queue.queues]]
name = "jobs"
max_size = 10
dead_letter_queue = "jobs-dlq"

[monitoring]
trace_retention_days = 1
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert!(config.observability.json_logs);
        assert_eq!(config.queue.poll_interval_ms, 250);
        assert_eq!(config.queue.long_poll_interval_ms, 50);
        assert_eq!(config.queue.queues.len(), 1);
        assert_eq!(config.queue.queues[0].name, "jobs");
        assert_eq!(config.queue.queues[0].max_receive_count, 3);
        assert_eq!(config.monitoring.trace_retention_days, 1);
        assert_eq!(config.monitoring.metrics_retention_days, 30);
    }
}
