//! Common test utilities
//!
//! Builders for a fast-ticking orchestrator, polling helpers for background
//! loops, and parsers for the Prometheus exposition format.

#![allow(dead_code)]

use omni_orchestrator::events::{EventBus, EventEnvelope};
use omni_orchestrator::monitoring::{MonitoringConfig, MonitoringSystem};
use omni_orchestrator::queue::{BackoffPolicy, QueueManager, QueueManagerConfig};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Everything a test needs, wired on one event bus
pub struct TestOrchestrator {
    pub events: EventBus,
    pub monitoring: Arc<MonitoringSystem>,
    pub queues: Arc<QueueManager>,
}

/// Queue manager config with 20ms polls and a fixed 10ms retry backoff
pub fn fast_queue_config() -> QueueManagerConfig {
    QueueManagerConfig {
        poll_interval_ms: 20,
        long_poll_interval_ms: 5,
        backoff: BackoffPolicy::fixed(10, 1.0, 10),
        ..Default::default()
    }
}

pub fn orchestrator() -> TestOrchestrator {
    orchestrator_with(fast_queue_config(), MonitoringConfig::default())
}

pub fn orchestrator_with(
    queue_config: QueueManagerConfig,
    monitoring_config: MonitoringConfig,
) -> TestOrchestrator {
    let events = EventBus::new(4096);
    let monitoring = Arc::new(MonitoringSystem::new(monitoring_config, events.clone()));
    let queues = Arc::new(QueueManager::new(
        queue_config,
        monitoring.clone(),
        events.clone(),
    ));

    TestOrchestrator {
        events,
        monitoring,
        queues,
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Async flavour of [`wait_until`]
pub async fn wait_until_async<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Everything currently buffered on a subscription
pub fn drain_events(rx: &mut broadcast::Receiver<EventEnvelope>) -> Vec<EventEnvelope> {
    let mut events = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        events.push(envelope);
    }
    events
}

/// Buffered events with the given name
pub fn events_named(rx: &mut broadcast::Receiver<EventEnvelope>, name: &str) -> Vec<EventEnvelope> {
    drain_events(rx)
        .into_iter()
        .filter(|envelope| envelope.name() == name)
        .collect()
}

// ============================================================================
// Prometheus exposition format
// ============================================================================

/// Group exposition lines by metric family
pub fn parse_prometheus_output(output: &str) -> HashMap<String, Vec<String>> {
    let mut metrics = HashMap::new();
    let mut current_metric = String::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("# HELP") || line.starts_with("# TYPE") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                current_metric = parts[2].to_string();
                metrics
                    .entry(current_metric.clone())
                    .or_insert_with(Vec::new)
                    .push(line.to_string());
            }
        } else if !line.starts_with('#') && !current_metric.is_empty() {
            metrics
                .entry(current_metric.clone())
                .or_insert_with(Vec::new)
                .push(line.to_string());
        }
    }

    metrics
}

/// Metric name follows `[a-zA-Z_:][a-zA-Z0-9_:]*` and avoids the `__` prefix
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }

    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

pub fn is_valid_counter_name(name: &str) -> bool {
    is_valid_metric_name(name) && name.ends_with("_total")
}

/// `metric{a="1"} 42.5` -> `Some(42.5)`
pub fn extract_metric_value(line: &str) -> Option<f64> {
    line.split_whitespace().last()?.parse::<f64>().ok()
}

/// `metric{a="1",b="2"}` -> `{a: 1, b: 2}`
pub fn extract_labels(line: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();

    if let (Some(start), Some(end)) = (line.find('{'), line.find('}')) {
        for pair in line[start + 1..end].split(',') {
            if let Some((key, value)) = pair.split_once('=') {
                labels.insert(
                    key.trim().to_string(),
                    value.trim().trim_matches('"').to_string(),
                );
            }
        }
    }

    labels
}

/// Sample value of `metric` whose labels include every pair in `labels`
pub fn sample_value(output: &str, metric: &str, labels: &[(&str, &str)]) -> Option<f64> {
    output
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| {
            line.split(|c| c == '{' || c == ' ')
                .next()
                .map(|name| name == metric)
                .unwrap_or(false)
        })
        .find(|line| {
            let found = extract_labels(line);
            labels
                .iter()
                .all(|(k, v)| found.get(*k).map(String::as_str) == Some(*v))
        })
        .and_then(extract_metric_value)
}

/// Every HELP is followed by its TYPE and every TYPE names a known kind
pub fn validate_exposition_format(output: &str) -> Result<(), String> {
    let lines: Vec<&str> = output.lines().collect();

    for (i, line) in lines.iter().enumerate() {
        let line = line.trim();

        if line.starts_with("# HELP") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return Err(format!("Line {}: Invalid HELP format", i + 1));
            }
            let metric_name = parts[2];
            let next_line = lines.get(i + 1).map(|l| l.trim()).unwrap_or("");
            if !next_line.starts_with(&format!("# TYPE {}", metric_name)) {
                return Err(format!(
                    "Line {}: HELP not followed by TYPE for metric {}",
                    i + 1,
                    metric_name
                ));
            }
        }

        if line.starts_with("# TYPE") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return Err(format!("Line {}: Invalid TYPE format", i + 1));
            }
            let valid_types = ["counter", "gauge", "histogram", "summary", "untyped"];
            if !valid_types.contains(&parts[3]) {
                return Err(format!("Line {}: Invalid metric type '{}'", i + 1, parts[3]));
            }
        }
    }

    Ok(())
}
