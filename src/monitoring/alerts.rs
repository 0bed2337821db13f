//! Alert definitions, conditions and alert storage

use super::error::{MonitoringError, MonitoringResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use strum::{Display, EnumString};

lazy_static! {
    static ref CONDITION_PATTERN: Regex =
        Regex::new(r"^\s*([A-Za-z0-9_.:\-]+)\s*(>=|<=|==|!=|>|<)\s*(-?\d+(?:\.\d+)?)\s*$")
            .expect("condition pattern is valid");
}

/// Alert severity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// What to do when an alert fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertAction {
    /// Structured error log
    Log,
    /// `alert:notify` event for an external notifier
    Notify,
    /// `alert:webhook` event; delivery belongs to the subscriber
    Webhook,
}

/// Comparison between the latest metric value and a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::GreaterOrEqual => ">=",
            ComparisonOperator::LessOrEqual => "<=",
            ComparisonOperator::Equal => "==",
            ComparisonOperator::NotEqual => "!=",
        }
    }

    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            ComparisonOperator::GreaterThan => value > threshold,
            ComparisonOperator::LessThan => value < threshold,
            ComparisonOperator::GreaterOrEqual => value >= threshold,
            ComparisonOperator::LessOrEqual => value <= threshold,
            ComparisonOperator::Equal => (value - threshold).abs() < f64::EPSILON,
            ComparisonOperator::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

impl FromStr for ComparisonOperator {
    type Err = MonitoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(ComparisonOperator::GreaterThan),
            "<" => Ok(ComparisonOperator::LessThan),
            ">=" => Ok(ComparisonOperator::GreaterOrEqual),
            "<=" => Ok(ComparisonOperator::LessOrEqual),
            "==" => Ok(ComparisonOperator::Equal),
            "!=" => Ok(ComparisonOperator::NotEqual),
            other => Err(MonitoringError::Validation(format!(
                "unknown comparison operator '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Typed alert condition.
///
/// Serialized as `"<metric> <op> <threshold>"`. Strings that do not match the
/// grammar are kept as [`AlertCondition::Invalid`] and never fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlertCondition {
    Threshold {
        metric: String,
        operator: ComparisonOperator,
        threshold: f64,
    },
    Invalid {
        expression: String,
    },
}

impl AlertCondition {
    pub fn threshold(metric: impl Into<String>, operator: ComparisonOperator, threshold: f64) -> Self {
        AlertCondition::Threshold {
            metric: metric.into(),
            operator,
            threshold,
        }
    }

    /// Parse the string grammar; never fails
    pub fn parse(expression: &str) -> Self {
        let parsed = CONDITION_PATTERN.captures(expression).and_then(|caps| {
            let operator = caps[2].parse::<ComparisonOperator>().ok()?;
            let threshold = caps[3].parse::<f64>().ok()?;
            Some(AlertCondition::threshold(&caps[1], operator, threshold))
        });

        parsed.unwrap_or_else(|| AlertCondition::Invalid {
            expression: expression.to_string(),
        })
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, AlertCondition::Threshold { .. })
    }

    pub fn metric_name(&self) -> Option<&str> {
        match self {
            AlertCondition::Threshold { metric, .. } => Some(metric),
            AlertCondition::Invalid { .. } => None,
        }
    }

    pub fn threshold_value(&self) -> Option<f64> {
        match self {
            AlertCondition::Threshold { threshold, .. } => Some(*threshold),
            AlertCondition::Invalid { .. } => None,
        }
    }

    /// Whether `value` satisfies the condition
    pub fn is_met(&self, value: f64) -> bool {
        match self {
            AlertCondition::Threshold {
                operator,
                threshold,
                ..
            } => operator.compare(value, *threshold),
            AlertCondition::Invalid { .. } => false,
        }
    }
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertCondition::Threshold {
                metric,
                operator,
                threshold,
            } => write!(f, "{} {} {}", metric, operator, threshold),
            AlertCondition::Invalid { expression } => f.write_str(expression),
        }
    }
}

impl From<&str> for AlertCondition {
    fn from(expression: &str) -> Self {
        AlertCondition::parse(expression)
    }
}

impl From<String> for AlertCondition {
    fn from(expression: String) -> Self {
        AlertCondition::parse(&expression)
    }
}

impl From<AlertCondition> for String {
    fn from(condition: AlertCondition) -> Self {
        condition.to_string()
    }
}

/// Alert definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub condition: AlertCondition,
    pub severity: AlertSeverity,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How long the condition must hold before firing (ms)
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub actions: Vec<AlertAction>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        id: impl Into<String>,
        condition: impl Into<AlertCondition>,
        severity: AlertSeverity,
    ) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            condition: condition.into(),
            severity,
            enabled: true,
            duration_ms: 0,
            actions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_actions(mut self, actions: Vec<AlertAction>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn validate(&self) -> MonitoringResult<()> {
        if self.id.trim().is_empty() {
            return Err(MonitoringError::Validation("alert id must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Partial update applied by `update_alert`
#[derive(Debug, Clone, Default)]
pub struct AlertUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub condition: Option<AlertCondition>,
    pub severity: Option<AlertSeverity>,
    pub enabled: Option<bool>,
    pub duration_ms: Option<u64>,
    pub actions: Option<Vec<AlertAction>>,
}

impl AlertUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn condition(mut self, condition: impl Into<AlertCondition>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn actions(mut self, actions: Vec<AlertAction>) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn apply(self, alert: &mut Alert) {
        if let Some(name) = self.name {
            alert.name = name;
        }
        if let Some(description) = self.description {
            alert.description = description;
        }
        if let Some(condition) = self.condition {
            alert.condition = condition;
        }
        if let Some(severity) = self.severity {
            alert.severity = severity;
        }
        if let Some(enabled) = self.enabled {
            alert.enabled = enabled;
        }
        if let Some(duration_ms) = self.duration_ms {
            alert.duration_ms = duration_ms;
        }
        if let Some(actions) = self.actions {
            alert.actions = actions;
        }
        alert.updated_at = Utc::now();
    }
}

/// Firing state recorded by an alert event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

/// One firing or resolution transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    pub alert_id: String,
    pub status: AlertStatus,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(alert: &Alert, status: AlertStatus, value: f64) -> Self {
        let message = match status {
            AlertStatus::Firing => format!(
                "Alert '{}' firing: {} (current value {})",
                alert.name, alert.condition, value
            ),
            AlertStatus::Resolved => format!(
                "Alert '{}' resolved: {} (current value {})",
                alert.name, alert.condition, value
            ),
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alert_id: alert.id.clone(),
            status,
            value,
            threshold: alert.condition.threshold_value().unwrap_or_default(),
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Storage for alert definitions and their event history
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn init(&self) -> MonitoringResult<()>;

    async fn close(&self) -> MonitoringResult<()>;

    /// Register an alert; fails when the id is taken
    fn insert_alert(&self, alert: Alert) -> MonitoringResult<()>;

    /// Replace an existing alert; fails when the id is unknown
    fn replace_alert(&self, alert: Alert) -> MonitoringResult<()>;

    fn get_alert(&self, id: &str) -> Option<Alert>;

    fn remove_alert(&self, id: &str) -> Option<Alert>;

    fn list_alerts(&self) -> Vec<Alert>;

    fn append_event(&self, event: AlertEvent);

    /// Events in append order, optionally for one alert
    fn events(&self, alert_id: Option<&str>) -> Vec<AlertEvent>;

    fn latest_event(&self, alert_id: &str) -> Option<AlertEvent>;

    /// Drop events older than `cutoff`, returning how many were removed
    fn prune_events(&self, cutoff: DateTime<Utc>) -> usize;
}

/// In-memory alert store
#[derive(Clone, Default)]
pub struct InMemoryAlertStore {
    alerts: Arc<DashMap<String, Alert>>,
    events: Arc<RwLock<Vec<AlertEvent>>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn init(&self) -> MonitoringResult<()> {
        Ok(())
    }

    async fn close(&self) -> MonitoringResult<()> {
        self.alerts.clear();
        self.events.write().clear();
        Ok(())
    }

    fn insert_alert(&self, alert: Alert) -> MonitoringResult<()> {
        match self.alerts.entry(alert.id.clone()) {
            Entry::Occupied(entry) => Err(MonitoringError::AlertAlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(alert);
                Ok(())
            }
        }
    }

    fn replace_alert(&self, alert: Alert) -> MonitoringResult<()> {
        match self.alerts.get_mut(&alert.id) {
            Some(mut existing) => {
                *existing = alert;
                Ok(())
            }
            None => Err(MonitoringError::AlertNotFound(alert.id)),
        }
    }

    fn get_alert(&self, id: &str) -> Option<Alert> {
        self.alerts.get(id).map(|entry| entry.clone())
    }

    fn remove_alert(&self, id: &str) -> Option<Alert> {
        self.alerts.remove(id).map(|(_, alert)| alert)
    }

    fn list_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.alerts.iter().map(|e| e.value().clone()).collect();
        alerts.sort_by(|a, b| a.id.cmp(&b.id));
        alerts
    }

    fn append_event(&self, event: AlertEvent) {
        self.events.write().push(event);
    }

    fn events(&self, alert_id: Option<&str>) -> Vec<AlertEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| alert_id.map(|id| e.alert_id == id).unwrap_or(true))
            .cloned()
            .collect()
    }

    fn latest_event(&self, alert_id: &str) -> Option<AlertEvent> {
        self.events
            .read()
            .iter()
            .rev()
            .find(|e| e.alert_id == alert_id)
            .cloned()
    }

    fn prune_events(&self, cutoff: DateTime<Utc>) -> usize {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        before - events.len()
    }
}

fn default_true() -> bool {
    true
}
