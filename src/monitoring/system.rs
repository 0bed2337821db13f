//! Monitoring system: metrics, alerts, traces, health checks

use super::alerts::{
    Alert, AlertAction, AlertEvent, AlertStatus, AlertStore, AlertUpdate, InMemoryAlertStore,
};
use super::config::MonitoringConfig;
use super::dashboard::{
    count_alert_events, AlertOverview, DashboardData, HealthOverview, MetricTrend, TraceOverview,
};
use super::error::{MonitoringError, MonitoringResult};
use super::export::{self, ExportFormat};
use super::guard::TraceGuard;
use super::health::{overall_status, HealthCheck, HealthStatus};
use super::metrics::{Metric, MetricQuery, MetricSummary, MetricType, MonitoringContext};
use super::traces::{
    InMemoryTraceStore, LogLevel, Span, SpanLog, Trace, TraceFilter, TraceStatus, TraceStore,
};
use crate::events::{EventBus, OrchestratorEvent};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Entries removed by one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub metrics_removed: usize,
    pub alert_events_removed: usize,
    pub traces_removed: usize,
}

/// In-process monitoring: append-only metrics, edge-triggered alerts,
/// traces with spans and latest-wins health checks.
pub struct MonitoringSystem {
    config: MonitoringConfig,
    events: EventBus,
    metrics: RwLock<HashMap<String, Vec<Metric>>>,
    alerts: Arc<dyn AlertStore>,
    traces: Arc<dyn TraceStore>,
    health_checks: DashMap<String, HealthCheck>,
    /// Alert id -> when its condition started holding
    pending_since: DashMap<String, DateTime<Utc>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitoringSystem {
    /// Monitoring system with in-memory stores
    pub fn new(config: MonitoringConfig, events: EventBus) -> Self {
        Self::with_stores(
            config,
            events,
            Arc::new(InMemoryAlertStore::new()),
            Arc::new(InMemoryTraceStore::new()),
        )
    }

    pub fn with_stores(
        config: MonitoringConfig,
        events: EventBus,
        alerts: Arc<dyn AlertStore>,
        traces: Arc<dyn TraceStore>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            events,
            metrics: RwLock::new(HashMap::new()),
            alerts,
            traces,
            health_checks: DashMap::new(),
            pending_since: DashMap::new(),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Initialize stores and spawn the alert evaluation and retention loops
    pub async fn start(self: &Arc<Self>) -> MonitoringResult<()> {
        self.alerts.init().await?;
        self.traces.init().await?;

        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            debug!("Monitoring loops already running");
            return Ok(());
        }

        self.shutdown_tx.send_replace(false);
        tasks.push(tokio::spawn(
            self.clone()
                .run_alert_evaluation(self.shutdown_tx.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.clone()
                .run_retention_cleanup(self.shutdown_tx.subscribe()),
        ));

        info!(
            alert_interval_secs = self.config.alert_evaluation_interval_secs,
            cleanup_interval_secs = self.config.cleanup_interval_secs,
            "Monitoring system started"
        );
        Ok(())
    }

    /// Stop background loops and close the stores
    pub async fn shutdown(&self) -> MonitoringResult<()> {
        self.shutdown_tx.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Monitoring loop ended abnormally");
            }
        }

        self.alerts.close().await?;
        self.traces.close().await?;
        info!("Monitoring system stopped");
        Ok(())
    }

    async fn run_alert_evaluation(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.alert_evaluation_interval_secs,
            "Starting alert evaluation loop"
        );

        let mut ticker = tokio::time::interval(self.config.alert_evaluation_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let transitions = self.evaluate_alerts();
                    if !transitions.is_empty() {
                        debug!(transitions = transitions.len(), "Alert evaluation produced transitions");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!("Alert evaluation loop stopped");
    }

    async fn run_retention_cleanup(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.cleanup_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cleanup_expired_data();
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!("Retention cleanup loop stopped");
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    /// Append a metric; every other record path ends here
    pub fn record_metric(
        &self,
        name: &str,
        metric_type: MetricType,
        value: f64,
        labels: HashMap<String, String>,
        context: Option<&MonitoringContext>,
    ) -> Metric {
        self.record_metric_with_metadata(name, metric_type, value, labels, context, HashMap::new())
    }

    pub fn record_metric_with_metadata(
        &self,
        name: &str,
        metric_type: MetricType,
        value: f64,
        labels: HashMap<String, String>,
        context: Option<&MonitoringContext>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Metric {
        let labels = match context {
            Some(context) => context.merge_labels(labels),
            None => labels,
        };

        let metric = {
            let mut metrics = self.metrics.write();
            // Stamped under the lock so each series stays in timestamp order
            let metric = Metric {
                name: name.to_string(),
                metric_type,
                value,
                labels,
                timestamp: Utc::now(),
                metadata,
            };
            metrics
                .entry(name.to_string())
                .or_default()
                .push(metric.clone());
            metric
        };

        self.events.publish(OrchestratorEvent::MetricRecorded {
            metric: metric.clone(),
        });
        metric
    }

    pub fn increment_counter(&self, name: &str, value: f64, labels: HashMap<String, String>) -> Metric {
        self.record_metric(name, MetricType::Counter, value, labels, None)
    }

    pub fn set_gauge(&self, name: &str, value: f64, labels: HashMap<String, String>) -> Metric {
        self.record_metric(name, MetricType::Gauge, value, labels, None)
    }

    pub fn record_histogram(&self, name: &str, value: f64, labels: HashMap<String, String>) -> Metric {
        self.record_metric(name, MetricType::Histogram, value, labels, None)
    }

    pub fn record_summary(&self, name: &str, value: f64, labels: HashMap<String, String>) -> Metric {
        self.record_metric(name, MetricType::Summary, value, labels, None)
    }

    /// Entries of one metric in timestamp order
    pub fn get_metrics(&self, name: &str, query: &MetricQuery) -> Vec<Metric> {
        self.metrics
            .read()
            .get(name)
            .map(|series| query.apply(series))
            .unwrap_or_default()
    }

    pub fn latest_value(&self, name: &str) -> Option<f64> {
        self.metrics
            .read()
            .get(name)
            .and_then(|series| series.last())
            .map(|m| m.value)
    }

    /// Sum of values matching the query
    pub fn sum_metric(&self, name: &str, query: &MetricQuery) -> f64 {
        self.metrics
            .read()
            .get(name)
            .map(|series| {
                series
                    .iter()
                    .filter(|m| query.matches(m))
                    .map(|m| m.value)
                    .sum()
            })
            .unwrap_or(0.0)
    }

    pub fn get_metric_summary(&self, name: &str) -> MetricSummary {
        let metrics = self.metrics.read();
        let series = metrics.get(name).map(Vec::as_slice).unwrap_or(&[]);
        MetricSummary::from_series(name, series)
    }

    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metrics.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn export_metrics(&self, format: ExportFormat) -> MonitoringResult<String> {
        let snapshot: BTreeMap<String, Vec<Metric>> = self
            .metrics
            .read()
            .iter()
            .map(|(name, series)| (name.clone(), series.clone()))
            .collect();
        export::export_metrics(&snapshot, format)
    }

    // ========================================================================
    // Alerts
    // ========================================================================

    pub fn create_alert(&self, alert: Alert) -> MonitoringResult<Alert> {
        alert.validate()?;
        if !alert.condition.is_valid() {
            warn!(
                alert_id = %alert.id,
                condition = %alert.condition,
                "Alert condition does not parse; alert will never fire"
            );
        }

        self.alerts.insert_alert(alert.clone())?;
        info!(alert_id = %alert.id, severity = %alert.severity, "Alert created");
        self.events.publish(OrchestratorEvent::AlertCreated {
            alert: alert.clone(),
        });
        Ok(alert)
    }

    pub fn update_alert(&self, id: &str, update: AlertUpdate) -> MonitoringResult<Alert> {
        let mut alert = self
            .alerts
            .get_alert(id)
            .ok_or_else(|| MonitoringError::AlertNotFound(id.to_string()))?;

        update.apply(&mut alert);
        self.alerts.replace_alert(alert.clone())?;
        self.pending_since.remove(id);

        info!(alert_id = %id, "Alert updated");
        self.events.publish(OrchestratorEvent::AlertUpdated {
            alert: alert.clone(),
        });
        Ok(alert)
    }

    pub fn delete_alert(&self, id: &str) -> MonitoringResult<Alert> {
        let alert = self
            .alerts
            .remove_alert(id)
            .ok_or_else(|| MonitoringError::AlertNotFound(id.to_string()))?;
        self.pending_since.remove(id);

        info!(alert_id = %id, "Alert deleted");
        self.events.publish(OrchestratorEvent::AlertDeleted {
            alert_id: id.to_string(),
        });
        Ok(alert)
    }

    pub fn get_alert(&self, id: &str) -> Option<Alert> {
        self.alerts.get_alert(id)
    }

    pub fn list_alerts(&self) -> Vec<Alert> {
        self.alerts.list_alerts()
    }

    pub fn get_alert_events(&self, alert_id: Option<&str>) -> Vec<AlertEvent> {
        self.alerts.events(alert_id)
    }

    /// Latest event is a firing one inside the firing window
    pub fn is_alert_firing(&self, alert_id: &str) -> bool {
        self.alerts
            .latest_event(alert_id)
            .map(|event| {
                event.status == AlertStatus::Firing
                    && Utc::now() - event.timestamp <= self.config.firing_window()
            })
            .unwrap_or(false)
    }

    /// Evaluate every enabled alert once, returning the transitions made
    pub fn evaluate_alerts(&self) -> Vec<AlertEvent> {
        let mut transitions = Vec::new();

        for alert in self.alerts.list_alerts().into_iter().filter(|a| a.enabled) {
            if let Some(event) = self.evaluate_alert(&alert) {
                transitions.push(event);
            }
        }

        transitions
    }

    fn evaluate_alert(&self, alert: &Alert) -> Option<AlertEvent> {
        let value = match alert.condition.metric_name() {
            Some(metric) => self.latest_value(metric),
            None => {
                warn!(
                    alert_id = %alert.id,
                    condition = %alert.condition,
                    "Invalid alert condition, treating as not firing"
                );
                None
            }
        };

        let condition_met = value.map(|v| alert.condition.is_met(v)).unwrap_or(false);
        let firing = self.is_alert_firing(&alert.id);

        if !condition_met {
            self.pending_since.remove(&alert.id);
            return if firing {
                Some(self.resolve_alert(alert, value.unwrap_or_default()))
            } else {
                None
            };
        }

        if firing {
            self.pending_since.remove(&alert.id);
            return None;
        }

        if alert.duration_ms > 0 {
            let now = Utc::now();
            let since = *self
                .pending_since
                .entry(alert.id.clone())
                .or_insert(now)
                .value();
            let pending_ms = u64::try_from((now - since).num_milliseconds()).unwrap_or(0);
            if pending_ms < alert.duration_ms {
                debug!(alert_id = %alert.id, "Alert condition pending");
                return None;
            }
        }

        self.pending_since.remove(&alert.id);
        Some(self.fire_alert(alert, value.unwrap_or_default()))
    }

    fn fire_alert(&self, alert: &Alert, value: f64) -> AlertEvent {
        let event = AlertEvent::new(alert, AlertStatus::Firing, value);
        self.alerts.append_event(event.clone());

        warn!(
            alert_id = %alert.id,
            severity = %alert.severity,
            value = value,
            "Alert fired"
        );
        self.events.publish(OrchestratorEvent::AlertFired {
            alert: alert.clone(),
            event: event.clone(),
        });

        for action in &alert.actions {
            if let Err(e) = self.run_action(alert, &event, *action) {
                error!(
                    alert_id = %alert.id,
                    action = %action,
                    error = %e,
                    "Alert action failed"
                );
            }
        }

        event
    }

    fn resolve_alert(&self, alert: &Alert, value: f64) -> AlertEvent {
        let event = AlertEvent::new(alert, AlertStatus::Resolved, value);
        self.alerts.append_event(event.clone());

        info!(alert_id = %alert.id, value = value, "Alert resolved");
        self.events.publish(OrchestratorEvent::AlertResolved {
            alert: alert.clone(),
            event: event.clone(),
        });

        event
    }

    fn run_action(&self, alert: &Alert, event: &AlertEvent, action: AlertAction) -> MonitoringResult<()> {
        match action {
            AlertAction::Log => {
                error!(
                    alert_id = %alert.id,
                    alert_name = %alert.name,
                    severity = %alert.severity,
                    value = event.value,
                    threshold = event.threshold,
                    "{}",
                    event.message
                );
                Ok(())
            }
            AlertAction::Notify => self.publish_for_subscriber(
                action,
                OrchestratorEvent::AlertNotify {
                    alert: alert.clone(),
                    event: event.clone(),
                },
            ),
            AlertAction::Webhook => self.publish_for_subscriber(
                action,
                OrchestratorEvent::AlertWebhook {
                    alert: alert.clone(),
                    event: event.clone(),
                },
            ),
        }
    }

    /// Delivery is the subscriber's job; with nobody listening it cannot happen
    fn publish_for_subscriber(
        &self,
        action: AlertAction,
        event: OrchestratorEvent,
    ) -> MonitoringResult<()> {
        let name = event.name();
        self.events.publish(event);
        if self.events.subscriber_count() == 0 {
            return Err(MonitoringError::ActionFailed(format!(
                "no subscriber to deliver {} action ({})",
                action, name
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Traces
    // ========================================================================

    /// Start a trace tagged with the context labels; returns its id
    pub fn start_trace(&self, operation_name: &str, context: Option<&MonitoringContext>) -> String {
        let tags = context.map(MonitoringContext::labels).unwrap_or_default();
        let trace = Trace::new(operation_name, tags);
        let trace_id = trace.id.clone();
        self.traces.insert_trace(trace);

        debug!(trace_id = %trace_id, operation = operation_name, "Trace started");
        self.events.publish(OrchestratorEvent::TraceStarted {
            trace_id: trace_id.clone(),
            operation_name: operation_name.to_string(),
        });
        trace_id
    }

    /// Start a trace owned by a guard that finishes it on drop
    pub fn trace(self: &Arc<Self>, operation_name: &str, context: Option<&MonitoringContext>) -> TraceGuard {
        let trace_id = self.start_trace(operation_name, context);
        TraceGuard::new(self.clone(), trace_id)
    }

    pub fn add_span(
        &self,
        trace_id: &str,
        operation_name: &str,
        parent_span_id: Option<&str>,
    ) -> MonitoringResult<String> {
        let span = Span::new(trace_id, operation_name, parent_span_id);
        let span_id = span.id.clone();
        let mut pending = Some(span);

        self.traces.update_trace(trace_id, &mut |trace| {
            trace.ensure_open()?;
            if let Some(parent) = parent_span_id {
                if trace.span(parent).is_none() {
                    return Err(MonitoringError::SpanNotFound {
                        trace_id: trace.id.clone(),
                        span_id: parent.to_string(),
                    });
                }
            }
            if let Some(span) = pending.take() {
                trace.spans.push(span);
            }
            Ok(())
        })?;

        debug!(trace_id = %trace_id, span_id = %span_id, operation = operation_name, "Span started");
        self.events.publish(OrchestratorEvent::SpanStarted {
            trace_id: trace_id.to_string(),
            span_id: span_id.clone(),
            operation_name: operation_name.to_string(),
        });
        Ok(span_id)
    }

    /// Finish a span; finishing an already finished span returns it unchanged
    pub fn finish_span(
        &self,
        trace_id: &str,
        span_id: &str,
        status: TraceStatus,
    ) -> MonitoringResult<Span> {
        let mut finished = None;
        let mut newly_finished = false;

        self.traces.update_trace(trace_id, &mut |trace| {
            trace.ensure_open()?;
            let span = trace.span_mut(span_id)?;
            if !span.is_finished() {
                span.finish(status);
                newly_finished = true;
            }
            finished = Some(span.clone());
            Ok(())
        })?;

        let span = finished.ok_or_else(|| MonitoringError::SpanNotFound {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
        })?;

        if newly_finished {
            debug!(trace_id = %trace_id, span_id = %span_id, status = %status, "Span finished");
            self.events.publish(OrchestratorEvent::SpanFinished { span: span.clone() });
        }
        Ok(span)
    }

    pub fn add_span_log(
        &self,
        trace_id: &str,
        span_id: &str,
        level: LogLevel,
        message: &str,
        fields: HashMap<String, serde_json::Value>,
    ) -> MonitoringResult<()> {
        let mut entry = Some(SpanLog {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            fields,
        });

        self.traces.update_trace(trace_id, &mut |trace| {
            trace.ensure_open()?;
            let span = trace.span_mut(span_id)?;
            if let Some(log) = entry.take() {
                span.logs.push(log);
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Seal a trace; spans still open are finished with the same status
    pub fn finish_trace(
        &self,
        trace_id: &str,
        status: TraceStatus,
        metadata: HashMap<String, serde_json::Value>,
    ) -> MonitoringResult<Trace> {
        let mut metadata = Some(metadata);

        let trace = self.traces.update_trace(trace_id, &mut |trace| {
            trace.ensure_open()?;
            for span in trace.spans.iter_mut().filter(|s| !s.is_finished()) {
                span.finish(status);
            }
            trace.finish(status, metadata.take().unwrap_or_default())
        })?;

        debug!(
            trace_id = %trace_id,
            status = %status,
            duration_ms = trace.duration_ms.unwrap_or_default(),
            "Trace finished"
        );
        self.events.publish(OrchestratorEvent::TraceFinished {
            trace: trace.clone(),
        });
        Ok(trace)
    }

    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        self.traces.get_trace(trace_id)
    }

    /// Matching traces, newest first
    pub fn get_traces(&self, filter: &TraceFilter) -> Vec<Trace> {
        self.traces.list_traces(filter)
    }

    // ========================================================================
    // Health checks
    // ========================================================================

    /// Store a check result; replaces any earlier result with the same name
    pub fn record_health_check(&self, check: HealthCheck) {
        match check.status {
            HealthStatus::Healthy => debug!(check = %check.name, "Health check healthy"),
            status => warn!(check = %check.name, status = %status, "Health check not healthy"),
        }

        self.health_checks.insert(check.name.clone(), check.clone());
        self.events
            .publish(OrchestratorEvent::HealthRecorded { check });
    }

    pub fn get_health_check(&self, name: &str) -> Option<HealthCheck> {
        self.health_checks.get(name).map(|entry| entry.clone())
    }

    /// All checks sorted by name
    pub fn get_health_checks(&self) -> Vec<HealthCheck> {
        let mut checks: Vec<HealthCheck> = self
            .health_checks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        checks.sort_by(|a, b| a.name.cmp(&b.name));
        checks
    }

    pub fn overall_health(&self) -> HealthStatus {
        overall_status(&self.get_health_checks())
    }

    // ========================================================================
    // Dashboard and retention
    // ========================================================================

    pub fn get_dashboard_data(&self) -> DashboardData {
        let metrics = self
            .metrics
            .read()
            .iter()
            .filter_map(|(name, series)| {
                MetricTrend::from_series(series).map(|trend| (name.clone(), trend))
            })
            .collect();

        let alerts = self.alerts.list_alerts();
        let (firing_events, resolved_events) = count_alert_events(&self.alerts.events(None));
        let currently_firing = alerts
            .iter()
            .filter(|a| self.is_alert_firing(&a.id))
            .map(|a| a.id.clone())
            .collect();

        let traces = self.traces.list_traces(&TraceFilter::default());

        DashboardData {
            generated_at: Utc::now(),
            metrics,
            alerts: AlertOverview {
                total: alerts.len(),
                enabled: alerts.iter().filter(|a| a.enabled).count(),
                firing_events,
                resolved_events,
                currently_firing,
            },
            traces: TraceOverview::from_traces(&traces),
            health: HealthOverview::from_checks(&self.get_health_checks()),
        }
    }

    /// Prune metrics, alert events and traces past their retention
    pub fn cleanup_expired_data(&self) -> CleanupReport {
        let now = Utc::now();
        let metrics_cutoff = now - self.config.metrics_retention();

        let metrics_removed = {
            let mut metrics = self.metrics.write();
            let mut removed = 0;
            for series in metrics.values_mut() {
                let before = series.len();
                series.retain(|m| m.timestamp >= metrics_cutoff);
                removed += before - series.len();
            }
            metrics.retain(|_, series| !series.is_empty());
            removed
        };

        let report = CleanupReport {
            metrics_removed,
            alert_events_removed: self.alerts.prune_events(now - self.config.alert_retention()),
            traces_removed: self.traces.prune(now - self.config.trace_retention()),
        };

        info!(
            metrics_removed = report.metrics_removed,
            alert_events_removed = report.alert_events_removed,
            traces_removed = report.traces_removed,
            "Monitoring retention cleanup completed"
        );
        self.events.publish(OrchestratorEvent::MonitoringCleanup {
            metrics_removed: report.metrics_removed,
            alert_events_removed: report.alert_events_removed,
            traces_removed: report.traces_removed,
        });

        report
    }
}
