//! Monitoring system
//!
//! Append-only metrics, threshold alerts with edge-triggered firing and
//! resolution, traces made of spans, latest-wins health checks, a derived
//! dashboard and retention cleanup.

pub mod alerts;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod export;
pub mod guard;
pub mod health;
pub mod metrics;
pub mod system;
pub mod traces;

pub use alerts::{
    Alert, AlertAction, AlertCondition, AlertEvent, AlertSeverity, AlertStatus, AlertStore,
    AlertUpdate, ComparisonOperator, InMemoryAlertStore,
};
pub use config::MonitoringConfig;
pub use dashboard::{AlertOverview, DashboardData, HealthOverview, MetricTrend, TraceOverview};
pub use error::{MonitoringError, MonitoringResult};
pub use export::ExportFormat;
pub use guard::{SpanGuard, TraceGuard};
pub use health::{HealthCheck, HealthStatus};
pub use metrics::{labels, Metric, MetricQuery, MetricSummary, MetricType, MonitoringContext};
pub use system::{CleanupReport, MonitoringSystem};
pub use traces::{
    InMemoryTraceStore, LogLevel, Span, SpanLog, Trace, TraceFilter, TraceStatus, TraceStore,
};
