//! Alert evaluation tests: edge-triggered firing, resolution, pending
//! durations, actions and the background evaluation loop

mod common;

use common::{events_named, orchestrator, orchestrator_with, wait_until};
use omni_orchestrator::events::OrchestratorEvent;
use omni_orchestrator::monitoring::{
    Alert, AlertAction, AlertSeverity, AlertStatus, AlertUpdate, MonitoringConfig,
};
use std::collections::HashMap;
use std::time::Duration;

#[tokio::test]
async fn test_alert_resolves_when_condition_clears() {
    let orch = orchestrator();
    let mut rx = orch.events.subscribe();
    let monitoring = &orch.monitoring;

    monitoring
        .create_alert(Alert::new("queue-depth", "depth >= 100", AlertSeverity::Medium))
        .unwrap();

    monitoring.set_gauge("depth", 150.0, HashMap::new());
    let fired = monitoring.evaluate_alerts();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].status, AlertStatus::Firing);
    assert_eq!(fired[0].threshold, 100.0);
    assert!(monitoring.is_alert_firing("queue-depth"));

    monitoring.set_gauge("depth", 20.0, HashMap::new());
    let resolved = monitoring.evaluate_alerts();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].status, AlertStatus::Resolved);
    assert!(!monitoring.is_alert_firing("queue-depth"));

    // Nothing left to resolve
    assert!(monitoring.evaluate_alerts().is_empty());

    assert_eq!(events_named(&mut rx, "alert:fired").len(), 1);
    let history = monitoring.get_alert_events(Some("queue-depth"));
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, AlertStatus::Firing);
    assert_eq!(history[1].status, AlertStatus::Resolved);
}

#[tokio::test]
async fn test_alert_events_published() {
    let orch = orchestrator();
    let mut rx = orch.events.subscribe();
    let monitoring = &orch.monitoring;

    monitoring
        .create_alert(Alert::new("errs", "errors > 0", AlertSeverity::Low))
        .unwrap();
    monitoring.increment_counter("errors", 1.0, HashMap::new());
    monitoring.evaluate_alerts();
    monitoring.increment_counter("errors", 0.0, HashMap::new());
    monitoring.evaluate_alerts();

    let names: Vec<&'static str> = common::drain_events(&mut rx)
        .iter()
        .map(|e| e.name())
        .filter(|name| name.starts_with("alert:"))
        .collect();
    assert_eq!(names, vec!["alert:created", "alert:fired", "alert:resolved"]);
}

#[tokio::test]
async fn test_pending_duration_delays_firing() {
    let orch = orchestrator();
    let monitoring = &orch.monitoring;

    monitoring
        .create_alert(
            Alert::new("slow", "latency > 500", AlertSeverity::High).with_duration_ms(100),
        )
        .unwrap();

    monitoring.set_gauge("latency", 900.0, HashMap::new());
    assert!(monitoring.evaluate_alerts().is_empty());

    tokio::time::sleep(Duration::from_millis(130)).await;
    let fired = monitoring.evaluate_alerts();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].alert_id, "slow");
}

#[tokio::test]
async fn test_pending_resets_when_condition_drops() {
    let orch = orchestrator();
    let monitoring = &orch.monitoring;

    monitoring
        .create_alert(
            Alert::new("blip", "latency > 500", AlertSeverity::High).with_duration_ms(100),
        )
        .unwrap();

    monitoring.set_gauge("latency", 900.0, HashMap::new());
    assert!(monitoring.evaluate_alerts().is_empty());
    monitoring.set_gauge("latency", 100.0, HashMap::new());
    assert!(monitoring.evaluate_alerts().is_empty());

    tokio::time::sleep(Duration::from_millis(130)).await;
    monitoring.set_gauge("latency", 900.0, HashMap::new());
    // Pending restarted, so still not long enough
    assert!(monitoring.evaluate_alerts().is_empty());
}

#[tokio::test]
async fn test_unbounded_pending_duration_never_fires() {
    let orch = orchestrator();
    let monitoring = &orch.monitoring;

    monitoring
        .create_alert(
            Alert::new("forever", "latency > 500", AlertSeverity::High)
                .with_duration_ms(u64::MAX),
        )
        .unwrap();

    monitoring.set_gauge("latency", 900.0, HashMap::new());
    assert!(monitoring.evaluate_alerts().is_empty());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(monitoring.evaluate_alerts().is_empty());
    assert!(!monitoring.is_alert_firing("forever"));
}

#[tokio::test]
async fn test_disabled_and_invalid_alerts_never_fire() {
    let orch = orchestrator();
    let monitoring = &orch.monitoring;

    monitoring
        .create_alert(Alert::new("off", "errors > 1", AlertSeverity::Info).with_enabled(false))
        .unwrap();
    let invalid = monitoring
        .create_alert(Alert::new("garbled", "errors >>> one", AlertSeverity::Info))
        .unwrap();
    assert!(!invalid.condition.is_valid());

    monitoring.set_gauge("errors", 50.0, HashMap::new());
    assert!(monitoring.evaluate_alerts().is_empty());

    // Re-enabling makes it eligible
    monitoring
        .update_alert("off", AlertUpdate::new().enabled(true))
        .unwrap();
    assert_eq!(monitoring.evaluate_alerts().len(), 1);
}

#[tokio::test]
async fn test_alert_without_metric_data_does_not_fire() {
    let orch = orchestrator();
    orch.monitoring
        .create_alert(Alert::new("ghost", "never_recorded > 0", AlertSeverity::Low))
        .unwrap();
    assert!(orch.monitoring.evaluate_alerts().is_empty());
}

#[tokio::test]
async fn test_notify_and_webhook_actions_publish_requests() {
    let orch = orchestrator();
    let mut rx = orch.events.subscribe();

    orch.monitoring
        .create_alert(
            Alert::new("page", "errors > 5", AlertSeverity::Critical)
                .with_actions(vec![AlertAction::Log, AlertAction::Notify, AlertAction::Webhook]),
        )
        .unwrap();
    orch.monitoring.set_gauge("errors", 6.0, HashMap::new());
    orch.monitoring.evaluate_alerts();

    let events = common::drain_events(&mut rx);
    let notify = events
        .iter()
        .find(|e| e.name() == "alert:notify")
        .expect("no notify request");
    match &notify.event {
        OrchestratorEvent::AlertNotify { alert, event } => {
            assert_eq!(alert.id, "page");
            assert_eq!(event.value, 6.0);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(events.iter().any(|e| e.name() == "alert:webhook"));
}

#[tokio::test]
async fn test_failing_action_does_not_block_firing() {
    let orch = orchestrator();
    // No subscribers: the notify action fails and is only logged
    orch.monitoring
        .create_alert(
            Alert::new("lonely", "errors > 5", AlertSeverity::High)
                .with_actions(vec![AlertAction::Notify]),
        )
        .unwrap();
    orch.monitoring.set_gauge("errors", 9.0, HashMap::new());

    let fired = orch.monitoring.evaluate_alerts();
    assert_eq!(fired.len(), 1);
    assert!(orch.monitoring.is_alert_firing("lonely"));
}

#[tokio::test]
async fn test_firing_window_expiry_allows_refire() {
    let config = MonitoringConfig {
        firing_window_secs: 0,
        ..Default::default()
    };
    let orch = orchestrator_with(common::fast_queue_config(), config);

    orch.monitoring
        .create_alert(Alert::new("hot", "temp > 80", AlertSeverity::Medium))
        .unwrap();
    orch.monitoring.set_gauge("temp", 95.0, HashMap::new());

    assert_eq!(orch.monitoring.evaluate_alerts().len(), 1);
    tokio::time::sleep(Duration::from_millis(5)).await;
    // The previous firing aged out of the window, so the alert fires again
    assert_eq!(orch.monitoring.evaluate_alerts().len(), 1);
}

#[tokio::test]
async fn test_background_evaluation_loop() {
    let config = MonitoringConfig {
        alert_evaluation_interval_secs: 1,
        ..Default::default()
    };
    let orch = orchestrator_with(common::fast_queue_config(), config);

    orch.monitoring
        .create_alert(Alert::new("bg", "queue_depth > 10", AlertSeverity::High))
        .unwrap();
    orch.monitoring.set_gauge("queue_depth", 11.0, HashMap::new());
    orch.monitoring.start().await.unwrap();

    let monitoring = orch.monitoring.clone();
    assert!(wait_until(Duration::from_secs(3), || monitoring.is_alert_firing("bg")).await);

    orch.monitoring.shutdown().await.unwrap();
    assert_eq!(orch.monitoring.get_alert_events(Some("bg")).len(), 1);
}

#[tokio::test]
async fn test_dashboard_reflects_alerts() {
    let orch = orchestrator();
    orch.monitoring
        .create_alert(Alert::new("d1", "load > 1", AlertSeverity::Low))
        .unwrap();
    orch.monitoring
        .create_alert(Alert::new("d2", "load > 100", AlertSeverity::Low).with_enabled(false))
        .unwrap();
    orch.monitoring.set_gauge("load", 5.0, HashMap::new());
    orch.monitoring.evaluate_alerts();

    let dashboard = orch.monitoring.get_dashboard_data();
    assert_eq!(dashboard.alerts.total, 2);
    assert_eq!(dashboard.alerts.enabled, 1);
    assert_eq!(dashboard.alerts.firing_events, 1);
    assert_eq!(dashboard.alerts.currently_firing, vec!["d1".to_string()]);
}
