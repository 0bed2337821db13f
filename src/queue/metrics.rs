//! Prometheus metrics for queue traffic

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};

/// Queue metrics
pub struct QueueMetrics {
    /// Messages accepted by send
    pub messages_sent: CounterVec,

    /// Messages handed out by receive
    pub messages_received: CounterVec,

    pub messages_acknowledged: CounterVec,

    pub messages_rejected: CounterVec,

    /// Messages moved to a dead-letter store
    pub messages_dead_lettered: CounterVec,

    /// In-flight leases released by the visibility sweep
    pub visibility_expired: CounterVec,

    /// Live messages per queue
    pub queue_depth: GaugeVec,

    /// Running consumer loops
    pub active_consumers: Gauge,

    /// Handler latency
    pub handler_duration: HistogramVec,
}

lazy_static! {
    pub static ref QUEUE_METRICS: QueueMetrics = QueueMetrics {
        messages_sent: register_counter_vec!(
            "orchestrator_queue_messages_sent_total",
            "Total number of messages sent",
            &["queue", "priority"]
        )
        .expect("Failed to create orchestrator_queue_messages_sent_total"),

        messages_received: register_counter_vec!(
            "orchestrator_queue_messages_received_total",
            "Total number of messages received",
            &["queue"]
        )
        .expect("Failed to create orchestrator_queue_messages_received_total"),

        messages_acknowledged: register_counter_vec!(
            "orchestrator_queue_messages_acknowledged_total",
            "Total number of messages acknowledged",
            &["queue"]
        )
        .expect("Failed to create orchestrator_queue_messages_acknowledged_total"),

        messages_rejected: register_counter_vec!(
            "orchestrator_queue_messages_rejected_total",
            "Total number of messages rejected",
            &["queue"]
        )
        .expect("Failed to create orchestrator_queue_messages_rejected_total"),

        messages_dead_lettered: register_counter_vec!(
            "orchestrator_queue_messages_dead_lettered_total",
            "Total number of messages moved to a dead letter queue",
            &["queue", "reason"]
        )
        .expect("Failed to create orchestrator_queue_messages_dead_lettered_total"),

        visibility_expired: register_counter_vec!(
            "orchestrator_queue_visibility_expired_total",
            "Total number of in-flight messages returned after visibility timeout",
            &["queue"]
        )
        .expect("Failed to create orchestrator_queue_visibility_expired_total"),

        queue_depth: register_gauge_vec!(
            "orchestrator_queue_depth",
            "Number of live messages in the queue",
            &["queue"]
        )
        .expect("Failed to create orchestrator_queue_depth"),

        active_consumers: register_gauge!(
            "orchestrator_queue_active_consumers",
            "Number of running consumer loops"
        )
        .expect("Failed to create orchestrator_queue_active_consumers"),

        handler_duration: register_histogram_vec!(
            "orchestrator_queue_handler_duration_seconds",
            "Message handler latency in seconds",
            &["queue", "outcome"],
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
        )
        .expect("Failed to create orchestrator_queue_handler_duration_seconds"),
    };
}

/// Force registration of the queue metrics
pub fn init_queue_metrics() {
    lazy_static::initialize(&QUEUE_METRICS);
}

/// Render every registered metric in the Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
