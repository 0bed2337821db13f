use clap::Parser;
use omni_orchestrator::{
    config::Config,
    events::EventBus,
    monitoring::{HealthCheck, HealthStatus, MonitoringSystem},
    queue::{init_queue_metrics, QueueManager},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "omni-orchestrator")]
#[command(about = "In-process message queue and monitoring orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log level used when RUST_LOG is unset
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration before logging so the log settings apply
    let config = Config::load(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    init_tracing(&cli, &config);

    tracing::info!("Starting Omni Orchestrator v{}", env!("CARGO_PKG_VERSION"));

    if config.observability.prometheus_enabled {
        init_queue_metrics();
        tracing::info!("Prometheus queue metrics initialized");
    } else {
        tracing::info!("Prometheus queue metrics disabled in configuration");
    }

    let events = EventBus::new(config.events.capacity);

    let monitoring = Arc::new(MonitoringSystem::new(config.monitoring.clone(), events.clone()));
    monitoring.start().await?;
    tracing::info!("Monitoring system initialized");

    let queue_manager = Arc::new(QueueManager::new(
        config.queue.clone(),
        monitoring.clone(),
        events.clone(),
    ));
    queue_manager.init().await?;
    tracing::info!(
        queues = config.queue.queues.len(),
        "Queue manager initialized"
    );

    monitoring.record_health_check(
        HealthCheck::new("queue_manager", HealthStatus::Healthy)
            .with_message(format!("{} queues registered", queue_manager.list_queues().len())),
    );

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    tracing::info!("Shutting down gracefully...");
    queue_manager.shutdown().await?;
    monitoring.shutdown().await?;
    Ok(())
}

fn init_tracing(cli: &Cli, config: &Config) {
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("omni_orchestrator={}", level).into());

    if cli.json_logs || config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
