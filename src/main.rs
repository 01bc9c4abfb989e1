// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::application::dashboard_service::DashboardService;
use crate::application::snapshot_aggregator::LiveSnapshotAggregator;
use crate::domain::measurement::FieldMapping;
use crate::domain::snapshot::FieldFilter;
use crate::infrastructure::config::load_config;
use crate::infrastructure::influx_repository::InfluxRepository;
use crate::infrastructure::mqtt_connection::ConnectionManager;
use crate::presentation::app_state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = load_config()?;
    config.log_config();
    let fields = FieldMapping::with_overrides(&config.fields);

    // Create repository (infrastructure layer)
    let repository = Arc::new(InfluxRepository::new(&config.influx, fields.clone()));

    // Create dispatcher (application layer)
    let aggregator = LiveSnapshotAggregator::new(
        fields,
        FieldFilter::new(config.dashboard.suppressed_fields.iter().cloned()),
    );
    let service = DashboardService::new(
        aggregator,
        repository,
        config.dashboard.default_measurement,
        config.dashboard.auto_refresh,
        Duration::from_secs(config.dashboard.refresh_period_secs),
        Duration::from_secs(config.dashboard.age_refresh_secs),
    );
    let (commands_tx, commands_rx) = mpsc::channel(32);
    let state = Arc::new(AppState {
        view: service.subscribe(),
        commands: commands_tx,
    });

    let connection = ConnectionManager::connect(&config.broker);
    let shutdown = CancellationToken::new();
    let dispatcher = tokio::spawn(service.run(connection, commands_rx, shutdown.clone()));

    // Build router (presentation layer) and start server
    let addr: SocketAddr = config.server.bind.parse()?;
    tracing::info!("Starting tree-telemetry service on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, presentation::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Tear down the transport, refresh timer and age ticker whatever the server outcome
    shutdown.cancel();
    if let Err(e) = dispatcher.await {
        tracing::error!("Dashboard dispatcher failed: {}", e);
    }

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
