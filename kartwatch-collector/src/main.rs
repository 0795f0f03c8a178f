//! kartwatch-collector - karting telemetry ingestion service
//!
//! Runs two independent polling loops for the lifetime of the process:
//! the live-timing collector and the weather gatherer. Both share the same
//! database but no in-memory state, and both stop promptly on SIGINT or
//! SIGTERM.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kartwatch_collector::db::{HistoryRepository, InvalidLapBounds};
use kartwatch_collector::services::{
    Collector, CollectorSettings, TimingClient, WeatherClient, WeatherGatherer,
};
use kartwatch_common::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kartwatch_collector=info,kartwatch_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting kartwatch-collector");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load().context("Failed to load configuration")?;
    info!("Database: {}", config.database_path.display());

    let pool = kartwatch_common::db::init_database_pool(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    info!("Database connection established");

    let repository = Arc::new(HistoryRepository::new(
        pool.clone(),
        InvalidLapBounds {
            below_secs: config.invalid_lap_below_secs,
            above_secs: config.invalid_lap_above_secs,
        },
    ));

    let timing_client = TimingClient::new(config.timing_url.clone(), config.http_timeout())
        .context("Failed to create live-timing client")?;

    let collector = Collector::new(
        timing_client,
        Arc::clone(&repository),
        pool.clone(),
        CollectorSettings::from_config(&config),
    )
    .await
    .context("Failed to initialize collector")?;

    let cancel = CancellationToken::new();

    let collector_task = tokio::spawn(collector.run(cancel.clone()));

    // The weather loop is optional: without an API key only lap ingestion runs
    let weather_task = match &config.weather_api_key {
        Some(api_key) => {
            let weather_client = WeatherClient::new(
                config.weather_url.clone(),
                api_key.clone(),
                config.weather_location.clone(),
                config.http_timeout(),
            )
            .context("Failed to create weather client")?;

            let gatherer =
                WeatherGatherer::new(weather_client, pool.clone(), config.weather_interval());
            Some(tokio::spawn(gatherer.run(cancel.clone())))
        }
        None => {
            tracing::warn!("No weather API key configured, weather gathering disabled");
            None
        }
    };

    shutdown_signal().await;
    info!("Shutdown signal received, stopping loops");
    cancel.cancel();

    collector_task.await.context("Collector task panicked")?;
    if let Some(task) = weather_task {
        task.await.context("Weather task panicked")?;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
