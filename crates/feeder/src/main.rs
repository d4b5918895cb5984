//! Discovery feeder - file-based service discovery for self-registering agents
//!
//! Agents register over HTTP; a reconciliation loop turns the registry into
//! target groups and a writer keeps the discovery file watched by the
//! metrics collector up to date.

use anyhow::Result;
use feeder_lib::{
    health::{components, HealthRegistry},
    observability::{FeederMetrics, StructuredLogger},
    FileSdWriter, ReconcilerBuilder, Registry,
};
use sd_feeder::{api, config::FeederConfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const FEEDER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting sd-feeder");

    let config = FeederConfig::load()?;
    info!(node_name = %config.node_name, "Feeder configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::RECONCILER).await;
    health_registry.register(components::FILE_SD_WRITER).await;

    let metrics = FeederMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);
    let registry = Arc::new(Registry::new());

    let (reconciler, groups_rx) = ReconcilerBuilder::new()
        .registry(registry.clone())
        .health(health_registry.clone())
        .refresh_interval(config.refresh_interval())
        .channel_capacity(config.channel_capacity)
        .build()?;
    let writer = FileSdWriter::new(&config.sd_file_path).with_health(health_registry.clone());

    let listener = api::bind(config.listen_port).await?;
    let (shutdown_tx, _) = broadcast::channel(1);

    let reconciler_handle = tokio::spawn(reconciler.run(shutdown_tx.subscribe()));
    let writer_handle = tokio::spawn(writer.run(groups_rx));

    let app_state = Arc::new(api::AppState::new(
        registry,
        health_registry.clone(),
        metrics,
        logger.clone(),
    ));
    let mut api_handle = tokio::spawn(api::serve(listener, app_state, shutdown_tx.subscribe()));

    health_registry.set_ready(true).await;
    logger.log_startup(FEEDER_VERSION, config.refresh_interval(), &config.sd_file_path);

    let api_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
            None
        }
        result = &mut api_handle => {
            logger.log_shutdown("API server stopped");
            Some(result)
        }
    };

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    // The writer stops once the reconciler drops its end of the channel
    reconciler_handle.await?;
    writer_handle.await?;

    match api_result {
        Some(result) => result??,
        None => api_handle.await??,
    }

    info!("Shutting down");
    Ok(())
}
