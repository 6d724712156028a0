//! lastinfo Persistence Worker Entry Point
//!
//! Bootstraps configuration, connects to PostgreSQL and runs the
//! persistence worker and event log retention until Ctrl-C.

use std::sync::Arc;

use lastinfo_service::{
    event_retention_task, init_tracing, open_cache, Backends, PersistenceWorker, RetentionConfig,
    ServiceConfig, ServiceResult, TelemetryConfig,
};
use lastinfo_storage::CacheStore;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ServiceResult<()> {
    init_tracing(&TelemetryConfig::for_service("lastinfo-worker"))?;

    let config = ServiceConfig::from_env()?;
    config.validate_worker()?;

    let backends = Backends::connect(&config).await?;
    let cache: Option<Arc<dyn CacheStore>> = if config.worker.skip_stale_against_cache {
        Some(open_cache(&config)?)
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let retention = RetentionConfig {
        topic: config.worker.topic.clone(),
        interval: config.event_retention_interval,
    };
    let retention_handle = tokio::spawn(event_retention_task(
        backends.channel.clone(),
        retention,
        shutdown_rx.clone(),
    ));

    let worker = PersistenceWorker::new(backends.channel, backends.store, cache, config.worker);
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    match worker_handle.await {
        Ok(metrics) => tracing::info!(metrics = ?metrics.snapshot(), "Persistence worker stopped"),
        Err(e) => tracing::error!(error = %e, "Persistence worker task failed"),
    }
    match retention_handle.await {
        Ok(metrics) => tracing::info!(metrics = ?metrics.snapshot(), "Event retention stopped"),
        Err(e) => tracing::error!(error = %e, "Event retention task failed"),
    }

    Ok(())
}
