//! One-shot GetLatest
//!
//! Prints the freshest obtainable payload to stdout, falling back from the
//! origin to the cache and then the durable store. Exits with status 2 when
//! nothing could be served.
//!
//! Usage:
//!   LASTINFO_ORIGIN_URL=https://example.org/latest.json cargo run -p lastinfo-service --bin lastinfo-get

use std::process::ExitCode;
use std::sync::Arc;

use lastinfo_service::constants::EXIT_NOT_FOUND;
use lastinfo_service::{
    init_tracing, open_cache, Backends, HttpOriginFetcher, ReadCoordinator, ServiceConfig,
    ServiceResult, TelemetryConfig,
};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_tracing(&TelemetryConfig::for_service("lastinfo-get")) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run().await {
        Ok(Some(payload)) => {
            println!("{}", payload);
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::from(EXIT_NOT_FOUND),
        Err(e) => {
            tracing::error!(error = %e, "lastinfo-get failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ServiceResult<Option<String>> {
    let config = ServiceConfig::from_env()?;
    config.validate()?;

    let origin = HttpOriginFetcher::new(config.require_origin_url()?, config.origin_client_timeout)?;
    let cache = open_cache(&config)?;
    let backends = Backends::connect(&config).await?;

    let coordinator = ReadCoordinator::new(
        Arc::new(origin),
        cache,
        backends.store,
        backends.channel,
        config.read_path.clone(),
        config.worker.topic.clone(),
    );

    let payload = coordinator.get_latest_default().await;

    if !coordinator.flush_write_behind(config.write_behind_grace).await {
        tracing::warn!(
            grace_ms = config.write_behind_grace.as_millis() as u64,
            "Write-behind still in flight at exit"
        );
    }
    tracing::debug!(metrics = ?coordinator.metrics().snapshot(), "Request finished");

    Ok(payload)
}
