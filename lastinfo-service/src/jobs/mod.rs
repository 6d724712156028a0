//! Background Jobs for the lastinfo service
//!
//! - `persistence`: drains the event log into the durable store
//! - `retention`: prunes events every consumer group has committed
//!
//! # Usage
//!
//! ```ignore
//! use lastinfo_service::jobs::PersistenceWorker;
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let worker = PersistenceWorker::new(subscriber, store, Some(cache), config);
//! let handle = tokio::spawn(worker.run(shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

pub mod persistence;
pub mod retention;

pub use persistence::{PersistenceMetrics, PersistenceSnapshot, PersistenceWorker, WorkerState};
pub use retention::{
    event_retention_task, EventLogRetention, RetentionConfig, RetentionMetrics, RetentionSnapshot,
};

use tokio::sync::watch;

/// Resolves once shutdown is requested or the sender is gone.
pub(crate) async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}
