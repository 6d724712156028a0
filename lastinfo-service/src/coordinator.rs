//! Read Coordinator
//!
//! Serves "get latest" by walking a strictly sequential fallback chain:
//!
//! 1. the origin, bounded by `min(origin_timeout, deadline)`
//! 2. the cache, bounded by `cache_timeout`
//! 3. the durable store, bounded by `store_timeout`
//!
//! The whole chain is additionally bounded by the caller's deadline. Every
//! stage downgrades its own failure to "absent"; the caller only ever sees a
//! payload or `None`.
//!
//! A successful origin fetch dispatches two detached write-behind tasks: an
//! unconditional cache write and an event publish. Neither is awaited by
//! `get_latest`. The cache write is last-arrival-wins, so two overlapping
//! fetches finishing out of order can leave the cache holding the older
//! observation; the durable store is protected by the persistence worker's
//! timestamp check instead.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lastinfo_core::{FetchError, OriginFetcher, ReadPathConfig, Record, StoreError};
use lastinfo_storage::{
    CacheRecordExt, CacheStore, DeliveryReport, DurableStore, EventPublisher, PersistenceStatus,
};
use tokio::sync::{oneshot, Notify};

// ============================================================================
// METRICS
// ============================================================================

/// Which stage answered each request.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    pub served_from_origin: AtomicU64,
    pub served_from_cache: AtomicU64,
    pub served_from_store: AtomicU64,
    pub not_found: AtomicU64,
    pub deadline_exceeded: AtomicU64,
    pub origin_failures: AtomicU64,
    pub cache_failures: AtomicU64,
    pub store_failures: AtomicU64,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            served_from_origin: self.served_from_origin.load(Ordering::Relaxed),
            served_from_cache: self.served_from_cache.load(Ordering::Relaxed),
            served_from_store: self.served_from_store.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            deadline_exceeded: self.deadline_exceeded.load(Ordering::Relaxed),
            origin_failures: self.origin_failures.load(Ordering::Relaxed),
            cache_failures: self.cache_failures.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of coordinator metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    pub served_from_origin: u64,
    pub served_from_cache: u64,
    pub served_from_store: u64,
    pub not_found: u64,
    pub deadline_exceeded: u64,
    pub origin_failures: u64,
    pub cache_failures: u64,
    pub store_failures: u64,
}

// ============================================================================
// WRITE-BEHIND TRACKING
// ============================================================================

/// Counts detached write-behind tasks so a short-lived process can wait for
/// them before exiting.
#[derive(Debug, Default)]
struct WriteBehindTracker {
    in_flight: AtomicUsize,
    idle: Notify,
}

struct InFlight(Arc<WriteBehindTracker>);

impl WriteBehindTracker {
    fn begin(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight(Arc::clone(self))
    }

    async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Origin,
    Cache,
    Store,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Origin => "origin",
            Stage::Cache => "cache",
            Stage::Store => "store",
        }
    }
}

/// Orchestrates the read fallback chain and the write-behind dispatch.
///
/// All collaborators are process-scoped and injected here; the coordinator is
/// cheap to share behind an `Arc` across concurrent requests.
pub struct ReadCoordinator {
    origin: Arc<dyn OriginFetcher>,
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn DurableStore>,
    publisher: Arc<dyn EventPublisher>,
    config: ReadPathConfig,
    topic: String,
    metrics: Arc<CoordinatorMetrics>,
    write_behind: Arc<WriteBehindTracker>,
}

impl ReadCoordinator {
    pub fn new(
        origin: Arc<dyn OriginFetcher>,
        cache: Arc<dyn CacheStore>,
        store: Arc<dyn DurableStore>,
        publisher: Arc<dyn EventPublisher>,
        config: ReadPathConfig,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            origin,
            cache,
            store,
            publisher,
            config,
            topic: topic.into(),
            metrics: Arc::new(CoordinatorMetrics::new()),
            write_behind: Arc::new(WriteBehindTracker::default()),
        }
    }

    pub fn metrics(&self) -> Arc<CoordinatorMetrics> {
        Arc::clone(&self.metrics)
    }

    /// `get_latest` with the configured request deadline.
    pub async fn get_latest_default(&self) -> Option<String> {
        self.get_latest(self.config.request_deadline).await
    }

    /// Return the freshest payload obtainable within `deadline`, or `None`.
    ///
    /// Never fails and never waits past `deadline`.
    pub async fn get_latest(&self, deadline: Duration) -> Option<String> {
        match tokio::time::timeout(deadline, self.resolve(deadline)).await {
            Ok(Some((payload, stage))) => {
                let counter = match stage {
                    Stage::Origin => &self.metrics.served_from_origin,
                    Stage::Cache => &self.metrics.served_from_cache,
                    Stage::Store => &self.metrics.served_from_store,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(stage = stage.as_str(), "Latest value served");
                Some(payload)
            }
            Ok(None) => {
                self.metrics.not_found.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("No latest value available from origin, cache or store");
                None
            }
            Err(_) => {
                self.metrics.deadline_exceeded.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    deadline_ms = deadline.as_millis() as u64,
                    "Request deadline exceeded before any stage answered"
                );
                None
            }
        }
    }

    /// Wait until every dispatched write-behind task has finished, or
    /// `timeout` elapses. Returns whether all tasks finished.
    pub async fn flush_write_behind(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.write_behind.wait_idle())
            .await
            .is_ok()
    }

    async fn resolve(&self, deadline: Duration) -> Option<(String, Stage)> {
        if let Some(record) = self.from_origin(deadline).await {
            let payload = record.payload.clone();
            self.dispatch_write_behind(record);
            return Some((payload, Stage::Origin));
        }
        if let Some(record) = self.from_cache().await {
            return Some((record.payload, Stage::Cache));
        }
        self.from_store()
            .await
            .map(|record| (record.payload, Stage::Store))
    }

    async fn from_origin(&self, deadline: Duration) -> Option<Record> {
        let timeout = self.config.origin_timeout.min(deadline);
        let fetched = tokio::time::timeout(timeout, self.origin.fetch(timeout))
            .await
            .unwrap_or(Err(FetchError::Timeout { after: timeout }));

        match fetched {
            Ok(record) => Some(record),
            Err(e) => {
                self.metrics.origin_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    stage = "origin",
                    "Origin fetch failed, falling back to cache"
                );
                None
            }
        }
    }

    async fn from_cache(&self) -> Option<Record> {
        match self.cache.get_record(self.config.cache_timeout).await {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                tracing::debug!(stage = "cache", "Cache holds no value");
                None
            }
            Err(e) => {
                self.metrics.cache_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    stage = "cache",
                    "Cache read failed, falling back to store"
                );
                None
            }
        }
    }

    async fn from_store(&self) -> Option<Record> {
        let timeout = self.config.store_timeout;
        let read = tokio::time::timeout(timeout, self.store.get_singleton())
            .await
            .unwrap_or(Err(StoreError::Timeout { after: timeout }));

        match read {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                tracing::debug!(stage = "store", "Durable store holds no value");
                None
            }
            Err(e) => {
                self.metrics.store_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, stage = "store", "Durable store read failed");
                None
            }
        }
    }

    /// Detach the cache write and the event publish. Failures are logged only.
    fn dispatch_write_behind(&self, record: Record) {
        let cache = Arc::clone(&self.cache);
        let cache_timeout = self.config.cache_timeout;
        let cache_record = record.clone();
        let in_flight = self.write_behind.begin();
        tokio::spawn(async move {
            let _in_flight = in_flight;
            if let Err(e) = cache.set_record(&cache_record, cache_timeout).await {
                tracing::warn!(error = %e, "Write-behind cache update failed");
            }
        });

        let payload = match record.to_wire() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode record for publishing");
                return;
            }
        };
        let publisher = Arc::clone(&self.publisher);
        let topic = self.topic.clone();
        let in_flight = self.write_behind.begin();
        tokio::spawn(async move {
            let _in_flight = in_flight;
            let (reported_tx, reported_rx) = oneshot::channel();
            publisher.publish(
                &topic,
                payload,
                Some(Box::new(move |report: DeliveryReport| {
                    log_delivery(&report);
                    let _ = reported_tx.send(());
                })),
            );
            let _ = reported_rx.await;
        });
    }
}

fn log_delivery(report: &DeliveryReport) {
    match &report.status {
        PersistenceStatus::Persisted => {
            tracing::trace!(topic = %report.topic, "Event persisted");
        }
        PersistenceStatus::NotPersisted(reason) => {
            tracing::warn!(topic = %report.topic, reason = %reason, "Event was not persisted");
        }
    }
}

impl std::fmt::Debug for ReadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadCoordinator")
            .field("config", &self.config)
            .field("topic", &self.topic)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
