//! Persistence Worker Background Task
//!
//! Consumes the event log and applies each candidate record to the durable
//! store under timestamp-based conflict resolution. Offsets are acknowledged
//! only after the durable write (or deliberate no-op) succeeded, so delivery
//! into the store is at-least-once and redelivery is harmless.
//!
//! Per message the worker moves through
//! `Waiting -> Processing -> Acknowledging -> Waiting`. A failed durable
//! write skips `Acknowledging`: the worker backs off and rewinds the
//! subscription to the committed cursor, which redelivers the message.
//! Undecodable messages are acknowledged and dropped so a poison message
//! cannot stall the topic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lastinfo_core::{
    ChannelError, ConflictResolver, Record, StoreError, WorkerConfig, WriteDecision, WriteMode,
};
use lastinfo_storage::{
    CacheRecordExt, CacheStore, Delivery, DurableStore, EventSubscriber, Subscription,
};
use tokio::sync::watch;

use super::shutdown_requested;

// ============================================================================
// STATE
// ============================================================================

/// Where the consume loop is for the current message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Blocked on the subscription, or backing off.
    Waiting,
    /// Decoding and applying a message to the durable store.
    Processing,
    /// Committing the message's offset.
    Acknowledging,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Waiting => "waiting",
            WorkerState::Processing => "processing",
            WorkerState::Acknowledging => "acknowledging",
        }
    }
}

/// What to do with a processed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Acknowledge,
    Redeliver,
}

// ============================================================================
// METRICS
// ============================================================================

/// Metrics for persistence operations.
#[derive(Debug, Default)]
pub struct PersistenceMetrics {
    /// Messages received (end-of-partition markers excluded)
    pub received: AtomicU64,
    /// Candidates inserted as the first singleton row
    pub inserted: AtomicU64,
    /// Candidates that replaced an older stored record
    pub updated: AtomicU64,
    /// Candidates rejected as not newer than the stored record
    pub skipped_stale: AtomicU64,
    /// Candidates rejected against the cached record before any store access
    pub skipped_by_cache: AtomicU64,
    /// Messages that did not decode
    pub decode_errors: AtomicU64,
    /// Durable store failures (message redelivered)
    pub store_errors: AtomicU64,
    /// Channel-level receive, subscribe or rewind failures
    pub consume_errors: AtomicU64,
    /// Offset commit failures
    pub ack_errors: AtomicU64,
    /// End-of-partition markers seen
    pub end_of_partition: AtomicU64,
}

impl PersistenceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> PersistenceSnapshot {
        PersistenceSnapshot {
            received: self.received.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            skipped_stale: self.skipped_stale.load(Ordering::Relaxed),
            skipped_by_cache: self.skipped_by_cache.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            consume_errors: self.consume_errors.load(Ordering::Relaxed),
            ack_errors: self.ack_errors.load(Ordering::Relaxed),
            end_of_partition: self.end_of_partition.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of persistence metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceSnapshot {
    pub received: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped_stale: u64,
    pub skipped_by_cache: u64,
    pub decode_errors: u64,
    pub store_errors: u64,
    pub consume_errors: u64,
    pub ack_errors: u64,
    pub end_of_partition: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Single consumer applying event log messages to the durable store.
pub struct PersistenceWorker {
    subscriber: Arc<dyn EventSubscriber>,
    store: Arc<dyn DurableStore>,
    cache: Option<Arc<dyn CacheStore>>,
    config: WorkerConfig,
    metrics: Arc<PersistenceMetrics>,
}

impl PersistenceWorker {
    /// Create a worker.
    ///
    /// `cache` is only consulted when `config.skip_stale_against_cache` is set.
    pub fn new(
        subscriber: Arc<dyn EventSubscriber>,
        store: Arc<dyn DurableStore>,
        cache: Option<Arc<dyn CacheStore>>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            subscriber,
            store,
            cache,
            config,
            metrics: Arc::new(PersistenceMetrics::new()),
        }
    }

    /// Metrics handle, live while the worker runs.
    pub fn metrics(&self) -> Arc<PersistenceMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run until the shutdown signal is received.
    ///
    /// # Arguments
    ///
    /// * `shutdown_rx` - Watch receiver; sending `true` (or dropping the
    ///   sender) stops the loop at its next wait point
    ///
    /// # Returns
    ///
    /// Metrics collected during the task's lifetime
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Arc<PersistenceMetrics> {
        tracing::info!(
            topic = %self.config.topic,
            group = %self.config.consumer_group,
            write_mode = self.config.write_mode.as_str(),
            skip_stale_against_cache = self.config.skip_stale_against_cache,
            "Persistence worker started"
        );

        'subscription: while let Some(mut subscription) = self.open_subscription(&mut shutdown_rx).await {
            let mut state = WorkerState::Waiting;
            loop {
                debug_assert_eq!(state, WorkerState::Waiting);
                let delivery = tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown_rx) => {
                        tracing::info!("Persistence worker shutting down");
                        close_subscription(subscription).await;
                        break 'subscription;
                    }
                    delivery = subscription.recv() => delivery,
                };

                let (payload, ack) = match delivery {
                    Ok(Delivery::Message { payload, ack }) => (payload, ack),
                    Ok(Delivery::EndOfPartition { partition, offset }) => {
                        self.metrics.end_of_partition.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(partition, offset, "Reached end of partition");
                        continue;
                    }
                    Err(e) => {
                        self.metrics.consume_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(error = %e, "Failed to receive from event log");
                        if !self.pause(self.config.consume_error_backoff, &mut shutdown_rx).await {
                            close_subscription(subscription).await;
                            break 'subscription;
                        }
                        continue;
                    }
                };

                state = WorkerState::Processing;
                tracing::trace!(state = state.as_str(), offset = ack.offset, "Processing message");
                match self.process(&payload).await {
                    Disposition::Acknowledge => {
                        state = WorkerState::Acknowledging;
                        tracing::trace!(state = state.as_str(), offset = ack.offset, "Acknowledging message");
                        if let Err(e) = subscription.ack(&ack).await {
                            self.metrics.ack_errors.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(
                                error = %e,
                                offset = ack.offset,
                                "Failed to commit offset, message will be redelivered"
                            );
                        }
                    }
                    Disposition::Redeliver => {
                        if !self.pause(self.config.retry_backoff, &mut shutdown_rx).await {
                            close_subscription(subscription).await;
                            break 'subscription;
                        }
                        if let Err(e) = subscription.rewind().await {
                            self.metrics.consume_errors.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(error = %e, "Failed to rewind subscription, resubscribing");
                            close_subscription(subscription).await;
                            continue 'subscription;
                        }
                    }
                }
                state = WorkerState::Waiting;
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            received = snapshot.received,
            inserted = snapshot.inserted,
            updated = snapshot.updated,
            skipped_stale = snapshot.skipped_stale,
            skipped_by_cache = snapshot.skipped_by_cache,
            decode_errors = snapshot.decode_errors,
            store_errors = snapshot.store_errors,
            consume_errors = snapshot.consume_errors,
            ack_errors = snapshot.ack_errors,
            "Persistence worker completed"
        );

        self.metrics
    }

    /// Subscribe, retrying after `consume_error_backoff` until it succeeds.
    /// Returns `None` when shutdown was requested first.
    async fn open_subscription(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<Box<dyn Subscription>> {
        loop {
            if *shutdown_rx.borrow() {
                return None;
            }
            let subscribed = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown_rx) => return None,
                subscribed = self.subscriber.subscribe(&self.config.topic, &self.config.consumer_group) => subscribed,
            };
            match subscribed {
                Ok(subscription) => return Some(subscription),
                Err(e) => {
                    self.metrics.consume_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(error = %e, topic = %self.config.topic, "Failed to subscribe to event log");
                    if !self.pause(self.config.consume_error_backoff, shutdown_rx).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep for `duration` unless shutdown is requested first.
    /// Returns `false` on shutdown.
    async fn pause(&self, duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            biased;
            _ = shutdown_requested(shutdown_rx) => {
                tracing::info!("Persistence worker shutting down during backoff");
                false
            }
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Decode and apply one message.
    async fn process(&self, payload: &[u8]) -> Disposition {
        self.metrics.received.fetch_add(1, Ordering::Relaxed);

        let candidate = match Record::from_wire(payload) {
            Ok(candidate) => candidate,
            Err(e) => {
                self.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                let err = ChannelError::Decode {
                    reason: e.to_string(),
                };
                tracing::warn!(error = %err, bytes = payload.len(), "Skipping undecodable message");
                return Disposition::Acknowledge;
            }
        };

        if self.stale_against_cache(&candidate).await {
            self.metrics.skipped_by_cache.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(timestamp = %candidate.timestamp, "Cached record is newer, skipping store");
            return Disposition::Acknowledge;
        }

        let applied = match self.config.write_mode {
            WriteMode::ReadModifyWrite => self.read_modify_write(&candidate).await,
            WriteMode::ConditionalUpdate => self.store.upsert_if_newer(&candidate).await,
        };

        match applied {
            Ok(decision) => {
                let counter = match decision {
                    WriteDecision::Insert => &self.metrics.inserted,
                    WriteDecision::Update => &self.metrics.updated,
                    WriteDecision::Skip => &self.metrics.skipped_stale,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    timestamp = %candidate.timestamp,
                    decision = ?decision,
                    "Candidate applied"
                );
                Disposition::Acknowledge
            }
            Err(e) => {
                self.metrics.store_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    error = %e,
                    timestamp = %candidate.timestamp,
                    "Durable store write failed, message will be redelivered"
                );
                Disposition::Redeliver
            }
        }
    }

    /// Baseline single-writer path: read, decide, then write or no-op.
    async fn read_modify_write(&self, candidate: &Record) -> Result<WriteDecision, StoreError> {
        let reference = self.store.get_singleton().await?;
        let decision = ConflictResolver::decide(candidate, reference.as_ref());
        if decision.writes() {
            self.store.upsert_singleton(candidate).await?;
        }
        Ok(decision)
    }

    /// True when the pre-filter is enabled and the cache holds a strictly
    /// newer record. Cache errors never skip.
    async fn stale_against_cache(&self, candidate: &Record) -> bool {
        if !self.config.skip_stale_against_cache {
            return false;
        }
        let Some(cache) = &self.cache else {
            return false;
        };

        match cache.get_record(self.config.cache_timeout).await {
            Ok(Some(cached)) => cached.is_newer_than(candidate),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Cache pre-filter read failed, checking store");
                false
            }
        }
    }
}

async fn close_subscription(subscription: Box<dyn Subscription>) {
    if let Err(e) = subscription.close().await {
        tracing::warn!(error = %e, "Failed to close subscription cleanly");
    }
}

// ============================================================================
// TESTS
// ============================================================================
