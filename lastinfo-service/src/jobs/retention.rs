//! Event Log Retention Background Task
//!
//! Periodically deletes events that every consumer group of a topic has
//! already committed. The newest event of a topic is always kept so offsets
//! keep counting up from it after a full prune.
//!
//! A topic nobody has subscribed to yet is never pruned, and a consumer group
//! that stops committing holds retention back at its cursor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lastinfo_core::ChannelError;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::shutdown_requested;

/// Event log that can drop fully consumed events.
#[async_trait]
pub trait EventLogRetention: Send + Sync {
    /// Delete events of `topic` below every group's committed cursor, keeping
    /// the newest one. Returns the number of events removed.
    async fn prune_committed(&self, topic: &str) -> Result<u64, ChannelError>;
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the retention task.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Topic to prune
    pub topic: String,
    /// Pause between passes
    pub interval: Duration,
}

// ============================================================================
// METRICS
// ============================================================================

/// Metrics for retention passes.
#[derive(Debug, Default)]
pub struct RetentionMetrics {
    /// Passes attempted
    pub passes: AtomicU64,
    /// Events deleted since startup
    pub events_pruned: AtomicU64,
    /// Failed passes
    pub errors: AtomicU64,
}

impl RetentionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> RetentionSnapshot {
        RetentionSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            events_pruned: self.events_pruned.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of retention metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionSnapshot {
    pub passes: u64,
    pub events_pruned: u64,
    pub errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Prune `config.topic` every `config.interval` until shutdown.
///
/// The first pass runs immediately. A failed pass is logged and retried on
/// the next tick.
///
/// # Returns
///
/// Metrics collected during the task's lifetime
pub async fn event_retention_task(
    log: Arc<dyn EventLogRetention>,
    config: RetentionConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<RetentionMetrics> {
    let metrics = Arc::new(RetentionMetrics::new());

    let mut ticks = interval(config.interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        topic = %config.topic,
        interval_secs = config.interval.as_secs(),
        "Event retention task started"
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown_rx) => {
                tracing::info!("Event retention task shutting down");
                break;
            }
            _ = ticks.tick() => {
                prune_once(log.as_ref(), &config.topic, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        passes = snapshot.passes,
        events_pruned = snapshot.events_pruned,
        errors = snapshot.errors,
        "Event retention task completed"
    );

    metrics
}

async fn prune_once(log: &dyn EventLogRetention, topic: &str, metrics: &RetentionMetrics) {
    metrics.passes.fetch_add(1, Ordering::Relaxed);

    match log.prune_committed(topic).await {
        Ok(0) => tracing::trace!(topic = %topic, "Nothing to prune"),
        Ok(pruned) => {
            metrics.events_pruned.fetch_add(pruned, Ordering::Relaxed);
            tracing::info!(topic = %topic, pruned, "Pruned committed events");
        }
        Err(e) => {
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, topic = %topic, "Event retention pass failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Hands out scripted prune outcomes, then zero.
    #[derive(Default)]
    struct ScriptedLog {
        outcomes: Mutex<Vec<Result<u64, ChannelError>>>,
        topics: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventLogRetention for ScriptedLog {
        async fn prune_committed(&self, topic: &str) -> Result<u64, ChannelError> {
            self.topics.lock().unwrap().push(topic.to_string());
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                Ok(0)
            } else {
                outcomes.remove(0)
            }
        }
    }

    fn config() -> RetentionConfig {
        RetentionConfig {
            topic: "last-info-fetched".to_string(),
            interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_passes_accumulate_pruned_counts_and_survive_errors() {
        let log = Arc::new(ScriptedLog {
            outcomes: Mutex::new(vec![
                Ok(3),
                Err(ChannelError::Consume {
                    topic: "last-info-fetched".to_string(),
                    reason: "connection reset".to_string(),
                }),
                Ok(2),
            ]),
            ..Default::default()
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(event_retention_task(log.clone(), config(), shutdown_rx));

        tokio::time::timeout(Duration::from_secs(5), async {
            while log.topics.lock().unwrap().len() < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        shutdown_tx.send(true).unwrap();
        let snapshot = handle.await.unwrap().snapshot();

        assert!(snapshot.passes >= 4);
        assert_eq!(snapshot.events_pruned, 5);
        assert_eq!(snapshot.errors, 1);
        assert!(log
            .topics
            .lock()
            .unwrap()
            .iter()
            .all(|topic| topic == "last-info-fetched"));
    }

    #[tokio::test]
    async fn test_stops_when_sender_is_dropped() {
        let log = Arc::new(ScriptedLog::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = RetentionConfig {
            interval: Duration::from_secs(3600),
            ..config()
        };
        let handle = tokio::spawn(event_retention_task(log, config, shutdown_rx));

        drop(shutdown_tx);
        let metrics = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(metrics.snapshot().passes <= 1);
    }
}
