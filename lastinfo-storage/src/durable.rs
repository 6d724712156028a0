//! Durable store capability.
//!
//! The durable store keeps exactly one row, keyed by
//! [`SINGLETON_ID`](lastinfo_core::SINGLETON_ID). It is the last resort of
//! the read path and the only target of the persistence worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lastinfo_core::{ConflictResolver, Record, StoreError, WriteDecision};
use tokio::sync::RwLock;

/// Persistent singleton row.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read the singleton row, if it exists.
    async fn get_singleton(&self) -> Result<Option<Record>, StoreError>;

    /// Insert the singleton row or overwrite it unconditionally.
    ///
    /// Callers decide beforehand with
    /// [`ConflictResolver`](lastinfo_core::ConflictResolver); this is only
    /// safe with a single writer.
    async fn upsert_singleton(&self, record: &Record) -> Result<(), StoreError>;

    /// Insert or overwrite only when `record` is strictly newer than the
    /// stored row, as one atomic operation.
    ///
    /// Returns the write that was applied, or [`WriteDecision::Skip`].
    async fn upsert_if_newer(&self, record: &Record) -> Result<WriteDecision, StoreError>;
}

// ============================================================================
// IN-MEMORY IMPLEMENTATION
// ============================================================================

/// Durable store held in process memory.
///
/// Clones share the same row. Every successful write bumps a counter so tests
/// can assert that a skipped candidate never touched the store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDurableStore {
    row: Arc<RwLock<Option<Record>>>,
    writes: Arc<AtomicU64>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `record`.
    pub fn with_record(record: Record) -> Self {
        Self {
            row: Arc::new(RwLock::new(Some(record))),
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of writes applied since creation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn get_singleton(&self) -> Result<Option<Record>, StoreError> {
        Ok(self.row.read().await.clone())
    }

    async fn upsert_singleton(&self, record: &Record) -> Result<(), StoreError> {
        *self.row.write().await = Some(record.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn upsert_if_newer(&self, record: &Record) -> Result<WriteDecision, StoreError> {
        let mut row = self.row.write().await;
        let decision = ConflictResolver::decide(record, row.as_ref());
        if decision.writes() {
            *row = Some(record.clone());
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(ms: i64, payload: &str) -> Record {
        Record::new(Utc.timestamp_millis_opt(ms).unwrap(), payload)
    }

    #[tokio::test]
    async fn test_empty_store_has_no_singleton() {
        let store = InMemoryDurableStore::new();
        assert_eq!(store.get_singleton().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = InMemoryDurableStore::new();
        store.upsert_singleton(&record(100, "A")).await.unwrap();
        store.upsert_singleton(&record(50, "B")).await.unwrap();

        assert_eq!(store.get_singleton().await.unwrap(), Some(record(50, "B")));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_upsert_if_newer_guards_timestamp() {
        let store = InMemoryDurableStore::with_record(record(100, "A"));

        for stale in [record(100, "B"), record(90, "B")] {
            assert_eq!(
                store.upsert_if_newer(&stale).await.unwrap(),
                WriteDecision::Skip
            );
        }
        assert_eq!(store.write_count(), 0);

        assert_eq!(
            store.upsert_if_newer(&record(101, "B")).await.unwrap(),
            WriteDecision::Update
        );
        assert_eq!(store.get_singleton().await.unwrap(), Some(record(101, "B")));
    }

    #[tokio::test]
    async fn test_upsert_if_newer_inserts_first_row() {
        let store = InMemoryDurableStore::new();
        assert_eq!(
            store.upsert_if_newer(&record(1, "first")).await.unwrap(),
            WriteDecision::Insert
        );
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_conditional_writers_keep_max() {
        let store = InMemoryDurableStore::new();
        let mut handles = Vec::new();
        for ms in [30, 10, 50, 20, 40] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.upsert_if_newer(&record(ms, "x")).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = store.get_singleton().await.unwrap().unwrap();
        assert_eq!(stored.timestamp, Utc.timestamp_millis_opt(50).unwrap());
    }
}
