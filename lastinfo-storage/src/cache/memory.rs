//! In-memory cache store for testing and single-process deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lastinfo_core::CacheError;
use tokio::sync::RwLock;

use super::traits::{CacheStats, CacheStore};

/// Cache backed by a shared `HashMap`.
///
/// Clones share the same map, so a coordinator and a worker built from
/// clones observe each other's writes.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCacheStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the hit/miss/write counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            timeouts: 0,
        }
    }

    /// Raw bytes currently stored under `key`, bypassing statistics.
    pub async fn peek(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().await.get(key).cloned()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>, CacheError> {
        let read = async { self.entries.read().await.get(key).cloned() };
        let value = tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| CacheError::Timeout {
                key: key.to_string(),
                after: timeout,
            })?;

        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], timeout: Duration) -> Result<(), CacheError> {
        let write = async {
            self.entries
                .write()
                .await
                .insert(key.to_string(), value.to_vec());
        };
        tokio::time::timeout(timeout, write)
            .await
            .map_err(|_| CacheError::Timeout {
                key: key.to_string(),
                after: timeout,
            })?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheRecordExt;
    use chrono::{TimeZone, Utc};
    use lastinfo_core::{Record, LAST_INFO_KEY};

    const TIMEOUT: Duration = Duration::from_millis(300);

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = InMemoryCacheStore::new();
        assert_eq!(cache.get("k", TIMEOUT).await.unwrap(), None);

        cache.set("k", b"v", TIMEOUT).await.unwrap();
        assert_eq!(cache.get("k", TIMEOUT).await.unwrap(), Some(b"v".to_vec()));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn test_set_overwrites_unconditionally() {
        let cache = InMemoryCacheStore::new();
        let newer = Record::new(Utc.timestamp_millis_opt(200).unwrap(), "new");
        let older = Record::new(Utc.timestamp_millis_opt(100).unwrap(), "old");

        cache.set_record(&newer, TIMEOUT).await.unwrap();
        cache.set_record(&older, TIMEOUT).await.unwrap();

        assert_eq!(cache.get_record(TIMEOUT).await.unwrap(), Some(older));
    }

    #[tokio::test]
    async fn test_corrupt_value_is_reported() {
        let cache = InMemoryCacheStore::new();
        cache.set(LAST_INFO_KEY, b"{not json", TIMEOUT).await.unwrap();

        let err = cache.get_record(TIMEOUT).await.unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { ref key, .. } if key == LAST_INFO_KEY));
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let cache = InMemoryCacheStore::new();
        let clone = cache.clone();
        clone.set("shared", b"1", TIMEOUT).await.unwrap();
        assert_eq!(cache.peek("shared").await, Some(b"1".to_vec()));
    }
}
