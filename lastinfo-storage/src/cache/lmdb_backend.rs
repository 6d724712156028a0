//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store that survives process restarts. Keys are UTF-8 strings,
//! values are the raw bytes handed to [`CacheStore::set`].
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Every operation runs its transaction on
//! the blocking pool and is abandoned at the caller's timeout. Statistics are
//! tracked with atomic counters.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use lastinfo_core::CacheError;
use tokio::task::JoinError;

use super::traits::{CacheStats, CacheStore};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The blocking task running the transaction did not complete.
    #[error("Blocking task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbCacheError {
    fn from(e: heed::Error) -> Self {
        LmdbCacheError::Transaction(e.to_string())
    }
}

impl From<JoinError> for LmdbCacheError {
    fn from(e: JoinError) -> Self {
        LmdbCacheError::Task(e.to_string())
    }
}

/// Convert LmdbCacheError to CacheError.
impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Connectivity {
            reason: e.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    timeouts: AtomicU64,
}

/// LMDB-backed cache store.
///
/// # Example
///
/// ```ignore
/// use lastinfo_storage::{CacheRecordExt, LmdbCacheStore};
///
/// let cache = LmdbCacheStore::new("/var/lib/lastinfo/cache", 16)?;
/// cache.set_record(&record, Duration::from_millis(300)).await?;
/// let cached = cache.get_record(Duration::from_millis(300)).await?;
/// ```
#[derive(Clone)]
pub struct LmdbCacheStore {
    env: Env,
    db: Database<Str, Bytes>,
    counters: Arc<Counters>,
}

impl LmdbCacheStore {
    /// Open (or create) a cache environment.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or database cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment directory is owned by this process; it is
        // never opened twice with different flags.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn()?;
        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            db,
            counters: Arc::new(Counters::default()),
        })
    }

    /// Snapshot of the hit/miss/write/timeout counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
        }
    }

    fn read_blocking(
        env: &Env,
        db: Database<Str, Bytes>,
        key: &str,
    ) -> Result<Option<Vec<u8>>, LmdbCacheError> {
        let rtxn = env.read_txn()?;
        let value = db.get(&rtxn, key)?.map(|bytes| bytes.to_vec());
        Ok(value)
    }

    fn write_blocking(
        env: &Env,
        db: Database<Str, Bytes>,
        key: &str,
        value: &[u8],
    ) -> Result<(), LmdbCacheError> {
        let mut wtxn = env.write_txn()?;
        db.put(&mut wtxn, key, value)?;
        wtxn.commit()?;
        Ok(())
    }

    fn timed_out(&self, key: &str, after: Duration) -> CacheError {
        self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            key = %key,
            timeout_ms = after.as_millis() as u64,
            "LMDB cache operation timed out"
        );
        CacheError::Timeout {
            key: key.to_string(),
            after,
        }
    }
}

#[async_trait]
impl CacheStore for LmdbCacheStore {
    async fn get(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>, CacheError> {
        let env = self.env.clone();
        let db = self.db;
        let owned_key = key.to_string();
        let task = tokio::task::spawn_blocking(move || Self::read_blocking(&env, db, &owned_key));

        let value = match tokio::time::timeout(timeout, task).await {
            Err(_) => return Err(self.timed_out(key, timeout)),
            Ok(joined) => joined.map_err(LmdbCacheError::from)??,
        };

        match value {
            Some(_) => self.counters.hits.fetch_add(1, Ordering::Relaxed),
            None => self.counters.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], timeout: Duration) -> Result<(), CacheError> {
        let env = self.env.clone();
        let db = self.db;
        let owned_key = key.to_string();
        let owned_value = value.to_vec();
        let task = tokio::task::spawn_blocking(move || {
            Self::write_blocking(&env, db, &owned_key, &owned_value)
        });

        match tokio::time::timeout(timeout, task).await {
            Err(_) => return Err(self.timed_out(key, timeout)),
            Ok(joined) => joined.map_err(LmdbCacheError::from)??,
        }

        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheRecordExt;
    use chrono::{TimeZone, Utc};
    use lastinfo_core::Record;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn create_test_store() -> (LmdbCacheStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbCacheStore::new(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let (store, _dir) = create_test_store();
        assert_eq!(store.get("missing", TIMEOUT).await.unwrap(), None);
        assert_eq!(store.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (store, _dir) = create_test_store();
        store.set("k", b"value", TIMEOUT).await.unwrap();

        assert_eq!(store.get("k", TIMEOUT).await.unwrap(), Some(b"value".to_vec()));
        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn test_record_roundtrip_through_lmdb() {
        let (store, _dir) = create_test_store();
        let record = Record::new(Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(), "sunny");

        store.set_record(&record, TIMEOUT).await.unwrap();
        assert_eq!(store.get_record(TIMEOUT).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = LmdbCacheStore::new(temp_dir.path(), 10).unwrap();
            store.set("k", b"persisted", TIMEOUT).await.unwrap();
        }

        let reopened = LmdbCacheStore::new(temp_dir.path(), 10).unwrap();
        assert_eq!(
            reopened.get("k", TIMEOUT).await.unwrap(),
            Some(b"persisted".to_vec())
        );
    }

    #[test]
    fn test_error_converts_to_connectivity() {
        let err: CacheError = LmdbCacheError::Transaction("boom".into()).into();
        assert!(matches!(err, CacheError::Connectivity { ref reason } if reason.contains("boom")));
    }
}
