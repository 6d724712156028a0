//! Start-up wiring shared by the binaries.

use std::sync::Arc;

use lastinfo_storage::LmdbCacheStore;

use crate::config::ServiceConfig;
use crate::db::PgDurableStore;
use crate::error::ServiceResult;
use crate::pg_channel::PgEventChannel;

/// PostgreSQL-backed capabilities sharing one connection pool.
pub struct Backends {
    pub store: Arc<PgDurableStore>,
    pub channel: Arc<PgEventChannel>,
}

impl Backends {
    /// Create the pool and make sure every table exists.
    pub async fn connect(config: &ServiceConfig) -> ServiceResult<Self> {
        let pool = config.db.create_pool()?;

        let store = PgDurableStore::new(pool.clone(), config.db.timeout);
        store.ensure_schema().await?;

        let channel = PgEventChannel::new(pool, config.channel_poll_interval, config.channel_batch_size);
        channel.ensure_schema().await?;

        tracing::info!(
            host = %config.db.host,
            dbname = %config.db.dbname,
            pool_size = store.pool_size(),
            "Connected to PostgreSQL"
        );

        Ok(Self {
            store: Arc::new(store),
            channel: Arc::new(channel),
        })
    }
}

/// Open (or create) the LMDB cache environment.
pub fn open_cache(config: &ServiceConfig) -> ServiceResult<Arc<LmdbCacheStore>> {
    let cache = LmdbCacheStore::new(&config.cache_path, config.cache_max_size_mb)?;
    tracing::info!(
        path = %config.cache_path.display(),
        max_size_mb = config.cache_max_size_mb,
        "Opened LMDB cache"
    );
    Ok(Arc::new(cache))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lastinfo_core::Record;
    use lastinfo_storage::CacheRecordExt;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_cache_creates_directory() {
        let dir = TempDir::new().unwrap();
        let config = ServiceConfig {
            cache_path: dir.path().join("nested").join("cache"),
            ..Default::default()
        };

        let cache = open_cache(&config).unwrap();
        let record = Record::observed_now("{\"temp\":20}");
        cache.set_record(&record, Duration::from_secs(1)).await.unwrap();
        assert_eq!(cache.get_record(Duration::from_secs(1)).await.unwrap(), Some(record));
    }
}
