//! Database Connection Pool and Durable Store
//!
//! PostgreSQL connection pooling using deadpool-postgres, and the
//! [`PgDurableStore`] implementation of [`DurableStore`] over a single-row
//! `lastinfo` table.

use async_trait::async_trait;
use deadpool_postgres::{
    Config, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts,
};
use lastinfo_core::{Record, StoreError, Timestamp, WriteDecision, SINGLETON_ID};
use lastinfo_storage::DurableStore;
use std::time::Duration;
use tokio_postgres::NoTls;

use crate::constants::{
    DEFAULT_DB_HOST, DEFAULT_DB_NAME, DEFAULT_DB_POOL_SIZE, DEFAULT_DB_PORT,
    DEFAULT_DB_TIMEOUT_SECS, DEFAULT_DB_USER,
};
use crate::error::{pool_store_error, store_error, ServiceError, ServiceResult};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait/create/recycle timeout for pooled connections
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            dbname: DEFAULT_DB_NAME.to_string(),
            user: DEFAULT_DB_USER.to_string(),
            password: "".to_string(),
            max_size: DEFAULT_DB_POOL_SIZE,
            timeout: Duration::from_secs(DEFAULT_DB_TIMEOUT_SECS),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LASTINFO_DB_HOST` (default: localhost)
    /// - `LASTINFO_DB_PORT` (default: 5432)
    /// - `LASTINFO_DB_NAME` (default: lastinfo)
    /// - `LASTINFO_DB_USER` (default: postgres)
    /// - `LASTINFO_DB_PASSWORD` (default: empty)
    /// - `LASTINFO_DB_POOL_SIZE` (default: 8)
    /// - `LASTINFO_DB_TIMEOUT` in seconds (default: 5)
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("LASTINFO_DB_HOST").unwrap_or_else(|_| DEFAULT_DB_HOST.to_string()),
            port: std::env::var("LASTINFO_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DB_PORT),
            dbname: std::env::var("LASTINFO_DB_NAME").unwrap_or_else(|_| DEFAULT_DB_NAME.to_string()),
            user: std::env::var("LASTINFO_DB_USER").unwrap_or_else(|_| DEFAULT_DB_USER.to_string()),
            password: std::env::var("LASTINFO_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("LASTINFO_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DB_POOL_SIZE),
            timeout: Duration::from_secs(
                std::env::var("LASTINFO_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DB_TIMEOUT_SECS),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ServiceResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig {
            max_size: self.max_size,
            timeouts: Timeouts {
                wait: Some(self.timeout),
                create: Some(self.timeout),
                recycle: Some(self.timeout),
            },
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ServiceError::Database(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// DURABLE STORE
// ============================================================================

const CREATE_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS lastinfo (
        id          INTEGER     PRIMARY KEY,
        observed_at TIMESTAMPTZ NOT NULL,
        info        TEXT        NOT NULL
    )";

const SELECT_SINGLETON_SQL: &str = "SELECT observed_at, info FROM lastinfo WHERE id = $1";

const UPSERT_SQL: &str = "
    INSERT INTO lastinfo (id, observed_at, info) VALUES ($1, $2, $3)
    ON CONFLICT (id) DO UPDATE
        SET observed_at = EXCLUDED.observed_at, info = EXCLUDED.info";

// `xmax = 0` holds only for a freshly inserted row version; no row comes back
// when the WHERE guard rejects the update.
const UPSERT_IF_NEWER_SQL: &str = "
    INSERT INTO lastinfo (id, observed_at, info) VALUES ($1, $2, $3)
    ON CONFLICT (id) DO UPDATE
        SET observed_at = EXCLUDED.observed_at, info = EXCLUDED.info
        WHERE lastinfo.observed_at < EXCLUDED.observed_at
    RETURNING (xmax = 0) AS inserted";

/// [`DurableStore`] over the `lastinfo` table.
#[derive(Clone)]
pub struct PgDurableStore {
    pool: Pool,
    wait_timeout: Duration,
}

impl PgDurableStore {
    /// Create a store over `pool`. `wait_timeout` is reported when the pool
    /// cannot hand out a connection in time.
    pub fn new(pool: Pool, wait_timeout: Duration) -> Self {
        Self { pool, wait_timeout }
    }

    /// Create the `lastinfo` table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.batch_execute(CREATE_TABLE_SQL)
            .await
            .map_err(store_error)?;
        tracing::debug!("lastinfo table ready");
        Ok(())
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> Result<Object, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| pool_store_error(e, self.wait_timeout))
    }
}

#[async_trait]
impl DurableStore for PgDurableStore {
    async fn get_singleton(&self) -> Result<Option<Record>, StoreError> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(SELECT_SINGLETON_SQL, &[&SINGLETON_ID])
            .await
            .map_err(store_error)?;

        Ok(row.map(|row| {
            let observed_at: Timestamp = row.get(0);
            let info: String = row.get(1);
            Record::new(observed_at, info)
        }))
    }

    async fn upsert_singleton(&self, record: &Record) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.execute(
            UPSERT_SQL,
            &[&SINGLETON_ID, &record.timestamp, &record.payload],
        )
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn upsert_if_newer(&self, record: &Record) -> Result<WriteDecision, StoreError> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                UPSERT_IF_NEWER_SQL,
                &[&SINGLETON_ID, &record.timestamp, &record.payload],
            )
            .await
            .map_err(store_error)?;

        Ok(match row {
            None => WriteDecision::Skip,
            Some(row) if row.get::<_, bool>(0) => WriteDecision::Insert,
            Some(_) => WriteDecision::Update,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "lastinfo");
        assert_eq!(config.max_size, DEFAULT_DB_POOL_SIZE);
    }

    #[test]
    fn test_create_pool_is_lazy() {
        // No connection is attempted until the first checkout.
        let pool = DbConfig::default().create_pool();
        assert!(pool.is_ok());
    }

    #[test]
    fn test_conditional_upsert_guards_on_strictly_older_row() {
        assert!(UPSERT_IF_NEWER_SQL.contains("lastinfo.observed_at < EXCLUDED.observed_at"));
        assert!(UPSERT_IF_NEWER_SQL.contains("RETURNING"));
    }
}
