//! Constants for the lastinfo service
//!
//! Defaults for the adapters and binaries. Pipeline timing defaults live in
//! `lastinfo_core`.

// ============================================================================
// ORIGIN
// ============================================================================

/// Default client-level timeout of the shared HTTP client (4 seconds).
/// Deliberately longer than the per-call origin timeout; both apply.
pub const DEFAULT_ORIGIN_CLIENT_TIMEOUT_MS: u64 = 4_000;

/// User agent sent to the origin
pub const ORIGIN_USER_AGENT: &str = concat!("lastinfo/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// CACHE
// ============================================================================

/// Default LMDB environment directory
pub const DEFAULT_CACHE_PATH: &str = "./data/lastinfo-cache";

/// Default LMDB map size in megabytes
pub const DEFAULT_CACHE_MAX_SIZE_MB: usize = 16;

// ============================================================================
// DATABASE
// ============================================================================

/// Default PostgreSQL host
pub const DEFAULT_DB_HOST: &str = "localhost";

/// Default PostgreSQL port
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Default database name
pub const DEFAULT_DB_NAME: &str = "lastinfo";

/// Default database user
pub const DEFAULT_DB_USER: &str = "postgres";

/// Default connection pool size
pub const DEFAULT_DB_POOL_SIZE: usize = 8;

/// Default pool wait/create/recycle timeout in seconds
pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// EVENT LOG
// ============================================================================

/// Default interval between event log polls once a subscriber caught up
pub const DEFAULT_CHANNEL_POLL_INTERVAL_MS: u64 = 250;

/// Default number of events fetched per poll
pub const DEFAULT_CHANNEL_BATCH_SIZE: i64 = 100;

/// Default interval between event log retention passes (5 minutes)
pub const DEFAULT_EVENT_RETENTION_INTERVAL_SECS: u64 = 300;

// ============================================================================
// BINARIES
// ============================================================================

/// How long `lastinfo-get` waits for write-behind tasks before exiting
pub const DEFAULT_WRITE_BEHIND_GRACE_MS: u64 = 2_000;

/// Exit status of `lastinfo-get` when no value could be served
pub const EXIT_NOT_FOUND: u8 = 2;

/// Log filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "lastinfo_service=debug,info";
