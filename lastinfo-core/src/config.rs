//! Configuration types

use crate::{ConfigError, LastInfoError, LastInfoResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Default hard timeout for one origin request (3 seconds)
pub const DEFAULT_ORIGIN_TIMEOUT_MS: u64 = 3_000;

/// Default timeout for the degraded-mode cache read (300 milliseconds)
pub const DEFAULT_CACHE_TIMEOUT_MS: u64 = 300;

/// Default timeout for the last-resort durable store read (1 second)
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 1_000;

/// Default overall deadline for one GetLatest call.
/// Kept 100ms under a 5 second client timeout.
pub const DEFAULT_REQUEST_DEADLINE_MS: u64 = 4_900;

/// Default topic carrying fetched records
pub const DEFAULT_TOPIC: &str = "last-info-fetched";

/// Default consumer group of the persistence worker
pub const DEFAULT_CONSUMER_GROUP: &str = "lastinfo-storage";

/// Default pause before redelivering a message whose durable write failed
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;

/// Default pause after a channel-level consume error
pub const DEFAULT_CONSUME_ERROR_BACKOFF_MS: u64 = 500;

// ============================================================================
// WRITE MODE
// ============================================================================

/// How the persistence worker applies a candidate to the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WriteMode {
    /// Read the singleton, decide, then insert/update. Single writer only.
    #[default]
    ReadModifyWrite,
    /// One atomic conditional upsert guarded by the stored timestamp.
    /// Required when more than one worker writes the store.
    ConditionalUpdate,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadModifyWrite => "read_modify_write",
            Self::ConditionalUpdate => "conditional_update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read_modify_write" | "rmw" => Some(Self::ReadModifyWrite),
            "conditional_update" | "cas" => Some(Self::ConditionalUpdate),
            _ => None,
        }
    }
}

// ============================================================================
// READ PATH
// ============================================================================

/// Per-stage budgets of the read fallback chain.
///
/// `origin_timeout` and `request_deadline` are independent bounds; both are
/// enforced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPathConfig {
    pub origin_timeout: Duration,
    pub cache_timeout: Duration,
    pub store_timeout: Duration,
    pub request_deadline: Duration,
}

impl Default for ReadPathConfig {
    fn default() -> Self {
        Self {
            origin_timeout: Duration::from_millis(DEFAULT_ORIGIN_TIMEOUT_MS),
            cache_timeout: Duration::from_millis(DEFAULT_CACHE_TIMEOUT_MS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            request_deadline: Duration::from_millis(DEFAULT_REQUEST_DEADLINE_MS),
        }
    }
}

impl ReadPathConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `LASTINFO_ORIGIN_TIMEOUT_MS` (default: 3000)
    /// - `LASTINFO_CACHE_TIMEOUT_MS` (default: 300)
    /// - `LASTINFO_STORE_TIMEOUT_MS` (default: 1000)
    /// - `LASTINFO_REQUEST_DEADLINE_MS` (default: 4900)
    pub fn from_env() -> Self {
        Self {
            origin_timeout: env_millis("LASTINFO_ORIGIN_TIMEOUT_MS", DEFAULT_ORIGIN_TIMEOUT_MS),
            cache_timeout: env_millis("LASTINFO_CACHE_TIMEOUT_MS", DEFAULT_CACHE_TIMEOUT_MS),
            store_timeout: env_millis("LASTINFO_STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS),
            request_deadline: env_millis(
                "LASTINFO_REQUEST_DEADLINE_MS",
                DEFAULT_REQUEST_DEADLINE_MS,
            ),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - All durations are positive
    /// - cache_timeout is shorter than origin_timeout (degraded path)
    pub fn validate(&self) -> LastInfoResult<()> {
        require_positive("origin_timeout", self.origin_timeout)?;
        require_positive("cache_timeout", self.cache_timeout)?;
        require_positive("store_timeout", self.store_timeout)?;
        require_positive("request_deadline", self.request_deadline)?;

        if self.cache_timeout >= self.origin_timeout {
            return Err(LastInfoError::Config(ConfigError::InvalidValue {
                field: "cache_timeout".to_string(),
                value: format!("{:?}", self.cache_timeout),
                reason: "cache_timeout must be shorter than origin_timeout".to_string(),
            }));
        }

        Ok(())
    }
}

// ============================================================================
// WRITE PATH
// ============================================================================

/// Persistence worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub topic: String,
    pub consumer_group: String,
    pub write_mode: WriteMode,
    /// Skip candidates older than the cached record before touching the
    /// durable store.
    pub skip_stale_against_cache: bool,
    pub cache_timeout: Duration,
    pub retry_backoff: Duration,
    pub consume_error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            write_mode: WriteMode::default(),
            skip_stale_against_cache: false,
            cache_timeout: Duration::from_millis(DEFAULT_CACHE_TIMEOUT_MS),
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            consume_error_backoff: Duration::from_millis(DEFAULT_CONSUME_ERROR_BACKOFF_MS),
        }
    }
}

impl WorkerConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `LASTINFO_TOPIC` (default: last-info-fetched)
    /// - `LASTINFO_CONSUMER_GROUP` (default: lastinfo-storage)
    /// - `LASTINFO_WRITE_MODE`: `read_modify_write` or `conditional_update`
    /// - `LASTINFO_SKIP_STALE_AGAINST_CACHE` (default: false)
    /// - `LASTINFO_CACHE_TIMEOUT_MS` (default: 300)
    /// - `LASTINFO_RETRY_BACKOFF_MS` (default: 1000)
    /// - `LASTINFO_CONSUME_ERROR_BACKOFF_MS` (default: 500)
    ///
    /// # Errors
    ///
    /// An unrecognised `LASTINFO_WRITE_MODE` is rejected rather than replaced
    /// by the single-writer default.
    pub fn from_env() -> LastInfoResult<Self> {
        let defaults = Self::default();

        Ok(Self {
            topic: std::env::var("LASTINFO_TOPIC").unwrap_or(defaults.topic),
            consumer_group: std::env::var("LASTINFO_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            write_mode: write_mode_from(std::env::var("LASTINFO_WRITE_MODE").ok())?,
            skip_stale_against_cache: std::env::var("LASTINFO_SKIP_STALE_AGAINST_CACHE")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(defaults.skip_stale_against_cache),
            cache_timeout: env_millis("LASTINFO_CACHE_TIMEOUT_MS", DEFAULT_CACHE_TIMEOUT_MS),
            retry_backoff: env_millis("LASTINFO_RETRY_BACKOFF_MS", DEFAULT_RETRY_BACKOFF_MS),
            consume_error_backoff: env_millis(
                "LASTINFO_CONSUME_ERROR_BACKOFF_MS",
                DEFAULT_CONSUME_ERROR_BACKOFF_MS,
            ),
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LastInfoResult<()> {
        if self.topic.trim().is_empty() {
            return Err(LastInfoError::Config(ConfigError::MissingRequired {
                field: "topic".to_string(),
            }));
        }
        if self.consumer_group.trim().is_empty() {
            return Err(LastInfoError::Config(ConfigError::MissingRequired {
                field: "consumer_group".to_string(),
            }));
        }
        require_positive("cache_timeout", self.cache_timeout)?;
        require_positive("retry_backoff", self.retry_backoff)?;
        require_positive("consume_error_backoff", self.consume_error_backoff)?;
        Ok(())
    }
}

/// Unset means the default mode; anything set must name a mode.
fn write_mode_from(raw: Option<String>) -> LastInfoResult<WriteMode> {
    match raw {
        None => Ok(WriteMode::default()),
        Some(value) => WriteMode::parse(&value).ok_or_else(|| {
            LastInfoError::Config(ConfigError::InvalidValue {
                field: "write_mode".to_string(),
                value,
                reason: "expected read_modify_write or conditional_update".to_string(),
            })
        }),
    }
}

fn env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(
        std::env::var(key)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default_ms),
    )
}

fn require_positive(field: &str, value: Duration) -> LastInfoResult<()> {
    if value.is_zero() {
        return Err(LastInfoError::Config(ConfigError::InvalidValue {
            field: field.to_string(),
            value: format!("{:?}", value),
            reason: format!("{} must be positive", field),
        }));
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_path_defaults_are_valid() {
        let config = ReadPathConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.cache_timeout < config.origin_timeout);
        assert!(config.request_deadline > config.origin_timeout);
    }

    #[test]
    fn test_read_path_rejects_zero_timeout() {
        let config = ReadPathConfig {
            store_timeout: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            LastInfoError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "store_timeout"
        ));
    }

    #[test]
    fn test_read_path_rejects_slow_cache() {
        let config = ReadPathConfig {
            origin_timeout: Duration::from_millis(200),
            cache_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cache_timeout"));
    }

    #[test]
    fn test_worker_defaults_are_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.topic, DEFAULT_TOPIC);
        assert_eq!(config.write_mode, WriteMode::ReadModifyWrite);
        assert!(!config.skip_stale_against_cache);
    }

    #[test]
    fn test_worker_rejects_empty_topic() {
        let config = WorkerConfig {
            topic: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LastInfoError::Config(ConfigError::MissingRequired { .. }))
        ));
    }

    #[test]
    fn test_unrecognised_write_mode_is_rejected() {
        assert_eq!(write_mode_from(None).unwrap(), WriteMode::ReadModifyWrite);
        assert_eq!(
            write_mode_from(Some("conditional_update".to_string())).unwrap(),
            WriteMode::ConditionalUpdate
        );

        let err = write_mode_from(Some("conditonal_update".to_string())).unwrap_err();
        assert!(matches!(
            err,
            LastInfoError::Config(ConfigError::InvalidValue { ref field, ref value, .. })
                if field == "write_mode" && value == "conditonal_update"
        ));
    }

    #[test]
    fn test_worker_from_env_rejects_misspelled_write_mode() {
        std::env::set_var("LASTINFO_WRITE_MODE", "conditonal_update");
        let result = WorkerConfig::from_env();
        std::env::remove_var("LASTINFO_WRITE_MODE");
        assert!(result.is_err());
    }

    #[test]
    fn test_write_mode_parse() {
        assert_eq!(WriteMode::parse("read_modify_write"), Some(WriteMode::ReadModifyWrite));
        assert_eq!(WriteMode::parse("CAS"), Some(WriteMode::ConditionalUpdate));
        assert_eq!(
            WriteMode::parse(WriteMode::ConditionalUpdate.as_str()),
            Some(WriteMode::ConditionalUpdate)
        );
        assert_eq!(WriteMode::parse("sometimes"), None);
    }
}
