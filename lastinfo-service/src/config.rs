//! Service configuration.

use std::path::PathBuf;
use std::time::Duration;

use lastinfo_core::{ConfigError, LastInfoError, LastInfoResult, ReadPathConfig, WorkerConfig};

use crate::constants::{
    DEFAULT_CACHE_MAX_SIZE_MB, DEFAULT_CACHE_PATH, DEFAULT_CHANNEL_BATCH_SIZE,
    DEFAULT_CHANNEL_POLL_INTERVAL_MS, DEFAULT_EVENT_RETENTION_INTERVAL_SECS,
    DEFAULT_ORIGIN_CLIENT_TIMEOUT_MS, DEFAULT_WRITE_BEHIND_GRACE_MS,
};
use crate::db::DbConfig;

/// Everything the binaries need to wire the pipeline.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Origin document URL. Only the read path needs it.
    pub origin_url: Option<String>,
    /// Client-level timeout of the shared HTTP client
    pub origin_client_timeout: Duration,
    /// LMDB environment directory
    pub cache_path: PathBuf,
    /// LMDB map size in megabytes
    pub cache_max_size_mb: usize,
    /// Pause between event log polls once a subscriber caught up
    pub channel_poll_interval: Duration,
    /// Events fetched per poll
    pub channel_batch_size: i64,
    /// How often the worker prunes events every consumer group committed
    pub event_retention_interval: Duration,
    /// How long a one-shot read waits for its write-behind tasks
    pub write_behind_grace: Duration,
    pub read_path: ReadPathConfig,
    pub worker: WorkerConfig,
    pub db: DbConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            origin_url: None,
            origin_client_timeout: Duration::from_millis(DEFAULT_ORIGIN_CLIENT_TIMEOUT_MS),
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            cache_max_size_mb: DEFAULT_CACHE_MAX_SIZE_MB,
            channel_poll_interval: Duration::from_millis(DEFAULT_CHANNEL_POLL_INTERVAL_MS),
            channel_batch_size: DEFAULT_CHANNEL_BATCH_SIZE,
            event_retention_interval: Duration::from_secs(DEFAULT_EVENT_RETENTION_INTERVAL_SECS),
            write_behind_grace: Duration::from_millis(DEFAULT_WRITE_BEHIND_GRACE_MS),
            read_path: ReadPathConfig::default(),
            worker: WorkerConfig::default(),
            db: DbConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables (in addition to those read by
    /// [`ReadPathConfig::from_env`], [`WorkerConfig::from_env`] and
    /// [`DbConfig::from_env`]):
    /// - `LASTINFO_ORIGIN_URL` (required by `lastinfo-get`)
    /// - `LASTINFO_ORIGIN_CLIENT_TIMEOUT_MS` (default: 4000)
    /// - `LASTINFO_CACHE_PATH` (default: ./data/lastinfo-cache)
    /// - `LASTINFO_CACHE_MAX_SIZE_MB` (default: 16)
    /// - `LASTINFO_CHANNEL_POLL_INTERVAL_MS` (default: 250)
    /// - `LASTINFO_CHANNEL_BATCH_SIZE` (default: 100)
    /// - `LASTINFO_EVENT_RETENTION_INTERVAL_SECS` (default: 300)
    /// - `LASTINFO_WRITE_BEHIND_GRACE_MS` (default: 2000)
    pub fn from_env() -> LastInfoResult<Self> {
        Ok(Self {
            origin_url: std::env::var("LASTINFO_ORIGIN_URL").ok(),
            origin_client_timeout: Duration::from_millis(env_parse(
                "LASTINFO_ORIGIN_CLIENT_TIMEOUT_MS",
                DEFAULT_ORIGIN_CLIENT_TIMEOUT_MS,
            )),
            cache_path: std::env::var("LASTINFO_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CACHE_PATH)),
            cache_max_size_mb: env_parse("LASTINFO_CACHE_MAX_SIZE_MB", DEFAULT_CACHE_MAX_SIZE_MB),
            channel_poll_interval: Duration::from_millis(env_parse(
                "LASTINFO_CHANNEL_POLL_INTERVAL_MS",
                DEFAULT_CHANNEL_POLL_INTERVAL_MS,
            )),
            channel_batch_size: env_parse("LASTINFO_CHANNEL_BATCH_SIZE", DEFAULT_CHANNEL_BATCH_SIZE),
            event_retention_interval: Duration::from_secs(env_parse(
                "LASTINFO_EVENT_RETENTION_INTERVAL_SECS",
                DEFAULT_EVENT_RETENTION_INTERVAL_SECS,
            )),
            write_behind_grace: Duration::from_millis(env_parse(
                "LASTINFO_WRITE_BEHIND_GRACE_MS",
                DEFAULT_WRITE_BEHIND_GRACE_MS,
            )),
            read_path: ReadPathConfig::from_env(),
            worker: WorkerConfig::from_env()?,
            db: DbConfig::from_env(),
        })
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - The origin URL, when set, is an absolute http(s) URL
    /// - Cache size is positive
    /// - Everything [`ServiceConfig::validate_event_log`] checks
    /// - The nested read path and worker configurations
    pub fn validate(&self) -> LastInfoResult<()> {
        if let Some(url) = &self.origin_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid("origin_url", url, "must be an absolute http(s) URL"));
            }
        }
        if self.origin_client_timeout.is_zero() {
            return Err(invalid(
                "origin_client_timeout",
                &format!("{:?}", self.origin_client_timeout),
                "origin_client_timeout must be positive",
            ));
        }
        if self.cache_max_size_mb == 0 {
            return Err(invalid("cache_max_size_mb", "0", "cache size must be positive"));
        }

        self.validate_event_log()?;
        self.read_path.validate()?;
        self.worker.validate()
    }

    /// Validate the settings the persistence worker depends on: event log
    /// polling, retention and the worker configuration. The read path
    /// settings are not consulted.
    pub fn validate_worker(&self) -> LastInfoResult<()> {
        self.validate_event_log()?;
        self.worker.validate()
    }

    fn validate_event_log(&self) -> LastInfoResult<()> {
        if self.channel_poll_interval.is_zero() {
            return Err(invalid(
                "channel_poll_interval",
                &format!("{:?}", self.channel_poll_interval),
                "poll interval must be positive",
            ));
        }
        if self.channel_batch_size <= 0 {
            return Err(invalid(
                "channel_batch_size",
                &self.channel_batch_size.to_string(),
                "batch size must be positive",
            ));
        }
        if self.event_retention_interval.is_zero() {
            return Err(invalid(
                "event_retention_interval",
                &format!("{:?}", self.event_retention_interval),
                "retention interval must be positive",
            ));
        }
        Ok(())
    }

    /// The origin URL, required by the read path.
    pub fn require_origin_url(&self) -> LastInfoResult<&str> {
        match self.origin_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(url),
            _ => Err(LastInfoError::Config(ConfigError::MissingRequired {
                field: "origin_url".to_string(),
            })),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn invalid(field: &str, value: &str, reason: &str) -> LastInfoError {
    LastInfoError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.origin_client_timeout > config.read_path.origin_timeout);
    }

    #[test]
    fn test_origin_url_required_for_read_path() {
        let config = ServiceConfig::default();
        assert!(matches!(
            config.require_origin_url(),
            Err(LastInfoError::Config(ConfigError::MissingRequired { .. }))
        ));

        let config = ServiceConfig {
            origin_url: Some("https://example.com/weather".to_string()),
            ..Default::default()
        };
        assert_eq!(config.require_origin_url().unwrap(), "https://example.com/weather");
    }

    #[test]
    fn test_rejects_relative_origin_url() {
        let config = ServiceConfig {
            origin_url: Some("example.com/weather".to_string()),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("origin_url"));
    }

    #[test]
    fn test_rejects_non_positive_batch_size() {
        let config = ServiceConfig {
            channel_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LastInfoError::Config(ConfigError::InvalidValue { ref field, .. })) if field == "channel_batch_size"
        ));
    }

    #[test]
    fn test_worker_validation_covers_event_log_settings() {
        for batch_size in [0, -5] {
            let config = ServiceConfig {
                channel_batch_size: batch_size,
                ..Default::default()
            };
            assert!(matches!(
                config.validate_worker(),
                Err(LastInfoError::Config(ConfigError::InvalidValue { ref field, .. })) if field == "channel_batch_size"
            ));
        }

        let config = ServiceConfig {
            event_retention_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate_worker().is_err());
    }

    #[test]
    fn test_worker_validation_ignores_read_path_settings() {
        let mut config = ServiceConfig::default();
        config.read_path.cache_timeout = config.read_path.origin_timeout;
        assert!(config.validate().is_err());
        assert!(config.validate_worker().is_ok());
    }

    #[test]
    fn test_nested_worker_config_is_validated() {
        let mut config = ServiceConfig::default();
        config.worker.consumer_group = String::new();
        assert!(config.validate().is_err());
    }
}
