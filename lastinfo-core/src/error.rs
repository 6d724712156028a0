//! Error types for lastinfo operations

use std::time::Duration;
use thiserror::Error;

/// Origin fetch errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Origin request timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Origin network error: {reason}")]
    Network { reason: String },

    #[error("Origin responded with status {status}")]
    BadStatus { status: u16 },
}

/// Cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache connectivity error: {reason}")]
    Connectivity { reason: String },

    #[error("Cache operation on key {key} timed out after {after:?}")]
    Timeout { key: String, after: Duration },

    #[error("Cached value under key {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Durable store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Durable store connectivity error: {reason}")]
    Connectivity { reason: String },

    #[error("Durable store constraint violation: {reason}")]
    Constraint { reason: String },

    #[error("Durable store operation timed out after {after:?}")]
    Timeout { after: Duration },
}

/// Event channel errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Message to topic {topic} was not persisted: {reason}")]
    NotPersisted { topic: String, reason: String },

    #[error("Consume error on topic {topic}: {reason}")]
    Consume { topic: String, reason: String },

    #[error("Failed to decode message: {reason}")]
    Decode { reason: String },

    #[error("Failed to commit offset {offset} on topic {topic}: {reason}")]
    Commit {
        topic: String,
        offset: i64,
        reason: String,
    },

    #[error("Subscription to topic {topic} is closed")]
    Closed { topic: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all lastinfo errors.
#[derive(Debug, Clone, Error)]
pub enum LastInfoError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for lastinfo operations.
pub type LastInfoResult<T> = Result<T, LastInfoError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display_bad_status() {
        let err = FetchError::BadStatus { status: 503 };
        let msg = format!("{}", err);
        assert!(msg.contains("503"));
    }

    #[test]
    fn test_cache_error_display_timeout() {
        let err = CacheError::Timeout {
            key: "LastInfo".to_string(),
            after: Duration::from_millis(300),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("LastInfo"));
        assert!(msg.contains("300ms"));
    }

    #[test]
    fn test_channel_error_display_commit() {
        let err = ChannelError::Commit {
            topic: "weather-info-fetched".to_string(),
            offset: 42,
            reason: "connection reset".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("weather-info-fetched"));
        assert!(msg.contains("42"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "origin_url".to_string(),
            value: "".to_string(),
            reason: "must not be empty".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("origin_url"));
        assert!(msg.contains("must not be empty"));
    }

    #[test]
    fn test_lastinfo_error_from_variants() {
        let fetch = LastInfoError::from(FetchError::BadStatus { status: 500 });
        assert!(matches!(fetch, LastInfoError::Fetch(_)));

        let cache = LastInfoError::from(CacheError::Connectivity {
            reason: "down".to_string(),
        });
        assert!(matches!(cache, LastInfoError::Cache(_)));

        let store = LastInfoError::from(StoreError::Constraint {
            reason: "duplicate key".to_string(),
        });
        assert!(matches!(store, LastInfoError::Store(_)));

        let channel = LastInfoError::from(ChannelError::Decode {
            reason: "eof".to_string(),
        });
        assert!(matches!(channel, LastInfoError::Channel(_)));

        let config = LastInfoError::from(ConfigError::MissingRequired {
            field: "topic".to_string(),
        });
        assert!(matches!(config, LastInfoError::Config(_)));
    }
}
