//! Service-level errors and driver error mapping.
//!
//! Capability implementations report the core error taxonomy
//! ([`StoreError`], [`ChannelError`], [`FetchError`]); the helpers here
//! classify driver errors into it. [`ServiceError`] covers start-up of the
//! binaries only.

use deadpool_postgres::PoolError;
use lastinfo_core::{ChannelError, FetchError, LastInfoError, StoreError};
use lastinfo_storage::LmdbCacheError;
use std::time::Duration;
use thiserror::Error;

/// Errors that abort service start-up.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    LastInfo(#[from] LastInfoError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(#[from] LmdbCacheError),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_postgres::Error> for ServiceError {
    fn from(err: tokio_postgres::Error) -> Self {
        ServiceError::Database(err.to_string())
    }
}

impl From<PoolError> for ServiceError {
    fn from(err: PoolError) -> Self {
        ServiceError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::HttpClient(err.to_string())
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        ServiceError::LastInfo(err.into())
    }
}

impl From<ChannelError> for ServiceError {
    fn from(err: ChannelError) -> Self {
        ServiceError::LastInfo(err.into())
    }
}

/// Result type alias for service start-up.
pub type ServiceResult<T> = Result<T, ServiceError>;

// ============================================================================
// DRIVER ERROR CLASSIFICATION
// ============================================================================

/// SQLSTATE class 23: integrity constraint violation.
const INTEGRITY_CONSTRAINT_CLASS: &str = "23";

/// Classify a PostgreSQL error.
pub fn store_error(err: tokio_postgres::Error) -> StoreError {
    match err.code() {
        Some(state) if state.code().starts_with(INTEGRITY_CONSTRAINT_CLASS) => {
            StoreError::Constraint {
                reason: err.to_string(),
            }
        }
        _ => StoreError::Connectivity {
            reason: err.to_string(),
        },
    }
}

/// Classify a connection pool error.
pub fn pool_store_error(err: PoolError, wait: Duration) -> StoreError {
    match err {
        PoolError::Timeout(_) => StoreError::Timeout { after: wait },
        PoolError::Backend(e) => store_error(e),
        other => StoreError::Connectivity {
            reason: other.to_string(),
        },
    }
}

/// Classify a PostgreSQL error raised while reading or committing the event log.
pub fn consume_error(topic: &str, err: impl std::fmt::Display) -> ChannelError {
    ChannelError::Consume {
        topic: topic.to_string(),
        reason: err.to_string(),
    }
}

/// Classify an HTTP client error.
///
/// `client_timeout` is reported when the client's own timeout fired.
pub fn fetch_error(err: reqwest::Error, client_timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            after: client_timeout,
        }
    } else if let Some(status) = err.status() {
        FetchError::BadStatus {
            status: status.as_u16(),
        }
    } else {
        FetchError::Network {
            reason: err.to_string(),
        }
    }
}
