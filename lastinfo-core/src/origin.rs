//! Origin capability.
//!
//! Pure trait definition. The HTTP implementation lives in lastinfo-service.

use async_trait::async_trait;
use std::time::Duration;

use crate::{FetchError, Record};

/// Calls the external data source once and returns a timestamped record.
///
/// Implementations capture the observation instant before issuing the request
/// and must return within `timeout` (reporting [`FetchError::Timeout`]) even
/// if their own client-level timeout is longer.
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    async fn fetch(&self, timeout: Duration) -> Result<Record, FetchError>;
}
