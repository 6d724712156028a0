//! HTTP origin fetcher.

use std::time::Duration;

use async_trait::async_trait;
use lastinfo_core::{observation_instant, FetchError, OriginFetcher, Record};
use reqwest::Client;

use crate::constants::ORIGIN_USER_AGENT;
use crate::error::{fetch_error, ServiceResult};

/// Fetches the origin document with one GET request per call.
///
/// The underlying [`Client`] is built once and shared by every call; its
/// connection pool and client-level timeout are fixed at construction.
#[derive(Clone)]
pub struct HttpOriginFetcher {
    client: Client,
    url: String,
    client_timeout: Duration,
}

impl HttpOriginFetcher {
    /// Create a fetcher for `url`.
    ///
    /// # Arguments
    /// * `url` - Absolute URL of the origin document
    /// * `client_timeout` - Client-level timeout applied to every request,
    ///   in addition to the per-call timeout passed to `fetch`
    pub fn new(url: impl Into<String>, client_timeout: Duration) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(client_timeout)
            .user_agent(ORIGIN_USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            client_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self) -> Result<String, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| fetch_error(e, self.client_timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus {
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| fetch_error(e, self.client_timeout))
    }
}

#[async_trait]
impl OriginFetcher for HttpOriginFetcher {
    async fn fetch(&self, timeout: Duration) -> Result<Record, FetchError> {
        let observed_at = observation_instant();

        let body = tokio::time::timeout(timeout, self.request())
            .await
            .map_err(|_| FetchError::Timeout { after: timeout })??;

        tracing::debug!(url = %self.url, bytes = body.len(), "Origin fetch succeeded");
        Ok(Record::new(observed_at, body))
    }
}

impl std::fmt::Debug for HttpOriginFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpOriginFetcher")
            .field("url", &self.url)
            .field("client_timeout", &self.client_timeout)
            .finish()
    }
}
