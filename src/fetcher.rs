//! Upstream fetch for uncached plaintext requests.
//!
//! The fetcher is pure I/O: one GET, no retry, no caching. The handler
//! decides what to do with the body.

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{ProxyError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBody {
    pub body: Bytes,
    pub duration_ms: u64,
}

#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    /// Fetch `url`. Only transport failures are errors; any HTTP status
    /// yields its body.
    async fn fetch(&self, url: &str) -> Result<FetchedBody>;
}

/// reqwest-backed fetcher. Uses the client's default timeouts.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher that ignores `HTTP_PROXY` and friends, so a proxy
    /// started with its own address in the environment cannot loop.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| ProxyError::Config(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UpstreamFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedBody> {
        let started = Instant::now();

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(url, e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| fetch_error(url, e))?;

        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            "Fetched {} ({}, {} bytes) in {} ms",
            url,
            status,
            body.len(),
            duration_ms
        );

        Ok(FetchedBody { body, duration_ms })
    }
}

fn fetch_error(url: &str, e: reqwest::Error) -> ProxyError {
    ProxyError::Fetch {
        url: url.to_string(),
        reason: e.to_string(),
    }
}
