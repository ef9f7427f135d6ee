//! The network collaborator.
//!
//! The agent's only call-out besides the cache. Any HTTP status counts as a
//! successful fetch here; deciding what to do with a 404 or 500 is up to the
//! caller. Only transport failures are errors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use thiserror::Error;
use tracing::debug;

use crate::cache::entry::CachedResponse;
use crate::config::NetworkConfig;
use crate::network::request::AgentRequest;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

/// Something that can perform a network fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &AgentRequest) -> Result<CachedResponse, FetchError>;
}

/// Fetcher backed by a shared reqwest client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &NetworkConfig) -> Result<Self, FetchError> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &AgentRequest) -> Result<CachedResponse, FetchError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        if let Some(accept) = &request.accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        debug!(url = %request.url, status, size = body.len(), "Fetched from network");

        Ok(CachedResponse::new(status, headers, body))
    }
}
