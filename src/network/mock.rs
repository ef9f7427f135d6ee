//! Scriptable fetcher for testing.
//!
//! Serves pre-configured responses, records every call, and can be switched
//! offline to simulate a dead network.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::entry::CachedResponse;
use crate::network::fetcher::{FetchError, Fetcher};
use crate::network::request::AgentRequest;

/// A test double for the network.
///
/// Unknown URLs answer 404, like a real server would.
pub struct MockFetcher {
    online: AtomicBool,
    routes: Mutex<HashMap<String, CachedResponse>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    received: Mutex<Vec<AgentRequest>>,
    latency: Mutex<Option<Duration>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        MockFetcher {
            online: AtomicBool::new(true),
            routes: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            latency: Mutex::new(None),
        }
    }

    /// Serve `body` with status 200 at the absolute `url`.
    pub fn route(&self, url: &str, content_type: &str, body: &str) {
        self.route_response(
            url,
            CachedResponse::new(
                200,
                vec![("content-type".to_string(), content_type.to_string())],
                body.to_string(),
            ),
        );
    }

    /// Serve an arbitrary response at the absolute `url`.
    pub fn route_response(&self, url: &str, response: CachedResponse) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(url.to_string(), response);
        }
    }

    /// Make requests to `url` fail at the transport level even while online.
    pub fn fail(&self, url: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(url.to_string());
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Delay every answer by `latency`, to simulate a slow network.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut slot) = self.latency.lock() {
            *slot = Some(latency);
        }
    }

    /// Every request received so far, with headers and body.
    pub fn received(&self) -> Vec<AgentRequest> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Every URL fetched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of fetches of one URL.
    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == url).count()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &AgentRequest) -> Result<CachedResponse, FetchError> {
        let url = request.key().as_str().to_string();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(url.clone());
        }
        if let Ok(mut received) = self.received.lock() {
            received.push(request.clone());
        }
        let latency = self.latency.lock().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(FetchError::Network(format!("mock: offline ({url})")));
        }
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(&url))
            .unwrap_or(false);
        if failing {
            return Err(FetchError::Network(format!("mock: connection reset ({url})")));
        }

        let routed = self
            .routes
            .lock()
            .ok()
            .and_then(|routes| routes.get(&url).cloned());
        Ok(routed.unwrap_or_else(|| CachedResponse::new(404, vec![], "not found")))
    }
}
