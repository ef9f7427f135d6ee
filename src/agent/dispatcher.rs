//! Strategy dispatcher: routes each request to its serving strategy.
//!
//! | Class                  | Strategy      | Writes into |
//! |------------------------|---------------|-------------|
//! | Api                    | network-first | api         |
//! | Document               | network-first | dynamic     |
//! | Script (script/style)  | cache-first   | dynamic     |
//! | Image                  | cache-first   | images      |
//! | Font                   | cache-first   | fonts       |
//! | CrossOrigin / Uncached | network only  | nothing     |
//!
//! API calls have a deadline; past it the cached copy is served instead.
//! Only 2xx responses are written. Write-back failures are logged and never
//! fail the request.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::agent::classify::{classify, ResourceClass};
use crate::cache::entry::{CachedResponse, NamespaceRole, RequestKey};
use crate::cache::evictor::EvictionManager;
use crate::cache::registry::SharedRegistry;
use crate::config::FallbackOrder;
use crate::metrics::AgentMetrics;
use crate::network::{AgentRequest, FetchError, Fetcher};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Network request for {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Network request for {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("{url} is unavailable offline and no fallback document is cached")]
    Offline { url: String },
}

/// Routes intercepted requests to a caching strategy.
pub struct Dispatcher {
    registry: SharedRegistry,
    evictor: EvictionManager,
    fetcher: Arc<dyn Fetcher>,
    origin: Url,
    offline_key: RequestKey,
    fallback_order: FallbackOrder,
    api_timeout: Duration,
    metrics: Arc<AgentMetrics>,
}

impl Dispatcher {
    pub fn new(
        registry: SharedRegistry,
        fetcher: Arc<dyn Fetcher>,
        origin: Url,
        offline_document: Url,
        fallback_order: FallbackOrder,
        metrics: Arc<AgentMetrics>,
    ) -> Self {
        Self {
            registry,
            evictor: EvictionManager::new(),
            fetcher,
            origin,
            offline_key: RequestKey::from_url(&offline_document),
            fallback_order,
            api_timeout: Duration::from_secs(5),
            metrics,
        }
    }

    /// Deadline for API requests before falling back to the cache.
    pub fn with_api_timeout(mut self, timeout: Duration) -> Self {
        self.api_timeout = timeout;
        self
    }

    /// Serve one request.
    #[tracing::instrument(
        skip_all,
        fields(request_id = %uuid::Uuid::new_v4(), url = %request.url)
    )]
    pub async fn handle(&self, request: &AgentRequest) -> Result<CachedResponse, DispatchError> {
        let class = classify(request, &self.origin);
        self.metrics
            .requests
            .with_label_values(&[class.as_str()])
            .inc();
        debug!(class = %class, "Classified request");

        match class {
            ResourceClass::Api => self.api_network_first(request, class).await,
            ResourceClass::Document => self.network_first(request, class).await,
            ResourceClass::Script | ResourceClass::Image | ResourceClass::Font => {
                self.cache_first(request, class).await
            }
            ResourceClass::CrossOrigin | ResourceClass::Uncached => {
                self.network_only(request, class).await
            }
        }
    }

    /// Fetch without touching any namespace.
    pub async fn network_only(
        &self,
        request: &AgentRequest,
        class: ResourceClass,
    ) -> Result<CachedResponse, DispatchError> {
        self.fetch(request, class).await
    }

    /// Re-fetch a document into "dynamic" outside of any client request.
    ///
    /// Returns whether a fresh copy was stored.
    pub async fn refresh(&self, url: Url) -> Result<bool, DispatchError> {
        let request = AgentRequest::navigate(url);
        let response = self.fetch(&request, ResourceClass::Document).await?;
        if !response.is_success() {
            debug!(status = response.status, "Refresh returned an error status, keeping cached copy");
            return Ok(false);
        }
        self.write_back(NamespaceRole::Dynamic, request.key(), &response)
            .await;
        Ok(true)
    }

    async fn fetch(
        &self,
        request: &AgentRequest,
        class: ResourceClass,
    ) -> Result<CachedResponse, DispatchError> {
        self.fetcher.fetch(request).await.map_err(|source| {
            self.metrics
                .network_failures
                .with_label_values(&[class.as_str()])
                .inc();
            DispatchError::Network {
                url: request.url.to_string(),
                source,
            }
        })
    }

    /// Cache-first: answer from the class namespace or the precache, else the network.
    async fn cache_first(
        &self,
        request: &AgentRequest,
        class: ResourceClass,
    ) -> Result<CachedResponse, DispatchError> {
        let key = request.key();
        if let Some((role, response)) = self
            .registry
            .match_current(&class.lookup_order(), &key)
            .await
        {
            self.metrics
                .cache_hits
                .with_label_values(&[role.as_str()])
                .inc();
            debug!(namespace = %role, "Cache hit");
            return Ok(response);
        }

        let Some(role) = class.namespace() else {
            return self.fetch(request, class).await;
        };
        self.metrics
            .cache_misses
            .with_label_values(&[role.as_str()])
            .inc();

        let response = self.fetch(request, class).await?;
        if response.is_success() {
            self.write_back(role, key, &response).await;
        }
        Ok(response)
    }

    /// Network-first for documents, with cache and offline-document fallback.
    async fn network_first(
        &self,
        request: &AgentRequest,
        class: ResourceClass,
    ) -> Result<CachedResponse, DispatchError> {
        match self.fetch(request, class).await {
            Ok(response) => {
                if response.is_success() {
                    self.write_back(NamespaceRole::Dynamic, request.key(), &response)
                        .await;
                }
                Ok(response)
            }
            Err(err) => {
                warn!(error = %err, "Navigation failed, looking for a fallback");
                match self.document_fallback(&request.key()).await {
                    Some(response) => {
                        self.metrics.offline_fallbacks.inc();
                        Ok(response)
                    }
                    None => Err(DispatchError::Offline {
                        url: request.url.to_string(),
                    }),
                }
            }
        }
    }

    /// Network-first for API calls: bounded by a deadline, then the cached copy.
    ///
    /// Requests accepting HTML also fall back to the offline document.
    async fn api_network_first(
        &self,
        request: &AgentRequest,
        class: ResourceClass,
    ) -> Result<CachedResponse, DispatchError> {
        let fetched = match tokio::time::timeout(self.api_timeout, self.fetch(request, class)).await
        {
            Ok(result) => result,
            Err(_) => {
                self.metrics
                    .network_failures
                    .with_label_values(&[class.as_str()])
                    .inc();
                Err(DispatchError::Timeout {
                    url: request.url.to_string(),
                    after: self.api_timeout,
                })
            }
        };

        let err = match fetched {
            Ok(response) => {
                if response.is_success() {
                    self.write_back(NamespaceRole::Api, request.key(), &response)
                        .await;
                }
                return Ok(response);
            }
            Err(err) => err,
        };

        warn!(error = %err, "API request failed, looking for a cached copy");
        if let Some((role, response)) = self
            .registry
            .match_current(&class.lookup_order(), &request.key())
            .await
        {
            self.metrics
                .cache_hits
                .with_label_values(&[role.as_str()])
                .inc();
            self.metrics.offline_fallbacks.inc();
            return Ok(response);
        }
        if request.accepts_html() {
            if let Some(response) = self.offline_document().await {
                self.metrics.offline_fallbacks.inc();
                return Ok(response);
            }
        }
        Err(err)
    }

    async fn cached_document(&self, key: &RequestKey) -> Option<CachedResponse> {
        let (role, response) = self
            .registry
            .match_current(&[NamespaceRole::Dynamic, NamespaceRole::Static], key)
            .await?;
        info!(namespace = %role, "Serving document from cache");
        Some(response)
    }

    async fn offline_document(&self) -> Option<CachedResponse> {
        let (_, response) = self
            .registry
            .match_current(
                &[NamespaceRole::Static, NamespaceRole::Dynamic],
                &self.offline_key,
            )
            .await?;
        info!(document = %self.offline_key, "Serving offline document");
        Some(response)
    }

    async fn document_fallback(&self, key: &RequestKey) -> Option<CachedResponse> {
        match self.fallback_order {
            FallbackOrder::CacheThenOffline => match self.cached_document(key).await {
                Some(response) => Some(response),
                None => self.offline_document().await,
            },
            FallbackOrder::OfflineThenCache => match self.offline_document().await {
                Some(response) => Some(response),
                None => self.cached_document(key).await,
            },
        }
    }

    async fn write_back(&self, role: NamespaceRole, key: RequestKey, response: &CachedResponse) {
        let namespace = self.registry.open_role(role).await;
        match self.evictor.put(&namespace, key, response.clone()).await {
            Ok(outcome) => {
                if outcome.evicted.is_some() {
                    self.metrics
                        .evictions
                        .with_label_values(&[role.as_str()])
                        .inc();
                }
            }
            Err(e) => warn!(namespace = namespace.name(), error = %e, "Cache write-back failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::registry::Registry;
    use crate::config::NamespaceConfig;
    use crate::network::mock::MockFetcher;

    const ORIGIN: &str = "https://app.example";

    struct Fixture {
        registry: SharedRegistry,
        mock: Arc<MockFetcher>,
        dispatcher: Dispatcher,
    }

    fn fixture(order: FallbackOrder) -> Fixture {
        let registry = Arc::new(Registry::new("app", "v1", NamespaceConfig::default()));
        let mock = Arc::new(MockFetcher::new());
        let origin = Url::parse(ORIGIN).unwrap();
        let dispatcher = Dispatcher::new(
            registry.clone(),
            mock.clone(),
            origin.clone(),
            origin.join("/offline.html").unwrap(),
            order,
            Arc::new(AgentMetrics::new().unwrap()),
        );
        Fixture {
            registry,
            mock,
            dispatcher,
        }
    }

    fn url(path: &str) -> Url {
        Url::parse(ORIGIN).unwrap().join(path).unwrap()
    }

    #[tokio::test]
    async fn test_cache_first_hits_without_network() {
        let f = fixture(FallbackOrder::CacheThenOffline);
        f.mock.route(&format!("{ORIGIN}/app.js"), "text/javascript", "v1");

        let req = AgentRequest::get(url("/app.js"));
        assert_eq!(f.dispatcher.handle(&req).await.unwrap().body, "v1");
        f.mock.set_online(false);
        assert_eq!(f.dispatcher.handle(&req).await.unwrap().body, "v1");
        assert_eq!(f.mock.call_count(&format!("{ORIGIN}/app.js")), 1);
    }

    #[tokio::test]
    async fn test_cache_first_propagates_network_failure() {
        let f = fixture(FallbackOrder::CacheThenOffline);
        f.mock.set_online(false);

        let err = f
            .dispatcher
            .handle(&AgentRequest::get(url("/missing.png")))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Network { .. }));
    }

    #[tokio::test]
    async fn test_error_status_is_returned_but_not_cached() {
        let f = fixture(FallbackOrder::CacheThenOffline);
        let req = AgentRequest::get(url("/gone.css"));

        assert_eq!(f.dispatcher.handle(&req).await.unwrap().status, 404);
        assert!(f.registry.get("app-dynamic-v1").await.is_none());
    }

    #[tokio::test]
    async fn test_cross_origin_is_never_cached() {
        let f = fixture(FallbackOrder::CacheThenOffline);
        f.mock.route("https://cdn.example/lib.js", "text/javascript", "lib");

        let req = AgentRequest::get(Url::parse("https://cdn.example/lib.js").unwrap());
        assert_eq!(f.dispatcher.handle(&req).await.unwrap().body, "lib");
        assert_eq!(f.dispatcher.handle(&req).await.unwrap().body, "lib");
        assert_eq!(f.mock.call_count("https://cdn.example/lib.js"), 2);
        assert!(f.registry.list_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_offline_first_fallback_order() {
        let f = fixture(FallbackOrder::OfflineThenCache);
        f.mock.route(&format!("{ORIGIN}/feed"), "text/html", "live feed");
        f.mock.route(&format!("{ORIGIN}/offline.html"), "text/html", "offline");

        let static_ns = f.registry.open_role(NamespaceRole::Static).await;
        let offline = AgentRequest::get(url("/offline.html"));
        let offline_body = f.mock.fetch(&offline).await.unwrap();
        EvictionManager::new()
            .put(&static_ns, offline.key(), offline_body)
            .await
            .unwrap();

        let nav = AgentRequest::navigate(url("/feed"));
        assert_eq!(f.dispatcher.handle(&nav).await.unwrap().body, "live feed");

        f.mock.set_online(false);
        assert_eq!(f.dispatcher.handle(&nav).await.unwrap().body, "offline");
    }

    #[tokio::test]
    async fn test_api_falls_back_to_cached_copy() {
        let f = fixture(FallbackOrder::CacheThenOffline);
        f.mock.route(&format!("{ORIGIN}/api/feed"), "application/json", "[1,2]");
        let req = AgentRequest::get(url("/api/feed"));

        assert_eq!(f.dispatcher.handle(&req).await.unwrap().body, "[1,2]");
        assert_eq!(f.registry.get("app-api-v1").await.unwrap().len().await, 1);

        // Every API call goes to the network first.
        f.mock.route(&format!("{ORIGIN}/api/feed"), "application/json", "[1,2,3]");
        assert_eq!(f.dispatcher.handle(&req).await.unwrap().body, "[1,2,3]");

        f.mock.set_online(false);
        assert_eq!(f.dispatcher.handle(&req).await.unwrap().body, "[1,2,3]");

        let err = f
            .dispatcher
            .handle(&AgentRequest::get(url("/api/unknown")))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Network { .. }));
    }

    #[tokio::test]
    async fn test_slow_api_serves_cached_copy() {
        let mut f = fixture(FallbackOrder::CacheThenOffline);
        f.dispatcher = f.dispatcher.with_api_timeout(Duration::from_millis(50));
        f.mock.route(&format!("{ORIGIN}/api/feed"), "application/json", "cached");
        let req = AgentRequest::get(url("/api/feed"));
        f.dispatcher.handle(&req).await.unwrap();

        f.mock.route(&format!("{ORIGIN}/api/feed"), "application/json", "late");
        f.mock.set_latency(Duration::from_millis(500));
        assert_eq!(f.dispatcher.handle(&req).await.unwrap().body, "cached");

        let err = f
            .dispatcher
            .handle(&AgentRequest::get(url("/api/other")))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_document_without_any_fallback() {
        let f = fixture(FallbackOrder::CacheThenOffline);
        f.mock.set_online(false);

        let err = f
            .dispatcher
            .handle(&AgentRequest::navigate(url("/settings")))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Offline { .. }));
    }
}
