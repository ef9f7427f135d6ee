//! Precache installer: fills the static namespace at install time.
//!
//! The critical manifest is all-or-nothing: every entry is fetched before any
//! is written, and a single failure aborts the install. The optional manifest
//! is best-effort, entry by entry.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::entry::{CachedResponse, NamespaceRole, RequestKey};
use crate::cache::evictor::EvictionManager;
use crate::cache::registry::{RegistryError, SharedRegistry};
use crate::network::{AgentRequest, Fetcher};

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Invalid manifest entry {entry:?}: {reason}")]
    InvalidUrl { entry: String, reason: String },

    #[error("Manifest entry {0} is not on the application origin")]
    CrossOrigin(String),
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Critical resource {url} could not be fetched: {reason}")]
    CriticalFetch { url: String, reason: String },

    #[error("Failed to store precached resource: {0}")]
    Storage(#[from] RegistryError),
}

/// Ordered list of resources to precache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<String>,
}

impl Manifest {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry unless it is already listed.
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        let entry = entry.into();
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
        self
    }

    fn resolve_one(entry: &str, origin: &Url) -> Result<Url, ManifestError> {
        let url = origin
            .join(entry)
            .map_err(|e| ManifestError::InvalidUrl {
                entry: entry.to_string(),
                reason: e.to_string(),
            })?;
        if url.origin() != origin.origin() {
            return Err(ManifestError::CrossOrigin(url.to_string()));
        }
        Ok(url)
    }

    /// Resolve every entry against `origin`, collapsing duplicates (first wins).
    /// Fails on the first invalid or cross-origin entry.
    pub fn resolve(&self, origin: &Url) -> Result<Vec<Url>, ManifestError> {
        let mut seen = HashSet::new();
        let mut urls = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let url = Self::resolve_one(entry, origin)?;
            if seen.insert(RequestKey::from_url(&url)) {
                urls.push(url);
            }
        }
        Ok(urls)
    }

    /// Like [`Manifest::resolve`], but returns rejected entries instead of failing.
    pub fn resolve_lenient(&self, origin: &Url) -> (Vec<Url>, Vec<String>) {
        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        let mut rejected = Vec::new();
        for entry in &self.entries {
            match Self::resolve_one(entry, origin) {
                Ok(url) => {
                    if seen.insert(RequestKey::from_url(&url)) {
                        urls.push(url);
                    }
                }
                Err(e) => {
                    warn!(entry = %entry, error = %e, "Skipping manifest entry");
                    rejected.push(entry.clone());
                }
            }
        }
        (urls, rejected)
    }
}

/// Outcome of a successful install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Critical resources stored.
    pub critical: usize,
    /// Optional resources stored.
    pub optional_cached: usize,
    /// Optional entries that could not be fetched or stored.
    pub optional_skipped: Vec<String>,
}

/// Fetches manifests into the static namespace.
pub struct PrecacheInstaller {
    registry: SharedRegistry,
    evictor: EvictionManager,
    fetcher: Arc<dyn Fetcher>,
    origin: Url,
    concurrency: usize,
}

impl PrecacheInstaller {
    pub fn new(
        registry: SharedRegistry,
        fetcher: Arc<dyn Fetcher>,
        origin: Url,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            evictor: EvictionManager::new(),
            fetcher,
            origin,
            concurrency: concurrency.max(1),
        }
    }

    /// Precache `critical` (mandatory) then `optional` (best-effort).
    pub async fn install(
        &self,
        critical: &Manifest,
        optional: &Manifest,
    ) -> Result<InstallReport, InstallError> {
        let urls = critical.resolve(&self.origin)?;
        info!(critical = urls.len(), optional = optional.entries().len(), "Precaching");

        let fetched: Vec<(Url, CachedResponse)> = stream::iter(urls)
            .map(|url| async move {
                let request = AgentRequest::get(url.clone());
                match self.fetcher.fetch(&request).await {
                    Ok(response) if response.is_success() => Ok((url, response)),
                    Ok(response) => Err(InstallError::CriticalFetch {
                        url: url.to_string(),
                        reason: format!("HTTP status {}", response.status),
                    }),
                    Err(e) => Err(InstallError::CriticalFetch {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }),
                }
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let static_ns = self.registry.open_role(NamespaceRole::Static).await;
        for (url, response) in &fetched {
            self.evictor
                .put(&static_ns, RequestKey::from_url(url), response.clone())
                .await?;
        }
        info!(count = fetched.len(), namespace = static_ns.name(), "Critical resources cached");

        let (optional_cached, optional_skipped) = self.cache_best_effort(optional).await;

        Ok(InstallReport {
            critical: fetched.len(),
            optional_cached,
            optional_skipped,
        })
    }

    /// Fetch and store each entry independently, skipping failures.
    ///
    /// Returns the number stored and the entries skipped.
    pub async fn cache_best_effort(&self, manifest: &Manifest) -> (usize, Vec<String>) {
        let (urls, mut skipped) = manifest.resolve_lenient(&self.origin);
        if urls.is_empty() {
            return (0, skipped);
        }

        let static_ns = self.registry.open_role(NamespaceRole::Static).await;
        let results: Vec<(Url, Result<CachedResponse, String>)> = stream::iter(urls)
            .map(|url| async move {
                let request = AgentRequest::get(url.clone());
                let result = match self.fetcher.fetch(&request).await {
                    Ok(response) if response.is_success() => Ok(response),
                    Ok(response) => Err(format!("HTTP status {}", response.status)),
                    Err(e) => Err(e.to_string()),
                };
                (url, result)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut cached = 0;
        for (url, result) in results {
            let stored = match result {
                Ok(response) => self
                    .evictor
                    .put(&static_ns, RequestKey::from_url(&url), response)
                    .await
                    .map_err(|e| e.to_string()),
                Err(reason) => Err(reason),
            };
            match stored {
                Ok(_) => {
                    debug!(url = %url, "Optional resource cached");
                    cached += 1;
                }
                Err(reason) => {
                    warn!(url = %url, reason = %reason, "Optional asset failed");
                    skipped.push(url.to_string());
                }
            }
        }

        (cached, skipped)
    }
}
