//! Namespace registry: the single owner of every cache partition.
//!
//! The registry is created once at agent start and shared as
//! [`SharedRegistry`]. It:
//! - Creates namespaces on first open and deletes them on request
//! - Serializes mutations per namespace (one async mutex each, no global write lock)
//! - Seals namespaces of superseded versions so they can only be read
//! - Mirrors every mutation into the partition store when one is configured

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::cache::entry::{CacheEntry, CachedResponse, NamespaceId, NamespaceRole, RequestKey};
use crate::cache::namespace::Namespace;
use crate::config::{Config, NamespaceConfig};
use crate::storage::{DiskStore, StorageError};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Namespace {0} is sealed and can no longer be written")]
    Sealed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Per-namespace statistics for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceStats {
    pub name: String,
    pub entries: usize,
    pub max_entries: Option<usize>,
    pub sealed: bool,
}

/// Shared handle to one namespace.
#[derive(Debug)]
pub struct NamespaceHandle {
    name: String,
    id: Option<NamespaceId>,
    max_entries: Option<usize>,
    sealed: AtomicBool,
    inner: Mutex<Namespace>,
    store: Option<Arc<DiskStore>>,
}

impl NamespaceHandle {
    fn new(
        name: String,
        id: Option<NamespaceId>,
        max_entries: Option<usize>,
        sealed: bool,
        store: Option<Arc<DiskStore>>,
    ) -> Self {
        Self {
            name,
            id,
            max_entries,
            sealed: AtomicBool::new(sealed),
            inner: Mutex::new(Namespace::new()),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parsed identity, `None` for names the agent does not own.
    pub fn id(&self) -> Option<&NamespaceId> {
        self.id.as_ref()
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Look up a response by key.
    pub async fn get(&self, key: &RequestKey) -> Option<CachedResponse> {
        self.inner
            .lock()
            .await
            .get(key)
            .map(|entry| entry.response.clone())
    }

    pub async fn contains(&self, key: &RequestKey) -> bool {
        self.inner.lock().await.contains(key)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Keys from oldest to newest.
    pub async fn keys(&self) -> Vec<RequestKey> {
        self.inner.lock().await.keys()
    }

    /// Take the namespace write lock. Fails if the namespace is sealed.
    ///
    /// Every mutation goes through the returned writer, so mutations of one
    /// namespace never interleave.
    pub async fn writer(&self) -> Result<NamespaceWriter<'_>, RegistryError> {
        let guard = self.inner.lock().await;
        if self.is_sealed() {
            return Err(RegistryError::Sealed(self.name.clone()));
        }
        Ok(NamespaceWriter {
            handle: self,
            guard,
        })
    }

    async fn stats(&self) -> NamespaceStats {
        NamespaceStats {
            name: self.name.clone(),
            entries: self.len().await,
            max_entries: self.max_entries,
            sealed: self.is_sealed(),
        }
    }
}

/// Exclusive write access to one namespace.
pub struct NamespaceWriter<'a> {
    handle: &'a NamespaceHandle,
    guard: MutexGuard<'a, Namespace>,
}

impl NamespaceWriter<'_> {
    pub fn name(&self) -> &str {
        &self.handle.name
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.handle.max_entries
    }

    pub fn len(&self) -> usize {
        self.guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        self.guard.contains(key)
    }

    /// Insert or replace an entry, persisting it first.
    ///
    /// Returns the replaced entry, if any.
    pub async fn insert(
        &mut self,
        key: RequestKey,
        response: CachedResponse,
    ) -> Result<Option<CacheEntry>, RegistryError> {
        let entry = CacheEntry {
            key,
            response,
            seq: self.guard.next_seq(),
            stored_at: chrono::Utc::now(),
        };

        if let Some(store) = &self.handle.store {
            store.write_entry(&self.handle.name, &entry).await?;
        }

        let previous = self.guard.restore(entry);
        if let (Some(store), Some(prev)) = (&self.handle.store, &previous) {
            if let Err(e) = store.remove_entry(&self.handle.name, prev.seq).await {
                // A leftover file is harmless: the newer sequence wins on restore.
                warn!(namespace = %self.handle.name, seq = prev.seq, error = %e, "Failed to remove replaced entry file");
            }
        }

        Ok(previous)
    }

    /// Remove the oldest entry by insertion order.
    pub async fn evict_oldest(&mut self) -> Result<Option<CacheEntry>, RegistryError> {
        let seq = match self.guard.oldest() {
            Some(entry) => entry.seq,
            None => return Ok(None),
        };

        if let Some(store) = &self.handle.store {
            store.remove_entry(&self.handle.name, seq).await?;
        }

        Ok(self.guard.pop_oldest())
    }
}

/// The namespace registry.
#[derive(Debug)]
pub struct Registry {
    /// Prefix of agent-owned namespaces.
    prefix: String,

    /// Version tag of the current deploy.
    version: String,

    /// Entry bounds per role.
    limits: NamespaceConfig,

    /// All namespaces indexed by storage name.
    namespaces: RwLock<HashMap<String, Arc<NamespaceHandle>>>,

    /// Partition store, if persistence is enabled.
    store: Option<Arc<DiskStore>>,
}

impl Registry {
    /// Create a memory-only registry.
    pub fn new(prefix: impl Into<String>, version: impl Into<String>, limits: NamespaceConfig) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
            limits,
            namespaces: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Create a registry from configuration, optionally backed by a partition store.
    pub fn from_config(config: &Config, store: Option<Arc<DiskStore>>) -> Self {
        let registry = Self::new(
            config.agent.cache_prefix.clone(),
            config.agent.version.clone(),
            config.namespaces.clone(),
        );
        match store {
            Some(store) => registry.with_store(store),
            None => registry,
        }
    }

    /// Persist every namespace through `store`.
    pub fn with_store(mut self, store: Arc<DiskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Identity of the current namespace for a role.
    pub fn current_id(&self, role: NamespaceRole) -> NamespaceId {
        NamespaceId::new(self.prefix.clone(), role, self.version.clone())
    }

    /// Whether `name` carries the agent's prefix, whatever its role.
    pub fn owns(&self, name: &str) -> bool {
        name.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Storage names of every current-version namespace.
    pub fn current_names(&self) -> Vec<String> {
        NamespaceRole::ALL
            .iter()
            .map(|role| self.current_id(*role).name())
            .collect()
    }

    fn make_handle(&self, name: &str) -> NamespaceHandle {
        let id = NamespaceId::parse(name, &self.prefix);
        let (max_entries, sealed) = match &id {
            Some(id) => (self.limits.max_entries(id.role), id.version != self.version),
            // Owned but unknown roles belong to some other deploy.
            None => (None, self.owns(name)),
        };
        NamespaceHandle::new(name.to_string(), id, max_entries, sealed, self.store.clone())
    }

    /// Rebuild namespaces from the partition store. Returns the number of entries loaded.
    pub async fn restore(&self) -> Result<usize, RegistryError> {
        let store = match &self.store {
            Some(store) => store.clone(),
            None => return Ok(0),
        };

        let partitions = store.load_partitions().await?;
        let mut loaded = 0;
        let mut namespaces = self.namespaces.write().await;

        for partition in partitions {
            let handle = namespaces
                .entry(partition.name.clone())
                .or_insert_with(|| Arc::new(self.make_handle(&partition.name)))
                .clone();
            let mut inner = handle.inner.lock().await;
            for entry in partition.entries {
                inner.restore(entry);
                loaded += 1;
            }
            debug!(namespace = %partition.name, entries = inner.len(), "Restored namespace");
        }

        info!(namespaces = namespaces.len(), entries = loaded, "Registry restored from disk");
        Ok(loaded)
    }

    /// Open a namespace by storage name, creating it if it does not exist.
    pub async fn open(&self, name: &str) -> Arc<NamespaceHandle> {
        if let Some(handle) = self.namespaces.read().await.get(name) {
            return handle.clone();
        }

        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(namespace = name, "Created namespace");
                Arc::new(self.make_handle(name))
            })
            .clone()
    }

    /// Open the current-version namespace for a role.
    pub async fn open_role(&self, role: NamespaceRole) -> Arc<NamespaceHandle> {
        self.open(&self.current_id(role).name()).await
    }

    /// Look up a namespace without creating it.
    pub async fn get(&self, name: &str) -> Option<Arc<NamespaceHandle>> {
        self.namespaces.read().await.get(name).cloned()
    }

    /// Delete a namespace and its partition. Deleting a missing namespace is a no-op.
    ///
    /// Returns whether a namespace was removed. On storage failure the namespace
    /// stays registered so a later call can retry.
    pub async fn delete(&self, name: &str) -> Result<bool, RegistryError> {
        let handle = match self.get(name).await {
            Some(handle) => handle,
            None => {
                if let Some(store) = &self.store {
                    store.delete_partition(name).await?;
                }
                return Ok(false);
            }
        };

        {
            // Wait for in-flight writers, then refuse any later ones.
            let _inner = handle.inner.lock().await;
            let was_sealed = handle.sealed.swap(true, Ordering::AcqRel);
            if let Some(store) = &self.store {
                if let Err(e) = store.delete_partition(name).await {
                    handle.sealed.store(was_sealed, Ordering::Release);
                    return Err(e.into());
                }
            }
        }

        let mut namespaces = self.namespaces.write().await;
        if namespaces
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, &handle))
        {
            namespaces.remove(name);
        }

        info!(namespace = name, "Deleted namespace");
        Ok(true)
    }

    /// Names of every registered namespace, sorted.
    pub async fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// First hit for `key` across the current namespaces of `roles`, in order.
    ///
    /// Never creates namespaces.
    pub async fn match_current(
        &self,
        roles: &[NamespaceRole],
        key: &RequestKey,
    ) -> Option<(NamespaceRole, CachedResponse)> {
        for &role in roles {
            let handle = match self.get(&self.current_id(role).name()).await {
                Some(handle) => handle,
                None => continue,
            };
            if let Some(response) = handle.get(key).await {
                return Some((role, response));
            }
        }
        None
    }

    /// Statistics for every namespace, sorted by name.
    pub async fn stats(&self) -> Vec<NamespaceStats> {
        let handles: Vec<Arc<NamespaceHandle>> =
            self.namespaces.read().await.values().cloned().collect();

        let mut stats = Vec::with_capacity(handles.len());
        for handle in handles {
            stats.push(handle.stats().await);
        }
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Total number of entries across all namespaces.
    pub async fn total_entries(&self) -> usize {
        self.stats().await.iter().map(|s| s.entries).sum()
    }
}

/// Thread-safe shared registry.
pub type SharedRegistry = Arc<Registry>;

/// Create a new shared registry from configuration.
pub fn new_shared_registry(config: &Config, store: Option<Arc<DiskStore>>) -> SharedRegistry {
    Arc::new(Registry::from_config(config, store))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(version: &str) -> Registry {
        Registry::new("app", version, NamespaceConfig::default())
    }

    fn key(path: &str) -> RequestKey {
        RequestKey::from_url(&reqwest::Url::parse(&format!("https://app.example{path}")).unwrap())
    }

    fn resp(body: &str) -> CachedResponse {
        CachedResponse::new(200, vec![], body.to_string())
    }

    #[tokio::test]
    async fn test_open_creates_once() {
        let reg = registry("v1");
        let a = reg.open("app-static-v1").await;
        let b = reg.open("app-static-v1").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.list_names().await, vec!["app-static-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_limits_follow_role() {
        let reg = registry("v1");
        assert_eq!(reg.open_role(NamespaceRole::Static).await.max_entries(), None);
        assert_eq!(reg.open_role(NamespaceRole::Dynamic).await.max_entries(), Some(50));
        assert_eq!(reg.open_role(NamespaceRole::Images).await.max_entries(), Some(30));
        assert_eq!(reg.open_role(NamespaceRole::Api).await.max_entries(), Some(20));
        assert_eq!(reg.open("someone-else").await.max_entries(), None);
    }

    #[tokio::test]
    async fn test_ownership_is_by_prefix() {
        let reg = registry("v1");
        assert!(reg.owns("app-static-v1"));
        assert!(reg.owns("app-messages-v1"));
        assert!(!reg.owns("apple-static-v1"));
        assert!(!reg.owns("other-static-v1"));

        assert!(reg.open("app-messages-v1").await.is_sealed());
        assert!(!reg.open("other-static-v1").await.is_sealed());
        assert_eq!(reg.current_names().len(), NamespaceRole::ALL.len());
        assert!(reg.current_names().contains(&"app-api-v1".to_string()));
    }

    #[tokio::test]
    async fn test_old_versions_are_sealed() {
        let reg = registry("v2");
        let old = reg.open("app-static-v1").await;
        assert!(old.is_sealed());
        assert!(matches!(old.writer().await, Err(RegistryError::Sealed(_))));

        let current = reg.open_role(NamespaceRole::Static).await;
        assert!(!current.is_sealed());
        current.writer().await.unwrap().insert(key("/"), resp("root")).await.unwrap();
        assert_eq!(current.get(&key("/")).await.unwrap().body, "root");
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop() {
        let reg = registry("v1");
        assert!(!reg.delete("app-static-v1").await.unwrap());
        reg.open("app-static-v1").await;
        assert!(reg.delete("app-static-v1").await.unwrap());
        assert!(reg.list_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_handle_rejects_writes() {
        let reg = registry("v1");
        let handle = reg.open_role(NamespaceRole::Dynamic).await;
        reg.delete(handle.name()).await.unwrap();
        assert!(matches!(handle.writer().await, Err(RegistryError::Sealed(_))));
    }

    #[tokio::test]
    async fn test_match_current_respects_role_order() {
        let reg = registry("v1");
        let dynamic = reg.open_role(NamespaceRole::Dynamic).await;
        let static_ns = reg.open_role(NamespaceRole::Static).await;
        dynamic.writer().await.unwrap().insert(key("/"), resp("dynamic")).await.unwrap();
        static_ns.writer().await.unwrap().insert(key("/"), resp("static")).await.unwrap();

        let (role, hit) = reg
            .match_current(&[NamespaceRole::Static, NamespaceRole::Dynamic], &key("/"))
            .await
            .unwrap();
        assert_eq!(role, NamespaceRole::Static);
        assert_eq!(hit.body, "static");

        assert!(reg.match_current(&[NamespaceRole::Images], &key("/")).await.is_none());
        // Lookups never create namespaces.
        assert!(reg.get("app-images-v1").await.is_none());
    }

    #[tokio::test]
    async fn test_match_current_ignores_old_versions() {
        // An old version only ever reaches the registry through restore, so
        // seed it the same way.
        let reg = registry("v2");
        let old = reg.open("app-static-v1").await;
        old.inner.lock().await.insert(key("/"), resp("old"));

        assert_eq!(old.get(&key("/")).await.unwrap().body, "old");
        assert!(reg.match_current(&[NamespaceRole::Static], &key("/")).await.is_none());
    }
}
