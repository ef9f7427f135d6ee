//! Eviction manager: bounded writes into a namespace.
//!
//! Bounded namespaces are strict FIFO caches. When a write of a new key would
//! push the entry count past `max_entries`, the oldest-inserted entry goes
//! first. Access recency plays no part; the bounded namespaces hold
//! re-fetchable assets.

use tracing::debug;

use crate::cache::entry::{CachedResponse, RequestKey};
use crate::cache::registry::{NamespaceHandle, RegistryError};

/// Result of a single put.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOutcome {
    /// Key evicted to make room, if any.
    pub evicted: Option<RequestKey>,

    /// Whether an existing entry for the same key was replaced.
    pub replaced: bool,
}

/// Writes entries into namespaces while enforcing their bound.
#[derive(Debug, Clone, Default)]
pub struct EvictionManager;

impl EvictionManager {
    pub fn new() -> Self {
        Self
    }

    /// Insert `response` under `key`, evicting the oldest entry first if the
    /// namespace is full.
    ///
    /// Check and insert happen under the namespace write lock, so concurrent
    /// puts into one namespace can never overshoot the bound.
    pub async fn put(
        &self,
        namespace: &NamespaceHandle,
        key: RequestKey,
        response: CachedResponse,
    ) -> Result<PutOutcome, RegistryError> {
        let mut writer = namespace.writer().await?;
        let mut outcome = PutOutcome::default();

        if let Some(max) = writer.max_entries() {
            if !writer.contains(&key) && writer.len() >= max {
                if let Some(victim) = writer.evict_oldest().await? {
                    debug!(
                        namespace = writer.name(),
                        key = %victim.key,
                        max_entries = max,
                        "Evicted oldest entry"
                    );
                    outcome.evicted = Some(victim.key);
                }
            }
        }

        outcome.replaced = writer.insert(key, response).await?.is_some();
        Ok(outcome)
    }
}
