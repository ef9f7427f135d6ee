//! Version migrator: garbage-collects namespaces of superseded deploys.
//!
//! This is the only mechanism that removes old generations; there is no TTL.

use tracing::{info, warn};

use crate::cache::entry::{NamespaceId, NamespaceRole};
use crate::cache::registry::SharedRegistry;

/// What one migration pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Namespaces deleted.
    pub deleted: Vec<String>,
    /// Namespaces that could not be deleted, with the reason. Retried next activation.
    pub failed: Vec<(String, String)>,
    /// Agent-owned namespaces of the current version that were kept.
    pub retained: Vec<String>,
}

pub struct VersionMigrator {
    registry: SharedRegistry,
}

impl VersionMigrator {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    /// Delete every agent-owned namespace that is not a current-version one.
    ///
    /// A namespace is agent-owned when its name carries the agent's prefix,
    /// whatever its role. Other names are never touched. A failed deletion
    /// does not stop the pass.
    pub async fn migrate(&self, current_version: &str) -> MigrationReport {
        let prefix = self.registry.prefix().to_string();
        let current: Vec<String> = NamespaceRole::ALL
            .iter()
            .map(|role| NamespaceId::new(prefix.clone(), *role, current_version).name())
            .collect();
        let mut report = MigrationReport::default();

        for name in self.registry.list_names().await {
            if !self.registry.owns(&name) {
                continue;
            }
            if current.contains(&name) {
                report.retained.push(name);
                continue;
            }

            info!(namespace = %name, current = current_version, "Deleting old cache");
            match self.registry.delete(&name).await {
                Ok(_) => report.deleted.push(name),
                Err(e) => {
                    warn!(namespace = %name, error = %e, "Failed to delete old cache; will retry on next activation");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        report
    }
}
