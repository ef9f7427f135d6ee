//! Runtime configuration for offline-agent.
//!
//! Configuration is loaded from a JSON file or constructed programmatically.
//! Every section has defaults, so a partial file is enough to start the agent.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::cache::entry::NamespaceRole;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "offline-agent", about = "Offline resource-caching agent for a single web origin")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "agent.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides `server.listen`).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity of this deployment.
    pub agent: AgentConfig,

    /// Host front settings.
    pub server: ServerConfig,

    /// Entry bounds per namespace role.
    pub namespaces: NamespaceConfig,

    /// Install-time manifests.
    pub precache: PrecacheConfig,

    /// Navigation handling.
    pub documents: DocumentConfig,

    /// Periodic document refresh.
    pub refresh: RefreshConfig,

    /// Partition persistence.
    pub storage: StorageConfig,

    /// Outbound network settings.
    pub network: NetworkConfig,
}

/// Deployment identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// The single origin whose requests the agent serves (e.g. "http://localhost:3000").
    pub origin: String,

    /// Version tag of this deploy. Namespaces with any other tag are garbage.
    pub version: String,

    /// Prefix of every namespace the agent owns.
    pub cache_prefix: String,

    /// Activate right after a successful install instead of waiting for `SKIP_WAITING`.
    pub skip_waiting: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
            version: "v1".to_string(),
            cache_prefix: "agent".to_string(),
            skip_waiting: true,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "127.0.0.1:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Maximum entry counts per namespace role. `None` means unbounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    pub static_max_entries: Option<usize>,
    pub dynamic_max_entries: Option<usize>,
    pub images_max_entries: Option<usize>,
    pub fonts_max_entries: Option<usize>,
    pub api_max_entries: Option<usize>,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            static_max_entries: None,
            dynamic_max_entries: Some(50),
            images_max_entries: Some(30),
            fonts_max_entries: None,
            api_max_entries: Some(20),
        }
    }
}

impl NamespaceConfig {
    /// Bound for a role.
    pub fn max_entries(&self, role: NamespaceRole) -> Option<usize> {
        match role {
            NamespaceRole::Static => self.static_max_entries,
            NamespaceRole::Dynamic => self.dynamic_max_entries,
            NamespaceRole::Images => self.images_max_entries,
            NamespaceRole::Fonts => self.fonts_max_entries,
            NamespaceRole::Api => self.api_max_entries,
        }
    }
}

/// Install-time manifests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecacheConfig {
    /// App shell: every entry must be fetched or the install fails.
    pub critical: Vec<String>,

    /// Nice-to-have entries, skipped individually on failure.
    pub optional: Vec<String>,

    /// Maximum concurrent fetches during install.
    pub concurrency: usize,
}

impl Default for PrecacheConfig {
    fn default() -> Self {
        Self {
            critical: vec!["/".to_string(), "/index.html".to_string()],
            optional: Vec::new(),
            concurrency: 8,
        }
    }
}

/// Order in which a failed navigation looks for a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackOrder {
    /// Cached copy of the requested document, then the offline document.
    CacheThenOffline,
    /// Offline document, then the cached copy.
    OfflineThenCache,
}

/// Navigation handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Document served when a navigation fails and no better copy exists.
    pub offline_document: String,

    /// Fallback order after a network failure.
    pub fallback_order: FallbackOrder,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            offline_document: "/offline.html".to_string(),
            fallback_order: FallbackOrder::CacheThenOffline,
        }
    }
}

/// Periodic refresh of selected documents into the dynamic namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Seconds between refresh rounds (0 = disabled).
    pub interval_secs: u64,

    /// Documents to refresh.
    pub urls: Vec<String>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 0,
            urls: Vec::new(),
        }
    }
}

/// Partition persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for namespace partitions (None = memory only).
    pub path: Option<PathBuf>,

    /// Apply zstd compression to entry files.
    pub compression: bool,

    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            compression: true,
            zstd_level: 3,
        }
    }
}

/// Outbound network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Whole-request timeout in seconds. None leaves the transport default.
    pub timeout_secs: Option<u64>,

    /// Time an API request may take before the cached copy is served instead.
    pub api_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            api_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
