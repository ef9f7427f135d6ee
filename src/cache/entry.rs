//! Cache entry types: namespace identity, request keys and stored responses.
//!
//! An entry is the unit of storage: one normalized request key mapped to one
//! opaque response payload, tagged with its insertion sequence.

use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Logical role of a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceRole {
    /// App shell written at install time. Never evicts.
    Static,
    /// Runtime documents, scripts and styles.
    Dynamic,
    /// Runtime images.
    Images,
    /// Runtime fonts.
    Fonts,
    /// Same-origin API responses, kept as an offline fallback.
    Api,
}

impl NamespaceRole {
    pub const ALL: [NamespaceRole; 5] = [
        NamespaceRole::Static,
        NamespaceRole::Dynamic,
        NamespaceRole::Images,
        NamespaceRole::Fonts,
        NamespaceRole::Api,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NamespaceRole::Static => "static",
            NamespaceRole::Dynamic => "dynamic",
            NamespaceRole::Images => "images",
            NamespaceRole::Fonts => "fonts",
            NamespaceRole::Api => "api",
        }
    }
}

impl std::fmt::Display for NamespaceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NamespaceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(NamespaceRole::Static),
            "dynamic" => Ok(NamespaceRole::Dynamic),
            "images" => Ok(NamespaceRole::Images),
            "fonts" => Ok(NamespaceRole::Fonts),
            "api" => Ok(NamespaceRole::Api),
            other => Err(format!("unknown namespace role: {other}")),
        }
    }
}

/// Parsed identity of an agent-owned namespace: `{prefix}-{role}-{version}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceId {
    pub prefix: String,
    pub role: NamespaceRole,
    pub version: String,
}

impl NamespaceId {
    pub fn new(prefix: impl Into<String>, role: NamespaceRole, version: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            role,
            version: version.into(),
        }
    }

    /// Storage name of this namespace.
    pub fn name(&self) -> String {
        format!("{}-{}-{}", self.prefix, self.role, self.version)
    }

    /// Parse a storage name. Returns `None` for names not owned by `prefix`.
    ///
    /// The version is everything after the role, so it may itself contain dashes.
    pub fn parse(name: &str, prefix: &str) -> Option<Self> {
        let rest = name.strip_prefix(prefix)?.strip_prefix('-')?;
        let (role, version) = rest.split_once('-')?;
        if version.is_empty() {
            return None;
        }
        let role = role.parse().ok()?;
        Some(Self::new(prefix, role, version))
    }
}

impl std::fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.prefix, self.role, self.version)
    }
}

/// Normalized request key: the absolute URL without its fragment.
///
/// The method is not part of the key since only GET responses are ever stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn from_url(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A response payload as stored and served by the agent.
///
/// The body is never parsed; headers are kept verbatim in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// 2xx responses are the only ones ever written to a namespace.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// A stored entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: RequestKey,
    pub response: CachedResponse,

    /// Insertion sequence within the namespace (higher = newer).
    pub seq: u64,

    /// Wall-clock time of the write.
    pub stored_at: DateTime<Utc>,
}
