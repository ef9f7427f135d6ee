//! Cache namespace management.
//!
//! This module contains the core cache data structures and algorithms:
//! - [`entry`]: NamespaceRole, NamespaceId, RequestKey, CachedResponse
//! - [`namespace`]: insertion-ordered contents of one namespace
//! - [`registry`]: the namespace registry with per-namespace write serialization
//! - [`evictor`]: FIFO eviction for bounded namespaces
//! - [`compressor`]: zstd framing for persisted entry records

pub mod compressor;
pub mod entry;
pub mod evictor;
pub mod namespace;
pub mod registry;
