//! offline-agent: an offline resource-caching agent for one web origin.
//!
//! Intercepts the requests of a web application and serves its static and
//! dynamic resources from versioned cache namespaces when the network is slow,
//! absent, or failing. Each deploy installs its own namespaces; activation
//! deletes those of older deploys.
//!
//! Exposes a local HTTP front standing in for the hosting environment.

pub mod agent;
pub mod cache;
pub mod config;
pub mod metrics;
pub mod network;
pub mod server;
pub mod storage;
