//! HTTP host front for the agent.
//!
//! - [`agent_api`]: agent routes and the fetch-event fallback
//! - [`streaming`]: SSE stream of client notifications

pub mod agent_api;
pub mod streaming;
