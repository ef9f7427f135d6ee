//! Network collaborator.
//!
//! - [`request`]: AgentRequest and its declared mode/destination
//! - [`fetcher`]: the `Fetcher` trait and the reqwest-backed `HttpFetcher`
//! - [`mock`]: scriptable fetcher for tests

pub mod fetcher;
pub mod mock;
pub mod request;

pub use fetcher::{FetchError, Fetcher, HttpFetcher};
pub use request::{AgentRequest, Destination, RequestMode};
