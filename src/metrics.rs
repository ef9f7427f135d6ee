//! Prometheus counters for the agent.
//!
//! Each agent owns its own registry so several agents (e.g. in tests) never
//! collide on metric names.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters updated on the request path.
pub struct AgentMetrics {
    registry: Registry,

    /// Requests handled, by resource class.
    pub requests: IntCounterVec,

    /// Cache hits, by namespace role.
    pub cache_hits: IntCounterVec,

    /// Cache misses, by namespace role.
    pub cache_misses: IntCounterVec,

    /// Entries evicted, by namespace role.
    pub evictions: IntCounterVec,

    /// Network failures, by resource class.
    pub network_failures: IntCounterVec,

    /// Navigations answered from a fallback after a network failure.
    pub offline_fallbacks: IntCounter,
}

impl AgentMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("agent_requests_total", "Requests handled by the agent"),
            &["class"],
        )?;
        let cache_hits = IntCounterVec::new(
            Opts::new("agent_cache_hits_total", "Requests served from a namespace"),
            &["namespace"],
        )?;
        let cache_misses = IntCounterVec::new(
            Opts::new("agent_cache_misses_total", "Cache-first lookups that went to the network"),
            &["namespace"],
        )?;
        let evictions = IntCounterVec::new(
            Opts::new("agent_evictions_total", "Entries evicted from bounded namespaces"),
            &["namespace"],
        )?;
        let network_failures = IntCounterVec::new(
            Opts::new("agent_network_failures_total", "Failed network fetches"),
            &["class"],
        )?;
        let offline_fallbacks = IntCounter::new(
            "agent_offline_fallbacks_total",
            "Navigations answered from cache or the offline document",
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(evictions.clone()))?;
        registry.register(Box::new(network_failures.clone()))?;
        registry.register(Box::new(offline_fallbacks.clone()))?;

        Ok(Self {
            registry,
            requests,
            cache_hits,
            cache_misses,
            evictions,
            network_failures,
            offline_fallbacks,
        })
    }

    /// Render all metrics in the prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = AgentMetrics::new().unwrap();
        metrics.requests.with_label_values(&["document"]).inc();
        metrics.offline_fallbacks.inc();

        let text = metrics.render();
        assert!(text.contains("agent_requests_total{class=\"document\"} 1"));
        assert!(text.contains("agent_offline_fallbacks_total 1"));
    }
}
