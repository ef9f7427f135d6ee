//! offline-agent: offline resource-caching agent for a single web origin.
//!
//! Serves the origin's resources through versioned cache namespaces:
//!   precache at install → delete old versions at activation → per-type strategies
//!
//! Exposes a local HTTP front where every request is a fetch event.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use reqwest::Url;
use tokio::net::TcpListener;
use tracing::{error, info};

use offline_agent::agent::Agent;
use offline_agent::cache::registry::new_shared_registry;
use offline_agent::config::{Cli, Config};
use offline_agent::metrics::AgentMetrics;
use offline_agent::network::HttpFetcher;
use offline_agent::server::agent_api::{build_router, AppState};
use offline_agent::storage::DiskStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "offline_agent=debug,tower_http=debug"
    } else {
        "offline_agent=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("offline-agent v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    let config = Arc::new(config);

    info!(
        origin = %config.agent.origin,
        version = %config.agent.version,
        prefix = %config.agent.cache_prefix,
        critical = config.precache.critical.len(),
        optional = config.precache.optional.len(),
        "Configuration loaded"
    );

    let metrics = Arc::new(AgentMetrics::new()?);

    // Open the partition store, if persistence is enabled.
    let store = match &config.storage.path {
        Some(path) => {
            let store = DiskStore::new(path.clone(), &config.storage).await?;
            info!(path = %path.display(), compression = config.storage.compression, "Partition store opened");
            Some(Arc::new(store))
        }
        None => {
            info!("No storage path configured, caches are memory-only");
            None
        }
    };

    let registry = new_shared_registry(&config, store);
    let restored = registry.restore().await?;
    info!(entries = restored, namespaces = registry.list_names().await.len(), "Caches restored");

    let fetcher = Arc::new(HttpFetcher::new(&config.network)?);
    let agent = Arc::new(Agent::new(
        config.clone(),
        registry,
        fetcher,
        metrics.clone(),
    )?);

    // Install in the background; requests pass through until it completes.
    let install = agent.spawn_install();
    tokio::spawn(async move {
        match install.await {
            Ok(Ok(report)) => info!(critical = report.critical, "Install task finished"),
            Ok(Err(e)) => error!(error = %e, "Install task failed"),
            Err(e) => error!(error = %e, "Install task panicked"),
        }
    });

    if config.refresh.interval_secs > 0 && !config.refresh.urls.is_empty() {
        info!(
            interval_secs = config.refresh.interval_secs,
            urls = config.refresh.urls.len(),
            "Periodic content refresh enabled"
        );
        agent.spawn_refresh_loop(Duration::from_secs(config.refresh.interval_secs));
    }

    // Build application state.
    let state = Arc::new(AppState {
        agent,
        metrics,
        origin: Url::parse(&config.agent.origin)?,
        start_time: Instant::now(),
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
