//! The caching agent and its lifecycle-driven components.
//!
//! - `classify`: pure request classification
//! - `dispatcher`: per-class serving strategies
//! - `installer`: precache manifests into the static namespace
//! - `migrator`: delete namespaces of superseded versions
//! - `lifecycle`: installing → installed → activating → active
//! - `messages`: client notifications and control messages

pub mod classify;
pub mod dispatcher;
pub mod installer;
pub mod lifecycle;
pub mod messages;
pub mod migrator;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::entry::CachedResponse;
use crate::cache::registry::{NamespaceStats, RegistryError, SharedRegistry};
use crate::config::Config;
use crate::metrics::AgentMetrics;
use crate::network::{AgentRequest, Fetcher};

use classify::classify;
use dispatcher::{DispatchError, Dispatcher};
use installer::{InstallError, InstallReport, Manifest, PrecacheInstaller};
use lifecycle::{AgentState, Lifecycle, LifecycleError};
use messages::{ClientMessage, ControlMessage, ControlReply, Notifier};
use migrator::{MigrationReport, VersionMigrator};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Install failed: {0}")]
    Install(#[from] InstallError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Cache registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Invalid origin configuration: {0}")]
    InvalidOrigin(String),
}

/// One deployed version of the caching agent.
pub struct Agent {
    config: Arc<Config>,
    registry: SharedRegistry,
    origin: Url,
    lifecycle: Lifecycle,
    /// Serializes install and activate.
    transitions: Mutex<()>,
    dispatcher: Dispatcher,
    installer: PrecacheInstaller,
    migrator: VersionMigrator,
    notifier: Notifier,
}

impl Agent {
    pub fn new(
        config: Arc<Config>,
        registry: SharedRegistry,
        fetcher: Arc<dyn Fetcher>,
        metrics: Arc<AgentMetrics>,
    ) -> Result<Self, AgentError> {
        let origin = Url::parse(&config.agent.origin)
            .map_err(|e| AgentError::InvalidOrigin(format!("{}: {e}", config.agent.origin)))?;
        let offline_document = origin
            .join(&config.documents.offline_document)
            .map_err(|e| {
                AgentError::InvalidOrigin(format!("{}: {e}", config.documents.offline_document))
            })?;

        let dispatcher = Dispatcher::new(
            registry.clone(),
            fetcher.clone(),
            origin.clone(),
            offline_document,
            config.documents.fallback_order,
            metrics,
        )
        .with_api_timeout(Duration::from_millis(config.network.api_timeout_ms));
        let installer = PrecacheInstaller::new(
            registry.clone(),
            fetcher,
            origin.clone(),
            config.precache.concurrency,
        );

        Ok(Self {
            migrator: VersionMigrator::new(registry.clone()),
            config,
            registry,
            origin,
            lifecycle: Lifecycle::new(),
            transitions: Mutex::new(()),
            dispatcher,
            installer,
            notifier: Notifier::new(),
        })
    }

    pub fn version(&self) -> &str {
        self.registry.version()
    }

    pub fn state(&self) -> AgentState {
        self.lifecycle.state()
    }

    /// Observe lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.lifecycle.subscribe()
    }

    /// Observe client notifications.
    pub fn notifications(&self) -> broadcast::Receiver<ClientMessage> {
        self.notifier.subscribe()
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Precache the manifests and move to `installed`, or to `install-failed`.
    ///
    /// The offline document is always part of the critical manifest. With
    /// `agent.skip_waiting` the agent activates immediately afterwards.
    pub async fn install(&self) -> Result<InstallReport, AgentError> {
        let report = {
            let _guard = self.transitions.lock().await;
            let state = self.lifecycle.state();
            if state != AgentState::Installing {
                return Err(LifecycleError::InvalidTransition {
                    from: state,
                    to: AgentState::Installed,
                }
                .into());
            }

            let critical = Manifest::new(self.config.precache.critical.iter().cloned())
                .with_entry(self.config.documents.offline_document.clone());
            let optional = Manifest::new(self.config.precache.optional.iter().cloned());

            match self.installer.install(&critical, &optional).await {
                Ok(report) => {
                    self.lifecycle.transition(AgentState::Installed)?;
                    info!(
                        version = self.version(),
                        critical = report.critical,
                        optional = report.optional_cached,
                        skipped = report.optional_skipped.len(),
                        "Install complete"
                    );
                    self.notifier.notify(ClientMessage::UpdateAvailable {
                        version: self.version().to_string(),
                    });
                    report
                }
                Err(e) => {
                    error!(version = self.version(), error = %e, "Install failed");
                    self.lifecycle.transition(AgentState::InstallFailed)?;
                    return Err(e.into());
                }
            }
        };

        if self.config.agent.skip_waiting {
            self.skip_waiting().await?;
        }
        Ok(report)
    }

    /// Delete namespaces of other versions and take over.
    pub async fn activate(&self) -> Result<MigrationReport, AgentError> {
        let _guard = self.transitions.lock().await;
        self.activate_locked().await
    }

    /// Activate if still waiting in `installed`, otherwise do nothing.
    ///
    /// The state is checked under the transition lock, so concurrent callers
    /// activate at most once and never see a lifecycle error.
    pub async fn skip_waiting(&self) -> Result<Option<MigrationReport>, AgentError> {
        let _guard = self.transitions.lock().await;
        let state = self.lifecycle.state();
        if state != AgentState::Installed {
            debug!(state = %state, "Not waiting, skip-waiting ignored");
            return Ok(None);
        }
        self.activate_locked().await.map(Some)
    }

    /// Caller holds `transitions`.
    async fn activate_locked(&self) -> Result<MigrationReport, AgentError> {
        self.lifecycle.transition(AgentState::Activating)?;

        let report = self.migrator.migrate(self.version()).await;
        self.lifecycle.transition(AgentState::Active)?;
        info!(
            version = self.version(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Activated"
        );

        self.notifier.notify(ClientMessage::UpdateActivated {
            version: self.version().to_string(),
        });
        Ok(report)
    }

    /// Serve an intercepted request.
    ///
    /// Before `installed` the agent stays out of the way and the request goes
    /// straight to the network.
    pub async fn handle(&self, request: &AgentRequest) -> Result<CachedResponse, AgentError> {
        let state = self.lifecycle.state();
        if !state.is_serving() {
            debug!(state = %state, url = %request.url, "Agent not serving, passing through");
            let class = classify(request, &self.origin);
            return Ok(self.dispatcher.network_only(request, class).await?);
        }
        Ok(self.dispatcher.handle(request).await?)
    }

    /// Handle a client control message.
    pub async fn on_message(&self, message: ControlMessage) -> Result<ControlReply, AgentError> {
        debug!(?message, "Control message");
        match message {
            ControlMessage::SkipWaiting => {
                self.skip_waiting().await?;
                Ok(ControlReply::Ack)
            }
            ControlMessage::GetVersion => Ok(ControlReply::Version {
                version: self.version().to_string(),
            }),
            ControlMessage::ClearCaches => {
                let mut cleared = 0;
                for name in self.owned_names().await {
                    if self.registry.delete(&name).await? {
                        cleared += 1;
                    }
                }
                info!(cleared, "Cleared caches");
                Ok(ControlReply::Ack)
            }
            ControlMessage::CacheUrls { urls } => {
                let (cached, skipped) = self.installer.cache_best_effort(&Manifest::new(urls)).await;
                info!(cached, skipped = skipped.len(), "Cached requested URLs");
                Ok(ControlReply::Ack)
            }
            ControlMessage::GetCacheStatus => {
                let caches: BTreeMap<String, usize> = self
                    .owned_stats()
                    .await
                    .into_iter()
                    .map(|s| (s.name, s.entries))
                    .collect();
                Ok(ControlReply::CacheStatus {
                    version: self.version().to_string(),
                    caches,
                })
            }
        }
    }

    /// Stats of every namespace carrying the agent's prefix.
    pub async fn owned_stats(&self) -> Vec<NamespaceStats> {
        self.registry
            .stats()
            .await
            .into_iter()
            .filter(|s| self.registry.owns(&s.name))
            .collect()
    }

    /// Every `{prefix}-*` namespace, whatever its role or version.
    async fn owned_names(&self) -> Vec<String> {
        self.registry
            .list_names()
            .await
            .into_iter()
            .filter(|name| self.registry.owns(name))
            .collect()
    }

    /// Re-fetch the configured refresh documents into "dynamic".
    ///
    /// Only runs while active. Returns how many documents were refreshed.
    pub async fn refresh_documents(&self) -> usize {
        if self.lifecycle.state() != AgentState::Active {
            debug!(state = %self.lifecycle.state(), "Skipping refresh, agent not active");
            return 0;
        }

        let (urls, _) = Manifest::new(self.config.refresh.urls.iter().cloned())
            .resolve_lenient(&self.origin);
        let mut refreshed = 0;
        for url in urls {
            match self.dispatcher.refresh(url.clone()).await {
                Ok(true) => refreshed += 1,
                Ok(false) => {}
                Err(e) => warn!(url = %url, error = %e, "Content refresh failed"),
            }
        }
        debug!(refreshed, "Content refresh complete");
        refreshed
    }

    pub fn spawn_install(self: &Arc<Self>) -> JoinHandle<Result<InstallReport, AgentError>> {
        let agent = self.clone();
        tokio::spawn(async move { agent.install().await })
    }

    pub fn spawn_activate(self: &Arc<Self>) -> JoinHandle<Result<MigrationReport, AgentError>> {
        let agent = self.clone();
        tokio::spawn(async move { agent.activate().await })
    }

    /// Run `refresh_documents` every `period` until the task is aborted.
    pub fn spawn_refresh_loop(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let agent = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                agent.refresh_documents().await;
            }
        })
    }
}
