//! Agent lifecycle state machine.
//!
//! ```text
//! installing ──► installed ──► activating ──► active
//!     │
//!     └──► install-failed   (terminal; the next deploy starts a fresh agent)
//! ```

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentState {
    Installing,
    Installed,
    Activating,
    Active,
    InstallFailed,
}

impl AgentState {
    /// Whether the agent's own handler chain serves requests in this state.
    pub fn is_serving(&self) -> bool {
        matches!(
            self,
            AgentState::Installed | AgentState::Activating | AgentState::Active
        )
    }

    fn can_transition_to(&self, next: AgentState) -> bool {
        matches!(
            (self, next),
            (AgentState::Installing, AgentState::Installed)
                | (AgentState::Installing, AgentState::InstallFailed)
                | (AgentState::Installed, AgentState::Activating)
                | (AgentState::Activating, AgentState::Active)
        )
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Installing => "installing",
            AgentState::Installed => "installed",
            AgentState::Activating => "activating",
            AgentState::Active => "active",
            AgentState::InstallFailed => "install-failed",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Invalid lifecycle transition {from} -> {to}")]
    InvalidTransition { from: AgentState, to: AgentState },
}

/// Observable lifecycle state.
pub struct Lifecycle {
    tx: watch::Sender<AgentState>,
}

impl Lifecycle {
    /// A fresh agent starts in `installing`.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AgentState::Installing);
        Self { tx }
    }

    pub fn state(&self) -> AgentState {
        *self.tx.borrow()
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.tx.subscribe()
    }

    /// Move to `next`, rejecting edges the state machine does not have.
    pub fn transition(&self, next: AgentState) -> Result<(), LifecycleError> {
        let mut result = Ok(());
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                info!(from = %state, to = %next, "Lifecycle transition");
                *state = next;
                true
            } else {
                result = Err(LifecycleError::InvalidTransition {
                    from: *state,
                    to: next,
                });
                false
            }
        });
        result
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
