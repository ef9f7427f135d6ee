//! Messages exchanged with connected clients.
//!
//! Agent → client messages are notifications only: a foreground app may
//! decide to reload, but the agent never forces it. Client → agent control
//! messages ask the agent to do something and receive a reply.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the notification channel. Slow subscribers lose the oldest messages.
const NOTIFY_CAPACITY: usize = 64;

/// Notification posted to every connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// A new version finished installing and waits for activation.
    UpdateAvailable { version: String },
    /// A new version took over; clients may reload to pick it up.
    UpdateActivated { version: String },
}

/// Control message sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate a waiting install now.
    SkipWaiting,
    /// Report the agent's version tag.
    GetVersion,
    /// Delete every namespace the agent owns.
    ClearCaches,
    /// Best-effort add of extra URLs to the static namespace.
    CacheUrls { urls: Vec<String> },
    /// Report the entry count of every namespace the agent owns.
    GetCacheStatus,
}

/// Reply to a control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlReply {
    Version {
        version: String,
    },
    CacheStatus {
        version: String,
        caches: BTreeMap<String, usize>,
    },
    Ack,
}

/// Fan-out of client notifications.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<ClientMessage>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
        self.tx.subscribe()
    }

    /// Post a notification. Returns how many clients received it.
    pub fn notify(&self, message: ClientMessage) -> usize {
        // No subscribers is not an error: nobody is listening yet.
        let delivered = self.tx.send(message.clone()).unwrap_or(0);
        debug!(?message, delivered, "Posted client notification");
        delivered
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
