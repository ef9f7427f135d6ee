//! SSE (Server-Sent Events) stream of client notifications.
//!
//! Converts the agent's broadcast channel into an SSE stream. Each event
//! carries one JSON-encoded [`ClientMessage`].

use axum::response::sse::Event;
use futures::stream::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::agent::messages::ClientMessage;

/// Convert a notification receiver into an SSE stream.
///
/// A client that falls behind skips the messages it missed.
pub fn notifications_to_sse_stream(
    rx: broadcast::Receiver<ClientMessage>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(message) => {
            let data = serde_json::to_string(&message).unwrap_or_default();
            Some(Ok(Event::default().event("message").data(data)))
        }
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "Notification subscriber lagged");
            None
        }
    })
}
