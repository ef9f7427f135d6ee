//! Agent HTTP API.
//!
//! - GET /__agent/status
//! - POST /__agent/message
//! - GET /__agent/events
//! - GET /__agent/metrics
//!
//! Every other route is a fetch event for `origin + path?query`. The path is
//! never resolved as a reference, so a fetch event cannot leave the origin.

use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::Url;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::agent::dispatcher::DispatchError;
use crate::agent::lifecycle::AgentState;
use crate::agent::messages::{ControlMessage, ControlReply};
use crate::agent::{Agent, AgentError};
use crate::cache::entry::CachedResponse;
use crate::cache::registry::NamespaceStats;
use crate::metrics::AgentMetrics;
use crate::network::{AgentRequest, Destination, RequestMode};
use crate::server::streaming::notifications_to_sse_stream;

/// Headers recomputed by the server and never copied from a cached response.
const SKIPPED_HEADERS: &[&str] = &["content-length", "transfer-encoding", "connection"];

/// Request headers that are hop-by-hop or already carried as request fields.
const UNFORWARDED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "upgrade",
    "te",
    "trailer",
    "transfer-encoding",
    "content-length",
    "proxy-authorization",
    "proxy-connection",
    "accept",
    "sec-fetch-mode",
    "sec-fetch-dest",
];

/// Application state shared across handlers.
pub struct AppState {
    pub agent: Arc<Agent>,
    pub metrics: Arc<AgentMetrics>,
    /// Origin the agent serves; fetch events are resolved against it.
    pub origin: Url,
    pub start_time: Instant,
}

/// Build the axum router with all agent routes and the fetch fallback.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/__agent/status", get(status))
        .route("/__agent/message", post(message))
        .route("/__agent/events", get(events))
        .route("/__agent/metrics", get(metrics))
        .fallback(fetch_event)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Response Types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub state: AgentState,
    pub uptime_secs: u64,
    pub total_entries: usize,
    pub namespaces: Vec<NamespaceStats>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn agent_error_response(err: &AgentError) -> Response {
    let status = match err {
        AgentError::Dispatch(DispatchError::Offline { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        AgentError::Dispatch(DispatchError::Network { .. }) => StatusCode::BAD_GATEWAY,
        AgentError::Dispatch(DispatchError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        AgentError::Lifecycle(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

/// Turn a cached or fetched response into an HTTP response.
fn into_http_response(cached: CachedResponse) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in &cached.headers {
        if SKIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %name, "Dropping invalid response header"),
        }
    }
    response
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: state.agent.version().to_string(),
        state: state.agent.state(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        total_entries: state.agent.registry().total_entries().await,
        namespaces: state.agent.owned_stats().await,
    })
}

async fn message(
    State(state): State<Arc<AppState>>,
    Json(msg): Json<ControlMessage>,
) -> Result<Json<ControlReply>, Response> {
    state.agent.on_message(msg).await.map(Json).map_err(|e| {
        error!(error = %e, "Control message failed");
        agent_error_response(&e)
    })
}

async fn events(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stream = notifications_to_sse_stream(state.agent.notifications());
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Resolve a fetch-event URI against the origin, keeping it on the origin.
fn same_origin_url(origin: &Url, uri: &Uri) -> Option<Url> {
    let mut url = origin.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    (url.origin() == origin.origin()).then_some(url)
}

async fn fetch_event(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(url) = same_origin_url(&state.origin, &uri) else {
        warn!(uri = %uri, "Rejecting fetch event outside the origin");
        return error_response(StatusCode::BAD_REQUEST, format!("{uri} is outside the origin"));
    };

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let mut request = AgentRequest::get(url).with_body(body);
    request.method = method;
    request.mode = header("sec-fetch-mode")
        .map(RequestMode::from_header)
        .unwrap_or_default();
    request.destination = header("sec-fetch-dest")
        .map(Destination::from_header)
        .unwrap_or_default();
    request.accept = header(ACCEPT.as_str()).map(str::to_string);
    for (name, value) in &headers {
        if UNFORWARDED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        match value.to_str() {
            Ok(value) => request = request.with_header(name.as_str(), value),
            Err(_) => warn!(header = %name, "Dropping non-text request header"),
        }
    }

    match state.agent.handle(&request).await {
        Ok(cached) => into_http_response(cached),
        Err(e) => {
            warn!(url = %request.url, error = %e, "Fetch event failed");
            agent_error_response(&e)
        }
    }
}
