//! Integration tests for the HTTP host front.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use reqwest::Url;
use tower::ServiceExt;

use offline_agent::agent::Agent;
use offline_agent::cache::registry::new_shared_registry;
use offline_agent::config::Config;
use offline_agent::metrics::AgentMetrics;
use offline_agent::network::mock::MockFetcher;
use offline_agent::server::agent_api::{build_router, AppState};

const ORIGIN: &str = "https://app.example";

async fn setup() -> (Router, Arc<MockFetcher>) {
    let mut config = Config::default();
    config.agent.origin = ORIGIN.to_string();
    config.agent.cache_prefix = "app".to_string();
    config.precache.critical = vec!["/".to_string()];

    let mock = Arc::new(MockFetcher::new());
    mock.route("https://app.example/", "text/html", "<h1>home</h1>");
    mock.route("https://app.example/offline.html", "text/html", "offline");
    mock.route("https://app.example/logo.png", "image/png", "png-bytes");

    let metrics = Arc::new(AgentMetrics::new().unwrap());
    let registry = new_shared_registry(&config, None);
    let agent = Arc::new(
        Agent::new(Arc::new(config), registry, mock.clone(), metrics.clone()).unwrap(),
    );
    agent.install().await.unwrap();

    let state = Arc::new(AppState {
        agent,
        metrics,
        origin: Url::parse(ORIGIN).unwrap(),
        start_time: Instant::now(),
    });
    (build_router(state), mock)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn navigate(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("sec-fetch-mode", "navigate")
        .header("sec-fetch-dest", "document")
        .header("accept", "text/html")
        .body(Body::empty())
        .unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

fn control(json: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/__agent/message")
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_fetch_event_serves_from_cache_offline() {
    let (app, mock) = setup().await;

    let (status, body) = send(&app, navigate("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<h1>home</h1>");

    mock.set_online(false);
    let (status, body) = send(&app, navigate("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<h1>home</h1>");
}

#[tokio::test]
async fn test_offline_error_statuses() {
    let (app, mock) = setup().await;
    mock.set_online(false);

    // Asset that was never cached.
    let (status, _) = send(&app, get("/logo.png")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    // Navigation with every namespace cleared.
    let (status, _) = send(&app, control(r#"{"type":"CLEAR_CACHES"}"#)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, navigate("/profile")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_status_and_messages() {
    let (app, _) = setup().await;

    let (status, body) = send(&app, get("/__agent/status")).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["state"], "active");
    assert_eq!(json["version"], "v1");
    assert_eq!(json["namespaces"][0]["name"], "app-static-v1");

    let (status, body) = send(&app, control(r#"{"type":"GET_VERSION"}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"type":"VERSION","version":"v1"}"#);
}

#[tokio::test]
async fn test_metrics_exposition() {
    let (app, _) = setup().await;
    send(&app, get("/logo.png")).await;

    let (status, body) = send(&app, get("/__agent/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("agent_requests_total{class=\"image\"} 1"));
    assert!(body.contains("agent_cache_misses_total{namespace=\"images\"} 1"));
}

#[tokio::test]
async fn test_fetch_event_stays_on_origin() {
    let (app, mock) = setup().await;

    let (status, _) = send(&app, get("//evil.example/secret")).await;
    // Fetched as a path on the origin, which the mock does not know.
    assert_eq!(status, StatusCode::NOT_FOUND);

    let calls = mock.calls();
    assert!(!calls.is_empty());
    for call in &calls {
        assert!(call.starts_with("https://app.example/"), "left the origin: {call}");
    }
    assert!(!calls.iter().any(|c| c.starts_with("https://evil.example")));
}

#[tokio::test]
async fn test_post_body_and_headers_reach_network() {
    let (app, mock) = setup().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/messages?draft=1")
        .header("content-type", "application/json")
        .header("authorization", "Bearer t0k3n")
        .header("connection", "keep-alive")
        .body(Body::from(r#"{"text":"hi"}"#))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let received = mock.received();
    let forwarded = received.last().unwrap();
    assert_eq!(forwarded.method, reqwest::Method::POST);
    assert_eq!(forwarded.url.as_str(), "https://app.example/api/messages?draft=1");
    assert_eq!(&forwarded.body[..], br#"{"text":"hi"}"#);
    assert_eq!(forwarded.header("content-type"), Some("application/json"));
    assert_eq!(forwarded.header("authorization"), Some("Bearer t0k3n"));
    assert_eq!(forwarded.header("connection"), None);
}

#[tokio::test]
async fn test_api_served_from_cache_when_offline() {
    let (app, mock) = setup().await;
    mock.route("https://app.example/api/feed", "application/json", r#"[1]"#);

    let (status, body) = send(&app, get("/api/feed")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[1]");

    mock.set_online(false);
    let (status, body) = send(&app, get("/api/feed")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[1]");

    let (status, body) = send(&app, get("/__agent/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("app-api-v1"));
}
