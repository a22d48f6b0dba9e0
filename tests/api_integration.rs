//! Relay HTTP API integration tests.
//!
//! These tests drive the relay router directly using axum's test utilities.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use shell_relay::relay::{create_router, create_router_with_state, AppState};
use shell_relay::ProtocolFamily;
use tower::ServiceExt;

/// Helper to create a JSON request.
fn json_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");

    match body {
        Some(json) => builder.body(Body::from(json.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Helper to extract JSON from response.
async fn response_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(Value::Null)
}

async fn register(app: &Router, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/api/register-host", Some(body)))
        .await
        .unwrap();
    let status = response.status();
    (status, response_json(response).await)
}

fn app() -> Router {
    create_router_with_state(AppState::new(ProtocolFamily::Interactive))
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_router(ProtocolFamily::Interactive);

    let response = app
        .oneshot(json_request(Method::GET, "/health", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["hosts"], 0);
}

#[tokio::test]
async fn test_health_counts_registered_hosts() {
    let app = app();
    register(&app, json!({"hostId": "a", "username": "u", "password": "p"})).await;
    register(&app, json!({"hostId": "b", "username": "u", "password": "p"})).await;

    let response = app
        .oneshot(json_request(Method::GET, "/health", None))
        .await
        .unwrap();
    assert_eq!(response_json(response).await["hosts"], 2);
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_register_host() {
    let app = app();
    let (status, json) = register(
        &app,
        json!({"hostId": "build-box", "username": "alice", "password": "s3cret"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["hostId"], "build-box");
    assert_eq!(json["websocketHostPath"], "/ws/host");
    assert_eq!(json["websocketClientPath"], "/ws/client");
}

#[tokio::test]
async fn test_register_generates_host_id() {
    let app = app();
    let (status, json) = register(&app, json!({"username": "alice", "password": "pw"})).await;

    assert_eq!(status, StatusCode::OK);
    let id = json["hostId"].as_str().unwrap();
    assert!(id.starts_with("host-"), "unexpected id {}", id);
}

#[tokio::test]
async fn test_register_same_user_is_idempotent() {
    let app = app();
    let body = json!({"hostId": "h1", "username": "alice", "password": "one"});
    assert_eq!(register(&app, body).await.0, StatusCode::OK);

    let body = json!({"hostId": "h1", "username": "alice", "password": "two"});
    let (status, json) = register(&app, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["hostId"], "h1");
}

#[tokio::test]
async fn test_register_conflicting_user() {
    let app = app();
    let body = json!({"hostId": "h1", "username": "alice", "password": "pw"});
    assert_eq!(register(&app, body).await.0, StatusCode::OK);

    let body = json!({"hostId": "h1", "username": "mallory", "password": "pw"});
    let (status, json) = register(&app, body).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");
}

#[tokio::test]
async fn test_register_missing_credentials() {
    let app = app();

    let (status, json) = register(&app, json!({"hostId": "h1", "username": "alice"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");

    let (status, _) = register(&app, json!({"password": "pw"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_invalid_json() {
    let app = app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/register-host")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

// ============================================================================
// Host status
// ============================================================================

#[tokio::test]
async fn test_host_status() {
    let app = app();
    register(&app, json!({"hostId": "h1", "username": "alice", "password": "pw"})).await;

    let response = app
        .oneshot(json_request(Method::GET, "/api/hosts/h1", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["hostId"], "h1");
    assert_eq!(json["username"], "alice");
    assert_eq!(json["hostOnline"], false);
    assert_eq!(json["clientConnected"], false);
    assert!(json.get("password").is_none());
}

#[tokio::test]
async fn test_host_status_not_found() {
    let response = app()
        .oneshot(json_request(Method::GET, "/api/hosts/ghost", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = response_json(response).await;
    assert_eq!(json["code"], "HOST_NOT_FOUND");
}

// ============================================================================
// Routing edge cases
// ============================================================================

#[tokio::test]
async fn test_unknown_route() {
    let response = app()
        .oneshot(json_request(Method::GET, "/api/sessions", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_websocket_path_requires_upgrade() {
    let response = app()
        .oneshot(json_request(Method::GET, "/ws/client?hostId=h1", None))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_cors_preflight() {
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/register-host")
        .header(header::ORIGIN, "http://example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}
