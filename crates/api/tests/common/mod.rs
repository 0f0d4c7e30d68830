#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use caseflow_coordinator::CoordinatorConfig;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use caseflow_api::config::ServerConfig;
use caseflow_api::router::build_app_router;
use caseflow_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default),
/// a 30-second request timeout and default coordinator tuning.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        connector_webhooks: Vec::new(),
        coordinator: CoordinatorConfig::default(),
    }
}

/// Build the full application router using the same builder as `main.rs`.
///
/// The returned state shares the coordinator with the router, so tests can
/// drive the worker surface directly while asserting over HTTP.
pub fn build_test_app() -> (Router, AppState) {
    build_test_app_with(test_config())
}

pub fn build_test_app_with(config: ServerConfig) -> (Router, AppState) {
    let state = AppState::from_config(config.clone());
    (build_app_router(state.clone(), &config), state)
}

async fn send(app: &Router, method: Method, path: &str, body: Option<Value>) -> Response {
    let builder = Request::builder().method(method).uri(path);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, path: &str) -> Response {
    send(app, Method::GET, path, None).await
}

pub async fn post_json(app: &Router, path: &str, body: Value) -> Response {
    send(app, Method::POST, path, Some(body)).await
}

pub async fn post_empty(app: &Router, path: &str) -> Response {
    send(app, Method::POST, path, None).await
}

pub async fn put_json(app: &Router, path: &str, body: Value) -> Response {
    send(app, Method::PUT, path, Some(body)).await
}

pub async fn delete(app: &Router, path: &str) -> Response {
    send(app, Method::DELETE, path, None).await
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
