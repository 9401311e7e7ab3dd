//! Shared fixtures for the integration tests: a gateway wired to a `TestServer` and helpers
//! for announcing endpoints from a wiremock backend.

#![allow(dead_code)]

use axum_test::TestServer;
use dispatch_gateway::{GatewayConfig, GatewayServer};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.registry.info_timeout = Duration::from_secs(2);
    config.dispatcher.filter_timeout = Duration::from_secs(2);
    config
}

pub fn gateway(config: GatewayConfig) -> (GatewayServer, TestServer) {
    let gateway = GatewayServer::new(config).unwrap();
    let server = TestServer::new(gateway.app()).unwrap();
    (gateway, server)
}

/// A canonical endpoint announcement
pub fn endpoint(path: &str, method: &str, redirect_path: &str, redirect_method: &str) -> Value {
    json!({
        "path": path,
        "method": method,
        "redirect": { "path": redirect_path, "method": redirect_method }
    })
}

/// Serve `info` as the backend's self-description
pub async fn mount_info(backend: &MockServer, info: Value) {
    Mock::given(method("GET"))
        .and(path("/info"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(info))
        .mount(backend)
        .await;
}

/// Make the registration call and return the microservice document
pub async fn register(server: &TestServer, name: &str, url: &str) -> Value {
    let response = server
        .post("/api/v1/microservice")
        .json(&json!({ "name": name, "url": url, "pathInfo": "/info" }))
        .await;
    response.assert_status_ok();
    response.json()
}
