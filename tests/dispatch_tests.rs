//! Integration tests for request dispatch
//!
//! Covers query and body composition, internal parameter stripping, redirect filters, binary
//! passthrough and how backend replies and failures surface to the caller.

mod common;

use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use common::{endpoint, gateway, mount_info, register, test_config};
use dispatch_gateway::registry::{AnnouncedEndpoint, Endpoint, Redirect};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn has_no_internal_params(request: &Request) -> bool {
    !request
        .url
        .query_pairs()
        .any(|(name, _)| name == "app_key" || name == "loggedUser")
}

#[tokio::test]
async fn test_get_forwards_query_and_static_data() {
    let backend = MockServer::start().await;
    mount_info(
        &backend,
        json!({
            "endpoints": [{
                "path": "/v1/dataset",
                "method": "GET",
                "redirect": { "path": "/api/v1/dataset", "method": "GET", "data": { "env": "production" } }
            }]
        }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/dataset"))
        .and(query_param("page", "2"))
        .and(query_param("env", "production"))
        .and(has_no_internal_params)
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .expect(1)
        .mount(&backend)
        .await;

    let (_gateway, server) = gateway(test_config());
    register(&server, "dataset", &backend.uri()).await;

    let response = server
        .get("/v1/dataset")
        .add_query_param("page", "2")
        .add_query_param("app_key", "secret")
        .add_query_param("loggedUser", "{\"id\":\"1\"}")
        .await;
    response.assert_status_ok();
    response.assert_json(&json!({ "data": [] }));
}

#[tokio::test]
async fn test_post_merges_static_data_into_body_and_strips_internal_fields() {
    let backend = MockServer::start().await;
    mount_info(
        &backend,
        json!({
            "endpoints": [{
                "path": "/v1/dataset",
                "method": "POST",
                "redirect": { "path": "/api/v1/dataset", "method": "POST", "data": { "application": "rw" } }
            }]
        }),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/dataset"))
        .and(body_json(json!({ "name": "forest", "application": "rw" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "created": true })))
        .expect(1)
        .mount(&backend)
        .await;

    let (_gateway, server) = gateway(test_config());
    register(&server, "dataset", &backend.uri()).await;

    let response = server
        .post("/v1/dataset")
        .json(&json!({ "name": "forest", "app_key": "secret", "loggedUser": { "id": "1" } }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.assert_json(&json!({ "created": true }));
}

async fn filtered_backend() -> MockServer {
    let backend = MockServer::start().await;
    mount_info(
        &backend,
        json!({
            "endpoints": [
                endpoint("/v1/dataset/:id", "GET", "/api/v1/dataset/:id", "GET"),
                {
                    "path": "/v1/dataset/:id",
                    "method": "DELETE",
                    "redirect": {
                        "path": "/api/v1/dataset/:id",
                        "method": "DELETE",
                        "filters": [{
                            "name": "dataset",
                            "path": "/v1/dataset/:id",
                            "method": "GET",
                            "compare": { "data": { "attributes": { "provider": "cartodb" } } }
                        }]
                    }
                }
            ]
        }),
    )
    .await;

    for (id, provider) in [("abc", "cartodb"), ("def", "gee")] {
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/dataset/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "id": id, "attributes": { "provider": provider } }
            })))
            .mount(&backend)
            .await;
    }

    backend
}

#[tokio::test]
async fn test_filter_match_forwards_filter_response() {
    let backend = filtered_backend().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/dataset/abc"))
        .and(|request: &Request| {
            request
                .url
                .query_pairs()
                .find(|(name, _)| name == "dataset")
                .and_then(|(_, value)| serde_json::from_str::<Value>(&value).ok())
                .map(|dataset| dataset["data"]["attributes"]["provider"] == "cartodb")
                .unwrap_or(false)
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "deleted": "abc" })))
        .expect(1)
        .mount(&backend)
        .await;

    let (_gateway, server) = gateway(test_config());
    register(&server, "dataset", &backend.uri()).await;

    let response = server.delete("/v1/dataset/abc").await;
    response.assert_status_ok();
    response.assert_json(&json!({ "deleted": "abc" }));
}

#[tokio::test]
async fn test_filter_mismatch_is_endpoint_not_found() {
    let backend = filtered_backend().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/dataset/def"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let (_gateway, server) = gateway(test_config());
    register(&server, "dataset", &backend.uri()).await;

    let response = server.delete("/v1/dataset/def").await;
    response.assert_status_not_found();
    assert_eq!(
        response.json::<Value>(),
        json!({ "errors": [{ "status": 404, "detail": "Endpoint not found" }] })
    );
}

#[tokio::test]
async fn test_filter_call_not_found_is_endpoint_not_found() {
    // no GET mock for `missing`: the filter call answers 404
    let backend = filtered_backend().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/dataset/missing"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let (_gateway, server) = gateway(test_config());
    register(&server, "dataset", &backend.uri()).await;

    let response = server.delete("/v1/dataset/missing").await;
    response.assert_status_not_found();
    assert_eq!(
        response.json::<Value>(),
        json!({ "errors": [{ "status": 404, "detail": "Endpoint not found" }] })
    );
}

/// `DELETE /v1/dataset/:id` gated on both the dataset provider and the widget being published
async fn doubly_filtered_backend() -> MockServer {
    let backend = MockServer::start().await;
    mount_info(
        &backend,
        json!({
            "endpoints": [
                endpoint("/v1/dataset/:id", "GET", "/api/v1/dataset/:id", "GET"),
                endpoint("/v1/widget/:id", "GET", "/api/v1/widget/:id", "GET"),
                {
                    "path": "/v1/dataset/:id",
                    "method": "DELETE",
                    "redirect": {
                        "path": "/api/v1/dataset/:id",
                        "method": "DELETE",
                        "filters": [
                            {
                                "name": "dataset",
                                "path": "/v1/dataset/:id",
                                "compare": { "data": { "attributes": { "provider": "cartodb" } } }
                            },
                            {
                                "name": "widget",
                                "path": "/v1/widget/:id",
                                "compare": { "data": { "attributes": { "published": true } } }
                            }
                        ]
                    }
                }
            ]
        }),
    )
    .await;

    for (id, published) in [("abc", true), ("def", false)] {
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/dataset/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "id": id, "attributes": { "provider": "cartodb" } }
            })))
            .mount(&backend)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/widget/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "id": id, "attributes": { "published": published } }
            })))
            .mount(&backend)
            .await;
    }

    backend
}

#[tokio::test]
async fn test_all_filters_must_match() {
    let backend = doubly_filtered_backend().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/dataset/def"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let (_gateway, server) = gateway(test_config());
    register(&server, "dataset", &backend.uri()).await;

    let response = server.delete("/v1/dataset/def").await;
    response.assert_status_not_found();
    assert_eq!(response.json::<Value>()["errors"][0]["detail"], "Endpoint not found");
}

#[tokio::test]
async fn test_every_filter_response_is_forwarded() {
    let backend = doubly_filtered_backend().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/dataset/abc"))
        .and(|request: &Request| {
            let exposed: Vec<(String, Value)> = request
                .url
                .query_pairs()
                .filter_map(|(name, value)| {
                    serde_json::from_str::<Value>(&value)
                        .ok()
                        .map(|parsed| (name.into_owned(), parsed))
                })
                .collect();
            let find = |key: &str| exposed.iter().find(|(name, _)| name == key).map(|(_, value)| value.clone());

            matches!(find("dataset"), Some(dataset) if dataset["data"]["attributes"]["provider"] == "cartodb")
                && matches!(find("widget"), Some(widget) if widget["data"]["attributes"]["published"] == true)
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "deleted": "abc" })))
        .expect(1)
        .mount(&backend)
        .await;

    let (_gateway, server) = gateway(test_config());
    register(&server, "dataset", &backend.uri()).await;

    let response = server.delete("/v1/dataset/abc").await;
    response.assert_status_ok();
    response.assert_json(&json!({ "deleted": "abc" }));
}

#[tokio::test]
async fn test_unknown_path_returns_error_envelope() {
    let (_gateway, server) = gateway(test_config());

    let response = server.get("/v1/does-not-exist").await;
    response.assert_status_not_found();
    assert_eq!(
        response.header("content-type").to_str().unwrap(),
        "application/vnd.api+json"
    );
    assert_eq!(
        response.json::<Value>(),
        json!({ "errors": [{ "status": 404, "detail": "Endpoint not found" }] })
    );
}

#[tokio::test]
async fn test_binary_response_is_relayed_untouched() {
    let png = vec![0x89u8, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0xff];
    let backend = MockServer::start().await;
    mount_info(
        &backend,
        json!({
            "endpoints": [{
                "path": "/v1/image/:id",
                "method": "GET",
                "binary": true,
                "redirect": { "path": "/api/v1/image/:id", "method": "GET" }
            }]
        }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/image/1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(png.clone(), "image/png"))
        .mount(&backend)
        .await;

    let (_gateway, server) = gateway(test_config());
    register(&server, "images", &backend.uri()).await;

    let response = server.get("/v1/image/1").await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type").to_str().unwrap(), "image/png");
    assert_eq!(response.as_bytes().as_ref(), png.as_slice());
}

#[tokio::test]
async fn test_backend_error_status_is_relayed() {
    let backend = MockServer::start().await;
    mount_info(
        &backend,
        json!({ "endpoints": [endpoint("/v1/dataset", "PATCH", "/api/v1/dataset", "PATCH")] }),
    )
    .await;
    Mock::given(method("PATCH"))
        .and(path("/api/v1/dataset"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({ "errors": [{ "detail": "name is required" }] })),
        )
        .mount(&backend)
        .await;

    let (_gateway, server) = gateway(test_config());
    register(&server, "dataset", &backend.uri()).await;

    let response = server.patch("/v1/dataset").json(&json!({})).await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    response.assert_json(&json!({ "errors": [{ "detail": "name is required" }] }));
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let (gateway, server) = gateway(test_config());

    let announced: AnnouncedEndpoint =
        serde_json::from_value(endpoint("/v1/gone", "GET", "/api/v1/gone", "GET")).unwrap();
    let redirect = Redirect {
        path: "/api/v1/gone".to_string(),
        url: "http://127.0.0.1:1".to_string(),
        method: "GET".to_string(),
        microservice: "gone".to_string(),
        filters: None,
        data: None,
    };
    let seeded = Endpoint::new(&announced, redirect, &[], &[], 1).unwrap();
    gateway.state().dispatcher.cache().replace(vec![seeded]);

    let response = server.get("/v1/gone").await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(response.json::<Value>()["errors"][0]["status"], 502);
}

#[tokio::test]
async fn test_multipart_upload_is_forwarded_with_fields() {
    let backend = MockServer::start().await;
    mount_info(
        &backend,
        json!({
            "endpoints": [{
                "path": "/v1/upload",
                "method": "POST",
                "redirect": { "path": "/api/v1/upload", "method": "POST", "data": { "source": "gateway" } }
            }]
        }),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/upload"))
        .and(|request: &Request| {
            let body = String::from_utf8_lossy(&request.body);
            body.contains("filename=\"notes.txt\"")
                && body.contains("hello upload")
                && body.contains("name=\"description\"")
                && body.contains("name=\"source\"")
                && !body.contains("name=\"app_key\"")
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "uploaded": true })))
        .expect(1)
        .mount(&backend)
        .await;

    let (_gateway, server) = gateway(test_config());
    register(&server, "uploads", &backend.uri()).await;

    let form = MultipartForm::new()
        .add_text("description", "field notes")
        .add_text("app_key", "secret")
        .add_part(
            "file",
            Part::bytes(b"hello upload".to_vec())
                .file_name("notes.txt")
                .mime_type("text/plain"),
        );

    let response = server.post("/v1/upload").multipart(form).await;
    response.assert_status_ok();
    response.assert_json(&json!({ "uploaded": true }));
}
