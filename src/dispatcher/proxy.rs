//! # Proxy Executor
//!
//! Issues the outbound call described by an [`OutboundRequest`] and relays the backend's
//! status, headers and body. Backend error statuses are relayed as-is; only a call that could
//! not be made at all becomes a 502.

use crate::core::error::{GatewayError, GatewayResult};
use crate::dispatcher::request::{OutboundBody, OutboundRequest, UploadedFile};
use axum::body::Body;
use axum::http::HeaderMap;
use axum::response::Response;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

/// Headers that describe a single connection and are never relayed
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Executes outbound calls
#[derive(Debug, Clone)]
pub struct ProxyExecutor {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl ProxyExecutor {
    pub fn new(client: reqwest::Client, timeout: Option<Duration>) -> Self {
        Self { client, timeout }
    }

    /// Make the call and turn the backend reply into a gateway response
    #[instrument(skip_all, fields(method = %request.method, url = %request.url, binary = request.binary))]
    pub async fn execute(&self, request: OutboundRequest) -> GatewayResult<Response> {
        let url = request.full_url()?;
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| GatewayError::internal(format!("Invalid outbound method '{}'", request.method)))?;

        let mut builder = self.client.request(method, url.clone()).headers(request.headers);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        // spooled files must outlive the send
        let mut _spooled: Vec<UploadedFile> = Vec::new();
        builder = match request.body {
            OutboundBody::None => builder,
            OutboundBody::Json(body) => builder.json(&body),
            OutboundBody::Multipart { fields, files } => {
                let form = build_form(fields, &files).await?;
                _spooled = files;
                builder.multipart(form)
            }
        };

        let response = builder.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Could not reach backend");
            GatewayError::upstream(url.to_string(), e.to_string())
        })?;

        let status = response.status();
        let headers = relayable_headers(response.headers());
        debug!(status = status.as_u16(), "Backend responded");

        let body = if request.binary {
            Body::from_stream(response.bytes_stream())
        } else {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| GatewayError::upstream(url.to_string(), e.to_string()))?;
            Body::from(bytes)
        };

        let mut relayed = Response::builder()
            .status(status)
            .body(body)
            .map_err(|e| GatewayError::internal(format!("Failed to build response: {}", e)))?;
        *relayed.headers_mut() = headers;
        Ok(relayed)
    }
}

/// Build a multipart form, streaming each spooled file from disk
async fn build_form(fields: Vec<(String, String)>, files: &[UploadedFile]) -> GatewayResult<Form> {
    let mut form = Form::new();
    for (name, value) in fields {
        form = form.text(name, value);
    }

    for file in files {
        let handle = tokio::fs::File::open(&**file.path).await?;
        let stream = reqwest::Body::wrap_stream(ReaderStream::new(handle));
        let mut part = Part::stream_with_length(stream, file.size).file_name(file.file_name.clone());
        if let Some(content_type) = &file.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| GatewayError::validation(file.field.clone(), format!("Invalid content type: {}", e)))?;
        }
        form = form.part(file.field.clone(), part);
    }

    Ok(form)
}

fn relayable_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if !HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}
