//! # Outbound Request Builder
//!
//! Turns an inbound request into the descriptor of the call to make against a backend:
//! endpoint lookup, redirect choice, filter verification, URL instantiation, query and body
//! composition, file re-attachment and header filtering.
//!
//! Routing failures (no endpoint, no redirect, a filter that did not pass) are
//! `EndpointNotFound`. Only a filter call that could not be made at all is an upstream error.

use crate::core::config::DispatcherConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::dispatcher::cache::EndpointCache;
use crate::dispatcher::filter::{verify_filters, FilterContext};
use crate::routing::path::instantiate;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use rand::seq::SliceRandom;
use serde_json::{Map, Value};
use std::sync::Arc;
use tempfile::TempPath;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Inbound headers copied to outbound calls (matched case-insensitively)
pub const ALLOWED_HEADERS: [&str; 5] = ["cache-control", "charset", "location", "host", "authorization"];

/// Parameters that never leave the gateway
pub const INTERNAL_PARAMS: [&str; 2] = ["app_key", "loggedUser"];

/// Application-key context resolved for the inbound request by an outer layer
#[derive(Debug, Clone)]
pub struct ApplicationKey(pub Value);

/// A file part of an inbound multipart request, spooled to disk
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size: u64,
    /// Deleted when the last clone is dropped
    pub path: Arc<TempPath>,
}

/// The parts of an inbound request the builder looks at
#[derive(Debug, Default)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    /// JSON, form or multipart text fields
    pub fields: Map<String, Value>,
    pub files: Vec<UploadedFile>,
    pub app_key: Option<Value>,
}

/// Body of an outbound call
#[derive(Debug)]
pub enum OutboundBody {
    None,
    Json(Map<String, Value>),
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<UploadedFile>,
    },
}

/// Everything the proxy executor needs to make the call
#[derive(Debug)]
pub struct OutboundRequest {
    pub url: String,
    pub method: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: OutboundBody,
    /// Relay the response bytes untouched
    pub binary: bool,
}

impl OutboundRequest {
    /// The destination URL with the query string applied
    pub fn full_url(&self) -> GatewayResult<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| GatewayError::internal(format!("Invalid outbound url '{}': {}", self.url, e)))?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }
}

/// Resolve a path against a base URL
pub fn join_url(base: &str, path: &str) -> GatewayResult<String> {
    let base = Url::parse(base).map_err(|e| GatewayError::internal(format!("Invalid redirect url '{}': {}", base, e)))?;
    let joined = base
        .join(path)
        .map_err(|e| GatewayError::internal(format!("Cannot resolve '{}' against '{}': {}", path, base, e)))?;
    Ok(joined.to_string())
}

/// Keep only the allow-listed headers
pub fn copy_allowed_headers(headers: &HeaderMap) -> HeaderMap {
    let mut allowed = HeaderMap::new();
    for (name, value) in headers {
        if ALLOWED_HEADERS.contains(&name.as_str()) {
            allowed.append(name.clone(), value.clone());
        }
    }
    allowed
}

fn is_internal_param(name: &str) -> bool {
    INTERNAL_PARAMS.contains(&name)
}

/// Render a value for a query string: strings raw, everything else as JSON
fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a value for a multipart text field; null becomes the literal "null"
fn multipart_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn carries_body(method: &str) -> bool {
    matches!(method, "POST" | "PATCH" | "PUT")
}

/// Request-time routing engine
pub struct Dispatcher {
    cache: Arc<EndpointCache>,
    client: reqwest::Client,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(cache: Arc<EndpointCache>, client: reqwest::Client, config: DispatcherConfig) -> Self {
        Self { cache, client, config }
    }

    pub fn cache(&self) -> &Arc<EndpointCache> {
        &self.cache
    }

    /// Build the outbound call for an inbound request
    #[instrument(skip_all, fields(method = %inbound.method, path = %inbound.path))]
    pub async fn build_outbound_request(&self, inbound: InboundRequest) -> GatewayResult<OutboundRequest> {
        let endpoint = self
            .cache
            .find_endpoint(&inbound.path, &inbound.method)
            .ok_or_else(|| GatewayError::endpoint_not_found(&inbound.path))?;

        info!(endpoint_path = %endpoint.path, endpoint_method = %endpoint.method, "Endpoint found");

        let redirect = endpoint
            .redirects
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| GatewayError::endpoint_not_found(&inbound.path))?;

        let params = endpoint.pattern.captures(&inbound.path).unwrap_or_default();

        let mut extra: Vec<(String, Value)> = Vec::new();
        if let Some(data) = &redirect.data {
            extra.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        if let Some(filters) = redirect.filters.as_deref().filter(|f| !f.is_empty()) {
            let ctx = FilterContext {
                cache: &self.cache,
                client: &self.client,
                timeout: self.config.filter_timeout,
                params: &params,
                headers: &inbound.headers,
                request_path: &inbound.path,
            };
            extra.extend(verify_filters(filters, &ctx).await?);
        }

        let internal_path = instantiate(&redirect.path, &params)?;
        let url = join_url(&redirect.url, &internal_path)?;
        let method = redirect.method.to_uppercase();

        info!(
            from = %inbound.path,
            to = %url,
            microservice = %redirect.microservice,
            "Dispatching request to private endpoint"
        );

        let with_body = carries_body(&method);

        let mut query: Vec<(String, String)> = inbound
            .query
            .into_iter()
            .filter(|(name, _)| !is_internal_param(name))
            .collect();

        let mut fields = Map::new();
        if with_body {
            fields = inbound
                .fields
                .into_iter()
                .filter(|(name, _)| !is_internal_param(name))
                .collect();
            for (name, value) in extra {
                fields.insert(name, value);
            }
        } else {
            query.extend(extra.iter().map(|(name, value)| (name.clone(), query_value(value))));
        }

        let body = if inbound.files.is_empty() {
            if with_body {
                debug!("Is JSON request");
                OutboundBody::Json(fields)
            } else {
                OutboundBody::None
            }
        } else {
            debug!(files = inbound.files.len(), "Is FormData request");
            self.log_small_files(&inbound.files).await;
            OutboundBody::Multipart {
                fields: fields.iter().map(|(k, v)| (k.clone(), multipart_value(v))).collect(),
                files: inbound.files,
            }
        };

        let mut headers = copy_allowed_headers(&inbound.headers);
        if let Some(app_key) = &inbound.app_key {
            match (
                HeaderName::from_bytes(self.config.app_key_header.as_bytes()),
                HeaderValue::from_str(&app_key.to_string()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("Application key context cannot be sent as a header, dropping it"),
            }
        }

        Ok(OutboundRequest {
            url,
            method,
            query,
            headers,
            body,
            binary: endpoint.binary,
        })
    }

    async fn log_small_files(&self, files: &[UploadedFile]) {
        for file in files {
            if file.size < self.config.small_file_threshold {
                match tokio::fs::read(&**file.path).await {
                    Ok(contents) => debug!(
                        field = %file.field,
                        file_name = %file.file_name,
                        contents = %String::from_utf8_lossy(&contents),
                        "File content"
                    ),
                    Err(e) => debug!(field = %file.field, error = %e, "Could not read spooled file"),
                }
            }
        }
    }
}
