//! # Redirect Filters
//!
//! A filter is a pre-flight call whose JSON response must satisfy a comparison tree before the
//! redirect that declares it is used. Filters gate whether a route exists: a filter call that
//! returns 404, any other non-2xx status, or a response that does not match makes the dispatch
//! fail with `EndpointNotFound`.
//!
//! ## Comparison trees
//!
//! ```json
//! { "compare": { "data": { "attributes": { "provider": ["cartodb", "featureservice"] } } },
//!   "condition": "OR" }
//! ```
//!
//! - a scalar is a leaf compared by equality
//! - an object matches when every listed field is present and matches (extra fields are fine)
//! - an array is a group of alternatives combined with the filter's `condition`
//!
//! Groups short-circuit in declaration order.

use crate::core::error::{GatewayError, GatewayResult};
use crate::dispatcher::cache::EndpointCache;
use crate::dispatcher::request::{copy_allowed_headers, join_url};
use crate::routing::path::instantiate;
use axum::http::HeaderMap;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// How the members of a comparison group are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Condition {
    #[default]
    And,
    Or,
}

/// A recursive comparison spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum CompareSpec {
    /// Leaf equality
    Value(Value),
    /// Subset match on the listed fields
    Object(Vec<(String, CompareSpec)>),
    /// Alternatives combined with the filter condition
    Group(Vec<CompareSpec>),
}

impl CompareSpec {
    /// Evaluate this spec against a response document
    pub fn matches(&self, target: &Value, condition: Condition) -> bool {
        match self {
            Self::Value(expected) => expected == target,
            Self::Object(fields) => match target.as_object() {
                Some(object) => fields.iter().all(|(key, spec)| {
                    object
                        .get(key)
                        .map(|value| spec.matches(value, condition))
                        .unwrap_or(false)
                }),
                None => false,
            },
            Self::Group(members) => match condition {
                Condition::And => members.iter().all(|m| m.matches(target, condition)),
                Condition::Or => members.iter().any(|m| m.matches(target, condition)),
            },
        }
    }
}

impl From<Value> for CompareSpec {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
            Value::Array(items) => Self::Group(items.into_iter().map(Self::from).collect()),
            other => Self::Value(other),
        }
    }
}

impl From<CompareSpec> for Value {
    fn from(spec: CompareSpec) -> Self {
        match spec {
            CompareSpec::Value(value) => value,
            CompareSpec::Object(fields) => {
                Value::Object(fields.into_iter().map(|(k, v)| (k, Value::from(v))).collect::<Map<_, _>>())
            }
            CompareSpec::Group(members) => Value::Array(members.into_iter().map(Value::from).collect()),
        }
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// A filter declared on a redirect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Key under which the filter response is exposed to the outbound call
    pub name: String,

    /// Path template of the filter call; resolved through the endpoint table unless `url` is set
    pub path: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// Base URL to call directly instead of resolving `path` through the endpoint table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Maps filter path parameters to inbound path parameters (defaults to the same name)
    #[serde(default)]
    pub params: HashMap<String, String>,

    pub compare: CompareSpec,

    #[serde(default)]
    pub condition: Condition,

    /// JSON pointer selecting the compared part of the response (whole document by default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
}

impl Filter {
    /// Resolve this filter's path parameters from the inbound captures
    fn path_values(&self, inbound: &HashMap<String, String>) -> HashMap<String, String> {
        let mut values = inbound.clone();
        for (own, source) in &self.params {
            if let Some(value) = inbound.get(source) {
                values.insert(own.clone(), value.clone());
            }
        }
        values
    }

    /// Evaluate the comparison tree against a filter response
    pub fn accepts(&self, document: &Value) -> bool {
        let target = match &self.pointer {
            Some(pointer) => match document.pointer(pointer) {
                Some(target) => target,
                None => return false,
            },
            None => document,
        };
        self.compare.matches(target, self.condition)
    }
}

/// Everything a filter call needs from the request being dispatched
pub struct FilterContext<'a> {
    pub cache: &'a EndpointCache,
    pub client: &'a reqwest::Client,
    pub timeout: Duration,
    pub params: &'a HashMap<String, String>,
    pub headers: &'a HeaderMap,
    pub request_path: &'a str,
}

/// Run every filter (all must pass) and collect each filter's response under its name
#[instrument(skip_all, fields(path = %ctx.request_path, filters = filters.len()))]
pub async fn verify_filters(filters: &[Filter], ctx: &FilterContext<'_>) -> GatewayResult<Vec<(String, Value)>> {
    let mut exposed = Vec::with_capacity(filters.len());

    for filter in filters {
        let (url, method) = resolve_target(filter, ctx)?;
        debug!(filter = %filter.name, url = %url, method = %method, "Calling filter");

        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| GatewayError::endpoint_not_found(ctx.request_path))?;

        let response = ctx
            .client
            .request(method, &url)
            .headers(copy_allowed_headers(ctx.headers))
            .timeout(ctx.timeout)
            .send()
            .await
            .map_err(|e| GatewayError::upstream(url.clone(), e.to_string()))?;

        if !response.status().is_success() {
            info!(filter = %filter.name, status = response.status().as_u16(), "Filter call was not successful");
            return Err(GatewayError::endpoint_not_found(ctx.request_path));
        }

        let document: Value = match response.json().await {
            Ok(document) => document,
            Err(e) => {
                info!(filter = %filter.name, error = %e, "Filter response is not JSON");
                return Err(GatewayError::endpoint_not_found(ctx.request_path));
            }
        };

        if !filter.accepts(&document) {
            info!(filter = %filter.name, "Filter comparison did not match");
            return Err(GatewayError::endpoint_not_found(ctx.request_path));
        }

        exposed.push((filter.name.clone(), document));
    }

    Ok(exposed)
}

/// Work out the concrete URL and method of a filter call
fn resolve_target(filter: &Filter, ctx: &FilterContext<'_>) -> GatewayResult<(String, String)> {
    let values = filter.path_values(ctx.params);
    let filter_path = instantiate(&filter.path, &values)?;

    if let Some(base) = &filter.url {
        return Ok((join_url(base, &filter_path)?, filter.method.clone()));
    }

    let endpoint = ctx
        .cache
        .find_endpoint(&filter_path, &filter.method)
        .ok_or_else(|| GatewayError::endpoint_not_found(ctx.request_path))?;

    let redirect = endpoint
        .redirects
        .choose(&mut rand::thread_rng())
        .ok_or_else(|| GatewayError::endpoint_not_found(ctx.request_path))?;

    let captured = endpoint.pattern.captures(&filter_path).unwrap_or_default();
    let internal_path = instantiate(&redirect.path, &captured)?;

    Ok((join_url(&redirect.url, &internal_path)?, redirect.method.clone()))
}
