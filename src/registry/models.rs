//! # Registration Data Model
//!
//! Records persisted by the registration store: backend microservices, the endpoints they
//! contribute, and the global version marker.

use crate::dispatcher::filter::Filter;
use crate::registry::announcement::AnnouncedEndpoint;
use crate::routing::path::CompiledPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the single version record
pub const VERSION_RECORD_NAME: &str = "endpoint-version";

/// One physical backend target behind an endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redirect {
    /// Path template for the internal call
    pub path: String,

    /// Base URL of the owning microservice
    pub url: String,

    /// HTTP method of the internal call
    pub method: String,

    /// Name of the owning microservice
    pub microservice: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Filter>>,

    /// Static payload merged into the outbound query or body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Redirect {
    pub fn has_filters(&self) -> bool {
        self.filters.as_ref().map(|f| !f.is_empty()).unwrap_or(false)
    }
}

/// A routing rule: path template + method + one or more redirects
///
/// Identity is the `(path, method)` pair. An endpoint whose redirect list is empty is never
/// dispatched to and is deleted by the store as soon as that happens.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub id: String,
    pub path: String,
    pub method: String,
    #[serde(rename = "pathRegex")]
    pub pattern: CompiledPath,
    pub path_keys: Vec<String>,
    pub binary: bool,
    pub authenticated: bool,
    pub application_required: bool,
    pub cache: Vec<String>,
    pub uncache: Vec<String>,
    pub version: u64,
    #[serde(rename = "redirect")]
    pub redirects: Vec<Redirect>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    /// Build a fresh endpoint with a single redirect, compiling its path once
    pub fn new(
        announced: &AnnouncedEndpoint,
        redirect: Redirect,
        cache: &[String],
        uncache: &[String],
        version: u64,
    ) -> crate::core::error::GatewayResult<Self> {
        let pattern = CompiledPath::compile(&announced.path)?;
        let now = Utc::now();

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            path: announced.path.clone(),
            method: announced.method.to_uppercase(),
            path_keys: pattern.keys().to_vec(),
            pattern,
            binary: announced.binary,
            authenticated: announced.authenticated,
            application_required: announced.application_required,
            cache: cache.to_vec(),
            uncache: uncache.to_vec(),
            version,
            redirects: vec![redirect],
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether this endpoint serves `method` on `path`
    pub fn matches(&self, path: &str, method: &str) -> bool {
        self.method.eq_ignore_ascii_case(method) && self.pattern.is_match(path)
    }
}

/// Lifecycle of a registered backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MicroserviceStatus {
    /// Created but not yet confirmed reachable
    Pending,
    /// Reached at least once and endpoints synced
    Active,
}

impl std::fmt::Display for MicroserviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// A registered backend service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Microservice {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub path_info: String,
    pub status: MicroserviceStatus,
    pub tags: Vec<String>,
    /// Endpoints last announced by this microservice
    pub endpoints: Vec<AnnouncedEndpoint>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Microservice {
    /// Create a pending microservice with a freshly minted callback token
    pub fn pending(name: String, url: String, path_info: String, tags: Vec<String>, version: u64) -> Self {
        use rand::RngCore;

        let mut token = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut token);
        let now = Utc::now();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            url,
            token: hex::encode(token),
            path_info,
            status: MicroserviceStatus::Pending,
            tags,
            endpoints: Vec::new(),
            version,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Global change marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub name: String,
    pub version: u64,
    pub last_updated: DateTime<Utc>,
}

impl Default for VersionRecord {
    fn default() -> Self {
        Self {
            name: VERSION_RECORD_NAME.to_string(),
            version: 1,
            last_updated: Utc::now(),
        }
    }
}
