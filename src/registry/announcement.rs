//! # Announcements
//!
//! Shapes a microservice uses to describe itself, either in the registration call body or in
//! the self-description document served at `{url}{pathInfo}`.
//!
//! Two document shapes exist. The canonical one lists `endpoints`; the legacy one lists `urls`
//! with one or more targets per entry. [`InfoDocument::from_value`] picks the shape by its list
//! key and [`InfoDocument::normalize`] turns either into a [`NormalizedInfo`] before anything
//! else looks at it. Entries that do not match the shape are skipped one by one.

use crate::dispatcher::filter::Filter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Default self-description path
pub const DEFAULT_PATH_INFO: &str = "/info";

fn default_path_info() -> String {
    DEFAULT_PATH_INFO.to_string()
}

/// Internal call target of an announced endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncedRedirect {
    pub path: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Filter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

/// One endpoint in the canonical shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncedEndpoint {
    pub path: String,
    pub method: String,
    pub redirect: AnnouncedRedirect,
    #[serde(default)]
    pub binary: bool,
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub application_required: bool,
}

impl AnnouncedEndpoint {
    /// Identity of the endpoint this announcement contributes to
    pub fn key(&self) -> (String, String) {
        (self.path.clone(), self.method.to_uppercase())
    }
}

/// A target of a legacy `urls` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyTarget {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub filters: Option<Vec<Filter>>,
}

/// One entry of the legacy `urls` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyUrl {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub endpoints: Vec<LegacyTarget>,
    #[serde(default)]
    pub binary: Option<bool>,
    #[serde(default)]
    pub authenticated: Option<bool>,
    #[serde(default, rename = "applicationRequired")]
    pub application_required: Option<bool>,
}

impl LegacyUrl {
    /// Translate to the canonical shape; entries without a target are dropped
    fn into_canonical(self) -> Option<AnnouncedEndpoint> {
        let target = match self.endpoints.into_iter().next() {
            Some(target) => target,
            None => {
                warn!(path = %self.url, method = %self.method, "Legacy url entry has no target, skipping");
                return None;
            }
        };

        Some(AnnouncedEndpoint {
            path: self.url,
            method: self.method,
            redirect: AnnouncedRedirect {
                path: target.path,
                method: target.method,
                filters: target.filters,
                data: target.data,
            },
            binary: self.binary.unwrap_or(false),
            authenticated: self.authenticated.unwrap_or(false),
            application_required: self.application_required.unwrap_or(false),
        })
    }
}

/// Legacy self-description: `{ "urls": [...] }`
#[derive(Debug, Clone)]
pub struct LegacyInfo {
    pub urls: Vec<LegacyUrl>,
    pub tags: Vec<String>,
    pub cache: Vec<String>,
    pub uncache: Vec<String>,
}

/// Canonical self-description: `{ "endpoints": [...] }`
#[derive(Debug, Clone, Default)]
pub struct CanonicalInfo {
    pub name: Option<String>,
    pub endpoints: Vec<AnnouncedEndpoint>,
    pub tags: Vec<String>,
    pub cache: Vec<String>,
    pub uncache: Vec<String>,
}

/// A self-description document as served by a microservice
#[derive(Debug, Clone)]
pub enum InfoDocument {
    Legacy(LegacyInfo),
    Canonical(CanonicalInfo),
}

/// Either document shape reduced to the canonical endpoint list
#[derive(Debug, Clone, Default)]
pub struct NormalizedInfo {
    pub endpoints: Vec<AnnouncedEndpoint>,
    pub tags: Vec<String>,
    pub cache: Vec<String>,
    pub uncache: Vec<String>,
}

/// Why a self-description document cannot be used
#[derive(Debug, Error)]
pub enum InfoDocumentError {
    #[error("document lists neither endpoints nor urls")]
    NoEndpointList,

    #[error("document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("none of the {count} {field} entries is valid")]
    NoValidEntries { field: &'static str, count: usize },
}

/// Envelope of a self-description document; list entries are decoded one by one
#[derive(Debug, Deserialize)]
struct RawInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    urls: Option<Vec<Value>>,
    #[serde(default)]
    endpoints: Option<Vec<Value>>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    cache: Vec<String>,
    #[serde(default)]
    uncache: Vec<String>,
}

/// Decode every entry on its own, skipping the ones that do not match the shape
fn decode_entries<T>(field: &'static str, entries: Vec<Value>) -> Result<Vec<T>, InfoDocumentError>
where
    T: DeserializeOwned,
{
    let count = entries.len();
    let decoded: Vec<T> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(field, index, error = %e, "Skipping invalid announced entry");
                None
            }
        })
        .collect();

    if count > 0 && decoded.is_empty() {
        return Err(InfoDocumentError::NoValidEntries { field, count });
    }
    Ok(decoded)
}

impl InfoDocument {
    /// Read a document, choosing the legacy shape when `urls` is present
    pub fn from_value(value: Value) -> Result<Self, InfoDocumentError> {
        let raw: RawInfo = serde_json::from_value(value)?;

        if let Some(urls) = raw.urls {
            return Ok(Self::Legacy(LegacyInfo {
                urls: decode_entries("urls", urls)?,
                tags: raw.tags,
                cache: raw.cache,
                uncache: raw.uncache,
            }));
        }

        match raw.endpoints {
            Some(endpoints) => Ok(Self::Canonical(CanonicalInfo {
                name: raw.name,
                endpoints: decode_entries("endpoints", endpoints)?,
                tags: raw.tags,
                cache: raw.cache,
                uncache: raw.uncache,
            })),
            None => Err(InfoDocumentError::NoEndpointList),
        }
    }

    pub fn normalize(self) -> NormalizedInfo {
        let mut info = match self {
            Self::Canonical(doc) => NormalizedInfo {
                endpoints: doc.endpoints,
                tags: doc.tags,
                cache: doc.cache,
                uncache: doc.uncache,
            },
            Self::Legacy(doc) => NormalizedInfo {
                endpoints: doc.urls.into_iter().filter_map(LegacyUrl::into_canonical).collect(),
                tags: doc.tags,
                cache: doc.cache,
                uncache: doc.uncache,
            },
        };

        for endpoint in &mut info.endpoints {
            endpoint.method = endpoint.method.to_uppercase();
            endpoint.redirect.method = endpoint.redirect.method.to_uppercase();
        }

        info
    }
}

/// Body of the registration call
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub name: String,
    pub url: String,
    #[serde(default = "default_path_info")]
    pub path_info: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Explicit version; the global version counter is used when absent
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub endpoints: Option<Vec<AnnouncedEndpoint>>,
    #[serde(default)]
    pub urls: Option<Vec<LegacyUrl>>,
}

impl RegistrationRequest {
    /// Endpoints declared inline in the registration body, if any
    pub fn inline_declaration(&self) -> Option<InfoDocument> {
        if let Some(urls) = &self.urls {
            return Some(InfoDocument::Legacy(LegacyInfo {
                urls: urls.clone(),
                tags: self.tags.clone(),
                cache: Vec::new(),
                uncache: Vec::new(),
            }));
        }

        self.endpoints.as_ref().map(|endpoints| {
            InfoDocument::Canonical(CanonicalInfo {
                name: Some(self.name.clone()),
                endpoints: endpoints.clone(),
                tags: self.tags.clone(),
                ..Default::default()
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_document() {
        let doc = InfoDocument::from_value(json!({
            "name": "dataset",
            "tags": ["dataset"],
            "endpoints": [{
                "path": "/v1/dataset",
                "method": "get",
                "redirect": { "path": "/api/v1/dataset", "method": "get" }
            }],
            "cache": ["dataset"]
        }))
        .unwrap();

        let info = doc.normalize();
        assert_eq!(info.endpoints.len(), 1);
        assert_eq!(info.endpoints[0].method, "GET");
        assert_eq!(info.endpoints[0].redirect.method, "GET");
        assert!(!info.endpoints[0].binary);
        assert_eq!(info.cache, vec!["dataset".to_string()]);
        assert_eq!(info.tags, vec!["dataset".to_string()]);
    }

    #[test]
    fn test_legacy_document_is_translated() {
        let doc = InfoDocument::from_value(json!({
            "urls": [
                {
                    "url": "/v1/layer/:id",
                    "method": "GET",
                    "authenticated": true,
                    "endpoints": [{ "method": "GET", "path": "/api/v1/layer/:id" }]
                },
                { "url": "/v1/orphan", "method": "GET", "endpoints": [] }
            ]
        }))
        .unwrap();

        assert!(matches!(doc, InfoDocument::Legacy(_)));
        let info = doc.normalize();
        assert_eq!(info.endpoints.len(), 1);

        let endpoint = &info.endpoints[0];
        assert_eq!(endpoint.path, "/v1/layer/:id");
        assert_eq!(endpoint.redirect.path, "/api/v1/layer/:id");
        assert!(endpoint.authenticated);
        assert!(!endpoint.binary);
        assert!(!endpoint.application_required);
    }

    #[test]
    fn test_document_without_endpoint_list() {
        let err = InfoDocument::from_value(json!({ "name": "empty", "endpoint": [] })).unwrap_err();
        assert!(matches!(err, InfoDocumentError::NoEndpointList));
    }

    #[test]
    fn test_invalid_legacy_entry_is_skipped() {
        let doc = InfoDocument::from_value(json!({
            "urls": [
                {
                    "url": "/v1/kept",
                    "method": "GET",
                    "endpoints": [{ "method": "GET", "path": "/api/v1/kept" }]
                },
                { "url": "/v1/other", "endpoints": [{ "method": "GET", "path": "/api/v1/other" }] }
            ]
        }))
        .unwrap();

        let info = doc.normalize();
        assert_eq!(info.endpoints.len(), 1);
        assert_eq!(info.endpoints[0].path, "/v1/kept");
    }

    #[test]
    fn test_invalid_canonical_entry_is_skipped() {
        let doc = InfoDocument::from_value(json!({
            "endpoints": [
                { "path": "/v1/broken", "method": "GET" },
                {
                    "path": "/v1/fine",
                    "method": "post",
                    "redirect": { "path": "/api/v1/fine", "method": "post" }
                }
            ]
        }))
        .unwrap();

        let info = doc.normalize();
        assert_eq!(info.endpoints.len(), 1);
        assert_eq!(info.endpoints[0].method, "POST");
    }

    #[test]
    fn test_document_with_only_invalid_entries() {
        let err = InfoDocument::from_value(json!({ "endpoints": [{ "path": "/v1/broken" }] })).unwrap_err();
        assert!(matches!(err, InfoDocumentError::NoValidEntries { field: "endpoints", count: 1 }));

        let err = InfoDocument::from_value(json!("not an object")).unwrap_err();
        assert!(matches!(err, InfoDocumentError::Malformed(_)));
    }

    #[test]
    fn test_explicit_empty_list_is_usable() {
        let doc = InfoDocument::from_value(json!({ "endpoints": [] })).unwrap();
        assert!(doc.normalize().endpoints.is_empty());
    }

    #[test]
    fn test_registration_request_defaults() {
        let request: RegistrationRequest = serde_json::from_value(json!({
            "name": "svc1",
            "url": "http://h:8000"
        }))
        .unwrap();

        assert_eq!(request.path_info, "/info");
        assert!(request.version.is_none());
        assert!(request.inline_declaration().is_none());
    }
}
