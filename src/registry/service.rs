//! # Microservice Registry
//!
//! Owns the registration protocol: contact the announcing microservice, fetch its declared
//! endpoints and reconcile them against the stored endpoint table.
//!
//! ## Registration cycle
//!
//! 1. Resolve the version (explicit, or the global counter)
//! 2. Find the microservice by `(url, version)`, or create it as `pending`
//! 3. `GET {url}{pathInfo}` with a signed bearer token
//! 4. Unreachable or unusable reply: keep the record as it is and change nothing else
//! 5. Reached: strip redirects for endpoints no longer announced, upsert every announced
//!    endpoint, mark the microservice `active`, bump the version and reload the dispatch cache
//!
//! Each endpoint is reconciled independently; a failure on one is logged and the loop goes on.

use crate::core::config::RegistryConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::dispatcher::cache::EndpointCache;
use crate::registry::announcement::{
    AnnouncedEndpoint, InfoDocument, InfoDocumentError, NormalizedInfo, RegistrationRequest,
};
use crate::registry::models::{Endpoint, Microservice, MicroserviceStatus, Redirect};
use crate::registry::token::CallbackSigner;
use crate::store::{RegistrationStore, RemoveOutcome};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Result of a registration call
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationOutcome {
    #[serde(flatten)]
    pub microservice: Microservice,
    /// Whether the microservice was reached and its endpoints synced
    #[serde(skip)]
    pub synced: bool,
}

/// Status line of the status listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MicroserviceStatusEntry {
    pub name: String,
    pub status: MicroserviceStatus,
}

/// The microservice registry
pub struct MicroserviceRegistry {
    store: Arc<dyn RegistrationStore>,
    cache: Arc<EndpointCache>,
    client: reqwest::Client,
    signer: CallbackSigner,
    info_timeout: Duration,
}

impl MicroserviceRegistry {
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        cache: Arc<EndpointCache>,
        client: reqwest::Client,
        config: &RegistryConfig,
    ) -> Self {
        Self {
            store,
            cache,
            client,
            signer: CallbackSigner::new(&config.callback_secret),
            info_timeout: config.info_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn RegistrationStore> {
        &self.store
    }

    /// Register or re-register a microservice
    #[instrument(skip_all, fields(microservice = %request.name, url = %request.url))]
    pub async fn register(&self, request: RegistrationRequest) -> GatewayResult<RegistrationOutcome> {
        info!("Registering microservice");

        let version = match request.version {
            Some(version) => version,
            None => self.store.current_version().await?.version,
        };

        let existing = self.store.find_microservice_by_url(&request.url, version).await?;
        let mut microservice = match existing {
            Some(found) => {
                debug!(id = %found.id, "Microservice already known");
                found
            }
            None => {
                debug!("Creating new microservice");
                let created = Microservice::pending(
                    request.name.clone(),
                    request.url.clone(),
                    request.path_info.clone(),
                    request.tags.clone(),
                    version,
                );
                self.store.save_microservice(created.clone()).await?;
                created
            }
        };

        // a re-registration may move the info path
        microservice.path_info = request.path_info.clone();

        let info = match self.fetch_info(&microservice).await {
            Some(document) => Self::resolve_info(&request, document),
            None => None,
        };
        let info = match info {
            Some(info) => info,
            None => {
                warn!("Microservice could not be reached on announced URL");
                return Ok(RegistrationOutcome {
                    microservice,
                    synced: false,
                });
            }
        };

        // redirects are stamped with the announced name
        microservice.name = request.name.clone();

        self.remove_stale_redirects(&microservice, &info.endpoints).await;
        self.save_endpoints(&microservice, &info, version).await;

        microservice.status = MicroserviceStatus::Active;
        microservice.tags = if info.tags.is_empty() { request.tags.clone() } else { info.tags.clone() };
        microservice.endpoints = info.endpoints;
        microservice.updated_at = Utc::now();
        self.store.save_microservice(microservice.clone()).await?;

        self.store.touch_version().await?;
        self.cache.reload(self.store.as_ref()).await?;

        info!(endpoints = microservice.endpoints.len(), "Microservice activated successfully");
        Ok(RegistrationOutcome {
            microservice,
            synced: true,
        })
    }

    /// Call the microservice's self-description endpoint
    ///
    /// Transport failures, non-2xx replies and non-JSON bodies all count as unreachable.
    async fn fetch_info(&self, microservice: &Microservice) -> Option<Value> {
        let url = format!("{}{}", microservice.url.trim_end_matches('/'), microservice.path_info);
        let token = match self.signer.sign(microservice) {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "Could not sign callback token");
                return None;
            }
        };

        debug!(url = %url, "Requesting microservice info");
        let response = match self
            .client
            .get(&url)
            .bearer_auth(token)
            .timeout(self.info_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "Microservice info call failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(url = %url, status = response.status().as_u16(), "Microservice info call was not successful");
            return None;
        }

        match response.json::<Value>().await {
            Ok(document) => Some(document),
            Err(e) => {
                warn!(url = %url, error = %e, "Microservice info reply is not JSON");
                None
            }
        }
    }

    /// Turn the fetched document into the endpoints to sync
    ///
    /// A document without any endpoint list, or one that lists none, falls back to the
    /// endpoints declared in the registration body. Without that fallback only an explicit
    /// list is usable.
    fn resolve_info(request: &RegistrationRequest, document: Value) -> Option<NormalizedInfo> {
        let info = match InfoDocument::from_value(document) {
            Ok(document) => document.normalize(),
            Err(InfoDocumentError::NoEndpointList) => match request.inline_declaration() {
                Some(inline) => {
                    debug!("Self-description has no endpoint list, using the registration body");
                    return Some(inline.normalize());
                }
                None => {
                    warn!("Microservice info document lists neither endpoints nor urls");
                    return None;
                }
            },
            Err(e) => {
                warn!(error = %e, "Microservice info document is invalid");
                return None;
            }
        };

        if !info.endpoints.is_empty() {
            return Some(info);
        }

        match request.inline_declaration() {
            Some(inline) => {
                debug!("Self-description lists no endpoints, using the registration body");
                let mut inline = inline.normalize();
                if inline.tags.is_empty() {
                    inline.tags = info.tags;
                }
                Some(inline)
            }
            None => Some(info),
        }
    }

    /// Strip this microservice's redirect from endpoints it no longer announces
    async fn remove_stale_redirects(&self, microservice: &Microservice, announced: &[AnnouncedEndpoint]) {
        let keep: HashSet<(String, String)> = announced.iter().map(AnnouncedEndpoint::key).collect();
        let stale: Vec<&AnnouncedEndpoint> = microservice
            .endpoints
            .iter()
            .filter(|previous| !keep.contains(&previous.key()))
            .collect();

        self.strip_redirects(&microservice.url, stale).await;
    }

    async fn strip_redirects<'a, I>(&self, url: &str, endpoints: I)
    where
        I: IntoIterator<Item = &'a AnnouncedEndpoint>,
    {
        for endpoint in endpoints {
            match self.store.remove_redirect(&endpoint.path, &endpoint.method, url).await {
                Ok(RemoveOutcome::Deleted) => {
                    info!(path = %endpoint.path, method = %endpoint.method, "Endpoint empty, removed")
                }
                Ok(RemoveOutcome::Shrunk) => {
                    info!(path = %endpoint.path, method = %endpoint.method, "Redirect removed from endpoint")
                }
                Ok(RemoveOutcome::NotFound) => {
                    debug!(path = %endpoint.path, method = %endpoint.method, "No redirect to remove")
                }
                Err(e) => error!(path = %endpoint.path, method = %endpoint.method, error = %e, "Failed to remove redirect"),
            }
        }
    }

    async fn save_endpoints(&self, microservice: &Microservice, info: &NormalizedInfo, version: u64) {
        for announced in &info.endpoints {
            if let Err(e) = self.save_endpoint(microservice, announced, info, version).await {
                error!(
                    path = %announced.path,
                    method = %announced.method,
                    error = %e,
                    "Failed to save endpoint"
                );
            }
        }
    }

    async fn save_endpoint(
        &self,
        microservice: &Microservice,
        announced: &AnnouncedEndpoint,
        info: &NormalizedInfo,
        version: u64,
    ) -> GatewayResult<()> {
        debug!(path = %announced.path, method = %announced.method, "Saving endpoint");

        let redirect = Redirect {
            path: announced.redirect.path.clone(),
            url: microservice.url.clone(),
            method: announced.redirect.method.to_uppercase(),
            microservice: microservice.name.clone(),
            filters: announced.redirect.filters.clone(),
            data: announced.redirect.data.clone(),
        };

        let seed = Endpoint::new(announced, redirect, &info.cache, &info.uncache, version)?;
        let outcome = self.store.upsert_redirect(seed).await?;
        debug!(path = %announced.path, method = %announced.method, ?outcome, "Endpoint saved");
        Ok(())
    }

    /// Strip every redirect this microservice provides
    pub async fn remove_endpoints_of_microservice(&self, microservice: &Microservice) {
        info!(url = %microservice.url, "Removing endpoints of microservice");
        self.strip_redirects(&microservice.url, &microservice.endpoints).await;
    }

    /// Delete a microservice and its redirects
    #[instrument(skip(self))]
    pub async fn delete_microservice(&self, id: &str) -> GatewayResult<Microservice> {
        let microservice = self
            .store
            .find_microservice(id)
            .await?
            .ok_or_else(|| GatewayError::microservice_not_found(id))?;

        self.remove_endpoints_of_microservice(&microservice).await;
        self.store.delete_microservice(id).await?;
        self.cache.reload(self.store.as_ref()).await?;

        info!(microservice = %microservice.name, "Microservice deleted");
        Ok(microservice)
    }

    /// Get a microservice by id
    pub async fn get_microservice(&self, id: &str) -> GatewayResult<Microservice> {
        self.store
            .find_microservice(id)
            .await?
            .ok_or_else(|| GatewayError::microservice_not_found(id))
    }

    /// List microservices, optionally by url
    pub async fn list_microservices(&self, url: Option<&str>) -> GatewayResult<Vec<Microservice>> {
        self.store.list_microservices(url).await
    }

    /// Name and status of every microservice
    pub async fn statuses(&self) -> GatewayResult<Vec<MicroserviceStatusEntry>> {
        Ok(self
            .store
            .list_microservices(None)
            .await?
            .into_iter()
            .map(|ms| MicroserviceStatusEntry {
                name: ms.name,
                status: ms.status,
            })
            .collect())
    }

    /// Reload the dispatch cache from the store
    pub async fn reload(&self) -> GatewayResult<usize> {
        self.cache.reload(self.store.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry() -> (MicroserviceRegistry, Arc<InMemoryStore>, Arc<EndpointCache>) {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(EndpointCache::new());
        let config = RegistryConfig {
            info_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let registry = MicroserviceRegistry::new(store.clone(), cache.clone(), reqwest::Client::new(), &config);
        (registry, store, cache)
    }

    fn request(name: &str, url: &str) -> RegistrationRequest {
        serde_json::from_value(json!({ "name": name, "url": url, "pathInfo": "/info" })).unwrap()
    }

    fn info(endpoints: serde_json::Value) -> serde_json::Value {
        json!({ "name": "svc1", "tags": ["test"], "endpoints": endpoints })
    }

    #[tokio::test]
    async fn test_register_creates_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(info(json!([{
                "path": "/v1/test",
                "method": "GET",
                "redirect": { "path": "/api/v1/test", "method": "GET" }
            }]))))
            .mount(&server)
            .await;

        let (registry, store, cache) = registry();
        let outcome = registry.register(request("svc1", &server.uri())).await.unwrap();

        assert!(outcome.synced);
        assert_eq!(outcome.microservice.status, MicroserviceStatus::Active);
        assert_eq!(outcome.microservice.tags, vec!["test".to_string()]);

        let endpoints = store.list_endpoints().await.unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].path, "/v1/test");
        assert_eq!(endpoints[0].redirects.len(), 1);
        assert_eq!(endpoints[0].redirects[0].url, server.uri());
        assert_eq!(endpoints[0].redirects[0].path, "/api/v1/test");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_microservice_stays_pending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (registry, store, _cache) = registry();
        let before = store.current_version().await.unwrap();
        let outcome = registry.register(request("svc1", &server.uri())).await.unwrap();

        assert!(!outcome.synced);
        assert_eq!(outcome.microservice.status, MicroserviceStatus::Pending);
        assert!(store.list_endpoints().await.unwrap().is_empty());
        assert_eq!(store.list_microservices(None).await.unwrap().len(), 1);
        assert_eq!(store.current_version().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_unrecognized_document_keeps_existing_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(info(json!([{
                "path": "/v1/test",
                "method": "GET",
                "redirect": { "path": "/api/v1/test", "method": "GET" }
            }]))))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "endpoint": [{ "path": "/v1/test", "method": "GET" }]
            })))
            .mount(&server)
            .await;

        let (registry, store, cache) = registry();
        assert!(registry.register(request("svc1", &server.uri())).await.unwrap().synced);
        let before = store.current_version().await.unwrap();

        let outcome = registry.register(request("svc1", &server.uri())).await.unwrap();
        assert!(!outcome.synced);
        assert_eq!(outcome.microservice.endpoints.len(), 1);
        assert_eq!(store.list_endpoints().await.unwrap().len(), 1);
        assert_eq!(store.current_version().await.unwrap(), before);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_renamed_microservice_stamps_redirects_with_new_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(info(json!([{
                "path": "/v1/test",
                "method": "GET",
                "redirect": { "path": "/api/v1/test", "method": "GET" }
            }]))))
            .mount(&server)
            .await;

        let (registry, store, _cache) = registry();
        registry.register(request("old-name", &server.uri())).await.unwrap();
        let outcome = registry.register(request("new-name", &server.uri())).await.unwrap();
        assert_eq!(outcome.microservice.name, "new-name");

        let endpoints = store.list_endpoints().await.unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].redirects.len(), 1);
        assert_eq!(endpoints[0].redirects[0].microservice, "new-name");
    }

    #[tokio::test]
    async fn test_delete_unknown_microservice() {
        let (registry, _store, _cache) = registry();
        let err = registry.delete_microservice("nope").await.unwrap_err();
        assert!(matches!(err, GatewayError::MicroserviceNotFound { .. }));
    }
}
