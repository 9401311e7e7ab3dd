//! # In-Memory Registration Store
//!
//! Keeps documents in `DashMap`s keyed by their identity. Per-key entry locking makes each
//! endpoint mutation atomic without a global lock; a creation sequence number keeps listings
//! in a stable order.

use super::{RegistrationStore, RemoveOutcome, UpsertOutcome};
use crate::core::error::GatewayResult;
use crate::registry::models::{Endpoint, Microservice, VersionRecord};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Clone)]
struct Stored<T> {
    seq: u64,
    value: T,
}

/// In-memory registration store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    microservices: DashMap<String, Stored<Microservice>>,
    /// Keyed by `(path, METHOD)`
    endpoints: DashMap<(String, String), Stored<Endpoint>>,
    version: Mutex<Option<VersionRecord>>,
    seq: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn endpoint_key(path: &str, method: &str) -> (String, String) {
        (path.to_string(), method.to_uppercase())
    }
}

#[async_trait]
impl RegistrationStore for InMemoryStore {
    async fn find_microservice(&self, id: &str) -> GatewayResult<Option<Microservice>> {
        Ok(self.microservices.get(id).map(|entry| entry.value.clone()))
    }

    async fn find_microservice_by_url(&self, url: &str, version: u64) -> GatewayResult<Option<Microservice>> {
        let mut found: Vec<Stored<Microservice>> = self
            .microservices
            .iter()
            .filter(|entry| entry.value.url == url && entry.value.version == version)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by_key(|stored| stored.seq);
        Ok(found.into_iter().next().map(|stored| stored.value))
    }

    async fn list_microservices(&self, url: Option<&str>) -> GatewayResult<Vec<Microservice>> {
        let mut all: Vec<Stored<Microservice>> = self
            .microservices
            .iter()
            .filter(|entry| url.map(|u| entry.value.url == u).unwrap_or(true))
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|stored| stored.seq);
        Ok(all.into_iter().map(|stored| stored.value).collect())
    }

    async fn save_microservice(&self, microservice: Microservice) -> GatewayResult<()> {
        match self.microservices.entry(microservice.id.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().value = microservice;
            }
            Entry::Vacant(entry) => {
                let seq = self.next_seq();
                entry.insert(Stored {
                    seq,
                    value: microservice,
                });
            }
        }
        Ok(())
    }

    async fn delete_microservice(&self, id: &str) -> GatewayResult<bool> {
        Ok(self.microservices.remove(id).is_some())
    }

    async fn find_endpoint(&self, path: &str, method: &str) -> GatewayResult<Option<Endpoint>> {
        Ok(self
            .endpoints
            .get(&Self::endpoint_key(path, method))
            .map(|entry| entry.value.clone()))
    }

    async fn list_endpoints(&self) -> GatewayResult<Vec<Endpoint>> {
        let mut all: Vec<Stored<Endpoint>> = self.endpoints.iter().map(|entry| entry.value().clone()).collect();
        all.sort_by_key(|stored| stored.seq);
        Ok(all.into_iter().map(|stored| stored.value).collect())
    }

    async fn upsert_redirect(&self, mut seed: Endpoint) -> GatewayResult<UpsertOutcome> {
        let key = Self::endpoint_key(&seed.path, &seed.method);
        let redirect = match seed.redirects.pop() {
            Some(redirect) => redirect,
            None => return Err(crate::core::error::GatewayError::store("Endpoint seed carries no redirect")),
        };

        match self.endpoints.entry(key) {
            Entry::Occupied(mut entry) => {
                let endpoint = &mut entry.get_mut().value;
                let outcome = match endpoint.redirects.iter_mut().find(|r| r.url == redirect.url) {
                    Some(existing) => {
                        *existing = redirect;
                        UpsertOutcome::RedirectUpdated
                    }
                    None => {
                        endpoint.redirects.push(redirect);
                        UpsertOutcome::RedirectAdded
                    }
                };

                endpoint.binary = seed.binary;
                endpoint.authenticated = seed.authenticated;
                endpoint.application_required = seed.application_required;
                endpoint.cache = seed.cache;
                endpoint.uncache = seed.uncache;
                endpoint.version = seed.version;
                endpoint.updated_at = Utc::now();

                debug!(path = %endpoint.path, method = %endpoint.method, ?outcome, "Endpoint updated");
                Ok(outcome)
            }
            Entry::Vacant(entry) => {
                seed.redirects.push(redirect);
                let seq = self.next_seq();
                debug!(path = %seed.path, method = %seed.method, "Endpoint created");
                entry.insert(Stored { seq, value: seed });
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn remove_redirect(&self, path: &str, method: &str, url: &str) -> GatewayResult<RemoveOutcome> {
        match self.endpoints.entry(Self::endpoint_key(path, method)) {
            Entry::Occupied(mut entry) => {
                let endpoint = &mut entry.get_mut().value;
                let before = endpoint.redirects.len();
                endpoint.redirects.retain(|r| r.url != url);

                if endpoint.redirects.len() == before {
                    return Ok(RemoveOutcome::NotFound);
                }

                if endpoint.redirects.is_empty() {
                    entry.remove();
                    return Ok(RemoveOutcome::Deleted);
                }

                endpoint.updated_at = Utc::now();
                Ok(RemoveOutcome::Shrunk)
            }
            Entry::Vacant(_) => Ok(RemoveOutcome::NotFound),
        }
    }

    async fn current_version(&self) -> GatewayResult<VersionRecord> {
        let mut version = self.version.lock();
        Ok(version.get_or_insert_with(VersionRecord::default).clone())
    }

    async fn touch_version(&self) -> GatewayResult<VersionRecord> {
        let mut version = self.version.lock();
        let record = version.get_or_insert_with(VersionRecord::default);
        record.last_updated = Utc::now();
        Ok(record.clone())
    }
}
