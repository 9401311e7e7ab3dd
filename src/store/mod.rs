//! # Registration Store
//!
//! Persistence seam for microservices, endpoints and the version record. Every structural
//! change to an endpoint is a single atomic store operation ([`RegistrationStore::upsert_redirect`],
//! [`RegistrationStore::remove_redirect`]) so the zero-redirect invariant holds at all times
//! and concurrent registrations on the same `(path, method)` cannot lose each other's updates.

pub mod memory;

pub use memory::InMemoryStore;

use crate::core::error::GatewayResult;
use crate::registry::models::{Endpoint, Microservice, VersionRecord};
use async_trait::async_trait;

/// What an upsert did to the stored endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No endpoint existed for `(path, method)`; the seed was stored
    Created,
    /// A redirect with the same url was updated in place
    RedirectUpdated,
    /// The redirect was appended to an existing endpoint
    RedirectAdded,
}

/// What removing a redirect did to the stored endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// No endpoint or no matching redirect
    NotFound,
    /// The endpoint lost one redirect and still has others
    Shrunk,
    /// The last redirect was removed and the endpoint deleted
    Deleted,
}

/// Trait for registration store implementations
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Get a microservice by id
    async fn find_microservice(&self, id: &str) -> GatewayResult<Option<Microservice>>;

    /// Get the microservice registered for `(url, version)`
    async fn find_microservice_by_url(&self, url: &str, version: u64) -> GatewayResult<Option<Microservice>>;

    /// List microservices in registration order, optionally only those with the given url
    async fn list_microservices(&self, url: Option<&str>) -> GatewayResult<Vec<Microservice>>;

    /// Insert or replace a microservice by id
    async fn save_microservice(&self, microservice: Microservice) -> GatewayResult<()>;

    /// Delete a microservice by id, returning whether it existed
    async fn delete_microservice(&self, id: &str) -> GatewayResult<bool>;

    /// Get the endpoint for `(path, method)`
    async fn find_endpoint(&self, path: &str, method: &str) -> GatewayResult<Option<Endpoint>>;

    /// List all endpoints in creation order
    async fn list_endpoints(&self) -> GatewayResult<Vec<Endpoint>>;

    /// Merge a single-redirect seed into the endpoint for its `(path, method)`
    ///
    /// When the endpoint exists, the redirect with the same `url` is updated (or the seed's
    /// redirect appended) and the endpoint's flags take the seed's values. Otherwise the seed
    /// is stored as a new endpoint.
    async fn upsert_redirect(&self, seed: Endpoint) -> GatewayResult<UpsertOutcome>;

    /// Remove the redirect pointing at `url` from the endpoint for `(path, method)`,
    /// deleting the endpoint when no redirect remains
    async fn remove_redirect(&self, path: &str, method: &str, url: &str) -> GatewayResult<RemoveOutcome>;

    /// Get the version record, creating it on first access
    async fn current_version(&self) -> GatewayResult<VersionRecord>;

    /// Stamp the version record's `last_updated` with the current time
    async fn touch_version(&self) -> GatewayResult<VersionRecord>;
}
