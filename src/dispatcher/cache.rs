//! # Dispatch Cache
//!
//! In-memory snapshot of every endpoint, matched on each request without touching the store.
//! A reload reads the whole collection and swaps the snapshot pointer in one step, so readers
//! see either the old table or the new one. Reloads run one at a time, so the last one to
//! finish always holds the newest read of the store.

use crate::core::error::GatewayResult;
use crate::registry::models::Endpoint;
use crate::store::RegistrationStore;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// An immutable endpoint table
pub type EndpointSnapshot = Arc<Vec<Arc<Endpoint>>>;

/// Atomically swappable endpoint table
#[derive(Debug)]
pub struct EndpointCache {
    endpoints: ArcSwap<Vec<Arc<Endpoint>>>,
    /// Held across list and swap; readers never take it
    reload_lock: Mutex<()>,
}

impl Default for EndpointCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            endpoints: ArcSwap::from_pointee(Vec::new()),
            reload_lock: Mutex::new(()),
        }
    }

    /// Replace the whole table
    pub fn replace(&self, endpoints: Vec<Endpoint>) {
        let table: Vec<Arc<Endpoint>> = endpoints.into_iter().map(Arc::new).collect();
        self.endpoints.store(Arc::new(table));
    }

    /// Re-read every endpoint from the store and swap it in
    pub async fn reload(&self, store: &dyn RegistrationStore) -> GatewayResult<usize> {
        let _guard = self.reload_lock.lock().await;
        debug!("Reloading endpoints");
        let endpoints = store.list_endpoints().await?;
        let count = endpoints.len();
        self.replace(endpoints);
        info!(endpoints = count, "Dispatch cache reloaded");
        Ok(count)
    }

    /// The current table
    pub fn snapshot(&self) -> EndpointSnapshot {
        self.endpoints.load_full()
    }

    pub fn len(&self) -> usize {
        self.endpoints.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First endpoint, in table order, serving `method` on `path`
    pub fn find_endpoint(&self, path: &str, method: &str) -> Option<Arc<Endpoint>> {
        let snapshot = self.endpoints.load();

        if snapshot.is_empty() {
            error!(fatal = true, path, method, "Endpoints cache is empty");
            return None;
        }

        let found = snapshot.iter().find(|endpoint| endpoint.matches(path, method)).cloned();
        match &found {
            Some(endpoint) => debug!(path, method, endpoint = %endpoint.id, "Found endpoint"),
            None => debug!(path, method, "No endpoint found"),
        }
        found
    }
}
