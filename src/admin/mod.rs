//! # Admin and Registration Endpoints
//!
//! - `POST   /api/v1/microservice`: registration call made by a booting microservice (open)
//! - `GET    /api/v1/microservice`: list, optionally `?url=`
//! - `GET    /api/v1/microservice/status`: name and status of every microservice
//! - `GET    /api/v1/microservice/:id`: one microservice as `{"data": ...}`
//! - `DELETE /api/v1/microservice/:id`: remove a microservice and its redirects
//! - `GET    /api/v1/endpoint`: stored endpoints, filterable by `binary`, `path`, `method`
//!
//! Everything except registration requires an [`AdminUser`].

use crate::auth::{AdminUser, IdentityClient};
use crate::core::error::{GatewayError, GatewayResult};
use crate::registry::models::{Endpoint, Microservice};
use crate::registry::service::{MicroserviceRegistry, MicroserviceStatusEntry};
use crate::registry::RegistrationRequest;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRef, Path, Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// `{"data": ...}` wrapper used by detail responses
#[derive(Debug, Serialize)]
pub struct Data<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct MicroserviceQuery {
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EndpointQuery {
    pub binary: Option<bool>,
    pub path: Option<String>,
    pub method: Option<String>,
}

impl EndpointQuery {
    fn accepts(&self, endpoint: &Endpoint) -> bool {
        self.binary.map(|b| endpoint.binary == b).unwrap_or(true)
            && self.path.as_deref().map(|p| endpoint.path == p).unwrap_or(true)
            && self
                .method
                .as_deref()
                .map(|m| endpoint.method.eq_ignore_ascii_case(m))
                .unwrap_or(true)
    }
}

/// Build the admin and registration routes for any state that carries a registry and an
/// identity client
pub fn routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    Arc<MicroserviceRegistry>: FromRef<S>,
    Arc<IdentityClient>: FromRef<S>,
{
    Router::new()
        .route("/api/v1/microservice", post(register).get(list_microservices))
        .route("/api/v1/microservice/status", get(microservice_statuses))
        .route("/api/v1/microservice/:id", get(get_microservice).delete(delete_microservice))
        .route("/api/v1/endpoint", get(list_endpoints))
}

#[instrument(skip_all)]
async fn register(
    State(registry): State<Arc<MicroserviceRegistry>>,
    body: Result<Json<RegistrationRequest>, JsonRejection>,
) -> GatewayResult<Json<Microservice>> {
    let Json(request) = body.map_err(|e| GatewayError::validation("body", e.body_text()))?;
    let outcome = registry.register(request).await?;
    if !outcome.synced {
        info!(microservice = %outcome.microservice.name, "Registration accepted without endpoint sync");
    }
    Ok(Json(outcome.microservice))
}

async fn list_microservices(
    _admin: AdminUser,
    State(registry): State<Arc<MicroserviceRegistry>>,
    Query(query): Query<MicroserviceQuery>,
) -> GatewayResult<Json<Vec<Microservice>>> {
    info!("Obtaining registered microservices list");
    Ok(Json(registry.list_microservices(query.url.as_deref()).await?))
}

async fn microservice_statuses(
    _admin: AdminUser,
    State(registry): State<Arc<MicroserviceRegistry>>,
) -> GatewayResult<Json<Vec<MicroserviceStatusEntry>>> {
    Ok(Json(registry.statuses().await?))
}

async fn get_microservice(
    _admin: AdminUser,
    State(registry): State<Arc<MicroserviceRegistry>>,
    Path(id): Path<String>,
) -> GatewayResult<Json<Data<Microservice>>> {
    info!(id = %id, "Obtaining microservice");
    Ok(Json(Data {
        data: registry.get_microservice(&id).await?,
    }))
}

async fn delete_microservice(
    _admin: AdminUser,
    State(registry): State<Arc<MicroserviceRegistry>>,
    Path(id): Path<String>,
) -> GatewayResult<Json<Data<Microservice>>> {
    info!(id = %id, "Deleting microservice");
    Ok(Json(Data {
        data: registry.delete_microservice(&id).await?,
    }))
}

async fn list_endpoints(
    _admin: AdminUser,
    State(registry): State<Arc<MicroserviceRegistry>>,
    Query(query): Query<EndpointQuery>,
) -> GatewayResult<Json<Vec<Endpoint>>> {
    let endpoints = registry.store().list_endpoints().await?;
    Ok(Json(endpoints.into_iter().filter(|e| query.accepts(e)).collect()))
}
