//! # Authentication Module
//!
//! Admin endpoints need an authenticated identity with the `ADMIN` role. The gateway does not
//! verify tokens itself: it forwards the caller's `Authorization` header to the identity
//! service (`GET {base_url}/auth/user/me`) and trusts the profile it returns.
//!
//! ## Rust Concepts Used
//!
//! - `FromRequestParts` turns the check into an extractor: a handler taking `AdminUser`
//!   only runs for admins
//! - `FromRef` lets the extractor pull the identity client out of any state that carries one

use crate::core::config::IdentityConfig;
use crate::core::error::{GatewayError, GatewayResult};
use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Role required by admin endpoints
pub const ADMIN_ROLE: &str = "ADMIN";

/// Profile returned by the identity service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some(ADMIN_ROLE)
    }
}

/// Client for the identity collaborator
#[derive(Debug, Clone)]
pub struct IdentityClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl IdentityClient {
    pub fn new(client: reqwest::Client, config: &IdentityConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        }
    }

    /// Resolve the profile behind an `Authorization` header value
    pub async fn current_user(&self, authorization: &str) -> GatewayResult<User> {
        let url = format!("{}/auth/user/me", self.base_url);
        debug!(url = %url, "Obtaining logged user for token");

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, authorization)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Error getting user data");
                GatewayError::upstream(url.clone(), e.to_string())
            })?;

        if !response.status().is_success() {
            debug!(status = response.status().as_u16(), "Identity service rejected the token");
            return Err(GatewayError::auth("Not authenticated"));
        }

        response
            .json::<User>()
            .await
            .map_err(|e| GatewayError::upstream(url, format!("Invalid user profile: {}", e)))
    }
}

/// An authenticated admin, extracted from the request
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    Arc<IdentityClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let authorization = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| GatewayError::auth("Not authenticated"))?
            .to_string();

        let identity = Arc::<IdentityClient>::from_ref(state);
        let user = identity.current_user(&authorization).await?;

        if !user.is_admin() {
            debug!(user = ?user.id, "Not admin");
            return Err(GatewayError::authz("Not authorized"));
        }

        Ok(AdminUser(user))
    }
}
