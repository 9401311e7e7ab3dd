//! Callback token signing.
//!
//! The registry attaches `Authorization: Bearer <token>` when it calls a microservice's
//! self-description endpoint so the backend can tell the call came from the gateway.
//! Tokens are HS256 JWTs over the microservice identity and carry no expiry.

use crate::core::error::GatewayResult;
use crate::registry::models::Microservice;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

/// Claims carried by a callback token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackClaims {
    /// Microservice id
    pub id: String,
    pub name: String,
    pub url: String,
    /// Issued-at, seconds since the epoch
    pub iat: i64,
}

/// Signs callback tokens with the shared secret
#[derive(Clone)]
pub struct CallbackSigner {
    key: EncodingKey,
}

impl std::fmt::Debug for CallbackSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSigner").finish_non_exhaustive()
    }
}

impl CallbackSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Sign a token for the given microservice
    pub fn sign(&self, microservice: &Microservice) -> GatewayResult<String> {
        let claims = CallbackClaims {
            id: microservice.id.clone(),
            name: microservice.name.clone(),
            url: microservice.url.clone(),
            iat: chrono::Utc::now().timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.key)?)
    }
}
