//! # Error Handling Module
//!
//! This module provides the error type for the gateway using the `thiserror` crate.
//! It covers routing failures, registry failures, configuration problems and transport
//! errors, and maps each of them onto the HTTP status the external caller sees.
//!
//! ## Status mapping
//!
//! - Routing failures (no route, empty redirect list, a filter that did not pass) are 404s.
//! - A stored redirect that references an unbound path parameter is a 500, since it points at
//!   a data-integrity problem rather than a bad request.
//! - Only a backend that could not be reached at all becomes a 502.
//!
//! Errors render as a JSON:API error envelope:
//! ```json
//! { "errors": [ { "status": 404, "detail": "Endpoint not found" } ] }
//! ```

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{error, info};

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Content type of every error envelope
pub const ERROR_CONTENT_TYPE: &str = "application/vnd.api+json";

/// Detail used for masked 5xx responses in production mode
pub const MASKED_DETAIL: &str = "Unexpected error";

static MASK_INTERNAL_ERRORS: AtomicBool = AtomicBool::new(false);

/// Enable or disable masking of 5xx details in rendered envelopes.
///
/// Set once at boot from `server.environment`.
pub fn set_mask_internal_errors(mask: bool) {
    MASK_INTERNAL_ERRORS.store(mask, Ordering::Relaxed);
}

/// Error types for the API Gateway
///
/// Each variant represents a different category of error that can occur.
/// The `#[error("...")]` attribute from `thiserror` implements `Display`.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// No endpoint matched, the matched endpoint had no redirects, or a filter rejected it
    #[error("Endpoint not found")]
    EndpointNotFound { path: String },

    /// Admin operation on a microservice id that does not exist
    #[error("Could not find a microservice with id {id}")]
    MicroserviceNotFound { id: String },

    /// Path instantiation referenced a parameter without a value
    #[error("Path template '{template}' requires a value for parameter '{parameter}'")]
    TemplateParameter { template: String, parameter: String },

    /// Authentication failures (missing or rejected bearer token)
    #[error("{reason}")]
    Authentication { reason: String },

    /// Authorization failures (identity lacks the required role)
    #[error("{reason}")]
    Authorization { reason: String },

    /// Request validation errors (malformed body, invalid multipart, etc.)
    #[error("Request validation failed: {field} - {reason}")]
    RequestValidation { field: String, reason: String },

    /// A backend could not be reached at all (DNS, connect, timeout)
    #[error("Could not reach {url}: {reason}")]
    Upstream { url: String, reason: String },

    /// Configuration-related errors (invalid config, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Registration store failures
    #[error("Store error: {message}")]
    Store { message: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, spooling uploads, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// HTTP client errors that are not transport failures
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },

    /// Callback token signing errors
    #[error("JWT error: {message}")]
    Jwt { message: String },
}

impl GatewayError {
    /// Create an endpoint-not-found error for the given request path
    pub fn endpoint_not_found<S: Into<String>>(path: S) -> Self {
        Self::EndpointNotFound { path: path.into() }
    }

    /// Create a microservice-not-found error
    pub fn microservice_not_found<S: Into<String>>(id: S) -> Self {
        Self::MicroserviceNotFound { id: id.into() }
    }

    /// Create a template parameter error
    pub fn template_parameter<S: Into<String>, P: Into<String>>(template: S, parameter: P) -> Self {
        Self::TemplateParameter {
            template: template.into(),
            parameter: parameter.into(),
        }
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an authentication error with a custom reason
    pub fn auth<S: Into<String>>(reason: S) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Create an authorization error with a custom reason
    pub fn authz<S: Into<String>>(reason: S) -> Self {
        Self::Authorization {
            reason: reason.into(),
        }
    }

    /// Create an upstream error for a backend that could not be reached
    pub fn upstream<U: Into<String>, S: Into<String>>(url: U, reason: S) -> Self {
        Self::Upstream {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a store error with a custom message
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a validation error for a named field
    pub fn validation<F: Into<String>, S: Into<String>>(field: F, reason: S) -> Self {
        Self::RequestValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EndpointNotFound { .. } => StatusCode::NOT_FOUND,
            Self::MicroserviceNotFound { .. } => StatusCode::NOT_FOUND,
            Self::TemplateParameter { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::Authorization { .. } => StatusCode::FORBIDDEN,
            Self::RequestValidation { .. } => StatusCode::BAD_REQUEST,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::HttpClient { .. } => StatusCode::BAD_GATEWAY,
            Self::Jwt { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error means "the route does not exist" for the external caller
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EndpointNotFound { .. } | Self::MicroserviceNotFound { .. })
    }

    /// Get a string representation of the error type for logs
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::EndpointNotFound { .. } => "endpoint_not_found",
            Self::MicroserviceNotFound { .. } => "microservice_not_found",
            Self::TemplateParameter { .. } => "template_parameter_error",
            Self::Authentication { .. } => "authentication_error",
            Self::Authorization { .. } => "authorization_error",
            Self::RequestValidation { .. } => "request_validation_error",
            Self::Upstream { .. } => "upstream_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Store { .. } => "store_error",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
            Self::HttpClient { .. } => "http_client_error",
            Self::Jwt { .. } => "jwt_error",
        }
    }

    /// Build the JSON:API error envelope for this error
    pub fn envelope(&self, mask_internal: bool) -> serde_json::Value {
        let status = self.status_code();
        let detail = if mask_internal && status.is_server_error() {
            MASKED_DETAIL.to_string()
        } else {
            self.to_string()
        };

        json!({
            "errors": [
                {
                    "status": status.as_u16(),
                    "detail": detail,
                }
            ]
        })
    }
}

/// Implement conversion from std::io::Error
impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_json::Error
impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_yaml::Error
impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from reqwest::Error
///
/// Connect and timeout failures mean the backend could not be reached at all.
impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if err.is_connect() || err.is_timeout() || err.is_request() {
            Self::Upstream {
                url,
                reason: err.to_string(),
            }
        } else {
            Self::HttpClient {
                message: err.to_string(),
            }
        }
    }
}

/// Implement conversion from jsonwebtoken::errors::Error
impl From<jsonwebtoken::errors::Error> for GatewayError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Jwt {
            message: err.to_string(),
        }
    }
}

/// Implement `IntoResponse` for `GatewayError` so handlers can return `GatewayResult<T>`
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(error = %self, error_type = self.error_type(), "Request failed");
        } else {
            info!(error = %self, error_type = self.error_type(), "Request rejected");
        }

        let body = self.envelope(MASK_INTERNAL_ERRORS.load(Ordering::Relaxed));
        let mut response = (status, Json(body)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(ERROR_CONTENT_TYPE),
        );
        response
    }
}
