//! # Configuration Module
//!
//! This module handles configuration management for the gateway.
//! It provides the configuration structures and the loading mechanisms.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Human-readable durations (`"10s"`, `"500ms"`) via `humantime_serde`
//! - Environment variable override support (`GATEWAY_*`)
//! - Validation that reports every problem at once

use crate::core::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Main gateway configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Microservice registration settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Request dispatch settings
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// External identity service used by the admin API
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Document served on `GET /`
    #[serde(default)]
    pub root: RootConfig,

    /// Observability settings
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: GatewayConfig = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: GatewayConfig = serde_json::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from either format, picking the parser by file extension
    pub async fn load<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => Self::load_from_json(path).await,
            _ => Self::load_from_file(path).await,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Environment variables follow the pattern `GATEWAY_<SECTION>_<KEY>`, with a few
    /// shorter aliases for the values operators change most often.
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        use std::env;

        if let Ok(port) = env::var("GATEWAY_SERVER_HTTP_PORT") {
            self.server.http_port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_SERVER_HTTP_PORT: {}", e)))?;
        }

        if let Ok(addr) = env::var("GATEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(environment) = env::var("GATEWAY_SERVER_ENVIRONMENT") {
            self.server.environment = environment;
        }

        if let Ok(size) = env::var("GATEWAY_SERVER_MAX_REQUEST_SIZE") {
            self.server.max_request_size = size.parse().map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_SERVER_MAX_REQUEST_SIZE: {}", e))
            })?;
        }

        if let Ok(secret) = env::var("GATEWAY_CALLBACK_SECRET") {
            self.registry.callback_secret = secret;
        }

        if let Ok(timeout) = env::var("GATEWAY_INFO_TIMEOUT") {
            self.registry.info_timeout = humantime::parse_duration(&timeout)
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_INFO_TIMEOUT: {}", e)))?;
        }

        if let Ok(dir) = env::var("GATEWAY_MICROSERVICES_DIR") {
            self.registry.microservices_dir = Some(PathBuf::from(dir));
        }

        if let Ok(local_url) = env::var("GATEWAY_LOCAL_URL") {
            self.registry.local_url = local_url;
        }

        if let Ok(timeout) = env::var("GATEWAY_PROXY_TIMEOUT") {
            self.dispatcher.proxy_timeout = Some(
                humantime::parse_duration(&timeout)
                    .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_PROXY_TIMEOUT: {}", e)))?,
            );
        }

        if let Ok(identity_url) = env::var("GATEWAY_IDENTITY_URL") {
            self.identity.base_url = identity_url;
        }

        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            self.observability.logging.level = level;
        }

        if let Ok(format) = env::var("GATEWAY_LOG_FORMAT") {
            self.observability.logging.format = format;
        }

        Ok(())
    }

    /// Validate the configuration, reporting every problem found
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("http_port must be greater than 0".to_string());
        }

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }

        if self.server.max_request_size == 0 {
            errors.push("max_request_size must be greater than 0".to_string());
        }

        if self.registry.callback_secret.is_empty() {
            errors.push("registry.callback_secret cannot be empty".to_string());
        }

        if self.registry.info_timeout.is_zero() {
            errors.push("registry.info_timeout must be greater than 0".to_string());
        }

        if self.registry.microservices_dir.is_some() {
            if let Err(e) = Url::parse(&self.registry.local_url) {
                errors.push(format!("Invalid registry.local_url '{}': {}", self.registry.local_url, e));
            }
        }

        if self.dispatcher.filter_timeout.is_zero() {
            errors.push("dispatcher.filter_timeout must be greater than 0".to_string());
        }

        if self.dispatcher.app_key_header.is_empty() {
            errors.push("dispatcher.app_key_header cannot be empty".to_string());
        }

        if let Err(e) = Url::parse(&self.identity.base_url) {
            errors.push(format!("Invalid identity.base_url '{}': {}", self.identity.base_url, e));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.observability.logging.level.as_str()) {
            errors.push(format!("Invalid log level: {}", self.observability.logging.level));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.observability.logging.format.as_str()) {
            errors.push(format!("Invalid log format: {}", self.observability.logging.format));
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(errors.join("\n")));
        }

        Ok(())
    }

    /// Whether 5xx error details should be hidden from callers
    pub fn is_production(&self) -> bool {
        self.server.environment.eq_ignore_ascii_case("production")
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: String,

    /// HTTP port
    pub http_port: u16,

    /// Maximum inbound body size in bytes (JSON, form and multipart alike)
    pub max_request_size: usize,

    /// Deployment environment; `production` masks internal error details
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 9000,
            max_request_size: 50 * 1024 * 1024,
            environment: "development".to_string(),
        }
    }
}

/// Microservice registration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// HMAC secret used to sign callback tokens
    pub callback_secret: String,

    /// Bound on the self-description call made during registration
    #[serde(with = "humantime_serde")]
    pub info_timeout: Duration,

    /// Directory of announcements registered at boot
    #[serde(default)]
    pub microservices_dir: Option<PathBuf>,

    /// Base URL for boot-time announcements; the port comes from each file
    pub local_url: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            callback_secret: "change-me".to_string(),
            info_timeout: Duration::from_secs(10),
            microservices_dir: None,
            local_url: "http://localhost".to_string(),
        }
    }
}

/// Request dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Optional bound on proxied calls; unset leaves the transport default
    #[serde(default, with = "humantime_serde")]
    pub proxy_timeout: Option<Duration>,

    /// Bound on filter verification calls
    #[serde(with = "humantime_serde")]
    pub filter_timeout: Duration,

    /// Uploaded files smaller than this many bytes are logged in full at debug level
    pub small_file_threshold: u64,

    /// Outbound header carrying the resolved application-key context
    pub app_key_header: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            proxy_timeout: None,
            filter_timeout: Duration::from_secs(10),
            small_file_threshold: 1000,
            app_key_header: "app_key".to_string(),
        }
    }
}

/// Identity collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Base URL of the identity service (`GET {base_url}/auth/user/me`)
    pub base_url: String,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Root document configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RootConfig {
    pub name: String,
    pub url: String,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            name: "API Gateway".to_string(),
            url: "http://localhost:9000".to_string(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}
