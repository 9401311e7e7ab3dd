//! # Dispatch Gateway - Core Library Crate
//!
//! An API gateway that sits in front of a set of microservices. Microservices announce the
//! public endpoints they serve; the gateway stores those announcements, keeps an in-memory
//! dispatch table compiled from them and proxies every matching inbound request to the
//! backend that declared it.
//!
//! ## Module Tree
//!
//! - `core`: configuration and the shared error type
//! - `routing`: path template compilation (`/v1/users/:id`) and instantiation
//! - `store`: the registration store abstraction and its in-memory implementation
//! - `registry`: microservice registration protocol and boot-time loading
//! - `dispatcher`: endpoint cache, filters, outbound request composition and the proxy call
//! - `auth`: admin identity check against the identity service
//! - `admin`: registration and management routes
//! - `gateway`: the axum server assembling all of the above
//! - `observability`: structured logging setup
//!
//! ## Request Flow
//!
//! ```text
//! inbound request
//!   -> EndpointCache::find_endpoint   (first compiled pattern that matches)
//!   -> Dispatcher::build_outbound_request
//!        pick a redirect, verify its filters, merge static data and filter results
//!   -> ProxyExecutor::execute         (relay status, headers and body)
//! ```

/// Configuration and error handling
pub mod core;

/// Path templates compiled into anchored matchers
pub mod routing;

/// Persistence of microservices, endpoints and the endpoint version
pub mod store;

/// Registration protocol: info documents, stale redirect cleanup, callback tokens
pub mod registry;

/// Request-time dispatch and proxying
pub mod dispatcher;

/// Identity service client and the admin extractor
pub mod auth;

/// Registration and management HTTP routes
pub mod admin;

/// Server assembly and lifecycle
pub mod gateway;

/// Logging initialization
pub mod observability;

// Re-export commonly used types for convenience
pub use crate::core::config::GatewayConfig;
pub use crate::core::error::{GatewayError, GatewayResult};
pub use crate::dispatcher::{Dispatcher, EndpointCache, ProxyExecutor};
pub use crate::gateway::GatewayServer;
pub use crate::registry::{Endpoint, Microservice, MicroserviceRegistry};
pub use crate::routing::CompiledPath;
pub use crate::store::{InMemoryStore, RegistrationStore};
