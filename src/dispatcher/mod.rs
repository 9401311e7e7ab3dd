//! # Dispatcher
//!
//! Request-time engine: the endpoint cache, filter verification, the outbound request builder
//! and the proxy executor that makes the call.

pub mod cache;
pub mod filter;
pub mod proxy;
pub mod request;

pub use cache::EndpointCache;
pub use filter::{CompareSpec, Condition, Filter};
pub use proxy::ProxyExecutor;
pub use request::{ApplicationKey, Dispatcher, InboundRequest, OutboundBody, OutboundRequest, UploadedFile};
