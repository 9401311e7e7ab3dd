//! The HTTP server that ties the registry, dispatcher and admin routes together.

pub mod server;

pub use server::{GatewayServer, ServerState};
