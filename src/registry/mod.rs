//! # Microservice Registry
//!
//! Data model, announcement shapes, callback tokens and the registration protocol.

pub mod announcement;
pub mod loader;
pub mod models;
pub mod service;
pub mod token;

pub use announcement::{AnnouncedEndpoint, InfoDocument, InfoDocumentError, RegistrationRequest};
pub use models::{Endpoint, Microservice, MicroserviceStatus, Redirect, VersionRecord};
pub use service::{MicroserviceRegistry, RegistrationOutcome};
