//! Core building blocks shared by every other module: configuration and the error type.

pub mod config;
pub mod error;
