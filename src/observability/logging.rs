//! # Structured Logging
//!
//! Installs the global `tracing` subscriber from the logging section of the configuration.
//! JSON output is the default; `text` is meant for local development.

use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::config::LoggingConfig;
use crate::core::error::GatewayResult;

/// Parse a configured level name, falling back to `INFO`
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize the tracing subscriber
///
/// `RUST_LOG` directives are honoured on top of the configured level. Calling this twice
/// is harmless; the second subscriber is discarded.
pub fn init_logging(config: &LoggingConfig) -> GatewayResult<()> {
    let level = parse_level(&config.level);
    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    let installed = if config.format == "text" {
        Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
    } else {
        Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
    };

    if installed.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
    }

    info!(level = %level, format = %config.format, "Structured logging initialized");
    Ok(())
}
