//! # Dispatch Gateway - Main Entry Point
//!
//! Startup sequence:
//!
//! 1. Load configuration from `GATEWAY_CONFIG_PATH` (default `config/gateway.yaml`), falling
//!    back to built-in defaults plus `GATEWAY_*` overrides when the file does not exist
//! 2. Initialize logging from the loaded configuration
//! 3. Register the boot-time microservices and load the dispatch cache
//! 4. Serve until SIGTERM or SIGINT

use dispatch_gateway::observability::init_logging;
use dispatch_gateway::{GatewayConfig, GatewayResult, GatewayServer};
use std::path::Path;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = match load_config().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.observability.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!("Starting dispatch gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config).await {
        error!("Gateway stopped with an error: {}", e);
        std::process::exit(1);
    }

    info!("Gateway shutdown complete");
}

async fn load_config() -> GatewayResult<GatewayConfig> {
    let config_path = std::env::var("GATEWAY_CONFIG_PATH").unwrap_or_else(|_| "config/gateway.yaml".to_string());

    if Path::new(&config_path).exists() {
        return GatewayConfig::load(&config_path).await;
    }

    let mut config = GatewayConfig::default();
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

async fn run(config: GatewayConfig) -> GatewayResult<()> {
    let environment = config.server.environment.clone();
    let server = GatewayServer::new(config)?;

    info!(environment = %environment, "Registering boot-time microservices");
    if let Err(e) = server.bootstrap().await {
        // microservices can still register over the API
        warn!(error = %e, "Bootstrap failed, starting with the current registrations");
    }

    server.serve(shutdown_signal()).await
}

/// Resolves on SIGTERM or SIGINT
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install SIGINT handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
