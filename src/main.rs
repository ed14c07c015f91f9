//! vhost-proxy
//!
//! A host-based reverse proxy built with Tokio, Hyper and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ─────────────▶ net::listener ─▶ http::server ─▶ routing::Router (Host)
//!                                                          │
//!                                                          ▼
//!                                          http::middleware (global ⊕ route)
//!                                                          │
//!                                                          ▼
//!     Client Response                              routing::Route::forward ─▶ Backend
//!     ◀───────────── access log ◀──────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use vhost_proxy::config::load_config;
use vhost_proxy::lifecycle::{shutdown_signal, Shutdown};
use vhost_proxy::observability::{logging, metrics};
use vhost_proxy::ProxyServer;

/// Host-based HTTP reverse proxy.
#[derive(Debug, Parser)]
#[command(name = "vhost-proxy", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("vhost-proxy: failed to load {}: {err}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = logging::init(&config.log) {
        eprintln!("vhost-proxy: failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen,
        routes = config.routes.len(),
        max_connections = config.server.max_connections,
        "Configuration loaded"
    );

    if config.metrics.enabled {
        match config.metrics.address.parse() {
            Ok(addr) => {
                if let Err(err) = metrics::init_metrics(addr) {
                    tracing::error!(error = %err, "Failed to start metrics exporter, continuing without metrics");
                }
            }
            Err(err) => {
                tracing::error!(address = %config.metrics.address, error = %err, "Failed to parse metrics address");
            }
        }
    }

    let server = match ProxyServer::from_config(&config) {
        Ok(server) => server,
        Err(err) => {
            tracing::error!(error = %err, "Failed to build proxy");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    let stopped = shutdown.signalled();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.trigger();
    });

    match server.serve(stopped).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "Proxy server failed");
            ExitCode::FAILURE
        }
    }
}
