//! Lingo Server - Standalone headless server for Lingo Relay.
//!
//! Terminates client WebSocket connections carrying streamed microphone
//! audio, relays it to the cloud speech provider, and pushes translated-text
//! updates back in near real time. Designed for server deployments where the
//! gateway runs as a background daemon.

mod config;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use lingo_core::{bootstrap_services, start_server, AppState};
use tokio::signal;

use crate::config::ServerConfig;

/// Lingo Server - Headless real-time speech translation gateway.
#[derive(Parser, Debug)]
#[command(name = "lingo-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "LINGO_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "PORT")]
    port: Option<u16>,

    /// Speech provider region (overrides config file).
    #[arg(short = 'r', long, env = "SPEECH_SERVICE_REGION")]
    region: Option<String>,

    /// Speech provider subscription key (overrides config file).
    #[arg(short = 'k', long, env = "SPEECH_SERVICE_KEY", hide_env_values = true)]
    key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Lingo Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(region) = args.region {
        config.region = region;
    }
    if let Some(key) = args.key {
        config.subscription_key = key;
    }

    if config.subscription_key.is_empty() || config.region.is_empty() {
        bail!(
            "Speech provider credentials are required. \
             Set SPEECH_SERVICE_KEY and SPEECH_SERVICE_REGION (or --key/--region)."
        );
    }

    log::info!(
        "Configuration: port={}, region={}, sweep={}s, max_idle={}s",
        config.port,
        config.region,
        config.sweep_interval_secs,
        config.max_idle_secs
    );

    // Bootstrap services
    let services =
        bootstrap_services(config.to_core_config()).context("Failed to bootstrap services")?;

    // Start the idle-eviction sweep
    services.start_background_tasks();

    log::info!("Services bootstrapped successfully");

    // Build app state for the HTTP server
    let app_state = AppState::builder().from_services(&services).build();

    // Spawn the HTTP server on the main tokio runtime
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
            std::process::exit(1);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown: active sessions observe session_stopped and their
    // client sockets close normally before the process exits.
    services.shutdown().await;

    // Abort the server task (sessions are already closed)
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
