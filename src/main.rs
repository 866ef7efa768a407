use std::net::SocketAddr;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber;

use floodgate::config::FloodgateConfig;
use floodgate::http::{AppLimiters, HttpServer};
use floodgate::ratelimit::Presets;

#[derive(Parser, Debug)]
#[command(name = "floodgate", version, about = "Sliding window rate limiting middleware service")]
struct Args {
    /// Path to the service configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured listen address
    #[arg(long)]
    listen_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Floodgate Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => FloodgateConfig::from_file(path)?,
        None => FloodgateConfig::default(),
    };
    if let Some(addr) = args.listen_addr {
        config.server.listen_addr = addr;
    }
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    // Resolve presets and bind them to the route groups
    let presets = match &config.rate_limiting.presets_path {
        Some(path) => Presets::from_file(path)?,
        None => Presets::default(),
    };
    let limiters = AppLimiters::from_config(&presets, &config.rate_limiting.routes)?;

    // The sweepers run until these handles are dropped at the end of main.
    let _sweepers = limiters.start_sweepers(config.rate_limiting.sweep_interval());
    info!("Rate limiters initialized");

    // Run the server with graceful shutdown on Ctrl+C
    let server = HttpServer::new(config.server.listen_addr, limiters);
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Floodgate Rate Limiting Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
