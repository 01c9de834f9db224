//! chatcast: a scalable TCP chat broadcast server
//!
//! Clients connect over TCP and send newline-terminated text or masked
//! WebSocket text frames; every message is relayed to all other connected
//! clients and acknowledged to the sender. Plain HTTP GETs on the same
//! port get a small static fallback response.
//!
//! Features:
//! - Single-threaded readiness loop (epoll/kqueue via mio) scaling to very
//!   large idle-mostly connection counts
//! - Alternative task-per-connection runtime on tokio
//! - Debug stats endpoint on a separate port
//! - Configuration via CLI arguments or TOML file

mod config;
mod debug;
mod protocols;
mod runtime;
mod server;

use config::{Config, RuntimeType};
use protocols::http::AssetStore;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        runtime = ?config.runtime,
        max_connections = config.max_connections,
        log_only = config.log_only,
        "Starting chatcast server"
    );

    let assets = Arc::new(AssetStore::load(&config.wwwroot));
    let stats = debug::ServerStats::new();

    if let Some(port) = config.debug_port {
        debug::spawn(port, Arc::clone(&stats));
    }

    match config.runtime {
        RuntimeType::Mio => run_mio(config, assets, stats),
        RuntimeType::Tokio => run_tokio(config, assets, stats),
    }
}

/// Run with the readiness loop (epoll on Linux, kqueue on macOS)
fn run_mio(
    config: Config,
    assets: Arc<AssetStore>,
    stats: Arc<debug::ServerStats>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Using mio runtime (epoll/kqueue)");
    runtime::run(&config, assets, stats)?;
    Ok(())
}

/// Run with the tokio task-per-connection runtime
fn run_tokio(
    config: Config,
    assets: Arc<AssetStore>,
    stats: Arc<debug::ServerStats>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Using tokio runtime (task per connection)");
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        server::Server::bind(&config, assets, stats)
            .await?
            .run()
            .await
    })?;
    Ok(())
}
