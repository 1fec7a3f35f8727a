//! `fleetota` update server
//!
//! Stores signed firmware releases and hands them to boards that hold a
//! signed, unexpired update order.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use fleetota_core::config::load_server_config;
use fleetota_core::tracing_init::{default_filter, init_tracing};
use fleetota_server::routes::{AppState, build_router};

#[derive(Parser, Debug)]
#[command(name = "fleetota-server")]
#[command(version, about = "fleetota update server - signed firmware releases and update orders")]
struct Args {
    /// TOML configuration file
    #[arg(long, short, env = "FLEETOTA_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Release storage root (holds `{firmware}-{version}/` and `keys/`)
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Seconds an update order stays pending without confirmation
    #[arg(long)]
    order_ttl_secs: Option<u64>,

    /// Known board ids, comma separated
    #[arg(long, value_delimiter = ',')]
    known_boards: Option<Vec<String>>,

    /// Enable test boards and the test release
    #[arg(long)]
    test_mode: bool,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "FLEETOTA_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_server_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.listen_addr = addr;
    }
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(ttl) = args.order_ttl_secs {
        config.order_ttl_secs = ttl;
    }
    if let Some(boards) = args.known_boards {
        config.known_boards = boards;
    }
    if args.test_mode {
        config.test_mode.enabled = true;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    init_tracing(
        &default_filter("fleetota-server", &config.log_level),
        args.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen_addr,
        storage = %config.storage_dir.display(),
        boards = config.known_boards.len(),
        order_ttl_secs = config.order_ttl_secs,
        test_mode = config.test_mode.enabled,
        "Starting fleetota-server"
    );

    std::fs::create_dir_all(&config.storage_dir).with_context(|| {
        format!("Failed to create storage dir {}", config.storage_dir.display())
    })?;
    let state = AppState::from_config(&config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Server ready");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C shutdown signal"),
        () = terminate => info!("Received SIGTERM shutdown signal"),
    }
}
