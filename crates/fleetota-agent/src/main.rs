//! `fleetota` board agent
//!
//! Polls the update server, installs ordered releases and exits with a
//! restart code so the supervisor boots the new files.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use fleetota_agent::{RunOutcome, UpdateAgent};
use fleetota_core::config::load_agent_config;
use fleetota_core::tracing_init::{default_filter, init_tracing};

/// Exit status telling the supervisor to restart the board (`EX_TEMPFAIL`).
const RESTART_EXIT_CODE: u8 = 75;

#[derive(Parser, Debug)]
#[command(name = "fleetota-agent")]
#[command(version, about = "fleetota board agent - installs signed firmware updates")]
struct Args {
    /// TOML configuration file
    #[arg(long, short, env = "FLEETOTA_CONFIG")]
    config: Option<PathBuf>,

    /// Update server URL
    #[arg(long)]
    server_url: Option<String>,

    /// This board's id
    #[arg(long)]
    board_id: Option<String>,

    /// Directory holding the board's firmware files
    #[arg(long)]
    install_dir: Option<PathBuf>,

    /// Scratch directory for downloads
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Seconds between status polls
    #[arg(long)]
    poll_interval_secs: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "FLEETOTA_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let mut config = load_agent_config(args.config.as_deref())?;
    if let Some(url) = args.server_url {
        config.server_url = url;
    }
    if let Some(id) = args.board_id {
        config.board_id = id;
    }
    if let Some(dir) = args.install_dir {
        config.install_dir = dir;
    }
    if let Some(dir) = args.staging_dir {
        config.staging_dir = dir;
    }
    if let Some(secs) = args.poll_interval_secs {
        config.poll_interval_secs = secs;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if config.board_id.is_empty() {
        bail!("board id is not configured (set --board-id or FLEETOTA_BOARD_ID)");
    }
    if config.poll_interval_secs == 0 {
        bail!("poll interval must be at least one second");
    }

    init_tracing(
        &default_filter("fleetota-agent", &config.log_level),
        args.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        board_id = %config.board_id,
        server = %config.server_url,
        install_dir = %config.install_dir.display(),
        poll_interval_secs = config.poll_interval_secs,
        "Starting fleetota-agent"
    );

    let agent = UpdateAgent::new(config).context("Failed to create update agent")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C shutdown signal");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    });

    match agent.run(shutdown_rx).await {
        RunOutcome::RebootRequested(release) => {
            info!(%release, "Restarting into new release");
            Ok(ExitCode::from(RESTART_EXIT_CODE))
        }
        RunOutcome::Shutdown => {
            info!("Agent stopped");
            Ok(ExitCode::SUCCESS)
        }
    }
}
