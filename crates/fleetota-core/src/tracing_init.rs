//! Shared tracing/logging initialization.
//!
//! Both binaries (server and agent) set up `tracing_subscriber` the same way:
//! an env-filter plus optional JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build the default filter directive for a binary, e.g.
/// `"fleetota_server=info,fleetota_core=info"`.
pub fn default_filter(crate_name: &str, level: &str) -> String {
    let crate_name = crate_name.replace('-', "_");
    format!("{crate_name}={level},fleetota_core={level},fleetota_crypto={level}")
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- filter used when `RUST_LOG` is not set.
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
