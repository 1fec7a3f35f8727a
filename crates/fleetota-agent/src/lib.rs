//! fleetota Board Agent Library
//!
//! Client side of the update protocol:
//! - HTTP client for status, download and confirmation requests
//! - Install state machine
//! - Archive verification and file replacement
//! - Polling loop with cooperative shutdown

pub mod agent;
pub mod client;
pub mod install;
pub mod state;

pub use agent::{AgentError, CycleOutcome, RunOutcome, UpdateAgent};
pub use client::{ClientError, DownloadOutcome, UpdateClient};
pub use install::{INSTALL_MARKER, InstallError, Installer};
pub use state::AgentState;
