//! `fleetota` Core Library
//!
//! Shared functionality for the update server and the board agent:
//! - Release archive codec with an embedded digest manifest
//! - Wire protocol types and request validation
//! - Configuration resolution
//! - Tracing initialisation and common error types

pub mod archive;
pub mod config;
pub mod error;
pub mod protocol;
pub mod tracing_init;

pub use config::{AgentConfig, ChecksumPolicy, ServerConfig, TestModeConfig};
pub use error::{Error, Result};
pub use protocol::{ReleaseId, Validate, ValidationError};
