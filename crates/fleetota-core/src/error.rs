//! Error types for the `fleetota` core library.

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::protocol::ValidationError;

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request failed validation
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// Archive encode/decode error
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
