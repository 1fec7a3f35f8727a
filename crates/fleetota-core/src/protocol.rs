//! Wire protocol between operators, boards and the update server.
//!
//! Requests are plain serde structs; each implements [`Validate`] so the
//! server can reject malformed input with a typed error before touching any
//! state.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File names (or multipart field names) that carry a detached signature.
pub const SIGNATURE_FILE_NAMES: &[&str] = &["sig.pgp", "sig.asc", "sig"];

/// Longest accepted firmware name, version, board id or file name.
pub const MAX_COMPONENT_LEN: usize = 128;

/// Whether `name` designates a signature file.
pub fn is_signature_file(name: &str) -> bool {
    SIGNATURE_FILE_NAMES.contains(&name)
}

/// Request validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("field '{0}' must not be empty")]
    Empty(&'static str),

    #[error("field '{field}' has invalid value '{value}'")]
    InvalidComponent { field: &'static str, value: String },

    #[error("a version filter requires a firmware filter")]
    VersionWithoutFirmware,
}

/// Like [`validate_component`], but also rejects `-`.
///
/// Release ids are joined with `-` into storage directory names and into the
/// signed order message `"{firmware}-{version}-{board_id}"`. Keeping dashes
/// out of firmware and version makes both encodings unambiguous; board ids
/// may still contain them.
pub fn validate_release_component(
    field: &'static str,
    value: &str,
) -> Result<(), ValidationError> {
    validate_component(field, value)?;
    if value.contains('-') {
        return Err(ValidationError::InvalidComponent {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Typed validation of a decoded request.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Check that `value` can be used as a single path component / identifier.
pub fn validate_component(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty(field));
    }
    let invalid = value.len() > MAX_COMPONENT_LEN
        || value == "."
        || value == ".."
        || value
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control());
    if invalid {
        return Err(ValidationError::InvalidComponent {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// A `(firmware, version)` pair identifying an immutable release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReleaseId {
    pub firmware: String,
    pub version: String,
}

impl ReleaseId {
    pub fn new(firmware: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            firmware: firmware.into(),
            version: version.into(),
        }
    }

    /// Directory name of this release in storage: `{firmware}-{version}`.
    pub fn dir_name(&self) -> String {
        self.to_string()
    }

    /// Split a storage directory name back into a release id. Names that do
    /// not form a valid release id are not releases.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        let (firmware, version) = name.split_once('-')?;
        let release = Self::new(firmware, version);
        release.validate().is_ok().then_some(release)
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.firmware, self.version)
    }
}

impl Validate for ReleaseId {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_release_component("firmware", &self.firmware)?;
        validate_release_component("version", &self.version)
    }
}

/// Periodic liveness report sent by a board (`POST /status`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub firmware: String,
    pub version: String,
    #[serde(alias = "id")]
    pub board_id: String,
    /// Seconds since the board booted.
    #[serde(default)]
    pub uptime: u64,
}

impl Validate for StatusReport {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_component("board_id", &self.board_id)?;
        validate_release_component("firmware", &self.firmware)?;
        validate_release_component("version", &self.version)
    }
}

/// Server answer to a status report.
///
/// `{"update": false}` when nothing is pending, otherwise the order
/// descriptor the board needs to download it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub update: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl StatusResponse {
    pub const fn no_update() -> Self {
        Self {
            update: false,
            secret: None,
            firmware: None,
            version: None,
        }
    }

    pub fn pending(secret: String, release: ReleaseId) -> Self {
        Self {
            update: true,
            secret: Some(secret),
            firmware: Some(release.firmware),
            version: Some(release.version),
        }
    }
}

/// Operator request to order a release onto a board.
///
/// The board id comes from the URL path; the signature travels as a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub board_id: String,
    pub firmware: String,
    pub version: String,
}

impl OrderRequest {
    pub fn release(&self) -> ReleaseId {
        ReleaseId::new(self.firmware.clone(), self.version.clone())
    }

    /// The canonical byte string an operator signs to authorize this order.
    pub fn signed_message(&self) -> String {
        order_message(&self.firmware, &self.version, &self.board_id)
    }
}

impl Validate for OrderRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_component("board_id", &self.board_id)?;
        validate_release_component("firmware", &self.firmware)?;
        validate_release_component("version", &self.version)
    }
}

/// `"{firmware}-{version}-{board_id}"`, binding a signature to exactly one
/// board and release.
pub fn order_message(firmware: &str, version: &str, board_id: &str) -> String {
    format!("{firmware}-{version}-{board_id}")
}

/// Response to a successful order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub board_id: String,
    pub firmware: String,
    pub version: String,
    pub secret: String,
    pub expires_in_secs: u64,
}

/// Body of the board's download (`GET`) and confirmation (`DELETE`)
/// requests. `firmware`/`version` describe what the board currently runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub firmware: String,
    pub version: String,
    #[serde(alias = "id")]
    pub board_id: String,
    pub secret: String,
}

impl DownloadRequest {
    pub fn current_release(&self) -> ReleaseId {
        ReleaseId::new(self.firmware.clone(), self.version.clone())
    }
}

impl Validate for DownloadRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_component("board_id", &self.board_id)?;
        if self.secret.is_empty() {
            return Err(ValidationError::Empty("secret"));
        }
        validate_release_component("firmware", &self.firmware)?;
        validate_release_component("version", &self.version)
    }
}

/// Catalog query (`GET /firmware?firmware=..&version=..`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogQuery {
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl Validate for CatalogQuery {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.version.is_some() && self.firmware.is_none() {
            return Err(ValidationError::VersionWithoutFirmware);
        }
        Ok(())
    }
}
