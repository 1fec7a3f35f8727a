//! Release archive codec.
//!
//! A release travels as a tar stream holding every firmware file plus a
//! `manifest.json` entry mapping file name to hex SHA-256. Entries are
//! sequential and self-describing (name + size), and the decoder does not
//! care where in the stream the manifest appears.
//!
//! Upload authorization uses a different byte sequence: the concatenation
//! of the raw firmware files in name order (see [`signable`]).

mod decode;
mod encode;
mod manifest;
pub mod signable;

use thiserror::Error;

pub use decode::{DecodedArchive, IntegrityProblem, StagedFile, decode_archive};
pub use encode::{encode_files_to, encode_release, encode_release_to, release_files};
pub use manifest::{MANIFEST_FILE_NAME, Manifest};
pub use signable::signable_bytes;

/// Errors produced while building or reading an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive has no {MANIFEST_FILE_NAME} entry")]
    MissingManifest,

    #[error("invalid manifest: {0}")]
    InvalidManifest(#[from] serde_json::Error),

    #[error("unsafe archive entry name '{0}'")]
    UnsafeEntryName(String),

    #[error("duplicate archive entry '{0}'")]
    DuplicateEntry(String),

    #[error("release directory {0} does not exist")]
    MissingRelease(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether `name` is a plain, single-component file name.
pub(crate) fn is_safe_entry_name(name: &str) -> bool {
    crate::protocol::validate_component("file", name).is_ok()
}
