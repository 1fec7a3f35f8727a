use std::io::Write;
use std::path::{Path, PathBuf};

use fleetota_crypto::sha256_file;
use tracing::{debug, warn};

use super::manifest::{MANIFEST_FILE_NAME, Manifest};
use super::{ArchiveError, is_safe_entry_name};
use crate::protocol::is_signature_file;

/// Regular files of a release directory, sorted by name.
///
/// Sub-directories, signature files and a stray `manifest.json` are not
/// part of a release and are skipped.
pub fn release_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, ArchiveError> {
    if !dir.is_dir() {
        return Err(ArchiveError::MissingRelease(dir.display().to_string()));
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            debug!(path = %entry.path().display(), "Skipping non-file release entry");
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            warn!(path = %entry.path().display(), "Skipping file with non UTF-8 name");
            continue;
        };
        if name == MANIFEST_FILE_NAME || is_signature_file(&name) || !is_safe_entry_name(&name) {
            debug!(name = %name, "Skipping reserved release file");
            continue;
        }
        files.push((name, entry.path()));
    }
    files.sort();
    Ok(files)
}

/// Encode a release directory into an in-memory tar archive.
pub fn encode_release(dir: &Path) -> Result<Vec<u8>, ArchiveError> {
    encode_release_to(dir, Vec::new())
}

/// Encode a release directory as a tar stream into `writer`.
pub fn encode_release_to<W: Write>(dir: &Path, writer: W) -> Result<W, ArchiveError> {
    let files = release_files(dir)?;
    let writer = encode_files_to(&files, writer)?;
    debug!(dir = %dir.display(), files = files.len(), "Encoded release archive");
    Ok(writer)
}

/// Encode `(entry name, source path)` pairs as a tar stream into `writer`.
///
/// Every file is followed by nothing but its own bytes; the manifest is
/// appended as the final entry. An empty list yields a manifest-only archive.
pub fn encode_files_to<W: Write>(
    files: &[(String, PathBuf)],
    writer: W,
) -> Result<W, ArchiveError> {
    let mut builder = tar::Builder::new(writer);
    builder.mode(tar::HeaderMode::Deterministic);

    let mut manifest = Manifest::new();
    for (name, path) in files {
        if !is_safe_entry_name(name) {
            return Err(ArchiveError::UnsafeEntryName(name.clone()));
        }
        manifest.insert(name.clone(), sha256_file(path)?);
        builder.append_path_with_name(path, name)?;
    }

    let manifest_json = manifest.to_json()?;
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(manifest_json.len() as u64);
    header.set_mode(0o644);
    builder.append_data(&mut header, MANIFEST_FILE_NAME, manifest_json.as_slice())?;

    Ok(builder.into_inner()?)
}
