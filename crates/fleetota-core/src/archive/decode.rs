use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use fleetota_crypto::HashingWriter;
use tracing::{debug, warn};

use super::manifest::{MANIFEST_FILE_NAME, Manifest};
use super::{ArchiveError, is_safe_entry_name};

/// A firmware file written to the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    /// Hex SHA-256 computed while the file was written.
    pub digest: String,
    pub size: u64,
}

/// One way a decoded archive disagrees with its manifest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityProblem {
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("{file} is listed in the manifest but missing from the archive")]
    MissingFromArchive { file: String },

    #[error("{file} is in the archive but not in the manifest")]
    NotInManifest { file: String },
}

/// Result of decoding an archive into a staging directory.
///
/// Decoding succeeds even when files fail verification; what to do about
/// [`problems`](Self::problems) is the caller's policy.
#[derive(Debug)]
pub struct DecodedArchive {
    pub staging_dir: PathBuf,
    pub manifest: Manifest,
    pub files: BTreeMap<String, StagedFile>,
    pub problems: Vec<IntegrityProblem>,
}

impl DecodedArchive {
    /// Every file matches the manifest and nothing is missing or extra.
    pub fn is_intact(&self) -> bool {
        self.problems.is_empty()
    }
}

impl fmt::Display for DecodedArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files in {} ({} problems)",
            self.files.len(),
            self.staging_dir.display(),
            self.problems.len()
        )
    }
}

/// Stream entries out of a tar archive into `staging_dir`, hashing each file
/// as it is written, then check everything against the manifest.
///
/// The manifest may appear anywhere in the stream; digests are compared only
/// after the whole archive has been read.
pub fn decode_archive<R: Read>(
    reader: R,
    staging_dir: &Path,
) -> Result<DecodedArchive, ArchiveError> {
    std::fs::create_dir_all(staging_dir)?;
    let mut archive = tar::Archive::new(reader);
    let mut manifest = None;
    let mut files = BTreeMap::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        let raw_name = entry.path()?.to_string_lossy().into_owned();
        let name = raw_name.strip_prefix("./").unwrap_or(&raw_name).to_string();

        if !entry_type.is_file() {
            debug!(name = %name, ?entry_type, "Skipping non-file archive entry");
            continue;
        }
        if !is_safe_entry_name(&name) {
            return Err(ArchiveError::UnsafeEntryName(name));
        }

        if name == MANIFEST_FILE_NAME {
            if manifest.is_some() {
                return Err(ArchiveError::DuplicateEntry(name));
            }
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            manifest = Some(Manifest::from_json(&buf)?);
            continue;
        }

        if files.contains_key(&name) {
            return Err(ArchiveError::DuplicateEntry(name));
        }
        let path = staging_dir.join(&name);
        let mut writer = HashingWriter::new(BufWriter::new(std::fs::File::create(&path)?));
        io::copy(&mut entry, &mut writer)?;
        let (mut inner, digest, size) = writer.finish();
        inner.flush()?;
        debug!(name = %name, size, "Staged archive entry");
        files.insert(name, StagedFile { path, digest, size });
    }

    let manifest = manifest.ok_or(ArchiveError::MissingManifest)?;
    let problems = check_against_manifest(&manifest, &files);
    for problem in &problems {
        warn!(%problem, "Archive integrity problem");
    }

    Ok(DecodedArchive {
        staging_dir: staging_dir.to_path_buf(),
        manifest,
        files,
        problems,
    })
}

fn check_against_manifest(
    manifest: &Manifest,
    files: &BTreeMap<String, StagedFile>,
) -> Vec<IntegrityProblem> {
    let mut problems = Vec::new();
    for (name, expected) in manifest.iter() {
        match files.get(name) {
            None => problems.push(IntegrityProblem::MissingFromArchive {
                file: name.to_string(),
            }),
            Some(staged) if !staged.digest.eq_ignore_ascii_case(expected) => {
                problems.push(IntegrityProblem::ChecksumMismatch {
                    file: name.to_string(),
                    expected: expected.to_string(),
                    actual: staged.digest.clone(),
                });
            }
            Some(_) => {}
        }
    }
    for name in files.keys() {
        if manifest.digest(name).is_none() {
            problems.push(IntegrityProblem::NotInManifest { file: name.clone() });
        }
    }
    problems
}
