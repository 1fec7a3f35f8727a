//! Archive verification and installation into the board's file tree.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fleetota_core::archive::{ArchiveError, DecodedArchive, IntegrityProblem, decode_archive};
use fleetota_core::{AgentConfig, ChecksumPolicy, ReleaseId};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Release marker written into the install directory after an install.
pub const INSTALL_MARKER: &str = "release.json";

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Integrity check failed for {} file(s)", problems.len())]
    ChecksumMismatch { problems: Vec<IntegrityProblem> },

    #[error("Invalid install marker: {0}")]
    Marker(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Verifies downloaded archives and replaces the board's files.
///
/// All methods block on the filesystem.
#[derive(Debug, Clone)]
pub struct Installer {
    install_dir: PathBuf,
    staging_dir: PathBuf,
    preserved: BTreeSet<String>,
    policy: ChecksumPolicy,
}

impl Installer {
    pub fn new(
        install_dir: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
        preserved: impl IntoIterator<Item = String>,
        policy: ChecksumPolicy,
    ) -> Self {
        Self {
            install_dir: install_dir.into(),
            staging_dir: staging_dir.into(),
            preserved: preserved.into_iter().collect(),
            policy,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            &config.install_dir,
            &config.staging_dir,
            config.preserved_files.iter().cloned(),
            config.checksum_policy,
        )
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Release recorded by the last successful install, if any.
    pub fn installed_release(&self) -> Result<Option<ReleaseId>, InstallError> {
        match std::fs::read(self.install_dir.join(INSTALL_MARKER)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove whatever a previous attempt left in staging.
    pub fn clear_staging(&self) -> std::io::Result<()> {
        match std::fs::remove_dir_all(&self.staging_dir) {
            Ok(()) => {
                debug!(dir = %self.staging_dir.display(), "Cleared staging directory");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Decode `archive` into staging and apply the checksum policy.
    pub fn verify(&self, archive: &[u8]) -> Result<DecodedArchive, InstallError> {
        self.clear_staging()?;
        let decoded = decode_archive(archive, &self.staging_dir)?;
        if decoded.is_intact() {
            info!(files = decoded.files.len(), "Archive verified");
            return Ok(decoded);
        }

        match self.policy {
            ChecksumPolicy::Enforce => {
                warn!(
                    problems = decoded.problems.len(),
                    "Rejecting release with integrity problems"
                );
                self.clear_staging()?;
                Err(InstallError::ChecksumMismatch {
                    problems: decoded.problems,
                })
            }
            ChecksumPolicy::Warn => {
                warn!(problems = decoded.problems.len(), "Installing despite integrity problems");
                Ok(decoded)
            }
        }
    }

    /// Replace the installed files with the staged release.
    ///
    /// Preserved files are never touched, even if the release ships one.
    /// Files not part of the new release are removed. Returns the names of
    /// the installed files.
    pub fn install(
        &self,
        decoded: &DecodedArchive,
        release: &ReleaseId,
    ) -> Result<Vec<String>, InstallError> {
        std::fs::create_dir_all(&self.install_dir)?;
        self.remove_stale(decoded)?;

        let mut installed = Vec::with_capacity(decoded.files.len());
        for (name, staged) in &decoded.files {
            if self.preserved.contains(name) {
                warn!(name = %name, "Release ships a preserved file, keeping the local copy");
                continue;
            }
            move_file(&staged.path, &self.install_dir.join(name))?;
            installed.push(name.clone());
        }

        self.write_marker(release)?;
        self.clear_staging()?;
        info!(%release, files = installed.len(), "Release installed");
        Ok(installed)
    }

    fn remove_stale(&self, decoded: &DecodedArchive) -> Result<(), InstallError> {
        for entry in std::fs::read_dir(&self.install_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name == INSTALL_MARKER
                || self.preserved.contains(&name)
                || decoded.files.contains_key(&name)
            {
                continue;
            }
            debug!(name = %name, "Removing stale file");
            std::fs::remove_file(entry.path())?;
        }
        Ok(())
    }

    fn write_marker(&self, release: &ReleaseId) -> Result<(), InstallError> {
        let tmp = self.install_dir.join(format!(".{INSTALL_MARKER}.tmp"));
        std::fs::write(&tmp, serde_json::to_vec_pretty(release)?)?;
        std::fs::rename(&tmp, self.install_dir.join(INSTALL_MARKER))?;
        Ok(())
    }
}

/// Rename, falling back to copy + delete across filesystems.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)?;
    std::fs::remove_file(from)
}
