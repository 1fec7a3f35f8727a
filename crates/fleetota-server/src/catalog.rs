//! Read-only view of release storage.
//!
//! Releases live at `{root}/{firmware}-{version}/`; the `keys/` directory
//! next to them holds trusted public keys and is never listed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use fleetota_core::ReleaseId;
use fleetota_core::config::KEYS_DIR_NAME;
use thiserror::Error;
use tracing::debug;

/// Firmware name to the set of its stored versions.
pub type ReleaseListing = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("a version filter requires a firmware filter")]
    VersionWithoutFirmware,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
}

impl Catalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical storage location of a release.
    pub fn release_dir(&self, release: &ReleaseId) -> PathBuf {
        self.root.join(release.dir_name())
    }

    pub fn contains(&self, release: &ReleaseId) -> bool {
        self.release_dir(release).is_dir()
    }

    /// List stored releases, optionally filtered by firmware and version.
    ///
    /// A version filter without a firmware filter is ambiguous and rejected
    /// before storage is read.
    pub fn list_releases(
        &self,
        firmware: Option<&str>,
        version: Option<&str>,
    ) -> Result<ReleaseListing, CatalogError> {
        if version.is_some() && firmware.is_none() {
            return Err(CatalogError::VersionWithoutFirmware);
        }

        let mut listing = ReleaseListing::new();
        if !self.root.is_dir() {
            return Ok(listing);
        }

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name == KEYS_DIR_NAME {
                continue;
            }
            let Some(release) = ReleaseId::from_dir_name(&name) else {
                debug!(name = %name, "Ignoring storage directory that is not a release");
                continue;
            };
            if firmware.is_some_and(|f| f != release.firmware)
                || version.is_some_and(|v| v != release.version)
            {
                continue;
            }
            listing
                .entry(release.firmware)
                .or_default()
                .insert(release.version);
        }
        Ok(listing)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn storage() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "blinker-0.1.0",
            "blinker-0.1.1",
            "sensor-2.0",
            "sensor-pro-2.0",
            "keys",
        ] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("README-1.0"), "not a release").unwrap();
        dir
    }

    #[test]
    fn lists_everything_but_keys() {
        let dir = storage();
        let listing = Catalog::new(dir.path()).list_releases(None, None).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(
            listing["blinker"].iter().collect::<Vec<_>>(),
            vec!["0.1.0", "0.1.1"]
        );
        assert!(listing["sensor"].contains("2.0"));
        assert!(!listing.contains_key("sensor-pro"));
    }

    #[test]
    fn filters_by_name_and_version() {
        let dir = storage();
        let catalog = Catalog::new(dir.path());

        let listing = catalog.list_releases(Some("blinker"), None).unwrap();
        assert_eq!(listing.keys().collect::<Vec<_>>(), vec!["blinker"]);

        let listing = catalog.list_releases(Some("blinker"), Some("0.1.1")).unwrap();
        assert_eq!(listing["blinker"].len(), 1);

        let listing = catalog.list_releases(Some("missing"), None).unwrap();
        assert!(listing.is_empty());
    }

    #[test]
    fn version_without_name_is_rejected() {
        let dir = storage();
        let err = Catalog::new(dir.path())
            .list_releases(None, Some("0.1.0"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::VersionWithoutFirmware));
    }

    #[test]
    fn contains_checks_release_dir() {
        let dir = storage();
        let catalog = Catalog::new(dir.path());
        assert!(catalog.contains(&ReleaseId::new("blinker", "0.1.0")));
        assert!(!catalog.contains(&ReleaseId::new("app", "2.0")));
    }
}
