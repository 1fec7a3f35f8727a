//! Signed release upload ingestion.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use axum::body::Bytes;
use fleetota_core::archive::{MANIFEST_FILE_NAME, signable_bytes};
use fleetota_core::protocol::validate_component;
use fleetota_core::{ReleaseId, TestModeConfig, Validate};
use fleetota_crypto::TrustedSigners;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::error::ServiceError;

/// A decoded upload request: release identity, firmware files by name and
/// the detached signature, if one was sent.
#[derive(Debug, Default)]
pub struct UploadBundle {
    pub release: ReleaseId,
    pub files: BTreeMap<String, Bytes>,
    pub signature: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Stored {
        release: ReleaseId,
        signer: String,
        files: usize,
    },
    /// Test firmware: verified, not saved.
    DryRun { release: ReleaseId, signer: String },
}

pub struct ReleaseUploader {
    catalog: Catalog,
    trust: Arc<TrustedSigners>,
    test_mode: Option<TestModeConfig>,
}

impl ReleaseUploader {
    pub fn new(catalog: Catalog, trust: Arc<TrustedSigners>) -> Self {
        Self {
            catalog,
            trust,
            test_mode: None,
        }
    }

    #[must_use]
    pub fn with_test_mode(mut self, config: TestModeConfig) -> Self {
        self.test_mode = config.enabled.then_some(config);
        self
    }

    /// Verify and store a new release.
    ///
    /// The signature must cover the firmware files concatenated in name
    /// order. Existing releases are never replaced.
    pub async fn ingest(&self, bundle: UploadBundle) -> Result<UploadOutcome, ServiceError> {
        let UploadBundle {
            release,
            files,
            signature,
        } = bundle;

        if files.is_empty() && signature.is_none() {
            return Err(ServiceError::BadRequest("No files in request".into()));
        }
        release.validate()?;
        let signature = signature
            .filter(|s| !s.is_empty())
            .ok_or(ServiceError::MissingSignature)?;
        if files.is_empty() {
            return Err(ServiceError::NoFirmware);
        }
        for name in files.keys() {
            validate_component("file", name)?;
            if name == MANIFEST_FILE_NAME {
                return Err(ServiceError::BadRequest(format!(
                    "'{name}' is a reserved file name"
                )));
            }
        }

        let signable = signable_bytes(&files);
        let Some(signer) = self.trust.find_signer(&signable, &signature) else {
            warn!(%release, "Upload signature not accepted");
            return Err(ServiceError::UntrustedSignature);
        };
        let signer = signer.to_string();

        if self
            .test_mode
            .as_ref()
            .is_some_and(|test| test.firmware == release.firmware)
        {
            info!(%release, %signer, "Test upload verified, not saving");
            return Ok(UploadOutcome::DryRun { release, signer });
        }

        self.store(&release, &files).await?;
        info!(%release, %signer, files = files.len(), "Release uploaded");
        Ok(UploadOutcome::Stored {
            release,
            signer,
            files: files.len(),
        })
    }

    async fn store(
        &self,
        release: &ReleaseId,
        files: &BTreeMap<String, Bytes>,
    ) -> Result<(), ServiceError> {
        tokio::fs::create_dir_all(self.catalog.root()).await?;
        let dir = self.catalog.release_dir(release);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(%release, "Upload conflicts with an existing release");
                return Err(ServiceError::ReleaseAlreadyExists(release.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = write_files(&dir, files).await {
            error!(%release, error = %e, "Failed to write release, removing partial upload");
            if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                warn!(dir = %dir.display(), error = %cleanup, "Failed to remove partial upload");
            }
            return Err(e.into());
        }
        Ok(())
    }
}

async fn write_files(dir: &Path, files: &BTreeMap<String, Bytes>) -> std::io::Result<()> {
    for (name, content) in files {
        tokio::fs::write(dir.join(name), content).await?;
    }
    Ok(())
}
