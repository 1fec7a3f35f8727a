//! Service error taxonomy and its fixed HTTP status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fleetota_core::archive::ArchiveError;
use fleetota_core::{ReleaseId, ValidationError};
use thiserror::Error;
use tracing::error;

use crate::catalog::CatalogError;

/// Every way a board or operator request can fail.
///
/// Internal faults fail the single request; they never reach order state.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Malformed request: {0}")]
    BadRequest(String),

    #[error("No signature file found")]
    MissingSignature,

    #[error("Invalid or unknown signature")]
    UntrustedSignature,

    #[error("Unknown board '{board_id}'")]
    UnknownBoard {
        board_id: String,
        /// Unknown order targets are reported as 404, unknown reporters as 401.
        ordering: bool,
    },

    #[error("Unknown release {0}")]
    UnknownRelease(ReleaseId),

    #[error("Update order already exists for '{0}', use PUT to overwrite")]
    OrderConflict(String),

    #[error("Board id '{body}' in request body does not match '{path}' in URL")]
    IdentityMismatch { path: String, body: String },

    #[error("No pending update order for '{0}'")]
    NoPendingOrder(String),

    #[error("Secret does not match the pending order")]
    BadSecret,

    #[error("Release {0} already exists, submit a new version")]
    ReleaseAlreadyExists(ReleaseId),

    #[error("No firmware in request")]
    NoFirmware,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::IdentityMismatch { .. } | Self::NoFirmware => {
                StatusCode::BAD_REQUEST
            }
            Self::MissingSignature => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UntrustedSignature | Self::UnknownBoard { ordering: false, .. } => {
                StatusCode::UNAUTHORIZED
            }
            Self::UnknownBoard { ordering: true, .. } | Self::UnknownRelease(_) => {
                StatusCode::NOT_FOUND
            }
            Self::OrderConflict(_) | Self::ReleaseAlreadyExists(_) => StatusCode::CONFLICT,
            Self::NoPendingOrder(_) => StatusCode::NOT_ACCEPTABLE,
            Self::BadSecret => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let Self::Internal(message) = &self {
            error!(error = %message, "Request failed with internal error");
            return (status, "Internal error").into_response();
        }
        (status, self.to_string()).into_response()
    }
}

impl From<ValidationError> for ServiceError {
    fn from(e: ValidationError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<CatalogError> for ServiceError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::VersionWithoutFirmware => Self::BadRequest(e.to_string()),
            CatalogError::Io(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<ArchiveError> for ServiceError {
    fn from(e: ArchiveError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}
