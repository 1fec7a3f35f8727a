//! HTTP client for the update server.
//!
//! Uses reqwest to call the board-facing endpoints: status report, release
//! download and install confirmation.

use std::time::Duration;

use fleetota_core::protocol::{DownloadRequest, StatusReport, StatusResponse};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

/// Update client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Server unreachable, timed out or connection dropped.
    #[error("Transient network fault: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Server responded ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether retrying the same request later may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// What a download request produced.
#[derive(Debug)]
pub enum DownloadOutcome {
    /// Encoded release archive.
    Archive(Vec<u8>),
    /// The board already runs the ordered release.
    AlreadyCurrent,
}

#[derive(Debug, Clone)]
pub struct UpdateClient {
    http: reqwest::Client,
    base_url: String,
}

impl UpdateClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        if base_url.is_empty() {
            return Err(ClientError::Config("server_url is empty".into()));
        }

        // reqwest is built with rustls-no-provider; Err means already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn update_url(&self, board_id: &str) -> String {
        format!("{}/update/{board_id}", self.base_url)
    }

    /// Turn a non-success response into [`ClientError::Api`], keeping the
    /// server's message.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            _ => status.canonical_reason().unwrap_or("Unknown").into(),
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// `POST /status`
    pub async fn report_status(
        &self,
        report: &StatusReport,
    ) -> Result<StatusResponse, ClientError> {
        let url = format!("{}/status", self.base_url);
        let resp = self.http.post(&url).json(report).send().await?;
        let resp = Self::check_status(resp).await?;
        Ok(resp.json().await?)
    }

    /// `GET /update/{board_id}`
    pub async fn download(
        &self,
        request: &DownloadRequest,
    ) -> Result<DownloadOutcome, ClientError> {
        let resp = self
            .http
            .get(self.update_url(&request.board_id))
            .json(request)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_MODIFIED {
            return Ok(DownloadOutcome::AlreadyCurrent);
        }
        let resp = Self::check_status(resp).await?;
        let bytes = resp.bytes().await?;
        debug!(bytes = bytes.len(), "Downloaded release archive");
        Ok(DownloadOutcome::Archive(bytes.to_vec()))
    }

    /// `DELETE /update/{board_id}`
    pub async fn confirm(&self, request: &DownloadRequest) -> Result<(), ClientError> {
        let resp = self
            .http
            .delete(self.update_url(&request.board_id))
            .json(request)
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }
}
