//! Board-side update flow.
//!
//! One [`UpdateAgent::poll_once`] call is one pass through the install state
//! machine; [`UpdateAgent::run`] repeats it on the poll interval until a
//! reboot is due or shutdown is requested. Transient network faults never
//! escape a poll: they park the agent in `AwaitingOrder` for the next tick.

use fleetota_core::protocol::{DownloadRequest, StatusReport};
use fleetota_core::{AgentConfig, ReleaseId};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::client::{ClientError, DownloadOutcome, UpdateClient};
use crate::install::{InstallError, Installer};
use crate::state::AgentState;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The server has nothing for this board.
    NoUpdate,
    /// The board already ran the ordered release; the order was confirmed.
    AlreadyCurrent,
    /// A release was installed; the board must restart into it.
    Reboot(ReleaseId),
    /// Something failed; the next poll retries.
    Retry,
}

/// Why [`UpdateAgent::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    RebootRequested(ReleaseId),
    Shutdown,
}

/// An install that happened but has not been confirmed yet.
#[derive(Debug, Clone)]
struct PendingConfirmation {
    request: DownloadRequest,
    release: ReleaseId,
}

pub struct UpdateAgent {
    config: AgentConfig,
    client: UpdateClient,
    installer: Installer,
    state: AgentState,
    pending_confirmation: Option<PendingConfirmation>,
    started: Instant,
}

impl UpdateAgent {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let client = UpdateClient::new(&config.server_url, config.request_timeout())?;
        let installer = Installer::from_config(&config);
        Ok(Self {
            config,
            client,
            installer,
            state: AgentState::Idle,
            pending_confirmation: None,
            started: Instant::now(),
        })
    }

    pub const fn state(&self) -> AgentState {
        self.state
    }

    pub const fn has_pending_confirmation(&self) -> bool {
        self.pending_confirmation.is_some()
    }

    fn transition(&mut self, next: AgentState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Unexpected state transition");
        }
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }

    /// Release the board currently runs: the install marker if present,
    /// otherwise the configured one.
    pub fn current_release(&self) -> ReleaseId {
        match self.installer.installed_release() {
            Ok(Some(release)) => release,
            Ok(None) => ReleaseId::new(&self.config.firmware, &self.config.version),
            Err(e) => {
                warn!(error = %e, "Unreadable install marker, reporting configured release");
                ReleaseId::new(&self.config.firmware, &self.config.version)
            }
        }
    }

    /// Run one pass of the update flow.
    pub async fn poll_once(&mut self) -> CycleOutcome {
        if self.state == AgentState::Idle {
            self.transition(AgentState::AwaitingOrder);
        }
        if self.pending_confirmation.is_some() {
            return self.confirm_install().await;
        }

        let current = self.current_release();
        let report = StatusReport {
            firmware: current.firmware.clone(),
            version: current.version.clone(),
            board_id: self.config.board_id.clone(),
            uptime: self.started.elapsed().as_secs(),
        };
        let status = match self.client.report_status(&report).await {
            Ok(status) => status,
            Err(e) => return self.retry("status report", &e),
        };
        if !status.update {
            debug!("No update pending");
            return CycleOutcome::NoUpdate;
        }
        let (Some(secret), Some(firmware), Some(version)) =
            (status.secret, status.firmware, status.version)
        else {
            warn!("Status response announced an update without an order descriptor");
            return CycleOutcome::Retry;
        };
        let target = ReleaseId::new(firmware, version);
        info!(release = %target, "Update order received");

        let request = DownloadRequest {
            firmware: current.firmware,
            version: current.version,
            board_id: self.config.board_id.clone(),
            secret,
        };
        self.transition(AgentState::Downloading);
        match self.download_and_install(&request, &target).await {
            Ok(true) => {}
            Ok(false) => return self.confirm_already_current(&request).await,
            Err(e) => return self.retry("update", &e),
        }

        self.pending_confirmation = Some(PendingConfirmation {
            request: DownloadRequest {
                firmware: target.firmware.clone(),
                version: target.version.clone(),
                ..request
            },
            release: target,
        });
        self.confirm_install().await
    }

    /// Download, verify and install. `Ok(false)` means the server reported
    /// the board as already current.
    async fn download_and_install(
        &mut self,
        request: &DownloadRequest,
        target: &ReleaseId,
    ) -> Result<bool, AgentError> {
        let installer = self.installer.clone();
        tokio::task::spawn_blocking(move || installer.clear_staging())
            .await?
            .map_err(InstallError::from)?;

        let archive = match self.client.download(request).await? {
            DownloadOutcome::Archive(bytes) => bytes,
            DownloadOutcome::AlreadyCurrent => return Ok(false),
        };
        info!(release = %target, bytes = archive.len(), "Release downloaded");

        self.transition(AgentState::Verifying);
        let installer = self.installer.clone();
        let decoded = tokio::task::spawn_blocking(move || installer.verify(&archive)).await??;

        self.transition(AgentState::Installing);
        let installer = self.installer.clone();
        let release = target.clone();
        tokio::task::spawn_blocking(move || installer.install(&decoded, &release)).await??;
        Ok(true)
    }

    /// The "already current" edge: confirm right away and go idle, whatever
    /// the confirmation result. A failed confirmation is retried naturally,
    /// since the next status poll announces the order again.
    async fn confirm_already_current(&mut self, request: &DownloadRequest) -> CycleOutcome {
        self.transition(AgentState::Confirming);
        match self.client.confirm(request).await {
            Ok(()) => info!("Already running the ordered release, order confirmed"),
            Err(e) => warn!(error = %e, "Confirming already-current release failed"),
        }
        self.transition(AgentState::Idle);
        CycleOutcome::AlreadyCurrent
    }

    /// Confirm the pending install. Only this step is retried on failure;
    /// the install itself is never redone.
    async fn confirm_install(&mut self) -> CycleOutcome {
        let Some(pending) = self.pending_confirmation.clone() else {
            return CycleOutcome::Retry;
        };
        self.transition(AgentState::Confirming);
        match self.client.confirm(&pending.request).await {
            Ok(()) => info!(release = %pending.release, "Install confirmed"),
            Err(e) if e.is_transient() => return self.retry("confirmation", &e),
            Err(e) => {
                // The order is gone (expired or replaced); the install stands.
                warn!(
                    release = %pending.release,
                    error = %e,
                    "Confirmation refused, giving up on it"
                );
            }
        }
        self.pending_confirmation = None;
        self.transition(AgentState::Rebooting);
        CycleOutcome::Reboot(pending.release)
    }

    fn retry(&mut self, step: &str, e: &dyn std::fmt::Display) -> CycleOutcome {
        error!(step, error = %e, "Update step failed, retrying on next poll");
        self.transition(AgentState::AwaitingOrder);
        CycleOutcome::Retry
    }

    /// Poll until a reboot is due or `shutdown` fires.
    ///
    /// Shutdown is only observed between polls, so an update in flight
    /// always runs to the end of its pass.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> RunOutcome {
        let mut timer = tokio::time::interval(self.config.poll_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            board_id = %self.config.board_id,
            server = %self.client.base_url(),
            release = %self.current_release(),
            "Update agent started"
        );

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                Ok(()) = shutdown.changed() => {
                    info!("Update agent shutting down");
                    return RunOutcome::Shutdown;
                }
            }
            if let CycleOutcome::Reboot(release) = self.poll_once().await {
                return RunOutcome::RebootRequested(release);
            }
        }
    }
}
