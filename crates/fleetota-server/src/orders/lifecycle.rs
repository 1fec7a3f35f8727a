//! Order lifecycle: creation by operators, status, download and
//! confirmation by boards.

use std::sync::Arc;
use std::time::Duration;

use fleetota_core::archive::{ArchiveError, encode_files_to, encode_release};
use fleetota_core::protocol::{
    DownloadRequest, OrderCreated, OrderRequest, StatusReport, StatusResponse,
};
use fleetota_core::{ReleaseId, TestModeConfig, Validate};
use fleetota_crypto::{TrustedSigners, derive_secret, secrets_match};
use tracing::{debug, info, warn};

use super::cleanup::CleanupTask;
use super::order::UpdateOrder;
use super::store::{OrderConflict, OrderHandle, OrderStore};
use crate::boards::BoardRegistry;
use crate::catalog::Catalog;
use crate::error::ServiceError;

/// Result of a board's download request.
#[derive(Debug)]
pub enum Download {
    /// The board already runs the ordered release; it should confirm.
    AlreadyCurrent(ReleaseId),
    /// Encoded release archive.
    Archive { release: ReleaseId, bytes: Vec<u8> },
}

enum Authorized {
    Order(OrderHandle),
    /// Test board acting without an order of its own.
    TestBoard(ReleaseId),
}

pub struct OrderManager {
    store: Arc<OrderStore>,
    trust: Arc<TrustedSigners>,
    catalog: Catalog,
    boards: BoardRegistry,
    ttl: Duration,
    test_mode: Option<TestModeConfig>,
}

impl OrderManager {
    pub fn new(
        trust: Arc<TrustedSigners>,
        catalog: Catalog,
        boards: BoardRegistry,
        ttl: Duration,
    ) -> Self {
        Self {
            store: Arc::new(OrderStore::new()),
            trust,
            catalog,
            boards,
            ttl,
            test_mode: None,
        }
    }

    /// Enable the test-board bypass. Ignored unless `config.enabled`.
    #[must_use]
    pub fn with_test_mode(mut self, config: TestModeConfig) -> Self {
        self.test_mode = config.enabled.then_some(config);
        self
    }

    pub const fn store(&self) -> &Arc<OrderStore> {
        &self.store
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    fn test_config_for(&self, board_id: &str) -> Option<&TestModeConfig> {
        self.test_mode
            .as_ref()
            .filter(|_| self.boards.is_test(board_id))
    }

    /// The sentinel release only exists for test boards.
    fn is_test_release(&self, board_id: &str, release: &ReleaseId) -> bool {
        self.test_config_for(board_id)
            .is_some_and(|config| config.release() == *release)
    }

    /// Handle a board's periodic status report.
    pub async fn report_status(
        &self,
        report: &StatusReport,
    ) -> Result<StatusResponse, ServiceError> {
        report.validate()?;
        if !self.boards.is_known(&report.board_id) {
            warn!(board_id = %report.board_id, "Status report from unknown board");
            return Err(ServiceError::UnknownBoard {
                board_id: report.board_id.clone(),
                ordering: false,
            });
        }
        info!(
            board_id = %report.board_id,
            firmware = %report.firmware,
            version = %report.version,
            uptime = report.uptime,
            "Status report"
        );

        Ok(match self.store.get(&report.board_id).await {
            Some(handle) => {
                StatusResponse::pending(handle.order.secret.clone(), handle.order.release())
            }
            None => StatusResponse::no_update(),
        })
    }

    /// Create (or, with `allow_overwrite`, replace) the order for a board.
    ///
    /// `signature` must verify over `signed_message`, which in turn must equal
    /// the canonical `"{firmware}-{version}-{board_id}"` string. When
    /// `signed_message` is absent the canonical string is verified directly.
    pub async fn create_order(
        &self,
        request: &OrderRequest,
        signature: Option<&[u8]>,
        signed_message: Option<&[u8]>,
        allow_overwrite: bool,
    ) -> Result<OrderCreated, ServiceError> {
        request.validate()?;
        let signature = signature
            .filter(|s| !s.is_empty())
            .ok_or(ServiceError::MissingSignature)?;

        let canonical = request.signed_message();
        let message = signed_message.unwrap_or(canonical.as_bytes());
        let Some(signer) = self.trust.find_signer(message, signature) else {
            warn!(board_id = %request.board_id, "Order signature not accepted");
            return Err(ServiceError::UntrustedSignature);
        };
        if message != canonical.as_bytes() {
            warn!(
                board_id = %request.board_id,
                signer,
                "Signed message does not match the requested order"
            );
            return Err(ServiceError::UntrustedSignature);
        }
        let signer = signer.to_string();

        if !self.boards.is_known(&request.board_id) {
            return Err(ServiceError::UnknownBoard {
                board_id: request.board_id.clone(),
                ordering: true,
            });
        }
        let release = request.release();
        if !self.catalog.contains(&release) && !self.is_test_release(&request.board_id, &release) {
            return Err(ServiceError::UnknownRelease(release));
        }

        let secret = derive_secret(signature);
        let order = UpdateOrder::new(&request.board_id, release.clone(), secret.clone(), self.ttl);

        // Run the store hand-off on its own task so a dropped request cannot
        // interrupt it between retiring the old order and inserting the new.
        let store = Arc::clone(&self.store);
        let replaced = tokio::spawn(async move {
            let (ticket, replaced) = store.put(order, allow_overwrite).await?;
            CleanupTask::spawn(store, ticket);
            Ok::<_, OrderConflict>(replaced)
        })
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?
        .map_err(|OrderConflict(board_id)| ServiceError::OrderConflict(board_id))?;

        match replaced {
            Some(old) => info!(
                board_id = %request.board_id,
                %release,
                replaced = %old.release(),
                %signer,
                "Update order overwritten"
            ),
            None => info!(
                board_id = %request.board_id,
                %release,
                %signer,
                "Update order created"
            ),
        }

        Ok(OrderCreated {
            board_id: request.board_id.clone(),
            firmware: release.firmware,
            version: release.version,
            secret,
            expires_in_secs: self.ttl.as_secs(),
        })
    }

    /// Check identity, order and secret, in that order.
    async fn authorize(
        &self,
        board_id: &str,
        request: &DownloadRequest,
    ) -> Result<Authorized, ServiceError> {
        if request.board_id != board_id {
            return Err(ServiceError::IdentityMismatch {
                path: board_id.to_string(),
                body: request.board_id.clone(),
            });
        }
        request.validate()?;
        if !self.boards.is_known(board_id) {
            return Err(ServiceError::UnknownBoard {
                board_id: board_id.to_string(),
                ordering: false,
            });
        }

        let test = self.test_config_for(board_id);
        let (authorized, expected) = match (self.store.get(board_id).await, test) {
            (Some(handle), Some(test)) => (Authorized::Order(handle), test.secret.clone()),
            (Some(handle), None) => {
                let secret = handle.order.secret.clone();
                (Authorized::Order(handle), secret)
            }
            (None, Some(test)) => (Authorized::TestBoard(test.release()), test.secret.clone()),
            (None, None) => return Err(ServiceError::NoPendingOrder(board_id.to_string())),
        };

        if !secrets_match(&expected, &request.secret) {
            warn!(board_id, "Secret mismatch");
            return Err(ServiceError::BadSecret);
        }
        Ok(authorized)
    }

    /// Serve the ordered release to a board, or report that it is already
    /// running it.
    pub async fn fetch_download(
        &self,
        board_id: &str,
        request: &DownloadRequest,
    ) -> Result<Download, ServiceError> {
        let target = match self.authorize(board_id, request).await? {
            Authorized::Order(handle) => handle.order.release(),
            Authorized::TestBoard(release) => release,
        };

        if request.current_release() == target {
            info!(board_id, release = %target, "Board already runs the ordered release");
            return Ok(Download::AlreadyCurrent(target));
        }

        let dir = self.catalog.release_dir(&target);
        let sentinel = self.is_test_release(board_id, &target) && !dir.is_dir();
        let encoded = tokio::task::spawn_blocking(move || {
            if sentinel {
                encode_files_to(&[], Vec::new())
            } else {
                encode_release(&dir)
            }
        })
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;

        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(ArchiveError::MissingRelease(_)) => {
                return Err(ServiceError::UnknownRelease(target));
            }
            Err(e) => return Err(e.into()),
        };
        info!(board_id, release = %target, bytes = bytes.len(), "Serving release archive");
        Ok(Download::Archive {
            release: target,
            bytes,
        })
    }

    /// Record a board's confirmation of a successful installation.
    ///
    /// A repeated confirmation finds no pending order and is refused.
    pub async fn confirm_install(
        &self,
        board_id: &str,
        request: &DownloadRequest,
    ) -> Result<(), ServiceError> {
        match self.authorize(board_id, request).await? {
            Authorized::Order(handle) => {
                if !self.store.signal_completion(board_id, handle.generation).await {
                    return Err(ServiceError::NoPendingOrder(board_id.to_string()));
                }
                info!(board_id, release = %handle.order.release(), "Installation confirmed");
            }
            Authorized::TestBoard(release) => {
                debug!(board_id, %release, "Test board confirmed without an order");
            }
        }
        Ok(())
    }
}
