use std::time::Duration;

use fleetota_core::ReleaseId;
use tokio::time::Instant;

/// One outstanding instruction "board B should install release (F, V)".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOrder {
    pub board_id: String,
    pub firmware: String,
    pub version: String,
    /// Token the board must present to download or confirm this order.
    pub secret: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl UpdateOrder {
    /// Create an order that expires `ttl` from now.
    pub fn new(
        board_id: impl Into<String>,
        release: ReleaseId,
        secret: String,
        ttl: Duration,
    ) -> Self {
        let created_at = Instant::now();
        Self {
            board_id: board_id.into(),
            firmware: release.firmware,
            version: release.version,
            secret,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn release(&self) -> ReleaseId {
        ReleaseId::new(self.firmware.clone(), self.version.clone())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}
