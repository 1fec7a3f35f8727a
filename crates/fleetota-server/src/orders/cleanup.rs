use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::store::{CleanupTicket, OrderStore};

/// Why an order left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retirement {
    /// The board confirmed installation.
    Confirmed,
    /// Nothing happened before the deadline.
    Expired,
    /// An operator replaced the order.
    Overwritten,
    /// The store dropped the signal without sending one.
    Abandoned,
}

/// Per-order task that waits for a completion signal or the order deadline,
/// whichever comes first, and then removes exactly that order.
pub struct CleanupTask {
    store: Arc<OrderStore>,
    ticket: CleanupTicket,
}

impl CleanupTask {
    pub fn spawn(store: Arc<OrderStore>, ticket: CleanupTicket) -> JoinHandle<Retirement> {
        store.task_started(&ticket.board_id);
        tokio::spawn(Self { store, ticket }.run())
    }

    async fn run(self) -> Retirement {
        let Self { store, ticket } = self;
        let CleanupTicket {
            board_id,
            generation,
            deadline,
            signal,
            done,
        } = ticket;

        let outcome = match tokio::time::timeout_at(deadline, signal).await {
            Ok(Ok(retirement)) => retirement,
            Ok(Err(_)) => Retirement::Abandoned,
            Err(_) => Retirement::Expired,
        };

        match outcome {
            Retirement::Confirmed => info!(board_id = %board_id, "Update confirmed"),
            Retirement::Expired => info!(board_id = %board_id, "Update order expired"),
            Retirement::Overwritten => info!(board_id = %board_id, "Update order overwritten"),
            Retirement::Abandoned => warn!(board_id = %board_id, "Update order abandoned"),
        }

        store.remove(&board_id, generation).await;
        store.task_finished(&board_id);
        // Receiver gone means nobody is waiting for the hand-off.
        let _ = done.send(());
        outcome
    }
}
