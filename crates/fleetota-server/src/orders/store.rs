//! Authoritative in-memory map of board id to pending order.
//!
//! Mutations from request handlers are serialized per board by a board
//! lock. Replacing an order is a hand-off: the old order's cleanup task is
//! signalled and its exit acknowledged before the new order is written, so
//! two cleanup tasks never observe the same board key at once. Removal is
//! additionally checked against the order generation, so a late removal can
//! only ever delete the order it was issued for.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::time::Instant;
use tracing::{debug, info};

use super::cleanup::Retirement;
use super::order::UpdateOrder;

/// Monotonic id distinguishing successive orders for the same board.
pub type Generation = u64;

/// An order already exists for the board and overwrite was not requested.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("update order already exists for '{0}'")]
pub struct OrderConflict(pub String);

/// A live order together with the generation it was stored under.
#[derive(Debug, Clone)]
pub struct OrderHandle {
    pub order: UpdateOrder,
    pub generation: Generation,
}

/// Everything a cleanup task needs to retire one stored order.
#[derive(Debug)]
pub struct CleanupTicket {
    pub board_id: String,
    pub generation: Generation,
    pub deadline: Instant,
    pub(super) signal: oneshot::Receiver<Retirement>,
    pub(super) done: oneshot::Sender<()>,
}

struct Slot {
    order: UpdateOrder,
    generation: Generation,
    /// Wakes the cleanup task. Taken once the order starts retiring.
    signal: Option<oneshot::Sender<Retirement>>,
    /// Resolves when the cleanup task has exited.
    retired: Option<oneshot::Receiver<()>>,
}

impl Slot {
    const fn is_retiring(&self) -> bool {
        self.signal.is_none()
    }
}

#[derive(Default)]
struct TaskCounts {
    live: HashMap<String, usize>,
    peak: HashMap<String, usize>,
}

/// Pending orders keyed by board id.
pub struct OrderStore {
    slots: RwLock<HashMap<String, Slot>>,
    /// One lock per board id; the id space is static, so this never shrinks.
    board_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    next_generation: AtomicU64,
    tasks: StdMutex<TaskCounts>,
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderStore {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            board_locks: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            tasks: StdMutex::new(TaskCounts::default()),
        }
    }

    async fn board_lock(&self, board_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.board_locks.lock().await;
        Arc::clone(locks.entry(board_id.to_string()).or_default())
    }

    /// The live order for a board. Orders that are already retiring
    /// (confirmed or being replaced) or past their deadline are not returned.
    /// The cleanup task may not have removed an expired order yet.
    pub async fn get(&self, board_id: &str) -> Option<OrderHandle> {
        self.slots
            .read()
            .await
            .get(board_id)
            .filter(|slot| !slot.is_retiring() && !slot.order.is_expired())
            .map(|slot| OrderHandle {
                order: slot.order.clone(),
                generation: slot.generation,
            })
    }

    /// Store `order`, returning the ticket for its cleanup task and the order
    /// it overwrote, if any.
    ///
    /// Fails with [`OrderConflict`] if a live order exists and `overwrite` is
    /// false. Otherwise the existing order's cleanup task is told to retire
    /// and this call waits for it to exit before inserting. An order that is
    /// already retiring is waited out regardless of `overwrite`.
    pub async fn put(
        &self,
        order: UpdateOrder,
        overwrite: bool,
    ) -> Result<(CleanupTicket, Option<UpdateOrder>), OrderConflict> {
        let board_lock = self.board_lock(&order.board_id).await;
        let _guard = board_lock.lock().await;

        let previous = {
            let mut slots = self.slots.write().await;
            match slots.get_mut(&order.board_id) {
                Some(slot) if !overwrite && !slot.is_retiring() => {
                    return Err(OrderConflict(order.board_id));
                }
                Some(slot) => Some((slot.order.clone(), slot.signal.take(), slot.retired.take())),
                None => None,
            }
        };

        let mut replaced = None;
        if let Some((old, signal, retired)) = previous {
            if let Some(signal) = signal {
                // The receiver is gone only if the task already finished.
                let _ = signal.send(Retirement::Overwritten);
                replaced = Some(old);
            }
            if let Some(retired) = retired {
                // Err means the task dropped its acknowledgement, i.e. exited.
                let _ = retired.await;
            }
            debug!(board_id = %order.board_id, "Previous order retired");
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (signal_tx, signal_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let ticket = CleanupTicket {
            board_id: order.board_id.clone(),
            generation,
            deadline: order.expires_at,
            signal: signal_rx,
            done: done_tx,
        };
        self.slots.write().await.insert(
            order.board_id.clone(),
            Slot {
                order,
                generation,
                signal: Some(signal_tx),
                retired: Some(done_rx),
            },
        );
        Ok((ticket, replaced))
    }

    /// Remove the order stored under `generation`.
    ///
    /// Idempotent: removing an order that no longer exists, or that has been
    /// superseded, is a no-op.
    pub async fn remove(&self, board_id: &str, generation: Generation) -> bool {
        let mut slots = self.slots.write().await;
        match slots.get(board_id) {
            Some(slot) if slot.generation == generation => {
                slots.remove(board_id);
                true
            }
            Some(_) => {
                info!(board_id, generation, "Order was superseded, nothing to remove");
                false
            }
            None => {
                info!(board_id, generation, "Tried to remove update order which no longer exists");
                false
            }
        }
    }

    /// Wake the order's cleanup task with "installed successfully".
    ///
    /// Returns `false` if that order is gone or already retiring.
    pub async fn signal_completion(&self, board_id: &str, generation: Generation) -> bool {
        let mut slots = self.slots.write().await;
        let Some(slot) = slots
            .get_mut(board_id)
            .filter(|slot| slot.generation == generation)
        else {
            return false;
        };
        slot.signal
            .take()
            .is_some_and(|signal| signal.send(Retirement::Confirmed).is_ok())
    }

    /// Number of live orders: neither retiring nor expired.
    pub async fn len(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| !slot.is_retiring() && !slot.order.is_expired())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether any entry, live or retiring, is stored for the board.
    pub async fn holds_entry(&self, board_id: &str) -> bool {
        self.slots.read().await.contains_key(board_id)
    }

    pub(super) fn task_started(&self, board_id: &str) {
        let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let counts = &mut *guard;
        let live = counts.live.entry(board_id.to_string()).or_insert(0);
        *live += 1;
        let peak = counts.peak.entry(board_id.to_string()).or_insert(0);
        *peak = (*peak).max(*live);
    }

    pub(super) fn task_finished(&self, board_id: &str) {
        let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(live) = guard.live.get_mut(board_id) {
            *live = live.saturating_sub(1);
        }
    }

    /// Cleanup tasks currently running for a board.
    pub fn live_cleanup_tasks(&self, board_id: &str) -> usize {
        let guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        guard.live.get(board_id).copied().unwrap_or(0)
    }

    /// Highest number of cleanup tasks ever running at once for a board.
    pub fn peak_cleanup_tasks(&self, board_id: &str) -> usize {
        let guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        guard.peak.get(board_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use fleetota_core::ReleaseId;

    use super::*;
    use crate::orders::CleanupTask;

    fn order(board_id: &str, version: &str, secret: &str) -> UpdateOrder {
        UpdateOrder::new(
            board_id,
            ReleaseId::new("blinker", version),
            secret.to_string(),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn put_and_get() {
        let store = OrderStore::new();
        let (ticket, replaced) = store.put(order("b1", "0.1.1", "s1"), false).await.unwrap();
        assert!(replaced.is_none());
        assert_eq!(ticket.board_id, "b1");

        let handle = store.get("b1").await.unwrap();
        assert_eq!(handle.order.secret, "s1");
        assert_eq!(handle.generation, ticket.generation);
        assert!(store.get("b2").await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_order_is_hidden_before_cleanup() {
        let store = OrderStore::new();
        let (_ticket, _) = store.put(order("b1", "0.1.1", "s1"), false).await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(store.get("b1").await.is_none());
        assert!(store.is_empty().await);
        assert!(store.holds_entry("b1").await);
    }

    #[tokio::test]
    async fn create_only_put_conflicts() {
        let store = OrderStore::new();
        let _ticket = store.put(order("b1", "0.1.1", "s1"), false).await.unwrap();
        let err = store.put(order("b1", "0.1.2", "s2"), false).await.unwrap_err();
        assert_eq!(err, OrderConflict("b1".into()));
        assert_eq!(store.get("b1").await.unwrap().order.secret, "s1");
    }

    #[tokio::test]
    async fn overwrite_waits_for_old_task() {
        let store = Arc::new(OrderStore::new());
        let (ticket, _) = store.put(order("b1", "0.1.1", "s1"), false).await.unwrap();
        let old_task = CleanupTask::spawn(Arc::clone(&store), ticket);

        let (ticket, replaced) = store.put(order("b1", "0.1.2", "s2"), true).await.unwrap();
        assert_eq!(replaced.unwrap().secret, "s1");
        assert_eq!(old_task.await.unwrap(), Retirement::Overwritten);

        // The old task's removal did not touch the new order.
        let handle = store.get("b1").await.unwrap();
        assert_eq!(handle.order.secret, "s2");
        assert_eq!(handle.generation, ticket.generation);
    }

    #[tokio::test]
    async fn remove_is_generation_checked_and_idempotent() {
        let store = OrderStore::new();
        let (ticket, _) = store.put(order("b1", "0.1.1", "s1"), false).await.unwrap();

        assert!(!store.remove("b1", ticket.generation + 1).await);
        assert!(store.get("b1").await.is_some());

        assert!(store.remove("b1", ticket.generation).await);
        assert!(!store.remove("b1", ticket.generation).await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn completion_signal_reaches_task_once() {
        let store = Arc::new(OrderStore::new());
        let (ticket, _) = store.put(order("b1", "0.1.1", "s1"), false).await.unwrap();
        let generation = ticket.generation;
        let task = CleanupTask::spawn(Arc::clone(&store), ticket);

        assert!(store.signal_completion("b1", generation).await);
        assert!(!store.signal_completion("b1", generation).await);
        assert_eq!(task.await.unwrap(), Retirement::Confirmed);
        assert!(!store.holds_entry("b1").await);
        assert_eq!(store.live_cleanup_tasks("b1"), 0);
    }

    #[tokio::test]
    async fn completion_for_stale_generation_is_refused() {
        let store = OrderStore::new();
        let (ticket, _) = store.put(order("b1", "0.1.1", "s1"), false).await.unwrap();
        assert!(!store.signal_completion("b1", ticket.generation + 1).await);
        assert!(!store.signal_completion("b2", ticket.generation).await);
    }
}
