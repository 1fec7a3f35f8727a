//! Update orders.
//!
//! At most one order is pending per board. Each live order owns exactly one
//! cleanup task that retires it on confirmation, overwrite or expiry.

mod cleanup;
mod lifecycle;
mod order;
mod store;

pub use cleanup::{CleanupTask, Retirement};
pub use lifecycle::{Download, OrderManager};
pub use order::UpdateOrder;
pub use store::{CleanupTicket, Generation, OrderConflict, OrderHandle, OrderStore};
