//! fleetota Update Server Library
//!
//! Core functionality for the update server:
//! - Release catalog over the storage directory
//! - Signed release upload ingestion
//! - Update order store, cleanup tasks and lifecycle state machine
//! - HTTP routes for boards and operators

pub mod boards;
pub mod catalog;
pub mod error;
pub mod orders;
pub mod routes;
pub mod upload;

pub use error::ServiceError;
