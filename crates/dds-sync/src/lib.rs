//! Direct data synchronization pipeline
//!
//! Replicates a vendor's change-capture extracts into an analytical
//! warehouse. The pipeline discovers extract archives for a time window,
//! retrieves and reassembles multi-part archives into object storage,
//! unpacks them, parses the embedded manifest into schema deltas and data
//! change entries, applies both to the warehouse, and advances a durable
//! cursor once the whole chain commits.
//!
//! Steps chain across execution-unit boundaries through the [`state::StepState`]
//! envelope and a [`dispatch::StepDispatcher`]; everything durable lives in
//! object storage, the warehouse, and the cursor table.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod api;
pub mod config;
pub mod cursor;
pub mod dispatch;
pub mod error;
pub mod lease;
pub mod loader;
pub mod manifest;
pub mod orchestrator;
pub mod retrieve;
pub mod schema;
pub mod state;
pub mod storage;
pub mod unpack;
pub mod warehouse;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use orchestrator::Orchestrator;
pub use state::{Step, StepOutcome, StepState};
