//! fleetgrid-state — durable records for FleetGrid.
//!
//! Backed by [redb](https://docs.rs/redb). Holds one record per managed
//! machine, the abort history of every machinetype, and the monitoring side
//! channel (space info, per-cycle snapshots, accounting records, heartbeats,
//! liveness lists).
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Keys are `{space}` or `{space}:{entity}`, so everything belonging to a
//! space is reachable through a prefix scan.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and is shared by every space's cycle task.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
