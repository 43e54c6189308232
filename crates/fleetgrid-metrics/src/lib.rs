//! fleetgrid-metrics — the monitoring side channel of a cycle.
//!
//! Every stopped machine yields one accounting record, and every cycle yields
//! one snapshot of its space's counters. Both are handed to a
//! [`MonitoringSink`]; the snapshots can be rendered for Prometheus.
//!
//! # Architecture
//!
//! ```text
//! Space cycle
//!   ├── record_accounting() ← once per machine stop
//!   └── record_snapshot()   ← once per cycle
//!         │
//!         ▼
//! MonitoringSink (StoreSink → StateStore)
//!
//! Prometheus exposition
//!   └── render_prometheus() ← latest snapshot of every space
//! ```

pub mod prometheus;
pub mod sink;

pub use prometheus::render_prometheus;
pub use sink::{MonitoringSink, StoreSink, latest_snapshots};
