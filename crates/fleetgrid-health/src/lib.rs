//! fleetgrid-health — heartbeat tracking for managed machines.
//!
//! Machines prove they are alive by touching a heartbeat file, or through
//! whatever liveness signal their provider reports. The scheduler evicts
//! running machines whose heartbeat goes stale.
//!
//! # Architecture
//!
//! ```text
//! HeartbeatBook
//!   ├── collect()          ← provider observation + heartbeat file mtime
//!   │   └── StateStore     (newest heartbeat per machine)
//!   └── refresh_liveness() → LivenessList per machinetype
//!                            (prunes entries of vanished machines)
//! ```
//!
//! Heartbeat files live at `<heartbeat_dir>/<space>/<machine>/<file>`; only
//! their modification time matters.

pub mod book;
pub mod liveness;

pub use book::HeartbeatBook;
pub use liveness::Member;
