//! fleetgrid-scheduler — keeps each space filled in proportion to its
//! machinetypes' target shares.
//!
//! Every cycle observes what the provider reports, merges it with the
//! stored records, re-derives all counters from scratch, and then decides
//! which machines to delete and how many to create.
//!
//! # Architecture
//!
//! ```text
//! Space::run_cycle(now)
//!   ├── connect            → ConnectInfo (quota tightens processors_limit)
//!   ├── observe            → machine::{observe, adopt, stamp}
//!   │   ├── stop handling  → last_abort_time, AccountingRecord
//!   │   └── totals::fold   → MachinetypeCounters, SpaceTotals
//!   ├── snapshot           → MonitoringSink
//!   ├── space info         → StateStore
//!   ├── evict              → evict::eviction_reason → Provider::delete_machine
//!   ├── liveness           → HeartbeatBook::refresh_liveness
//!   └── allocate           → allocate::select → Provider::create_machine
//! ```
//!
//! A failed connect or observe ends the cycle; later steps fail on their own.

pub mod allocate;
pub mod counters;
pub mod error;
pub mod evict;
pub mod machine;
pub mod space;
pub mod totals;

#[cfg(test)]
mod testing;

pub use allocate::{Ineligible, StopReason};
pub use counters::{MachinetypeCounters, SpaceTotals};
pub use error::{CycleError, SchedulerError, SchedulerResult};
pub use evict::EvictionReason;
pub use machine::StopEvent;
pub use space::{CycleReport, CycleStep, Space, epoch_secs};
