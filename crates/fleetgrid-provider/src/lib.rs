//! fleetgrid-provider — the seam between the scheduler and real backends.
//!
//! A provider creates, lists, and deletes machines in one space. It owns no
//! scheduling logic: it reports what the backend sees and carries out the
//! requests the scheduler makes.
//!
//! # Components
//!
//! - **`adapter`** — the `Provider` trait and the observation types it speaks
//! - **`registry`** — provider name → factory, resolved once at startup
//! - **`simulated`** — in-memory backend for development and tests

pub mod adapter;
pub mod error;
pub mod registry;
pub mod simulated;

pub use adapter::{ConnectInfo, MachineRequest, ObservedMachine, Provider, with_timeout};
pub use error::{ProviderError, ProviderResult};
pub use registry::{ProviderFactory, ProviderRegistry};
pub use simulated::{BootMode, SimulatedOptions, SimulatedProvider};
