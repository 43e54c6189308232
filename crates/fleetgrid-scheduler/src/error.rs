//! Scheduler error types.

use thiserror::Error;

use fleet_core::ConfigError;
use fleetgrid_provider::ProviderError;
use fleetgrid_state::StateError;

/// Errors raised while running one step of a cycle.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// A cycle that ended early. The space is retried fresh next cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("space {space}: connect failed: {source}")]
    Connect {
        space: String,
        #[source]
        source: ProviderError,
    },

    #[error("space {space}: observing machines failed: {source}")]
    Observe {
        space: String,
        #[source]
        source: SchedulerError,
    },
}
