//! The provider contract.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use fleetgrid_state::MachineState;

use crate::error::{ProviderError, ProviderResult};

/// What a backend reports about one machine.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedMachine {
    pub name: String,
    /// `None` for machines that do not belong to this scheduler.
    pub machinetype: Option<String>,
    pub state: MachineState,
    pub processors: u32,
    pub ip: Option<String>,
    pub zone: Option<String>,
    pub provider_uuid: Option<String>,
    pub created_time: Option<u64>,
    pub hs06: Option<f64>,
    /// Exit message left by the machine, `"NNN text"`.
    pub shutdown_message: Option<String>,
    pub heartbeat_time: Option<u64>,
}

impl ObservedMachine {
    /// A bare observation with every optional field unset.
    pub fn new(name: &str, machinetype: Option<&str>, state: MachineState, processors: u32) -> Self {
        Self {
            name: name.to_string(),
            machinetype: machinetype.map(str::to_string),
            state,
            processors,
            ip: None,
            zone: None,
            provider_uuid: None,
            created_time: None,
            hs06: None,
            shutdown_message: None,
            heartbeat_time: None,
        }
    }
}

/// One creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineRequest {
    pub name: String,
    pub machinetype: String,
    pub min_processors: u32,
    pub max_processors: Option<u32>,
    /// Deadline after which the machine should wind itself down.
    pub shutdown_time: Option<u64>,
    pub created_time: u64,
}

/// Session facts learned while connecting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Processor quota exposed by the backend, if any.
    pub processors_quota: Option<u32>,
}

/// A backend holding the machines of one space.
///
/// Every call may block on network I/O; callers bound them with
/// [`with_timeout`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registered provider name.
    fn kind(&self) -> &str;

    /// Establish or refresh the session. Idempotent.
    async fn connect(&self) -> ProviderResult<ConnectInfo>;

    /// Full snapshot of the machines visible to this credential, foreign
    /// machines included (with `machinetype: None`).
    async fn list_machines(&self) -> ProviderResult<Vec<ObservedMachine>>;

    /// Request one new machine. A failed call leaves nothing behind.
    async fn create_machine(&self, request: &MachineRequest) -> ProviderResult<ObservedMachine>;

    /// Request termination. Deleting an already-gone machine succeeds.
    async fn delete_machine(&self, name: &str) -> ProviderResult<()>;
}

/// Await a provider call for at most `seconds`.
pub async fn with_timeout<T, F>(operation: &str, seconds: u64, call: F) -> ProviderResult<T>
where
    F: Future<Output = ProviderResult<T>>,
{
    match tokio::time::timeout(Duration::from_secs(seconds), call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            operation: operation.to_string(),
            seconds,
        }),
    }
}
