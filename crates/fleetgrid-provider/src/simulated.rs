//! Simulated provider: an in-memory backend.
//!
//! Used for local development spaces and by the test suite. Machines live
//! in a map; the test hooks let callers move machines between
//! states, leave shutdown messages and heartbeats, add foreign machines, and
//! inject failures into the next provider calls.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use fleetgrid_state::MachineState;

use crate::adapter::{ConnectInfo, MachineRequest, ObservedMachine, Provider};
use crate::error::{ProviderError, ProviderResult};

/// State reported for freshly created machines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BootMode {
    /// New machines are running immediately.
    #[default]
    Instant,
    /// New machines stay starting until moved by hand.
    Manual,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedOptions {
    pub boot: BootMode,
    /// Processor quota reported by `connect`.
    pub quota: Option<u32>,
}

impl SimulatedOptions {
    /// Parse the free-form `provider_options` of a space.
    pub fn from_options(options: &HashMap<String, String>) -> ProviderResult<Self> {
        let mut parsed = Self::default();
        for (key, value) in options {
            match key.as_str() {
                "boot" => {
                    parsed.boot = match value.as_str() {
                        "instant" => BootMode::Instant,
                        "manual" => BootMode::Manual,
                        other => {
                            return Err(ProviderError::InvalidOption {
                                option: key.clone(),
                                reason: format!("expected instant or manual, got {other:?}"),
                            });
                        }
                    }
                }
                "quota" => {
                    let quota = value.parse::<u32>().map_err(|e| ProviderError::InvalidOption {
                        option: key.clone(),
                        reason: e.to_string(),
                    })?;
                    parsed.quota = Some(quota);
                }
                other => {
                    return Err(ProviderError::InvalidOption {
                        option: other.to_string(),
                        reason: "unknown option".to_string(),
                    });
                }
            }
        }
        Ok(parsed)
    }
}

#[derive(Debug, Default)]
struct Backend {
    machines: BTreeMap<String, ObservedMachine>,
    failing_connects: u32,
    failing_lists: u32,
    failing_creates: u32,
    failing_deletes: u32,
    created: Vec<String>,
    deleted: Vec<String>,
    next_uuid: u64,
}

/// In-memory provider.
#[derive(Debug)]
pub struct SimulatedProvider {
    options: SimulatedOptions,
    backend: Mutex<Backend>,
}

impl SimulatedProvider {
    pub const KIND: &'static str = "simulated";

    pub fn new(options: SimulatedOptions) -> Self {
        Self {
            options,
            backend: Mutex::new(Backend::default()),
        }
    }

    // ── Test hooks ─────────────────────────────────────────────────

    /// Move a machine to another state. Returns false if it does not exist.
    pub async fn set_state(&self, name: &str, state: MachineState) -> bool {
        let mut backend = self.backend.lock().await;
        match backend.machines.get_mut(name) {
            Some(machine) => {
                machine.state = state;
                true
            }
            None => false,
        }
    }

    /// Stop a machine, leaving an exit message behind.
    pub async fn stop_machine(&self, name: &str, message: Option<&str>) -> bool {
        let mut backend = self.backend.lock().await;
        match backend.machines.get_mut(name) {
            Some(machine) => {
                machine.state = MachineState::Shutdown;
                machine.shutdown_message = message.map(str::to_string);
                true
            }
            None => false,
        }
    }

    pub async fn set_heartbeat(&self, name: &str, at: u64) -> bool {
        let mut backend = self.backend.lock().await;
        match backend.machines.get_mut(name) {
            Some(machine) => {
                machine.heartbeat_time = Some(at);
                true
            }
            None => false,
        }
    }

    /// Add a machine that belongs to somebody else.
    pub async fn add_foreign(&self, name: &str, processors: u32, state: MachineState) {
        let machine = ObservedMachine::new(name, None, state, processors);
        self.backend
            .lock()
            .await
            .machines
            .insert(name.to_string(), machine);
    }

    pub async fn fail_next_connects(&self, count: u32) {
        self.backend.lock().await.failing_connects = count;
    }

    pub async fn fail_next_lists(&self, count: u32) {
        self.backend.lock().await.failing_lists = count;
    }

    pub async fn fail_next_creates(&self, count: u32) {
        self.backend.lock().await.failing_creates = count;
    }

    pub async fn fail_next_deletes(&self, count: u32) {
        self.backend.lock().await.failing_deletes = count;
    }

    /// Names of every machine currently held, sorted.
    pub async fn machine_names(&self) -> Vec<String> {
        self.backend.lock().await.machines.keys().cloned().collect()
    }

    pub async fn machine(&self, name: &str) -> Option<ObservedMachine> {
        self.backend.lock().await.machines.get(name).cloned()
    }

    /// Names passed to successful `create_machine` calls, in order.
    pub async fn created(&self) -> Vec<String> {
        self.backend.lock().await.created.clone()
    }

    /// Names passed to successful `delete_machine` calls, in order.
    pub async fn deleted(&self) -> Vec<String> {
        self.backend.lock().await.deleted.clone()
    }
}

/// Consume one injected failure, if any remain.
fn take_failure(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn kind(&self) -> &str {
        Self::KIND
    }

    async fn connect(&self) -> ProviderResult<ConnectInfo> {
        let mut backend = self.backend.lock().await;
        if take_failure(&mut backend.failing_connects) {
            return Err(ProviderError::Connect("simulated outage".to_string()));
        }
        Ok(ConnectInfo {
            processors_quota: self.options.quota,
        })
    }

    async fn list_machines(&self) -> ProviderResult<Vec<ObservedMachine>> {
        let mut backend = self.backend.lock().await;
        if take_failure(&mut backend.failing_lists) {
            return Err(ProviderError::List("simulated outage".to_string()));
        }
        Ok(backend.machines.values().cloned().collect())
    }

    async fn create_machine(&self, request: &MachineRequest) -> ProviderResult<ObservedMachine> {
        let mut backend = self.backend.lock().await;
        if take_failure(&mut backend.failing_creates) {
            return Err(ProviderError::Create {
                machine: request.name.clone(),
                reason: "simulated quota exceeded".to_string(),
            });
        }

        let state = match self.options.boot {
            BootMode::Instant => MachineState::Running,
            BootMode::Manual => MachineState::Starting,
        };
        backend.next_uuid += 1;
        let mut machine = ObservedMachine::new(
            &request.name,
            Some(&request.machinetype),
            state,
            request.min_processors,
        );
        machine.provider_uuid = Some(format!("sim-{:08}", backend.next_uuid));
        machine.ip = Some(format!(
            "10.0.{}.{}",
            (backend.next_uuid / 250) % 250,
            backend.next_uuid % 250 + 1
        ));
        machine.zone = Some("sim-a".to_string());
        machine.created_time = Some(request.created_time);

        backend
            .machines
            .insert(request.name.clone(), machine.clone());
        backend.created.push(request.name.clone());
        debug!(machine = %request.name, %state, "simulated machine created");
        Ok(machine)
    }

    async fn delete_machine(&self, name: &str) -> ProviderResult<()> {
        let mut backend = self.backend.lock().await;
        if take_failure(&mut backend.failing_deletes) {
            return Err(ProviderError::Delete {
                machine: name.to_string(),
                reason: "simulated backend error".to_string(),
            });
        }
        if backend.machines.remove(name).is_some() {
            backend.deleted.push(name.to_string());
            info!(machine = %name, "simulated machine deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> MachineRequest {
        MachineRequest {
            name: name.to_string(),
            machinetype: "atlas".to_string(),
            min_processors: 2,
            max_processors: None,
            shutdown_time: None,
            created_time: 1000,
        }
    }

    #[test]
    fn options_parse() {
        let mut raw = HashMap::new();
        raw.insert("boot".to_string(), "manual".to_string());
        raw.insert("quota".to_string(), "64".to_string());
        let options = SimulatedOptions::from_options(&raw).unwrap();
        assert_eq!(options.boot, BootMode::Manual);
        assert_eq!(options.quota, Some(64));
    }

    #[test]
    fn options_reject_unknown_keys() {
        let mut raw = HashMap::new();
        raw.insert("region".to_string(), "eu".to_string());
        assert!(SimulatedOptions::from_options(&raw).is_err());
    }

    #[tokio::test]
    async fn create_list_delete() {
        let provider = SimulatedProvider::new(SimulatedOptions::default());
        let created = provider.create_machine(&request("m1")).await.unwrap();
        assert_eq!(created.state, MachineState::Running);
        assert_eq!(created.processors, 2);
        assert_eq!(created.created_time, Some(1000));

        let listed = provider.list_machines().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].machinetype.as_deref(), Some("atlas"));

        provider.delete_machine("m1").await.unwrap();
        assert!(provider.list_machines().await.unwrap().is_empty());
        assert_eq!(provider.deleted().await, vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let provider = SimulatedProvider::new(SimulatedOptions::default());
        assert!(provider.delete_machine("never-existed").await.is_ok());
        assert!(provider.deleted().await.is_empty());
    }

    #[tokio::test]
    async fn manual_boot_starts_in_starting() {
        let provider = SimulatedProvider::new(SimulatedOptions {
            boot: BootMode::Manual,
            quota: None,
        });
        let created = provider.create_machine(&request("m1")).await.unwrap();
        assert_eq!(created.state, MachineState::Starting);

        assert!(provider.set_state("m1", MachineState::Running).await);
        assert_eq!(provider.machine("m1").await.unwrap().state, MachineState::Running);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let provider = SimulatedProvider::new(SimulatedOptions::default());
        provider.fail_next_creates(1).await;

        assert!(provider.create_machine(&request("m1")).await.is_err());
        assert!(provider.machine_names().await.is_empty());
        assert!(provider.create_machine(&request("m2")).await.is_ok());

        provider.fail_next_connects(1).await;
        assert!(provider.connect().await.is_err());
        assert!(provider.connect().await.is_ok());
    }

    #[tokio::test]
    async fn connect_reports_quota() {
        let provider = SimulatedProvider::new(SimulatedOptions {
            boot: BootMode::Instant,
            quota: Some(32),
        });
        assert_eq!(provider.connect().await.unwrap().processors_quota, Some(32));
    }

    #[tokio::test]
    async fn foreign_machines_have_no_machinetype() {
        let provider = SimulatedProvider::new(SimulatedOptions::default());
        provider.add_foreign("web-1", 8, MachineState::Running).await;
        let listed = provider.list_machines().await.unwrap();
        assert_eq!(listed[0].machinetype, None);
        assert_eq!(listed[0].processors, 8);
    }

    #[tokio::test]
    async fn stop_machine_leaves_message() {
        let provider = SimulatedProvider::new(SimulatedOptions::default());
        provider.create_machine(&request("m1")).await.unwrap();
        assert!(provider.stop_machine("m1", Some("300 No more work")).await);

        let machine = provider.machine("m1").await.unwrap();
        assert_eq!(machine.state, MachineState::Shutdown);
        assert_eq!(machine.shutdown_message.as_deref(), Some("300 No more work"));
    }
}
