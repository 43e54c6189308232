//! Domain types for the FleetGrid record store.
//!
//! These types represent machines, machinetype abort history, and the
//! monitoring records derived from them. All types are serializable to/from
//! JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Name of a space (one configured backend).
pub type SpaceName = String;

/// Provider-local-safe machine name, unique within a space.
pub type MachineName = String;

// ── Machine ────────────────────────────────────────────────────────

/// Lifecycle state of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Unknown,
    Starting,
    Running,
    Shutdown,
    Failed,
    Deleting,
}

impl MachineState {
    /// Shutdown, failed, or deleting: the machine does no more useful work.
    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Shutdown | Self::Failed | Self::Deleting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Shutdown => "shutdown",
            Self::Failed => "failed",
            Self::Deleting => "deleting",
        }
    }
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one machine. Times are unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineRecord {
    pub name: MachineName,
    pub space: SpaceName,
    /// `None` for machines this scheduler does not manage.
    pub machinetype: Option<String>,
    pub state: MachineState,
    pub processors: u32,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    /// Opaque backend handle.
    #[serde(default)]
    pub provider_uuid: Option<String>,
    pub created_time: Option<u64>,
    /// Set the first time the machine is seen running, never cleared.
    pub started_time: Option<u64>,
    pub updated_time: u64,
    /// Set the first time the machine is seen stopped, never cleared.
    pub stopped_time: Option<u64>,
    /// Time of the most recent deletion attempt.
    pub deleted_time: Option<u64>,
    pub heartbeat_time: Option<u64>,
    /// Benchmark capacity weight; `processors` stands in when unknown.
    #[serde(default)]
    pub hs06: Option<f64>,
    /// `"NNN text"` message describing why the machine stopped.
    #[serde(default)]
    pub shutdown_message: Option<String>,
    /// Job-level deadline handed to the machine at creation.
    #[serde(default)]
    pub shutdown_time: Option<u64>,
}

impl MachineRecord {
    /// A freshly requested machine, not yet observed through the provider.
    pub fn new_starting(
        space: &str,
        name: &str,
        machinetype: &str,
        processors: u32,
        now: u64,
    ) -> Self {
        Self {
            name: name.to_string(),
            space: space.to_string(),
            machinetype: Some(machinetype.to_string()),
            state: MachineState::Starting,
            processors,
            ip: None,
            zone: None,
            provider_uuid: None,
            created_time: Some(now),
            started_time: None,
            updated_time: now,
            stopped_time: None,
            deleted_time: None,
            heartbeat_time: None,
            hs06: None,
            shutdown_message: None,
            shutdown_time: None,
        }
    }

    /// Build the composite key for the machines table.
    pub fn table_key(&self) -> String {
        machine_key(&self.space, &self.name)
    }

    /// Capacity weight used for fair-share accounting.
    ///
    /// An `hs06` that is not a finite, non-negative number is ignored.
    pub fn weight(&self) -> f64 {
        self.hs06
            .filter(|w| w.is_finite() && *w >= 0.0)
            .unwrap_or(f64::from(self.processors))
    }

    /// Numeric code of the shutdown message, if it has one.
    pub fn shutdown_code(&self) -> Option<u32> {
        let message = self.shutdown_message.as_deref()?;
        message.split_whitespace().next()?.parse().ok()
    }
}

pub fn machine_key(space: &str, machine: &str) -> String {
    format!("{space}:{machine}")
}

// ── Machinetype ───────────────────────────────────────────────────

/// Durable per-machinetype state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachinetypeRecord {
    pub space: SpaceName,
    pub machinetype: String,
    /// Never decreases.
    pub last_abort_time: u64,
}

impl MachinetypeRecord {
    pub fn table_key(&self) -> String {
        machinetype_key(&self.space, &self.machinetype)
    }
}

pub fn machinetype_key(space: &str, machinetype: &str) -> String {
    format!("{space}:{machinetype}")
}

// ── Space info ────────────────────────────────────────────────────

/// Space metadata published once per cycle for external registries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpaceInfo {
    pub name: SpaceName,
    pub provider: String,
    pub processors_limit: Option<u32>,
    pub shutdown_time: Option<u64>,
    pub machinetypes: Vec<String>,
    pub total_machines: u32,
    pub total_processors: u32,
    pub running_machines: u32,
    pub running_processors: u32,
    pub version: String,
    pub updated_at: u64,
}

// ── Snapshots ─────────────────────────────────────────────────────

/// Point-in-time counters of one machinetype.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachinetypeSnapshot {
    pub name: String,
    pub target_share: f64,
    pub total_machines: u32,
    pub total_processors: u32,
    pub starting_processors: u32,
    pub running_machines: u32,
    pub running_processors: u32,
    pub running_hs06: f64,
    pub weighted_machines: f64,
    pub not_passed_fizzle: u32,
    pub last_abort_time: u64,
}

/// Point-in-time counters of a space, taken once per cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpaceSnapshot {
    pub space: SpaceName,
    pub epoch: u64,
    pub processors_limit: Option<u32>,
    pub total_machines: u32,
    pub total_processors: u32,
    pub starting_processors: u32,
    pub running_machines: u32,
    pub running_processors: u32,
    pub running_hs06: f64,
    pub machinetypes: Vec<MachinetypeSnapshot>,
}

impl SpaceSnapshot {
    /// Zero-padded epoch keeps keys in chronological order.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.space, self.epoch)
    }
}

// ── Accounting ────────────────────────────────────────────────────

/// Terminal usage record, written once per stopped machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountingRecord {
    pub space: SpaceName,
    pub machinetype: String,
    pub machine: MachineName,
    pub processors: u32,
    pub hs06: Option<f64>,
    pub created_time: Option<u64>,
    pub started_time: Option<u64>,
    pub stopped_time: u64,
    pub wall_seconds: u64,
    pub cpu_seconds: u64,
    pub shutdown_message: Option<String>,
    pub aborted: bool,
}

impl AccountingRecord {
    pub fn table_key(&self) -> String {
        machine_key(&self.space, &self.machine)
    }
}

// ── Heartbeats ────────────────────────────────────────────────────

/// Latest liveness signal received from a machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatEntry {
    pub space: SpaceName,
    pub machine: MachineName,
    pub heartbeat_time: u64,
}

impl HeartbeatEntry {
    pub fn table_key(&self) -> String {
        machine_key(&self.space, &self.machine)
    }
}

/// Machines of one machinetype with a fresh heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LivenessList {
    pub space: SpaceName,
    pub machinetype: String,
    pub machines: Vec<MachineName>,
    pub updated_at: u64,
}

impl LivenessList {
    pub fn table_key(&self) -> String {
        machinetype_key(&self.space, &self.machinetype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_states() {
        assert!(MachineState::Shutdown.is_stopped());
        assert!(MachineState::Failed.is_stopped());
        assert!(MachineState::Deleting.is_stopped());
        assert!(!MachineState::Running.is_stopped());
        assert!(!MachineState::Starting.is_stopped());
        assert!(!MachineState::Unknown.is_stopped());
    }

    #[test]
    fn weight_prefers_hs06() {
        let mut m = MachineRecord::new_starting("s", "m", "mt", 4, 100);
        assert_eq!(m.weight(), 4.0);
        m.hs06 = Some(42.5);
        assert_eq!(m.weight(), 42.5);
    }

    #[test]
    fn unusable_hs06_falls_back_to_processors() {
        let mut m = MachineRecord::new_starting("s", "m", "mt", 4, 100);
        for bad in [f64::NAN, f64::INFINITY, -1.0] {
            m.hs06 = Some(bad);
            assert_eq!(m.weight(), 4.0);
        }
    }

    #[test]
    fn shutdown_code_parsing() {
        let mut m = MachineRecord::new_starting("s", "m", "mt", 1, 100);
        assert_eq!(m.shutdown_code(), None);
        m.shutdown_message = Some("300 No more work".to_string());
        assert_eq!(m.shutdown_code(), Some(300));
        m.shutdown_message = Some("finished".to_string());
        assert_eq!(m.shutdown_code(), None);
    }

    #[test]
    fn snapshot_keys_sort_by_epoch() {
        let snap = |epoch| SpaceSnapshot {
            space: "s".to_string(),
            epoch,
            processors_limit: None,
            total_machines: 0,
            total_processors: 0,
            starting_processors: 0,
            running_machines: 0,
            running_processors: 0,
            running_hs06: 0.0,
            machinetypes: Vec::new(),
        };
        assert!(snap(999).table_key() < snap(1000).table_key());
    }
}
