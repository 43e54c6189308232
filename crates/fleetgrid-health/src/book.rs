//! Heartbeat book — the newest liveness signal per machine.

use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use tracing::debug;

use fleetgrid_state::{StateResult, StateStore};

/// Tracks the latest heartbeat of every managed machine.
///
/// Heartbeats are persisted, so a restart does not make every machine look
/// dead for one window.
#[derive(Clone)]
pub struct HeartbeatBook {
    pub(crate) store: StateStore,
    /// Root of the heartbeat file tree, if machines report through files.
    dir: Option<PathBuf>,
}

impl HeartbeatBook {
    pub fn new(store: StateStore) -> Self {
        Self { store, dir: None }
    }

    /// Also read heartbeat files below `dir`.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Where a machine's heartbeat file is expected.
    pub fn heartbeat_path(&self, space: &str, machine: &str, file: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(space).join(machine).join(file))
    }

    /// Modification time of the machine's heartbeat file, in unix seconds.
    ///
    /// A missing or unreadable file is simply no heartbeat.
    pub fn read_file_heartbeat(&self, space: &str, machine: &str, file: &str) -> Option<u64> {
        let path = self.heartbeat_path(space, machine, file)?;
        let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no heartbeat file");
                return None;
            }
        };
        modified
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs())
    }

    /// Merge every heartbeat source for one machine and persist the newest.
    ///
    /// `observed` is the heartbeat reported by the provider, if any.
    pub fn collect(
        &self,
        space: &str,
        machine: &str,
        heartbeat_file: Option<&str>,
        observed: Option<u64>,
    ) -> StateResult<Option<u64>> {
        let from_file = heartbeat_file.and_then(|file| self.read_file_heartbeat(space, machine, file));
        match observed.max(from_file) {
            Some(at) => self.store.put_heartbeat(space, machine, at).map(Some),
            None => self.store.get_heartbeat(space, machine),
        }
    }
}
