//! StateStore — redb-backed persistence for FleetGrid.
//!
//! Provides typed operations over machine records, machinetype abort
//! history, and the monitoring tables. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
///
/// The two-argument form names the record key the error belongs to.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
    ($variant:ident, $key:expr) => {
        |e| StateError::$variant {
            key: $key.to_string(),
            reason: e.to_string(),
        }
    };
}

/// Key range covering exactly the `{space}:` prefix. `;` sorts right after `:`.
fn space_bounds(space: &str) -> (String, String) {
    (format!("{space}:"), format!("{space};"))
}

/// Thread-safe record store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in ALL {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON helpers ───────────────────────────────────────

    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Encode, key))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Decode, key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// All values whose key starts with `{space}:`, in key order.
    fn list_for_space<T: DeserializeOwned>(&self, table: JsonTable, space: &str) -> StateResult<Vec<T>> {
        let (lo, hi) = space_bounds(space);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(lo.as_str()..hi.as_str()).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let item = serde_json::from_slice(value.value()).map_err(map_err!(Decode, key.value()))?;
            results.push(item);
        }
        Ok(results)
    }

    fn remove(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Machines ───────────────────────────────────────────────────

    /// Insert or update a machine record.
    pub fn put_machine(&self, machine: &MachineRecord) -> StateResult<()> {
        self.put_json(MACHINES, &machine.table_key(), machine)
    }

    pub fn get_machine(&self, space: &str, name: &str) -> StateResult<Option<MachineRecord>> {
        self.get_json(MACHINES, &machine_key(space, name))
    }

    /// List every stored machine record of a space.
    pub fn list_machines(&self, space: &str) -> StateResult<Vec<MachineRecord>> {
        self.list_for_space(MACHINES, space)
    }

    /// Delete a machine record. Returns true if it existed.
    pub fn delete_machine(&self, space: &str, name: &str) -> StateResult<bool> {
        let key = machine_key(space, name);
        let existed = self.remove(MACHINES, &key)?;
        debug!(%key, existed, "machine record deleted");
        Ok(existed)
    }

    // ── Machinetypes ───────────────────────────────────────────────

    /// Persisted last abort time of a machinetype, if it ever aborted.
    pub fn get_last_abort_time(&self, space: &str, machinetype: &str) -> StateResult<Option<u64>> {
        let record: Option<MachinetypeRecord> =
            self.get_json(MACHINETYPES, &machinetype_key(space, machinetype))?;
        Ok(record.map(|r| r.last_abort_time))
    }

    /// Raise the last abort time of a machinetype to `at`.
    ///
    /// The stored value never decreases; returns the value now stored.
    pub fn put_last_abort_time(&self, space: &str, machinetype: &str, at: u64) -> StateResult<u64> {
        let key = machinetype_key(space, machinetype);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored;
        {
            let mut table = txn.open_table(MACHINETYPES).map_err(map_err!(Table))?;
            let previous = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let record: MachinetypeRecord =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Decode, key))?;
                    Some(record.last_abort_time)
                }
                None => None,
            };
            stored = previous.map_or(at, |p| p.max(at));
            if previous != Some(stored) {
                let record = MachinetypeRecord {
                    space: space.to_string(),
                    machinetype: machinetype.to_string(),
                    last_abort_time: stored,
                };
                let bytes = serde_json::to_vec(&record).map_err(map_err!(Encode, key))?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, last_abort_time = stored, "machinetype abort time stored");
        Ok(stored)
    }

    // ── Space info ─────────────────────────────────────────────────

    pub fn put_space_info(&self, info: &SpaceInfo) -> StateResult<()> {
        self.put_json(SPACES, &info.name, info)
    }

    pub fn get_space_info(&self, space: &str) -> StateResult<Option<SpaceInfo>> {
        self.get_json(SPACES, space)
    }

    /// List the published info of every space.
    pub fn list_space_info(&self) -> StateResult<Vec<SpaceInfo>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SPACES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let info = serde_json::from_slice(value.value()).map_err(map_err!(Decode, key.value()))?;
            results.push(info);
        }
        Ok(results)
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// Store a snapshot and prune the space's history to its newest `keep`
    /// entries, in one transaction. `keep` is at least one.
    pub fn put_snapshot(&self, snapshot: &SpaceSnapshot, keep: usize) -> StateResult<()> {
        let key = snapshot.table_key();
        let bytes = serde_json::to_vec(snapshot).map_err(map_err!(Encode, key))?;
        let (lo, hi) = space_bounds(&snapshot.space);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let pruned;
        {
            let mut table = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;

            let keys: Vec<String> = table
                .range(lo.as_str()..hi.as_str())
                .map_err(map_err!(Read))?
                .map(|item| item.map(|(k, _)| k.value().to_string()))
                .collect::<Result<_, _>>()
                .map_err(map_err!(Read))?;
            pruned = keys.len().saturating_sub(keep.max(1));
            for old in &keys[..pruned] {
                table.remove(old.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if pruned > 0 {
            debug!(%key, pruned, "old snapshots pruned");
        }
        Ok(())
    }

    /// Most recent snapshots of a space, newest first.
    pub fn list_snapshots(&self, space: &str, limit: usize) -> StateResult<Vec<SpaceSnapshot>> {
        let (lo, hi) = space_bounds(space);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(lo.as_str()..hi.as_str()).map_err(map_err!(Read))?.rev() {
            if results.len() >= limit {
                break;
            }
            let (key, value) = entry.map_err(map_err!(Read))?;
            let snapshot = serde_json::from_slice(value.value()).map_err(map_err!(Decode, key.value()))?;
            results.push(snapshot);
        }
        Ok(results)
    }

    // ── Accounting ─────────────────────────────────────────────────

    pub fn put_accounting(&self, record: &AccountingRecord) -> StateResult<()> {
        self.put_json(ACCOUNTING, &record.table_key(), record)
    }

    pub fn get_accounting(&self, space: &str, machine: &str) -> StateResult<Option<AccountingRecord>> {
        self.get_json(ACCOUNTING, &machine_key(space, machine))
    }

    pub fn list_accounting(&self, space: &str) -> StateResult<Vec<AccountingRecord>> {
        self.list_for_space(ACCOUNTING, space)
    }

    // ── Heartbeats ─────────────────────────────────────────────────

    /// Record a heartbeat, keeping the newest one seen.
    pub fn put_heartbeat(&self, space: &str, machine: &str, at: u64) -> StateResult<u64> {
        let latest = match self.get_heartbeat(space, machine)? {
            Some(previous) if previous >= at => return Ok(previous),
            _ => at,
        };
        let entry = HeartbeatEntry {
            space: space.to_string(),
            machine: machine.to_string(),
            heartbeat_time: latest,
        };
        self.put_json(HEARTBEATS, &entry.table_key(), &entry)?;
        Ok(latest)
    }

    pub fn get_heartbeat(&self, space: &str, machine: &str) -> StateResult<Option<u64>> {
        let entry: Option<HeartbeatEntry> = self.get_json(HEARTBEATS, &machine_key(space, machine))?;
        Ok(entry.map(|e| e.heartbeat_time))
    }

    pub fn list_heartbeats(&self, space: &str) -> StateResult<Vec<HeartbeatEntry>> {
        self.list_for_space(HEARTBEATS, space)
    }

    pub fn delete_heartbeat(&self, space: &str, machine: &str) -> StateResult<bool> {
        self.remove(HEARTBEATS, &machine_key(space, machine))
    }

    // ── Liveness lists ─────────────────────────────────────────────

    pub fn put_liveness(&self, list: &LivenessList) -> StateResult<()> {
        self.put_json(LIVENESS, &list.table_key(), list)
    }

    pub fn get_liveness(&self, space: &str, machinetype: &str) -> StateResult<Option<LivenessList>> {
        self.get_json(LIVENESS, &machinetype_key(space, machinetype))
    }
}
