//! Monitoring sinks.

use tracing::{debug, info};

use fleetgrid_state::{AccountingRecord, SpaceSnapshot, StateStore};

/// Destination for accounting records and cycle snapshots.
///
/// Calls happen inside a space's cycle; an error is logged by the caller and
/// never ends the cycle.
pub trait MonitoringSink: Send + Sync {
    fn record_accounting(&self, record: &AccountingRecord) -> anyhow::Result<()>;

    fn record_snapshot(&self, snapshot: &SpaceSnapshot) -> anyhow::Result<()>;
}

/// Snapshots kept per space unless configured otherwise.
const DEFAULT_SNAPSHOT_RETENTION: usize = 1440;

/// Persists everything in the state store.
#[derive(Clone)]
pub struct StoreSink {
    state: StateStore,
    retention: usize,
}

impl StoreSink {
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            retention: DEFAULT_SNAPSHOT_RETENTION,
        }
    }

    /// Keep at most `retention` snapshots per space.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }
}

impl MonitoringSink for StoreSink {
    fn record_accounting(&self, record: &AccountingRecord) -> anyhow::Result<()> {
        self.state.put_accounting(record)?;
        info!(
            space = %record.space,
            machine = %record.machine,
            machinetype = %record.machinetype,
            wall_seconds = record.wall_seconds,
            cpu_seconds = record.cpu_seconds,
            aborted = record.aborted,
            message = record.shutdown_message.as_deref().unwrap_or(""),
            "accounting record written"
        );
        Ok(())
    }

    fn record_snapshot(&self, snapshot: &SpaceSnapshot) -> anyhow::Result<()> {
        self.state.put_snapshot(snapshot, self.retention)?;
        debug!(
            space = %snapshot.space,
            epoch = snapshot.epoch,
            total_processors = snapshot.total_processors,
            running_processors = snapshot.running_processors,
            "snapshot written"
        );
        Ok(())
    }
}

/// Newest snapshot of every space that has published its info.
pub fn latest_snapshots(state: &StateStore) -> anyhow::Result<Vec<SpaceSnapshot>> {
    let mut snapshots = Vec::new();
    for info in state.list_space_info()? {
        if let Some(latest) = state.list_snapshots(&info.name, 1)?.into_iter().next() {
            snapshots.push(latest);
        }
    }
    Ok(snapshots)
}
