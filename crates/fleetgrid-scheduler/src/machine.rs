//! Machine state machine.
//!
//! ```text
//! unknown → starting → {failed, running, shutdown} → deleting → {gone, failed}
//! ```
//!
//! States only move forward, except that any state may drop to `failed` when
//! the backend reports an error. Stored and observed states are merged once
//! per cycle; the first time a machine is seen stopped, its stop time is
//! stamped and a single [`StopEvent`] is produced.

use fleetgrid_provider::ObservedMachine;
use fleetgrid_state::{AccountingRecord, MachineRecord, MachineState};

/// Exit codes in this band mark an explicit abort.
pub const ABORT_CODES: std::ops::RangeInclusive<u32> = 300..=699;

/// A provider that cannot tell yet reports `unknown`; treat it as booting.
pub fn classify(state: MachineState) -> MachineState {
    match state {
        MachineState::Unknown => MachineState::Starting,
        other => other,
    }
}

fn rank(state: MachineState) -> u8 {
    match state {
        MachineState::Unknown | MachineState::Starting => 0,
        MachineState::Running => 1,
        MachineState::Shutdown | MachineState::Failed => 2,
        MachineState::Deleting => 3,
    }
}

/// Combine the stored state with what the provider reports now.
///
/// `failed` always wins, and a failed record stays failed: only eviction
/// moves it on. Otherwise the furthest-along state wins.
pub fn merge_state(stored: MachineState, observed: MachineState) -> MachineState {
    let stored = classify(stored);
    let observed = classify(observed);
    if observed == MachineState::Failed || stored == MachineState::Failed {
        return MachineState::Failed;
    }
    if rank(observed) > rank(stored) {
        observed
    } else {
        stored
    }
}

/// What changed on a record during one observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transition {
    /// `started_time` was stamped.
    pub started: bool,
    /// `stopped_time` was stamped; stop side effects are due.
    pub stopped: bool,
}

/// Stamp `started_time`/`stopped_time` if the current state calls for it.
///
/// Both are set at most once, so calling this again on the same record is a
/// no-op.
pub fn stamp(record: &mut MachineRecord, now: u64) -> Transition {
    let mut transition = Transition::default();
    if record.state == MachineState::Running && record.started_time.is_none() {
        record.started_time = Some(now);
        transition.started = true;
    }
    if record.state.is_stopped() && record.stopped_time.is_none() {
        record.stopped_time = Some(now);
        transition.stopped = true;
    }
    transition
}

/// Refresh a stored record with a provider observation.
pub fn observe(record: &mut MachineRecord, observed: &ObservedMachine, now: u64) -> Transition {
    record.state = merge_state(record.state, observed.state);
    record.processors = observed.processors.max(1);
    record.updated_time = now;

    if observed.ip.is_some() {
        record.ip.clone_from(&observed.ip);
    }
    if observed.zone.is_some() {
        record.zone.clone_from(&observed.zone);
    }
    if observed.provider_uuid.is_some() {
        record.provider_uuid.clone_from(&observed.provider_uuid);
    }
    if observed.hs06.is_some() {
        record.hs06 = observed.hs06;
    }
    if record.created_time.is_none() {
        record.created_time = observed.created_time;
    }
    record.heartbeat_time = record.heartbeat_time.max(observed.heartbeat_time);
    if record.shutdown_message.is_none() {
        record.shutdown_message.clone_from(&observed.shutdown_message);
    }

    stamp(record, now)
}

/// Build a record for a machine seen for the first time.
pub fn adopt(space: &str, observed: &ObservedMachine, machinetype: Option<&str>, now: u64) -> MachineRecord {
    MachineRecord {
        name: observed.name.clone(),
        space: space.to_string(),
        machinetype: machinetype.map(str::to_string),
        state: classify(observed.state),
        processors: observed.processors.max(1),
        ip: observed.ip.clone(),
        zone: observed.zone.clone(),
        provider_uuid: observed.provider_uuid.clone(),
        created_time: observed.created_time,
        started_time: None,
        updated_time: now,
        stopped_time: None,
        deleted_time: None,
        heartbeat_time: observed.heartbeat_time,
        hs06: observed.hs06,
        shutdown_message: observed.shutdown_message.clone(),
        shutdown_time: None,
    }
}

/// Whether a stopped machine counts as an abort for its machinetype.
///
/// An exit code in [`ABORT_CODES`] decides first. Otherwise the machine
/// aborted if it ran for less than `fizzle_seconds`; a machine that never
/// reached `running` has zero uptime.
pub fn is_abort(record: &MachineRecord, fizzle_seconds: u64) -> bool {
    if record
        .shutdown_code()
        .is_some_and(|code| ABORT_CODES.contains(&code))
    {
        return true;
    }
    let Some(stopped) = record.stopped_time else {
        return false;
    };
    let uptime = record
        .started_time
        .map_or(0, |started| stopped.saturating_sub(started));
    uptime < fizzle_seconds
}

/// Emitted exactly once per machine, on its first stopped observation.
#[derive(Debug, Clone, PartialEq)]
pub struct StopEvent {
    pub machine: String,
    pub machinetype: String,
    pub state: MachineState,
    pub processors: u32,
    pub hs06: Option<f64>,
    pub created_time: Option<u64>,
    pub started_time: Option<u64>,
    pub stopped_time: u64,
    pub shutdown_message: Option<String>,
    pub aborted: bool,
}

impl StopEvent {
    pub fn new(record: &MachineRecord, machinetype: &str, stopped_time: u64, aborted: bool) -> Self {
        Self {
            machine: record.name.clone(),
            machinetype: machinetype.to_string(),
            state: record.state,
            processors: record.processors,
            hs06: record.hs06,
            created_time: record.created_time,
            started_time: record.started_time,
            stopped_time,
            shutdown_message: record.shutdown_message.clone(),
            aborted,
        }
    }

    /// Seconds between start and stop; zero if never started.
    pub fn wall_seconds(&self) -> u64 {
        self.started_time
            .map_or(0, |started| self.stopped_time.saturating_sub(started))
    }

    pub fn to_accounting(&self, space: &str) -> AccountingRecord {
        let wall_seconds = self.wall_seconds();
        AccountingRecord {
            space: space.to_string(),
            machinetype: self.machinetype.clone(),
            machine: self.machine.clone(),
            processors: self.processors,
            hs06: self.hs06,
            created_time: self.created_time,
            started_time: self.started_time,
            stopped_time: self.stopped_time,
            wall_seconds,
            cpu_seconds: wall_seconds * u64::from(self.processors),
            shutdown_message: self.shutdown_message.clone(),
            aborted: self.aborted,
        }
    }
}
