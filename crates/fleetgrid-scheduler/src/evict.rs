//! Eviction policy.
//!
//! Every managed machine is checked against five triggers, in order; the
//! first match decides the reason. A machine whose last deletion attempt is
//! less than [`DELETE_RETRY_SECONDS`] old is left alone.

use fleet_core::MachinetypeConfig;
use fleetgrid_state::{MachineRecord, MachineState};

/// Deletions are not retried faster than this.
pub const DELETE_RETRY_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// Still starting after `max_starting_seconds`, or creation time unknown.
    FailedToStart,
    /// Already shut down, failed, or deleting.
    Cleanup,
    ExceededWallclock,
    HeartbeatLost,
    PassedShutdownTime,
}

impl EvictionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailedToStart => "failed_to_start",
            Self::Cleanup => "cleanup",
            Self::ExceededWallclock => "exceeded_wallclock",
            Self::HeartbeatLost => "heartbeat_lost",
            Self::PassedShutdownTime => "passed_shutdown_time",
        }
    }

    /// Shutdown message recorded on the machine.
    pub fn message(self) -> &'static str {
        match self {
            Self::FailedToStart => "700 Failed to start",
            Self::Cleanup => "700 Removed after stopping",
            Self::ExceededWallclock => "700 Exceeded max wallclock",
            Self::HeartbeatLost => "700 Heartbeat lost",
            Self::PassedShutdownTime => "700 Passed shutdown time",
        }
    }
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Space-level inputs to the policy.
#[derive(Debug, Clone, Copy)]
pub struct EvictionContext {
    pub max_starting_seconds: u64,
    pub space_shutdown_time: Option<u64>,
    pub now: u64,
}

/// Decide whether `record` must be deleted this cycle, and why.
pub fn eviction_reason(
    record: &MachineRecord,
    config: &MachinetypeConfig,
    ctx: &EvictionContext,
) -> Option<EvictionReason> {
    let now = ctx.now;
    if record
        .deleted_time
        .is_some_and(|at| now < at.saturating_add(DELETE_RETRY_SECONDS))
    {
        return None;
    }

    match record.state {
        MachineState::Starting | MachineState::Unknown => {
            let stuck = record
                .created_time
                .is_none_or(|created| now.saturating_sub(created) > ctx.max_starting_seconds);
            stuck.then_some(EvictionReason::FailedToStart)
        }
        MachineState::Shutdown | MachineState::Failed | MachineState::Deleting => {
            Some(EvictionReason::Cleanup)
        }
        MachineState::Running => running_reason(record, config, ctx),
    }
}

fn running_reason(
    record: &MachineRecord,
    config: &MachinetypeConfig,
    ctx: &EvictionContext,
) -> Option<EvictionReason> {
    let now = ctx.now;

    if let Some(started) = record.started_time {
        if now > started.saturating_add(config.max_wallclock_seconds) {
            return Some(EvictionReason::ExceededWallclock);
        }

        if let Some(window) = config.heartbeat_window() {
            let age = now.saturating_sub(started);
            let stale = record
                .heartbeat_time
                .is_none_or(|beat| now.saturating_sub(beat) > window);
            if age > config.fizzle_seconds && age > window && stale {
                return Some(EvictionReason::HeartbeatLost);
            }
        }
    }

    let deadline = match (record.shutdown_time, ctx.space_shutdown_time) {
        (Some(own), Some(space)) => Some(own.min(space)),
        (own, space) => own.or(space),
    };
    if deadline.is_some_and(|deadline| now > deadline) {
        return Some(EvictionReason::PassedShutdownTime);
    }

    None
}
