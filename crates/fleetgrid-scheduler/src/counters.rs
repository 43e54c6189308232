//! Per-machinetype and space-wide counters.

use fleet_core::MachinetypeConfig;
use fleetgrid_state::MachinetypeSnapshot;

/// Runtime aggregates of one machinetype, re-derived every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct MachinetypeCounters {
    pub config: MachinetypeConfig,
    pub total_machines: u32,
    pub total_processors: u32,
    pub starting_processors: u32,
    pub running_machines: u32,
    pub running_processors: u32,
    pub running_hs06: f64,
    /// Running and starting weight divided by the target share. Lower means
    /// further below target.
    pub weighted_machines: f64,
    /// Machines that might still turn out to be aborts.
    pub not_passed_fizzle: u32,
    /// Persisted; never decreases.
    pub last_abort_time: u64,
}

impl MachinetypeCounters {
    pub fn new(config: MachinetypeConfig, last_abort_time: u64) -> Self {
        Self {
            config,
            total_machines: 0,
            total_processors: 0,
            starting_processors: 0,
            running_machines: 0,
            running_processors: 0,
            running_hs06: 0.0,
            weighted_machines: 0.0,
            not_passed_fizzle: 0,
            last_abort_time,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Zero the per-cycle counters; `last_abort_time` is kept.
    pub fn reset(&mut self) {
        self.total_machines = 0;
        self.total_processors = 0;
        self.starting_processors = 0;
        self.running_machines = 0;
        self.running_processors = 0;
        self.running_hs06 = 0.0;
        self.weighted_machines = 0.0;
        self.not_passed_fizzle = 0;
    }

    /// Raise `last_abort_time`, never lowering it.
    pub fn note_abort(&mut self, at: u64) {
        self.last_abort_time = self.last_abort_time.max(at);
    }

    /// Demand contributed by `weight` worth of machines, if the type is enabled.
    pub fn weighted(&self, weight: f64) -> Option<f64> {
        (self.config.target_share > 0.0).then(|| weight / self.config.target_share)
    }

    /// Expected weight of a new machine, scaled by the capacity per
    /// processor of this type's running machines.
    pub fn expected_weight(&self, processors: u32) -> f64 {
        let processors = f64::from(processors);
        if self.running_processors > 0 && self.running_hs06 > 0.0 {
            processors * self.running_hs06 / f64::from(self.running_processors)
        } else {
            processors
        }
    }

    pub fn snapshot(&self) -> MachinetypeSnapshot {
        MachinetypeSnapshot {
            name: self.config.name.clone(),
            target_share: self.config.target_share,
            total_machines: self.total_machines,
            total_processors: self.total_processors,
            starting_processors: self.starting_processors,
            running_machines: self.running_machines,
            running_processors: self.running_processors,
            running_hs06: self.running_hs06,
            weighted_machines: self.weighted_machines,
            not_passed_fizzle: self.not_passed_fizzle,
            last_abort_time: self.last_abort_time,
        }
    }
}

/// Space-wide totals, foreign machines included.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpaceTotals {
    pub total_machines: u32,
    pub total_processors: u32,
    pub starting_processors: u32,
    pub running_machines: u32,
    pub running_processors: u32,
    pub running_hs06: f64,
}
