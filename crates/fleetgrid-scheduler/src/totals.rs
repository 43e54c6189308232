//! Totals folder.
//!
//! Re-derives every counter from the full set of machine records of a space.
//! Counters are never patched incrementally across cycles, so a missed event
//! cannot make them drift.

use std::collections::BTreeMap;

use fleetgrid_state::{MachineRecord, MachineState};

use crate::counters::{MachinetypeCounters, SpaceTotals};

/// Fold `records` into fresh space totals and machinetype counters.
///
/// Every record counts toward the space totals. Only records whose
/// machinetype is configured count toward that machinetype.
pub fn fold<'a>(
    records: impl IntoIterator<Item = &'a MachineRecord>,
    counters: &mut BTreeMap<String, MachinetypeCounters>,
    now: u64,
) -> SpaceTotals {
    for c in counters.values_mut() {
        c.reset();
    }

    let mut totals = SpaceTotals::default();
    for record in records {
        let starting = matches!(record.state, MachineState::Starting | MachineState::Unknown);
        let running = record.state == MachineState::Running;

        totals.total_machines += 1;
        totals.total_processors += record.processors;
        if starting {
            totals.starting_processors += record.processors;
        }
        if running {
            totals.running_machines += 1;
            totals.running_processors += record.processors;
            totals.running_hs06 += record.weight();
        }

        let Some(c) = record
            .machinetype
            .as_deref()
            .and_then(|mt| counters.get_mut(mt))
        else {
            continue;
        };

        c.total_machines += 1;
        c.total_processors += record.processors;
        if starting {
            c.starting_processors += record.processors;
            c.not_passed_fizzle += 1;
        }
        if running {
            c.running_machines += 1;
            c.running_processors += record.processors;
            c.running_hs06 += record.weight();
            let started = record.started_time.unwrap_or(now);
            if now.saturating_sub(started) < c.config.fizzle_seconds {
                c.not_passed_fizzle += 1;
            }
        }
        if (starting || running)
            && let Some(weighted) = c.weighted(record.weight())
        {
            c.weighted_machines += weighted;
        }
    }

    totals
}
