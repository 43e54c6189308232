//! Liveness lists — which machines of a machinetype are heartbeating.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use fleetgrid_state::{LivenessList, StateResult};

use crate::book::HeartbeatBook;

/// A managed machine present in the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member<'a> {
    pub machine: &'a str,
    pub machinetype: &'a str,
}

impl HeartbeatBook {
    /// Rewrite the liveness list of every heartbeat-monitored machinetype.
    ///
    /// `windows` maps machinetype → heartbeat window in seconds. A machine is
    /// alive when its newest heartbeat is at most one window old. Heartbeat
    /// entries of machines that are no longer members are dropped.
    pub fn refresh_liveness(
        &self,
        space: &str,
        windows: &BTreeMap<String, u64>,
        members: &[Member<'_>],
        now: u64,
    ) -> StateResult<Vec<LivenessList>> {
        let heartbeats: HashMap<String, u64> = self
            .store
            .list_heartbeats(space)?
            .into_iter()
            .map(|entry| (entry.machine, entry.heartbeat_time))
            .collect();

        let mut lists = Vec::with_capacity(windows.len());
        for (machinetype, window) in windows {
            let mut machines: Vec<String> = members
                .iter()
                .filter(|m| m.machinetype == machinetype.as_str())
                .filter(|m| {
                    heartbeats
                        .get(m.machine)
                        .is_some_and(|at| now.saturating_sub(*at) <= *window)
                })
                .map(|m| m.machine.to_string())
                .collect();
            machines.sort();

            let list = LivenessList {
                space: space.to_string(),
                machinetype: machinetype.clone(),
                machines,
                updated_at: now,
            };
            self.store.put_liveness(&list)?;
            debug!(%space, %machinetype, alive = list.machines.len(), "liveness list refreshed");
            lists.push(list);
        }

        let present: HashSet<&str> = members.iter().map(|m| m.machine).collect();
        let mut pruned = 0usize;
        for machine in heartbeats.keys() {
            if !present.contains(machine.as_str()) && self.store.delete_heartbeat(space, machine)? {
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(%space, pruned, "stale heartbeat entries removed");
        }

        Ok(lists)
    }
}
