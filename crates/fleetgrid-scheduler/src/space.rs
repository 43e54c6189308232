//! Space aggregate — one backend and the cycle that manages it.
//!
//! A cycle runs these steps in order:
//!
//! 1. connect to the provider (failure ends the cycle)
//! 2. observe machines, merge them with stored records, fold totals
//!    (failure ends the cycle)
//! 3. emit a monitoring snapshot
//! 4. publish space info
//! 5. run the eviction policy
//! 6. refresh heartbeat liveness lists
//! 7. run the allocation scheduler
//!
//! Steps 3 to 7 are guarded independently: a failure is logged and the next
//! step still runs. Totals are not re-folded after eviction, so capacity freed
//! this cycle becomes visible to allocation next cycle.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleet_core::naming::{machine_name, machinetype_of};
use fleet_core::{MachinetypeConfig, SpaceConfig};
use fleetgrid_health::{HeartbeatBook, Member};
use fleetgrid_metrics::{MonitoringSink, StoreSink};
use fleetgrid_provider::{MachineRequest, Provider, ProviderResult, with_timeout};
use fleetgrid_state::{MachineRecord, MachineState, SpaceInfo, SpaceSnapshot, StateStore};

use crate::allocate::{StopReason, creation_budget, hard_stop, record_creation, select};
use crate::counters::{MachinetypeCounters, SpaceTotals};
use crate::error::{CycleError, SchedulerResult};
use crate::evict::{EvictionContext, EvictionReason, eviction_reason};
use crate::machine::{StopEvent, adopt, is_abort, observe, stamp};
use crate::totals::fold;

/// Cycle steps that are allowed to fail without ending the cycle.
///
/// Eviction and allocation never appear here: their failures are per machine
/// and show up in the report's failure counters instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStep {
    Snapshot,
    SpaceInfo,
    Liveness,
}

/// What one cycle did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Machines whose creation the provider accepted.
    pub created: Vec<String>,
    pub failed_creations: u32,
    /// Machines whose deletion the provider accepted, with the reason.
    pub evicted: Vec<(String, EvictionReason)>,
    pub failed_deletions: u32,
    pub stopped: Vec<StopEvent>,
    pub skipped: Vec<CycleStep>,
    pub allocation_stop: Option<StopReason>,
}

/// One configured backend: its counters, totals, and current machines.
///
/// Cycles of one space must never overlap; `run_cycle` takes `&mut self`.
pub struct Space {
    config: SpaceConfig,
    provider: Arc<dyn Provider>,
    store: StateStore,
    sink: Arc<dyn MonitoringSink>,
    heartbeats: Option<HeartbeatBook>,
    rng: StdRng,
    /// Configured limit, tightened by the provider quota on connect.
    processors_limit: Option<u32>,
    counters: BTreeMap<String, MachinetypeCounters>,
    totals: SpaceTotals,
    /// Every machine of the current cycle, foreign ones included.
    machines: BTreeMap<String, MachineRecord>,
}

impl Space {
    /// Build a space. The configuration is validated and the abort history
    /// of every machinetype is loaded from the store.
    pub fn new(
        config: SpaceConfig,
        provider: Arc<dyn Provider>,
        store: StateStore,
    ) -> SchedulerResult<Self> {
        config.validate()?;

        let mut counters = BTreeMap::new();
        for mt in &config.machinetypes {
            let last_abort_time = store
                .get_last_abort_time(&config.name, &mt.name)?
                .unwrap_or(0);
            counters.insert(
                mt.name.clone(),
                MachinetypeCounters::new(mt.clone(), last_abort_time),
            );
        }

        Ok(Self {
            processors_limit: config.processors_limit,
            sink: Arc::new(StoreSink::new(store.clone())),
            heartbeats: None,
            rng: StdRng::from_os_rng(),
            counters,
            totals: SpaceTotals::default(),
            machines: BTreeMap::new(),
            config,
            provider,
            store,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn MonitoringSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_heartbeats(mut self, book: HeartbeatBook) -> Self {
        self.heartbeats = Some(book);
        self
    }

    /// Replace the random source used for tie-breaks and machine names.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SpaceConfig {
        &self.config
    }

    pub fn processors_limit(&self) -> Option<u32> {
        self.processors_limit
    }

    pub fn counters(&self) -> &BTreeMap<String, MachinetypeCounters> {
        &self.counters
    }

    pub fn totals(&self) -> SpaceTotals {
        self.totals
    }

    pub fn machines(&self) -> &BTreeMap<String, MachineRecord> {
        &self.machines
    }

    fn machinetype_config(&self, record: &MachineRecord) -> Option<MachinetypeConfig> {
        record
            .machinetype
            .as_deref()
            .and_then(|mt| self.counters.get(mt))
            .map(|c| c.config.clone())
    }

    fn timeout(&self) -> u64 {
        self.config.provider_timeout_seconds
    }

    /// Run one full cycle at time `now`.
    pub async fn run_cycle(&mut self, now: u64) -> Result<CycleReport, CycleError> {
        let mut report = CycleReport::default();

        self.connect().await.map_err(|source| CycleError::Connect {
            space: self.config.name.clone(),
            source,
        })?;
        self.observe(now, &mut report)
            .await
            .map_err(|source| CycleError::Observe {
                space: self.config.name.clone(),
                source,
            })?;

        let space = self.config.name.clone();

        let snapshot = self.snapshot(now);
        if let Err(e) = self.sink.record_snapshot(&snapshot) {
            warn!(%space, error = %e, "snapshot emission failed");
            report.skipped.push(CycleStep::Snapshot);
        }
        if let Err(e) = self.publish_info(now) {
            warn!(%space, error = %e, "space info publication failed");
            report.skipped.push(CycleStep::SpaceInfo);
        }
        self.evict(now, &mut report).await;
        if let Err(e) = self.refresh_liveness(now) {
            warn!(%space, error = %e, "liveness refresh failed");
            report.skipped.push(CycleStep::Liveness);
        }
        self.allocate(now, &mut report).await;

        info!(
            %space,
            machines = self.totals.total_machines,
            processors = self.totals.total_processors,
            created = report.created.len(),
            evicted = report.evicted.len(),
            stopped = report.stopped.len(),
            "cycle complete"
        );
        Ok(report)
    }

    /// Run cycles every `interval` until `shutdown` fires.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            space = %self.config.name,
            interval_secs = interval.as_secs(),
            "space loop started"
        );

        loop {
            if let Err(e) = self.run_cycle(epoch_secs()).await {
                warn!(space = %self.config.name, error = %e, "cycle ended early");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    info!(space = %self.config.name, "space loop shutting down");
                    break;
                }
            }
        }
    }

    // ── Connect ────────────────────────────────────────────────────

    async fn connect(&mut self) -> ProviderResult<()> {
        let info = with_timeout("connect", self.timeout(), self.provider.connect()).await?;
        self.processors_limit = match (self.config.processors_limit, info.processors_quota) {
            (Some(limit), Some(quota)) => Some(limit.min(quota)),
            (limit, quota) => limit.or(quota),
        };
        Ok(())
    }

    // ── Observe ────────────────────────────────────────────────────

    async fn observe(&mut self, now: u64, report: &mut CycleReport) -> SchedulerResult<()> {
        let space = self.config.name.clone();
        let observed =
            with_timeout("list_machines", self.timeout(), self.provider.list_machines()).await?;

        for c in self.counters.values_mut() {
            if let Some(at) = self.store.get_last_abort_time(&space, &c.config.name)? {
                c.note_abort(at);
            }
        }

        let mut stored: HashMap<String, MachineRecord> = self
            .store
            .list_machines(&space)?
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();
        self.machines.clear();

        for obs in &observed {
            let previous = stored.remove(&obs.name);
            let config = obs
                .machinetype
                .as_deref()
                .or_else(|| machinetype_of(&obs.name))
                .and_then(|mt| self.counters.get(mt))
                .map(|c| c.config.clone());

            let Some(config) = config else {
                if previous.is_some() {
                    self.store.delete_machine(&space, &obs.name)?;
                }
                let foreign = adopt(&space, obs, obs.machinetype.as_deref(), now);
                self.machines.insert(foreign.name.clone(), foreign);
                continue;
            };

            let (mut record, transition) = match previous {
                Some(mut record) => {
                    let transition = observe(&mut record, obs, now);
                    (record, transition)
                }
                None => {
                    debug!(%space, machine = %obs.name, machinetype = %config.name, "adopting unrecorded machine");
                    let mut record = adopt(&space, obs, Some(&config.name), now);
                    let transition = stamp(&mut record, now);
                    (record, transition)
                }
            };

            if transition.started {
                info!(%space, machine = %record.name, machinetype = %config.name, "machine running");
            }
            self.collect_heartbeat(&mut record, &config);
            if transition.stopped {
                self.on_stop(&record, &config, now, report)?;
            }
            self.store.put_machine(&record)?;
            self.machines.insert(record.name.clone(), record);
        }

        for (name, mut record) in stored {
            let Some(config) = self.machinetype_config(&record) else {
                self.store.delete_machine(&space, &name)?;
                continue;
            };

            let booting = matches!(record.state, MachineState::Starting | MachineState::Unknown);
            let young = record
                .created_time
                .is_some_and(|created| now.saturating_sub(created) < self.config.max_starting_seconds);
            if record.deleted_time.is_none() && booting && young {
                // Not visible through the provider yet.
                record.state = MachineState::Starting;
                record.updated_time = now;
                self.store.put_machine(&record)?;
                self.machines.insert(name, record);
                continue;
            }

            if !record.state.is_stopped() {
                record.state = MachineState::Shutdown;
            }
            if stamp(&mut record, now).stopped {
                self.on_stop(&record, &config, now, report)?;
            }
            self.store.delete_machine(&space, &name)?;
            debug!(%space, machine = %name, "machine gone");
        }

        self.totals = fold(self.machines.values(), &mut self.counters, now);
        Ok(())
    }

    fn collect_heartbeat(&self, record: &mut MachineRecord, config: &MachinetypeConfig) {
        let Some(book) = &self.heartbeats else {
            return;
        };
        if config.heartbeat_window().is_none() {
            return;
        }
        match book.collect(
            &self.config.name,
            &record.name,
            config.heartbeat_file.as_deref(),
            record.heartbeat_time,
        ) {
            Ok(beat) => record.heartbeat_time = record.heartbeat_time.max(beat),
            Err(e) => {
                warn!(space = %self.config.name, machine = %record.name, error = %e, "heartbeat collection failed");
            }
        }
    }

    /// Side effects of a machine's first stopped observation.
    fn on_stop(
        &mut self,
        record: &MachineRecord,
        config: &MachinetypeConfig,
        now: u64,
        report: &mut CycleReport,
    ) -> SchedulerResult<()> {
        let space = &self.config.name;
        let stopped_time = record.stopped_time.unwrap_or(now);
        let aborted = is_abort(record, config.fizzle_seconds);

        if aborted {
            let at = self
                .store
                .put_last_abort_time(space, &config.name, stopped_time)?;
            if let Some(c) = self.counters.get_mut(&config.name) {
                c.note_abort(at);
            }
            info!(
                %space,
                machine = %record.name,
                machinetype = %config.name,
                message = record.shutdown_message.as_deref().unwrap_or(""),
                last_abort_time = at,
                "machine aborted"
            );
        } else {
            info!(
                %space,
                machine = %record.name,
                machinetype = %config.name,
                message = record.shutdown_message.as_deref().unwrap_or(""),
                "machine stopped"
            );
        }

        let event = StopEvent::new(record, &config.name, stopped_time, aborted);
        if let Err(e) = self.sink.record_accounting(&event.to_accounting(space)) {
            warn!(%space, machine = %record.name, error = %e, "accounting emission failed");
        }
        report.stopped.push(event);
        Ok(())
    }

    // ── Monitoring ─────────────────────────────────────────────────

    pub fn snapshot(&self, now: u64) -> SpaceSnapshot {
        SpaceSnapshot {
            space: self.config.name.clone(),
            epoch: now,
            processors_limit: self.processors_limit,
            total_machines: self.totals.total_machines,
            total_processors: self.totals.total_processors,
            starting_processors: self.totals.starting_processors,
            running_machines: self.totals.running_machines,
            running_processors: self.totals.running_processors,
            running_hs06: self.totals.running_hs06,
            machinetypes: self.counters.values().map(MachinetypeCounters::snapshot).collect(),
        }
    }

    fn publish_info(&self, now: u64) -> SchedulerResult<()> {
        let info = SpaceInfo {
            name: self.config.name.clone(),
            provider: self.provider.kind().to_string(),
            processors_limit: self.processors_limit,
            shutdown_time: self.config.shutdown_time,
            machinetypes: self.counters.keys().cloned().collect(),
            total_machines: self.totals.total_machines,
            total_processors: self.totals.total_processors,
            running_machines: self.totals.running_machines,
            running_processors: self.totals.running_processors,
            version: env!("CARGO_PKG_VERSION").to_string(),
            updated_at: now,
        };
        self.store.put_space_info(&info)?;
        Ok(())
    }

    // ── Eviction ───────────────────────────────────────────────────

    async fn evict(&mut self, now: u64, report: &mut CycleReport) {
        let ctx = EvictionContext {
            max_starting_seconds: self.config.max_starting_seconds,
            space_shutdown_time: self.config.shutdown_time,
            now,
        };
        let doomed: Vec<(String, EvictionReason)> = self
            .machines
            .values()
            .filter_map(|record| {
                let c = record
                    .machinetype
                    .as_deref()
                    .and_then(|mt| self.counters.get(mt))?;
                eviction_reason(record, &c.config, &ctx).map(|reason| (record.name.clone(), reason))
            })
            .collect();

        for (name, reason) in doomed {
            if let Err(e) = self.delete(&name, reason, now, report).await {
                warn!(space = %self.config.name, machine = %name, %reason, error = %e, "eviction incomplete, retried next cycle");
            }
        }
    }

    async fn delete(
        &mut self,
        name: &str,
        reason: EvictionReason,
        now: u64,
        report: &mut CycleReport,
    ) -> SchedulerResult<()> {
        let space = self.config.name.clone();
        let timeout = self.timeout();
        let Some(record) = self.machines.get_mut(name) else {
            return Ok(());
        };

        if record.shutdown_message.is_none() {
            record.shutdown_message = Some(reason.message().to_string());
        }
        record.deleted_time = Some(now);
        self.store.put_machine(record)?;
        info!(%space, machine = %name, %reason, state = %record.state, "deleting machine");

        if let Err(e) = with_timeout("delete_machine", timeout, self.provider.delete_machine(name)).await {
            warn!(%space, machine = %name, %reason, error = %e, "machine deletion failed");
            report.failed_deletions += 1;
            return Ok(());
        }

        record.state = MachineState::Deleting;
        let transition = stamp(record, now);
        let record = record.clone();
        report.evicted.push((name.to_string(), reason));

        // The stamped record is persisted only once the stop side effects
        // are done; until then the stored record still reads as unstopped.
        if transition.stopped
            && let Some(config) = self.machinetype_config(&record)
        {
            self.on_stop(&record, &config, now, report)?;
        }
        self.store.put_machine(&record)?;
        Ok(())
    }

    // ── Liveness ───────────────────────────────────────────────────

    fn refresh_liveness(&self, now: u64) -> SchedulerResult<()> {
        let Some(book) = &self.heartbeats else {
            return Ok(());
        };
        let windows: BTreeMap<String, u64> = self
            .counters
            .values()
            .filter_map(|c| c.config.heartbeat_window().map(|w| (c.config.name.clone(), w)))
            .collect();
        let members: Vec<Member<'_>> = self
            .machines
            .values()
            .filter_map(|record| {
                let machinetype = record.machinetype.as_deref()?;
                self.counters.contains_key(machinetype).then_some(Member {
                    machine: &record.name,
                    machinetype,
                })
            })
            .collect();

        book.refresh_liveness(&self.config.name, &windows, &members, now)?;
        Ok(())
    }

    // ── Allocation ─────────────────────────────────────────────────

    async fn allocate(&mut self, now: u64, report: &mut CycleReport) {
        let budget = creation_budget(self.processors_limit);
        let mut issued = 0u32;
        let mut order: Vec<String> = self.counters.keys().cloned().collect();

        let stop = loop {
            if let Some(reason) = hard_stop(
                &self.totals,
                self.processors_limit,
                self.config.shutdown_time,
                issued,
                budget,
                now,
            ) {
                break reason;
            }

            order.shuffle(&mut self.rng);
            let Some(machinetype) = select(&self.config.name, &self.counters, &order, now) else {
                break StopReason::NothingEligible;
            };
            let Some(c) = self.counters.get_mut(&machinetype) else {
                break StopReason::NothingEligible;
            };
            let config = c.config.clone();
            let processors = config.min_processors.max(1);
            record_creation(c, &mut self.totals, processors);
            issued += processors;

            if let Err(e) = self.create(&config, now, report).await {
                warn!(space = %self.config.name, machinetype = %config.name, error = %e, "machine creation failed");
                report.failed_creations += 1;
            }
        };

        debug!(space = %self.config.name, reason = stop.as_str(), issued, "allocation finished");
        report.allocation_stop = Some(stop);
    }

    async fn create(
        &mut self,
        config: &MachinetypeConfig,
        now: u64,
        report: &mut CycleReport,
    ) -> SchedulerResult<()> {
        let space = self.config.name.clone();
        let name = machine_name(&config.name, &mut self.rng);

        let mut record = MachineRecord::new_starting(&space, &name, &config.name, config.min_processors, now);
        record.shutdown_time = self.config.shutdown_time;
        self.store.put_machine(&record)?;

        let request = MachineRequest {
            name: name.clone(),
            machinetype: config.name.clone(),
            min_processors: config.min_processors,
            max_processors: config.max_processors,
            shutdown_time: record.shutdown_time,
            created_time: now,
        };
        match with_timeout("create_machine", self.timeout(), self.provider.create_machine(&request)).await {
            Ok(observed) => {
                record.ip = observed.ip;
                record.zone = observed.zone;
                record.provider_uuid = observed.provider_uuid;
                if let Err(e) = self.store.put_machine(&record) {
                    warn!(%space, machine = %name, error = %e, "created machine not updated in store");
                }
                info!(%space, machine = %name, machinetype = %config.name, processors = record.processors, "machine created");
                self.machines.insert(name.clone(), record);
                report.created.push(name);
            }
            Err(e) => {
                warn!(%space, machine = %name, machinetype = %config.name, error = %e, "machine creation failed");
                self.store.delete_machine(&space, &name)?;
                report.failed_creations += 1;
            }
        }
        Ok(())
    }
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
