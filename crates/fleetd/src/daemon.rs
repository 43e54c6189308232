//! Daemon assembly — turns a parsed configuration into running spaces.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use fleet_core::FleetConfig;
use fleetgrid_health::HeartbeatBook;
use fleetgrid_metrics::{StoreSink, latest_snapshots, render_prometheus};
use fleetgrid_provider::ProviderRegistry;
use fleetgrid_scheduler::{Space, epoch_secs};
use fleetgrid_state::StateStore;

const STORE_FILE: &str = "fleetgrid.redb";

/// Open (or create) the state store under `data_dir`.
pub fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("create data directory {}", data_dir.display()))?;
    let path = data_dir.join(STORE_FILE);
    let store = StateStore::open(&path)?;
    info!(path = ?path, "state store opened");
    Ok(store)
}

/// Open the store and build every space the configuration allows.
pub fn assemble(config: &FleetConfig) -> anyhow::Result<Vec<Space>> {
    let store = open_store(&config.daemon.data_dir)?;
    let mut heartbeats = HeartbeatBook::new(store.clone());
    if let Some(dir) = &config.daemon.heartbeat_dir {
        heartbeats = heartbeats.with_dir(dir.clone());
    }
    Ok(build_spaces(
        config,
        &ProviderRegistry::with_builtin(),
        &store,
        &heartbeats,
    ))
}

/// Build one [`Space`] per valid space.
///
/// A space with an invalid configuration or an unknown provider is logged
/// and skipped; the others still run.
pub fn build_spaces(
    config: &FleetConfig,
    registry: &ProviderRegistry,
    store: &StateStore,
    heartbeats: &HeartbeatBook,
) -> Vec<Space> {
    let (valid, errors) = config.validated_spaces();
    for e in &errors {
        error!(error = %e, "space configuration rejected");
    }

    let sink = Arc::new(StoreSink::new(store.clone()).with_retention(config.daemon.snapshot_retention));
    let mut spaces = Vec::with_capacity(valid.len());
    for space_config in valid {
        let name = space_config.name.clone();
        let provider = match registry.build(&space_config) {
            Ok(provider) => provider,
            Err(e) => {
                error!(space = %name, provider = %space_config.provider, error = %e, "provider unavailable, space skipped");
                continue;
            }
        };
        match Space::new(space_config, provider, store.clone()) {
            Ok(space) => {
                info!(
                    space = %name,
                    provider = %space.config().provider,
                    machinetypes = space.counters().len(),
                    "space configured"
                );
                spaces.push(space.with_sink(sink.clone()).with_heartbeats(heartbeats.clone()));
            }
            Err(e) => error!(space = %name, error = %e, "space skipped"),
        }
    }
    spaces
}

/// Run every space on its own task until Ctrl-C.
pub async fn run(spaces: Vec<Space>, interval: Duration) -> anyhow::Result<()> {
    if spaces.is_empty() {
        anyhow::bail!("no usable space in the configuration");
    }
    info!(spaces = spaces.len(), interval_secs = interval.as_secs(), "FleetGrid daemon starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles: Vec<_> = spaces
        .into_iter()
        .map(|space| tokio::spawn(space.run(interval, shutdown_rx.clone())))
        .collect();

    tokio::signal::ctrl_c()
        .await
        .context("install Ctrl-C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "space task ended abnormally");
        }
    }

    info!("FleetGrid daemon stopped");
    Ok(())
}

/// Run exactly one cycle of every space.
pub async fn run_once(spaces: &mut [Space]) -> anyhow::Result<()> {
    let mut failed = 0;
    for space in spaces.iter_mut() {
        match space.run_cycle(epoch_secs()).await {
            Ok(report) => info!(
                space = %space.name(),
                created = report.created.len(),
                evicted = report.evicted.len(),
                stopped = report.stopped.len(),
                skipped = report.skipped.len(),
                "cycle finished"
            ),
            Err(e) => {
                warn!(space = %space.name(), error = %e, "cycle ended early");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} space(s) failed their cycle");
    }
    Ok(())
}

/// Validate every space, including its provider name and options.
pub fn check(config: &FleetConfig) -> anyhow::Result<()> {
    let registry = ProviderRegistry::with_builtin();
    let (valid, errors) = config.validated_spaces();
    let mut rejected = errors.len();
    for e in &errors {
        error!(error = %e, "space configuration rejected");
    }
    for space in &valid {
        match registry.build(space) {
            Ok(_) => info!(space = %space.name, machinetypes = space.machinetypes.len(), "space ok"),
            Err(e) => {
                error!(space = %space.name, error = %e, "space configuration rejected");
                rejected += 1;
            }
        }
    }
    if rejected > 0 {
        anyhow::bail!("{rejected} space(s) rejected");
    }
    Ok(())
}

/// Prometheus exposition of the latest snapshot of every space.
pub fn metrics(config: &FleetConfig) -> anyhow::Result<String> {
    let store = open_store(&config.daemon.data_dir)?;
    Ok(render_prometheus(&latest_snapshots(&store)?))
}
