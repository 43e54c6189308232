//! End-to-end cycle tests.
//!
//! Each test parses a real configuration, builds a space against the
//! simulated provider, and drives complete cycles with an explicit clock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use rand::SeedableRng;
use rand::rngs::StdRng;

use fleet_core::{FleetConfig, SpaceConfig};
use fleetgrid_health::HeartbeatBook;
use fleetgrid_provider::{Provider, ProviderRegistry, SimulatedOptions, SimulatedProvider};
use fleetgrid_scheduler::{EvictionReason, Space};
use fleetgrid_state::{MachineState, StateStore};

/// Start of the test clock. Later than any backoff window that follows a
/// `last_abort_time` of zero.
const T0: u64 = 10_000;

fn space_config(toml: &str) -> SpaceConfig {
    let config = FleetConfig::parse(toml).unwrap();
    let (mut valid, errors) = config.validated_spaces();
    assert!(errors.is_empty(), "{errors:?}");
    valid.remove(0)
}

fn simulated(config: &SpaceConfig) -> Arc<SimulatedProvider> {
    let options = SimulatedOptions::from_options(&config.provider_options).unwrap();
    Arc::new(SimulatedProvider::new(options))
}

fn space(config: SpaceConfig, sim: &Arc<SimulatedProvider>, store: &StateStore) -> Space {
    let provider: Arc<dyn Provider> = sim.clone();
    Space::new(config, provider, store.clone())
        .unwrap()
        .with_rng(StdRng::seed_from_u64(7))
}

/// Processors per machinetype, from the machines the provider holds.
async fn processors_by_type(sim: &SimulatedProvider) -> BTreeMap<String, u32> {
    let mut out = BTreeMap::new();
    for name in sim.machine_names().await {
        if let Some(machine) = sim.machine(&name).await
            && let Some(mt) = machine.machinetype
        {
            *out.entry(mt).or_default() += machine.processors;
        }
    }
    out
}

const TWO_TYPES: &str = r#"
[[space]]
name = "cloud"
provider = "simulated"
processors_limit = 100

[[space.machinetype]]
name = "a"
target_share = 0.75
backoff_seconds = 0
fizzle_seconds = 0

[[space.machinetype]]
name = "b"
target_share = 0.25
backoff_seconds = 0
fizzle_seconds = 0
"#;

#[tokio::test]
async fn fair_share_converges_three_to_one() {
    let config = space_config(TWO_TYPES);
    let store = StateStore::open_in_memory().unwrap();
    let sim = simulated(&config);
    let mut space = space(config, &sim, &store);

    for cycle in 0..20 {
        space.run_cycle(cycle * 60).await.unwrap();
    }

    let by_type = processors_by_type(&sim).await;
    let a = by_type["a"];
    let b = by_type["b"];
    assert_eq!(a + b, 100);
    assert!(a.abs_diff(75) <= 1, "a = {a}");
    assert!(b.abs_diff(25) <= 1, "b = {b}");
}

#[tokio::test]
async fn space_limit_is_never_exceeded() {
    let config = space_config(
        r#"
[[space]]
name = "cloud"
provider = "simulated"
processors_limit = 20

[[space.machinetype]]
name = "a"
target_share = 0.5
backoff_seconds = 0
fizzle_seconds = 0

[[space.machinetype]]
name = "b"
target_share = 0.3
backoff_seconds = 0
fizzle_seconds = 0

[[space.machinetype]]
name = "c"
target_share = 0.2
backoff_seconds = 0
fizzle_seconds = 0
"#,
    );
    let store = StateStore::open_in_memory().unwrap();
    let sim = simulated(&config);
    let mut space = space(config, &sim, &store);

    for cycle in 0..30 {
        let report = space.run_cycle(cycle * 60).await.unwrap();
        assert!(report.created.len() <= 2, "throttle is ceil(20 * 0.1)");
        assert!(space.totals().total_processors <= 20);
    }
    assert_eq!(sim.machine_names().await.len(), 20);
}

#[tokio::test]
async fn starting_cap_limits_boot_storm() {
    let config = space_config(
        r#"
[[space]]
name = "cloud"
provider = "simulated"
processors_limit = 1000

[space.provider_options]
boot = "manual"

[[space.machinetype]]
name = "atlas"
target_share = 1.0
processors_limit = 50
max_starting_processors = 5
backoff_seconds = 0
fizzle_seconds = 0
"#,
    );
    let store = StateStore::open_in_memory().unwrap();
    let sim = simulated(&config);
    let mut space = space(config, &sim, &store);

    let first = space.run_cycle(0).await.unwrap();
    assert_eq!(first.created.len(), 5);

    // Nothing has booted yet, so nothing new may start.
    let second = space.run_cycle(60).await.unwrap();
    assert!(second.created.is_empty());

    for name in &first.created {
        sim.set_state(name, MachineState::Running).await;
    }
    let third = space.run_cycle(120).await.unwrap();
    assert_eq!(third.created.len(), 5);
    assert_eq!(space.counters()["atlas"].running_processors, 5);
}

#[tokio::test]
async fn abort_backs_off_only_its_machinetype() {
    let config = space_config(
        r#"
[[space]]
name = "cloud"
provider = "simulated"
processors_limit = 100

[[space.machinetype]]
name = "a"
target_share = 0.5
backoff_seconds = 600
fizzle_seconds = 300

[[space.machinetype]]
name = "b"
target_share = 0.5
backoff_seconds = 600
fizzle_seconds = 300
"#,
    );
    let store = StateStore::open_in_memory().unwrap();
    let sim = simulated(&config);
    let mut space = space(config, &sim, &store);

    let first = space.run_cycle(T0).await.unwrap();
    let victim = first
        .created
        .iter()
        .find(|name| name.starts_with("fleetgrid-a-"))
        .unwrap()
        .clone();
    space.run_cycle(T0 + 60).await.unwrap();

    sim.stop_machine(&victim, None).await;
    let report = space.run_cycle(T0 + 120).await.unwrap();

    assert_eq!(report.stopped.len(), 1);
    assert!(report.stopped[0].aborted);
    assert_eq!(space.counters()["a"].last_abort_time, T0 + 120);
    assert!(!report.created.is_empty());
    assert!(
        report.created.iter().all(|name| name.starts_with("fleetgrid-b-")),
        "{:?}",
        report.created
    );
    assert!(report.evicted.contains(&(victim, EvictionReason::Cleanup)));
}

#[tokio::test]
async fn stuck_machine_is_evicted_as_failed_to_start() {
    let config = space_config(
        r#"
[[space]]
name = "cloud"
provider = "simulated"
processors_limit = 1
max_starting_seconds = 600

[space.provider_options]
boot = "manual"

[[space.machinetype]]
name = "atlas"
target_share = 1.0
backoff_seconds = 600
fizzle_seconds = 600
"#,
    );
    let store = StateStore::open_in_memory().unwrap();
    let sim = simulated(&config);
    let mut space = space(config, &sim, &store);

    let name = space.run_cycle(T0).await.unwrap().created[0].clone();
    assert!(space.run_cycle(T0 + 600).await.unwrap().evicted.is_empty());

    let report = space.run_cycle(T0 + 601).await.unwrap();
    assert_eq!(report.evicted, vec![(name.clone(), EvictionReason::FailedToStart)]);
    assert_eq!(report.stopped.len(), 1);
    assert!(report.stopped[0].aborted);
    assert_eq!(store.get_last_abort_time("cloud", "atlas").unwrap(), Some(T0 + 601));

    let record = store.get_machine("cloud", &name).unwrap().unwrap();
    assert_eq!(record.state, MachineState::Deleting);
    assert_eq!(record.shutdown_message.as_deref(), Some("700 Failed to start"));
    assert_eq!(sim.deleted().await, vec![name]);
}

#[tokio::test]
async fn heartbeat_file_keeps_machine_alive() {
    let dir = tempfile::tempdir().unwrap();
    let config = space_config(
        r#"
[[space]]
name = "cloud"
provider = "simulated"
processors_limit = 2

[[space.machinetype]]
name = "atlas"
target_share = 1.0
backoff_seconds = 0
fizzle_seconds = 100
heartbeat_file = "heartbeat"
heartbeat_seconds = 300
"#,
    );
    let store = StateStore::open_in_memory().unwrap();
    let sim = simulated(&config);
    let book = HeartbeatBook::new(store.clone()).with_dir(dir.path());
    let mut space = space(config, &sim, &store).with_heartbeats(book.clone());

    // One machine per cycle; both are running after the third.
    space.run_cycle(T0).await.unwrap();
    space.run_cycle(T0).await.unwrap();
    space.run_cycle(T0).await.unwrap();
    let names = sim.machine_names().await;
    assert_eq!(names.len(), 2);
    let (beating, silent) = (&names[0], &names[1]);

    let path = book.heartbeat_path("cloud", beating, "heartbeat").unwrap();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = std::fs::File::create(&path).unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(T0 + 350)).unwrap();

    let report = space.run_cycle(T0 + 400).await.unwrap();
    assert_eq!(report.evicted, vec![(silent.clone(), EvictionReason::HeartbeatLost)]);

    let live = store.get_liveness("cloud", "atlas").unwrap().unwrap();
    assert_eq!(live.machines, vec![beating.clone()]);
    assert_eq!(store.get_heartbeat("cloud", beating).unwrap(), Some(T0 + 350));
}

#[tokio::test]
async fn restart_resumes_from_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleetgrid.redb");
    let config = space_config(TWO_TYPES);
    let sim = simulated(&config);

    {
        let store = StateStore::open(&path).unwrap();
        let mut space = space(config.clone(), &sim, &store);
        for cycle in 0..10 {
            space.run_cycle(cycle * 60).await.unwrap();
        }
        let victim = sim.machine_names().await.remove(0);
        sim.stop_machine(&victim, Some("200 Finished")).await;
        sim.fail_next_deletes(1).await;
        let report = space.run_cycle(600).await.unwrap();
        assert_eq!(report.stopped.len(), 1);
    }

    let store = StateStore::open(&path).unwrap();
    let mut space = space(config, &sim, &store);
    let report = space.run_cycle(660).await.unwrap();

    // The stop already fired before the restart.
    assert!(report.stopped.is_empty());
    assert_eq!(store.list_accounting("cloud").unwrap().len(), 1);
    assert_eq!(space.totals().total_processors, 100);
    assert!(report.created.is_empty());
}

#[tokio::test]
async fn registry_builds_configured_provider() {
    let config = space_config(TWO_TYPES);
    let provider = ProviderRegistry::with_builtin().build(&config).unwrap();
    let store = StateStore::open_in_memory().unwrap();
    let mut space = Space::new(config, provider, store.clone()).unwrap();

    let report = space.run_cycle(0).await.unwrap();
    assert_eq!(report.created.len(), 10);
    assert_eq!(store.list_machines("cloud").unwrap().len(), 10);
}
