//! Shared fixtures for unit tests.

use std::collections::HashMap;

use fleet_core::{MachinetypeConfig, SpaceConfig};

/// A machinetype with no limits, no backoff, and no fizzle window.
pub(crate) fn mt_config(name: &str, share: f64) -> MachinetypeConfig {
    MachinetypeConfig {
        name: name.to_string(),
        target_share: share,
        min_processors: 1,
        max_processors: None,
        processors_limit: None,
        max_starting_processors: None,
        backoff_seconds: 0,
        fizzle_seconds: 0,
        max_wallclock_seconds: 86_400,
        heartbeat_file: None,
        heartbeat_seconds: None,
    }
}

pub(crate) fn space_config(limit: Option<u32>, machinetypes: Vec<MachinetypeConfig>) -> SpaceConfig {
    SpaceConfig {
        name: "cloud".to_string(),
        provider: "simulated".to_string(),
        processors_limit: limit,
        shutdown_time: None,
        max_starting_seconds: 3600,
        provider_timeout_seconds: 5,
        provider_options: HashMap::new(),
        machinetypes,
    }
}
