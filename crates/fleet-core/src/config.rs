//! fleetgrid.toml configuration parser.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::naming::is_provider_safe;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default, rename = "space")]
    pub spaces: Vec<SpaceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_cycle_seconds")]
    pub cycle_seconds: u64,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Root of the per-machine heartbeat tree, `<dir>/<space>/<machine>/<file>`.
    pub heartbeat_dir: Option<PathBuf>,
    /// Snapshots kept per space; older ones are pruned on write.
    #[serde(default = "default_snapshot_retention")]
    pub snapshot_retention: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            cycle_seconds: default_cycle_seconds(),
            data_dir: default_data_dir(),
            heartbeat_dir: None,
            snapshot_retention: default_snapshot_retention(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpaceConfig {
    pub name: String,
    /// Registered provider name, e.g. "simulated".
    pub provider: String,
    /// Space-wide processor limit. `None` means no known limit, which is a
    /// different state from any `Some(n)`.
    pub processors_limit: Option<u32>,
    /// Absolute unix time after which nothing new is created.
    pub shutdown_time: Option<u64>,
    #[serde(default = "default_max_starting_seconds")]
    pub max_starting_seconds: u64,
    #[serde(default = "default_provider_timeout_seconds")]
    pub provider_timeout_seconds: u64,
    #[serde(default)]
    pub provider_options: HashMap<String, String>,
    #[serde(default, rename = "machinetype")]
    pub machinetypes: Vec<MachinetypeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachinetypeConfig {
    pub name: String,
    pub target_share: f64,
    #[serde(default = "default_min_processors")]
    pub min_processors: u32,
    pub max_processors: Option<u32>,
    pub processors_limit: Option<u32>,
    pub max_starting_processors: Option<u32>,
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: u64,
    #[serde(default = "default_fizzle_seconds")]
    pub fizzle_seconds: u64,
    #[serde(default = "default_max_wallclock_seconds")]
    pub max_wallclock_seconds: u64,
    pub heartbeat_file: Option<String>,
    pub heartbeat_seconds: Option<u64>,
}

fn default_cycle_seconds() -> u64 {
    60
}

/// One day of history at the default cycle.
fn default_snapshot_retention() -> usize {
    1440
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/fleetgrid")
}

fn default_max_starting_seconds() -> u64 {
    3600
}

fn default_provider_timeout_seconds() -> u64 {
    60
}

fn default_min_processors() -> u32 {
    1
}

fn default_backoff_seconds() -> u64 {
    600
}

fn default_fizzle_seconds() -> u64 {
    600
}

fn default_max_wallclock_seconds() -> u64 {
    86_400 * 2
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Split spaces into the valid ones and the errors of the rejected ones.
    ///
    /// Duplicate space names reject every occurrence after the first.
    pub fn validated_spaces(&self) -> (Vec<SpaceConfig>, Vec<ConfigError>) {
        let mut seen = HashSet::new();
        let mut valid = Vec::new();
        let mut errors = Vec::new();

        for space in &self.spaces {
            if !seen.insert(space.name.clone()) {
                errors.push(ConfigError::InvalidSpace {
                    space: space.name.clone(),
                    reason: "duplicate space name".to_string(),
                });
                continue;
            }
            match space.validate() {
                Ok(()) => valid.push(space.clone()),
                Err(e) => errors.push(e),
            }
        }

        (valid, errors)
    }
}

impl SpaceConfig {
    /// Check every invariant of this space and its machinetypes.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.is_empty() {
            return Err(ConfigError::Missing {
                space: "<unnamed>".to_string(),
                option: "name".to_string(),
            });
        }
        if !is_provider_safe(&self.name) {
            return Err(ConfigError::InvalidName {
                space: self.name.clone(),
                name: self.name.clone(),
            });
        }
        if self.provider.is_empty() {
            return Err(ConfigError::Missing {
                space: self.name.clone(),
                option: "provider".to_string(),
            });
        }
        if self.processors_limit == Some(0) {
            return Err(ConfigError::InvalidSpace {
                space: self.name.clone(),
                reason: "processors_limit must be positive".to_string(),
            });
        }
        if self.provider_timeout_seconds == 0 {
            return Err(ConfigError::InvalidSpace {
                space: self.name.clone(),
                reason: "provider_timeout_seconds must be positive".to_string(),
            });
        }
        if self.machinetypes.is_empty() {
            return Err(ConfigError::InvalidSpace {
                space: self.name.clone(),
                reason: "at least one machinetype is required".to_string(),
            });
        }

        let mut names = HashSet::new();
        for mt in &self.machinetypes {
            if !names.insert(mt.name.as_str()) {
                return Err(ConfigError::DuplicateMachinetype {
                    space: self.name.clone(),
                    machinetype: mt.name.clone(),
                });
            }
            mt.validate(&self.name)?;
        }
        Ok(())
    }

    pub fn machinetype(&self, name: &str) -> Option<&MachinetypeConfig> {
        self.machinetypes.iter().find(|mt| mt.name == name)
    }
}

impl MachinetypeConfig {
    fn validate(&self, space: &str) -> ConfigResult<()> {
        let invalid = |reason: &str| ConfigError::InvalidMachinetype {
            space: space.to_string(),
            machinetype: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(ConfigError::Missing {
                space: space.to_string(),
                option: "machinetype.name".to_string(),
            });
        }
        // Machinetype names are embedded in machine names.
        if !is_provider_safe(&self.name) || self.name.contains('.') {
            return Err(ConfigError::InvalidName {
                space: space.to_string(),
                name: self.name.clone(),
            });
        }
        if !self.target_share.is_finite() || self.target_share < 0.0 {
            return Err(invalid("target_share must be a finite number >= 0"));
        }
        if self.min_processors < 1 {
            return Err(invalid("min_processors must be at least 1"));
        }
        if let Some(max) = self.max_processors
            && max < self.min_processors
        {
            return Err(invalid("max_processors is less than min_processors"));
        }
        if self.processors_limit == Some(0) {
            return Err(invalid("processors_limit must be positive"));
        }
        if self.heartbeat_file.as_deref() == Some("") {
            return Err(invalid("heartbeat_file must not be empty"));
        }
        Ok(())
    }

    /// Cap on processors in `starting`; falls back to the machinetype's own limit.
    pub fn effective_max_starting_processors(&self) -> Option<u32> {
        self.max_starting_processors.or(self.processors_limit)
    }

    /// Heartbeat window in seconds, if heartbeat monitoring is configured.
    pub fn heartbeat_window(&self) -> Option<u64> {
        self.heartbeat_seconds.filter(|s| *s > 0)
    }
}
