//! fleet-core — configuration and shared conventions for FleetGrid.
//!
//! A FleetGrid deployment manages one or more *spaces* (cloud-like backends),
//! each holding one or more *machinetypes* (workload categories with a target
//! share of the space's capacity). This crate owns the TOML model for that
//! configuration, its validation rules, and the machine naming convention
//! providers use to tell our machines apart from foreign ones.

pub mod config;
pub mod error;
pub mod naming;

pub use config::{DaemonConfig, FleetConfig, MachinetypeConfig, SpaceConfig};
pub use error::{ConfigError, ConfigResult};
