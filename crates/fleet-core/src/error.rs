//! Configuration errors.

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
///
/// Everything except `Read` and `Parse` is scoped to a single space, so the
/// daemon can skip the offending space and keep running the others.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("space {space}: missing or empty option {option}")]
    Missing { space: String, option: String },

    #[error("space {space}: invalid name {name:?} (lowercase letters, digits, '-' and '.' only)")]
    InvalidName { space: String, name: String },

    #[error("space {space}: duplicate machinetype {machinetype}")]
    DuplicateMachinetype { space: String, machinetype: String },

    #[error("space {space}: machinetype {machinetype}: {reason}")]
    InvalidMachinetype {
        space: String,
        machinetype: String,
        reason: String,
    },

    #[error("space {space}: {reason}")]
    InvalidSpace { space: String, reason: String },
}
