//! Provider error types.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors reported by provider adapters.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("listing machines failed: {0}")]
    List(String),

    #[error("creating {machine} failed: {reason}")]
    Create { machine: String, reason: String },

    #[error("deleting {machine} failed: {reason}")]
    Delete { machine: String, reason: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("invalid provider option {option}: {reason}")]
    InvalidOption { option: String, reason: String },
}
