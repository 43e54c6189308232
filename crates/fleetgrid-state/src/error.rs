//! Record store errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// Failures of the redb record store.
///
/// Backend failures carry the redb message. Encoding failures also name the
/// record key, so a corrupt record can be found and removed by hand.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state store: {0}")]
    Open(String),

    #[error("state store transaction failed: {0}")]
    Transaction(String),

    #[error("state store table unavailable: {0}")]
    Table(String),

    #[error("state store read failed: {0}")]
    Read(String),

    #[error("state store write failed: {0}")]
    Write(String),

    #[error("cannot encode record {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("corrupt record {key}: {reason}")]
    Decode { key: String, reason: String },
}
