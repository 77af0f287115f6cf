use thiserror::Error;

/// Errors produced by key and address parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("malformed content key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("content key {0:?} carries no size field")]
    MissingSize(String),

    #[error("content key {0:?} has inconsistent chunk fields")]
    InconsistentChunks(String),

    #[error("invalid store address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

pub type TypeResult<T> = Result<T, TypeError>;
