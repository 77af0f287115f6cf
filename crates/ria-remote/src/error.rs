use ria_layout::LayoutError;
use ria_transport::TransportError;
use ria_types::TypeError;
use thiserror::Error;

/// Errors raised while serving a special-remote operation.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("no store URL configured (set `url`, or `ssh-host` and `base-path` in older setups)")]
    MissingUrl,

    #[error("no archive-id configured and the host does not know the dataset id")]
    MissingDatasetId,

    #[error("invalid value {value:?} for `{key}`: {reason}")]
    InvalidConfig {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("no RIA store at {0}")]
    StoreMissing(String),

    #[error("dataset is not in the store, expected it at {0}")]
    DatasetMissing(String),

    #[error(
        "remote is read-only: {reason}. Set `force-write` to true to write anyway, \
         at the risk of a layout the store does not expect"
    )]
    ReadOnly { reason: String },

    #[error("cannot retrieve {key}: direct download failed ({direct}); archive fallback failed ({archive})")]
    RetrieveFailed {
        key: String,
        direct: String,
        archive: String,
    },

    #[error("host request failed: {0}")]
    Host(String),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Key(#[from] TypeError),
}

impl RemoteError {
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly { .. })
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// What the host sees when an operation fails.
///
/// Every handler failure, whatever its origin, is reported as a
/// `BackendError` naming the operation. The underlying [`RemoteError`] stays
/// reachable through [`std::error::Error::source`].
#[derive(Debug, Error)]
#[error("{operation} failed: {source}")]
pub struct BackendError {
    pub operation: &'static str,
    #[source]
    pub source: RemoteError,
}

impl BackendError {
    pub fn new(operation: &'static str, source: RemoteError) -> Self {
        Self { operation, source }
    }

    pub fn is_read_only(&self) -> bool {
        self.source.is_read_only()
    }
}
