use std::path::PathBuf;

use ria_transport::TransportError;
use thiserror::Error;

/// Errors from layout computation and marker handling.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// An existing version marker disagrees with the requested version.
    #[error("{} already declares layout version {existing}, refusing to set {requested}", path.display())]
    Conflict {
        path: PathBuf,
        existing: String,
        requested: String,
    },

    #[error("unknown layout version {version:?} in {}", path.display())]
    UnknownLayoutVersion { path: PathBuf, version: String },

    #[error("no layout version marker at {}", .0.display())]
    MissingLayoutVersion(PathBuf),

    #[error("invalid dataset id {id:?}: {reason}")]
    InvalidDatasetId { id: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl LayoutError {
    /// Returns `true` for version problems that should degrade a session to
    /// read-only rather than abort it.
    pub fn is_version_drift(&self) -> bool {
        matches!(
            self,
            Self::UnknownLayoutVersion { .. } | Self::MissingLayoutVersion(_)
        )
    }
}

pub type LayoutResult<T> = Result<T, LayoutError>;
