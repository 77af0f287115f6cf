use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ria_types::TransportKind;
use thiserror::Error;

/// Errors from store access, uniform across backends.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("connection failed: {0}")]
    Connectivity(String),

    #[error("archive does not exist: {}", .0.display())]
    ArchiveMissing(PathBuf),

    #[error("{entry} is not contained in archive {}", archive.display())]
    NotInArchive { archive: PathBuf, entry: String },

    #[error("archive tool (7z) is not available")]
    ArchiveToolMissing,

    #[error("{operation} is not implemented over {transport}")]
    Unsupported {
        operation: &'static str,
        transport: TransportKind,
    },

    #[error("timed out after {waited:?} waiting for {context}")]
    Timeout { waited: Duration, context: String },

    #[error("remote command failed: {command}: {output}")]
    CommandFailed { command: String, output: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    /// Translate a filesystem error about `path`.
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.display().to_string()),
            io::ErrorKind::PermissionDenied => {
                Self::PermissionDenied(path.display().to_string())
            }
            _ => Self::Io {
                context: path.display().to_string(),
                source: err,
            },
        }
    }

    pub fn unsupported(operation: &'static str, transport: TransportKind) -> Self {
        Self::Unsupported {
            operation,
            transport,
        }
    }

    /// Returns `true` if the error says the target is absent, as opposed to
    /// unreachable.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::ArchiveMissing(_) | Self::NotInArchive { .. }
        )
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified() {
        let path = Path::new("/store/x");
        let err = TransportError::from_io(io::Error::from(io::ErrorKind::NotFound), path);
        assert!(matches!(err, TransportError::NotFound(ref p) if p == "/store/x"));
        assert!(err.is_not_found());

        let err = TransportError::from_io(io::Error::from(io::ErrorKind::PermissionDenied), path);
        assert!(matches!(err, TransportError::PermissionDenied(_)));
        assert!(!err.is_not_found());

        let err = TransportError::from_io(io::Error::other("disk on fire"), path);
        assert!(matches!(err, TransportError::Io { .. }));
    }

    #[test]
    fn unsupported_message_names_transport() {
        let err = TransportError::unsupported("put", TransportKind::Http);
        assert_eq!(err.to_string(), "put is not implemented over http");
    }
}
