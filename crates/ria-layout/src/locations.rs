//! Path computation for stores and datasets.

use std::path::{Path, PathBuf};

use ria_transport::archive::ARCHIVE_FILE;

use crate::error::{LayoutError, LayoutResult};
use crate::version::VERSION_FILE;

/// Fixed locations at a store root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorePaths {
    pub base: PathBuf,
}

impl StorePaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn version_file(&self) -> PathBuf {
        self.base.join(VERSION_FILE)
    }

    pub fn error_log_dir(&self) -> PathBuf {
        self.base.join("error_logs")
    }

    /// `error_logs/<dataset_id>.<session_id>.log`
    pub fn error_log(&self, dataset_id: &str, session_id: &str) -> PathBuf {
        self.error_log_dir()
            .join(format!("{dataset_id}.{session_id}.log"))
    }

    pub fn alias_dir(&self) -> PathBuf {
        self.base.join("alias")
    }
}

/// The three directories of one dataset in a store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetLocations {
    pub git_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub objects_dir: PathBuf,
}

impl DatasetLocations {
    pub fn version_file(&self) -> PathBuf {
        self.git_dir.join(VERSION_FILE)
    }

    /// The dataset's single archive, `archives/archive.7z`.
    pub fn archive_path(&self) -> PathBuf {
        self.archive_dir.join(ARCHIVE_FILE)
    }

    /// Per-session scratch space for uploads.
    pub fn transfer_dir(&self, session_id: &str) -> PathBuf {
        self.git_dir
            .join(format!("ora-remote-{session_id}"))
            .join("transfer")
    }
}

/// Compute where a dataset lives in a store of the given dataset-tree
/// version.
pub fn locations(version: &str, base: &Path, dataset_id: &str) -> LayoutResult<DatasetLocations> {
    match version {
        "1" => {
            let (head, tail) = split_dataset_id(dataset_id)?;
            let git_dir = base.join(head).join(tail);
            Ok(DatasetLocations {
                archive_dir: git_dir.join("archives"),
                objects_dir: git_dir.join("annex").join("objects"),
                git_dir,
            })
        }
        other => Err(LayoutError::UnknownLayoutVersion {
            path: base.join(VERSION_FILE),
            version: other.to_string(),
        }),
    }
}

/// Split a dataset id into its first three characters and the rest.
pub(crate) fn split_dataset_id(id: &str) -> LayoutResult<(&str, &str)> {
    let invalid = |reason: &str| LayoutError::InvalidDatasetId {
        id: id.to_string(),
        reason: reason.to_string(),
    };
    if id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(invalid("must be a single path component"));
    }
    let split = id
        .char_indices()
        .nth(3)
        .map(|(idx, _)| idx)
        .ok_or_else(|| invalid("needs more than three characters"))?;
    Ok(id.split_at(split))
}
