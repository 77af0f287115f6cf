//! The process hosting the special remote.

use std::collections::BTreeMap;

use ria_layout::{AnnexDirHash, KeyHasher};

use crate::error::RemoteResult;

/// Services the content tracker provides to the remote.
///
/// Configuration comes in two scopes. *Committed* config is shared by every
/// clone of the dataset; *local* config belongs to one clone and overrides
/// it. Both are looked up by bare key (`url`, `push-url`, ...); mapping
/// those to the host's own naming scheme is up to the implementation.
pub trait Host {
    fn committed_config(&self, key: &str) -> Option<String>;

    fn set_committed_config(&mut self, key: &str, value: &str) -> RemoteResult<()>;

    fn local_config(&self, key: &str) -> Option<String>;

    /// Identifier of the dataset the remote serves, if known.
    fn dataset_id(&self) -> Option<String>;

    /// Report transfer progress in cumulative bytes.
    fn progress(&mut self, _bytes: u64) {}

    /// Hash directory function of the content tracker.
    fn hasher(&self) -> &dyn KeyHasher {
        &AnnexDirHash
    }
}

/// A [`Host`] that keeps everything in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryHost {
    pub committed: BTreeMap<String, String>,
    pub local: BTreeMap<String, String>,
    pub dataset: Option<String>,
    /// Highest progress value reported so far.
    pub transferred: u64,
}

impl MemoryHost {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset: Some(dataset_id.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_committed(mut self, key: &str, value: &str) -> Self {
        self.committed.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_local(mut self, key: &str, value: &str) -> Self {
        self.local.insert(key.to_string(), value.to_string());
        self
    }
}

impl Host for MemoryHost {
    fn committed_config(&self, key: &str) -> Option<String> {
        self.committed.get(key).cloned()
    }

    fn set_committed_config(&mut self, key: &str, value: &str) -> RemoteResult<()> {
        self.committed.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn local_config(&self, key: &str) -> Option<String> {
        self.local.get(key).cloned()
    }

    fn dataset_id(&self) -> Option<String> {
        self.dataset.clone()
    }

    fn progress(&mut self, bytes: u64) {
        self.transferred = self.transferred.max(bytes);
    }
}
