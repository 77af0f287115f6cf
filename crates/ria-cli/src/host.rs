//! A [`Host`] backed by a TOML file.
//!
//! ```toml
//! dataset-id = "8c6ed3c2-5a7f-11ea-9b5e-000c29f04bcc"
//!
//! [committed]
//! url = "ria+ssh://server/srv/store"
//!
//! [local]
//! url = "ria+file:///mnt/store"
//!
//! [legacy]
//! ssh-host = "server"
//! base-path = "/srv/store"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ria_remote::{Host, RemoteError, RemoteResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub committed: BTreeMap<String, String>,
    #[serde(default)]
    pub local: BTreeMap<String, String>,
    /// Keys of old committed setups, consulted after `committed`.
    #[serde(default)]
    pub legacy: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct FileHost {
    path: PathBuf,
    file: HostFile,
}

impl FileHost {
    /// Load `path`; a missing file is an empty configuration.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = match fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HostFile::default(),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn file(&self) -> &HostFile {
        &self.file
    }

    fn save(&self) -> RemoteResult<()> {
        let text = toml::to_string_pretty(&self.file)
            .map_err(|e| RemoteError::Host(format!("serializing config: {e}")))?;
        fs::write(&self.path, text)
            .map_err(|e| RemoteError::Host(format!("writing {}: {e}", self.path.display())))
    }
}

impl Host for FileHost {
    fn committed_config(&self, key: &str) -> Option<String> {
        self.file
            .committed
            .get(key)
            .or_else(|| self.file.legacy.get(key))
            .cloned()
    }

    fn set_committed_config(&mut self, key: &str, value: &str) -> RemoteResult<()> {
        self.file
            .committed
            .insert(key.to_string(), value.to_string());
        self.save()
    }

    fn local_config(&self, key: &str) -> Option<String> {
        self.file.local.get(key).cloned()
    }

    fn dataset_id(&self) -> Option<String> {
        self.file.dataset_id.clone()
    }

    fn progress(&mut self, bytes: u64) {
        debug!(bytes, "transfer progress");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let host = FileHost::load(&dir.path().join("none.toml")).unwrap();
        assert_eq!(host.file(), &HostFile::default());
        assert_eq!(host.dataset_id(), None);
    }

    #[test]
    fn reads_all_tables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("remote.toml");
        fs::write(
            &path,
            r#"
dataset-id = "abcdef"

[committed]
url = "ria+ssh://server/store"

[local]
force-write = "true"

[legacy]
ssh-host = "old"
"#,
        )
        .unwrap();
        let host = FileHost::load(&path).unwrap();
        assert_eq!(host.dataset_id().as_deref(), Some("abcdef"));
        assert_eq!(host.committed_config("url").as_deref(), Some("ria+ssh://server/store"));
        assert_eq!(host.committed_config("ssh-host").as_deref(), Some("old"));
        assert_eq!(host.local_config("force-write").as_deref(), Some("true"));
        assert_eq!(host.local_config("url"), None);
    }

    #[test]
    fn committed_writes_are_saved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("remote.toml");
        let mut host = FileHost::load(&path).unwrap();
        host.set_committed_config("archive-id", "abcdef").unwrap();

        let reloaded = FileHost::load(&path).unwrap();
        assert_eq!(reloaded.committed_config("archive-id").as_deref(), Some("abcdef"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "committed = 3").unwrap();
        assert!(FileHost::load(&path).is_err());
    }
}
