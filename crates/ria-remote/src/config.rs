//! Layered configuration of the special remote.
//!
//! Values come from three providers, in order of precedence:
//!
//! 1. local config of this clone
//! 2. committed config, shared by all clones
//! 3. legacy keys (`ssh-host`, `base-path`) from old committed setups
//!
//! Each provider is snapshotted into a [`ConfigLayer`]; [`merge_layers`]
//! then picks the first non-empty value per key and remembers where it came
//! from.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::error::{RemoteError, RemoteResult};
use crate::host::Host;

pub const URL: &str = "url";
pub const PUSH_URL: &str = "push-url";
pub const ARCHIVE_ID: &str = "archive-id";
pub const FORCE_WRITE: &str = "force-write";
pub const IGNORE_REMOTE_CONFIG: &str = "ignore-remote-config";
pub const BUFFER_SIZE: &str = "buffer-size";
pub const READ_TIMEOUT: &str = "read-timeout";

pub const LEGACY_SSH_HOST: &str = "ssh-host";
pub const LEGACY_BASE_PATH: &str = "base-path";

/// Keys read from the local and committed providers.
const KEYS: &[&str] = &[URL, PUSH_URL, ARCHIVE_ID, FORCE_WRITE, BUFFER_SIZE, READ_TIMEOUT];

pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(600);

/// Which provider a value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Local,
    Committed,
    Legacy,
}

/// A snapshot of one provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigLayer {
    pub origin: ConfigOrigin,
    values: BTreeMap<String, String>,
}

impl ConfigLayer {
    pub fn new(origin: ConfigOrigin) -> Self {
        Self {
            origin,
            values: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn snapshot(origin: ConfigOrigin, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut layer = Self::new(origin);
        for &key in KEYS {
            if let Some(value) = lookup(key) {
                layer.values.insert(key.to_string(), value);
            }
        }
        layer
    }

    /// The legacy provider: synthesizes `url` from `ssh-host` and
    /// `base-path`. An `ssh-host` of `0` means the store is local.
    pub fn legacy(ssh_host: Option<&str>, base_path: Option<&str>) -> Self {
        let layer = Self::new(ConfigOrigin::Legacy);
        match (ssh_host.map(str::trim), base_path.map(str::trim)) {
            (Some(host), Some(base)) if !host.is_empty() && !base.is_empty() => {
                let url = if host == "0" {
                    format!("ria+file://{base}")
                } else {
                    format!("ria+ssh://{host}{base}")
                };
                layer.with(URL, url)
            }
            _ => layer,
        }
    }
}

/// A merged value and its provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConfigValue {
    pub value: String,
    pub origin: ConfigOrigin,
}

/// Merge layers, earlier layers first. Empty strings count as unset.
pub fn merge_layers(layers: &[ConfigLayer]) -> BTreeMap<String, ConfigValue> {
    let mut merged = BTreeMap::new();
    for layer in layers {
        for (key, value) in &layer.values {
            if value.trim().is_empty() || merged.contains_key(key) {
                continue;
            }
            merged.insert(
                key.clone(),
                ConfigValue {
                    value: value.trim().to_string(),
                    origin: layer.origin,
                },
            );
        }
    }
    merged
}

/// Effective configuration of the remote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RemoteConfig {
    pub url: Option<ConfigValue>,
    pub push_url: Option<ConfigValue>,
    pub archive_id: Option<ConfigValue>,
    pub force_write: bool,
    pub ignore_remote_config: bool,
    pub buffer_size: usize,
    #[serde(with = "secs")]
    pub read_timeout: Duration,
}

impl RemoteConfig {
    /// Snapshot the host's providers and merge them.
    pub fn load(host: &dyn Host) -> RemoteResult<Self> {
        let ignore_remote_config = match host.local_config(IGNORE_REMOTE_CONFIG) {
            Some(value) => parse_bool(IGNORE_REMOTE_CONFIG, &value)?,
            None => false,
        };

        let mut layers = vec![ConfigLayer::snapshot(ConfigOrigin::Local, |k| {
            host.local_config(k)
        })];
        if !ignore_remote_config {
            layers.push(ConfigLayer::snapshot(ConfigOrigin::Committed, |k| {
                host.committed_config(k)
            }));
            layers.push(ConfigLayer::legacy(
                host.committed_config(LEGACY_SSH_HOST).as_deref(),
                host.committed_config(LEGACY_BASE_PATH).as_deref(),
            ));
        }
        Self::from_layers(&layers, ignore_remote_config)
    }

    pub fn from_layers(layers: &[ConfigLayer], ignore_remote_config: bool) -> RemoteResult<Self> {
        let mut merged = merge_layers(layers);

        for (key, value) in &merged {
            if value.origin == ConfigOrigin::Legacy {
                warn!(
                    key = key.as_str(),
                    value = value.value.as_str(),
                    "using deprecated `ssh-host`/`base-path` configuration; set `url` instead"
                );
            }
        }

        let force_write = match merged.get(FORCE_WRITE) {
            Some(v) => parse_bool(FORCE_WRITE, &v.value)?,
            None => false,
        };
        let buffer_size = match merged.get(BUFFER_SIZE) {
            Some(v) => parse_positive(BUFFER_SIZE, &v.value)?,
            None => DEFAULT_BUFFER_SIZE,
        };
        let read_timeout = match merged.get(READ_TIMEOUT) {
            Some(v) => Duration::from_secs(parse_positive(READ_TIMEOUT, &v.value)? as u64),
            None => DEFAULT_READ_TIMEOUT,
        };

        Ok(Self {
            url: merged.remove(URL),
            push_url: merged.remove(PUSH_URL),
            archive_id: merged.remove(ARCHIVE_ID),
            force_write,
            ignore_remote_config,
            buffer_size,
            read_timeout,
        })
    }
}

fn parse_bool(key: &'static str, value: &str) -> RemoteResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" | "" => Ok(false),
        _ => Err(RemoteError::InvalidConfig {
            key,
            value: value.to_string(),
            reason: "expected a boolean".into(),
        }),
    }
}

fn parse_positive(key: &'static str, value: &str) -> RemoteResult<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(RemoteError::InvalidConfig {
            key,
            value: value.to_string(),
            reason: "expected a positive integer".into(),
        }),
    }
}

mod secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}
