//! Resolved store addresses.
//!
//! The ORA remote never interprets raw address strings beyond handing them
//! to an [`AddressResolver`]. Whatever the resolver produces is a
//! [`ResolvedAddress`]: which transport to use, which host to talk to, and
//! the base path of the store on that host.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};

/// Transport a store address resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Local,
    Ssh,
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Ssh => write!(f, "ssh"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// A store address after URL resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAddress {
    pub kind: TransportKind,
    /// `[user@]host` for SSH, `scheme://authority` for HTTP, `None` locally.
    pub host: Option<String>,
    /// SSH port, if not the default.
    pub port: Option<u16>,
    /// Store root on the host (URL path for HTTP).
    pub base_path: PathBuf,
}

impl ResolvedAddress {
    pub fn local(base_path: impl Into<PathBuf>) -> Self {
        Self {
            kind: TransportKind::Local,
            host: None,
            port: None,
            base_path: base_path.into(),
        }
    }

    pub fn ssh(host: impl Into<String>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            kind: TransportKind::Ssh,
            host: Some(host.into()),
            port: None,
            base_path: base_path.into(),
        }
    }

    pub fn http(origin: impl Into<String>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            kind: TransportKind::Http,
            host: Some(origin.into()),
            port: None,
            base_path: base_path.into(),
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn is_local(&self) -> bool {
        self.kind == TransportKind::Local
    }

    /// Canonical `ria+` URL for this address.
    ///
    /// This is what gets persisted into committed configuration, so that
    /// other clones do not need the same URL rewriting rules.
    pub fn to_url(&self) -> String {
        let base = self.base_path.display();
        match self.kind {
            TransportKind::Local => format!("ria+file://{base}"),
            TransportKind::Ssh => {
                let host = self.host.as_deref().unwrap_or_default();
                match self.port {
                    Some(port) => format!("ria+ssh://{host}:{port}{base}"),
                    None => format!("ria+ssh://{host}{base}"),
                }
            }
            TransportKind::Http => {
                format!("ria+{}{base}", self.host.as_deref().unwrap_or_default())
            }
        }
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

/// Turns a configured store URL into a [`ResolvedAddress`].
///
/// The dataset tool normally owns URL rewriting (`insteadOf` rules, aliases,
/// and so on) and implements this trait itself.
pub trait AddressResolver {
    fn resolve(&self, url: &str) -> TypeResult<ResolvedAddress>;
}

/// Resolver for plain `ria+` URLs without any rewriting.
///
/// Accepts `ria+file:///path`, `ria+ssh://[user@]host[:port]/path`,
/// `ria+http://…`, `ria+https://…`, the same without the `ria+` prefix, and
/// bare absolute paths.
#[derive(Clone, Copy, Debug, Default)]
pub struct RiaUrlResolver;

impl AddressResolver for RiaUrlResolver {
    fn resolve(&self, url: &str) -> TypeResult<ResolvedAddress> {
        let invalid = |reason: &str| TypeError::InvalidAddress {
            address: url.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = url.trim();
        let rest = trimmed.strip_prefix("ria+").unwrap_or(trimmed);

        if rest.starts_with('/') {
            return Ok(ResolvedAddress::local(normalize_path(rest)));
        }

        let (scheme, remainder) = rest
            .split_once("://")
            .ok_or_else(|| invalid("expected a URL or an absolute path"))?;

        match scheme {
            "file" => {
                if !remainder.starts_with('/') {
                    return Err(invalid("file URLs need an absolute path"));
                }
                Ok(ResolvedAddress::local(normalize_path(remainder)))
            }
            "ssh" => {
                let (authority, path) = split_authority(remainder);
                if authority.is_empty() {
                    return Err(invalid("missing host"));
                }
                if path.is_empty() {
                    return Err(invalid("missing store path"));
                }
                let (host, port) = match authority.rsplit_once(':') {
                    Some((host, port)) => {
                        let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
                        (host, Some(port))
                    }
                    None => (authority, None),
                };
                let mut address = ResolvedAddress::ssh(host, normalize_path(path));
                address.port = port;
                Ok(address)
            }
            "http" | "https" => {
                let (authority, path) = split_authority(remainder);
                if authority.is_empty() {
                    return Err(invalid("missing host"));
                }
                let path = if path.is_empty() { "/" } else { path };
                Ok(ResolvedAddress::http(
                    format!("{scheme}://{authority}"),
                    normalize_path(path),
                ))
            }
            other => Err(invalid(&format!("unsupported scheme {other:?}"))),
        }
    }
}

fn split_authority(s: &str) -> (&str, &str) {
    match s.find('/') {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, ""),
    }
}

fn normalize_path(path: &str) -> PathBuf {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}
