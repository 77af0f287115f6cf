//! Content keys and the Key Codec.
//!
//! A content key looks like `SHA256E-s1048576-S524288-C2--e3b0c4...dat`: a
//! backend tag, optional `-`-separated fields, `--`, then the key name. The
//! fields this crate cares about are:
//!
//! - `s<N>` -- total size of the content in bytes
//! - `S<N>` -- chunk size, for chunked content
//! - `C<N>` -- 1-based chunk number
//! - `m<N>` -- modification time (carried, never interpreted)

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};

/// Escape a content key into a single filesystem-safe path component.
///
/// The mapping is one-to-one: `&` → `&a`, `%` → `&s`, `:` → `&c`,
/// `/` → `%`. It is frozen; changing it orphans every object already stored
/// under the old name.
///
/// ```
/// use ria_types::sanitize;
///
/// assert_eq!(sanitize("http://example.com/"), "http&c%%example.com%");
/// ```
pub fn sanitize(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 8);
    for ch in key.chars() {
        match ch {
            '&' => out.push_str("&a"),
            '%' => out.push_str("&s"),
            ':' => out.push_str("&c"),
            '/' => out.push('%'),
            other => out.push(other),
        }
    }
    out
}

/// Number of bytes a transfer of `key` produces.
///
/// Shorthand for `KeyInfo::parse(key)?.transfer_size()`.
pub fn size_of(key: &str) -> TypeResult<u64> {
    KeyInfo::parse(key)?.transfer_size()
}

/// An opaque content key as handed over by the content tracker.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentKey(String);

impl ContentKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The filesystem-safe form of this key, see [`sanitize`].
    pub fn sanitized(&self) -> String {
        sanitize(&self.0)
    }

    /// Parse the size and chunk fields.
    pub fn info(&self) -> TypeResult<KeyInfo> {
        KeyInfo::parse(&self.0)
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({})", self.0)
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ContentKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Metadata fields parsed from a content key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Backend tag, e.g. `SHA256E` or `MD5`.
    pub backend: String,
    /// Total content size (`s` field).
    pub size: Option<u64>,
    /// Chunk size (`S` field).
    pub chunk_size: Option<u64>,
    /// 1-based chunk number (`C` field).
    pub chunk_number: Option<u64>,
    /// Modification time (`m` field).
    pub mtime: Option<u64>,
    /// Everything after the `--` separator.
    pub name: String,
}

impl KeyInfo {
    /// Parse the backend-specific fields of a content key.
    ///
    /// Unknown field letters are skipped so newer key formats still parse.
    pub fn parse(key: &str) -> TypeResult<Self> {
        let (fields, name) = key.split_once("--").ok_or_else(|| TypeError::InvalidKey {
            key: key.to_string(),
            reason: "missing '--' separator".into(),
        })?;

        let mut parts = fields.split('-');
        let backend = parts.next().unwrap_or_default();
        if backend.is_empty() {
            return Err(TypeError::InvalidKey {
                key: key.to_string(),
                reason: "empty backend tag".into(),
            });
        }

        let mut info = KeyInfo {
            backend: backend.to_string(),
            name: name.to_string(),
            ..Default::default()
        };

        for field in parts {
            let mut chars = field.chars();
            let Some(tag) = chars.next() else {
                continue;
            };
            let slot = match tag {
                's' => &mut info.size,
                'S' => &mut info.chunk_size,
                'C' => &mut info.chunk_number,
                'm' => &mut info.mtime,
                _ => continue,
            };
            let value = chars.as_str().parse::<u64>().map_err(|_| TypeError::InvalidKey {
                key: key.to_string(),
                reason: format!("field {field:?} is not numeric"),
            })?;
            *slot = Some(value);
        }

        Ok(info)
    }

    /// Returns `true` if the key names one chunk of a larger content.
    pub fn is_chunked(&self) -> bool {
        self.chunk_size.is_some() || self.chunk_number.is_some()
    }

    /// Byte length of the content this key addresses.
    ///
    /// For unchunked keys this is the literal size. For chunk `n` of chunk
    /// size `c` it is `c` while `n <= size / c`, and the remainder
    /// `size % c` for the trailing chunk.
    pub fn transfer_size(&self) -> TypeResult<u64> {
        let size = self.size.ok_or_else(|| TypeError::MissingSize(self.display_key()))?;
        match (self.chunk_size, self.chunk_number) {
            (None, None) => Ok(size),
            (Some(chunk_size), Some(chunk_number)) if chunk_size > 0 && chunk_number > 0 => {
                if chunk_number <= size / chunk_size {
                    Ok(chunk_size)
                } else {
                    Ok(size % chunk_size)
                }
            }
            _ => Err(TypeError::InconsistentChunks(self.display_key())),
        }
    }

    fn display_key(&self) -> String {
        format!("{}-…--{}", self.backend, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sanitize_url_key() {
        assert_eq!(sanitize("http://example.com/"), "http&c%%example.com%");
    }

    #[test]
    fn sanitize_escapes_escape_characters() {
        assert_eq!(sanitize("a&b%c"), "a&ab&sc");
        assert_eq!(sanitize("plain"), "plain");
    }

    #[test]
    fn sanitize_is_injective_on_collision_candidates() {
        // `%` in the input and `/` in the input must not meet.
        assert_ne!(sanitize("a/b"), sanitize("a%b"));
        assert_ne!(sanitize("a:b"), sanitize("a&cb"));
    }

    #[test]
    fn parse_unchunked_key() {
        let info = KeyInfo::parse("SHA256E-s1048576--abcdef.dat").unwrap();
        assert_eq!(info.backend, "SHA256E");
        assert_eq!(info.size, Some(1_048_576));
        assert!(!info.is_chunked());
        assert_eq!(info.name, "abcdef.dat");
        assert_eq!(info.transfer_size().unwrap(), 1_048_576);
    }

    #[test]
    fn parse_keeps_mtime_and_skips_unknown_fields() {
        let info = KeyInfo::parse("WORM-s10-m1700000000-x9--file").unwrap();
        assert_eq!(info.mtime, Some(1_700_000_000));
        assert_eq!(info.size, Some(10));
    }

    #[test]
    fn chunk_sizes() {
        // 250 bytes in 100-byte chunks: 100, 100, 50
        assert_eq!(size_of("MD5-s250-S100-C1--x").unwrap(), 100);
        assert_eq!(size_of("MD5-s250-S100-C2--x").unwrap(), 100);
        assert_eq!(size_of("MD5-s250-S100-C3--x").unwrap(), 50);
    }

    #[test]
    fn chunk_size_exact_multiple() {
        assert_eq!(size_of("MD5-s200-S100-C2--x").unwrap(), 100);
    }

    #[test]
    fn chunk_fields_must_come_together() {
        assert_eq!(
            size_of("MD5-s250-S100--x"),
            Err(TypeError::InconsistentChunks("MD5-…--x".into()))
        );
        assert!(matches!(
            size_of("MD5-s250-C1--x"),
            Err(TypeError::InconsistentChunks(_))
        ));
        assert!(matches!(
            size_of("MD5-s250-S0-C1--x"),
            Err(TypeError::InconsistentChunks(_))
        ));
    }

    #[test]
    fn missing_size_is_an_error() {
        assert!(matches!(size_of("URL--http://x"), Err(TypeError::MissingSize(_))));
    }

    #[test]
    fn malformed_keys() {
        assert!(matches!(KeyInfo::parse("nodashes"), Err(TypeError::InvalidKey { .. })));
        assert!(matches!(KeyInfo::parse("-s1--x"), Err(TypeError::InvalidKey { .. })));
        assert!(matches!(KeyInfo::parse("MD5-sabc--x"), Err(TypeError::InvalidKey { .. })));
    }

    #[test]
    fn url_key_name_keeps_separators() {
        let key = ContentKey::new("URL-s5--http://example.com/a--b");
        let info = key.info().unwrap();
        assert_eq!(info.name, "http://example.com/a--b");
        assert_eq!(key.sanitized(), "URL-s5--http&c%%example.com%a--b");
    }

    proptest! {
        #[test]
        fn sanitized_keys_have_no_slash(key in ".*") {
            let out = sanitize(&key);
            prop_assert!(!out.contains('/'));
            prop_assert_eq!(out, sanitize(&key));
        }

        #[test]
        fn sanitize_is_injective(a in "[a-z/%&:]{0,8}", b in "[a-z/%&:]{0,8}") {
            if a != b {
                prop_assert_ne!(sanitize(&a), sanitize(&b));
            }
        }
    }
}
