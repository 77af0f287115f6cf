//! Key to path resolution inside an object tree.
//!
//! An object lives at `<hash-dir>/<sanitized-key>/<sanitized-key>` below the
//! dataset's `annex/objects` directory. Only the hash directory depends on
//! the object-tree version.

use std::path::PathBuf;

use ria_types::ContentKey;

use crate::error::{LayoutError, LayoutResult};

/// Flavour of the two-level hash directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashStyle {
    /// `abc/def`: six lowercase hex digits (object tree version 1).
    Lower,
    /// `Xx/Yy`: four mixed-case characters, git-annex `hashdirmixed`
    /// (object tree version 2).
    Mixed,
}

impl HashStyle {
    /// Style used where the object-tree version is not recognized.
    pub const FALLBACK: Self = Self::Mixed;

    pub fn for_object_tree(version: &str) -> LayoutResult<Self> {
        match version {
            "1" => Ok(Self::Lower),
            "2" => Ok(Self::Mixed),
            other => Err(LayoutError::UnknownLayoutVersion {
                path: PathBuf::from("annex/objects"),
                version: other.to_string(),
            }),
        }
    }
}

/// Computes the hash directory of a key.
///
/// The content tracker owns this function; hosts that can ask it should
/// implement this trait rather than rely on [`AnnexDirHash`].
pub trait KeyHasher {
    /// Two path components, e.g. `"f87/4d5"`, without a trailing slash.
    fn hash_dir(&self, key: &ContentKey, style: HashStyle) -> String;
}

/// Built-in md5-based hash directories, compatible with git-annex.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnnexDirHash;

/// Alphabet of the mixed-case hash, indexed by five-bit values.
const MIXED_CHARS: &[u8; 32] = b"0123456789zqjxkmvwgpfZQJXKMVWGPF";

impl KeyHasher for AnnexDirHash {
    fn hash_dir(&self, key: &ContentKey, style: HashStyle) -> String {
        let digest = md5::compute(key.as_str().as_bytes());
        match style {
            HashStyle::Lower => {
                let hex = hex::encode(digest.0);
                format!("{}/{}", &hex[..3], &hex[3..6])
            }
            HashStyle::Mixed => {
                let word = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
                let mut chars: Vec<char> = (0..4u32)
                    .map(|i| MIXED_CHARS[((word >> (6 * i)) & 31) as usize] as char)
                    .collect();
                chars.swap(0, 1);
                chars.swap(2, 3);
                format!("{}{}/{}{}", chars[0], chars[1], chars[2], chars[3])
            }
        }
    }
}

/// Path of `key` relative to the objects directory.
pub fn key_path(hasher: &dyn KeyHasher, style: HashStyle, key: &ContentKey) -> PathBuf {
    let name = key.sanitized();
    PathBuf::from(hasher.hash_dir(key, style))
        .join(&name)
        .join(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_hash_is_md5_prefix() {
        let key = ContentKey::new("MD5-s4--8d777f385d3dfec8815d20f7496026dc");
        assert_eq!(AnnexDirHash.hash_dir(&key, HashStyle::Lower), "139/77e");
    }

    #[test]
    fn mixed_hash_matches_annex() {
        let empty = ContentKey::new(
            "SHA256E-s0--e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        );
        assert_eq!(AnnexDirHash.hash_dir(&empty, HashStyle::Mixed), "pX/ZJ");
        assert_eq!(AnnexDirHash.hash_dir(&empty, HashStyle::Lower), "f87/4d5");

        let key = ContentKey::new("MD5-s4--8d777f385d3dfec8815d20f7496026dc");
        assert_eq!(AnnexDirHash.hash_dir(&key, HashStyle::Mixed), "Wp/F9");
    }

    #[test]
    fn key_path_repeats_sanitized_key() {
        let key = ContentKey::new("URL--http://example.com/");
        let path = key_path(&AnnexDirHash, HashStyle::Lower, &key);
        let parts: Vec<_> = path.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[2], "URL--http&c%%example.com%");
        assert_eq!(parts[2], parts[3]);
    }

    #[test]
    fn style_by_object_tree_version() {
        assert_eq!(HashStyle::for_object_tree("1").unwrap(), HashStyle::Lower);
        assert_eq!(HashStyle::for_object_tree("2").unwrap(), HashStyle::Mixed);
        assert_eq!(HashStyle::FALLBACK, HashStyle::Mixed);
        assert!(HashStyle::for_object_tree("9").is_err());
    }
}
