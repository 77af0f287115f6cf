//! Invocation details of the external archive tool.
//!
//! Each dataset may carry a single `archive.7z` holding a packed copy of its
//! object tree. Entries are addressed by their key path relative to the
//! objects directory, with `/` separators.

use std::path::Path;

/// Executable name of the archive tool, looked up on `PATH`.
pub const ARCHIVE_TOOL: &str = "7z";

/// File name of the per-dataset archive inside the archive directory.
pub const ARCHIVE_FILE: &str = "archive.7z";

/// Arguments listing `entry` in `archive`.
pub fn list_args(archive: &Path, entry: &Path) -> [String; 3] {
    [
        "l".to_string(),
        archive.display().to_string(),
        entry_name(entry),
    ]
}

/// Arguments extracting `entry` from `archive` to stdout.
pub fn extract_args(archive: &Path, entry: &Path) -> [String; 4] {
    [
        "x".to_string(),
        "-so".to_string(),
        archive.display().to_string(),
        entry_name(entry),
    ]
}

/// Whether an archive listing mentions `entry`.
///
/// Plain substring search. Entry names are full hashed key paths, so partial
/// collisions are not a practical concern.
pub fn listing_contains(listing: &str, entry: &Path) -> bool {
    listing.contains(&entry_name(entry))
}

pub(crate) fn entry_name(entry: &Path) -> String {
    entry
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
