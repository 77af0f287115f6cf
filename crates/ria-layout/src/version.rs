//! `ria-layout-version` marker files.

use std::fmt;

/// Name of the marker file, both at the store root and in each dataset.
pub const VERSION_FILE: &str = "ria-layout-version";

/// Marker flag that enables the remote error log.
pub const LOGGING_FLAG: char = 'l';

/// Which of the two versioned levels a marker belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeKind {
    /// The store root: where datasets live.
    DatasetTree,
    /// One dataset: where its objects live.
    ObjectTree,
}

impl TreeKind {
    pub fn known_versions(self) -> &'static [&'static str] {
        match self {
            Self::DatasetTree => &["1"],
            Self::ObjectTree => &["1", "2"],
        }
    }

    pub fn is_known(self, version: &str) -> bool {
        self.known_versions().contains(&version)
    }
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DatasetTree => write!(f, "dataset tree"),
            Self::ObjectTree => write!(f, "object tree"),
        }
    }
}

/// Parsed content of a marker file: `"<version>|<flags>\n"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionMarker {
    pub version: String,
    pub flags: String,
}

impl VersionMarker {
    pub fn new(version: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            flags: flags.into(),
        }
    }

    /// Default marker for a new store root.
    pub fn store_default() -> Self {
        Self::new("1", "l")
    }

    /// Default marker for a new dataset.
    pub fn dataset_default() -> Self {
        Self::new("2", "l")
    }

    /// Parse marker content. Only the first line counts; a missing `|`
    /// means no flags.
    pub fn parse(content: &str) -> Self {
        let line = content.lines().next().unwrap_or_default().trim();
        match line.split_once('|') {
            Some((version, flags)) => Self::new(version.trim(), flags.trim()),
            None => Self::new(line, ""),
        }
    }

    /// File content, including the trailing newline.
    pub fn render(&self) -> String {
        format!("{}|{}\n", self.version, self.flags)
    }

    pub fn logging_enabled(&self) -> bool {
        self.flags.contains(LOGGING_FLAG)
    }
}

impl fmt::Display for VersionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.version, self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render() {
        let marker = VersionMarker::parse("1|l\n");
        assert_eq!(marker, VersionMarker::new("1", "l"));
        assert!(marker.logging_enabled());
        assert_eq!(marker.render(), "1|l\n");
    }

    #[test]
    fn parse_without_flags() {
        let marker = VersionMarker::parse("2\n");
        assert_eq!(marker.version, "2");
        assert!(!marker.logging_enabled());
        assert_eq!(marker.render(), "2|\n");
    }

    #[test]
    fn parse_ignores_trailing_lines() {
        assert_eq!(VersionMarker::parse(" 1 |l\ngarbage\n").version, "1");
        assert_eq!(VersionMarker::parse("").version, "");
    }

    #[test]
    fn known_versions() {
        assert!(TreeKind::DatasetTree.is_known("1"));
        assert!(!TreeKind::DatasetTree.is_known("2"));
        assert!(TreeKind::ObjectTree.is_known("2"));
        assert!(!TreeKind::ObjectTree.is_known("3"));
        assert!(!TreeKind::ObjectTree.is_known(""));
    }
}
