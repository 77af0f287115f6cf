use std::path::Path;

use ria_types::TransportKind;

use crate::error::TransportResult;

/// Progress callback, invoked with the cumulative number of bytes moved.
pub type Progress<'a> = &'a mut dyn FnMut(u64);

/// How [`Transport::write_file`] treats an existing file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    Overwrite,
    Append,
}

/// Uniform access to a RIA store.
///
/// All paths are absolute paths on the store host. Implementations must
/// satisfy these invariants:
/// - `exists` never returns an error for a missing path, only for failures
///   to find out.
/// - `get` leaves a byte-identical copy of the source at the destination.
/// - `rename` uses the host's native atomic rename, so a concurrent `exists`
///   on the destination sees either nothing or the complete file.
/// - `remove`, `remove_dir` and `rename` temporarily gain write permission on
///   the parent directory when the object tree is read-only, and restore the
///   original mode on every exit path.
/// - Archive access goes through a single `archive.7z` per dataset; a missing
///   archive is reported as [`TransportError::ArchiveMissing`].
///
/// [`TransportError::ArchiveMissing`]: crate::TransportError::ArchiveMissing
pub trait Transport: Send {
    /// Which backend this is.
    fn kind(&self) -> TransportKind;

    /// Create a directory and any missing parents.
    fn mkdir(&mut self, path: &Path) -> TransportResult<()>;

    /// Create a symbolic link at `link` pointing to `target`.
    fn symlink(&mut self, target: &Path, link: &Path) -> TransportResult<()>;

    /// Upload a local file to `dst` on the store.
    fn put(&mut self, src: &Path, dst: &Path, progress: Progress<'_>) -> TransportResult<()>;

    /// Download `src` from the store into the local file `dst`.
    fn get(&mut self, src: &Path, dst: &Path, progress: Progress<'_>) -> TransportResult<()>;

    /// Extract `entry` from `archive` into the local file `dst`.
    fn get_from_archive(
        &mut self,
        archive: &Path,
        entry: &Path,
        dst: &Path,
        progress: Progress<'_>,
    ) -> TransportResult<()>;

    /// Whether `archive` lists `entry`. Does not verify archive integrity.
    fn in_archive(&mut self, archive: &Path, entry: &Path) -> TransportResult<bool>;

    /// Atomically move `src` to `dst`, replacing it.
    fn rename(&mut self, src: &Path, dst: &Path) -> TransportResult<()>;

    /// Remove a file.
    fn remove(&mut self, path: &Path) -> TransportResult<()>;

    /// Remove an empty directory.
    fn remove_dir(&mut self, path: &Path) -> TransportResult<()>;

    fn exists(&mut self, path: &Path) -> TransportResult<bool>;

    /// Read a small text file, such as a version marker.
    fn read_file(&mut self, path: &Path) -> TransportResult<String>;

    /// Write a small text file, creating it if needed.
    fn write_file(&mut self, path: &Path, content: &str, mode: WriteMode) -> TransportResult<()>;

    /// Whether the archive tool is usable on the store host.
    fn has_archive_tool(&mut self) -> TransportResult<bool>;

    /// Human-readable location of `path`, for display only.
    fn describe(&self, path: &Path) -> String;

    /// Release the session. Further calls may fail.
    fn close(&mut self) -> TransportResult<()> {
        Ok(())
    }
}
