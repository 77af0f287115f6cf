use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use ria_types::TransportKind;
use tracing::{debug, warn};

use crate::archive::{self, ARCHIVE_TOOL};
use crate::error::{TransportError, TransportResult};
use crate::traits::{Progress, Transport, WriteMode};

/// Copy buffer size for local streaming (64 KiB).
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Direct filesystem access to a store on a locally mounted path.
#[derive(Debug, Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }

    fn archive_tool_output(&self, args: &[String]) -> TransportResult<std::process::Output> {
        Command::new(ARCHIVE_TOOL)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => TransportError::ArchiveToolMissing,
                _ => TransportError::Io {
                    context: format!("running {ARCHIVE_TOOL}"),
                    source: e,
                },
            })
    }
}

impl Transport for LocalTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    fn mkdir(&mut self, path: &Path) -> TransportResult<()> {
        fs::create_dir_all(path).map_err(|e| TransportError::from_io(e, path))
    }

    #[cfg(unix)]
    fn symlink(&mut self, target: &Path, link: &Path) -> TransportResult<()> {
        std::os::unix::fs::symlink(target, link).map_err(|e| TransportError::from_io(e, link))
    }

    #[cfg(not(unix))]
    fn symlink(&mut self, _target: &Path, _link: &Path) -> TransportResult<()> {
        Err(TransportError::unsupported("symlink", TransportKind::Local))
    }

    fn put(&mut self, src: &Path, dst: &Path, progress: Progress<'_>) -> TransportResult<()> {
        let mut reader = File::open(src).map_err(|e| TransportError::from_io(e, src))?;
        let mut writer = File::create(dst).map_err(|e| TransportError::from_io(e, dst))?;
        copy_stream(&mut reader, &mut writer, progress).map_err(|e| TransportError::from_io(e, dst))?;
        Ok(())
    }

    fn get(&mut self, src: &Path, dst: &Path, progress: Progress<'_>) -> TransportResult<()> {
        let mut reader = File::open(src).map_err(|e| TransportError::from_io(e, src))?;
        let mut writer = File::create(dst).map_err(|e| TransportError::from_io(e, dst))?;
        copy_stream(&mut reader, &mut writer, progress).map_err(|e| TransportError::from_io(e, dst))?;
        Ok(())
    }

    fn get_from_archive(
        &mut self,
        archive: &Path,
        entry: &Path,
        dst: &Path,
        progress: Progress<'_>,
    ) -> TransportResult<()> {
        if !self.in_archive(archive, entry)? {
            return Err(TransportError::NotInArchive {
                archive: archive.to_path_buf(),
                entry: archive::entry_name(entry),
            });
        }

        let args = archive::extract_args(archive, entry);
        let mut child = Command::new(ARCHIVE_TOOL)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => TransportError::ArchiveToolMissing,
                _ => TransportError::from_io(e, archive),
            })?;

        let mut writer = File::create(dst).map_err(|e| TransportError::from_io(e, dst))?;
        let copied = match child.stdout.take() {
            Some(mut stdout) => copy_stream(&mut stdout, &mut writer, progress),
            None => Err(io::Error::other("archive tool stdout not captured")),
        };
        let status = child.wait().map_err(|e| TransportError::from_io(e, archive))?;
        copied.map_err(|e| TransportError::from_io(e, dst))?;

        if !status.success() {
            return Err(TransportError::CommandFailed {
                command: format!("{ARCHIVE_TOOL} {}", args.join(" ")),
                output: format!("exit status {status}"),
            });
        }
        Ok(())
    }

    fn in_archive(&mut self, archive: &Path, entry: &Path) -> TransportResult<bool> {
        if !self.exists(archive)? {
            return Err(TransportError::ArchiveMissing(archive.to_path_buf()));
        }
        let output = self.archive_tool_output(&archive::list_args(archive, entry))?;
        if !output.status.success() {
            return Ok(false);
        }
        Ok(archive::listing_contains(
            &String::from_utf8_lossy(&output.stdout),
            entry,
        ))
    }

    fn rename(&mut self, src: &Path, dst: &Path) -> TransportResult<()> {
        let _guard = WriteableGuard::acquire(parent_of(dst))?;
        fs::rename(src, dst).map_err(|e| TransportError::from_io(e, src))
    }

    fn remove(&mut self, path: &Path) -> TransportResult<()> {
        let _guard = WriteableGuard::acquire(parent_of(path))?;
        fs::remove_file(path).map_err(|e| TransportError::from_io(e, path))
    }

    fn remove_dir(&mut self, path: &Path) -> TransportResult<()> {
        let _guard = WriteableGuard::acquire(parent_of(path))?;
        fs::remove_dir(path).map_err(|e| TransportError::from_io(e, path))
    }

    fn exists(&mut self, path: &Path) -> TransportResult<bool> {
        match fs::symlink_metadata(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(TransportError::from_io(e, path)),
        }
    }

    fn read_file(&mut self, path: &Path) -> TransportResult<String> {
        fs::read_to_string(path).map_err(|e| TransportError::from_io(e, path))
    }

    fn write_file(&mut self, path: &Path, content: &str, mode: WriteMode) -> TransportResult<()> {
        let mut file = match mode {
            WriteMode::Overwrite => File::create(path),
            WriteMode::Append => OpenOptions::new().create(true).append(true).open(path),
        }
        .map_err(|e| TransportError::from_io(e, path))?;
        file.write_all(content.as_bytes())
            .map_err(|e| TransportError::from_io(e, path))
    }

    fn has_archive_tool(&mut self) -> TransportResult<bool> {
        match self.archive_tool_output(&[]) {
            Ok(_) => Ok(true),
            Err(TransportError::ArchiveToolMissing) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn describe(&self, path: &Path) -> String {
        path.display().to_string()
    }
}

/// Scoped write permission on a directory.
///
/// Object trees are commonly kept read-only so that content cannot be
/// modified by accident. While the guard lives, the owner write bit is set
/// on the directory; dropping the guard restores the original mode. A
/// missing directory yields a no-op guard, and restore failures are only
/// logged.
#[derive(Debug)]
pub struct WriteableGuard {
    restore: Option<(PathBuf, Permissions)>,
}

impl WriteableGuard {
    pub fn acquire(path: &Path) -> TransportResult<Self> {
        let original = match fs::metadata(path) {
            Ok(meta) => meta.permissions(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self { restore: None }),
            Err(e) => return Err(TransportError::from_io(e, path)),
        };

        let Some(elevated) = owner_writable(&original) else {
            return Ok(Self { restore: None });
        };
        fs::set_permissions(path, elevated).map_err(|e| TransportError::from_io(e, path))?;
        debug!(path = %path.display(), "temporarily granted write permission");
        Ok(Self {
            restore: Some((path.to_path_buf(), original)),
        })
    }
}

impl Drop for WriteableGuard {
    fn drop(&mut self) {
        if let Some((path, original)) = self.restore.take() {
            if let Err(e) = fs::set_permissions(&path, original) {
                warn!(path = %path.display(), error = %e, "failed to restore permissions");
            }
        }
    }
}

/// Permissions with the owner write bit set, or `None` if already set.
#[cfg(unix)]
fn owner_writable(perms: &Permissions) -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;

    let mode = perms.mode();
    if mode & 0o200 != 0 {
        return None;
    }
    Some(Permissions::from_mode(mode | 0o200))
}

#[cfg(not(unix))]
fn owner_writable(perms: &Permissions) -> Option<Permissions> {
    if !perms.readonly() {
        return None;
    }
    let mut elevated = perms.clone();
    #[allow(clippy::permissions_set_readonly_false)]
    elevated.set_readonly(false);
    Some(elevated)
}

fn parent_of(path: &Path) -> &Path {
    path.parent().unwrap_or(path)
}

/// Copy a stream to completion, reporting cumulative progress.
pub(crate) fn copy_stream(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    progress: Progress<'_>,
) -> io::Result<u64> {
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
        progress(total);
    }
    writer.flush()?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_progress() -> impl FnMut(u64) {
        |_| {}
    }

    #[test]
    fn put_get_round_trip_reports_progress() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let stored = dir.path().join("stored");
        let back = dir.path().join("back");
        let data = vec![7u8; 3 * COPY_CHUNK_SIZE + 17];
        fs::write(&src, &data).unwrap();

        let mut io = LocalTransport::new();
        let mut seen = Vec::new();
        io.put(&src, &stored, &mut |n| seen.push(n)).unwrap();
        assert_eq!(seen.last().copied(), Some(data.len() as u64));
        assert!(seen.windows(2).all(|w| w[0] < w[1]));

        io.get(&stored, &back, &mut no_progress()).unwrap();
        assert_eq!(fs::read(&back).unwrap(), data);
    }

    #[test]
    fn get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut io = LocalTransport::new();
        let err = io
            .get(&dir.path().join("nope"), &dir.path().join("out"), &mut no_progress())
            .unwrap_err();
        assert!(matches!(err, TransportError::NotFound(_)));
    }

    #[test]
    fn exists_does_not_error_on_missing() {
        let dir = TempDir::new().unwrap();
        let mut io = LocalTransport::new();
        assert!(io.exists(dir.path()).unwrap());
        assert!(!io.exists(&dir.path().join("a/b/c")).unwrap());
    }

    #[test]
    fn write_and_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let mut io = LocalTransport::new();
        io.write_file(&path, "one\n", WriteMode::Overwrite).unwrap();
        io.write_file(&path, "two\n", WriteMode::Append).unwrap();
        assert_eq!(io.read_file(&path).unwrap(), "one\ntwo\n");
        io.write_file(&path, "three\n", WriteMode::Overwrite).unwrap();
        assert_eq!(io.read_file(&path).unwrap(), "three\n");
    }

    #[test]
    fn rename_replaces_destination() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, "new").unwrap();
        fs::write(&b, "old").unwrap();
        let mut io = LocalTransport::new();
        io.rename(&a, &b).unwrap();
        assert!(!a.exists());
        assert_eq!(fs::read_to_string(&b).unwrap(), "new");
    }

    #[test]
    fn archive_calls_on_missing_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("archive.7z");
        let mut io = LocalTransport::new();
        let err = io.in_archive(&archive, Path::new("a/b/k/k")).unwrap_err();
        assert!(matches!(err, TransportError::ArchiveMissing(_)));
        assert_eq!(err.to_string(), format!("archive does not exist: {}", archive.display()));
    }

    #[cfg(unix)]
    mod permissions {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn mode(path: &Path) -> u32 {
            fs::metadata(path).unwrap().permissions().mode() & 0o777
        }

        #[test]
        fn remove_from_read_only_directory_restores_mode() {
            let dir = TempDir::new().unwrap();
            let sub = dir.path().join("objects");
            fs::create_dir(&sub).unwrap();
            let file = sub.join("obj");
            fs::write(&file, "x").unwrap();
            fs::set_permissions(&sub, Permissions::from_mode(0o555)).unwrap();

            let mut io = LocalTransport::new();
            io.remove(&file).unwrap();
            assert!(!file.exists());
            assert_eq!(mode(&sub), 0o555);

            fs::set_permissions(&sub, Permissions::from_mode(0o755)).unwrap();
        }

        #[test]
        fn mode_is_restored_when_operation_fails() {
            let dir = TempDir::new().unwrap();
            let sub = dir.path().join("objects");
            fs::create_dir(&sub).unwrap();
            fs::set_permissions(&sub, Permissions::from_mode(0o555)).unwrap();

            let mut io = LocalTransport::new();
            let err = io.remove(&sub.join("missing")).unwrap_err();
            assert!(matches!(err, TransportError::NotFound(_)));
            assert_eq!(mode(&sub), 0o555);

            fs::set_permissions(&sub, Permissions::from_mode(0o755)).unwrap();
        }

        #[test]
        fn guard_on_missing_path_is_noop() {
            let dir = TempDir::new().unwrap();
            let guard = WriteableGuard::acquire(&dir.path().join("missing")).unwrap();
            drop(guard);
        }
    }
}
