//! Store access through one persistent remote shell.
//!
//! Opening an SSH connection per operation is far too slow for stores with
//! many small objects, so the transport keeps a single `sh` running on the
//! store host and feeds it commands. See [`framing`] for how responses are
//! delimited on the shared stream.
//!
//! Content downloads (`get`, `get_from_archive`) stream raw bytes over the
//! same stdout, where there is no delimiter inside the payload. The
//! transport reads exactly the number of bytes the content key announces,
//! then expects the command's sentinel. A source that produces fewer bytes
//! than announced would stall the reader; every read therefore gives up
//! after the configured timeout, and the session is torn down because the
//! stream can no longer be trusted.

pub mod framing;
pub mod shell;
pub mod stat;

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::process::Stdio;
use std::thread;
use std::time::Duration;

use ria_types::{KeyInfo, TransportKind};
use tracing::{debug, info};

use crate::archive::{self, ARCHIVE_TOOL};
use crate::error::{TransportError, TransportResult};
use crate::local::copy_stream;
use crate::traits::{Progress, Transport, WriteMode};

use self::framing::{sh_quote, Completion};
use self::shell::RemoteShell;
use self::stat::StatFlavor;

pub use self::shell::ShellLauncher;

/// Transport over a persistent remote shell.
pub struct SshTransport {
    launcher: ShellLauncher,
    shell: Option<RemoteShell>,
    flavor: StatFlavor,
}

impl SshTransport {
    /// Start the remote shell and probe the host's `stat` dialect.
    pub fn connect(
        launcher: ShellLauncher,
        buffer_size: usize,
        timeout: Duration,
    ) -> TransportResult<Self> {
        let mut shell = RemoteShell::spawn(&launcher, buffer_size, timeout)?;
        let uname = match shell.command("uname -s") {
            Ok((Completion::Success, out)) => out,
            Ok((Completion::Failure, out)) => {
                shell.terminate();
                return Err(TransportError::Connectivity(format!(
                    "remote shell on {} is not usable: {out}",
                    launcher.host()
                )));
            }
            Err(e) => {
                shell.terminate();
                return Err(e);
            }
        };
        let flavor = StatFlavor::from_uname(&uname);
        info!(host = launcher.host(), os = %uname.trim(), "remote shell ready");

        Ok(Self {
            launcher,
            shell: Some(shell),
            flavor,
        })
    }

    pub fn host(&self) -> &str {
        self.launcher.host()
    }

    /// Run `f` against the live shell.
    ///
    /// Timeouts and protocol or connection failures leave the stream in an
    /// unknown position, so the shell is terminated and later calls fail
    /// with a connectivity error.
    fn with_shell<T>(
        &mut self,
        f: impl FnOnce(&mut RemoteShell) -> TransportResult<T>,
    ) -> TransportResult<T> {
        let shell = self
            .shell
            .as_mut()
            .ok_or_else(|| TransportError::Connectivity("remote shell is closed".into()))?;
        let result = f(shell);
        if let Err(
            TransportError::Timeout { .. }
            | TransportError::Protocol(_)
            | TransportError::Connectivity(_),
        ) = &result
        {
            if let Some(shell) = self.shell.take() {
                debug!(host = self.launcher.host(), "discarding desynchronized shell");
                shell.terminate();
            }
        }
        result
    }

    /// Run a command, failing on non-zero exit.
    fn run(&mut self, command: &str) -> TransportResult<String> {
        match self.with_shell(|sh| sh.command(command))? {
            (Completion::Success, out) => Ok(out),
            (Completion::Failure, output) => Err(TransportError::CommandFailed {
                command: command.to_string(),
                output,
            }),
        }
    }

    /// Run a command and report whether it succeeded.
    fn check(&mut self, command: &str) -> TransportResult<bool> {
        let (completion, _) = self.with_shell(|sh| sh.command(command))?;
        Ok(completion == Completion::Success)
    }

    /// Octal permission bits of a remote path.
    ///
    /// Only a path that does not exist is `NotFound`; a `stat` that fails on
    /// an existing path is reported as the command failure it is.
    pub fn file_mode(&mut self, path: &Path) -> TransportResult<u32> {
        if !self.exists(path)? {
            return Err(TransportError::NotFound(path.display().to_string()));
        }
        let command = self.flavor.mode_command(&quote(path));
        let output = self.run(&command)?;
        StatFlavor::parse_mode(&output).ok_or_else(|| {
            TransportError::Protocol(format!("unexpected stat output {output:?}"))
        })
    }

    /// Run `op` with the owner write bit set on `dir`, restoring the
    /// original mode afterwards whatever `op` returned.
    fn with_writeable<T>(
        &mut self,
        dir: &Path,
        op: impl FnOnce(&mut Self) -> TransportResult<T>,
    ) -> TransportResult<T> {
        let restore = match self.file_mode(dir) {
            Ok(mode) if mode & 0o200 == 0 => {
                self.run(&format!("chmod {:o} {}", mode | 0o200, quote(dir)))?;
                Some(mode)
            }
            Ok(_) | Err(TransportError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let result = op(self);

        if let Some(mode) = restore {
            if let Err(e) = self.run(&format!("chmod {mode:o} {}", quote(dir))) {
                debug!(path = %dir.display(), error = %e, "failed to restore remote permissions");
            }
        }
        result
    }

    /// Ask the remote for the byte count a command produces.
    fn remote_byte_count(&mut self, producer: &str) -> TransportResult<u64> {
        let output = self.run(&format!("{producer} | wc -c"))?;
        output
            .trim()
            .parse()
            .map_err(|_| TransportError::Protocol(format!("unexpected wc output {output:?}")))
    }

    /// Run `command` and copy exactly `size` bytes of its stdout into `dst`.
    fn stream_command(
        &mut self,
        command: &str,
        size: u64,
        dst: &Path,
        progress: Progress<'_>,
    ) -> TransportResult<()> {
        let mut file = File::create(dst).map_err(|e| TransportError::from_io(e, dst))?;
        let (completion, trailing) = self.with_shell(|sh| {
            sh.start(command)?;
            sh.stream_to(size, &mut file, progress)?;
            sh.finish()
        })?;

        if !trailing.is_empty() {
            // The stream is realigned at the sentinel, but the file is wrong.
            return Err(TransportError::Protocol(format!(
                "{command} produced more than the expected {size} bytes"
            )));
        }
        match completion {
            Completion::Success => Ok(()),
            Completion::Failure => Err(TransportError::CommandFailed {
                command: command.to_string(),
                output: String::new(),
            }),
        }
    }

    /// Feed `src` to `script` in a dedicated process on the store host.
    fn upload(&self, script: String, src: &Path, progress: Progress<'_>) -> TransportResult<()> {
        let mut reader = File::open(src).map_err(|e| TransportError::from_io(e, src))?;
        let mut child = self
            .launcher
            .one_shot(&script)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::Connectivity(format!("cannot start upload: {e}")))?;

        // Drained concurrently so a chatty remote cannot block the upload.
        let stderr_reader = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = err.read_to_string(&mut text);
                text
            })
        });
        let copied = match child.stdin.take() {
            Some(mut stdin) => copy_stream(&mut reader, &mut stdin, progress),
            None => Err(io::Error::other("upload stdin not captured")),
        };
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        let status = child
            .wait()
            .map_err(|e| TransportError::Connectivity(format!("waiting for upload: {e}")))?;

        if let Err(e) = copied {
            return Err(TransportError::Connectivity(format!("upload through `{script}`: {e}")));
        }
        if !status.success() {
            return Err(TransportError::CommandFailed {
                command: script,
                output: stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn ensure_readable(&mut self, path: &Path) -> TransportResult<()> {
        if !self.exists(path)? {
            return Err(TransportError::NotFound(path.display().to_string()));
        }
        if !self.check(&format!("test -r {}", quote(path)))? {
            return Err(TransportError::PermissionDenied(path.display().to_string()));
        }
        Ok(())
    }

    fn ensure_archive(&mut self, archive: &Path) -> TransportResult<()> {
        if !self.exists(archive)? {
            return Err(TransportError::ArchiveMissing(archive.to_path_buf()));
        }
        Ok(())
    }
}

impl Transport for SshTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ssh
    }

    fn mkdir(&mut self, path: &Path) -> TransportResult<()> {
        self.run(&format!("mkdir -p {}", quote(path))).map(drop)
    }

    fn symlink(&mut self, target: &Path, link: &Path) -> TransportResult<()> {
        self.run(&format!("ln -s {} {}", quote(target), quote(link)))
            .map(drop)
    }

    fn put(&mut self, src: &Path, dst: &Path, progress: Progress<'_>) -> TransportResult<()> {
        self.upload(format!("cat > {}", quote(dst)), src, progress)
    }

    fn get(&mut self, src: &Path, dst: &Path, progress: Progress<'_>) -> TransportResult<()> {
        self.ensure_readable(src)?;
        let size = match expected_size(src) {
            Some(size) => size,
            None => self.remote_byte_count(&format!("cat {}", quote(src)))?,
        };
        self.stream_command(&format!("cat {}", quote(src)), size, dst, progress)
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
        let extract = format!(
            "{ARCHIVE_TOOL} {}",
            archive::extract_args(archive, entry)
                .iter()
                .map(|a| sh_quote(a))
                .collect::<Vec<_>>()
                .join(" ")
        );
        let size = match expected_size(entry) {
            Some(size) => size,
            None => self.remote_byte_count(&format!("{extract} 2>/dev/null"))?,
        };
        self.stream_command(&format!("{extract} 2>/dev/null"), size, dst, progress)
    }

    fn in_archive(&mut self, archive: &Path, entry: &Path) -> TransportResult<bool> {
        self.ensure_archive(archive)?;
        let list = format!(
            "{ARCHIVE_TOOL} {}",
            archive::list_args(archive, entry)
                .iter()
                .map(|a| sh_quote(a))
                .collect::<Vec<_>>()
                .join(" ")
        );
        match self.with_shell(|sh| sh.command(&list))? {
            (Completion::Success, listing) => Ok(archive::listing_contains(&listing, entry)),
            (Completion::Failure, _) => Ok(false),
        }
    }

    fn rename(&mut self, src: &Path, dst: &Path) -> TransportResult<()> {
        let parent = dst.parent().unwrap_or(dst).to_path_buf();
        let command = format!("mv -f {} {}", quote(src), quote(dst));
        self.with_writeable(&parent, |io| io.run(&command).map(drop))
    }

    fn remove(&mut self, path: &Path) -> TransportResult<()> {
        if !self.exists(path)? {
            return Err(TransportError::NotFound(path.display().to_string()));
        }
        let parent = path.parent().unwrap_or(path).to_path_buf();
        let command = format!("rm -f {}", quote(path));
        self.with_writeable(&parent, |io| io.run(&command).map(drop))
    }

    fn remove_dir(&mut self, path: &Path) -> TransportResult<()> {
        let parent = path.parent().unwrap_or(path).to_path_buf();
        let command = format!("rmdir {}", quote(path));
        self.with_writeable(&parent, |io| io.run(&command).map(drop))
    }

    fn exists(&mut self, path: &Path) -> TransportResult<bool> {
        self.check(&format!("test -e {} || test -L {}", quote(path), quote(path)))
    }

    fn read_file(&mut self, path: &Path) -> TransportResult<String> {
        self.ensure_readable(path)?;
        self.run(&format!("cat {}", quote(path)))
    }

    fn write_file(&mut self, path: &Path, content: &str, mode: WriteMode) -> TransportResult<()> {
        let redirect = match mode {
            WriteMode::Overwrite => ">",
            WriteMode::Append => ">>",
        };
        self.run(&format!(
            "printf '%s' {} {redirect} {}",
            sh_quote(content),
            quote(path)
        ))
        .map(drop)
    }

    fn has_archive_tool(&mut self) -> TransportResult<bool> {
        self.check(&format!("command -v {ARCHIVE_TOOL} >/dev/null 2>&1"))
    }

    fn describe(&self, path: &Path) -> String {
        format!("{}: {}", self.launcher.host(), path.display())
    }

    fn close(&mut self) -> TransportResult<()> {
        if let Some(shell) = self.shell.take() {
            debug!(host = self.launcher.host(), "closing remote shell");
            shell.terminate();
        }
        Ok(())
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("host", &self.launcher.host())
            .field("connected", &self.shell.is_some())
            .field("flavor", &self.flavor)
            .finish()
    }
}

fn quote(path: &Path) -> String {
    sh_quote(&path.display().to_string())
}

/// Transfer size announced by the key an object file is named after.
fn expected_size(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    KeyInfo::parse(name).ok()?.transfer_size().ok()
}
