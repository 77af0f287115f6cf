use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::debug;
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};
use crate::ssh::framing::{Completion, ResponseCollector, Sentinels};
use crate::traits::Progress;

/// Chunks buffered between the pipe reader and the consumer.
const PIPE_QUEUE_DEPTH: usize = 32;

/// How long a closing shell gets to exit on its own before it is killed.
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// How to start shells on the store host.
///
/// [`ShellLauncher::ssh`] runs `sh` on a remote host through the system
/// `ssh` client. [`ShellLauncher::local`] runs `sh` directly, which drives
/// the exact same protocol against the local machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellLauncher {
    program: String,
    args: Vec<String>,
    host: Option<String>,
}

impl ShellLauncher {
    pub fn ssh(host: impl Into<String>, port: Option<u16>) -> Self {
        let host = host.into();
        let mut args = Vec::new();
        if let Some(port) = port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        Self {
            program: "ssh".to_string(),
            args,
            host: Some(host),
        }
    }

    pub fn local() -> Self {
        Self {
            program: "sh".to_string(),
            args: Vec::new(),
            host: None,
        }
    }

    /// Add an `ssh -o` option, e.g. `StrictHostKeyChecking=no`.
    #[must_use]
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        if self.host.is_some() {
            self.args.push("-o".to_string());
            self.args.push(option.into());
        }
        self
    }

    #[must_use]
    pub fn with_identity_file(mut self, path: impl Into<String>) -> Self {
        if self.host.is_some() {
            self.args.push("-i".to_string());
            self.args.push(path.into());
        }
        self
    }

    /// Host label used in log messages and locations.
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }

    /// A long-lived shell reading commands from stdin.
    pub(crate) fn interactive(&self) -> Command {
        match &self.host {
            Some(host) => {
                let mut cmd = Command::new(&self.program);
                cmd.args(&self.args).arg(host).arg("sh");
                cmd
            }
            None => Command::new(&self.program),
        }
    }

    /// A one-off shell running `script`.
    pub(crate) fn one_shot(&self, script: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        match &self.host {
            Some(host) => {
                cmd.args(&self.args).arg(host).arg(script);
            }
            None => {
                cmd.arg("-c").arg(script);
            }
        }
        cmd
    }
}

/// Buffered view of a shell's stdout with a read deadline.
///
/// A background thread drains the pipe into a bounded channel so that every
/// read here can give up after `timeout` of silence instead of blocking
/// forever. Only this struct consumes the channel.
struct ShellOutput {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    timeout: Duration,
}

impl ShellOutput {
    fn new(stdout: ChildStdout, chunk_size: usize, timeout: Duration) -> TransportResult<Self> {
        let rx = spawn_pipe_reader(stdout, chunk_size)?;
        Ok(Self {
            rx,
            pending: Vec::new(),
            timeout,
        })
    }

    fn fill(&mut self, context: &str) -> TransportResult<()> {
        match self.rx.recv_timeout(self.timeout) {
            Ok(chunk) => {
                self.pending.extend_from_slice(&chunk);
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout {
                waited: self.timeout,
                context: context.to_string(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Connectivity(
                "remote shell closed its output".into(),
            )),
        }
    }

    fn read_line(&mut self) -> TransportResult<String> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                return Ok(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
            }
            self.fill("command response")?;
        }
    }

    fn copy_exact(
        &mut self,
        size: u64,
        out: &mut dyn Write,
        progress: Progress<'_>,
    ) -> TransportResult<()> {
        let mut received = 0u64;
        while received < size {
            if self.pending.is_empty() {
                self.fill(&format!("{} more bytes of content", size - received))?;
            }
            let wanted = usize::try_from(size - received).unwrap_or(usize::MAX);
            let take = wanted.min(self.pending.len());
            out.write_all(&self.pending[..take]).map_err(|e| TransportError::Io {
                context: "writing downloaded content".into(),
                source: e,
            })?;
            self.pending.drain(..take);
            received += take as u64;
            progress(received);
        }
        out.flush().map_err(|e| TransportError::Io {
            context: "writing downloaded content".into(),
            source: e,
        })
    }
}

fn spawn_pipe_reader(mut stdout: ChildStdout, chunk_size: usize) -> TransportResult<Receiver<Vec<u8>>> {
    let (tx, rx) = crossbeam_channel::bounded(PIPE_QUEUE_DEPTH);
    thread::Builder::new()
        .name("ria-shell-reader".into())
        .spawn(move || {
            let mut buf = vec![0u8; chunk_size.max(1)];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        })
        .map_err(|e| TransportError::Io {
            context: "starting shell reader".into(),
            source: e,
        })?;
    Ok(rx)
}

/// One running shell process and its framed command channel.
pub(crate) struct RemoteShell {
    child: Child,
    stdin: Option<ChildStdin>,
    output: ShellOutput,
    sentinels: Sentinels,
}

impl RemoteShell {
    pub(crate) fn spawn(
        launcher: &ShellLauncher,
        chunk_size: usize,
        timeout: Duration,
    ) -> TransportResult<Self> {
        let mut child = launcher
            .interactive()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                TransportError::Connectivity(format!("cannot start shell on {}: {e}", launcher.host()))
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(TransportError::Protocol("shell pipes were not captured".into()));
        };

        Ok(Self {
            child,
            stdin: Some(stdin),
            output: ShellOutput::new(stdout, chunk_size, timeout)?,
            sentinels: Sentinels::for_session(Uuid::new_v4()),
        })
    }

    fn send(&mut self, text: &str) -> TransportResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| TransportError::Connectivity("remote shell input is closed".into()))?;
        stdin
            .write_all(text.as_bytes())
            .and_then(|()| stdin.flush())
            .map_err(|e| TransportError::Connectivity(format!("writing to remote shell: {e}")))
    }

    /// Send a framed command without waiting for its response.
    pub(crate) fn start(&mut self, command: &str) -> TransportResult<()> {
        debug!(command, "remote shell command");
        let framed = self.sentinels.frame(command);
        self.send(&framed)
    }

    /// Read lines until the current command's sentinel.
    pub(crate) fn finish(&mut self) -> TransportResult<(Completion, String)> {
        let mut collector = ResponseCollector::new(&self.sentinels);
        loop {
            let line = self.output.read_line()?;
            if let Some(completion) = collector.feed(&line) {
                return Ok((completion, collector.into_output()));
            }
        }
    }

    /// Run one framed command to completion.
    pub(crate) fn command(&mut self, command: &str) -> TransportResult<(Completion, String)> {
        self.start(command)?;
        self.finish()
    }

    /// Copy exactly `size` raw bytes of the current command's output.
    pub(crate) fn stream_to(
        &mut self,
        size: u64,
        out: &mut dyn Write,
        progress: Progress<'_>,
    ) -> TransportResult<()> {
        self.output.copy_exact(size, out, progress)
    }

    /// Close stdin, give the shell a moment to exit, then kill it.
    pub(crate) fn terminate(mut self) {
        drop(self.stdin.take());
        let deadline = Instant::now() + EXIT_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                _ => break,
            }
        }
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "failed to kill remote shell");
        }
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_launcher_arguments() {
        let launcher = ShellLauncher::ssh("me@host", Some(2222))
            .with_option("StrictHostKeyChecking=no")
            .with_identity_file("/id");
        let cmd = launcher.interactive();
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(cmd.get_program(), "ssh");
        assert_eq!(
            args,
            ["-p", "2222", "-o", "StrictHostKeyChecking=no", "-i", "/id", "me@host", "sh"]
        );
        assert_eq!(launcher.host(), "me@host");
    }

    #[test]
    fn local_launcher_ignores_ssh_options() {
        let launcher = ShellLauncher::local().with_option("X=y");
        let cmd = launcher.one_shot("cat > '/tmp/x'");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(cmd.get_program(), "sh");
        assert_eq!(args, ["-c", "cat > '/tmp/x'"]);
    }

    #[cfg(unix)]
    #[test]
    fn local_shell_runs_framed_commands() {
        let shell = RemoteShell::spawn(&ShellLauncher::local(), 4096, Duration::from_secs(10));
        let mut shell = shell.unwrap();
        assert_eq!(
            shell.command("printf 'a\\nb\\n'").unwrap(),
            (Completion::Success, "a\nb".to_string())
        );
        assert_eq!(shell.command("false").unwrap().0, Completion::Failure);
        assert_eq!(
            shell.command("printf 'no newline'").unwrap(),
            (Completion::Success, "no newline".to_string())
        );
        shell.terminate();
    }

    #[cfg(unix)]
    #[test]
    fn silent_shell_times_out() {
        let mut shell =
            RemoteShell::spawn(&ShellLauncher::local(), 4096, Duration::from_millis(200)).unwrap();
        shell.start("sleep 2").unwrap();
        let err = shell.finish().unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
        shell.terminate();
    }
}
