//! Shell process abstraction layer.
//!
//! A [`ProcessHandle`] owns one spawned shell and exposes its input as a
//! byte sink and its combined stdout/stderr as a chunked byte channel. Two
//! I/O modes are supported: plain pipes (the default) and a pseudo-terminal
//! for programs that insist on a TTY.

mod async_adapter;
mod native;
mod pipe;
mod shell;

pub use async_adapter::{AsyncPtyReader, AsyncPtyWriter};
pub use native::NativePty;
pub use shell::{detect_shell, shell_exists, ShellDialect, ShellKind};

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ArbitriumError;
use crate::Result;

/// Capacity of the output chunk channel.
pub(crate) const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the input queue, in writes.
pub(crate) const INPUT_CHANNEL_CAPACITY: usize = 32;

/// How the shell's standard streams are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoMode {
    /// Anonymous pipes; stderr merged into the output channel.
    #[default]
    Pipe,
    /// Pseudo-terminal; the shell believes it is interactive.
    Pty,
}

/// Size of a PTY in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Number of rows (height).
    pub rows: u16,
    /// Number of columns (width).
    pub cols: u16,
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 200 }
    }
}

/// Everything needed to start a shell process.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Shell program and dialect.
    pub shell: ShellKind,
    /// Initial working directory; inherits ours when `None`.
    pub cwd: Option<PathBuf>,
    /// Environment overrides layered on top of the inherited environment.
    pub env: HashMap<String, String>,
    /// Inherited variables to remove before spawning.
    pub env_remove: Vec<String>,
    /// Stream wiring.
    pub mode: IoMode,
}

impl SpawnSpec {
    /// Spec for the given shell with default settings.
    pub fn new(shell: ShellKind) -> Self {
        Self {
            shell,
            cwd: None,
            env: HashMap::new(),
            env_remove: Vec::new(),
            mode: IoMode::Pipe,
        }
    }
}

/// OS-level child plus whatever must stay alive alongside it.
enum ChildProcess {
    Pipe(tokio::process::Child),
    Pty(native::PtyChild),
}

/// A spawned shell process.
///
/// The handle exclusively owns the child and its streams. Input is queued
/// to a writer that feeds the shell on its own task or thread, so writing
/// never waits for the shell to read. Output arrives as chunks on an
/// internal channel which closes once the process has released its end of
/// the streams.
pub struct ProcessHandle {
    shell: ShellKind,
    mode: IoMode,
    pid: Option<u32>,
    input: Option<mpsc::Sender<Vec<u8>>>,
    output: mpsc::Receiver<Vec<u8>>,
    child: ChildProcess,
    exit_code: Option<i32>,
    output_closed: bool,
    signaller: ProcessSignaller,
}

impl ProcessHandle {
    /// Spawn a shell according to `spec`.
    pub async fn spawn(spec: SpawnSpec) -> Result<Self> {
        if !shell_exists(&spec.shell.program) {
            return Err(ArbitriumError::spawn(&spec.shell.program, "shell not found"));
        }
        match spec.mode {
            IoMode::Pipe => pipe::spawn(&spec),
            IoMode::Pty => NativePty::new().spawn(&spec),
        }
    }

    pub(crate) fn from_parts_pipe(
        shell: ShellKind,
        child: tokio::process::Child,
        input: mpsc::Sender<Vec<u8>>,
        output: mpsc::Receiver<Vec<u8>>,
    ) -> Self {
        let pid = child.id();
        Self {
            shell,
            mode: IoMode::Pipe,
            pid,
            input: Some(input),
            output,
            child: ChildProcess::Pipe(child),
            exit_code: None,
            output_closed: false,
            signaller: ProcessSignaller {
                pid,
                pty_input: None,
            },
        }
    }

    pub(crate) fn from_parts_pty(
        shell: ShellKind,
        child: native::PtyChild,
        input: mpsc::Sender<Vec<u8>>,
        output: mpsc::Receiver<Vec<u8>>,
    ) -> Self {
        let pid = child.pid();
        Self {
            shell,
            mode: IoMode::Pty,
            pid,
            signaller: ProcessSignaller {
                pid,
                pty_input: Some(input.clone()),
            },
            input: Some(input),
            output,
            child: ChildProcess::Pty(child),
            exit_code: None,
            output_closed: false,
        }
    }

    /// Shell program and dialect.
    pub fn shell(&self) -> &ShellKind {
        &self.shell
    }

    /// Stream wiring of this process.
    pub fn mode(&self) -> IoMode {
        self.mode
    }

    /// OS process ID, if known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Cloneable handle for signalling the process without owning it.
    pub fn signaller(&self) -> ProcessSignaller {
        self.signaller.clone()
    }

    /// Queue raw bytes for the shell's input.
    ///
    /// Resolves once the bytes are queued, not once the shell has read
    /// them. Only a full queue makes it wait. Cancel-safe: when the future
    /// is dropped before resolving, nothing was queued.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let tx = self.input.as_ref().ok_or_else(input_closed)?;
        tx.send(bytes.to_vec()).await.map_err(|_| input_closed())
    }

    /// Wait for the next output chunk.
    ///
    /// Returns `None` once the output stream reached EOF.
    pub async fn read_chunk(&mut self) -> Option<Vec<u8>> {
        if self.output_closed {
            return None;
        }
        let chunk = self.output.recv().await;
        if chunk.is_none() {
            self.output_closed = true;
        }
        chunk
    }

    /// Take every chunk that is already buffered, without waiting.
    pub fn drain_available(&mut self) -> Vec<u8> {
        let mut drained = Vec::new();
        loop {
            match self.output.try_recv() {
                Ok(chunk) => drained.extend_from_slice(&chunk),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.output_closed = true;
                    break;
                }
            }
        }
        drained
    }

    /// Whether the output stream has reached EOF.
    pub fn output_closed(&self) -> bool {
        self.output_closed
    }

    /// Check whether the process is still running.
    pub fn is_alive(&mut self) -> bool {
        if self.exit_code.is_some() {
            return false;
        }
        match self.poll_exit() {
            Ok(Some(code)) => {
                self.exit_code = Some(code);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(pid = ?self.pid, "Failed to poll shell status: {}", e);
                false
            }
        }
    }

    /// Exit code, once the process has been observed to exit.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Wait for the process to exit, bounded by `limit`.
    ///
    /// Returns the exit code, or `None` if the process is still running
    /// when the limit elapses.
    pub async fn wait_exit(&mut self, limit: Duration) -> Option<i32> {
        if let Some(code) = self.exit_code {
            return Some(code);
        }
        let code = match &mut self.child {
            ChildProcess::Pipe(child) => {
                match tokio::time::timeout(limit, child.wait()).await {
                    Ok(Ok(status)) => Some(pipe::exit_code(status)),
                    Ok(Err(e)) => {
                        warn!(pid = ?self.pid, "Failed to wait for shell: {}", e);
                        None
                    }
                    Err(_) => None,
                }
            }
            ChildProcess::Pty(child) => child.wait_timeout(limit).await,
        };
        if code.is_some() {
            self.exit_code = code;
        }
        code
    }

    /// Terminate the process.
    ///
    /// Asks politely first (`exit` on stdin, SIGTERM to the process group),
    /// waits up to `grace`, then kills. Calling it again is a no-op that
    /// returns the recorded exit code.
    pub async fn terminate(&mut self, grace: Duration) -> Option<i32> {
        if !self.is_alive() {
            self.close_input();
            return self.exit_code;
        }

        let newline = self.shell.dialect.newline();
        if let Some(tx) = &self.input {
            if let Err(e) = tx.try_send(format!("exit{newline}").into_bytes()) {
                debug!(pid = ?self.pid, "Could not send exit to shell: {}", e);
            }
        }
        self.close_input();
        self.signaller.terminate();

        if let Some(code) = self.wait_exit(grace).await {
            debug!(pid = ?self.pid, code, "Shell exited gracefully");
            return Some(code);
        }

        warn!(pid = ?self.pid, "Shell ignored termination, killing");
        self.signaller.kill();
        let code = match &mut self.child {
            ChildProcess::Pipe(child) => {
                if let Err(e) = child.kill().await {
                    warn!(pid = ?self.pid, "Failed to kill shell: {}", e);
                }
                child.wait().await.ok().map(pipe::exit_code)
            }
            ChildProcess::Pty(child) => child.kill_and_wait().await,
        };
        self.exit_code = code.or(self.exit_code);
        self.exit_code
    }

    fn close_input(&mut self) {
        drop(self.input.take());
    }

    fn poll_exit(&mut self) -> std::io::Result<Option<i32>> {
        match &mut self.child {
            ChildProcess::Pipe(child) => Ok(child.try_wait()?.map(pipe::exit_code)),
            ChildProcess::Pty(child) => child.try_wait(),
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("shell", &self.shell)
            .field("mode", &self.mode)
            .field("pid", &self.pid)
            .field("exit_code", &self.exit_code)
            .finish_non_exhaustive()
    }
}

/// Signals a shell process without owning it.
///
/// Used for the interrupt control path, which must work while an exec
/// holds the [`ProcessHandle`].
#[derive(Debug, Clone)]
pub struct ProcessSignaller {
    pid: Option<u32>,
    pty_input: Option<mpsc::Sender<Vec<u8>>>,
}

impl ProcessSignaller {
    /// Interrupt the foreground command (Ctrl-C semantics).
    pub fn interrupt(&self) -> Result<()> {
        if let Some(tx) = &self.pty_input {
            return tx
                .try_send(vec![0x03])
                .map_err(|_| ArbitriumError::Pty("PTY writer closed".into()));
        }
        self.signal_group(SignalKind::Interrupt)
    }

    fn terminate(&self) {
        if let Err(e) = self.signal_group(SignalKind::Terminate) {
            debug!(pid = ?self.pid, "SIGTERM not delivered: {}", e);
        }
    }

    fn kill(&self) {
        if let Err(e) = self.signal_group(SignalKind::Kill) {
            debug!(pid = ?self.pid, "SIGKILL not delivered: {}", e);
        }
    }

    /// Signal the shell's whole process group so that foreground commands
    /// receive it too. The shell is the group leader (see `pipe::spawn`,
    /// and portable-pty calls `setsid`).
    #[cfg(unix)]
    fn signal_group(&self, kind: SignalKind) -> Result<()> {
        let pid = match self.pid {
            Some(pid) if pid > 0 && pid <= i32::MAX as u32 => pid as i32,
            _ => return Err(ArbitriumError::Unsupported("process id unknown".into())),
        };
        let signal = match kind {
            SignalKind::Interrupt => libc::SIGINT,
            SignalKind::Terminate => libc::SIGTERM,
            SignalKind::Kill => libc::SIGKILL,
        };
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(-pid, signal) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error().into())
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&self, kind: SignalKind) -> Result<()> {
        Err(ArbitriumError::Unsupported(format!(
            "{kind:?} signal on this platform"
        )))
    }
}

fn input_closed() -> ArbitriumError {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "shell input closed").into()
}

#[derive(Debug, Clone, Copy)]
enum SignalKind {
    Interrupt,
    Terminate,
    Kill,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_spec() -> SpawnSpec {
        SpawnSpec::new(ShellKind::new("/bin/sh"))
    }

    async fn read_until(handle: &mut ProcessHandle, needle: &str) -> String {
        let mut collected = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !String::from_utf8_lossy(&collected).contains(needle) {
            match tokio::time::timeout_at(deadline, handle.read_chunk()).await {
                Ok(Some(chunk)) => collected.extend(chunk),
                _ => break,
            }
        }
        String::from_utf8_lossy(&collected).into_owned()
    }

    #[test]
    fn test_pty_size_default() {
        let size = PtySize::default();
        assert_eq!(size.rows, 24);
        assert_eq!(size.cols, 200);
    }

    #[test]
    fn test_io_mode_default_and_serde() {
        assert_eq!(IoMode::default(), IoMode::Pipe);
        let mode: IoMode = serde_json::from_str("\"pty\"").unwrap();
        assert_eq!(mode, IoMode::Pty);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_pipe_write_and_read() {
        let mut handle = ProcessHandle::spawn(sh_spec()).await.unwrap();
        assert!(handle.pid().is_some());
        assert!(handle.is_alive());

        handle.write(b"echo ARBITRIUM_PIPE_TEST\n").await.unwrap();
        let output = read_until(&mut handle, "ARBITRIUM_PIPE_TEST").await;
        assert!(output.contains("ARBITRIUM_PIPE_TEST"));

        handle.terminate(Duration::from_secs(2)).await;
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_stderr_is_merged() {
        let mut handle = ProcessHandle::spawn(sh_spec()).await.unwrap();
        handle.write(b"echo to-stderr 1>&2\n").await.unwrap();
        let output = read_until(&mut handle, "to-stderr").await;
        assert!(output.contains("to-stderr"));
        handle.terminate(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_env_and_cwd_applied() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = sh_spec();
        spec.cwd = Some(dir.path().to_path_buf());
        spec.env.insert("ARBITRIUM_SPAWN_VAR".into(), "spawned".into());

        let mut handle = ProcessHandle::spawn(spec).await.unwrap();
        handle
            .write(b"echo \"$ARBITRIUM_SPAWN_VAR:$(pwd)\"\n")
            .await
            .unwrap();
        let output = read_until(&mut handle, "spawned:").await;
        let expected = dir.path().canonicalize().unwrap();
        assert!(output.contains("spawned:"));
        assert!(output.contains(expected.file_name().unwrap().to_str().unwrap()));
        handle.terminate(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_write_does_not_wait_for_busy_shell() {
        let mut handle = ProcessHandle::spawn(sh_spec()).await.unwrap();
        handle.write(b"sleep 5\n").await.unwrap();

        // Far more than a pipe buffer holds, while the shell is not reading.
        let big = format!("echo {}\n", "x".repeat(200_000));
        let queued = tokio::time::timeout(Duration::from_secs(1), handle.write(big.as_bytes())).await;
        assert!(queued.is_ok());
        assert!(queued.unwrap().is_ok());

        let started = std::time::Instant::now();
        handle.terminate(Duration::from_millis(500)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_exit_is_observed() {
        let mut handle = ProcessHandle::spawn(sh_spec()).await.unwrap();
        handle.write(b"exit 3\n").await.unwrap();

        while handle.read_chunk().await.is_some() {}
        assert!(handle.output_closed());
        assert_eq!(handle.wait_exit(Duration::from_secs(5)).await, Some(3));
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_terminate_is_idempotent() {
        let mut handle = ProcessHandle::spawn(sh_spec()).await.unwrap();
        let first = handle.terminate(Duration::from_secs(2)).await;
        let second = handle.terminate(Duration::from_secs(2)).await;
        assert_eq!(first, second);
        assert!(handle.write(b"echo nope\n").await.is_err());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_terminate_kills_busy_shell() {
        let mut handle = ProcessHandle::spawn(sh_spec()).await.unwrap();
        handle.write(b"sleep 30\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        handle.terminate(Duration::from_millis(500)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_spawn_missing_shell_fails() {
        let spec = SpawnSpec::new(ShellKind::new("/definitely/not/a/shell"));
        let result = ProcessHandle::spawn(spec).await;
        assert!(matches!(result, Err(ArbitriumError::Spawn { .. })));
    }
}
