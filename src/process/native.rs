//! Native PTY implementation using portable-pty.

use std::time::Duration;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    AsyncPtyReader, AsyncPtyWriter, ProcessHandle, PtySize, SpawnSpec, INPUT_CHANNEL_CAPACITY,
    OUTPUT_CHANNEL_CAPACITY,
};
use crate::error::ArbitriumError;
use crate::Result;

/// Wrapper around the native PTY system.
pub struct NativePty {
    pty_system: Box<dyn portable_pty::PtySystem + Send>,
    size: PtySize,
}

impl NativePty {
    /// Create a new NativePty instance.
    pub fn new() -> Self {
        Self {
            pty_system: native_pty_system(),
            size: PtySize::default(),
        }
    }

    /// Spawn the shell described by `spec` inside a new PTY.
    ///
    /// Reader and writer run on dedicated threads and are bridged to the
    /// returned handle through channels.
    pub fn spawn(&self, spec: &SpawnSpec) -> Result<ProcessHandle> {
        let program = &spec.shell.program;
        let pair = self
            .pty_system
            .openpty(portable_pty::PtySize {
                rows: self.size.rows,
                cols: self.size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ArbitriumError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(program);
        for arg in spec.shell.dialect.stdin_args() {
            cmd.arg(arg);
        }
        if let Some(dir) = &spec.cwd {
            cmd.cwd(dir);
        }
        for name in &spec.env_remove {
            cmd.env_remove(name);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        // Keep line editing out of the byte stream.
        cmd.env("TERM", "dumb");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ArbitriumError::spawn(program, e))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ArbitriumError::Pty(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ArbitriumError::Pty(e.to_string()))?;

        let pid = child.process_id();
        let tag = pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into());

        let (out_tx, out_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        AsyncPtyReader::new(reader, out_tx).spawn(format!("pty-read-{tag}"))?;
        AsyncPtyWriter::new(writer, in_rx).spawn(format!("pty-write-{tag}"))?;

        debug!(shell = %spec.shell, pid = ?pid, "Spawned PTY shell");

        let child = PtyChild {
            killer: child.clone_killer(),
            child: Some(child),
            waiter: None,
            pid,
            _master: pair.master,
        };
        Ok(ProcessHandle::from_parts_pty(
            spec.shell.clone(),
            child,
            in_tx,
            out_rx,
        ))
    }
}

impl Default for NativePty {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a blocking `wait` performed on a worker thread.
type WaitOutcome = (Box<dyn Child + Send + Sync>, std::io::Result<portable_pty::ExitStatus>);

/// A child running inside a PTY, plus the master side that must outlive it.
pub(crate) struct PtyChild {
    child: Option<Box<dyn Child + Send + Sync>>,
    waiter: Option<JoinHandle<WaitOutcome>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
    _master: Box<dyn MasterPty + Send>,
}

impl PtyChild {
    pub(crate) fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking exit check. While a blocking wait is outstanding the
    /// child is reported as running.
    pub(crate) fn try_wait(&mut self) -> std::io::Result<Option<i32>> {
        match self.child.as_mut() {
            Some(child) => Ok(child.try_wait()?.map(|s| s.exit_code() as i32)),
            None => Ok(None),
        }
    }

    /// Wait on a worker thread until the child exits or `limit` passes.
    ///
    /// A wait that outlives `limit` stays pending and is resumed by the
    /// next call, so the child is never lost.
    pub(crate) async fn wait_timeout(&mut self, limit: Duration) -> Option<i32> {
        if self.waiter.is_none() {
            let mut child = self.child.take()?;
            self.waiter = Some(tokio::task::spawn_blocking(move || {
                let status = child.wait();
                (child, status)
            }));
        }
        let waiter = self.waiter.as_mut()?;

        match tokio::time::timeout(limit, waiter).await {
            Ok(joined) => {
                self.waiter = None;
                match joined {
                    Ok((child, Ok(status))) => {
                        self.child = Some(child);
                        Some(status.exit_code() as i32)
                    }
                    Ok((child, Err(e))) => {
                        self.child = Some(child);
                        warn!(pid = ?self.pid, "Failed to wait for PTY shell: {}", e);
                        None
                    }
                    Err(e) => {
                        warn!(pid = ?self.pid, "PTY wait task failed: {}", e);
                        None
                    }
                }
            }
            Err(_) => None,
        }
    }

    pub(crate) async fn kill_and_wait(&mut self) -> Option<i32> {
        if let Err(e) = self.killer.kill() {
            debug!(pid = ?self.pid, "PTY kill: {}", e);
        }
        self.wait_timeout(Duration::from_secs(5)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{IoMode, ShellKind};

    #[test]
    fn test_native_pty_default_size() {
        assert_eq!(NativePty::default().size, PtySize::default());
    }

    #[tokio::test]
    #[cfg(unix)]
    #[ignore = "Requires PTY"]
    async fn test_spawn_pty_shell() {
        let mut spec = SpawnSpec::new(ShellKind::new("/bin/sh"));
        spec.mode = IoMode::Pty;

        let mut handle = NativePty::new().spawn(&spec).unwrap();
        assert!(handle.pid().is_some());
        handle.write(b"echo PTY_OK\n").await.unwrap();

        let mut seen = Vec::new();
        while let Ok(Some(chunk)) =
            tokio::time::timeout(Duration::from_secs(5), handle.read_chunk()).await
        {
            seen.extend(chunk);
            if String::from_utf8_lossy(&seen).matches("PTY_OK").count() >= 2 {
                break;
            }
        }
        assert!(String::from_utf8_lossy(&seen).contains("PTY_OK"));
        handle.terminate(Duration::from_secs(2)).await;
    }
}
