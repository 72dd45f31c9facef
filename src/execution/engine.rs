//! Request/response execution over a shell's byte stream.

use std::borrow::Cow;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::quoting::fix_powershell_quoting;
use super::result::ExecutionResult;
use super::sentinel::{frame_command, Marker, SentinelScanner};
use crate::error::ArbitriumError;
use crate::output::OutputSanitizer;
use crate::process::{IoMode, ProcessHandle, ShellDialect};
use crate::Result;

/// Default execution timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the exit status once the output stream has ended.
const EXIT_WAIT: Duration = Duration::from_secs(2);

/// Runs commands on one shell and recovers their output and status.
///
/// The engine keeps the bookkeeping that must survive between execs in
/// its scanner: markers of commands that timed out or whose exec was
/// dropped, and bytes that arrived after the last marker. Every byte read
/// from the shell lands there before the next await point, so an exec
/// future may be dropped at any time without losing track of the stream.
#[derive(Debug)]
pub struct SentinelEngine {
    label: String,
    dialect: ShellDialect,
    terminal: bool,
    rewrite_powershell: bool,
    scanner: SentinelScanner,
}

impl SentinelEngine {
    /// Engine for a shell of `dialect` wired through `mode`.
    ///
    /// `label` names the session in logs and errors.
    pub fn new(label: impl Into<String>, dialect: ShellDialect, mode: IoMode) -> Self {
        Self {
            label: label.into(),
            dialect,
            terminal: mode == IoMode::Pty,
            rewrite_powershell: true,
            scanner: SentinelScanner::new(),
        }
    }

    /// Enable or disable the nested PowerShell quoting rewrite.
    pub fn with_powershell_rewrite(mut self, enabled: bool) -> Self {
        self.rewrite_powershell = enabled;
        self
    }

    /// Number of abandoned markers still expected on the stream.
    pub fn stale_markers(&self) -> usize {
        self.scanner.stale().len()
    }

    /// Commands written once, before the first exec.
    ///
    /// Pipe-mode POSIX shells fold stderr into stdout so the two streams
    /// stay ordered, and ignore SIGINT themselves so that an interrupt only
    /// stops the foreground command. Terminal shells lose their echo and
    /// prompts.
    pub fn preamble(&self) -> Option<&'static str> {
        match (self.dialect, self.terminal) {
            (ShellDialect::Posix, false) => Some("exec 2>&1\ntrap ':' INT\n"),
            (ShellDialect::Posix, true) => {
                Some("stty -echo 2>/dev/null; PS1=''; PS2=''; PROMPT=''; unset PROMPT_COMMAND\n")
            }
            (ShellDialect::PowerShell, true) => Some("function prompt { '' }\r\n"),
            (ShellDialect::Cmd, true) => Some("prompt $S\r\n"),
            (ShellDialect::PowerShell, false) | (ShellDialect::Cmd, false) => None,
        }
    }

    /// Prepare a freshly spawned shell.
    ///
    /// Writes the preamble and performs one empty round trip so that any
    /// banner or rc-file output is consumed before the first real command.
    pub async fn start(
        &mut self,
        handle: &mut ProcessHandle,
        timeout: Duration,
        closed: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        if let Some(preamble) = self.preamble() {
            handle.write(preamble.as_bytes()).await?;
        }

        let warmup = self.execute(handle, "", timeout, closed).await?;
        if warmup.process_exited_early() {
            return Err(ArbitriumError::spawn(
                &handle.shell().program,
                format!("shell exited during startup (code {:?})", warmup.exit_code()),
            ));
        }
        if warmup.timed_out() {
            warn!(
                session = %self.label,
                "Shell did not answer the startup probe within {:?}",
                timeout
            );
        } else if !warmup.output.is_empty() {
            debug!(session = %self.label, "Startup output: {:?}", warmup.output);
        }
        Ok(())
    }

    /// Run `command` and wait for its marker, the deadline, EOF or close.
    ///
    /// Timeouts and a shell exiting mid-command are results; the only
    /// error paths are I/O failures and `closed` firing. The deadline also
    /// bounds handing the command to the shell, so a shell that stopped
    /// reading its input cannot stall the caller.
    pub async fn execute(
        &mut self,
        handle: &mut ProcessHandle,
        command: &str,
        timeout: Duration,
        closed: &mut watch::Receiver<bool>,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        if let Some(abandoned) = self.scanner.current() {
            warn!(
                session = %self.label,
                marker = %abandoned,
                "Previous exec was dropped before it finished; discarding its output"
            );
        }
        let dropped = self.scanner.settle(&handle.drain_available());
        if dropped > 0 {
            info!(
                session = %self.label,
                bytes = self.scanner.discarded(),
                "Discarded {} bytes of stale output",
                dropped
            );
        }

        let marker = Marker::generate();
        let command = self.prepare_command(command);
        let framed = frame_command(self.dialect, &command, &marker);
        tokio::select! {
            written = handle.write(framed.as_bytes()) => {
                if let Err(e) = written {
                    if !handle.is_alive() {
                        return Ok(ExecutionResult::process_exited(
                            String::new(),
                            handle.exit_code(),
                            started.elapsed(),
                        ));
                    }
                    return Err(e);
                }
                self.scanner.arm(marker);
            }
            _ = tokio::time::sleep_until(deadline) => {
                info!(session = %self.label, "Shell input is full; command not sent within {:?}", timeout);
                return Ok(ExecutionResult::timeout(String::new(), started.elapsed()));
            }
            _ = wait_closed(closed) => {
                debug!(session = %self.label, "Exec abandoned before sending: session closing");
                return Err(ArbitriumError::SessionClosed(self.label.clone()));
            }
        }

        loop {
            tokio::select! {
                chunk = handle.read_chunk() => match chunk {
                    Some(bytes) => {
                        if let Some(done) = self.scanner.push(&bytes) {
                            let output = self.decode(&done.output);
                            debug!(
                                session = %self.label,
                                exit_code = done.exit_code,
                                "Command completed in {:?}",
                                started.elapsed()
                            );
                            return Ok(ExecutionResult::completed(
                                output,
                                done.exit_code,
                                started.elapsed(),
                            ));
                        }
                    }
                    None => {
                        let output = self.decode(self.scanner.partial_output());
                        self.scanner.abandon();
                        let code = handle.wait_exit(EXIT_WAIT).await;
                        info!(session = %self.label, exit_code = ?code, "Shell exited during command");
                        return Ok(ExecutionResult::process_exited(output, code, started.elapsed()));
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    let output = self.decode(self.scanner.partial_output());
                    self.scanner.abandon();
                    if !handle.is_alive() {
                        let code = handle.exit_code();
                        info!(session = %self.label, exit_code = ?code, "Shell exited during command");
                        return Ok(ExecutionResult::process_exited(output, code, started.elapsed()));
                    }
                    info!(
                        session = %self.label,
                        stale = self.scanner.stale().len(),
                        "Command timed out after {:?}",
                        timeout
                    );
                    return Ok(ExecutionResult::timeout(output, started.elapsed()));
                }
                _ = wait_closed(closed) => {
                    self.scanner.abandon();
                    debug!(session = %self.label, "Exec abandoned: session closing");
                    return Err(ArbitriumError::SessionClosed(self.label.clone()));
                }
            }
        }
    }

    fn prepare_command<'a>(&self, command: &'a str) -> Cow<'a, str> {
        if self.rewrite_powershell && self.dialect == ShellDialect::Posix {
            fix_powershell_quoting(command)
        } else {
            Cow::Borrowed(command)
        }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        OutputSanitizer::clean(bytes, self.terminal)
    }
}

/// Resolve once the close flag is raised. Never resolves if the sender is
/// gone without raising it.
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    if closed.wait_for(|closed| *closed).await.is_err() {
        std::future::pending::<()>().await;
    }
}
