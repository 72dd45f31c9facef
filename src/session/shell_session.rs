//! A persistent shell and the commands run in it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, warn};

use super::context::{cwd_probe, parse_cwd};
use super::{SessionContext, SessionId, SessionState};
use crate::error::ArbitriumError;
use crate::execution::{ExecStatus, ExecutionResult, SentinelEngine};
use crate::process::{IoMode, ProcessHandle, ProcessSignaller, ShellKind, SpawnSpec};
use crate::transcript::{LogSink, TranscriptRecord};
use crate::Result;

/// Per-session tuning, fixed at spawn time.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Wait this long for the shell to answer its first round trip.
    pub startup_timeout: Duration,
    /// Grace period between polite termination and kill.
    pub close_grace: Duration,
    /// Refresh the working-directory hint after each completed command.
    pub track_cwd: bool,
    /// Deadline for the working-directory probe.
    pub probe_timeout: Duration,
    /// Rewrite nested `powershell -Command "..."` quoting for POSIX shells.
    pub rewrite_powershell: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(10),
            close_grace: Duration::from_secs(5),
            track_cwd: true,
            probe_timeout: Duration::from_secs(5),
            rewrite_powershell: true,
        }
    }
}

/// Snapshot of a session for listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub shell: String,
    pub shell_kind: crate::process::ShellDialect,
    pub mode: IoMode,
    pub cwd: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    pub command_count: u64,
    pub pid: Option<u32>,
    pub last_command: Option<String>,
    pub alive: bool,
}

/// What closing a session reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseSummary {
    pub session_id: SessionId,
    pub command_count: u64,
    /// Exit status of the shell, when one could be collected.
    pub exit_code: Option<i32>,
}

/// Process and engine, used by one exec at a time.
struct SessionIo {
    handle: ProcessHandle,
    engine: SentinelEngine,
}

/// Metadata guarded separately from I/O so it can be read mid-exec.
#[derive(Debug)]
struct SessionMeta {
    state: SessionState,
    context: SessionContext,
}

/// One long-lived shell.
///
/// At most one command runs at a time: a second `exec` while one is in
/// flight fails with [`ArbitriumError::SessionBusy`] rather than queueing.
/// `interrupt` and `close` work while a command runs.
pub struct ShellSession {
    id: SessionId,
    shell: ShellKind,
    mode: IoMode,
    pid: Option<u32>,
    created_at: DateTime<Utc>,
    settings: SessionSettings,
    io: tokio::sync::Mutex<SessionIo>,
    meta: Mutex<SessionMeta>,
    signaller: ProcessSignaller,
    closing: watch::Sender<bool>,
    summary: OnceCell<CloseSummary>,
    log_sink: Arc<dyn LogSink>,
}

impl ShellSession {
    /// Spawn a shell and bring it to a state where it accepts commands.
    pub async fn spawn(
        id: SessionId,
        spec: SpawnSpec,
        settings: SessionSettings,
        log_sink: Arc<dyn LogSink>,
    ) -> Result<Self> {
        let cwd = match &spec.cwd {
            Some(dir) => Some(dir.clone()),
            None => std::env::current_dir().ok(),
        };
        let mode = spec.mode;
        let shell = spec.shell.clone();

        let mut handle = ProcessHandle::spawn(spec).await?;
        let mut engine = SentinelEngine::new(id.as_str(), shell.dialect, mode)
            .with_powershell_rewrite(settings.rewrite_powershell);

        let (closing, mut closed) = watch::channel(false);
        if let Err(e) = engine
            .start(&mut handle, settings.startup_timeout, &mut closed)
            .await
        {
            handle.terminate(settings.close_grace).await;
            return Err(e);
        }

        let pid = handle.pid();
        let signaller = handle.signaller();
        let context = SessionContext::new(cwd.clone());

        let session = Self {
            id,
            shell,
            mode,
            pid,
            created_at: Utc::now(),
            settings,
            io: tokio::sync::Mutex::new(SessionIo { handle, engine }),
            meta: Mutex::new(SessionMeta {
                state: SessionState::Running,
                context,
            }),
            signaller,
            closing,
            summary: OnceCell::new(),
            log_sink,
        };

        session.sink_call("open", |sink| sink.open(session.id.as_str()));
        session.record(TranscriptRecord::Started {
            shell: session.shell.program.clone(),
            cwd: cwd
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "?".into()),
        });
        info!(session = %session.id, shell = %session.shell, pid = ?pid, "Session started");
        Ok(session)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn shell(&self) -> &ShellKind {
        &self.shell
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.meta().state
    }

    pub fn is_closed(&self) -> bool {
        *self.closing.borrow()
    }

    /// Last known working directory.
    pub fn cwd(&self) -> Option<PathBuf> {
        self.meta().context.cwd().map(Path::to_path_buf)
    }

    pub fn command_count(&self) -> u64 {
        self.meta().context.command_count()
    }

    /// Whether the shell process is still running.
    ///
    /// A session with a command in flight is reported alive; the exec
    /// itself notices if the shell goes away.
    pub fn is_alive(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.io.try_lock() {
            Ok(mut io) => io.handle.is_alive(),
            Err(_) => true,
        }
    }

    /// Exit code of the shell, if it has exited and nothing holds the I/O.
    pub fn exit_code(&self) -> Option<i32> {
        self.io.try_lock().ok().and_then(|io| io.handle.exit_code())
    }

    /// Run one command and wait for it to finish or time out.
    pub async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecutionResult> {
        if self.is_closed() {
            return Err(ArbitriumError::SessionClosed(self.id.to_string()));
        }
        let mut guard = self
            .io
            .try_lock()
            .map_err(|_| ArbitriumError::SessionBusy(self.id.to_string()))?;
        let io = &mut *guard;

        // A close may have won the race for the lock.
        if self.is_closed() {
            return Err(ArbitriumError::SessionClosed(self.id.to_string()));
        }
        if !io.handle.is_alive() {
            return Err(ArbitriumError::ProcessExited {
                session: self.id.to_string(),
                exit_code: io.handle.exit_code(),
            });
        }

        let _busy = BusyGuard::enter(self);
        self.record(TranscriptRecord::Command {
            command: command.to_string(),
        });
        debug!(session = %self.id, timeout = ?timeout, "Executing: {}", command);

        let mut closed = self.closing.subscribe();
        let outcome = io
            .engine
            .execute(&mut io.handle, command, timeout, &mut closed)
            .await;

        let result = outcome?;

        self.record(match result.status {
            ExecStatus::Completed { exit_code } => TranscriptRecord::Completed {
                output: result.output.clone(),
                exit_code,
            },
            ExecStatus::TimedOut => TranscriptRecord::TimedOut {
                output: result.output.clone(),
                timeout,
            },
            ExecStatus::ProcessExited { exit_code } => TranscriptRecord::ProcessExited {
                output: result.output.clone(),
                exit_code,
            },
        });
        if !result.process_exited_early() {
            self.meta()
                .context
                .record(command, result.exit_code());
        }

        if self.settings.track_cwd && matches!(result.status, ExecStatus::Completed { .. }) {
            self.refresh_cwd(io, &mut closed).await;
        }
        Ok(result)
    }

    /// Ask the shell where it is and remember the answer.
    async fn refresh_cwd(&self, io: &mut SessionIo, closed: &mut watch::Receiver<bool>) {
        let probe = cwd_probe(self.shell.dialect);
        match io
            .engine
            .execute(&mut io.handle, probe, self.settings.probe_timeout, closed)
            .await
        {
            Ok(result) if result.success() => {
                if let Some(cwd) = parse_cwd(&result.output) {
                    let changed = self.meta().context.update_cwd(cwd.clone());
                    if changed {
                        debug!(session = %self.id, cwd = %cwd.display(), "Working directory changed");
                    }
                }
            }
            Ok(result) => {
                debug!(session = %self.id, status = ?result.status, "Working directory probe failed");
            }
            Err(e) => {
                debug!(session = %self.id, "Working directory probe failed: {}", e);
            }
        }
    }

    /// Interrupt the foreground command (SIGINT or `^C`).
    pub fn interrupt(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ArbitriumError::SessionClosed(self.id.to_string()));
        }
        debug!(session = %self.id, "Interrupting foreground command");
        self.signaller.interrupt()
    }

    /// Close the session: stop any in-flight exec, end the shell, close
    /// the transcript.
    ///
    /// Every call, concurrent or later, returns the same summary.
    pub async fn close(&self) -> CloseSummary {
        self.summary
            .get_or_init(|| self.close_once())
            .await
            .clone()
    }

    async fn close_once(&self) -> CloseSummary {
        self.set_state(SessionState::Closed);
        self.closing.send_replace(true);

        // An in-flight exec sees the signal and releases the lock.
        let mut io = self.io.lock().await;
        let exit_code = io.handle.terminate(self.settings.close_grace).await;
        drop(io);

        let command_count = self.command_count();
        self.record(TranscriptRecord::Closed { command_count });
        self.sink_call("close", |sink| sink.close(self.id.as_str()));
        info!(session = %self.id, command_count, exit_code = ?exit_code, "Session closed");

        CloseSummary {
            session_id: self.id.clone(),
            command_count,
            exit_code,
        }
    }

    /// Describe the session for listings.
    pub fn describe(&self) -> SessionInfo {
        let alive = self.is_alive();
        let meta = self.meta();
        SessionInfo {
            session_id: self.id.clone(),
            shell: self.shell.program.clone(),
            shell_kind: self.shell.dialect,
            mode: self.mode,
            cwd: meta.context.cwd().map(Path::to_path_buf),
            created_at: self.created_at,
            state: meta.state,
            command_count: meta.context.command_count(),
            pid: self.pid,
            last_command: meta.context.last_command().map(|last| last.command.clone()),
            alive,
        }
    }

    fn set_state(&self, target: SessionState) {
        let mut meta = self.meta();
        if meta.state != target && !meta.state.transition_to(target) {
            debug!(session = %self.id, from = %meta.state, to = %target, "State change ignored");
        }
    }

    /// Metadata lock. Poisoning only means a panic elsewhere mid-update;
    /// the data is still usable.
    fn meta(&self) -> MutexGuard<'_, SessionMeta> {
        self.meta.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, record: TranscriptRecord) {
        self.sink_call("append", |sink| sink.append(self.id.as_str(), &record));
    }

    fn sink_call(&self, what: &str, f: impl FnOnce(&dyn LogSink) -> std::io::Result<()>) {
        if let Err(e) = f(self.log_sink.as_ref()) {
            warn!(session = %self.id, "Transcript {} failed: {}", what, e);
        }
    }
}

/// Marks a session busy for as long as an exec holds it, including when
/// the exec future is dropped midway.
struct BusyGuard<'a> {
    session: &'a ShellSession,
}

impl<'a> BusyGuard<'a> {
    fn enter(session: &'a ShellSession) -> Self {
        session.set_state(SessionState::Busy);
        Self { session }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.session.set_state(SessionState::Running);
    }
}

impl std::fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellSession")
            .field("id", &self.id)
            .field("shell", &self.shell)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
