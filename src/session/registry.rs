//! Registry of live sessions.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{CloseSummary, SessionId, SessionInfo, SessionSettings, ShellSession};
use crate::error::ArbitriumError;
use crate::execution::{ExecutionResult, DEFAULT_TIMEOUT};
use crate::process::{IoMode, ShellKind, SpawnSpec};
use crate::transcript::{LogSink, NullLogSink};
use crate::Result;

/// How many closed sessions are remembered for repeated `close` calls.
pub const RETIRED_CAPACITY: usize = 1024;

/// Registry-wide defaults applied to every spawned session.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Shell used when a spawn request names none; detected when `None`.
    pub default_shell: Option<String>,
    /// Exec timeout when a request gives none.
    pub default_timeout: Duration,
    /// Stream wiring when a request gives none.
    pub default_mode: IoMode,
    /// Inherited environment variables removed from every shell.
    pub env_remove: Vec<String>,
    /// Per-session tuning.
    pub session: SessionSettings,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_shell: None,
            default_timeout: DEFAULT_TIMEOUT,
            default_mode: IoMode::Pipe,
            env_remove: Vec::new(),
            session: SessionSettings::default(),
        }
    }
}

/// Parameters for creating a new session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpawnOptions {
    /// Caller-chosen id; generated when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Shell program; registry default when absent.
    #[serde(default)]
    pub shell: Option<String>,
    /// Initial working directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Environment overrides.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Stream wiring.
    #[serde(default)]
    pub mode: Option<IoMode>,
}

struct LiveEntry {
    seq: u64,
    session: Arc<ShellSession>,
}

/// A session removed from the live map.
enum Retired {
    /// Close in progress; later callers wait on the same close.
    Closing(Arc<ShellSession>),
    Closed(CloseSummary),
}

#[derive(Default)]
struct RegistryInner {
    live: HashMap<SessionId, LiveEntry>,
    retired: HashMap<SessionId, Retired>,
    retired_order: VecDeque<SessionId>,
}

impl RegistryInner {
    fn retire(&mut self, id: SessionId, session: Arc<ShellSession>) {
        self.retired_order.retain(|old| old != &id);
        self.retired_order.push_back(id.clone());
        self.retired.insert(id, Retired::Closing(session));
        while self.retired_order.len() > RETIRED_CAPACITY {
            if let Some(oldest) = self.retired_order.pop_front() {
                self.retired.remove(&oldest);
            }
        }
    }

    fn settle(&mut self, summary: &CloseSummary) {
        if let Some(slot) = self.retired.get_mut(summary.session_id.as_str()) {
            *slot = Retired::Closed(summary.clone());
        }
    }

    fn forget(&mut self, id: &SessionId) {
        if self.retired.remove(id.as_str()).is_some() {
            self.retired_order.retain(|old| old != id);
        }
    }
}

/// Concurrency-safe map of session id to live session.
///
/// The map lock is held only for map operations, never across an await.
/// An id is removed from the live map before its shell is terminated, so
/// no lookup can resolve to a session that is being torn down.
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
    next_seq: AtomicU64,
    config: RegistryConfig,
    log_sink: Arc<dyn LogSink>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig, log_sink: Arc<dyn LogSink>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            next_seq: AtomicU64::new(0),
            config,
            log_sink,
        }
    }

    /// Registry with default settings and no transcripts.
    pub fn with_defaults() -> Self {
        Self::new(RegistryConfig::default(), Arc::new(NullLogSink))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Start a new session.
    pub async fn spawn(&self, options: SpawnOptions) -> Result<Arc<ShellSession>> {
        let id = match options.session_id.as_deref() {
            Some(name) => SessionId::named(name)?,
            None => SessionId::generate(),
        };
        if self.read()?.live.contains_key(&id) {
            return Err(ArbitriumError::SessionExists(id.to_string()));
        }

        let requested = options.shell.as_deref().or(self.config.default_shell.as_deref());
        let mut spec = SpawnSpec::new(ShellKind::resolve(requested));
        spec.cwd = options.cwd;
        spec.env = options.env;
        spec.env_remove = self.config.env_remove.clone();
        spec.mode = options.mode.unwrap_or(self.config.default_mode);

        let session = Arc::new(
            ShellSession::spawn(
                id.clone(),
                spec,
                self.config.session.clone(),
                self.log_sink.clone(),
            )
            .await?,
        );

        let inserted = {
            let mut inner = self.write()?;
            if inner.live.contains_key(&id) {
                false
            } else {
                inner.forget(&id);
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                inner.live.insert(
                    id.clone(),
                    LiveEntry {
                        seq,
                        session: session.clone(),
                    },
                );
                true
            }
        };
        if !inserted {
            // Lost a race with a concurrent spawn of the same name.
            session.close().await;
            return Err(ArbitriumError::SessionExists(id.to_string()));
        }

        info!(session = %id, "Session registered");
        Ok(session)
    }

    /// Look up a live session.
    ///
    /// A session whose shell has exited is closed and removed, and reported
    /// as not found.
    pub async fn get(&self, id: &str) -> Result<Arc<ShellSession>> {
        let session = self
            .read()?
            .live
            .get(id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| ArbitriumError::SessionNotFound(id.to_string()))?;
        if !session.is_alive() {
            self.prune(&session).await;
            return Err(ArbitriumError::SessionNotFound(id.to_string()));
        }
        Ok(session)
    }

    /// Run a command in a session.
    ///
    /// `timeout` falls back to the registry default.
    pub async fn exec(
        &self,
        id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        let session = self.resolve(id)?;
        if !session.is_alive() {
            let exit_code = session.exit_code();
            self.prune(&session).await;
            return Err(ArbitriumError::ProcessExited {
                session: id.to_string(),
                exit_code,
            });
        }

        let timeout = timeout.unwrap_or(self.config.default_timeout);
        match session.exec(command, timeout).await {
            Ok(result) => {
                if result.process_exited_early() {
                    self.prune(&session).await;
                }
                Ok(result)
            }
            Err(e @ ArbitriumError::ProcessExited { .. }) => {
                self.prune(&session).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Interrupt the foreground command of a session.
    pub fn interrupt(&self, id: &str) -> Result<()> {
        self.resolve(id)?.interrupt()
    }

    /// Describe every live session, in spawn order.
    pub async fn list(&self) -> Result<Vec<SessionInfo>> {
        let mut entries: Vec<(u64, Arc<ShellSession>)> = self
            .read()?
            .live
            .values()
            .map(|entry| (entry.seq, entry.session.clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);

        let mut infos = Vec::with_capacity(entries.len());
        for (_, session) in entries {
            if session.is_alive() {
                infos.push(session.describe());
            } else {
                self.prune(&session).await;
            }
        }
        Ok(infos)
    }

    /// Close a session.
    ///
    /// Closing an already closed id returns its original summary.
    pub async fn close(&self, id: &str) -> Result<CloseSummary> {
        let session = {
            let mut inner = self.write()?;
            if let Some(entry) = inner.live.remove(id) {
                inner.retire(entry.session.id().clone(), entry.session.clone());
                entry.session
            } else {
                match inner.retired.get(id) {
                    Some(Retired::Closing(session)) => session.clone(),
                    Some(Retired::Closed(summary)) => return Ok(summary.clone()),
                    None => return Err(ArbitriumError::SessionNotFound(id.to_string())),
                }
            }
        };
        Ok(self.finish_close(&session).await)
    }

    /// Close every live session concurrently. Failures are logged.
    pub async fn close_all(&self) -> Vec<CloseSummary> {
        let sessions: Vec<Arc<ShellSession>> = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let mut drained: Vec<LiveEntry> = inner.live.drain().map(|(_, entry)| entry).collect();
            drained.sort_by_key(|entry| entry.seq);
            for entry in &drained {
                inner.retire(entry.session.id().clone(), entry.session.clone());
            }
            drained.into_iter().map(|entry| entry.session).collect()
        };
        if sessions.is_empty() {
            return Vec::new();
        }
        info!(count = sessions.len(), "Closing all sessions");

        let mut tasks = JoinSet::new();
        for session in sessions {
            tasks.spawn(async move { session.close().await });
        }

        let mut summaries = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(summary) => {
                    self.inner
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .settle(&summary);
                    summaries.push(summary);
                }
                Err(e) => warn!("Session close task failed: {}", e),
            }
        }
        summaries
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.live.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live session, or why there is none.
    fn resolve(&self, id: &str) -> Result<Arc<ShellSession>> {
        let inner = self.read()?;
        if let Some(entry) = inner.live.get(id) {
            return Ok(entry.session.clone());
        }
        if inner.retired.contains_key(id) {
            return Err(ArbitriumError::SessionClosed(id.to_string()));
        }
        Err(ArbitriumError::SessionNotFound(id.to_string()))
    }

    /// Remove and close a session whose shell exited on its own.
    async fn prune(&self, session: &Arc<ShellSession>) {
        let removed = match self.write() {
            Ok(mut inner) => {
                let ours = inner
                    .live
                    .get(session.id().as_str())
                    .is_some_and(|entry| Arc::ptr_eq(&entry.session, session));
                if ours {
                    inner.live.remove(session.id().as_str());
                    inner.retire(session.id().clone(), session.clone());
                }
                ours
            }
            Err(e) => {
                warn!(session = %session.id(), "Cannot prune session: {}", e);
                false
            }
        };
        if removed {
            debug!(session = %session.id(), "Pruning exited session");
            self.finish_close(session).await;
        }
    }

    async fn finish_close(&self, session: &ShellSession) -> CloseSummary {
        let summary = session.close().await;
        match self.write() {
            Ok(mut inner) => inner.settle(&summary),
            Err(e) => warn!(session = %summary.session_id, "Cannot record close: {}", e),
        }
        summary
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RegistryInner>> {
        self.inner.read().map_err(|_| ArbitriumError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RegistryInner>> {
        self.inner.write().map_err(|_| ArbitriumError::LockPoisoned)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_options_from_json() {
        let opts: SpawnOptions =
            serde_json::from_str(r#"{"session_id": "build", "mode": "pty"}"#).unwrap();
        assert_eq!(opts.session_id.as_deref(), Some("build"));
        assert_eq!(opts.mode, Some(IoMode::Pty));
        assert!(opts.env.is_empty());

        let empty: SpawnOptions = serde_json::from_str("{}").unwrap();
        assert!(empty.session_id.is_none());
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let registry = SessionRegistry::with_defaults();
        assert!(matches!(
            registry.get("nope").await,
            Err(ArbitriumError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.exec("nope", "true", None).await,
            Err(ArbitriumError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.close("nope").await,
            Err(ArbitriumError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.interrupt("nope"),
            Err(ArbitriumError::SessionNotFound(_))
        ));
        assert!(registry.list().await.unwrap().is_empty());
        assert!(registry.close_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_name_rejected_before_spawn() {
        let registry = SessionRegistry::with_defaults();
        let err = registry
            .spawn(SpawnOptions {
                session_id: Some("bad name".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ArbitriumError::InvalidSessionId(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_missing_shell_is_spawn_error() {
        let registry = SessionRegistry::with_defaults();
        let err = registry
            .spawn(SpawnOptions {
                shell: Some("/nonexistent/shell-for-arbitrium".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ArbitriumError::Spawn { .. }));
        assert!(registry.is_empty());
    }

    #[cfg(unix)]
    fn sh_options(name: Option<&str>) -> SpawnOptions {
        SpawnOptions {
            session_id: name.map(str::to_string),
            shell: Some("/bin/sh".into()),
            ..Default::default()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_retired_bound() {
        let registry = SessionRegistry::with_defaults();
        let session = registry.spawn(sh_options(None)).await.unwrap();
        let id = session.id().to_string();
        registry.close(&id).await.unwrap();

        let inner = registry.read().unwrap();
        assert!(inner.retired.contains_key(id.as_str()));
        assert!(inner.retired_order.len() <= RETIRED_CAPACITY);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let registry = SessionRegistry::with_defaults();
        registry.spawn(sh_options(Some("dup"))).await.unwrap();
        let err = registry.spawn(sh_options(Some("dup"))).await.unwrap_err();
        assert!(matches!(err, ArbitriumError::SessionExists(_)));
        assert_eq!(registry.len(), 1);
        registry.close_all().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_name_reusable_after_close() {
        let registry = SessionRegistry::with_defaults();
        registry.spawn(sh_options(Some("again"))).await.unwrap();
        registry.close("again").await.unwrap();
        registry.spawn(sh_options(Some("again"))).await.unwrap();
        let out = registry.exec("again", "echo back", None).await.unwrap();
        assert_eq!(out.output, "back");
        registry.close_all().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_in_spawn_order() {
        let registry = SessionRegistry::with_defaults();
        for name in ["first", "second", "third"] {
            registry.spawn(sh_options(Some(name))).await.unwrap();
        }
        let names: Vec<String> = registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|info| info.session_id.to_string())
            .collect();
        assert_eq!(names, ["first", "second", "third"]);

        let summaries = registry.close_all().await;
        assert_eq!(summaries.len(), 3);
        assert!(registry.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exited_shell_is_pruned() {
        let registry = SessionRegistry::with_defaults();
        registry.spawn(sh_options(Some("short"))).await.unwrap();

        let result = registry.exec("short", "exit 7", None).await.unwrap();
        assert!(result.process_exited_early());
        assert_eq!(result.exit_code(), Some(7));

        assert!(registry.list().await.unwrap().is_empty());
        assert!(matches!(
            registry.get("short").await,
            Err(ArbitriumError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.exec("short", "true", None).await,
            Err(ArbitriumError::SessionClosed(_))
        ));
    }
}
