//! API request and response types.

use std::path::PathBuf;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ArbitriumError;
use crate::execution::{ExecStatus, ExecutionResult};
use crate::process::ShellDialect;
use crate::session::{SessionId, SessionInfo, ShellSession};

/// Request to create a new session.
pub use crate::session::SpawnOptions as CreateSessionRequest;

/// Response for session creation.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
    /// Program the session runs.
    pub shell: String,
    pub shell_kind: ShellDialect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl CreateSessionResponse {
    pub fn from_session(session: &ShellSession) -> Self {
        Self {
            session_id: session.id().clone(),
            shell: session.shell().program.clone(),
            shell_kind: session.shell().dialect,
            cwd: session.cwd(),
            created_at: session.created_at(),
            pid: session.pid(),
        }
    }
}

/// Request to execute a command.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecRequest {
    /// The command line to execute.
    pub command: String,
    /// Timeout in milliseconds; the server default when absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ExecRequest {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Response for command execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecResponse {
    /// `completed`, `timed_out` or `process_exited`.
    pub status: &'static str,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub process_exited: bool,
    pub duration_ms: u64,
    /// Timeout that expired; only set for timed-out commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ExecResponse {
    pub fn from_result(result: ExecutionResult, timeout: Duration) -> Self {
        let status = match result.status {
            ExecStatus::Completed { .. } => "completed",
            ExecStatus::TimedOut => "timed_out",
            ExecStatus::ProcessExited { .. } => "process_exited",
        };
        let timed_out = result.timed_out();
        Self {
            status,
            exit_code: result.exit_code(),
            timed_out,
            process_exited: result.process_exited_early(),
            duration_ms: result.duration.as_millis() as u64,
            timeout_ms: timed_out.then(|| timeout.as_millis() as u64),
            output: result.output,
        }
    }
}

/// List sessions response.
#[derive(Debug, Clone, Serialize)]
pub struct ListSessionsResponse {
    /// Total number of sessions.
    pub count: usize,
    pub sessions: Vec<SessionInfo>,
}

/// Response for session close.
#[derive(Debug, Clone, Serialize)]
pub struct CloseSessionResponse {
    pub session_id: SessionId,
    pub command_count: u64,
}

/// Generic API error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "SESSION_NOT_FOUND").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn unauthorized() -> Self {
        Self::new("UNAUTHORIZED", "missing or invalid API key")
    }

    /// HTTP status and body for a session-layer error.
    pub fn from_error(err: &ArbitriumError) -> (StatusCode, Self) {
        let (status, code) = match err {
            ArbitriumError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
            ArbitriumError::SessionExists(_) => (StatusCode::CONFLICT, "SESSION_EXISTS"),
            ArbitriumError::InvalidSessionId(_) => (StatusCode::BAD_REQUEST, "INVALID_SESSION_ID"),
            ArbitriumError::SessionBusy(_) => (StatusCode::CONFLICT, "SESSION_BUSY"),
            ArbitriumError::SessionClosed(_) => (StatusCode::GONE, "SESSION_CLOSED"),
            ArbitriumError::ProcessExited { .. } => (StatusCode::GONE, "PROCESS_EXITED"),
            ArbitriumError::Spawn { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "SPAWN_FAILED"),
            ArbitriumError::Unsupported(_) => (StatusCode::NOT_IMPLEMENTED, "UNSUPPORTED"),
            ArbitriumError::Pty(_)
            | ArbitriumError::Io(_)
            | ArbitriumError::LockPoisoned
            | ArbitriumError::Config(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };
        (status, Self::new(code, err.to_string()))
    }
}
