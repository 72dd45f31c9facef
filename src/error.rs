//! Error types for arbitrium.

use thiserror::Error;

/// Main error type for arbitrium operations.
#[derive(Error, Debug)]
pub enum ArbitriumError {
    /// The shell process could not be started.
    #[error("failed to start shell '{shell}': {reason}")]
    Spawn { shell: String, reason: String },

    /// Session with the given ID was not found.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session with the given ID already exists.
    #[error("session already exists: {0}")]
    SessionExists(String),

    /// Caller-supplied session ID is not acceptable.
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    /// Another command is already executing in this session.
    #[error("session busy: {0}")]
    SessionBusy(String),

    /// Session has been closed and cannot run commands.
    #[error("session closed: {0}")]
    SessionClosed(String),

    /// The shell process exited on its own.
    #[error("shell process for session {session} exited (code {exit_code:?})")]
    ProcessExited {
        session: String,
        exit_code: Option<i32>,
    },

    /// PTY-related error.
    #[error("PTY error: {0}")]
    Pty(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// Operation not available on this platform or I/O mode.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ArbitriumError {
    pub(crate) fn spawn(shell: impl Into<String>, reason: impl ToString) -> Self {
        Self::Spawn {
            shell: shell.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience Result type for arbitrium operations.
pub type Result<T> = std::result::Result<T, ArbitriumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_display() {
        let err = ArbitriumError::SessionNotFound("sess-00000001".into());
        assert!(err.to_string().contains("sess-00000001"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_session_exists_display() {
        let err = ArbitriumError::SessionExists("build".into());
        assert!(err.to_string().contains("build"));
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ArbitriumError = io_err.into();
        assert!(matches!(err, ArbitriumError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_spawn_error_display() {
        let err = ArbitriumError::spawn("/no/such/shell", "No such file or directory");
        let msg = err.to_string();
        assert!(msg.contains("/no/such/shell"));
        assert!(msg.contains("No such file"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ArbitriumError::Config("invalid port".into());
        assert_eq!(err.to_string(), "configuration error: invalid port");
    }

    #[test]
    fn test_process_exited_display() {
        let err = ArbitriumError::ProcessExited {
            session: "sess-0000000a".into(),
            exit_code: Some(7),
        };
        assert!(err.to_string().contains("exited"));
        assert!(err.to_string().contains('7'));
    }
}
