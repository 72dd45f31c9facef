//! Execution result types.

use std::time::Duration;

use serde::Serialize;

/// How an exec ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecStatus {
    /// The completion marker arrived with the command's status.
    Completed { exit_code: i32 },
    /// The deadline passed before the marker arrived.
    TimedOut,
    /// The shell went away while the command ran.
    ProcessExited { exit_code: Option<i32> },
}

/// Result of one exec in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Text the command produced (stdout and stderr merged).
    pub output: String,
    /// How the exec ended.
    pub status: ExecStatus,
    /// Wall time from write to completion.
    pub duration: Duration,
}

impl ExecutionResult {
    /// A command that ran to completion.
    pub fn completed(output: String, exit_code: i32, duration: Duration) -> Self {
        Self {
            output,
            status: ExecStatus::Completed { exit_code },
            duration,
        }
    }

    /// A command still running when the deadline passed.
    pub fn timeout(output: String, duration: Duration) -> Self {
        Self {
            output,
            status: ExecStatus::TimedOut,
            duration,
        }
    }

    /// A command whose shell exited underneath it.
    pub fn process_exited(output: String, exit_code: Option<i32>, duration: Duration) -> Self {
        Self {
            output,
            status: ExecStatus::ProcessExited { exit_code },
            duration,
        }
    }

    /// Exit status, if one is known.
    ///
    /// For an exec that ended with the shell, this is the shell's own code.
    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ExecStatus::Completed { exit_code } => Some(exit_code),
            ExecStatus::TimedOut => None,
            ExecStatus::ProcessExited { exit_code } => exit_code,
        }
    }

    pub fn timed_out(&self) -> bool {
        self.status == ExecStatus::TimedOut
    }

    pub fn process_exited_early(&self) -> bool {
        matches!(self.status, ExecStatus::ProcessExited { .. })
    }

    /// Check if command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.status == ExecStatus::Completed { exit_code: 0 }
    }

    /// Get output as string, trimmed.
    pub fn output_trimmed(&self) -> &str {
        self.output.trim()
    }
}
