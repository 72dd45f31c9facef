//! What a session remembers about its shell between commands.

use std::path::{Path, PathBuf};

use crate::process::ShellDialect;

/// The most recent command a session ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub command: String,
    /// `None` for a timed-out command.
    pub exit_code: Option<i32>,
}

/// Working-directory hint plus command history summary.
///
/// The shell owns the real working directory; this copy is refreshed by
/// probing after each completed command and may lag behind.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    cwd: Option<PathBuf>,
    last: Option<CommandRecord>,
    command_count: u64,
}

impl SessionContext {
    pub fn new(cwd: Option<PathBuf>) -> Self {
        Self {
            cwd,
            ..Self::default()
        }
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Store a probed directory. Returns whether it differs from the hint.
    pub fn update_cwd(&mut self, cwd: PathBuf) -> bool {
        let changed = self.cwd.as_ref() != Some(&cwd);
        self.cwd = Some(cwd);
        changed
    }

    pub fn last_command(&self) -> Option<&CommandRecord> {
        self.last.as_ref()
    }

    /// Completed and timed-out commands so far.
    pub fn command_count(&self) -> u64 {
        self.command_count
    }

    pub fn record(&mut self, command: &str, exit_code: Option<i32>) {
        self.last = Some(CommandRecord {
            command: command.to_string(),
            exit_code,
        });
        self.command_count += 1;
    }
}

/// Command that prints the shell's working directory.
pub fn cwd_probe(dialect: ShellDialect) -> &'static str {
    match dialect {
        ShellDialect::Posix => "pwd",
        ShellDialect::PowerShell => "(Get-Location).Path",
        ShellDialect::Cmd => "cd",
    }
}

/// First non-blank line of a probe's output.
pub fn parse_cwd(output: &str) -> Option<PathBuf> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
}
