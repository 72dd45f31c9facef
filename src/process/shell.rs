//! Shell discovery and dialect classification.

use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::info;

/// Command language spoken by a shell program.
///
/// The dialect decides how the completion marker, the startup preamble
/// and the working-directory probe are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellDialect {
    /// sh, bash, zsh, dash, ksh, fish-compatible enough for `echo $?`.
    Posix,
    /// Windows PowerShell or PowerShell 7+.
    PowerShell,
    /// cmd.exe.
    Cmd,
}

impl ShellDialect {
    /// Classify a shell by its program name.
    pub fn from_program(program: &str) -> Self {
        let name = Path::new(program)
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| program.to_ascii_lowercase());
        let stem = name.strip_suffix(".exe").unwrap_or(&name);

        match stem {
            "pwsh" | "powershell" => ShellDialect::PowerShell,
            "cmd" => ShellDialect::Cmd,
            _ => ShellDialect::Posix,
        }
    }

    /// Line terminator to use when writing to the shell.
    pub fn newline(&self) -> &'static str {
        match self {
            ShellDialect::Posix => "\n",
            ShellDialect::PowerShell | ShellDialect::Cmd => "\r\n",
        }
    }

    /// Extra arguments needed for the shell to read commands from stdin.
    pub fn stdin_args(&self) -> &'static [&'static str] {
        match self {
            ShellDialect::Posix => &[],
            ShellDialect::PowerShell => &["-NoLogo", "-NoProfile", "-Command", "-"],
            ShellDialect::Cmd => &["/Q"],
        }
    }
}

impl fmt::Display for ShellDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShellDialect::Posix => "posix",
            ShellDialect::PowerShell => "powershell",
            ShellDialect::Cmd => "cmd",
        };
        f.write_str(name)
    }
}

/// The shell program a session runs, plus its dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShellKind {
    /// Program path or name as passed to the OS.
    pub program: String,
    /// Command dialect derived from the program name.
    pub dialect: ShellDialect,
}

impl ShellKind {
    /// Build a shell kind from a program name or path.
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        let dialect = ShellDialect::from_program(&program);
        Self { program, dialect }
    }

    /// Resolve an optional requested shell, falling back to detection.
    pub fn resolve(requested: Option<&str>) -> Self {
        match requested.map(str::trim).filter(|s| !s.is_empty()) {
            Some(program) => Self::new(program),
            None => Self::new(detect_shell()),
        }
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)
    }
}

/// Get the best available shell for the current platform.
///
/// On Unix this is `$SHELL`, or `/bin/sh` when unset.
#[cfg(unix)]
pub fn detect_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

/// Get the best available shell for the current platform.
///
/// Probes, in order: Git Bash (`bin/bash.exe` has the full tool PATH,
/// `usr/bin/bash.exe` works with a minimal one), `bash` on PATH,
/// PowerShell 7+, Windows PowerShell, and finally `cmd.exe`.
#[cfg(windows)]
pub fn detect_shell() -> String {
    let program_dirs = [
        std::env::var("PROGRAMFILES").unwrap_or_else(|_| r"C:\Program Files".to_string()),
        std::env::var("PROGRAMFILES(X86)").unwrap_or_else(|_| r"C:\Program Files (x86)".to_string()),
    ];
    for dir in &program_dirs {
        for sub in [r"Git\bin\bash.exe", r"Git\usr\bin\bash.exe"] {
            let candidate = Path::new(dir).join(sub);
            if candidate.is_file() {
                let found = candidate.to_string_lossy().into_owned();
                info!(shell = %found, "Detected shell");
                return found;
            }
        }
    }

    for name in ["bash", "pwsh", "powershell"] {
        if let Ok(path) = which::which(name) {
            let found = path.to_string_lossy().into_owned();
            info!(shell = %found, "Detected shell");
            return found;
        }
    }

    info!("Detected shell: cmd.exe (fallback)");
    "cmd.exe".to_string()
}

/// Check whether a shell program can be found before trying to spawn it.
pub fn shell_exists(program: &str) -> bool {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file();
    }
    let found = which::which(program).is_ok();
    if !found {
        info!(shell = program, "Shell not found on PATH");
    }
    found
}
