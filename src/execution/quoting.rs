//! Command rewrites applied before a command reaches a POSIX shell.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex};

/// `powershell`/`pwsh` invocations whose `-Command` body is double-quoted
/// and mentions `$`.
const POWERSHELL_COMMAND: &str = r#"((?:powershell(?:\.exe)?|pwsh(?:\.exe)?)\s+(?:-\w+\s+)*-[Cc]ommand\s+)"((?:[^"\\]|\\.)*\$(?:[^"\\]|\\.)*)""#;

fn powershell_command() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(POWERSHELL_COMMAND).ok()).as_ref()
}

/// Single-quote the `-Command` body of nested PowerShell invocations.
///
/// A POSIX shell expands `$_` and friends inside double quotes before
/// PowerShell ever sees them. Single quotes pass the body through intact;
/// embedded `'` become `'\''`.
pub fn fix_powershell_quoting(command: &str) -> Cow<'_, str> {
    let Some(re) = powershell_command() else {
        return Cow::Borrowed(command);
    };
    re.replace_all(command, |caps: &Captures<'_>| {
        let body = caps[2].replace('\'', r"'\''");
        format!("{}'{}'", &caps[1], body)
    })
}
