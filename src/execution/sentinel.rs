//! Completion markers and the line scanner that finds them.
//!
//! A shell's output is one undelimited byte stream. To know where a
//! command's output ends, every command is followed by a second command
//! that prints a random marker and the first command's exit status. The
//! shell only runs that second command after the first one returns, so
//! the first line carrying the marker closes the command's output.

use std::fmt;

use crate::process::ShellDialect;

/// Prefix shared by every marker.
pub const MARKER_PREFIX: &str = "__ARB_END_";

/// A per-exec completion marker, e.g. `__ARB_END_3f2a...__`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    token: String,
}

impl Marker {
    /// Generate a fresh, unguessable marker.
    pub fn generate() -> Self {
        Self::from_token(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Build a marker around a known token.
    pub fn from_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// The random part of the marker.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The text the shell prints (before `:<status>`).
    pub fn text(&self) -> String {
        format!("{MARKER_PREFIX}{}__", self.token)
    }

    /// Find `<marker>:<status>` in `line`.
    ///
    /// Returns the byte offset where the marker starts and the status.
    /// The status must be the last thing on the line (a trailing `\r` is
    /// allowed).
    pub fn find_in(&self, line: &[u8]) -> Option<(usize, i32)> {
        let needle = self.text();
        let needle = needle.as_bytes();
        let start = find_subslice(line, needle)?;

        let rest = &line[start + needle.len()..];
        let rest = rest.strip_prefix(b":")?;
        let rest = rest.strip_suffix(b"\r").unwrap_or(rest);
        let status = std::str::from_utf8(rest).ok()?.trim().parse::<i32>().ok()?;
        Some((start, status))
    }

    /// Whether `line` carries this marker at all, status or not.
    pub fn appears_in(&self, line: &[u8]) -> bool {
        find_subslice(line, self.text().as_bytes()).is_some()
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Write `command` followed by the marker command, in the shell's dialect.
///
/// The marker is split across two quoted pieces so that a terminal echoing
/// the input back never shows the literal marker.
pub fn frame_command(dialect: ShellDialect, command: &str, marker: &Marker) -> String {
    let token = marker.token();
    match dialect {
        // `: _` resets `$_` so the marker command never leaks into it.
        ShellDialect::Posix => format!(
            ": _\n{command}\necho \"{MARKER_PREFIX}\"\"{token}__:$?\"\n: _\n"
        ),
        ShellDialect::PowerShell => format!(
            "{command}\r\n$__arb = if ($?) {{ 0 }} elseif ($LASTEXITCODE) {{ $LASTEXITCODE }} else {{ 1 }}; \
             Write-Output ('{MARKER_PREFIX}' + '{token}__:' + $__arb)\r\n"
        ),
        ShellDialect::Cmd => format!("{command}\r\necho {MARKER_PREFIX}^{token}__:%ERRORLEVEL%\r\n"),
    }
}

/// A command whose marker was seen: its output and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Bytes belonging to the command, marker line excluded.
    pub output: Vec<u8>,
    /// Status printed next to the marker.
    pub exit_code: i32,
}

/// Incremental scanner over one shell's output, kept for the life of the
/// session.
///
/// Bytes are appended as they arrive; each completed line is checked
/// once. Lines carrying a *stale* marker (from an earlier exec that timed
/// out or was dropped) discard everything up to and including that line,
/// because those bytes were produced by the abandoned command. Anything
/// that follows a completed marker stays buffered until the next exec.
#[derive(Debug, Default)]
pub struct SentinelScanner {
    current: Option<Marker>,
    stale: Vec<Marker>,
    buffer: Vec<u8>,
    scanned: usize,
    discarded: usize,
}

impl SentinelScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// The marker an exec is waiting for, if any.
    pub fn current(&self) -> Option<&Marker> {
        self.current.as_ref()
    }

    /// Start waiting for `marker`, whose command has been written.
    pub fn arm(&mut self, marker: Marker) {
        self.abandon();
        self.current = Some(marker);
    }

    /// Give up on the current marker. Its line may still arrive, so it
    /// joins the stale markers.
    ///
    /// Returns whether there was a marker to give up on.
    pub fn abandon(&mut self) -> bool {
        match self.current.take() {
            Some(marker) => {
                self.stale.push(marker);
                true
            }
            None => false,
        }
    }

    /// Take in output that arrived between execs and drop what cannot
    /// belong to the next command.
    ///
    /// Must be called with no marker armed. Complete lines are dropped
    /// after stale markers in them are resolved. While stale markers are
    /// outstanding an incomplete last line is kept, since it may be the
    /// head of a stale marker line. Returns the number of bytes dropped.
    pub fn settle(&mut self, bytes: &[u8]) -> usize {
        self.abandon();
        let before = self.discarded;
        let _ = self.push(bytes);

        let keep_from = if self.stale.is_empty() {
            self.buffer.len()
        } else {
            self.scanned
        };
        self.buffer.drain(..keep_from);
        self.discarded += keep_from;
        self.scanned = 0;
        self.discarded - before
    }

    /// Append bytes and scan any newly completed lines.
    pub fn push(&mut self, bytes: &[u8]) -> Option<Completion> {
        self.buffer.extend_from_slice(bytes);

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let line_start = self.scanned;
            let line_end = line_start + offset;

            if let Some(idx) = self.stale_index(&self.buffer[line_start..line_end]) {
                // Markers resolve in order; older ones can no longer appear.
                self.stale.drain(..=idx);
                self.discarded += line_end + 1;
                self.buffer.drain(..=line_end);
                self.scanned = 0;
                continue;
            }

            let found = self
                .current
                .as_ref()
                .and_then(|m| m.find_in(&self.buffer[line_start..line_end]));
            if let Some((pos, exit_code)) = found {
                let mut output = self.buffer[..line_start + pos].to_vec();
                if pos == 0 && output.ends_with(b"\n") {
                    output.pop();
                    if output.ends_with(b"\r") {
                        output.pop();
                    }
                }
                self.buffer.drain(..=line_end);
                self.scanned = 0;
                self.current = None;
                // The shell runs commands in order, so every older marker
                // has either been seen or was swallowed.
                self.stale.clear();
                return Some(Completion { output, exit_code });
            }

            self.scanned = line_end + 1;
        }
        None
    }

    /// Everything received so far that was not discarded.
    pub fn partial_output(&self) -> &[u8] {
        &self.buffer
    }

    /// Total bytes discarded because they belonged to abandoned commands.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Stale markers still outstanding, oldest first.
    pub fn stale(&self) -> &[Marker] {
        &self.stale
    }

    fn stale_index(&self, line: &[u8]) -> Option<usize> {
        self.stale.iter().rposition(|m| m.appears_in(line))
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(token: &str) -> Marker {
        Marker::from_token(token)
    }

    #[test]
    fn test_generate_is_unique_and_well_formed() {
        let a = Marker::generate();
        let b = Marker::generate();
        assert_ne!(a, b);
        assert_eq!(a.token().len(), 32);
        assert!(a.text().starts_with(MARKER_PREFIX));
        assert!(a.text().ends_with("__"));
    }

    #[test]
    fn test_find_in_parses_status() {
        let m = marker("abc");
        assert_eq!(m.find_in(b"__ARB_END_abc__:0"), Some((0, 0)));
        assert_eq!(m.find_in(b"__ARB_END_abc__:127\r"), Some((0, 127)));
        assert_eq!(m.find_in(b"tail__ARB_END_abc__:1"), Some((4, 1)));
        assert_eq!(m.find_in(b"__ARB_END_abc__:-1"), Some((0, -1)));
    }

    #[test]
    fn test_find_in_rejects_lookalikes() {
        let m = marker("abc");
        assert_eq!(m.find_in(b"__ARB_END_abc__"), None);
        assert_eq!(m.find_in(b"__ARB_END_abc__:x"), None);
        assert_eq!(m.find_in(b"__ARB_END_abd__:0"), None);
        assert_eq!(m.find_in(b"__ARB_END_abc__:0 trailing"), None);
    }

    #[test]
    fn test_frame_posix_hides_literal_marker() {
        let m = marker("deadbeef");
        let framed = frame_command(ShellDialect::Posix, "ls -la", &m);
        assert!(framed.contains("\nls -la\n"));
        assert!(framed.contains("$?"));
        assert!(!framed.contains(&m.text()));
        assert!(framed.ends_with('\n'));
    }

    #[test]
    fn test_frame_cmd_and_powershell() {
        let m = marker("cafe");
        let cmd = frame_command(ShellDialect::Cmd, "dir", &m);
        assert!(cmd.starts_with("dir\r\n"));
        assert!(cmd.contains("%ERRORLEVEL%"));
        assert!(!cmd.contains(&m.text()));

        let ps = frame_command(ShellDialect::PowerShell, "Get-Date", &m);
        assert!(ps.starts_with("Get-Date\r\n"));
        assert!(ps.contains("$LASTEXITCODE"));
        assert!(!ps.contains(&m.text()));
    }

    fn armed(token: &str) -> SentinelScanner {
        let mut scanner = SentinelScanner::new();
        scanner.arm(marker(token));
        scanner
    }

    /// Scanner waiting for `token` after `stale` tokens timed out.
    fn armed_after(stale: &[&str], token: &str) -> SentinelScanner {
        let mut scanner = SentinelScanner::new();
        for old in stale {
            scanner.arm(marker(old));
        }
        scanner.arm(marker(token));
        scanner
    }

    #[test]
    fn test_scanner_simple_completion() {
        let mut scanner = armed("t1");
        let done = scanner.push(b"hello\n__ARB_END_t1__:0\n").unwrap();
        assert_eq!(done.output, b"hello");
        assert_eq!(done.exit_code, 0);
        assert!(scanner.partial_output().is_empty());
        assert!(scanner.current().is_none());
    }

    #[test]
    fn test_scanner_split_across_chunks() {
        let mut scanner = armed("t1");
        assert!(scanner.push(b"line one\nline ").is_none());
        assert!(scanner.push(b"two\n__ARB_END").is_none());
        assert!(scanner.push(b"_t1__:").is_none());
        let done = scanner.push(b"42\nafter").unwrap();
        assert_eq!(done.output, b"line one\nline two");
        assert_eq!(done.exit_code, 42);
        assert_eq!(scanner.partial_output(), b"after");
    }

    #[test]
    fn test_scanner_output_without_trailing_newline() {
        let mut scanner = armed("t1");
        let done = scanner.push(b"no newline__ARB_END_t1__:0\n").unwrap();
        assert_eq!(done.output, b"no newline");
    }

    #[test]
    fn test_scanner_empty_output() {
        let mut scanner = armed("t1");
        let done = scanner.push(b"__ARB_END_t1__:0\n").unwrap();
        assert!(done.output.is_empty());
    }

    #[test]
    fn test_scanner_ignores_foreign_markers() {
        let mut scanner = armed("real");
        assert!(scanner.push(b"__ARB_END_fake__:0\n").is_none());
        let done = scanner.push(b"__ARB_END_real__:3\n").unwrap();
        assert_eq!(done.output, b"__ARB_END_fake__:0");
        assert_eq!(done.exit_code, 3);
    }

    #[test]
    fn test_scanner_unarmed_never_completes() {
        let mut scanner = SentinelScanner::new();
        assert!(scanner.push(b"__ARB_END_t1__:0\n").is_none());
    }

    #[test]
    fn test_scanner_discards_through_stale_marker() {
        let mut scanner = armed_after(&["old"], "new");
        assert_eq!(scanner.stale(), &[marker("old")]);
        assert!(scanner
            .push(b"late output from old\n__ARB_END_old__:0\n")
            .is_none());
        assert!(scanner.stale().is_empty());
        assert_eq!(scanner.discarded(), 39);

        let done = scanner.push(b"fresh\n__ARB_END_new__:0\n").unwrap();
        assert_eq!(done.output, b"fresh");
    }

    #[test]
    fn test_scanner_stale_markers_resolve_in_order() {
        let mut scanner = armed_after(&["a", "b"], "c");
        assert!(scanner.push(b"x\n__ARB_END_b__:0\n").is_none());
        assert!(scanner.stale().is_empty());
    }

    #[test]
    fn test_completion_clears_unseen_stale_markers() {
        let mut scanner = armed_after(&["lost"], "now");
        scanner.push(b"__ARB_END_now__:0\n").unwrap();
        assert!(scanner.stale().is_empty());
    }

    #[test]
    fn test_abandon_keeps_marker_and_output() {
        let mut scanner = armed_after(&["older"], "slow");
        assert!(scanner.push(b"partial").is_none());
        assert_eq!(scanner.partial_output(), b"partial");
        assert!(scanner.abandon());
        assert!(!scanner.abandon());
        assert_eq!(scanner.stale(), &[marker("older"), marker("slow")]);
    }

    #[test]
    fn test_settle_without_stale_drops_everything() {
        let mut scanner = armed("m");
        scanner.push(b"__ARB_END_m__:0\nbackground job\nmore").unwrap();
        assert_eq!(scanner.settle(b"!"), 20);
        assert!(scanner.partial_output().is_empty());

        scanner.arm(marker("n"));
        let done = scanner.push(b"__ARB_END_n__:0\n").unwrap();
        assert!(done.output.is_empty());
    }

    #[test]
    fn test_settle_keeps_split_stale_marker_head() {
        let mut scanner = armed("old");
        scanner.abandon();

        assert_eq!(scanner.settle(b"noise\n__ARB_END_ol"), 6);
        assert_eq!(scanner.partial_output(), b"__ARB_END_ol");

        scanner.arm(marker("new"));
        let done = scanner
            .push(b"d__:0\nfresh\n__ARB_END_new__:0\n")
            .unwrap();
        assert_eq!(done.output, b"fresh");
        assert!(scanner.stale().is_empty());
    }

    #[test]
    fn test_settle_abandons_armed_marker() {
        let mut scanner = armed("dropped");
        assert_eq!(scanner.settle(b""), 0);
        assert!(scanner.current().is_none());
        assert_eq!(scanner.stale(), &[marker("dropped")]);
    }

    #[test]
    fn test_crlf_output_line() {
        let mut scanner = armed("w");
        let done = scanner.push(b"win\r\n__ARB_END_w__:0\r\n").unwrap();
        assert_eq!(done.output, b"win");
        assert_eq!(done.exit_code, 0);
    }
}
