//! Session transcripts.
//!
//! Every session reports what happened to it (start, each command with its
//! output, close) to a [`LogSink`]. Sinks are write-only from the session's
//! point of view and their failures never affect command execution.

mod file;
mod memory;

pub use file::FileLogSink;
pub use memory::{MemoryLogSink, SinkEvent};

use std::io;
use std::time::Duration;

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptRecord {
    /// Session came up.
    Started { shell: String, cwd: String },
    /// A command was sent.
    Command { command: String },
    /// A command finished with a status.
    Completed { output: String, exit_code: i32 },
    /// A command was still running at its deadline.
    TimedOut { output: String, timeout: Duration },
    /// The shell exited while a command ran.
    ProcessExited {
        output: String,
        exit_code: Option<i32>,
    },
    /// Session closed.
    Closed { command_count: u64 },
}

impl TranscriptRecord {
    /// Human-readable rendering used by text sinks.
    pub fn message(&self) -> String {
        match self {
            Self::Started { shell, cwd } => format!("Session started: shell={shell}, cwd={cwd}"),
            Self::Command { command } => format!("$ {command}"),
            Self::Completed { output, exit_code } => format!("{output}\n[exit: {exit_code}]"),
            Self::TimedOut { output, timeout } => {
                format!("[TIMEOUT after {}ms]\n{output}", timeout.as_millis())
            }
            Self::ProcessExited { output, exit_code } => match exit_code {
                Some(code) => format!("{output}\n[shell exited: {code}]"),
                None => format!("{output}\n[shell exited]"),
            },
            Self::Closed { command_count } => {
                format!("Session closed ({command_count} commands)")
            }
        }
    }
}

/// Destination for session transcripts.
///
/// A sink is shared by every session of a registry, so all methods take
/// `&self` and are keyed by session id.
pub trait LogSink: Send + Sync {
    /// A session started; prepare whatever storage it needs.
    fn open(&self, session_id: &str) -> io::Result<()>;

    /// Record one entry for a session.
    fn append(&self, session_id: &str, record: &TranscriptRecord) -> io::Result<()>;

    /// The session is gone; release its storage.
    fn close(&self, session_id: &str) -> io::Result<()>;
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn open(&self, _session_id: &str) -> io::Result<()> {
        Ok(())
    }

    fn append(&self, _session_id: &str, _record: &TranscriptRecord) -> io::Result<()> {
        Ok(())
    }

    fn close(&self, _session_id: &str) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_messages() {
        let rec = TranscriptRecord::Command {
            command: "ls -la".into(),
        };
        assert_eq!(rec.message(), "$ ls -la");

        let rec = TranscriptRecord::Completed {
            output: "hello".into(),
            exit_code: 0,
        };
        assert_eq!(rec.message(), "hello\n[exit: 0]");

        let rec = TranscriptRecord::TimedOut {
            output: "partial".into(),
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(rec.message(), "[TIMEOUT after 1500ms]\npartial");
    }

    #[test]
    fn test_null_sink_accepts_everything() {
        let sink = NullLogSink;
        sink.open("s").unwrap();
        sink.append("s", &TranscriptRecord::Closed { command_count: 3 })
            .unwrap();
        sink.close("s").unwrap();
    }
}
