//! In-memory transcripts, for inspection.

use std::io;
use std::sync::Mutex;

use super::{LogSink, TranscriptRecord};

/// Keeps every record in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    events: Mutex<Vec<SinkEvent>>,
}

/// Something a session told the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Opened(String),
    Record(String, TranscriptRecord),
    Closed(String),
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Records appended for one session.
    pub fn records(&self, session_id: &str) -> Vec<TranscriptRecord> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Record(id, record) if id == session_id => Some(record),
                _ => None,
            })
            .collect()
    }

    /// Whether `session_id` was closed.
    pub fn is_closed(&self, session_id: &str) -> bool {
        self.events()
            .iter()
            .any(|e| matches!(e, SinkEvent::Closed(id) if id == session_id))
    }

    fn push(&self, event: SinkEvent) -> io::Result<()> {
        self.events
            .lock()
            .map_err(|_| io::Error::other("transcript buffer poisoned"))?
            .push(event);
        Ok(())
    }
}

impl LogSink for MemoryLogSink {
    fn open(&self, session_id: &str) -> io::Result<()> {
        self.push(SinkEvent::Opened(session_id.to_string()))
    }

    fn append(&self, session_id: &str, record: &TranscriptRecord) -> io::Result<()> {
        self.push(SinkEvent::Record(session_id.to_string(), record.clone()))
    }

    fn close(&self, session_id: &str) -> io::Result<()> {
        self.push(SinkEvent::Closed(session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_filtered_by_session() {
        let sink = MemoryLogSink::new();
        sink.open("a").unwrap();
        sink.open("b").unwrap();
        sink.append(
            "a",
            &TranscriptRecord::Command {
                command: "pwd".into(),
            },
        )
        .unwrap();
        sink.append("b", &TranscriptRecord::Closed { command_count: 0 })
            .unwrap();
        sink.close("a").unwrap();

        assert_eq!(
            sink.records("a"),
            vec![TranscriptRecord::Command {
                command: "pwd".into()
            }]
        );
        assert!(sink.is_closed("a"));
        assert!(!sink.is_closed("b"));
        assert_eq!(sink.events().len(), 5);
    }
}
