//! Plain-text transcript files, one per session.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::debug;

use super::{LogSink, TranscriptRecord};

/// Writes `<dir>/<session_id>_<YYYYmmdd_HHMMSS>.log`.
///
/// Each record becomes a `[HH:MM:SS.mmm] message` entry, flushed as it
/// is written. The table lock is only held to look a file up; each file
/// has its own lock for writing, so sessions never wait on each other's
/// disk writes.
#[derive(Debug)]
pub struct FileLogSink {
    dir: PathBuf,
    files: Mutex<HashMap<String, Arc<Mutex<OpenTranscript>>>>,
}

#[derive(Debug)]
struct OpenTranscript {
    path: PathBuf,
    file: File,
}

impl FileLogSink {
    /// Sink writing into `dir` (created on first use).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Directory transcripts are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the open transcript for `session_id`.
    pub fn path_for(&self, session_id: &str) -> Option<PathBuf> {
        let transcript = self.lookup(session_id).ok()?;
        let path = lock(&transcript).ok()?.path.clone();
        Some(path)
    }

    fn files(&self) -> io::Result<MutexGuard<'_, HashMap<String, Arc<Mutex<OpenTranscript>>>>> {
        self.files
            .lock()
            .map_err(|_| io::Error::other("transcript table poisoned"))
    }

    fn lookup(&self, session_id: &str) -> io::Result<Arc<Mutex<OpenTranscript>>> {
        self.files()?.get(session_id).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no open transcript for {session_id}"),
            )
        })
    }
}

fn lock(transcript: &Mutex<OpenTranscript>) -> io::Result<MutexGuard<'_, OpenTranscript>> {
    transcript
        .lock()
        .map_err(|_| io::Error::other("transcript file poisoned"))
}

impl LogSink for FileLogSink {
    fn open(&self, session_id: &str) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = self.dir.join(format!("{session_id}_{stamp}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(session = session_id, path = %path.display(), "Opened transcript");

        let transcript = Arc::new(Mutex::new(OpenTranscript { path, file }));
        self.files()?.insert(session_id.to_string(), transcript);
        Ok(())
    }

    fn append(&self, session_id: &str, record: &TranscriptRecord) -> io::Result<()> {
        let transcript = self.lookup(session_id)?;
        let mut transcript = lock(&transcript)?;
        let ts = Utc::now().format("%H:%M:%S%.3f");
        writeln!(transcript.file, "[{ts}] {}", record.message())?;
        transcript.file.flush()
    }

    fn close(&self, session_id: &str) -> io::Result<()> {
        let removed = self.files()?.remove(session_id);
        if let Some(transcript) = removed {
            lock(&transcript)?.file.flush()?;
        }
        Ok(())
    }
}
