//! Channel bridges for blocking PTY I/O.
//!
//! The PTY master only offers blocking `Read`/`Write` handles. These
//! adapters move them onto dedicated threads and expose the data as tokio
//! channels so the session engine never blocks the runtime.

use std::io::{Read, Write};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, error, trace};

/// Read buffer size for PTY output.
const READ_BUFFER_SIZE: usize = 4096;

/// Forwards PTY output into a channel.
///
/// The channel closes (all senders dropped) when the PTY reports EOF or
/// EIO, which is how the engine learns that the shell has gone away.
pub struct AsyncPtyReader<R: Read + Send + 'static> {
    reader: R,
    tx: mpsc::Sender<Vec<u8>>,
}

impl<R: Read + Send + 'static> AsyncPtyReader<R> {
    /// Create a new reader bridge.
    pub fn new(reader: R, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { reader, tx }
    }

    /// Start the read loop on its own thread.
    ///
    /// The loop ends when:
    /// - The PTY is closed (read returns 0 or EIO)
    /// - The channel is closed (receiver dropped)
    /// - An unrecoverable error occurs
    pub fn spawn(self, name: String) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
    }

    fn run(self) {
        let Self { mut reader, tx } = self;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!("PTY reader: EOF");
                    break;
                }
                Ok(n) => {
                    trace!("PTY reader: read {} bytes", n);
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        debug!("PTY reader: channel closed");
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // EIO on Unix means the PTY slave side was closed
                    #[cfg(unix)]
                    if e.raw_os_error() == Some(libc::EIO) {
                        debug!("PTY reader: PTY closed (EIO)");
                        break;
                    }

                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        debug!("PTY reader: broken pipe");
                        break;
                    }

                    error!("PTY reader error: {}", e);
                    break;
                }
            }
        }
    }
}

/// Writes channel input into the PTY.
pub struct AsyncPtyWriter<W: Write + Send + 'static> {
    writer: W,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl<W: Write + Send + 'static> AsyncPtyWriter<W> {
    /// Create a new writer bridge.
    pub fn new(writer: W, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { writer, rx }
    }

    /// Start the write loop on its own thread.
    ///
    /// The loop ends when every sender is dropped or a write fails.
    pub fn spawn(self, name: String) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
    }

    fn run(self) {
        let Self { mut writer, mut rx } = self;

        while let Some(data) = rx.blocking_recv() {
            trace!("PTY writer: writing {} bytes", data.len());
            if let Err(e) = writer.write_all(&data) {
                if e.kind() == std::io::ErrorKind::BrokenPipe {
                    debug!("PTY writer: broken pipe");
                } else {
                    error!("PTY writer error: {}", e);
                }
                break;
            }
            if let Err(e) = writer.flush() {
                error!("PTY writer flush error: {}", e);
                break;
            }
        }
        debug!("PTY writer: channel closed");
    }
}
