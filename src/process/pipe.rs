//! Pipe-backed shell processes using `tokio::process`.

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use super::{ProcessHandle, SpawnSpec, INPUT_CHANNEL_CAPACITY, OUTPUT_CHANNEL_CAPACITY};
use crate::error::ArbitriumError;
use crate::Result;

const READ_BUFFER_SIZE: usize = 4096;

/// Spawn `spec.shell` with piped stdin/stdout/stderr.
///
/// Both output pipes feed the same channel, and stdin is fed from a
/// queue by its own task. On Unix the shell leads its
/// own process group so signals reach its foreground commands too.
pub(super) fn spawn(spec: &SpawnSpec) -> Result<ProcessHandle> {
    let mut cmd = Command::new(&spec.shell.program);
    cmd.args(spec.shell.dialect.stdin_args())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }
    for name in &spec.env_remove {
        cmd.env_remove(name);
    }
    cmd.envs(&spec.env);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| ArbitriumError::spawn(&spec.shell.program, e))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ArbitriumError::spawn(&spec.shell.program, "stdin not captured"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ArbitriumError::spawn(&spec.shell.program, "stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ArbitriumError::spawn(&spec.shell.program, "stderr not captured"))?;

    let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
    tokio::spawn(pump(stdout, tx.clone(), "stdout"));
    tokio::spawn(pump(stderr, tx, "stderr"));

    let (in_tx, in_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
    tokio::spawn(feed(stdin, in_rx));

    debug!(
        shell = %spec.shell,
        pid = ?child.id(),
        "Spawned piped shell"
    );

    Ok(ProcessHandle::from_parts_pipe(
        spec.shell.clone(),
        child,
        in_tx,
        rx,
    ))
}

/// Copy one output pipe into the shared channel until EOF.
async fn pump<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(stream, "Shell output: EOF");
                break;
            }
            Ok(n) => {
                trace!(stream, "Shell output: read {} bytes", n);
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    debug!(stream, "Shell output: receiver dropped");
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(stream, "Shell output read error: {}", e);
                break;
            }
        }
    }
}

/// Write queued input to the shell until the queue closes or a write
/// fails. Dropping the writer afterwards closes the shell's stdin.
async fn feed<W>(mut writer: W, mut rx: mpsc::Receiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(data) = rx.recv().await {
        trace!("Shell input: writing {} bytes", data.len());
        let written = match writer.write_all(&data).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                debug!("Shell input: broken pipe");
            } else {
                error!("Shell input write error: {}", e);
            }
            return;
        }
    }
    debug!("Shell input: queue closed");
}

/// Map an exit status to a shell-style code (`128 + signal` when killed).
pub(super) fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
