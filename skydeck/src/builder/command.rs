//! Streaming shell commands
//!
//! The output of a running command is a finite stream of lines followed by a
//! single [`OutputChunk::Exited`]. Dropping the stream kills the process.

use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::PlatformError;

/// One item of command output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
    /// Always the last item. `None` when the process was terminated by a signal
    Exited(Option<i32>),
}

/// Live output of a spawned command
pub struct OutputStream {
    rx: mpsc::Receiver<OutputChunk>,
    driver: JoinHandle<()>,
}

impl Stream for OutputStream {
    type Item = OutputChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        // the driver owns the child, aborting it drops the child which kills it
        self.driver.abort();
    }
}

/// Run `command` through `sh -c` in `dir` and stream its output
pub fn spawn_shell(command: &str, dir: &Path) -> Result<OutputStream, PlatformError> {
    debug!("Running '{}' in {}", command, dir.display());

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PlatformError::BuildError(format!("failed to spawn '{}': {}", command, e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PlatformError::BuildError("stdout was not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| PlatformError::BuildError("stderr was not captured".to_string()))?;

    let (tx, rx) = mpsc::channel(256);
    let driver = tokio::spawn(async move {
        tokio::join!(
            pump_lines(stdout, tx.clone(), OutputChunk::Stdout),
            pump_lines(stderr, tx.clone(), OutputChunk::Stderr),
        );
        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("Failed to wait for command: {}", e);
                None
            }
        };
        let _ = tx.send(OutputChunk::Exited(code)).await;
    });

    Ok(OutputStream { rx, driver })
}

async fn pump_lines<R>(reader: R, tx: mpsc::Sender<OutputChunk>, wrap: fn(String) -> OutputChunk)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(|c| c == '\n' || c == '\r')
                    .to_string();
                if tx.send(wrap(line)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read command output: {}", e);
                break;
            }
        }
    }
}
