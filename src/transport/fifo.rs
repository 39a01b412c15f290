//! Unix FIFO transport.
//!
//! The endpoint is a FIFO node (mode `0600`) created with `mkfifo`. The read
//! side is opened without blocking for a writer; tokio's reactor parks the
//! first read until a writer attaches and sends data. When the last writer
//! closes, reads report EOF and the reader must [`reset`](PipeTransport::reset)
//! to wait for the next writer.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use nix::sys::stat::Mode;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::unix::pipe;
use tracing::{debug, warn};

use super::{PipeEndpoint, PipeTransport, ReadOutcome, TransportFuture};
use crate::reader::codec::MAX_LINE_BYTES;
use crate::{AppError, Result};

/// FIFO-backed [`PipeTransport`].
#[derive(Debug)]
pub struct FifoTransport {
    endpoint: PipeEndpoint,
    path: PathBuf,
    reader: Option<BufReader<pipe::Receiver>>,
    line: Vec<u8>,
    closed: bool,
}

impl FifoTransport {
    /// Create the FIFO node at `path` and open its read side.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TransportCreation` if the node already exists, the
    /// directory is not writable, or the node cannot be opened.
    pub fn create(path: PathBuf) -> Result<Self> {
        nix::unistd::mkfifo(path.as_path(), Mode::S_IRUSR | Mode::S_IWUSR).map_err(|errno| {
            AppError::TransportCreation(format!(
                "failed to create fifo '{}': {errno}",
                path.display()
            ))
        })?;

        let reader = match open_receiver(&path) {
            Ok(reader) => reader,
            Err(err) => {
                let _ = std::fs::remove_file(&path);
                return Err(err);
            }
        };

        debug!(path = %path.display(), "fifo created");

        Ok(Self {
            endpoint: PipeEndpoint::new(path.to_string_lossy()),
            path,
            reader: Some(reader),
            line: Vec::new(),
            closed: false,
        })
    }

    /// Filesystem location of the FIFO node.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PipeTransport for FifoTransport {
    fn endpoint(&self) -> &PipeEndpoint {
        &self.endpoint
    }

    fn await_connection(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return Err(AppError::TransportCreation("fifo is closed".into()));
            }
            Ok(())
        })
    }

    fn read_chunk(&mut self) -> TransportFuture<'_, ReadOutcome> {
        Box::pin(async move {
            let reader = self
                .reader
                .as_mut()
                .ok_or_else(|| AppError::TransportRead("fifo is not open".into()))?;

            self.line.clear();
            let limit = u64::try_from(MAX_LINE_BYTES).unwrap_or(u64::MAX);
            let read = (&mut *reader)
                .take(limit)
                .read_until(b'\n', &mut self.line)
                .await;

            match read {
                Ok(0) => {
                    self.endpoint.connected = false;
                    Ok(ReadOutcome::Disconnected)
                }
                Ok(_) => {
                    self.endpoint.connected = true;
                    Ok(ReadOutcome::Data(Bytes::from(std::mem::take(&mut self.line))))
                }
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    self.endpoint.connected = false;
                    Ok(ReadOutcome::Disconnected)
                }
                Err(err) => Err(AppError::TransportRead(format!("fifo read failed: {err}"))),
            }
        })
    }

    fn reset(&mut self) -> Result<()> {
        if self.closed {
            return Err(AppError::TransportCreation("fifo is closed".into()));
        }
        self.reader = None;
        self.endpoint.connected = false;
        self.reader = Some(open_receiver(&self.path)?);
        debug!(path = %self.path.display(), "fifo reopened");
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.reader = None;
        self.endpoint.connected = false;

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "fifo removed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), %err, "failed to remove fifo"),
        }
    }
}

impl Drop for FifoTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open the read side of the FIFO at `path` without waiting for a writer.
fn open_receiver(path: &Path) -> Result<BufReader<pipe::Receiver>> {
    let receiver = pipe::OpenOptions::new()
        .open_receiver(path)
        .map_err(|err| {
            AppError::TransportCreation(format!(
                "failed to open fifo '{}': {err}",
                path.display()
            ))
        })?;
    Ok(BufReader::new(receiver))
}
