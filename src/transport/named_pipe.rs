//! Windows named-pipe transport.
//!
//! The endpoint is an inbound-only named-pipe server created as the first
//! instance of its name, so another process cannot squat on it. A writer
//! must connect before data flows; [`PipeTransport::await_connection`]
//! waits for that. Reads return arbitrary chunks that may split lines.

use std::io::ErrorKind;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
use tracing::debug;

use super::{PipeEndpoint, PipeTransport, ReadOutcome, TransportFuture};
use crate::{AppError, Result};

/// Bytes requested per read.
pub const CHUNK_BYTES: usize = 64 * 1024;

/// `ERROR_BROKEN_PIPE`: the client closed its handle.
const ERROR_BROKEN_PIPE: i32 = 109;
/// `ERROR_PIPE_NOT_CONNECTED`: no client is attached.
const ERROR_PIPE_NOT_CONNECTED: i32 = 233;

/// Named-pipe-backed [`PipeTransport`].
#[derive(Debug)]
pub struct NamedPipeTransport {
    endpoint: PipeEndpoint,
    server: Option<NamedPipeServer>,
    buf: BytesMut,
    closed: bool,
}

impl NamedPipeTransport {
    /// Create the server for `\\.\pipe\<name>`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TransportCreation` if the name is already taken or
    /// the OS refuses to create the pipe.
    pub fn create(name: &str) -> Result<Self> {
        let address = format!(r"\\.\pipe\{name}");
        let server = create_server(&address)?;
        debug!(pipe = %address, "named pipe created");

        Ok(Self {
            endpoint: PipeEndpoint::new(address),
            server: Some(server),
            buf: BytesMut::with_capacity(CHUNK_BYTES),
            closed: false,
        })
    }
}

impl PipeTransport for NamedPipeTransport {
    fn endpoint(&self) -> &PipeEndpoint {
        &self.endpoint
    }

    fn await_connection(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return Err(AppError::TransportCreation("named pipe is closed".into()));
            }
            let server = self
                .server
                .as_ref()
                .ok_or_else(|| AppError::TransportRead("named pipe is not open".into()))?;

            server.connect().await.map_err(|err| {
                AppError::TransportRead(format!("named pipe connect failed: {err}"))
            })?;

            self.endpoint.connected = true;
            debug!(pipe = %self.endpoint.name, "named pipe client connected");
            Ok(())
        })
    }

    fn read_chunk(&mut self) -> TransportFuture<'_, ReadOutcome> {
        Box::pin(async move {
            let server = self
                .server
                .as_mut()
                .ok_or_else(|| AppError::TransportRead("named pipe is not open".into()))?;

            self.buf.reserve(CHUNK_BYTES);
            match server.read_buf(&mut self.buf).await {
                Ok(0) => {
                    self.endpoint.connected = false;
                    Ok(ReadOutcome::Disconnected)
                }
                Ok(_) => Ok(ReadOutcome::Data(self.buf.split().freeze())),
                Err(err) if is_disconnect(&err) => {
                    self.endpoint.connected = false;
                    Ok(ReadOutcome::Disconnected)
                }
                Err(err) => Err(AppError::TransportRead(format!("named pipe read failed: {err}"))),
            }
        })
    }

    fn reset(&mut self) -> Result<()> {
        if self.closed {
            return Err(AppError::TransportCreation("named pipe is closed".into()));
        }
        // The old instance must be gone before a new first instance can exist.
        self.server = None;
        self.buf.clear();
        self.endpoint.connected = false;
        self.server = Some(create_server(&self.endpoint.name)?);
        debug!(pipe = %self.endpoint.name, "named pipe recreated");
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.endpoint.connected = false;
        if let Some(server) = self.server.take() {
            let _ = server.disconnect();
        }
        debug!(pipe = %self.endpoint.name, "named pipe closed");
    }
}

impl Drop for NamedPipeTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn create_server(address: &str) -> Result<NamedPipeServer> {
    ServerOptions::new()
        .first_pipe_instance(true)
        .access_outbound(false)
        .create(address)
        .map_err(|err| {
            AppError::TransportCreation(format!("failed to create named pipe '{address}': {err}"))
        })
}

fn is_disconnect(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::BrokenPipe
        || matches!(
            err.raw_os_error(),
            Some(ERROR_BROKEN_PIPE | ERROR_PIPE_NOT_CONNECTED)
        )
}
