//! Named-pipe transport for the monitored executable's log stream.
//!
//! The executable writes text lines into a pipe that this process owns.
//! Unix hosts use a FIFO node in the temp directory; Windows hosts use a
//! Win32 named-pipe server. Both live behind the [`PipeTransport`] trait so
//! the reader loop never branches on the platform.
//!
//! ## Lifecycle
//!
//! 1. [`create_endpoint`] allocates a per-process name and creates the
//!    endpoint. This must happen before the executable is launched.
//! 2. [`PipeTransport::await_connection`] waits for the writer (Windows
//!    only; a no-op on FIFOs).
//! 3. [`PipeTransport::read_chunk`] yields data until the writer goes away.
//! 4. [`PipeTransport::reset`] reopens the endpoint for the next writer.
//! 5. [`PipeTransport::close`] releases it.

#[cfg(unix)]
pub mod fifo;
#[cfg(windows)]
pub mod named_pipe;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::{AppError, Result};

/// Boxed future returned by [`PipeTransport`] operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Identity and connection state of a pipe endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeEndpoint {
    /// Platform address handed to the writer (FIFO path or `\\.\pipe\…`).
    pub name: String,
    /// Whether a writer is currently attached.
    pub connected: bool,
}

impl PipeEndpoint {
    /// A freshly created, unconnected endpoint.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: false,
        }
    }
}

/// Result of a single [`PipeTransport::read_chunk`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Raw bytes from the writer. May hold a partial line.
    Data(Bytes),
    /// The writer closed its end of the pipe.
    Disconnected,
}

/// Uniform interface over the platform pipe mechanisms.
///
/// A transport is owned by exactly one reader task and is never shared.
pub trait PipeTransport: Send {
    /// Current endpoint identity and connection state.
    fn endpoint(&self) -> &PipeEndpoint;

    /// Wait until a writer attaches to the endpoint.
    ///
    /// FIFO transports return immediately: the first read waits for a
    /// writer on its own.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TransportRead` if the wait fails, or
    /// `AppError::TransportCreation` if the endpoint is closed.
    fn await_connection(&mut self) -> TransportFuture<'_, ()>;

    /// Wait for the next available bytes.
    ///
    /// FIFO transports yield one line per call (newline included). Server
    /// transports yield arbitrary chunks which the caller splits into lines.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TransportRead` on I/O failure. The caller is
    /// expected to [`reset`](Self::reset) and continue.
    fn read_chunk(&mut self) -> TransportFuture<'_, ReadOutcome>;

    /// Drop the current handle and reopen the endpoint for a new writer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TransportCreation` if the endpoint cannot be
    /// reopened.
    fn reset(&mut self) -> Result<()>;

    /// Release the OS resource. Calling this more than once is a no-op.
    fn close(&mut self);
}

/// Derive the per-process endpoint name from `base_name`.
///
/// The process id is appended so that concurrent or repeated runs do not
/// collide.
///
/// # Errors
///
/// Returns `AppError::TransportCreation` if `base_name` is empty or contains
/// a path separator.
pub fn endpoint_name(base_name: &str) -> Result<String> {
    let base = base_name.trim();
    if base.is_empty() {
        return Err(AppError::TransportCreation(
            "pipe base name must not be empty".into(),
        ));
    }
    if base.contains(['/', '\\']) || base.contains('\0') {
        return Err(AppError::TransportCreation(format!(
            "pipe base name '{base}' must not contain path separators"
        )));
    }
    Ok(format!("{base}-{}", std::process::id()))
}

/// Create the platform endpoint for `base_name`.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns `AppError::TransportCreation` if the name is invalid or the OS
/// refuses to create the endpoint.
pub fn create_endpoint(base_name: &str) -> Result<Box<dyn PipeTransport>> {
    let name = endpoint_name(base_name)?;

    #[cfg(unix)]
    {
        let transport = fifo::FifoTransport::create(std::env::temp_dir().join(name))?;
        Ok(Box::new(transport))
    }

    #[cfg(windows)]
    {
        let transport = named_pipe::NamedPipeTransport::create(&name)?;
        Ok(Box::new(transport))
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(AppError::TransportCreation(format!(
            "no pipe transport for this platform (requested '{name}')"
        )))
    }
}
