//! Background log reader.
//!
//! A [`LogReader`] owns one [`PipeTransport`] and drives the
//! read → split → parse → emit cycle on a tokio task until its
//! [`CancellationToken`] fires. Parsed records are handed to a
//! [`RecordSink`] in stream order.
//!
//! # States
//!
//! | State      | Meaning                                                   |
//! |------------|-----------------------------------------------------------|
//! | `Idle`     | Constructed, not spawned                                  |
//! | `Starting` | Waiting for a writer to attach                            |
//! | `Running`  | Reading and emitting records                              |
//! | `Stopping` | Cancellation observed, endpoint being closed              |
//! | `Stopped`  | Exited after cancellation                                 |
//! | `Failed`   | First connection failed, or the retry policy ran out      |
//!
//! A writer that disconnects sends the reader back to `Starting` after its
//! unterminated last line is parsed and the endpoint is reset. Read errors
//! do the same after a capped exponential backoff (see [`RetryPolicy`]),
//! but drop the partial line; they never leave the task.

pub mod codec;
pub mod sink;

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::parser::RecordParser;
use crate::transport::{PipeTransport, ReadOutcome};
use crate::{AppError, Result};

use self::codec::{Line, LineSplitter};
use self::sink::RecordSink;

/// Lifecycle state of a [`LogReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Constructed but not spawned.
    Idle,
    /// Waiting for a writer to attach to the endpoint.
    Starting,
    /// Reading data from a connected writer.
    Running,
    /// Cancellation received; releasing the endpoint.
    Stopping,
    /// Exited cleanly after cancellation.
    Stopped,
    /// Exited because the endpoint could not be (re)established.
    Failed,
}

impl ReaderState {
    /// Whether the reader task has exited.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

/// Reconnect policy applied after read errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure of a streak.
    pub initial_backoff: Duration,
    /// Upper bound for the doubled delay.
    pub max_backoff: Duration,
    /// Failures in a row before giving up; `0` retries without limit.
    pub max_consecutive_failures: u32,
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1_u32 << (failures - 1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Whether `failures` consecutive failures exhaust the policy.
    #[must_use]
    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_consecutive_failures != 0 && failures >= self.max_consecutive_failures
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            max_consecutive_failures: 0,
        }
    }
}

/// Counters reported when the reader exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderSummary {
    /// Complete text lines handed to the parser.
    pub lines_read: u64,
    /// Records forwarded to the sink.
    pub records_emitted: u64,
    /// Lines dropped by framing (too long or not UTF-8).
    pub lines_discarded: u64,
    /// Read or reconnect failures.
    pub read_errors: u64,
    /// Endpoint reset attempts after a disconnect or failure.
    pub reconnects: u64,
}

/// Background reader for one pipe endpoint.
///
/// Call [`spawn`](Self::spawn) to start the task.
pub struct LogReader<S> {
    transport: Box<dyn PipeTransport>,
    parser: RecordParser,
    sink: S,
    policy: RetryPolicy,
    splitter: LineSplitter,
}

/// How the read pump stopped.
enum PumpExit {
    Cancelled,
    Disconnected { saw_data: bool },
    Failed(AppError),
}

/// Whether recovery left the reader ready for another connection.
enum Recovery {
    Ready,
    Cancelled,
    Exhausted(AppError),
}

impl<S> LogReader<S>
where
    S: RecordSink + 'static,
{
    /// Construct a reader (does not start reading yet).
    #[must_use]
    pub fn new(
        transport: Box<dyn PipeTransport>,
        parser: RecordParser,
        sink: S,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            parser,
            sink,
            policy,
            splitter: LineSplitter::new(),
        }
    }

    /// Spawn the reader task and return a handle for controlling it.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> LogReaderHandle {
        let endpoint_name = self.transport.endpoint().name.clone();
        let (state_tx, state_rx) = watch::channel(ReaderState::Idle);
        let span = info_span!("log_reader", pipe = %endpoint_name);

        let join_handle = tokio::spawn(self.run(cancel.clone(), state_tx).instrument(span));

        LogReaderHandle {
            state: state_rx,
            cancel,
            endpoint_name,
            join_handle: Some(join_handle),
        }
    }

    async fn run(
        mut self,
        cancel: CancellationToken,
        state: watch::Sender<ReaderState>,
    ) -> Result<ReaderSummary> {
        let mut summary = ReaderSummary::default();
        let mut streak = ErrorStreak::default();
        let mut first_connection = true;

        let outcome = loop {
            state.send_replace(ReaderState::Starting);

            let connected = tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(()),
                res = self.transport.await_connection() => res,
            };

            if let Err(err) = connected {
                if first_connection {
                    error!(%err, "log endpoint could not accept a writer");
                    break Err(err);
                }
                summary.read_errors += 1;
                streak.record(&err);
                match self.recover(&cancel, &mut summary, &mut streak, true).await {
                    Recovery::Ready => continue,
                    Recovery::Cancelled => break Ok(()),
                    Recovery::Exhausted(err) => break Err(err),
                }
            }

            first_connection = false;
            state.send_replace(ReaderState::Running);

            let backoff = match self.pump(&cancel, &mut summary, &mut streak).await {
                PumpExit::Cancelled => break Ok(()),
                PumpExit::Disconnected { saw_data } => {
                    info!("log writer disconnected");
                    // A writer that never sent data may just be a platform
                    // reporting EOF on an idle FIFO; pace the reopen.
                    !saw_data
                }
                PumpExit::Failed(err) => {
                    summary.read_errors += 1;
                    streak.record(&err);
                    true
                }
            };

            match self.recover(&cancel, &mut summary, &mut streak, backoff).await {
                Recovery::Ready => {}
                Recovery::Cancelled => break Ok(()),
                Recovery::Exhausted(err) => break Err(err),
            }
        };

        match outcome {
            Ok(()) => {
                state.send_replace(ReaderState::Stopping);
                self.transport.close();
                state.send_replace(ReaderState::Stopped);
                info!(
                    records = summary.records_emitted,
                    lines = summary.lines_read,
                    "log reader stopped"
                );
                Ok(summary)
            }
            Err(err) => {
                self.transport.close();
                state.send_replace(ReaderState::Failed);
                Err(err)
            }
        }
    }

    /// Read chunks until the writer goes away, a read fails, or the token
    /// fires.
    async fn pump(
        &mut self,
        cancel: &CancellationToken,
        summary: &mut ReaderSummary,
        streak: &mut ErrorStreak,
    ) -> PumpExit {
        let mut saw_data = false;

        loop {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => return PumpExit::Cancelled,
                read = self.transport.read_chunk() => read,
            };

            match read {
                Ok(ReadOutcome::Data(chunk)) => {
                    saw_data = true;
                    streak.clear();
                    self.splitter.push(&chunk);
                    while let Some(line) = self.splitter.next_line() {
                        self.handle_line(line, summary);
                    }
                }
                Ok(ReadOutcome::Disconnected) => {
                    while let Some(line) = self.splitter.finish() {
                        self.handle_line(line, summary);
                    }
                    return PumpExit::Disconnected { saw_data };
                }
                Err(err) => return PumpExit::Failed(err),
            }
        }
    }

    fn handle_line(&mut self, line: Line, summary: &mut ReaderSummary) {
        match line {
            Line::Text(text) => {
                summary.lines_read += 1;
                if let Some(record) = self.parser.parse(&text) {
                    summary.records_emitted += 1;
                    self.sink.on_record(record);
                }
            }
            Line::Skipped(reason) => {
                summary.lines_discarded += 1;
                debug!(?reason, "log line discarded");
            }
        }
    }

    /// Drop partial data left by a failed read and reopen the endpoint,
    /// retrying per the policy.
    async fn recover(
        &mut self,
        cancel: &CancellationToken,
        summary: &mut ReaderSummary,
        streak: &mut ErrorStreak,
        mut backoff: bool,
    ) -> Recovery {
        self.splitter.clear();

        loop {
            if backoff {
                if let Some(err) = streak.exhausted(&self.policy) {
                    error!(failures = streak.count, %err, "log endpoint retry limit reached");
                    return Recovery::Exhausted(err);
                }
                // A disconnect without failures still waits the initial delay.
                let delay = self.policy.delay_for(streak.count.max(1));
                if sleep_or_cancel(cancel, delay).await {
                    return Recovery::Cancelled;
                }
            }

            summary.reconnects += 1;
            match self.transport.reset() {
                Ok(()) => return Recovery::Ready,
                Err(err) => {
                    summary.read_errors += 1;
                    streak.record(&err);
                    backoff = true;
                }
            }
        }
    }
}

/// Consecutive failure tracker that keeps repeated errors out of the
/// `warn` log.
#[derive(Debug, Default)]
struct ErrorStreak {
    count: u32,
    last: Option<String>,
}

impl ErrorStreak {
    fn record(&mut self, err: &AppError) {
        self.count = self.count.saturating_add(1);
        if self.count == 1 {
            warn!(%err, "log endpoint error, reconnecting");
        } else {
            debug!(%err, failures = self.count, "log endpoint error persists");
        }
        self.last = Some(err.to_string());
    }

    fn clear(&mut self) {
        if self.count > 0 {
            info!(failures = self.count, "log endpoint recovered");
        }
        self.count = 0;
        self.last = None;
    }

    fn exhausted(&self, policy: &RetryPolicy) -> Option<AppError> {
        policy.is_exhausted(self.count).then(|| {
            AppError::TransportRead(format!(
                "gave up after {} consecutive failures: {}",
                self.count,
                self.last.as_deref().unwrap_or("unknown error")
            ))
        })
    }
}

/// Sleep for `delay` unless `cancel` fires first. Returns `true` when
/// cancelled.
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(delay) => false,
    }
}

/// Handle returned from [`LogReader::spawn`].
///
/// Dropping the handle cancels the reader task.
pub struct LogReaderHandle {
    state: watch::Receiver<ReaderState>,
    cancel: CancellationToken,
    endpoint_name: String,
    join_handle: Option<JoinHandle<Result<ReaderSummary>>>,
}

impl Drop for LogReaderHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl LogReaderHandle {
    /// Most recently published state.
    #[must_use]
    pub fn state(&self) -> ReaderState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ReaderState> {
        self.state.clone()
    }

    /// Address of the endpoint this reader owns.
    #[must_use]
    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    /// Request the reader to stop. Returns immediately.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the reader task to exit.
    ///
    /// # Errors
    ///
    /// Returns the error that moved the reader to [`ReaderState::Failed`],
    /// or `AppError::Io` if the task panicked.
    pub async fn join(mut self) -> Result<ReaderSummary> {
        let Some(handle) = self.join_handle.take() else {
            return Ok(ReaderSummary::default());
        };
        handle
            .await
            .map_err(|err| AppError::Io(format!("log reader task panicked: {err}")))?
    }

    /// Stop the reader and wait for it to exit.
    ///
    /// # Errors
    ///
    /// See [`join`](Self::join).
    pub async fn shutdown(self) -> Result<ReaderSummary> {
        self.stop();
        self.join().await
    }
}
