//! Tap session: one endpoint, one reader, at most one monitored child.
//!
//! [`TapSession::start`] performs the startup sequence in the order the
//! executable depends on:
//!
//! 1. create the pipe endpoint (failure is returned to the caller),
//! 2. spawn the log reader on it,
//! 3. optionally launch the executable with the bound environment.
//!
//! The executable can later be relaunched against the same endpoint with
//! [`TapSession::launch`].

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::GlobalConfig;
use crate::launch::{monitor_exit, spawn_monitored, ChildEnvironment, LaunchConfig};
use crate::reader::sink::RecordSink;
use crate::reader::{LogReader, LogReaderHandle, ReaderState, ReaderSummary};
use crate::transport::create_endpoint;
use crate::Result;

/// A monitored child and the token that stops it.
struct MonitoredChild {
    cancel: CancellationToken,
    monitor: JoinHandle<Option<i32>>,
}

/// Running tap: endpoint, reader task and optional child process.
pub struct TapSession {
    reader: LogReaderHandle,
    environment: ChildEnvironment,
    cancel: CancellationToken,
    child: Option<MonitoredChild>,
}

impl TapSession {
    /// Create the endpoint, start the reader and honour `auto_launch`.
    ///
    /// A failed auto-launch is logged and the session keeps running so the
    /// executable can be launched later.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TransportCreation` if the endpoint cannot be
    /// created, or `AppError::Config` if the record pattern is invalid.
    pub fn start<S>(config: &GlobalConfig, sink: S, cancel: CancellationToken) -> Result<Self>
    where
        S: RecordSink + 'static,
    {
        let parser = config.record_parser()?;

        let transport = create_endpoint(&config.pipe_name).map_err(|err| {
            error!(%err, "failed to create log endpoint");
            err
        })?;

        let destination = transport.endpoint().name.clone();
        info!(pipe = %destination, "log endpoint ready");

        let reader = LogReader::new(transport, parser, sink, config.retry.policy())
            .spawn(cancel.child_token());

        let mut session = Self {
            reader,
            environment: config.child_environment(destination),
            cancel,
            child: None,
        };

        if config.auto_launch {
            if let Some(launch) = config.launch_config() {
                if let Err(err) = session.spawn_child(&launch) {
                    warn!(%err, "auto-launch failed; waiting for a writer");
                }
            }
        }

        Ok(session)
    }

    /// Launch (or relaunch) the monitored executable against this session's
    /// endpoint. A previously launched child is stopped first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the executable cannot be started.
    pub async fn launch(&mut self, launch: &LaunchConfig) -> Result<()> {
        self.stop_child().await;
        self.spawn_child(launch)
    }

    /// Environment handed to launched executables.
    #[must_use]
    pub fn environment(&self) -> &ChildEnvironment {
        &self.environment
    }

    /// Pipe address writers connect to.
    #[must_use]
    pub fn endpoint_name(&self) -> &str {
        self.reader.endpoint_name()
    }

    /// Current reader state.
    #[must_use]
    pub fn reader_state(&self) -> ReaderState {
        self.reader.state()
    }

    /// Observe reader state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ReaderState> {
        self.reader.subscribe()
    }

    /// Whether a launched child is still being monitored.
    #[must_use]
    pub fn has_child(&self) -> bool {
        self.child
            .as_ref()
            .is_some_and(|child| !child.monitor.is_finished())
    }

    /// Stop the child (if any) and the reader, and release the endpoint.
    ///
    /// # Errors
    ///
    /// Returns the reader's failure, if it had failed.
    pub async fn shutdown(mut self) -> Result<ReaderSummary> {
        self.stop_child().await;
        self.cancel.cancel();
        self.reader.shutdown().await
    }

    fn spawn_child(&mut self, launch: &LaunchConfig) -> Result<()> {
        let child = spawn_monitored(launch, &self.environment)?;
        let cancel = self.cancel.child_token();
        let monitor = monitor_exit(child, cancel.clone());
        self.child = Some(MonitoredChild { cancel, monitor });
        Ok(())
    }

    async fn stop_child(&mut self) {
        if let Some(child) = self.child.take() {
            child.cancel.cancel();
            if let Err(err) = child.monitor.await {
                warn!(%err, "child monitor task failed");
            }
        }
    }
}
