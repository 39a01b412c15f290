//! Monitored executable spawner.
//!
//! Launches the executable with:
//! - the inherited environment plus the [`ChildEnvironment`] variables,
//! - its own directory as the working directory,
//! - `kill_on_drop(true)` so an abandoned child does not outlive the tap.
//!
//! The pipe endpoint must already exist when this runs: the executable opens
//! it during startup.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::environment::ChildEnvironment;
use crate::{AppError, Result};

/// Time a child gets to exit after `SIGTERM` before it is killed.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Path to the executable.
    pub executable: PathBuf,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
}

impl LaunchConfig {
    /// Launch `executable` without arguments.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn with_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Launch the monitored executable.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the path is not an existing file or the OS
/// refuses to start it.
pub fn spawn_monitored(config: &LaunchConfig, env: &ChildEnvironment) -> Result<Child> {
    if !config.executable.is_file() {
        return Err(AppError::Spawn(format!(
            "'{}' is not an executable file",
            config.executable.display()
        )));
    }

    let executable = config.executable.canonicalize().map_err(|err| {
        AppError::Spawn(format!(
            "cannot resolve '{}': {err}",
            config.executable.display()
        ))
    })?;

    let mut cmd = Command::new(&executable);
    cmd.args(&config.args).envs(env.vars());
    if let Some(dir) = working_dir(&executable) {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null()).kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to launch executable: {err}")))?;

    info!(
        pid = child.id().unwrap_or(0),
        executable = %executable.display(),
        pipe = %env.destination,
        "monitored executable launched"
    );

    Ok(child)
}

/// Spawn a task that waits for `child` to exit and logs how it ended.
///
/// When `cancel` fires first the child is asked to terminate and, after
/// [`TERMINATE_GRACE`], killed.
///
/// The task yields the exit code, or `None` if the child was stopped here
/// or ended by a signal.
#[must_use]
pub fn monitor_exit(mut child: Child, cancel: CancellationToken) -> JoinHandle<Option<i32>> {
    tokio::spawn(async move {
        tokio::select! {
            result = child.wait() => match result {
                Ok(status) => {
                    let code = status.code();
                    match code {
                        Some(c) => info!(code = c, "monitored executable exited"),
                        None => info!("monitored executable terminated by signal"),
                    }
                    code
                }
                Err(err) => {
                    warn!(%err, "error waiting for monitored executable");
                    None
                }
            },
            () = cancel.cancelled() => {
                terminate(&mut child).await;
                None
            }
        }
    })
}

/// Working directory for `executable`: the directory that contains it.
fn working_dir(executable: &Path) -> Option<&Path> {
    executable
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
}

/// Ask the child to exit, then kill it if it does not within the grace
/// period.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
            if let Err(errno) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                warn!(pid, %errno, "failed to signal monitored executable");
            }
            if let Ok(Ok(status)) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                info!(%status, "monitored executable stopped");
                return;
            }
        }
    }

    match child.kill().await {
        Ok(()) => info!("monitored executable killed"),
        Err(err) => warn!(%err, "failed to kill monitored executable"),
    }
}
