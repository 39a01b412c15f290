//! Logging environment handed to the monitored executable.
//!
//! The executable's logger reads its destination and verbosity from
//! environment variables. They are collected in a [`ChildEnvironment`] and
//! applied to the child's `Command` only; the parent process environment is
//! never modified.

/// Pipe address the logger writes to.
pub const LOG_DEST_VAR: &str = "UH_LOG_DEST";
/// Logger verbosity.
pub const LOG_LEVEL_VAR: &str = "UH_LOG_LEVEL";
/// Forces [`LOG_DEST_VAR`] over the executable's own configuration.
pub const LOG_DEST_FORCE_VAR: &str = "UH_LOG_DEST_FORCE";
/// Forces [`LOG_LEVEL_VAR`] over the executable's own configuration.
pub const LOG_LEVEL_FORCE_VAR: &str = "UH_LOG_LEVEL_FORCE";

/// Verbosity that enables control-point output.
pub const DEFAULT_LOG_LEVEL: u8 = 4;

/// Highest verbosity the logger understands.
pub const MAX_LOG_LEVEL: u8 = 5;

/// Environment the monitored executable needs to log into the pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEnvironment {
    /// Pipe address (FIFO path or `\\.\pipe\…`).
    pub destination: String,
    /// Requested verbosity.
    pub log_level: u8,
    /// Whether the settings override the executable's own configuration.
    pub force: bool,
}

impl ChildEnvironment {
    /// Environment for `destination` at [`DEFAULT_LOG_LEVEL`], forced.
    #[must_use]
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            log_level: DEFAULT_LOG_LEVEL,
            force: true,
        }
    }

    /// Override the verbosity.
    #[must_use]
    pub fn with_log_level(mut self, log_level: u8) -> Self {
        self.log_level = log_level;
        self
    }

    /// Override the force flags.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// The variables to set on the child, in a stable order.
    #[must_use]
    pub fn vars(&self) -> Vec<(&'static str, String)> {
        let force = if self.force { "1" } else { "0" };
        vec![
            (LOG_LEVEL_VAR, self.log_level.to_string()),
            (LOG_DEST_VAR, self.destination.clone()),
            (LOG_LEVEL_FORCE_VAR, force.to_owned()),
            (LOG_DEST_FORCE_VAR, force.to_owned()),
        ]
    }
}
