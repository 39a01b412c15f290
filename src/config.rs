//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::launch::environment::{DEFAULT_LOG_LEVEL, MAX_LOG_LEVEL};
use crate::launch::{ChildEnvironment, LaunchConfig};
use crate::parser::RecordParser;
use crate::reader::RetryPolicy;
use crate::{AppError, Result};

fn default_pipe_name() -> String {
    "ctrlpoint-tap".into()
}

fn default_log_level() -> u8 {
    DEFAULT_LOG_LEVEL
}

fn default_true() -> bool {
    true
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5000
}

/// Reconnect behaviour after pipe read errors.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Delay after the first failure, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Cap on the doubled delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Consecutive failures before the reader gives up; 0 means never.
    #[serde(default)]
    pub max_consecutive_failures: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_consecutive_failures: 0,
        }
    }
}

impl RetryConfig {
    /// Convert into the reader's [`RetryPolicy`].
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Base name of the pipe endpoint; the process id is appended.
    #[serde(default = "default_pipe_name")]
    pub pipe_name: String,
    /// Verbosity requested from the monitored executable.
    #[serde(default = "default_log_level")]
    pub log_level: u8,
    /// Whether the logging variables override the executable's own settings.
    #[serde(default = "default_true")]
    pub force_log_settings: bool,
    /// Executable to monitor.
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Arguments for the executable.
    #[serde(default)]
    pub executable_args: Vec<String>,
    /// Launch the executable at startup.
    #[serde(default)]
    pub auto_launch: bool,
    /// Custom record pattern with named groups `x`, `y`, `z`, `i`.
    #[serde(default)]
    pub record_pattern: Option<String>,
    /// Reconnect policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            pipe_name: default_pipe_name(),
            log_level: default_log_level(),
            force_log_settings: true,
            executable: None,
            executable_args: Vec::new(),
            auto_launch: false,
            record_pattern: None,
            retry: RetryConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the record parser, honouring `record_pattern`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the custom pattern is invalid.
    pub fn record_parser(&self) -> Result<RecordParser> {
        match self.record_pattern.as_deref() {
            Some(pattern) => RecordParser::with_pattern(pattern),
            None => Ok(RecordParser::new()),
        }
    }

    /// Logging environment for a child writing to `destination`.
    #[must_use]
    pub fn child_environment(&self, destination: impl Into<String>) -> ChildEnvironment {
        ChildEnvironment::new(destination)
            .with_log_level(self.log_level)
            .with_force(self.force_log_settings)
    }

    /// Launch settings, if an executable is configured.
    #[must_use]
    pub fn launch_config(&self) -> Option<LaunchConfig> {
        self.executable.as_ref().map(|exe| {
            LaunchConfig::new(exe.clone()).with_args(self.executable_args.iter().cloned())
        })
    }

    /// Check value ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.pipe_name.trim().is_empty() {
            return Err(AppError::Config("pipe_name must not be empty".into()));
        }

        if self.pipe_name.contains(['/', '\\']) {
            return Err(AppError::Config("pipe_name must not contain path separators".into()));
        }

        if self.log_level > MAX_LOG_LEVEL {
            return Err(AppError::Config(format!(
                "log_level must be between 0 and {MAX_LOG_LEVEL}"
            )));
        }

        if self.retry.initial_backoff_ms == 0 {
            return Err(AppError::Config(
                "retry.initial_backoff_ms must be greater than zero".into(),
            ));
        }

        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(AppError::Config(
                "retry.max_backoff_ms must not be less than retry.initial_backoff_ms".into(),
            ));
        }

        if self.auto_launch && self.executable.is_none() {
            return Err(AppError::Config("auto_launch requires an executable".into()));
        }

        if let Some(pattern) = self.record_pattern.as_deref() {
            RecordParser::with_pattern(pattern)?;
        }

        Ok(())
    }
}
