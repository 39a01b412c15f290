//! Control-point record parser.
//!
//! The monitored executable writes free-text log lines. A small share of
//! them carry a control-point sample embedded in the text, for example:
//!
//! ```text
//! [INFO] ctrlpoint x=1.5 y=-2.0 z=0.25 i=0.8
//! ```
//!
//! [`RecordParser::parse`] searches each line for [`CONTROL_POINT_PATTERN`]
//! and builds a [`ControlPointRecord`] from the four captured numbers. A line
//! without the pattern is the common case and yields `None`.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::ControlPointRecord;
use crate::{AppError, Result};

/// Record grammar emitted by the executable's logger.
///
/// Four keyed numbers in fixed order `x`, `y`, `z`, `i` (or `intensity`).
/// Keys are followed by `=` or `:`; fields are separated by whitespace,
/// `,` or `;`. Numbers are optionally signed, optionally fractional and may
/// carry an exponent.
pub const CONTROL_POINT_PATTERN: &str = concat!(
    r"\bx\s*[=:]\s*(?P<x>[-+]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][-+]?\d+)?)[\s,;]+",
    r"y\s*[=:]\s*(?P<y>[-+]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][-+]?\d+)?)[\s,;]+",
    r"z\s*[=:]\s*(?P<z>[-+]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][-+]?\d+)?)[\s,;]+",
    r"(?:intensity|i)\s*[=:]\s*(?P<i>[-+]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][-+]?\d+)?)",
);

/// Capture group names every record pattern must define.
pub const REQUIRED_GROUPS: [&str; 4] = ["x", "y", "z", "i"];

#[allow(clippy::expect_used)] // Constant pattern, exercised by the parser tests.
static BUILTIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(CONTROL_POINT_PATTERN).expect("built-in record pattern compiles"));

/// Extracts [`ControlPointRecord`]s from raw log lines.
#[derive(Debug, Clone)]
pub struct RecordParser {
    regex: Regex,
}

impl RecordParser {
    /// Parser for the built-in [`CONTROL_POINT_PATTERN`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            regex: BUILTIN.clone(),
        }
    }

    /// Parser for a custom record pattern.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the pattern does not compile or lacks
    /// one of the named groups in [`REQUIRED_GROUPS`].
    pub fn with_pattern(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|err| AppError::Config(format!("invalid record pattern: {err}")))?;

        let names: Vec<&str> = regex.capture_names().flatten().collect();
        if let Some(missing) = REQUIRED_GROUPS.iter().find(|g| !names.contains(*g)) {
            return Err(AppError::Config(format!(
                "record pattern is missing named group `{missing}`"
            )));
        }

        Ok(Self { regex })
    }

    /// The pattern this parser matches against.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Parse one line.
    ///
    /// Returns `None` when the line carries no record, or when a captured
    /// field is not a finite `f64` (for example `1e999`).
    #[must_use]
    pub fn parse(&self, line: &str) -> Option<ControlPointRecord> {
        let caps = self.regex.captures(line)?;
        let field = |name: &str| -> Option<f64> {
            let value: f64 = caps.name(name)?.as_str().parse().ok()?;
            value.is_finite().then_some(value)
        };

        Some(ControlPointRecord::new(
            field("x")?,
            field("y")?,
            field("z")?,
            field("i")?,
        ))
    }
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a record as a log line that [`CONTROL_POINT_PATTERN`] matches.
///
/// Uses the shortest decimal form that round-trips each value. Non-finite
/// values produce a line the parser rejects.
#[must_use]
pub fn format_line(record: &ControlPointRecord) -> String {
    format!(
        "[INFO] ctrlpoint x={} y={} z={} i={}",
        record.x, record.y, record.z, record.intensity
    )
}
