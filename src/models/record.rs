//! Control-point telemetry record.

use serde::{Deserialize, Serialize};

/// A single `(x, y, z, intensity)` sample emitted by the monitored
/// executable.
///
/// Built only by the record parser from a line that matched the grammar;
/// the value is never modified afterwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ControlPointRecord {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
    /// Intensity; the valid range is defined by the consumer.
    pub intensity: f64,
}

impl ControlPointRecord {
    /// Construct a record from its four components.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64, intensity: f64) -> Self {
        Self { x, y, z, intensity }
    }

    /// Position as an `[x, y, z]` array.
    #[must_use]
    pub const fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}
