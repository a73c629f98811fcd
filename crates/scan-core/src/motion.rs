//! Stage coordinates and travel limits.
//!
//! All values are in millimetres in the stage's homed frame.

use serde::{Deserialize, Serialize};

/// One of the two stage axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Horizontal axis.
    X,
    /// Vertical axis.
    Y,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
        }
    }
}

/// Absolute stage position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate in mm.
    pub x: f64,
    /// Y coordinate in mm.
    pub y: f64,
}

impl Position {
    /// The homed origin.
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0 };

    /// Position at `(x, y)`.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another position.
    pub fn distance_to(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Position shifted by `(dx, dy)`.
    pub fn offset(&self, dx: f64, dy: f64) -> Position {
        Position::new(self.x + dx, self.y + dy)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

/// Inclusive travel range of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    /// Lowest reachable coordinate.
    pub min: f64,
    /// Highest reachable coordinate.
    pub max: f64,
}

impl AxisLimits {
    /// Range from `min` to `max` inclusive.
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// True when `value` is reachable.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// True when the whole closed interval `[start, end]` is reachable.
    pub fn contains_range(&self, start: f64, end: f64) -> bool {
        self.contains(start) && self.contains(end)
    }
}

/// Travel limits of both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TravelLimits {
    /// X axis range.
    pub x: AxisLimits,
    /// Y axis range.
    pub y: AxisLimits,
}

impl TravelLimits {
    /// Limits from per-axis ranges.
    pub fn new(x: AxisLimits, y: AxisLimits) -> Self {
        Self { x, y }
    }

    /// Limits starting at zero, the usual frame after homing.
    pub fn from_origin(x_max: f64, y_max: f64) -> Self {
        Self::new(AxisLimits::new(0.0, x_max), AxisLimits::new(0.0, y_max))
    }

    /// Range of one axis.
    pub fn axis(&self, axis: Axis) -> AxisLimits {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }

    /// True when both coordinates are reachable.
    pub fn contains(&self, position: &Position) -> bool {
        self.x.contains(position.x) && self.y.contains(position.y)
    }
}
