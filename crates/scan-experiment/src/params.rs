//! Scan request parameters and their validation.

use scan_core::limits::MAX_GRID_POINTS;
use scan_core::{Axis, TravelLimits, ValidationError};
use serde::{Deserialize, Serialize};

use crate::grid::axis_len;

/// Immutable description of one scan request.
///
/// Bounds are in millimetres in the stage's homed frame. Created once per
/// request and never mutated by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanParameters {
    /// Left edge in mm.
    pub x_start: f64,
    /// Bottom edge in mm.
    pub y_start: f64,
    /// Right edge in mm, inclusive.
    pub x_end: f64,
    /// Top edge in mm, inclusive.
    pub y_end: f64,
    /// X spacing in mm.
    pub step_x: f64,
    /// Y spacing in mm.
    pub step_y: f64,
    /// Spectrometer exposure per point, seconds.
    #[serde(default = "default_integration_time")]
    pub integration_time: f64,
    /// Identifier passed through to the result, not interpreted here.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Informational only.
    #[serde(default)]
    pub overlap_percent: f64,
    /// Reverse every odd row to save travel.
    #[serde(default = "default_serpentine")]
    pub serpentine: bool,
    /// Spectra submitted to inference together.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_integration_time() -> f64 {
    0.1
}

fn default_model_id() -> String {
    "default".to_string()
}

fn default_serpentine() -> bool {
    true
}

fn default_batch_size() -> usize {
    1
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            x_start: 0.0,
            y_start: 0.0,
            x_end: 10.0,
            y_end: 10.0,
            step_x: 1.0,
            step_y: 1.0,
            integration_time: default_integration_time(),
            model_id: default_model_id(),
            overlap_percent: 0.0,
            serpentine: default_serpentine(),
            batch_size: default_batch_size(),
        }
    }
}

impl ScanParameters {
    /// Rectangle from `(x_start, y_start)` to `(x_end, y_end)` with the given
    /// steps and default acquisition settings.
    pub fn rect(start: (f64, f64), end: (f64, f64), step: (f64, f64)) -> Self {
        Self {
            x_start: start.0,
            y_start: start.1,
            x_end: end.0,
            y_end: end.1,
            step_x: step.0,
            step_y: step.1,
            ..Default::default()
        }
    }

    /// Set the integration time.
    pub fn with_integration_time(mut self, seconds: f64) -> Self {
        self.integration_time = seconds;
        self
    }

    /// Set the model identifier.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Set the informational overlap.
    pub fn with_overlap(mut self, percent: f64) -> Self {
        self.overlap_percent = percent;
        self
    }

    /// Choose serpentine or raster order.
    pub fn with_serpentine(mut self, serpentine: bool) -> Self {
        self.serpentine = serpentine;
        self
    }

    /// Set the inference batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Number of grid points this request expands to.
    pub fn point_count(&self) -> usize {
        axis_len(self.x_start, self.x_end, self.step_x)
            .saturating_mul(axis_len(self.y_start, self.y_end, self.step_y))
    }

    /// Check the request against itself and against the stage travel.
    ///
    /// Rules are checked in a fixed order and the first violation wins.
    pub fn validate(&self, limits: &TravelLimits) -> Result<(), ValidationError> {
        let numeric = [
            ("x_start", self.x_start),
            ("y_start", self.y_start),
            ("x_end", self.x_end),
            ("y_end", self.y_end),
            ("step_x", self.step_x),
            ("step_y", self.step_y),
            ("integration_time", self.integration_time),
            ("overlap_percent", self.overlap_percent),
        ];
        if let Some((field, value)) = numeric.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ValidationError::NonFinite {
                field,
                value: *value,
            });
        }

        if self.x_start >= self.x_end {
            return Err(ValidationError::XRange {
                start: self.x_start,
                end: self.x_end,
            });
        }
        if self.y_start >= self.y_end {
            return Err(ValidationError::YRange {
                start: self.y_start,
                end: self.y_end,
            });
        }
        if self.step_x <= 0.0 {
            return Err(ValidationError::NonPositiveStep {
                field: "step_x",
                value: self.step_x,
            });
        }
        if self.step_y <= 0.0 {
            return Err(ValidationError::NonPositiveStep {
                field: "step_y",
                value: self.step_y,
            });
        }
        if self.integration_time <= 0.0 {
            return Err(ValidationError::NonPositiveIntegrationTime(
                self.integration_time,
            ));
        }
        if !(0.0..=100.0).contains(&self.overlap_percent) {
            return Err(ValidationError::OverlapOutOfRange(self.overlap_percent));
        }
        if self.batch_size == 0 {
            return Err(ValidationError::ZeroBatchSize);
        }

        for (axis, start, end) in [
            (Axis::X, self.x_start, self.x_end),
            (Axis::Y, self.y_start, self.y_end),
        ] {
            let travel = limits.axis(axis);
            if !travel.contains_range(start, end) {
                return Err(ValidationError::OutsideTravel {
                    axis,
                    start,
                    end,
                    min: travel.min,
                    max: travel.max,
                });
            }
        }

        let points = self.point_count();
        if points > MAX_GRID_POINTS {
            return Err(ValidationError::GridTooLarge {
                points,
                max: MAX_GRID_POINTS,
            });
        }

        Ok(())
    }
}
