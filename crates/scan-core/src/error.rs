//! Error types for scan orchestration and device drivers.
//!
//! `ScanError` is what callers of the orchestrator see. It separates the
//! failure classes that behave differently:
//!
//! - **`Validation`**: the request was rejected before any state changed.
//! - **`Busy`**: another scan owns the orchestrator.
//! - **`Preparation`** / **`Device`**: hardware could not be brought into a
//!   usable state. A scan that fails here ends with an `error` status.
//! - **`NoScanData`**, **`UnsupportedFormat`**, **`Export`**: result export.
//! - **`Internal`**: anything that escaped the per-point and per-batch
//!   guards during traversal.
//!
//! Per-point failures never surface as `ScanError`; they are recorded on the
//! affected scan point instead.
//!
//! `DriverError` is the structured error device drivers return through the
//! `anyhow` seam of the capability traits.

use thiserror::Error;

use crate::motion::Axis;

// =============================================================================
// Driver Errors
// =============================================================================

/// Broad class of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Device unreachable or link lost.
    Connection,
    /// Device rejected its configuration.
    Configuration,
    /// Malformed or missing response.
    Communication,
    /// Device reported a fault.
    Hardware,
    /// Operation did not finish in time.
    Timeout,
    /// Argument outside what the device accepts.
    InvalidParameter,
    /// Anything else.
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Connection => "connection",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Structured error returned by device drivers.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver that raised the error, e.g. `mock_stage`.
    pub driver_type: String,
    /// Failure class.
    pub kind: DriverErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl DriverError {
    /// Create a driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

// =============================================================================
// Parameter Validation
// =============================================================================

/// A rejected scan request.
///
/// Each variant names the violated constraint and carries the offending
/// value (and limit, where one applies) so the message stands on its own.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A coordinate, step or timing value is NaN or infinite.
    #[error("{field} must be a finite number (got {value})")]
    NonFinite {
        /// Parameter name.
        field: &'static str,
        /// Rejected value.
        value: f64,
    },

    /// X range is empty or reversed.
    #[error("x_start must be less than x_end (x_start={start}, x_end={end})")]
    XRange {
        /// Requested start.
        start: f64,
        /// Requested end.
        end: f64,
    },

    /// Y range is empty or reversed.
    #[error("y_start must be less than y_end (y_start={start}, y_end={end})")]
    YRange {
        /// Requested start.
        start: f64,
        /// Requested end.
        end: f64,
    },

    /// Step size is zero or negative.
    #[error("Step sizes must be positive ({field}={value})")]
    NonPositiveStep {
        /// `step_x` or `step_y`.
        field: &'static str,
        /// Rejected step.
        value: f64,
    },

    /// Integration time is zero or negative.
    #[error("Integration time must be positive (got {0} s)")]
    NonPositiveIntegrationTime(f64),

    /// Overlap outside 0-100 %.
    #[error("Overlap percent must be between 0 and 100 (got {0})")]
    OverlapOutOfRange(f64),

    /// Batch size of zero.
    #[error("Batch size must be at least 1")]
    ZeroBatchSize,

    /// Scan range leaves the stage travel.
    #[error("{axis} range [{start}, {end}] outside stage limits [{min}, {max}]")]
    OutsideTravel {
        /// Offending axis.
        axis: Axis,
        /// Requested start.
        start: f64,
        /// Requested end.
        end: f64,
        /// Lower travel limit.
        min: f64,
        /// Upper travel limit.
        max: f64,
    },

    /// Too many grid points.
    #[error("Grid of {points} points exceeds the maximum of {max}")]
    GridTooLarge {
        /// Points the parameters would produce.
        points: usize,
        /// Allowed maximum.
        max: usize,
    },
}

// =============================================================================
// Scan Errors
// =============================================================================

/// Convenience alias for results using the scan error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

/// Caller-facing error of the scan orchestrator.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Parameters failed validation. No scan was created.
    #[error("Invalid scan parameters: {0}")]
    Validation(#[from] ValidationError),

    /// A scan is already running or paused.
    #[error("Orchestrator busy: current status is {status}")]
    Busy {
        /// Status of the scan holding the orchestrator.
        status: String,
    },

    /// Hardware could not be prepared for the scan.
    #[error("Hardware preparation failed: {0}")]
    Preparation(String),

    /// A device operation failed outside the per-point guards: a hardware
    /// control request, or a stage move that timed out mid-scan.
    #[error("Device error: {0}")]
    Device(String),

    /// Export or summary requested before any scan produced data.
    #[error("No scan data available")]
    NoScanData,

    /// Export format name not recognized.
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    /// Writing the export file failed.
    #[error("Export failed: {0}")]
    Export(String),

    /// Unclassified failure during traversal.
    #[error("Scan failed: {0}")]
    Internal(String),
}

impl ScanError {
    /// Wrap a device failure, keeping the full `anyhow` context chain.
    pub fn device(err: anyhow::Error) -> Self {
        ScanError::Device(format!("{:#}", err))
    }

    /// Wrap a preparation failure, keeping the full `anyhow` context chain.
    pub fn preparation(err: anyhow::Error) -> Self {
        ScanError::Preparation(format!("{:#}", err))
    }

    /// True for errors raised before any state changed.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ScanError::Validation(_) | ScanError::Busy { .. })
    }
}
