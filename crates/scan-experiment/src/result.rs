//! Scan result model: status, points, purity grid and summaries.

use chrono::{DateTime, Utc};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::grid::ScanGrid;
use crate::params::ScanParameters;

// =============================================================================
// Status
// =============================================================================

/// Lifecycle status of a scan.
///
/// ```text
///  Idle --start--> Running <--pause/resume--> Paused
///                     |                         |
///                     +---> Completed           |
///                     +---> Error               |
///                     +---> Cancelled <---------+
/// ```
///
/// The terminal states are snapshots on a finished result; the orchestrator
/// itself returns to `Idle` right after writing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// No scan active.
    Idle,
    /// Traversal in progress.
    Running,
    /// Waiting for resume or cancel.
    Paused,
    /// Every cell visited.
    Completed,
    /// Ended by a scan-level failure.
    Error,
    /// Stopped on request.
    Cancelled,
}

impl ScanStatus {
    /// Completed, error or cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Error | ScanStatus::Cancelled
        )
    }

    /// Running or paused: a scan owns the orchestrator.
    pub fn is_active(&self) -> bool {
        matches!(self, ScanStatus::Running | ScanStatus::Paused)
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanStatus::Idle => write!(f, "idle"),
            ScanStatus::Running => write!(f, "running"),
            ScanStatus::Paused => write!(f, "paused"),
            ScanStatus::Completed => write!(f, "completed"),
            ScanStatus::Error => write!(f, "error"),
            ScanStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// =============================================================================
// Points
// =============================================================================

/// What one visited cell produced: a score or an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum PointOutcome {
    /// Inference produced a valid prediction.
    Success {
        /// Purity in percent.
        purity: f64,
        /// Model confidence.
        confidence: f64,
    },
    /// Motion, acquisition or inference failed.
    Failure {
        /// What went wrong.
        error: String,
    },
}

/// Observation at one grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    /// Stage X in mm.
    pub x: f64,
    /// Stage Y in mm.
    pub y: f64,
    /// Row index.
    pub row: usize,
    /// Storage column in the purity grid.
    pub col: usize,
    /// Acquisition time.
    pub timestamp: DateTime<Utc>,
    /// Score or error.
    #[serde(flatten)]
    pub outcome: PointOutcome,
}

impl ScanPoint {
    /// Purity, when the point succeeded.
    pub fn purity_score(&self) -> Option<f64> {
        match self.outcome {
            PointOutcome::Success { purity, .. } => Some(purity),
            PointOutcome::Failure { .. } => None,
        }
    }

    /// Confidence, when the point succeeded.
    pub fn confidence(&self) -> Option<f64> {
        match self.outcome {
            PointOutcome::Success { confidence, .. } => Some(confidence),
            PointOutcome::Failure { .. } => None,
        }
    }

    /// Error, when the point failed.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            PointOutcome::Failure { error } => Some(error),
            PointOutcome::Success { .. } => None,
        }
    }

    /// True when a prediction was recorded.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PointOutcome::Success { .. })
    }
}

// =============================================================================
// Grid
// =============================================================================

/// Purity matrix indexed `[row][col]`, `None` where no score exists.
///
/// Serializes as nested arrays with `null` for missing cells.
#[derive(Debug, Clone, PartialEq)]
pub struct PurityGrid {
    rows: usize,
    cols: usize,
    cells: Vec<Option<f64>>,
}

impl PurityGrid {
    /// All cells missing.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![None; rows * cols],
        }
    }

    /// `(rows, cols)`, i.e. `(ny, nx)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Value at a cell; `None` when missing or out of range.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            self.cells[row * self.cols + col]
        } else {
            None
        }
    }

    /// Store a value. Returns false if the cell is outside the grid.
    pub fn set(&mut self, row: usize, col: usize, value: Option<f64>) -> bool {
        if row < self.rows && col < self.cols {
            self.cells[row * self.cols + col] = value;
            true
        } else {
            false
        }
    }

    /// Rows as slices.
    pub fn rows(&self) -> impl Iterator<Item = &[Option<f64>]> + '_ {
        self.cells.chunks(self.cols.max(1)).take(self.rows)
    }

    /// Present values in raster order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.cells.iter().filter_map(|v| *v)
    }

    /// Cell count.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True for a zero-sized grid.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Serialize for PurityGrid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.rows())
    }
}

// =============================================================================
// Result
// =============================================================================

/// Aggregate of one scan, built incrementally by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    /// Unique id, `scan_YYYYMMDD_HHMMSS`.
    pub scan_id: String,
    /// Request that started the scan.
    pub parameters: ScanParameters,
    /// Purity per cell, `[row][col]`.
    pub grid: PurityGrid,
    /// X axis samples.
    pub x_positions: Vec<f64>,
    /// Y axis samples.
    pub y_positions: Vec<f64>,
    /// Visiting order, not raster order.
    pub points: Vec<ScanPoint>,
    /// Current or terminal status.
    pub status: ScanStatus,
    /// When the scan was claimed.
    pub start_time: DateTime<Utc>,
    /// Set when the scan finished.
    pub end_time: Option<DateTime<Utc>>,
    /// Cells in the grid.
    pub total_points: usize,
    /// Cells visited so far.
    pub completed_points: usize,
    /// Why the scan ended in error.
    pub error_message: Option<String>,
}

impl ScanResult {
    /// Empty running result for `grid`.
    pub fn new(scan_id: impl Into<String>, parameters: ScanParameters, grid: &ScanGrid) -> Self {
        Self {
            scan_id: scan_id.into(),
            parameters,
            grid: PurityGrid::new(grid.ny(), grid.nx()),
            x_positions: grid.x_positions().to_vec(),
            y_positions: grid.y_positions().to_vec(),
            points: Vec::new(),
            status: ScanStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            total_points: grid.total_points(),
            completed_points: 0,
            error_message: None,
        }
    }

    /// Completed fraction in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.total_points == 0 {
            0.0
        } else {
            self.completed_points as f64 / self.total_points as f64
        }
    }

    /// Time since start, frozen at `end_time` once finished.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Points that recorded an error.
    pub fn failed_points(&self) -> usize {
        self.points.iter().filter(|p| !p.is_success()).count()
    }

    /// Summary over the grid cells that hold a score.
    ///
    /// `None` when no cell has one.
    pub fn statistics(&self) -> Option<GridStatistics> {
        let mut values: Vec<f64> = self.grid.values().collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let mid = values.len() / 2;
        let median = if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        };

        Some(GridStatistics {
            mean,
            std: variance.sqrt(),
            min: values[0],
            max: values[values.len() - 1],
            median,
            valid_points: values.len(),
            total_points: self.grid.len(),
        })
    }
}

/// Summary statistics of a purity grid.
///
/// `std` is the population standard deviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridStatistics {
    /// Mean purity.
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    /// Lowest purity.
    pub min: f64,
    /// Highest purity.
    pub max: f64,
    /// Median purity.
    pub median: f64,
    /// Cells with a value.
    pub valid_points: usize,
    /// Cells in the grid.
    pub total_points: usize,
}

// =============================================================================
// Status snapshot
// =============================================================================

/// Point-in-time view of scan progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Id of the current or last scan.
    pub scan_id: Option<String>,
    /// Current status.
    pub status: ScanStatus,
    /// Completed fraction in `[0, 1]`.
    pub progress: f64,
    /// Cells visited.
    pub completed_points: usize,
    /// Cells in the grid.
    pub total_points: usize,
    /// Seconds since start, frozen at the end.
    pub elapsed_seconds: f64,
    /// Linear extrapolation; `None` before the first point.
    pub estimated_remaining_seconds: Option<f64>,
    /// Set on the error path only.
    pub error_message: Option<String>,
}

impl StatusSnapshot {
    /// No scan has run yet.
    pub fn idle() -> Self {
        Self {
            scan_id: None,
            status: ScanStatus::Idle,
            progress: 0.0,
            completed_points: 0,
            total_points: 0,
            elapsed_seconds: 0.0,
            estimated_remaining_seconds: None,
            error_message: None,
        }
    }

    /// Snapshot of `result` at `now`.
    pub fn from_result(result: &ScanResult, now: DateTime<Utc>) -> Self {
        let progress = result.progress();
        let elapsed = result.elapsed_seconds(now);
        let estimated_remaining_seconds =
            (progress > 0.0).then(|| elapsed * (1.0 - progress) / progress.max(f64::EPSILON));

        Self {
            scan_id: Some(result.scan_id.clone()),
            status: result.status,
            progress,
            completed_points: result.completed_points,
            total_points: result.total_points,
            elapsed_seconds: elapsed,
            estimated_remaining_seconds,
            error_message: result.error_message.clone(),
        }
    }
}
