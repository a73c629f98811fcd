//! Grid computation and traversal order.
//!
//! Axes are inclusive arithmetic sequences. Traversal is row-major over Y;
//! in serpentine mode odd rows run right to left, but every cell keeps the
//! storage column of its true X coordinate:
//!
//! ```text
//! row 0:  c0 -> c1 -> c2
//! row 1:  c0 <- c1 <- c2     (visited c2, c1, c0)
//! row 2:  c0 -> c1 -> c2
//! ```

use scan_core::limits::GRID_EPSILON;
use scan_core::Position;

use crate::params::ScanParameters;

/// Number of samples from `start` to `end` inclusive with spacing `step`.
///
/// The end is padded by [`GRID_EPSILON`] so an endpoint that the step
/// divides exactly is not lost to rounding.
pub fn axis_len(start: f64, end: f64, step: f64) -> usize {
    if step.is_nan() || step <= 0.0 || !start.is_finite() || !end.is_finite() || end < start {
        return 0;
    }
    let count = ((end + GRID_EPSILON - start) / step).ceil();
    if count.is_finite() && count > 0.0 {
        count as usize
    } else {
        0
    }
}

/// Sample positions from `start` to `end` inclusive with spacing `step`.
///
/// Samples never exceed `end`, even when accumulated rounding would put the
/// last one a hair past it.
pub fn axis_positions(start: f64, end: f64, step: f64) -> Vec<f64> {
    (0..axis_len(start, end, step))
        .map(|i| (start + i as f64 * step).min(end))
        .collect()
}

/// One cell as visited by the traversal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCell {
    /// Y index.
    pub row: usize,
    /// Storage column: index of `x` in the X axis, whatever the direction.
    pub col: usize,
    /// Stage X in mm.
    pub x: f64,
    /// Stage Y in mm.
    pub y: f64,
    /// Position in traversal order, 0-based.
    pub ordinal: usize,
}

impl GridCell {
    /// Stage target of this cell.
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// Axes of a scan and the order in which its cells are visited.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanGrid {
    x_positions: Vec<f64>,
    y_positions: Vec<f64>,
    serpentine: bool,
}

impl ScanGrid {
    /// Expand the axes of `params`.
    pub fn new(params: &ScanParameters) -> Self {
        Self {
            x_positions: axis_positions(params.x_start, params.x_end, params.step_x),
            y_positions: axis_positions(params.y_start, params.y_end, params.step_y),
            serpentine: params.serpentine,
        }
    }

    /// X samples, ascending.
    pub fn x_positions(&self) -> &[f64] {
        &self.x_positions
    }

    /// Y samples, ascending.
    pub fn y_positions(&self) -> &[f64] {
        &self.y_positions
    }

    /// Columns.
    pub fn nx(&self) -> usize {
        self.x_positions.len()
    }

    /// Rows.
    pub fn ny(&self) -> usize {
        self.y_positions.len()
    }

    /// `nx * ny`.
    pub fn total_points(&self) -> usize {
        self.nx() * self.ny()
    }

    /// True when `row` is visited right to left.
    pub fn is_reversed(&self, row: usize) -> bool {
        self.serpentine && row % 2 == 1
    }

    /// Cells of one row in visiting order.
    pub fn row(&self, row: usize) -> impl Iterator<Item = GridCell> + '_ {
        let nx = self.nx();
        let reversed = self.is_reversed(row);
        let y = self.y_positions.get(row).copied().unwrap_or_default();
        (0..nx).map(move |step| {
            let col = if reversed { nx - 1 - step } else { step };
            GridCell {
                row,
                col,
                x: self.x_positions[col],
                y,
                ordinal: row * nx + step,
            }
        })
    }

    /// Every cell in visiting order.
    pub fn traversal(&self) -> impl Iterator<Item = GridCell> + '_ {
        (0..self.ny()).flat_map(move |row| self.row(row))
    }
}
