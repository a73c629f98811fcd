//! Shared constants for scan timing, grid sizing and payload checks.
//!
//! Centralized here so the orchestrator, the drivers and the binary agree
//! on defaults.

use std::time::Duration;

// =============================================================================
// Timing
// =============================================================================

/// Mechanical settling delay between motion completion and acquisition.
///
/// Stages report "in position" before vibrations have died down; the
/// orchestrator waits this long before triggering the spectrometer.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(50);

// =============================================================================
// Grid
// =============================================================================

/// Tolerance added to an axis end so the endpoint survives step accumulation.
pub const GRID_EPSILON: f64 = 1e-9;

/// Largest grid a single scan may request.
pub const MAX_GRID_POINTS: usize = 1_000_000;

// =============================================================================
// Progress
// =============================================================================

/// Upper bound on throttled progress notifications per scan.
///
/// Observers are notified every `max(1, total_points / PROGRESS_NOTIFICATIONS)`
/// completed points, plus once when the scan ends.
pub const PROGRESS_NOTIFICATIONS: usize = 20;

/// Capacity of the progress broadcast channel.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Payloads
// =============================================================================

/// Minimum number of samples in a spectrum accepted for inference.
pub const MIN_SPECTRUM_SAMPLES: usize = 100;

/// Maximum number of samples in a spectrum accepted for inference.
pub const MAX_SPECTRUM_SAMPLES: usize = 5_000;
