//! `scan-experiment`
//!
//! Orchestration of two-dimensional purity scans.
//!
//! A [`ScanOrchestrator`] is built from a stage, a spectrometer and an
//! inference service (any implementations of the `scan-core` traits). For
//! each request it validates the [`ScanParameters`], expands them into a
//! [`ScanGrid`], and visits every cell:
//!
//! 1. checkpoint: wait while paused, stop if cancelled
//! 2. move the stage and wait for it
//! 3. settle, then acquire one spectrum
//! 4. buffer the spectrum; flush the buffer to inference when full
//! 5. count the cell and, periodically, notify progress observers
//!
//! Failures of a single cell or a single batch are recorded on the affected
//! [`ScanPoint`]s; only preparation failures and unexpected errors end a
//! scan with status `error`.

pub mod config;
pub mod control;
pub mod export;
pub mod grid;
pub mod orchestrator;
pub mod params;
pub mod progress;
pub mod result;

pub use config::OrchestratorConfig;
pub use control::{Checkpoint, ScanControl};
pub use export::{export_result, write_csv, write_json, ExportFormat};
pub use grid::{axis_positions, GridCell, ScanGrid};
pub use orchestrator::{HardwareStatus, ScanOrchestrator, StageStatus};
pub use params::ScanParameters;
pub use progress::{ProgressHub, ProgressObserver};
pub use result::{
    GridStatistics, PointOutcome, PurityGrid, ScanPoint, ScanResult, ScanStatus, StatusSnapshot,
};
