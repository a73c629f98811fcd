//! ScanOrchestrator - drives one grid scan at a time.
//!
//! The orchestrator owns the scan lifecycle: it validates a request against
//! the stage travel, walks the grid, sequences stage motion, acquisition and
//! inference for every cell, and assembles the result that callers query.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  start_scan()  ┌─────────┐  pause_scan()   ┌────────┐
//! │ Idle │───────────────▶│ Running │────────────────▶│ Paused │
//! └──────┘                └────┬────┘◀────────────────└───┬────┘
//!    ▲                         │        resume_scan()     │
//!    │   completed / error     │                          │ cancel_scan()
//!    └─────────────────────────┴──────────────────────────┘
//! ```
//!
//! The finished result keeps its terminal status (`completed`, `error` or
//! `cancelled`) while the orchestrator itself is back to idle.
//!
//! # Concurrency
//!
//! `start_scan` runs the traversal on the caller's task and is the only
//! writer of the result. Every other method may be called concurrently from
//! other tasks through a shared `Arc<ScanOrchestrator>`. Locks are
//! `parking_lot` and never held across an await; lock order is phase, then
//! result.
//!
//! # Usage
//!
//! ```rust,ignore
//! let orchestrator = Arc::new(ScanOrchestrator::new(stage, spectrometer, inference));
//!
//! let mut progress = orchestrator.subscribe();
//! let runner = orchestrator.clone();
//! let scan = tokio::spawn(async move { runner.start_scan(params).await });
//!
//! while let Ok(snapshot) = progress.recv().await {
//!     println!("{:.0}%", snapshot.progress * 100.0);
//!     if snapshot.status.is_terminal() {
//!         break;
//!     }
//! }
//! let result = scan.await??;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use scan_core::limits::PROGRESS_NOTIFICATIONS;
use scan_core::{
    AppResult, InferenceService, ObserverHandle, Position, Prediction, ScanError, Spectrometer,
    SpectrometerStatus, Spectrum, TravelLimits, XyStage,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::OrchestratorConfig;
use crate::control::{Checkpoint, ScanControl};
use crate::export::{export_result, ExportFormat};
use crate::grid::{GridCell, ScanGrid};
use crate::params::ScanParameters;
use crate::progress::{ProgressHub, ProgressObserver};
use crate::result::{
    GridStatistics, PointOutcome, ScanPoint, ScanResult, ScanStatus, StatusSnapshot,
};

/// Orchestrator-side state: idle, running or paused, plus the controls of
/// the active scan.
struct Phase {
    status: ScanStatus,
    control: Option<ScanControl>,
}

enum TraversalEnd {
    Exhausted,
    Cancelled,
}

/// A visited cell waiting for inference.
struct PendingPoint {
    cell: GridCell,
    timestamp: DateTime<Utc>,
    acquisition: Result<Spectrum, String>,
}

type BatchPredictions = Result<Vec<Option<anyhow::Result<Prediction>>>, String>;

/// Stage part of [`HardwareStatus`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageStatus {
    /// Link to the stage is open.
    pub connected: bool,
    /// Homing completed.
    pub homed: bool,
    /// Emergency stop latched.
    pub emergency_stop: bool,
    /// A move is in progress.
    pub moving: bool,
    /// Absent when the stage cannot report it.
    pub position: Option<Position>,
    /// Travel range, when the stage reports it.
    pub limits: Option<TravelLimits>,
}

/// Combined device and scan status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HardwareStatus {
    /// Stage state.
    pub stage: StageStatus,
    /// Absent when the spectrometer cannot report it.
    pub spectrometer: Option<SpectrometerStatus>,
    /// Orchestrator phase.
    pub scan_status: ScanStatus,
}

/// Coordinates a stage, a spectrometer and an inference service through
/// grid scans.
///
/// Construct once at startup with connected devices and share it as
/// `Arc<ScanOrchestrator>`.
pub struct ScanOrchestrator {
    stage: Arc<dyn XyStage>,
    spectrometer: Arc<dyn Spectrometer>,
    inference: Arc<dyn InferenceService>,
    config: OrchestratorConfig,
    phase: Mutex<Phase>,
    result: RwLock<Option<ScanResult>>,
    progress: ProgressHub,
}

impl ScanOrchestrator {
    /// Orchestrator with default timing.
    pub fn new(
        stage: Arc<dyn XyStage>,
        spectrometer: Arc<dyn Spectrometer>,
        inference: Arc<dyn InferenceService>,
    ) -> Self {
        Self::with_config(stage, spectrometer, inference, OrchestratorConfig::default())
    }

    /// Orchestrator with explicit timing and channel settings.
    pub fn with_config(
        stage: Arc<dyn XyStage>,
        spectrometer: Arc<dyn Spectrometer>,
        inference: Arc<dyn InferenceService>,
        config: OrchestratorConfig,
    ) -> Self {
        let progress = ProgressHub::new(config.progress_channel_capacity);
        Self {
            stage,
            spectrometer,
            inference,
            config,
            phase: Mutex::new(Phase {
                status: ScanStatus::Idle,
                control: None,
            }),
            result: RwLock::new(None),
            progress,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Orchestrator phase: `Idle`, `Running` or `Paused`.
    pub fn status(&self) -> ScanStatus {
        self.phase.lock().status
    }

    // =========================================================================
    // Scan lifecycle
    // =========================================================================

    /// Run one scan to its end.
    ///
    /// Returns the finished result for completed and cancelled scans.
    /// Rejections (`Busy`, `Validation`) leave every state untouched. Any
    /// other error is returned after the result has been finalized with
    /// status `error`.
    pub async fn start_scan(&self, params: ScanParameters) -> AppResult<ScanResult> {
        self.ensure_idle()?;
        let limits = self.stage.limits().await.map_err(ScanError::device)?;
        params.validate(&limits)?;

        let grid = ScanGrid::new(&params);
        let scan_id = new_scan_id();
        let control = ScanControl::new();
        self.claim(ScanResult::new(scan_id.clone(), params.clone(), &grid), &control)?;
        let _active = ActiveScan { orchestrator: self };

        info!(
            scan_id = %scan_id,
            nx = grid.nx(),
            ny = grid.ny(),
            total_points = grid.total_points(),
            serpentine = params.serpentine,
            batch_size = params.batch_size,
            "Starting scan"
        );

        let outcome = async {
            self.prepare_hardware(&params).await?;
            self.traverse(&grid, &params, &control).await
        }
        .instrument(info_span!("scan", scan_id = %scan_id))
        .await;

        let (status, message) = match &outcome {
            Ok(TraversalEnd::Exhausted) => (ScanStatus::Completed, None),
            Ok(TraversalEnd::Cancelled) => (ScanStatus::Cancelled, None),
            Err(e) => (ScanStatus::Error, Some(e.to_string())),
        };
        let finished = self.finalize(status, message);
        self.notify_progress();

        match outcome {
            Ok(_) => {
                let result = finished.ok_or_else(|| {
                    ScanError::Internal("scan result missing at finalization".to_string())
                })?;
                info!(
                    scan_id = %scan_id,
                    status = %result.status,
                    completed_points = result.completed_points,
                    failed_points = result.failed_points(),
                    "Scan finished"
                );
                Ok(result)
            }
            Err(e) => {
                error!(scan_id = %scan_id, error = %e, "Scan failed");
                Err(e)
            }
        }
    }

    /// Pause a running scan at its next checkpoint.
    ///
    /// Returns false (and does nothing) unless a scan is running.
    pub fn pause_scan(&self) -> bool {
        let mut phase = self.phase.lock();
        if phase.status != ScanStatus::Running {
            debug!(status = %phase.status, "Pause ignored");
            return false;
        }
        match phase.control.as_ref() {
            Some(control) if !control.is_cancelled() => {
                control.pause();
            }
            _ => return false,
        }
        phase.status = ScanStatus::Paused;
        self.set_result_status(ScanStatus::Paused);
        info!("Scan paused");
        true
    }

    /// Resume a paused scan.
    ///
    /// Returns false (and does nothing) unless a scan is paused.
    pub fn resume_scan(&self) -> bool {
        let mut phase = self.phase.lock();
        if phase.status != ScanStatus::Paused {
            debug!(status = %phase.status, "Resume ignored");
            return false;
        }
        if let Some(control) = phase.control.as_ref() {
            control.resume();
        }
        phase.status = ScanStatus::Running;
        self.set_result_status(ScanStatus::Running);
        info!("Scan resumed");
        true
    }

    /// Request cancellation of the active scan.
    ///
    /// The scan stops at its next checkpoint and keeps the points gathered
    /// so far. Returns false if no scan is active.
    pub fn cancel_scan(&self) -> bool {
        let phase = self.phase.lock();
        match phase.control.as_ref() {
            Some(control) if phase.status.is_active() => {
                if !control.is_cancelled() {
                    info!("Scan cancellation requested");
                }
                control.cancel();
                true
            }
            _ => false,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Consistent snapshot of the current or last scan.
    pub fn scan_status(&self) -> StatusSnapshot {
        self.result
            .read()
            .as_ref()
            .map_or_else(StatusSnapshot::idle, |r| {
                StatusSnapshot::from_result(r, Utc::now())
            })
    }

    /// Copy of the current or last result.
    ///
    /// Taken under the result lock, so it never shows a half-applied batch.
    pub fn current_result(&self) -> Option<ScanResult> {
        self.result.read().clone()
    }

    /// Summary of the current or last purity grid.
    pub fn scan_statistics(&self) -> Option<GridStatistics> {
        self.result.read().as_ref().and_then(ScanResult::statistics)
    }

    /// Write the current or last result to `path`.
    ///
    /// Fails with `NoScanData` before the first scan.
    pub fn export_scan_data(&self, path: impl AsRef<Path>, format: ExportFormat) -> AppResult<()> {
        let path = path.as_ref();
        let result = self.current_result().ok_or(ScanError::NoScanData)?;
        export_result(&result, path, format)?;
        info!(
            scan_id = %result.scan_id,
            path = %path.display(),
            format = %format,
            points = result.points.len(),
            "Scan data exported"
        );
        Ok(())
    }

    // =========================================================================
    // Progress
    // =========================================================================

    /// Register an observer for progress snapshots.
    pub fn add_progress_observer(&self, observer: Arc<dyn ProgressObserver>) -> ObserverHandle {
        self.progress.add(observer)
    }

    /// Unregister an observer. Returns false for an unknown handle.
    pub fn remove_progress_observer(&self, handle: ObserverHandle) -> bool {
        self.progress.remove(handle)
    }

    /// Receive every progress snapshot the observers receive.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.progress.subscribe()
    }

    // =========================================================================
    // Hardware control
    // =========================================================================

    /// Home the stage. Rejected with `Busy` while a scan is active.
    pub async fn home_stage(&self) -> AppResult<Position> {
        self.ensure_idle()?;
        info!("Homing stage");
        self.stage.home().await.map_err(ScanError::device)
    }

    /// Stop the stage and cancel any active scan.
    pub async fn emergency_stop(&self) -> AppResult<()> {
        warn!("Emergency stop requested");
        if self.cancel_scan() {
            warn!("Active scan cancelled by emergency stop");
        }
        self.stage.stop().await.map_err(ScanError::device)
    }

    /// Clear a latched emergency stop.
    pub async fn reset_emergency_stop(&self) -> AppResult<()> {
        self.stage
            .reset_emergency_stop()
            .await
            .map_err(ScanError::device)?;
        info!("Emergency stop reset");
        Ok(())
    }

    /// Device and scan status in one report.
    pub async fn hardware_status(&self) -> HardwareStatus {
        let stage = StageStatus {
            connected: self.stage.is_connected(),
            homed: self.stage.is_homed(),
            emergency_stop: self.stage.emergency_stop_active(),
            moving: self.stage.is_moving(),
            position: self.stage.position().await.ok(),
            limits: self.stage.limits().await.ok(),
        };
        HardwareStatus {
            stage,
            spectrometer: self.spectrometer.status().await.ok(),
            scan_status: self.status(),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_idle(&self) -> AppResult<()> {
        let phase = self.phase.lock();
        if phase.status == ScanStatus::Idle {
            Ok(())
        } else {
            Err(ScanError::Busy {
                status: phase.status.to_string(),
            })
        }
    }

    /// Move from idle to running and install the fresh result.
    fn claim(&self, result: ScanResult, control: &ScanControl) -> AppResult<()> {
        let mut phase = self.phase.lock();
        if phase.status != ScanStatus::Idle {
            return Err(ScanError::Busy {
                status: phase.status.to_string(),
            });
        }
        phase.status = ScanStatus::Running;
        phase.control = Some(control.clone());
        *self.result.write() = Some(result);
        Ok(())
    }

    fn set_result_status(&self, status: ScanStatus) {
        if let Some(result) = self.result.write().as_mut() {
            if !result.status.is_terminal() {
                result.status = status;
            }
        }
    }

    /// Write the terminal status and return to idle in one step.
    fn finalize(&self, status: ScanStatus, message: Option<String>) -> Option<ScanResult> {
        let mut phase = self.phase.lock();
        let finished = self.result.write().as_mut().map(|result| {
            result.status = status;
            result.end_time = Some(Utc::now());
            if message.is_some() {
                result.error_message = message;
            }
            result.clone()
        });
        phase.status = ScanStatus::Idle;
        phase.control = None;
        finished
    }

    fn notify_progress(&self) {
        let failures = self.progress.notify(&self.scan_status());
        if failures > 0 {
            debug!(failures, "Progress observers reported errors");
        }
    }

    async fn prepare_hardware(&self, params: &ScanParameters) -> AppResult<()> {
        if !self.stage.is_connected() {
            return Err(ScanError::Preparation("Stage not connected".to_string()));
        }
        if !self.spectrometer.is_connected() {
            return Err(ScanError::Preparation(
                "Spectrometer not connected".to_string(),
            ));
        }
        if !self.stage.is_homed() {
            info!("Stage not homed, homing before scan");
            self.stage
                .home()
                .await
                .map_err(|e| ScanError::preparation(e.context("Homing failed")))?;
        }
        self.spectrometer
            .set_integration_time(params.integration_time)
            .await
            .map_err(|e| ScanError::preparation(e.context("Setting integration time failed")))?;
        debug!(integration_time = params.integration_time, "Hardware prepared");
        Ok(())
    }

    async fn traverse(
        &self,
        grid: &ScanGrid,
        params: &ScanParameters,
        control: &ScanControl,
    ) -> AppResult<TraversalEnd> {
        let total = grid.total_points();
        let notify_every = total.div_ceil(PROGRESS_NOTIFICATIONS).max(1);
        let mut batch: Vec<PendingPoint> = Vec::with_capacity(params.batch_size);
        let mut end = TraversalEnd::Exhausted;

        'rows: for row in 0..grid.ny() {
            if control.checkpoint().await == Checkpoint::Cancelled {
                end = TraversalEnd::Cancelled;
                break;
            }
            debug!(row, reversed = grid.is_reversed(row), "Starting row");

            for cell in grid.row(row) {
                if control.checkpoint().await == Checkpoint::Cancelled {
                    end = TraversalEnd::Cancelled;
                    break 'rows;
                }

                let pending = match self.acquire(&cell, params.integration_time).await {
                    Ok(pending) => pending,
                    Err(e) => {
                        if !batch.is_empty() {
                            self.flush_batch(&mut batch).await;
                        }
                        return Err(e);
                    }
                };
                batch.push(pending);
                if batch.len() >= params.batch_size || cell.ordinal + 1 == total {
                    self.flush_batch(&mut batch).await;
                }

                let completed = self.record_completion()?;
                if completed % notify_every == 0 {
                    self.notify_progress();
                }
            }
        }

        if !batch.is_empty() {
            debug!(buffered = batch.len(), "Flushing partial batch");
            self.flush_batch(&mut batch).await;
        }
        if let TraversalEnd::Cancelled = end {
            info!("Scan cancelled at checkpoint");
        }
        Ok(end)
    }

    /// Move, settle and acquire one cell. Failures stay with the cell, except
    /// an expired move timeout, which ends the scan.
    async fn acquire(&self, cell: &GridCell, integration_time: f64) -> AppResult<PendingPoint> {
        let acquisition = match self.move_to(cell).await? {
            Ok(()) => self.measure(integration_time).await,
            Err(e) => Err(e),
        };
        let acquisition = acquisition.map_err(|e| {
            let error = format!("{:#}", e);
            warn!(
                row = cell.row,
                col = cell.col,
                x = cell.x,
                y = cell.y,
                error = %error,
                "Point acquisition failed"
            );
            error
        });
        Ok(PendingPoint {
            cell: *cell,
            timestamp: Utc::now(),
            acquisition,
        })
    }

    /// Move to the cell and wait for completion.
    ///
    /// The inner result is the move itself. A move that outlives
    /// `move_timeout` may still be running, so the stage is stopped and the
    /// outer error ends the scan before another target is sent.
    async fn move_to(&self, cell: &GridCell) -> AppResult<anyhow::Result<()>> {
        let motion = self.stage.move_abs(cell.position(), true);
        let Some(limit) = self.config.move_timeout() else {
            return Ok(motion.await.map(|_| ()));
        };
        match tokio::time::timeout(limit, motion).await {
            Ok(moved) => Ok(moved.map(|_| ())),
            Err(_) => {
                error!(
                    row = cell.row,
                    col = cell.col,
                    timeout = ?limit,
                    "Stage move timed out, stopping stage"
                );
                if let Err(e) = self.stage.stop().await {
                    warn!(error = %e, "Stage stop after move timeout failed");
                }
                Err(ScanError::Device(format!(
                    "Stage move to {} timed out after {:?}; stage stopped",
                    cell.position(),
                    limit
                )))
            }
        }
    }

    async fn measure(&self, integration_time: f64) -> anyhow::Result<Spectrum> {
        let settle = self.config.settle_delay();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        with_timeout(
            self.config.acquire_timeout(),
            "Spectrum acquisition",
            self.spectrometer.read_spectrum(integration_time),
        )
        .await
    }

    /// Run inference for the buffered cells and commit them in order.
    async fn flush_batch(&self, batch: &mut Vec<PendingPoint>) {
        let mut spectra = Vec::with_capacity(batch.len());
        let mut slots = Vec::with_capacity(batch.len());
        for pending in batch.drain(..) {
            let slot = match pending.acquisition {
                Ok(spectrum) => {
                    spectra.push(spectrum);
                    Ok(spectra.len() - 1)
                }
                Err(error) => Err(error),
            };
            slots.push((pending.cell, pending.timestamp, slot));
        }

        let mut predictions: BatchPredictions = if spectra.is_empty() {
            Ok(Vec::new())
        } else {
            self.infer(&spectra).await
        };

        let points: Vec<ScanPoint> = slots
            .into_iter()
            .map(|(cell, timestamp, slot)| {
                let outcome = match slot {
                    Err(error) => PointOutcome::Failure { error },
                    Ok(index) => match &mut predictions {
                        Err(batch_error) => PointOutcome::Failure {
                            error: batch_error.clone(),
                        },
                        Ok(list) => prediction_outcome(list.get_mut(index).and_then(Option::take)),
                    },
                };
                if let PointOutcome::Failure { error } = &outcome {
                    debug!(row = cell.row, col = cell.col, error = %error, "Point recorded as failed");
                }
                ScanPoint {
                    x: cell.x,
                    y: cell.y,
                    row: cell.row,
                    col: cell.col,
                    timestamp,
                    outcome,
                }
            })
            .collect();

        self.commit_points(points);
    }

    async fn infer(&self, spectra: &[Spectrum]) -> BatchPredictions {
        let submitted = with_timeout(
            self.config.inference_timeout(),
            "Inference",
            self.inference.predict_batch(spectra),
        )
        .await;

        match submitted {
            Ok(predictions) if predictions.len() == spectra.len() => {
                Ok(predictions.into_iter().map(Some).collect())
            }
            Ok(predictions) => {
                let error = format!(
                    "Inference returned {} predictions for {} spectra",
                    predictions.len(),
                    spectra.len()
                );
                warn!(error = %error, "Batch inference failed");
                Err(error)
            }
            Err(e) => {
                let error = format!("{:#}", e);
                warn!(batch_size = spectra.len(), error = %error, "Batch inference failed");
                Err(error)
            }
        }
    }

    fn commit_points(&self, points: Vec<ScanPoint>) {
        let mut slot = self.result.write();
        let Some(result) = slot.as_mut() else {
            return;
        };
        for point in points {
            if let Some(purity) = point.purity_score() {
                result.grid.set(point.row, point.col, Some(purity));
            }
            result.points.push(point);
        }
    }

    fn record_completion(&self) -> AppResult<usize> {
        let mut slot = self.result.write();
        let result = slot.as_mut().ok_or_else(|| {
            ScanError::Internal("scan result disappeared during traversal".to_string())
        })?;
        result.completed_points = (result.completed_points + 1).min(result.total_points);
        Ok(result.completed_points)
    }
}

/// Resets the orchestrator if a scan future is dropped before it finalized.
struct ActiveScan<'a> {
    orchestrator: &'a ScanOrchestrator,
}

impl Drop for ActiveScan<'_> {
    fn drop(&mut self) {
        let mut phase = self.orchestrator.phase.lock();
        if phase.status == ScanStatus::Idle {
            return;
        }
        warn!("Scan dropped before finalization, marking it cancelled");
        if let Some(control) = phase.control.take() {
            control.cancel();
        }
        phase.status = ScanStatus::Idle;
        if let Some(result) = self.orchestrator.result.write().as_mut() {
            if !result.status.is_terminal() {
                result.status = ScanStatus::Cancelled;
                result.end_time = Some(Utc::now());
            }
        }
    }
}

fn prediction_outcome(prediction: Option<anyhow::Result<Prediction>>) -> PointOutcome {
    match prediction {
        Some(Ok(prediction)) => match prediction.validate() {
            Ok(()) => PointOutcome::Success {
                purity: prediction.purity_percentage,
                confidence: prediction.confidence_score,
            },
            Err(e) => PointOutcome::Failure {
                error: e.to_string(),
            },
        },
        Some(Err(e)) => PointOutcome::Failure {
            error: format!("{:#}", e),
        },
        None => PointOutcome::Failure {
            error: "No prediction returned for spectrum".to_string(),
        },
    }
}

async fn with_timeout<T, F>(limit: Option<Duration>, what: &str, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| anyhow!("{} timed out after {:?}", what, limit))?,
        None => fut.await,
    }
}

fn new_scan_id() -> String {
    format!("scan_{}", Utc::now().format("%Y%m%d_%H%M%S"))
}
