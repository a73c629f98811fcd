//! Capability traits for the devices a scan drives.
//!
//! Every trait is async and `Send + Sync` so devices can be shared as
//! `Arc<dyn Trait>` between the scan task and request handlers. Blocking
//! drivers are expected to offload their I/O (for example with
//! `tokio::task::spawn_blocking`) so a slow device never stalls status
//! queries or pause/cancel requests.
//!
//! # Design Principles
//!
//! - **Units**: positions in mm, speeds in mm/s, integration times in seconds
//! - **Errors**: `anyhow::Result` at the seam; drivers attach `DriverError`
//!   or plain messages, the orchestrator decides whether a failure is
//!   per-point or fatal
//! - **Defaults**: optional capabilities have default implementations that
//!   either compose the required methods or bail with "not supported"

use anyhow::Result;
use async_trait::async_trait;

use crate::motion::{Position, TravelLimits};
use crate::spectrum::{Prediction, SpectrometerStatus, Spectrum};

// ============================================================================
// Motion
// ============================================================================

/// Capability: Two-axis motion stage.
///
/// # Contract
/// - Motion requires a connected, homed stage with no emergency stop latched
/// - Targets outside [`XyStage::limits`] are rejected, never clamped
/// - With `wait = true`, `move_abs` returns once the stage is in position
/// - `stop` halts motion and latches the emergency flag until
///   `reset_emergency_stop`
#[async_trait]
pub trait XyStage: Send + Sync {
    /// Open the link to the controller.
    async fn connect(&self) -> Result<()>;

    /// Close the link. Motion stops being possible.
    async fn disconnect(&self) -> Result<()>;

    /// True once `connect` succeeded.
    fn is_connected(&self) -> bool;

    /// True once homing completed.
    fn is_homed(&self) -> bool;

    /// True while the emergency stop is latched.
    fn emergency_stop_active(&self) -> bool;

    /// True while a move is in progress.
    fn is_moving(&self) -> bool {
        false
    }

    /// Drive to the reference origin and establish the coordinate frame.
    ///
    /// # Returns
    /// The position after homing.
    async fn home(&self) -> Result<Position>;

    /// Move to an absolute position.
    ///
    /// # Arguments
    /// * `target` - Absolute position in mm
    /// * `wait` - Block until motion is complete
    ///
    /// # Returns
    /// The position reported after the move.
    async fn move_abs(&self, target: Position, wait: bool) -> Result<Position>;

    /// Move relative to the current position.
    ///
    /// Subject to the same preconditions and bounds as [`XyStage::move_abs`].
    async fn move_rel(&self, dx: f64, dy: f64, wait: bool) -> Result<Position> {
        let current = self.position().await?;
        self.move_abs(current.offset(dx, dy), wait).await
    }

    /// Last known position.
    async fn position(&self) -> Result<Position>;

    /// Travel limits in the homed frame.
    async fn limits(&self) -> Result<TravelLimits>;

    /// Set the motion speed in mm/s.
    ///
    /// # Default Implementation
    /// Returns an error indicating speed control is not supported.
    async fn set_speed(&self, mm_per_s: f64) -> Result<()> {
        let _ = mm_per_s;
        anyhow::bail!("Speed control not supported by this stage")
    }

    /// Emergency stop: halt motion and latch the emergency flag.
    async fn stop(&self) -> Result<()>;

    /// Clear a latched emergency stop.
    async fn reset_emergency_stop(&self) -> Result<()>;
}

// ============================================================================
// Acquisition
// ============================================================================

/// Capability: Integration Time Control
///
/// # Contract
/// - Integration time is in seconds (not milliseconds)
/// - Setting it does not start an acquisition
/// - Values outside the hardware range are rejected
#[async_trait]
pub trait IntegrationControl: Send + Sync {
    /// Set the integration time in seconds.
    async fn set_integration_time(&self, seconds: f64) -> Result<()>;

    /// Current integration time in seconds.
    async fn integration_time(&self) -> Result<f64>;
}

/// Capability: Spectrometer
///
/// Single-shot acquisition returning paired, equal-length arrays with
/// ascending wavelengths.
#[async_trait]
pub trait Spectrometer: IntegrationControl {
    /// Open the link to the device.
    async fn connect(&self) -> Result<()>;

    /// Close the link.
    async fn disconnect(&self) -> Result<()>;

    /// True once `connect` succeeded.
    fn is_connected(&self) -> bool;

    /// Acquire one spectrum, integrating for `integration_time` seconds.
    async fn read_spectrum(&self, integration_time: f64) -> Result<Spectrum>;

    /// Connection, integration time and detector geometry.
    async fn status(&self) -> Result<SpectrometerStatus>;
}

// ============================================================================
// Inference
// ============================================================================

/// Capability: Purity inference.
///
/// Implementations may preprocess, run a model and derive secondary
/// signals internally. Callers submit raw spectra.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Predict purity for one raw spectrum.
    ///
    /// # Returns
    /// - Ok(prediction) on success
    /// - Err on a validation or internal failure for this spectrum only
    async fn predict(&self, spectrum: &Spectrum) -> Result<Prediction>;

    /// Predict purity for a batch of spectra.
    ///
    /// The outer `Err` means the whole submission failed (service
    /// unreachable, transport error). Inner results are per spectrum and
    /// line up with the input order.
    ///
    /// # Default Implementation
    /// Calls [`InferenceService::predict`] once per spectrum, in order.
    async fn predict_batch(&self, spectra: &[Spectrum]) -> Result<Vec<Result<Prediction>>> {
        let mut predictions = Vec::with_capacity(spectra.len());
        for spectrum in spectra {
            predictions.push(self.predict(spectrum).await);
        }
        Ok(predictions)
    }
}

// ============================================================================
// Observers
// ============================================================================

/// Handle returned when registering an observer, used for unregistration.
///
/// This is an opaque handle - the internal ID is implementation-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(pub u64);

impl ObserverHandle {
    /// Create a new observer handle with the given ID.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the internal ID (for debugging/logging).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0
    }
}
