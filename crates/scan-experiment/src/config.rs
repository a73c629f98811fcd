//! Orchestrator tuning.

use std::time::Duration;

use scan_core::limits::{DEFAULT_SETTLE_DELAY, PROGRESS_CHANNEL_CAPACITY};
use serde::{Deserialize, Serialize};

/// Timing and channel settings of a [`crate::ScanOrchestrator`].
///
/// Timeouts bound a single suspension point. An expired acquisition counts
/// as a per-point failure and an expired inference as a per-batch failure.
/// An expired move stops the stage and ends the scan with an error, since
/// the abandoned motion may still be running. `None` waits indefinitely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Delay between motion completion and acquisition.
    pub settle_delay_ms: u64,
    /// Bound on one stage move.
    pub move_timeout_ms: Option<u64>,
    /// Bound on one spectrum acquisition.
    pub acquire_timeout_ms: Option<u64>,
    /// Bound on one inference submission.
    pub inference_timeout_ms: Option<u64>,
    /// Buffered snapshots per broadcast subscriber.
    pub progress_channel_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: DEFAULT_SETTLE_DELAY.as_millis() as u64,
            move_timeout_ms: None,
            acquire_timeout_ms: None,
            inference_timeout_ms: None,
            progress_channel_capacity: PROGRESS_CHANNEL_CAPACITY,
        }
    }
}

impl OrchestratorConfig {
    /// Settle delay as a `Duration`.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Move bound, if set.
    pub fn move_timeout(&self) -> Option<Duration> {
        self.move_timeout_ms.map(Duration::from_millis)
    }

    /// Acquisition bound, if set.
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    /// Inference bound, if set.
    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout_ms.map(Duration::from_millis)
    }

    /// Set the settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Bound stage moves.
    pub fn with_move_timeout(mut self, timeout: Duration) -> Self {
        self.move_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Bound acquisitions.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Bound inference submissions.
    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}
