//! Operational modes for mock devices.
//!
//! - **Instant**: Zero delays, deterministic behavior for unit tests
//! - **Realistic**: Hardware-like timing for integration tests and demos
//! - **Chaos**: Realistic timing, intended to be paired with an `ErrorConfig`

use serde::{Deserialize, Serialize};

/// Operational modes for mock devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing - for integration tests
    Realistic,
    /// Hardware-like timing plus configured failures - for resilience testing
    Chaos,
}

impl MockMode {
    /// Whether simulated operations should take real time.
    pub fn is_timed(&self) -> bool {
        !matches!(self, MockMode::Instant)
    }
}
