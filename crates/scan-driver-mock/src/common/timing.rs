//! Timing configuration for realistic mode.
//!
//! Defines hardware-like delays to simulate real device behavior.

use std::time::Duration;

/// Timing configuration for realistic mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingConfig {
    /// Communication delay per command in milliseconds (serial, network)
    pub communication_delay_ms: u64,
    /// Homing sequence duration in milliseconds (stage)
    pub homing_time_ms: u64,
    /// Processing time per request in milliseconds (inference)
    pub processing_time_ms: u64,
}

impl TimingConfig {
    /// Create timing config for the XY stage
    pub fn stage() -> Self {
        Self {
            communication_delay_ms: 5,
            homing_time_ms: 100,
            processing_time_ms: 0,
        }
    }

    /// Create timing config for the spectrometer (integration time is added per read)
    pub fn spectrometer() -> Self {
        Self {
            communication_delay_ms: 2,
            homing_time_ms: 0,
            processing_time_ms: 0,
        }
    }

    /// Create timing config for the inference service
    pub fn inference() -> Self {
        Self {
            communication_delay_ms: 1,
            homing_time_ms: 0,
            processing_time_ms: 15,
        }
    }

    /// Per-command delay.
    pub fn communication_delay(&self) -> Duration {
        Duration::from_millis(self.communication_delay_ms)
    }

    /// Homing duration.
    pub fn homing_time(&self) -> Duration {
        Duration::from_millis(self.homing_time_ms)
    }

    /// Per-request processing time.
    pub fn processing_time(&self) -> Duration {
        Duration::from_millis(self.processing_time_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let config = TimingConfig::default();
        assert_eq!(config.communication_delay(), Duration::ZERO);
        assert_eq!(config.homing_time(), Duration::ZERO);
        assert_eq!(config.processing_time(), Duration::ZERO);
    }

    #[test]
    fn test_presets() {
        assert_eq!(TimingConfig::stage().homing_time_ms, 100);
        assert_eq!(TimingConfig::spectrometer().communication_delay_ms, 2);
        assert_eq!(
            TimingConfig::inference().processing_time(),
            Duration::from_millis(15)
        );
    }
}
