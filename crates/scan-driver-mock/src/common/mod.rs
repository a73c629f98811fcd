//! Common infrastructure for mock devices.
//!
//! - **mode**: Operational modes (Instant, Realistic, Chaos)
//! - **timing**: Hardware-like timing configurations
//! - **errors**: Error injection framework
//! - **rng**: Seeded random number generator

pub mod errors;
pub mod mode;
pub mod rng;
pub mod timing;

pub use errors::{ErrorConfig, ErrorScenario};
pub use mode::MockMode;
pub use rng::MockRng;
pub use timing::TimingConfig;

/// Sleep for `duration` when `mode` simulates real timing.
pub(crate) async fn simulate_delay(mode: MockMode, duration: std::time::Duration) {
    if mode.is_timed() && !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
