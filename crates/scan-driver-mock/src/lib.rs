//! Mock hardware for purity-scan
//!
//! Simulated devices implementing the `scan-core` capability traits, for
//! tests and hardware-free runs. All delays use `tokio::time::sleep`, never
//! `std::thread::sleep`.
//!
//! # Available Mock Devices
//!
//! - [`MockStage`] - XY stage with homing, hard travel limits and emergency stop
//! - [`MockSpectrometer`] - synthetic spectra with a sample and a contaminant band
//! - [`MockInference`] - band-ratio (or fixed) purity predictions
//!
//! # Performance Characteristics
//!
//! - MockStage: 10 mm/s default speed, 20 mm/s² ramps, 100 ms homing
//! - MockSpectrometer: 400-1800 nm, 1024 pixels, acquisition takes the integration time
//! - MockInference: 15 ms per prediction
//!
//! Timings apply in `MockMode::Realistic` and `MockMode::Chaos`; the default
//! `MockMode::Instant` completes every operation immediately.
//!
//! # Error Injection
//!
//! ```rust,ignore
//! use scan_driver_mock::{ErrorConfig, ErrorScenario, MockSpectrometer};
//!
//! // Third acquisition fails, every other one succeeds.
//! let spectrometer = MockSpectrometer::builder()
//!     .error_config(ErrorConfig::scenario(ErrorScenario::FailNth {
//!         operation: "read_spectrum",
//!         n: 3,
//!     }))
//!     .build();
//! ```

pub mod common;
mod mock_inference;
mod mock_spectrometer;
mod mock_stage;

pub use common::{ErrorConfig, ErrorScenario, MockMode, MockRng, TimingConfig};

pub use mock_inference::{MockInference, MockInferenceConfig, PredictionModel};
pub use mock_spectrometer::{
    CONTAMINANT_BAND, MockSpectrometer, MockSpectrometerBuilder, MockSpectrometerConfig,
    RamanBand, SAMPLE_BAND,
};
pub use mock_stage::{MockStage, MockStageBuilder, MockStageConfig, VelocityProfile};
