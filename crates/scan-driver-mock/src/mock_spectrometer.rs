//! Mock spectrometer producing synthetic Raman-like spectra.

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::{IntegrationControl, Spectrometer, SpectrometerStatus, Spectrum};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{ErrorConfig, MockMode, MockRng, TimingConfig, simulate_delay};

const DRIVER: &str = "mock_spectrometer";

/// Integration time at which band amplitudes are specified.
const REFERENCE_INTEGRATION_S: f64 = 0.1;

/// Configuration for MockSpectrometer
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MockSpectrometerConfig {
    /// First detector wavelength in nm
    pub wavelength_min_nm: f64,
    /// Last detector wavelength in nm
    pub wavelength_max_nm: f64,
    /// Detector pixel count
    pub num_pixels: usize,
    /// Shortest accepted integration time in seconds
    pub min_integration_s: f64,
    /// Longest accepted integration time in seconds
    pub max_integration_s: f64,
    /// Integration time applied at construction
    pub integration_time_s: f64,
    /// Upper bound of the random contaminant band strength relative to the sample band
    pub max_contamination: f64,
    /// RNG seed for reproducible spectra
    pub seed: Option<u64>,
    /// Operational mode
    pub mode: MockMode,
}

impl Default for MockSpectrometerConfig {
    fn default() -> Self {
        Self {
            wavelength_min_nm: 400.0,
            wavelength_max_nm: 1800.0,
            num_pixels: 1024,
            min_integration_s: 0.001,
            max_integration_s: 10.0,
            integration_time_s: 0.1,
            max_contamination: 0.3,
            seed: None,
            mode: MockMode::Instant,
        }
    }
}

/// A Gaussian emission band in the synthetic spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RamanBand {
    /// Band center in nm
    pub center_nm: f64,
    /// Gaussian width (sigma) in nm
    pub width_nm: f64,
    /// Peak counts at the reference integration time
    pub amplitude: f64,
}

impl RamanBand {
    /// Band at `center_nm` with the given width and peak amplitude.
    pub fn new(center_nm: f64, width_nm: f64, amplitude: f64) -> Self {
        Self {
            center_nm,
            width_nm,
            amplitude,
        }
    }

    fn intensity_at(&self, wavelength: f64) -> f64 {
        let z = (wavelength - self.center_nm) / self.width_nm;
        self.amplitude * (-0.5 * z * z).exp()
    }
}

/// Sample band of the material under test.
pub const SAMPLE_BAND: RamanBand = RamanBand {
    center_nm: 1000.0,
    width_nm: 12.0,
    amplitude: 800.0,
};

/// Band of the simulated contaminant; its amplitude is scaled per acquisition.
pub const CONTAMINANT_BAND: RamanBand = RamanBand {
    center_nm: 1350.0,
    width_nm: 15.0,
    amplitude: 800.0,
};

#[derive(Debug)]
struct SpectrometerState {
    connected: bool,
    integration_time: f64,
    acquisitions: u64,
}

/// Mock spectrometer.
///
/// Each acquisition is a sloped baseline plus the sample band, a contaminant
/// band of random strength and uniform noise, all scaled with integration
/// time. In realistic mode `read_spectrum` takes the integration time.
///
/// Operation names for error injection: `connect`, `read_spectrum`.
#[derive(Clone)]
pub struct MockSpectrometer {
    state: Arc<Mutex<SpectrometerState>>,
    wavelengths: Arc<Vec<f64>>,
    integration_range: (f64, f64),
    max_contamination: f64,
    noise_amplitude: f64,
    mode: MockMode,
    timing: TimingConfig,
    rng: Arc<MockRng>,
    error_config: ErrorConfig,
}

impl MockSpectrometer {
    /// Create a disconnected spectrometer with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create mock spectrometer from configuration.
    pub fn with_config(config: &MockSpectrometerConfig) -> Self {
        Self::builder()
            .wavelength_range(config.wavelength_min_nm, config.wavelength_max_nm)
            .num_pixels(config.num_pixels)
            .integration_range(config.min_integration_s, config.max_integration_s)
            .integration_time(config.integration_time_s)
            .max_contamination(config.max_contamination)
            .seed(config.seed)
            .mode(config.mode)
            .build()
    }

    /// Create a builder for configuring MockSpectrometer
    pub fn builder() -> MockSpectrometerBuilder {
        MockSpectrometerBuilder::new()
    }

    /// Number of spectra acquired so far.
    pub fn acquisitions(&self) -> u64 {
        self.state.lock().acquisitions
    }

    fn check_integration_time(&self, seconds: f64) -> Result<()> {
        let (min, max) = self.integration_range;
        if !(seconds >= min && seconds <= max) {
            bail!("Integration time must be between {} and {} s", min, max);
        }
        Ok(())
    }

    fn synthesize(&self, integration_time: f64) -> Spectrum {
        let scale = integration_time / REFERENCE_INTEGRATION_S;
        let contamination = self.rng.uniform(self.max_contamination);
        let noise = self.rng.noise(self.wavelengths.len(), self.noise_amplitude);

        let first = self.wavelengths.first().copied().unwrap_or_default();
        let span = (self.wavelengths.last().copied().unwrap_or_default() - first).max(1.0);

        let intensities = self
            .wavelengths
            .iter()
            .zip(noise)
            .map(|(&wl, n)| {
                let baseline = 100.0 + 20.0 * (wl - first) / span;
                let signal = SAMPLE_BAND.intensity_at(wl)
                    + contamination * CONTAMINANT_BAND.intensity_at(wl);
                ((baseline + signal) * scale + n).max(0.0)
            })
            .collect();

        Spectrum::new(self.wavelengths.as_ref().clone(), intensities)
    }
}

impl Default for MockSpectrometer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntegrationControl for MockSpectrometer {
    async fn set_integration_time(&self, seconds: f64) -> Result<()> {
        if !self.is_connected() {
            bail!("Spectrometer not connected");
        }
        self.check_integration_time(seconds)?;
        self.state.lock().integration_time = seconds;
        tracing::debug!(seconds, "MockSpectrometer: Integration time set");
        Ok(())
    }

    async fn integration_time(&self) -> Result<f64> {
        Ok(self.state.lock().integration_time)
    }
}

#[async_trait]
impl Spectrometer for MockSpectrometer {
    async fn connect(&self) -> Result<()> {
        self.error_config.check_operation(DRIVER, "connect")?;
        simulate_delay(self.mode, self.timing.communication_delay()).await;
        self.state.lock().connected = true;
        tracing::info!(pixels = self.wavelengths.len(), "MockSpectrometer: Connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.lock().connected = false;
        tracing::info!("MockSpectrometer: Disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn read_spectrum(&self, integration_time: f64) -> Result<Spectrum> {
        if !self.is_connected() {
            bail!("Spectrometer not connected");
        }
        self.check_integration_time(integration_time)?;
        self.error_config.check_operation(DRIVER, "read_spectrum")?;

        simulate_delay(
            self.mode,
            Duration::from_secs_f64(integration_time) + self.timing.communication_delay(),
        )
        .await;

        let spectrum = self.synthesize(integration_time);
        self.state.lock().acquisitions += 1;
        Ok(spectrum)
    }

    async fn status(&self) -> Result<SpectrometerStatus> {
        let state = self.state.lock();
        Ok(SpectrometerStatus {
            connected: state.connected,
            integration_time: state.integration_time,
            wavelength_range: (
                self.wavelengths.first().copied().unwrap_or_default(),
                self.wavelengths.last().copied().unwrap_or_default(),
            ),
            num_pixels: self.wavelengths.len(),
        })
    }
}

/// Builder for MockSpectrometer
pub struct MockSpectrometerBuilder {
    wavelength_range: (f64, f64),
    num_pixels: usize,
    integration_range: (f64, f64),
    integration_time: f64,
    max_contamination: f64,
    noise_amplitude: f64,
    seed: Option<u64>,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
    connected: bool,
}

impl MockSpectrometerBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        let defaults = MockSpectrometerConfig::default();
        Self {
            wavelength_range: (defaults.wavelength_min_nm, defaults.wavelength_max_nm),
            num_pixels: defaults.num_pixels,
            integration_range: (defaults.min_integration_s, defaults.max_integration_s),
            integration_time: defaults.integration_time_s,
            max_contamination: defaults.max_contamination,
            noise_amplitude: 5.0,
            seed: defaults.seed,
            mode: defaults.mode,
            timing: TimingConfig::spectrometer(),
            error_config: ErrorConfig::none(),
            connected: false,
        }
    }

    /// Set the detector wavelength span
    pub fn wavelength_range(mut self, min_nm: f64, max_nm: f64) -> Self {
        self.wavelength_range = (min_nm, max_nm);
        self
    }

    /// Set the detector pixel count
    pub fn num_pixels(mut self, pixels: usize) -> Self {
        self.num_pixels = pixels;
        self
    }

    /// Set the accepted integration time range
    pub fn integration_range(mut self, min_s: f64, max_s: f64) -> Self {
        self.integration_range = (min_s, max_s);
        self
    }

    /// Set the initial integration time
    pub fn integration_time(mut self, seconds: f64) -> Self {
        self.integration_time = seconds;
        self
    }

    /// Set the contaminant band ceiling relative to the sample band
    pub fn max_contamination(mut self, fraction: f64) -> Self {
        self.max_contamination = fraction.max(0.0);
        self
    }

    /// Set the noise amplitude in counts
    pub fn noise_amplitude(mut self, counts: f64) -> Self {
        self.noise_amplitude = counts;
        self
    }

    /// Seed the RNG for reproducible spectra
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Set operational mode
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set realistic-mode timing
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Set error configuration
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Start connected (skips `connect()` in tests)
    pub fn connected(mut self) -> Self {
        self.connected = true;
        self
    }

    /// Build the MockSpectrometer
    pub fn build(self) -> MockSpectrometer {
        let (min_nm, max_nm) = self.wavelength_range;
        let pixels = self.num_pixels.max(2);
        let span = max_nm - min_nm;
        let wavelengths = (0..pixels)
            .map(|i| min_nm + span * i as f64 / (pixels - 1) as f64)
            .collect();

        MockSpectrometer {
            state: Arc::new(Mutex::new(SpectrometerState {
                connected: self.connected,
                integration_time: self.integration_time,
                acquisitions: 0,
            })),
            wavelengths: Arc::new(wavelengths),
            integration_range: self.integration_range,
            max_contamination: self.max_contamination,
            noise_amplitude: self.noise_amplitude,
            mode: self.mode,
            timing: self.timing,
            rng: Arc::new(MockRng::new(self.seed)),
            error_config: self.error_config,
        }
    }
}

impl Default for MockSpectrometerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
