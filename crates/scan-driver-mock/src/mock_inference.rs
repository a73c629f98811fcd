//! Mock purity inference service.

use anyhow::Result;
use async_trait::async_trait;
use scan_core::{InferenceService, Prediction, Spectrum};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::{ErrorConfig, MockMode, TimingConfig, simulate_delay};
use crate::mock_spectrometer::{CONTAMINANT_BAND, SAMPLE_BAND};

const DRIVER: &str = "mock_inference";

/// Contaminant share above which a contaminant is reported.
const CONTAMINANT_REPORT_THRESHOLD: f64 = 0.05;

/// How the mock turns a spectrum into a prediction.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionModel {
    /// Always return the same prediction
    Fixed(Prediction),
    /// Purity from the relative height of the sample and contaminant bands
    BandRatio {
        /// Sample band center in nm
        sample_nm: f64,
        /// Contaminant band center in nm
        contaminant_nm: f64,
        /// Half-width of the window searched around each center
        window_nm: f64,
        /// Name reported when the contaminant band is present
        contaminant_name: String,
    },
}

impl PredictionModel {
    /// Band-ratio model tuned to the bands of `MockSpectrometer`.
    pub fn band_ratio(contaminant_name: &str) -> Self {
        PredictionModel::BandRatio {
            sample_nm: SAMPLE_BAND.center_nm,
            contaminant_nm: CONTAMINANT_BAND.center_nm,
            window_nm: 2.0 * CONTAMINANT_BAND.width_nm,
            contaminant_name: contaminant_name.to_string(),
        }
    }
}

impl Default for PredictionModel {
    fn default() -> Self {
        PredictionModel::band_ratio("unknown_compound")
    }
}

/// Configuration for MockInference
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MockInferenceConfig {
    /// Return this purity for every spectrum instead of the band-ratio model
    pub fixed_purity: Option<f64>,
    /// Confidence paired with `fixed_purity`
    pub fixed_confidence: f64,
    /// Contaminant reported by the band-ratio model
    pub contaminant_name: String,
    /// Operational mode
    pub mode: MockMode,
}

impl Default for MockInferenceConfig {
    fn default() -> Self {
        Self {
            fixed_purity: None,
            fixed_confidence: 0.9,
            contaminant_name: "unknown_compound".to_string(),
            mode: MockMode::Instant,
        }
    }
}

/// Mock inference service.
///
/// Validates the incoming spectrum the way a real service would, then
/// applies its [`PredictionModel`].
///
/// Operation names for error injection: `predict` (per spectrum) and
/// `predict_batch` (whole submission).
#[derive(Clone)]
pub struct MockInference {
    model: Arc<PredictionModel>,
    mode: MockMode,
    timing: TimingConfig,
    error_config: ErrorConfig,
    calls: Arc<AtomicU64>,
}

impl MockInference {
    /// Band-ratio model, instant mode.
    pub fn new() -> Self {
        Self::with_model(PredictionModel::default())
    }

    /// Always predict `purity` with `confidence`.
    pub fn fixed(purity: f64, confidence: f64) -> Self {
        Self::with_model(PredictionModel::Fixed(Prediction::new(purity, confidence)))
    }

    /// Use `model`, instant mode.
    pub fn with_model(model: PredictionModel) -> Self {
        Self {
            model: Arc::new(model),
            mode: MockMode::Instant,
            timing: TimingConfig::inference(),
            error_config: ErrorConfig::none(),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create mock inference from configuration.
    pub fn with_config(config: &MockInferenceConfig) -> Self {
        let model = match config.fixed_purity {
            Some(purity) => PredictionModel::Fixed(Prediction::new(purity, config.fixed_confidence)),
            None => PredictionModel::band_ratio(&config.contaminant_name),
        };
        Self::with_model(model).mode(config.mode)
    }

    /// Set operational mode
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set error configuration
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Number of per-spectrum predictions attempted.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn evaluate(&self, spectrum: &Spectrum) -> Prediction {
        match self.model.as_ref() {
            PredictionModel::Fixed(prediction) => prediction.clone(),
            PredictionModel::BandRatio {
                sample_nm,
                contaminant_nm,
                window_nm,
                contaminant_name,
            } => {
                let sample = band_height(spectrum, *sample_nm, *window_nm);
                let contaminant = band_height(spectrum, *contaminant_nm, *window_nm);
                let total = sample + contaminant;
                if total <= 0.0 {
                    return Prediction::new(0.0, 0.0);
                }

                let share = contaminant / total;
                let purity = (100.0 * (1.0 - share)).clamp(0.0, 100.0);
                let confidence = (total / (total + 100.0)).clamp(0.0, 1.0);
                let contaminants = if share > CONTAMINANT_REPORT_THRESHOLD {
                    vec![contaminant_name.clone()]
                } else {
                    Vec::new()
                };
                Prediction::new(purity, confidence).with_contaminants(contaminants)
            }
        }
    }
}

impl Default for MockInference {
    fn default() -> Self {
        Self::new()
    }
}

/// Peak height within `center ± window` above the local floor.
///
/// The floor is the minimum over three times the window, which removes the
/// sloped baseline under the band.
fn band_height(spectrum: &Spectrum, center: f64, window: f64) -> f64 {
    let floor = samples_within(spectrum, center, 3.0 * window).fold(f64::INFINITY, f64::min);
    let peak = samples_within(spectrum, center, window).fold(f64::NEG_INFINITY, f64::max);
    if floor.is_finite() && peak.is_finite() {
        (peak - floor).max(0.0)
    } else {
        0.0
    }
}

fn samples_within(
    spectrum: &Spectrum,
    center: f64,
    half_width: f64,
) -> impl Iterator<Item = f64> + '_ {
    spectrum
        .wavelengths
        .iter()
        .zip(&spectrum.intensities)
        .filter(move |(wl, _)| (**wl - center).abs() <= half_width)
        .map(|(_, &intensity)| intensity)
}

#[async_trait]
impl InferenceService for MockInference {
    async fn predict(&self, spectrum: &Spectrum) -> Result<Prediction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.error_config.check_operation(DRIVER, "predict")?;
        spectrum.validate()?;

        simulate_delay(self.mode, self.timing.processing_time()).await;
        Ok(self.evaluate(spectrum))
    }

    async fn predict_batch(&self, spectra: &[Spectrum]) -> Result<Vec<Result<Prediction>>> {
        self.error_config.check_operation(DRIVER, "predict_batch")?;
        simulate_delay(self.mode, self.timing.communication_delay()).await;

        let mut predictions = Vec::with_capacity(spectra.len());
        for spectrum in spectra {
            predictions.push(self.predict(spectrum).await);
        }
        tracing::trace!(count = spectra.len(), "MockInference: Batch evaluated");
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;
    use crate::mock_spectrometer::MockSpectrometer;
    use scan_core::Spectrometer;

    async fn sample_spectrum(max_contamination: f64) -> Spectrum {
        let spectrometer = MockSpectrometer::builder()
            .seed(Some(3))
            .max_contamination(max_contamination)
            .connected()
            .build();
        spectrometer.read_spectrum(0.1).await.unwrap()
    }

    #[tokio::test]
    async fn test_fixed_prediction() {
        let service = MockInference::fixed(85.0, 0.9);
        let prediction = service.predict(&sample_spectrum(0.3).await).await.unwrap();
        assert_eq!(prediction, Prediction::new(85.0, 0.9));
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_band_ratio_tracks_contamination() {
        let service = MockInference::new();

        let clean = service.predict(&sample_spectrum(0.0).await).await.unwrap();
        assert!(clean.purity_percentage > 95.0, "{clean:?}");
        assert!(clean.contaminants.is_empty());
        clean.validate().unwrap();

        let dirty = service.predict(&sample_spectrum(5.0).await).await.unwrap();
        assert!(dirty.purity_percentage < clean.purity_percentage);
        dirty.validate().unwrap();
    }

    #[tokio::test]
    async fn test_rejects_invalid_spectrum() {
        let service = MockInference::new();
        let err = service
            .predict(&Spectrum::new(vec![1.0, 2.0], vec![1.0]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must have same length"));
    }

    #[tokio::test]
    async fn test_batch_level_failure() {
        let service = MockInference::fixed(50.0, 0.5).error_config(ErrorConfig::scenario(
            ErrorScenario::Timeout {
                operation: "predict_batch",
            },
        ));
        let spectrum = sample_spectrum(0.1).await;

        assert!(service.predict_batch(&[spectrum.clone()]).await.is_err());
        assert_eq!(service.calls(), 0);
        assert!(service.predict(&spectrum).await.is_ok());
    }

    #[tokio::test]
    async fn test_per_spectrum_failure_in_batch() {
        let service = MockInference::fixed(50.0, 0.5).error_config(ErrorConfig::scenario(
            ErrorScenario::FailNth {
                operation: "predict",
                n: 2,
            },
        ));
        let spectrum = sample_spectrum(0.1).await;
        let batch = vec![spectrum.clone(), spectrum.clone(), spectrum];

        let results = service.predict_batch(&batch).await.unwrap();
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_config_selects_model() {
        let fixed = MockInference::with_config(&MockInferenceConfig {
            fixed_purity: Some(70.0),
            ..Default::default()
        });
        assert_eq!(
            *fixed.model,
            PredictionModel::Fixed(Prediction::new(70.0, 0.9))
        );

        let ratio = MockInference::with_config(&MockInferenceConfig {
            contaminant_name: "lactose".to_string(),
            ..Default::default()
        });
        assert!(matches!(
            ratio.model.as_ref(),
            PredictionModel::BandRatio { contaminant_name, .. } if contaminant_name == "lactose"
        ));
    }
}
