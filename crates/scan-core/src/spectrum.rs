//! Spectra, predictions and spectrometer status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limits::{MAX_SPECTRUM_SAMPLES, MIN_SPECTRUM_SAMPLES};

/// One acquisition: paired wavelength (nm) and intensity arrays.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Spectrum {
    /// Wavelength of each sample in nm, ascending.
    pub wavelengths: Vec<f64>,
    /// Measured intensity of each sample.
    pub intensities: Vec<f64>,
}

/// Reason a spectrum is unsuitable for inference.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpectrumError {
    /// No samples.
    #[error("Spectrum data cannot be empty")]
    Empty,
    /// Arrays differ in length.
    #[error("Wavelengths ({wavelengths}) and intensities ({intensities}) must have same length")]
    LengthMismatch {
        /// Number of wavelengths.
        wavelengths: usize,
        /// Number of intensities.
        intensities: usize,
    },
    /// Fewer samples than the model accepts.
    #[error("Spectrum too short ({0} points). Minimum {min} points required", min = MIN_SPECTRUM_SAMPLES)]
    TooShort(usize),
    /// More samples than the model accepts.
    #[error("Spectrum too long ({0} points). Maximum {max} points allowed", max = MAX_SPECTRUM_SAMPLES)]
    TooLong(usize),
    /// A wavelength is NaN or infinite.
    #[error("Wavelengths contain invalid values (NaN or infinity)")]
    NonFiniteWavelength,
    /// An intensity is NaN or infinite.
    #[error("Intensities contain invalid values (NaN or infinity)")]
    NonFiniteIntensity,
    /// A wavelength is zero or negative.
    #[error("Wavelengths must be positive")]
    NonPositiveWavelength,
    /// Wavelengths are not strictly increasing.
    #[error("Wavelengths must be in ascending order")]
    NotAscending,
    /// An intensity is negative.
    #[error("Intensities cannot be negative")]
    NegativeIntensity,
    /// Flat signal.
    #[error("Intensities appear to be constant (no variation detected)")]
    Constant,
}

impl Spectrum {
    /// Pair wavelength and intensity arrays.
    pub fn new(wavelengths: Vec<f64>, intensities: Vec<f64>) -> Self {
        Self {
            wavelengths,
            intensities,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.intensities.len()
    }

    /// True when there are no samples.
    pub fn is_empty(&self) -> bool {
        self.intensities.is_empty()
    }

    /// Wavelength span `(first, last)`, if any samples exist.
    pub fn wavelength_range(&self) -> Option<(f64, f64)> {
        Some((*self.wavelengths.first()?, *self.wavelengths.last()?))
    }

    /// Check the structural and numerical preconditions for inference.
    pub fn validate(&self) -> Result<(), SpectrumError> {
        if self.wavelengths.is_empty() || self.intensities.is_empty() {
            return Err(SpectrumError::Empty);
        }
        if self.wavelengths.len() != self.intensities.len() {
            return Err(SpectrumError::LengthMismatch {
                wavelengths: self.wavelengths.len(),
                intensities: self.intensities.len(),
            });
        }
        let n = self.len();
        if n < MIN_SPECTRUM_SAMPLES {
            return Err(SpectrumError::TooShort(n));
        }
        if n > MAX_SPECTRUM_SAMPLES {
            return Err(SpectrumError::TooLong(n));
        }
        if !self.wavelengths.iter().all(|w| w.is_finite()) {
            return Err(SpectrumError::NonFiniteWavelength);
        }
        if !self.intensities.iter().all(|i| i.is_finite()) {
            return Err(SpectrumError::NonFiniteIntensity);
        }
        if self.wavelengths.iter().any(|&w| w <= 0.0) {
            return Err(SpectrumError::NonPositiveWavelength);
        }
        if self.wavelengths.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SpectrumError::NotAscending);
        }
        if self.intensities.iter().any(|&i| i < 0.0) {
            return Err(SpectrumError::NegativeIntensity);
        }

        let (lo, hi) = self
            .intensities
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if hi - lo < 1e-10 {
            return Err(SpectrumError::Constant);
        }

        Ok(())
    }
}

/// Output of the inference service for one spectrum.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Prediction {
    /// Estimated purity, 0..=100.
    pub purity_percentage: f64,
    /// Model confidence, 0..=1.
    pub confidence_score: f64,
    /// Contaminants the model detected, if it reports any.
    #[serde(default)]
    pub contaminants: Vec<String>,
}

/// Reason a prediction is out of its documented range.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictionError {
    /// Purity outside 0-100.
    #[error("Purity percentage ({0}) must be between 0 and 100")]
    PurityOutOfRange(f64),
    /// Confidence outside 0-1.
    #[error("Confidence score ({0}) must be between 0 and 1")]
    ConfidenceOutOfRange(f64),
}

impl Prediction {
    /// Prediction without contaminants.
    pub fn new(purity_percentage: f64, confidence_score: f64) -> Self {
        Self {
            purity_percentage,
            confidence_score,
            contaminants: Vec::new(),
        }
    }

    /// Attach detected contaminants.
    pub fn with_contaminants(mut self, contaminants: Vec<String>) -> Self {
        self.contaminants = contaminants;
        self
    }

    /// Reject predictions outside their documented range (NaN included).
    pub fn validate(&self) -> Result<(), PredictionError> {
        if !(0.0..=100.0).contains(&self.purity_percentage) {
            return Err(PredictionError::PurityOutOfRange(self.purity_percentage));
        }
        if !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(PredictionError::ConfidenceOutOfRange(self.confidence_score));
        }
        Ok(())
    }
}

/// Snapshot of spectrometer state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrometerStatus {
    /// Whether the device is connected.
    pub connected: bool,
    /// Current integration time in seconds.
    pub integration_time: f64,
    /// `(min, max)` wavelength in nm.
    pub wavelength_range: (f64, f64),
    /// Detector pixel count.
    pub num_pixels: usize,
}
