//! Layered configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/purity-scan.toml` (optional base file)
//! 2. Environment variables prefixed with `PURITY_SCAN_`, nested with `__`
//!
//! Every section has defaults, so an empty file (or none) is a valid
//! configuration.
//!
//! # Example
//! ```bash
//! PURITY_SCAN_APPLICATION__LOG_LEVEL=debug \
//! PURITY_SCAN_SCAN__BATCH_SIZE=8 \
//! purity-scan run
//! ```

use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use scan_driver_mock::{MockInferenceConfig, MockSpectrometerConfig, MockStageConfig};
use scan_experiment::{OrchestratorConfig, ScanParameters};
use serde::{Deserialize, Serialize};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/purity-scan.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "PURITY_SCAN_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub application: ApplicationConfig,
    pub stage: MockStageConfig,
    pub spectrometer: MockSpectrometerConfig,
    pub inference: MockInferenceConfig,
    pub orchestrator: OrchestratorConfig,
    /// Scan request used when the command line does not override it
    pub scan: ScanParameters,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "purity-scan".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl AppConfig {
    /// Load from a specific file and the environment
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref(), ENV_PREFIX).extract()
    }

    fn figment(path: &Path, env_prefix: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(env_prefix).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        if self.stage.x_max_mm <= 0.0 || self.stage.y_max_mm <= 0.0 {
            return Err(format!(
                "Stage travel must be positive (x_max_mm={}, y_max_mm={})",
                self.stage.x_max_mm, self.stage.y_max_mm
            ));
        }

        if self.stage.max_speed_mm_per_sec <= 0.0 {
            return Err(format!(
                "Invalid max_speed_mm_per_sec {}. Must be positive",
                self.stage.max_speed_mm_per_sec
            ));
        }

        let spectrometer = &self.spectrometer;
        if spectrometer.num_pixels < 2 {
            return Err(format!(
                "Invalid num_pixels {}. Must be at least 2",
                spectrometer.num_pixels
            ));
        }
        if spectrometer.wavelength_min_nm >= spectrometer.wavelength_max_nm {
            return Err(format!(
                "Invalid wavelength range [{}, {}] nm",
                spectrometer.wavelength_min_nm, spectrometer.wavelength_max_nm
            ));
        }
        if !(spectrometer.min_integration_s..=spectrometer.max_integration_s)
            .contains(&self.scan.integration_time)
        {
            return Err(format!(
                "Scan integration_time {} s outside spectrometer range [{}, {}] s",
                self.scan.integration_time,
                spectrometer.min_integration_s,
                spectrometer.max_integration_s
            ));
        }

        if self.orchestrator.progress_channel_capacity == 0 {
            return Err("progress_channel_capacity must be at least 1".to_string());
        }

        Ok(())
    }

    /// Effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
