//! `scan-core`
//!
//! Core trait definitions and value types shared by the purity-scan crates.
//!
//! A scan drives three external collaborators, each modeled here as an
//! async capability trait so that hardware drivers and simulations are
//! interchangeable:
//!
//! - [`XyStage`]: two-axis motion stage with homing, bounds checking and an
//!   emergency-stop latch
//! - [`Spectrometer`]: integration-time control plus single-shot spectrum
//!   acquisition
//! - [`InferenceService`]: maps one spectrum to a purity estimate
//!
//! ## Key Types
//!
//! - [`Position`], [`TravelLimits`]: stage coordinates in millimetres
//! - [`Spectrum`], [`Prediction`]: acquisition and inference payloads
//! - [`ScanError`]: caller-facing error taxonomy of the orchestrator
//! - [`DriverError`]: structured failure raised by device drivers

pub mod capabilities;
pub mod error;
pub mod limits;
pub mod motion;
pub mod spectrum;

pub use anyhow::{anyhow, Result};

pub use capabilities::{InferenceService, IntegrationControl, ObserverHandle, Spectrometer, XyStage};
pub use error::{AppResult, DriverError, DriverErrorKind, ScanError, ValidationError};
pub use motion::{Axis, AxisLimits, Position, TravelLimits};
pub use spectrum::{Prediction, PredictionError, Spectrum, SpectrometerStatus, SpectrumError};
