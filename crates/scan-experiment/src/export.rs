//! Scan result export to JSON and CSV.
//!
//! JSON carries the whole result (parameters, grid, axes, points); CSV is
//! one row per visited point:
//!
//! ```text
//! x_mm,y_mm,purity_score,confidence,timestamp,error
//! 0,0,92.5,0.81,2024-05-01T10:00:00.000000Z,
//! 1,0,,,2024-05-01T10:00:00.120000Z,Spectrometer not connected
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use scan_core::{AppResult, ScanError};
use serde::{Deserialize, Serialize};

use crate::params::ScanParameters;
use crate::result::{PurityGrid, ScanPoint, ScanResult, ScanStatus};

const CSV_HEADER: [&str; 6] = [
    "x_mm",
    "y_mm",
    "purity_score",
    "confidence",
    "timestamp",
    "error",
];

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Pretty-printed JSON document.
    Json,
    /// One row per point.
    Csv,
}

impl ExportFormat {
    /// Conventional file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(ScanError::UnsupportedFormat(s.to_string())),
        }
    }
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    scan_id: &'a str,
    parameters: &'a ScanParameters,
    grid: &'a PurityGrid,
    x_positions: &'a [f64],
    y_positions: &'a [f64],
    status: ScanStatus,
    start_time: String,
    end_time: Option<String>,
    total_points: usize,
    completed_points: usize,
    error_message: Option<&'a str>,
    points: Vec<PointRecord<'a>>,
}

#[derive(Serialize)]
struct PointRecord<'a> {
    x: f64,
    y: f64,
    purity_score: Option<f64>,
    confidence: Option<f64>,
    timestamp: String,
    error: Option<&'a str>,
}

impl<'a> From<&'a ScanPoint> for PointRecord<'a> {
    fn from(point: &'a ScanPoint) -> Self {
        Self {
            x: point.x,
            y: point.y,
            purity_score: point.purity_score(),
            confidence: point.confidence(),
            timestamp: rfc3339(&point.timestamp),
            error: point.error(),
        }
    }
}

fn rfc3339(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn export_error(path: &Path, err: impl std::fmt::Display) -> ScanError {
    ScanError::Export(format!("{}: {}", path.display(), err))
}

/// Write `result` to `path` in `format`, replacing any existing file.
pub fn export_result(result: &ScanResult, path: &Path, format: ExportFormat) -> AppResult<()> {
    let file = File::create(path).map_err(|e| export_error(path, e))?;
    let mut writer = BufWriter::new(file);
    match format {
        ExportFormat::Json => write_json(result, &mut writer),
        ExportFormat::Csv => write_csv(result, &mut writer),
    }
    .map_err(|e| match e {
        ScanError::Export(msg) => export_error(path, msg),
        other => other,
    })?;
    writer.flush().map_err(|e| export_error(path, e))
}

/// Pretty-printed JSON document of the whole result.
pub fn write_json<W: Write>(result: &ScanResult, writer: W) -> AppResult<()> {
    let document = ExportDocument {
        scan_id: &result.scan_id,
        parameters: &result.parameters,
        grid: &result.grid,
        x_positions: &result.x_positions,
        y_positions: &result.y_positions,
        status: result.status,
        start_time: rfc3339(&result.start_time),
        end_time: result.end_time.as_ref().map(rfc3339),
        total_points: result.total_points,
        completed_points: result.completed_points,
        error_message: result.error_message.as_deref(),
        points: result.points.iter().map(PointRecord::from).collect(),
    };
    serde_json::to_writer_pretty(writer, &document).map_err(|e| ScanError::Export(e.to_string()))
}

/// One CSV row per point, in visiting order. Absent values are empty.
pub fn write_csv<W: Write>(result: &ScanResult, writer: W) -> AppResult<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(CSV_HEADER)
        .map_err(|e| ScanError::Export(e.to_string()))?;

    for point in &result.points {
        let record = [
            point.x.to_string(),
            point.y.to_string(),
            point.purity_score().map(|v| v.to_string()).unwrap_or_default(),
            point.confidence().map(|v| v.to_string()).unwrap_or_default(),
            rfc3339(&point.timestamp),
            point.error().unwrap_or_default().to_string(),
        ];
        wtr.write_record(&record)
            .map_err(|e| ScanError::Export(e.to_string()))?;
    }

    wtr.flush().map_err(|e| ScanError::Export(e.to_string()))
}
