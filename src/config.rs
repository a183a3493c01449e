//! Analysis configuration
//!
//! Loaded once by the outer shell and handed to the analyzer; library code
//! never reads configuration from the environment.

use crate::error::AnalysisError;
use crate::numeric::{DEFAULT_SCALING_FACTOR, MAX_SCALING_FACTOR};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound on window-engine workers
pub const MAX_WORKERS: usize = 16;

/// Largest display precision accepted
pub const MAX_PRECISION: usize = 15;

/// Largest number of phase labels accepted
pub const MAX_PHASE_LABELS: usize = 50;

/// Default input size guard (512 MiB)
pub const DEFAULT_MAX_FILE_BYTES: u64 = 512 * 1024 * 1024;

/// Output encoding for assembled tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
    Xlsx,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Xlsx => "xlsx",
        }
    }
}

/// Configuration recognized by the analysis core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Base-10 exponent applied to parsed values (1..=20)
    pub scaling_factor: u32,
    /// Decimal places in formatted output (0..=15)
    pub precision: usize,
    /// Phase-bucket labels, each naming a landmark pair such as `"S-C"`
    pub phase_labels: Vec<String>,
    /// Prefix CSV output with a UTF-8 byte order mark
    pub bom_enabled: bool,
    pub output_format: OutputFormat,
    /// Window-engine worker cap (1..=16)
    pub max_workers: usize,
    /// Resident-memory budget for the admission gate; physical memory when unset
    pub memory_limit_bytes: Option<u64>,
    /// Inputs above this size are refused before reading
    pub max_file_bytes: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            scaling_factor: DEFAULT_SCALING_FACTOR,
            precision: 10,
            phase_labels: default_phase_labels(),
            bom_enabled: true,
            output_format: OutputFormat::Csv,
            max_workers: MAX_WORKERS,
            memory_limit_bytes: None,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

/// Consecutive canonical landmark pairs, `P0-P1` through `O-L`
pub fn default_phase_labels() -> Vec<String> {
    use crate::types::Landmark;
    Landmark::ALL
        .windows(2)
        .map(|pair| format!("{}-{}", pair[0], pair[1]))
        .collect()
}

impl AnalysisConfig {
    /// Load a JSON configuration file; missing keys take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self, AnalysisError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, AnalysisError> {
        let config: AnalysisConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field against its documented range
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(1..=MAX_SCALING_FACTOR).contains(&self.scaling_factor) {
            return Err(AnalysisError::invalid(
                "scaling_factor",
                format!("{} is outside 1..={MAX_SCALING_FACTOR}", self.scaling_factor),
            ));
        }
        if self.precision > MAX_PRECISION {
            return Err(AnalysisError::invalid(
                "precision",
                format!("{} is outside 0..={MAX_PRECISION}", self.precision),
            ));
        }
        if self.phase_labels.is_empty() || self.phase_labels.len() > MAX_PHASE_LABELS {
            return Err(AnalysisError::invalid(
                "phase_labels",
                format!(
                    "{} labels given, expected 1..={MAX_PHASE_LABELS}",
                    self.phase_labels.len()
                ),
            ));
        }
        if let Some(empty) = self.phase_labels.iter().position(|l| l.trim().is_empty()) {
            return Err(AnalysisError::invalid(
                "phase_labels",
                format!("label {} is empty", empty + 1),
            ));
        }
        if !(1..=MAX_WORKERS).contains(&self.max_workers) {
            return Err(AnalysisError::invalid(
                "max_workers",
                format!("{} is outside 1..={MAX_WORKERS}", self.max_workers),
            ));
        }
        if self.max_file_bytes == 0 {
            return Err(AnalysisError::invalid("max_file_bytes", "must be positive"));
        }
        if self.scaling_factor > 15 {
            tracing::warn!(
                scaling_factor = self.scaling_factor,
                "scaling factors above 15 exceed f64 integer precision for typical samples"
            );
        }
        Ok(())
    }
}
