//! Error types for kinesync

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Machine-readable error category surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputValidation,
    FileFormat,
    FileTooLarge,
    Parse,
    PhaseLookup,
    InsufficientData,
    DivisionByZero,
    Cancelled,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InputValidation => "input_validation",
            ErrorKind::FileFormat => "file_format",
            ErrorKind::FileTooLarge => "file_too_large",
            ErrorKind::Parse => "parse",
            ErrorKind::PhaseLookup => "phase_lookup",
            ErrorKind::InsufficientData => "insufficient_data",
            ErrorKind::DivisionByZero => "division_by_zero",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
        }
    }
}

/// Structural failure reported by a stream or manifest parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatError {
    /// Stable code, e.g. `MISSING_HEADER`
    pub code: &'static str,
    /// Which file or field the failure concerns
    pub field: String,
    pub message: String,
    /// 0-based row, when the failure is tied to one
    pub row: Option<usize>,
    /// 0-based column, when the failure is tied to one
    pub col: Option<usize>,
}

impl FormatError {
    pub fn new(code: &'static str, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            field: field.into(),
            message: message.into(),
            row: None,
            col: None,
        }
    }

    pub fn at(mut self, row: usize, col: Option<usize>) -> Self {
        self.row = Some(row);
        self.col = col;
        self
    }
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.field, self.message)?;
        match (self.row, self.col) {
            (Some(row), Some(col)) => write!(f, " (row {row}, col {col})"),
            (Some(row), None) => write!(f, " (row {row})"),
            _ => Ok(()),
        }
    }
}

/// Why a landmark could not be turned into an EMG interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseLookupReason {
    UnknownName,
    ValueNotSet,
    OutOfOrder,
    ReversedInterval,
}

impl std::fmt::Display for PhaseLookupReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            PhaseLookupReason::UnknownName => "unknown landmark name",
            PhaseLookupReason::ValueNotSet => "value not set",
            PhaseLookupReason::OutOfOrder => "landmarks out of canonical order",
            PhaseLookupReason::ReversedInterval => "start falls after end in EMG time",
        };
        f.write_str(text)
    }
}

/// Errors that can occur while loading or analysing a recording
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Invalid input for {field}: {message}")]
    InputValidation { field: String, message: String },

    #[error("File format error {0}")]
    FileFormat(FormatError),

    #[error("File too large: {} is {size} bytes (limit {limit})", .path.display())]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Cannot parse numeric token {token:?}")]
    Parse { token: String },

    #[error("Phase lookup failed for {landmark}: {reason}")]
    PhaseLookup {
        landmark: String,
        reason: PhaseLookupReason,
    },

    #[error("Insufficient data: need {required} samples, range holds {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Division by zero: reference value at channel {channel} is zero")]
    DivisionByZero { channel: usize },

    #[error("Request cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::InputValidation { .. } => ErrorKind::InputValidation,
            AnalysisError::FileFormat(_) => ErrorKind::FileFormat,
            AnalysisError::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            AnalysisError::Parse { .. } => ErrorKind::Parse,
            AnalysisError::PhaseLookup { .. } => ErrorKind::PhaseLookup,
            AnalysisError::InsufficientData { .. } => ErrorKind::InsufficientData,
            AnalysisError::DivisionByZero { .. } => ErrorKind::DivisionByZero,
            AnalysisError::Cancelled => ErrorKind::Cancelled,
            AnalysisError::Io(_) | AnalysisError::Csv(_) => ErrorKind::Io,
            AnalysisError::Json(_) => ErrorKind::InputValidation,
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        AnalysisError::InputValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn phase(landmark: impl Into<String>, reason: PhaseLookupReason) -> Self {
        AnalysisError::PhaseLookup {
            landmark: landmark.into(),
            reason,
        }
    }
}

impl From<FormatError> for AnalysisError {
    fn from(e: FormatError) -> Self {
        AnalysisError::FileFormat(e)
    }
}
