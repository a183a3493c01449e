//! Normalization reference parser
//!
//! Row 0 is a header and row 1 holds one divisor per channel. Column 0 is a
//! label and is ignored. A numeric label on the reference row, or a run of
//! numeric labels below it, marks a time series and is rejected.

use super::{decode_text, read_rows, StreamParser};
use crate::error::{AnalysisError, FormatError};
use crate::numeric::ScaledCodec;
use crate::types::ReferenceValues;
use tracing::warn;

/// Reference CSV parser
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceParser {
    codec: ScaledCodec,
}

impl ReferenceParser {
    pub fn new(codec: ScaledCodec) -> Self {
        Self { codec }
    }
}

impl StreamParser for ReferenceParser {
    type Output = ReferenceValues;

    fn parse(&self, bytes: &[u8]) -> Result<ReferenceValues, AnalysisError> {
        let text = decode_text(bytes, "reference")?;
        let rows = read_rows(text, b',')?;

        let header = rows
            .first()
            .ok_or_else(|| FormatError::new("MISSING_HEADER", "reference", "no header row found"))?;
        let divisors = rows.get(1).ok_or_else(|| {
            FormatError::new("NO_DATA", "reference", "no reference row after the header").at(1, None)
        })?;

        let time_series = || {
            AnalysisError::from(
                FormatError::new(
                    "TIME_SERIES_REFERENCE",
                    "reference",
                    "column 0 holds a numeric value; expected a labelled reference row",
                )
                .at(1, Some(0)),
            )
        };
        if self.codec.parse_strict(divisors.cell(0)).is_ok() {
            return Err(time_series());
        }
        if rows.len() > 2 {
            let numeric_labels = rows[2..]
                .iter()
                .filter(|row| self.codec.parse_strict(row.cell(0)).is_ok())
                .count();
            if numeric_labels > 1 {
                return Err(time_series());
            }
            warn!(rows = rows.len() - 2, "ignoring reference rows after the first");
        }

        let headers: Vec<String> = header.cells.iter().skip(1).cloned().collect();
        if headers.is_empty() {
            return Err(FormatError::new("NO_CHANNELS", "reference", "header names no channels")
                .at(0, None)
                .into());
        }

        let mut values = Vec::with_capacity(headers.len());
        for col in 1..=headers.len() {
            let raw = divisors.cell(col);
            let value = self.codec.parse(raw).map_err(|_| {
                AnalysisError::from(
                    FormatError::new(
                        "BAD_REFERENCE",
                        "reference",
                        format!("reference value {raw:?} is not numeric"),
                    )
                    .at(1, Some(col)),
                )
            })?;
            values.push(value);
        }

        Ok(ReferenceValues {
            headers,
            values,
            scaling_factor: self.codec.scaling_factor(),
        })
    }
}
