//! EMG CSV parser
//!
//! Row 0 is the header (column 0 is time, the rest are channel names); every
//! following row is one sample.

use super::{channel_columns, decode_text, read_rows, StreamParser};
use crate::error::{AnalysisError, FormatError};
use crate::numeric::{observed_precision, ScaledCodec};
use crate::types::EmgStream;
use tracing::warn;

/// Rows scanned when detecting the time column's decimal places
const PRECISION_SCAN_ROWS: usize = 10;

/// Time precision assumed when no scanned row carries a decimal point
const DEFAULT_TIME_PRECISION: usize = 2;

/// EMG CSV parser
#[derive(Debug, Clone, Copy, Default)]
pub struct EmgParser {
    codec: ScaledCodec,
}

impl EmgParser {
    pub fn new(codec: ScaledCodec) -> Self {
        Self { codec }
    }
}

impl StreamParser for EmgParser {
    type Output = EmgStream;

    fn parse(&self, bytes: &[u8]) -> Result<EmgStream, AnalysisError> {
        let text = decode_text(bytes, "emg")?;
        let rows = read_rows(text, b',')?;

        let (header, data) = rows
            .split_first()
            .ok_or_else(|| FormatError::new("MISSING_HEADER", "emg", "no header row found"))?;

        let columns = channel_columns(header, 1);
        if columns.is_empty() {
            return Err(FormatError::new("NO_CHANNELS", "emg", "header names no channels")
                .at(0, None)
                .into());
        }

        let mut time = Vec::with_capacity(data.len());
        let mut values: Vec<Vec<f64>> = vec![Vec::with_capacity(data.len()); columns.len()];
        let mut precision: Option<usize> = None;

        for (n, row) in data.iter().enumerate() {
            let raw_time = row.cell(0);
            if n < PRECISION_SCAN_ROWS && raw_time.contains('.') {
                let digits = observed_precision(raw_time);
                precision = Some(precision.map_or(digits, |p| p.max(digits)));
            }

            let t = match self.codec.parse_strict(raw_time) {
                Ok(t) => t,
                Err(_) => {
                    warn!(line = row.line, token = raw_time, "skipping EMG row with unparseable time");
                    continue;
                }
            };
            if let Some(&last) = time.last() {
                if t <= last {
                    warn!(line = row.line, "skipping EMG row with non-increasing time");
                    continue;
                }
            }

            time.push(t);
            for (slot, (col, name)) in values.iter_mut().zip(&columns) {
                let raw = row.cell(*col);
                let value = self.codec.parse(raw).unwrap_or_else(|_| {
                    warn!(line = row.line, channel = %name, token = raw, "coercing EMG cell to zero");
                    0.0
                });
                slot.push(value);
            }
        }

        if time.is_empty() {
            return Err(FormatError::new("NO_DATA", "emg", "no data rows with a valid time").into());
        }

        let headers = columns.into_iter().map(|(_, name)| name).collect();
        EmgStream::new(
            time,
            headers,
            values,
            precision.unwrap_or(DEFAULT_TIME_PRECISION),
            self.codec.scaling_factor(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> Result<EmgStream, AnalysisError> {
        EmgParser::default().parse(text.as_bytes())
    }

    #[test]
    fn test_parse_basic_emg() {
        let stream = parse("time,RF,VL\n0.001,1.5,2\n0.002,2.5,3\n").unwrap();
        assert_eq!(stream.headers(), &["RF".to_string(), "VL".to_string()]);
        assert_eq!(stream.time(), &[1e7, 2e7]);
        assert_eq!(stream.channels().channel("RF").unwrap(), &[1.5e10, 2.5e10]);
        assert_eq!(stream.original_time_precision(), 3);
    }

    #[test]
    fn test_scientific_notation_row() {
        let stream = parse("time,ch\n\"1.5E-3\",\"2.5E-4\"\n").unwrap();
        assert_eq!(stream.time(), &[1.5e7]);
        assert_eq!(stream.channels().channel("ch").unwrap(), &[2.5e6]);
    }

    #[test]
    fn test_bad_time_row_skipped_and_bad_cell_zeroed() {
        let stream = parse("time,a\nabc,1\n0.01,oops\n0.02,NA\n0.03,4\n").unwrap();
        assert_eq!(stream.len(), 3);
        assert_eq!(stream.channels().channel("a").unwrap(), &[0.0, 0.0, 4e10]);
    }

    #[test]
    fn test_header_whitespace_and_empty_cells() {
        let stream = parse("\u{feff} time , A ,, B \n0.5,1,9,2\n").unwrap();
        assert_eq!(stream.headers(), &["A".to_string(), "B".to_string()]);
        assert_eq!(stream.channels().channel("B").unwrap(), &[2e10]);
    }

    #[test]
    fn test_short_row_pads_zero() {
        let stream = parse("time,a,b\n0.1,1\n").unwrap();
        assert_eq!(stream.channels().channel("b").unwrap(), &[0.0]);
    }

    #[test]
    fn test_default_precision_for_integer_times() {
        let stream = parse("time,a\n1,1\n2,2\n").unwrap();
        assert_eq!(stream.original_time_precision(), 2);
    }

    #[test]
    fn test_no_rows_is_format_error() {
        assert_eq!(parse("").unwrap_err().kind(), ErrorKind::FileFormat);
        assert_eq!(parse("time,a\n").unwrap_err().kind(), ErrorKind::FileFormat);
        assert_eq!(parse("time\n0.1\n").unwrap_err().kind(), ErrorKind::FileFormat);
        assert_eq!(parse("time,a\nx,1\n").unwrap_err().kind(), ErrorKind::FileFormat);
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        assert!(parse("time,a,a\n0.1,1,2\n").is_err());
    }
}
