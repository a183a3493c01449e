//! Motion capture CSV parser
//!
//! Three metadata lines precede the header; column 0 of every data row is a
//! 1-based frame index.

use super::{channel_columns, decode_text, read_rows, skip_lines, StreamParser};
use crate::error::{AnalysisError, FormatError};
use crate::numeric::ScaledCodec;
use crate::types::MotionStream;
use tracing::warn;

/// Lines preceding the header row
const METADATA_LINES: usize = 3;

/// Motion CSV parser
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionParser {
    codec: ScaledCodec,
}

impl MotionParser {
    pub fn new(codec: ScaledCodec) -> Self {
        Self { codec }
    }
}

impl StreamParser for MotionParser {
    type Output = MotionStream;

    fn parse(&self, bytes: &[u8]) -> Result<MotionStream, AnalysisError> {
        let text = decode_text(bytes, "motion")?;
        let body = skip_lines(text, METADATA_LINES).ok_or_else(|| {
            FormatError::new("MISSING_HEADER", "motion", "file ends before the header row")
        })?;
        let rows = read_rows(body, b',')?;

        let (header, data) = rows.split_first().ok_or_else(|| {
            FormatError::new("MISSING_HEADER", "motion", "no header row found").at(METADATA_LINES, None)
        })?;

        let columns = channel_columns(header, 1);
        if columns.is_empty() {
            return Err(FormatError::new("NO_CHANNELS", "motion", "header names no channels")
                .at(METADATA_LINES, None)
                .into());
        }
        let header_width = header.cells.len();

        let mut index = Vec::with_capacity(data.len());
        let mut values: Vec<Vec<f64>> = vec![Vec::with_capacity(data.len()); columns.len()];

        for row in data {
            let line = row.line + METADATA_LINES as u64;
            let raw_index = row.cell(0);
            if raw_index.is_empty() {
                continue;
            }
            let frame: i64 = match raw_index.parse() {
                Ok(frame) => frame,
                Err(_) => {
                    warn!(line, token = raw_index, "skipping motion row with non-integer index");
                    continue;
                }
            };
            if row.cells.len() < header_width {
                warn!(line, cells = row.cells.len(), expected = header_width, "skipping partial motion row");
                continue;
            }
            if let Some(&last) = index.last() {
                if frame <= last {
                    warn!(line, frame, "skipping motion row with non-increasing index");
                    continue;
                }
            }

            index.push(frame);
            for (slot, (col, name)) in values.iter_mut().zip(&columns) {
                let raw = row.cell(*col);
                let value = self.codec.parse(raw).unwrap_or_else(|_| {
                    warn!(line, channel = %name, token = raw, "coercing motion cell to zero");
                    0.0
                });
                slot.push(value);
            }
        }

        if index.is_empty() {
            return Err(FormatError::new("NO_DATA", "motion", "no data rows with a valid index").into());
        }

        let headers = columns.into_iter().map(|(_, name)| name).collect();
        MotionStream::new(index, headers, values, self.codec.scaling_factor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "Trajectories\n250\n,,\nindex,HipX,HipY\n1,10.5,3\n2,11,NA\n,1,1\n4.5,1,1\n5,7\n6,1,bad\n";

    #[test]
    fn test_parse_motion_rows() {
        let stream = MotionParser::default().parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(stream.index(), &[1, 2, 6]);
        assert_eq!(
            stream.channels().channel("HipX").unwrap(),
            &[10.5e10, 11e10, 1e10]
        );
        assert_eq!(stream.channels().channel("HipY").unwrap(), &[3e10, 0.0, 0.0]);
        assert_eq!(stream.coverage(), Some((1, 6)));
    }

    #[test]
    fn test_gaps_permitted() {
        let text = "a\nb\nc\nindex,X\n10,1\n20,2\n";
        let stream = MotionParser::default().parse(text.as_bytes()).unwrap();
        assert_eq!(stream.index(), &[10, 20]);
    }

    #[test]
    fn test_missing_header() {
        let err = MotionParser::default().parse(b"a\nb\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileFormat);
    }

    #[test]
    fn test_no_data_rows() {
        let err = MotionParser::default()
            .parse(b"a\nb\nc\nindex,X\n,1\n")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileFormat);
    }
}
