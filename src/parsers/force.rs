//! Force plate ANC parser
//!
//! ANC files are tab-delimited. A metadata block (nominally twelve lines)
//! precedes the samples; the data section starts at the first line whose
//! first field parses as a time. Channel names come from the metadata line
//! starting with `Name`. The sample rate is taken as 1 kHz regardless of
//! `PreciseRate`, which is kept for diagnostics only.

use super::{decode_text, read_rows, Row, StreamParser};
use crate::error::{AnalysisError, FormatError};
use crate::numeric::ScaledCodec;
use crate::types::{ForceMetadata, ForceStream, FORCE_RATE_HZ};
use tracing::{debug, warn};

/// Nominal metadata block length
pub const ANC_METADATA_LINES: usize = 12;

/// Force plate ANC parser
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceParser {
    codec: ScaledCodec,
}

impl ForceParser {
    pub fn new(codec: ScaledCodec) -> Self {
        Self { codec }
    }

    /// Metadata lines hold `Key:<TAB>value` pairs, several to a line. The
    /// `Name` line lists channel names after its first cell.
    fn read_metadata(&self, rows: &[Row]) -> (ForceMetadata, Option<Vec<String>>) {
        let mut metadata = ForceMetadata::default();
        let mut names = None;
        for row in rows {
            if row.cell(0).trim_end_matches(':') == "Name" {
                names = Some(
                    row.cells[1..]
                        .iter()
                        .filter(|n| !n.is_empty())
                        .cloned()
                        .collect(),
                );
                continue;
            }
            for pair in row.cells.windows(2) {
                let value = pair[1].trim();
                match pair[0].trim().trim_end_matches(':') {
                    "Trial_Name" => metadata.trial_name = Some(value.to_string()),
                    "PreciseRate" => metadata.precise_rate = value.parse().ok(),
                    "#Channels" => metadata.declared_channels = value.parse().ok(),
                    _ => {}
                }
            }
        }
        (metadata, names)
    }
}

impl StreamParser for ForceParser {
    type Output = ForceStream;

    fn parse(&self, bytes: &[u8]) -> Result<ForceStream, AnalysisError> {
        let text = decode_text(bytes, "force")?;
        let rows = read_rows(text, b'\t')?;

        let data_start = rows
            .iter()
            .position(|row| self.codec.parse_strict(row.cell(0)).is_ok())
            .ok_or_else(|| FormatError::new("NO_DATA", "force", "no data section found"))?;

        let (head, data) = rows.split_at(data_start);
        if head.len() != ANC_METADATA_LINES {
            debug!(lines = head.len(), "ANC metadata block has a non-standard length");
        }
        let (metadata, names) = self.read_metadata(head);
        if let Some(rate) = metadata.precise_rate {
            if (rate - FORCE_RATE_HZ).abs() > f64::EPSILON {
                warn!(rate, "ANC PreciseRate differs from the assumed 1000 Hz");
            }
        }

        let width = names
            .as_ref()
            .map(Vec::len)
            .or(metadata.declared_channels)
            .unwrap_or_else(|| data[0].cells.len().saturating_sub(1));
        if width == 0 {
            return Err(FormatError::new("NO_CHANNELS", "force", "no force channels declared").into());
        }
        let headers: Vec<String> = match names {
            Some(names) => names,
            None => (1..=width).map(|i| format!("ch{i}")).collect(),
        };

        let mut time = Vec::with_capacity(data.len());
        let mut values: Vec<Vec<f64>> = vec![Vec::with_capacity(data.len()); width];

        for row in data {
            let t = match self.codec.parse_strict(row.cell(0)) {
                Ok(t) => t,
                Err(_) => {
                    warn!(line = row.line, token = row.cell(0), "skipping ANC row with unparseable time");
                    continue;
                }
            };
            if let Some(&last) = time.last() {
                if t <= last {
                    warn!(line = row.line, "skipping ANC row with non-increasing time");
                    continue;
                }
            }
            time.push(t);
            for (ch, slot) in values.iter_mut().enumerate() {
                let raw = row.cell(ch + 1);
                let value = self.codec.parse(raw).unwrap_or_else(|_| {
                    warn!(line = row.line, channel = ch + 1, token = raw, "coercing ANC cell to zero");
                    0.0
                });
                slot.push(value);
            }
        }

        ForceStream::new(time, headers, values, metadata, self.codec.scaling_factor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn anc(data: &str) -> String {
        let head = [
            "File_Type:\tAnalog R/C ASCII\tGeneration#:\t1",
            "Board_Type:\tNational Instruments\tPolarity:\tBipolar",
            "Trial_Name:\tjump01\tTrial#:\t1\tDuration(Sec.):\t0.003\t#Channels:\t3",
            "BitDepth:\t16\tPreciseRate:\t1000.000",
            "",
            "",
            "",
            "",
            "Name\tFx\tFy\tFz",
            "Rate\t1000\t1000\t1000",
            "Range\t10000\t10000\t10000",
        ];
        format!("{}\n{data}", head.join("\n"))
    }

    #[test]
    fn test_parse_anc() {
        let text = anc("0.000\t1\t2\t3\n0.001\t4\t5\n0.002\t7\tx\t9\n");
        let stream = ForceParser::default().parse(text.as_bytes()).unwrap();
        assert_eq!(stream.len(), 3);
        assert_eq!(stream.channels().headers(), &["Fx", "Fy", "Fz"]);
        assert_eq!(stream.channels().channel("Fz").unwrap(), &[3e10, 0.0, 9e10]);
        assert_eq!(stream.channels().channel("Fy").unwrap(), &[2e10, 5e10, 0.0]);
        assert_eq!(stream.time(), &[0.0, 1e7, 2e7]);

        let meta = stream.metadata();
        assert_eq!(meta.trial_name.as_deref(), Some("jump01"));
        assert_eq!(meta.precise_rate, Some(1000.0));
        assert_eq!(meta.declared_channels, Some(3));
    }

    #[test]
    fn test_precise_rate_read_from_mid_line() {
        let text = "BitDepth:\t16\tPreciseRate:\t2000.000\n#Channels:\t1\n0.0\t1\n";
        let stream = ForceParser::default().parse(text.as_bytes()).unwrap();
        assert_eq!(stream.metadata().precise_rate, Some(2000.0));
        assert_eq!(stream.metadata().declared_channels, Some(1));
        assert_eq!(stream.metadata().trial_name, None);
    }

    #[test]
    fn test_unnamed_channels_fall_back_to_declared_count() {
        let text = "#Channels\t2\n0.0\t1\t2\n0.001\t3\t4\n";
        let stream = ForceParser::default().parse(text.as_bytes()).unwrap();
        assert_eq!(stream.channels().headers(), &["ch1", "ch2"]);
    }

    #[test]
    fn test_no_data_section() {
        let text = anc("");
        let err = ForceParser::default().parse(text.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileFormat);
    }
}
