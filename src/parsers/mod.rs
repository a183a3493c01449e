//! Recording parsers
//!
//! Each parser decodes the raw bytes of one file kind into a typed stream in
//! the scaled domain. Recoverable cell problems are coerced and logged;
//! structural problems fail the whole file.

mod emg;
mod force;
mod motion;
mod reference;

pub use emg::EmgParser;
pub use force::ForceParser;
pub use motion::MotionParser;
pub use reference::ReferenceParser;

use crate::error::{AnalysisError, FormatError};
use csv::{ReaderBuilder, Trim};

/// Trait for recording parsers
pub trait StreamParser {
    type Output;

    /// Decode a whole file held in memory
    fn parse(&self, bytes: &[u8]) -> Result<Self::Output, AnalysisError>;
}

/// One delimited row with its 1-based source line
#[derive(Debug, Clone)]
pub(crate) struct Row {
    pub line: u64,
    pub cells: Vec<String>,
}

impl Row {
    pub fn cell(&self, col: usize) -> &str {
        self.cells.get(col).map(String::as_str).unwrap_or("")
    }
}

/// Validate UTF-8 and drop a leading byte order mark
pub(crate) fn decode_text<'a>(bytes: &'a [u8], field: &str) -> Result<&'a str, AnalysisError> {
    let text = std::str::from_utf8(bytes).map_err(|e| {
        FormatError::new(
            "INVALID_UTF8",
            field,
            format!("file is not valid UTF-8 (byte {})", e.valid_up_to()),
        )
    })?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

/// Split delimited text into trimmed rows, skipping blank lines
pub(crate) fn read_rows(text: &str, delimiter: u8) -> Result<Vec<Row>, AnalysisError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let cells: Vec<String> = record.iter().map(str::to_string).collect();
        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        rows.push(Row { line, cells });
    }
    Ok(rows)
}

/// Text following the first `count` lines, or `None` when the file is shorter
pub(crate) fn skip_lines(text: &str, count: usize) -> Option<&str> {
    let mut rest = text;
    for _ in 0..count {
        let newline = rest.find('\n')?;
        rest = &rest[newline + 1..];
    }
    Some(rest)
}

/// Trimmed, non-empty header names paired with their source column
pub(crate) fn channel_columns(header: &Row, first_channel_col: usize) -> Vec<(usize, String)> {
    header
        .cells
        .iter()
        .enumerate()
        .skip(first_channel_col)
        .filter(|(_, name)| !name.is_empty())
        .map(|(col, name)| (col, name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_strips_bom() {
        let bytes = b"\xEF\xBB\xBFtime,a\n";
        assert_eq!(decode_text(bytes, "emg").unwrap(), "time,a\n");
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert!(decode_text(&[0x66, 0xff, 0x66], "emg").is_err());
    }

    #[test]
    fn test_read_rows_trims_and_skips_blank_lines() {
        let rows = read_rows(" time , a \n\n1, 2\n", b',').unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells, vec!["time", "a"]);
        assert_eq!(rows[1].cell(1), "2");
        assert_eq!(rows[1].cell(5), "");
    }

    #[test]
    fn test_skip_lines() {
        assert_eq!(skip_lines("a\nb\nc\nd", 3), Some("d"));
        assert_eq!(skip_lines("a\nb", 3), None);
    }

    #[test]
    fn test_channel_columns_drops_empty_names() {
        let header = Row {
            line: 1,
            cells: vec!["time".into(), "A".into(), "".into(), "B".into()],
        };
        assert_eq!(
            channel_columns(&header, 1),
            vec![(1, "A".to_string()), (3, "B".to_string())]
        );
    }
}
