//! Result assembly
//!
//! Turns engine results into row-major tables with stable row labels, and
//! encodes tables as CSV (optionally BOM-prefixed) or JSON. Scaled values are
//! divided back to natural units here and nowhere else.

use crate::config::OutputFormat;
use crate::error::AnalysisError;
use crate::numeric::{format_fixed, ScaledCodec};
use crate::types::{EmgStream, MaxMeanReport, PhaseStats, Stats};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// UTF-8 byte order mark written ahead of CSV output
pub const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Cell written where a phase has no samples
pub const NOT_AVAILABLE: &str = "N/A";

/// Header of the time column in exported streams
pub const TIME_HEADER: &str = "time";

pub const RANGE_START_LABEL: &str = "開始範圍秒數";
pub const RANGE_END_LABEL: &str = "結束範圍秒數";
pub const WINDOW_START_LABEL: &str = "開始計算秒數";
pub const WINDOW_END_LABEL: &str = "結束計算秒數";
pub const MAX_MEAN_LABEL: &str = "最大平均值";

pub const START_PHASE_LABEL: &str = "開始分期點";
pub const START_TIME_LABEL: &str = "開始時間";
pub const END_PHASE_LABEL: &str = "結束分期點";
pub const END_TIME_LABEL: &str = "結束時間";
pub const MEAN_LABEL: &str = "平均值";
pub const MAX_LABEL: &str = "最大值";

pub const PEAK_TIME_LABEL: &str = "整個階段最大值出現在_秒";

/// Characters replaced by `_` when a subject name becomes part of a file name
const UNSAFE_FILE_CHARS: [char; 10] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|', ' '];

/// Row-major output table; row 0 is the header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn header(&self) -> Option<&[String]> {
        self.rows.first().map(Vec::as_slice)
    }

    /// First row whose label cell equals `label`
    pub fn row(&self, label: &str) -> Option<&[String]> {
        self.rows
            .iter()
            .skip(1)
            .find(|row| row.first().map(String::as_str) == Some(label))
            .map(Vec::as_slice)
    }

    /// Encode as comma-separated UTF-8, optionally prefixed with a BOM
    pub fn to_csv_bytes(&self, bom: bool) -> Result<Vec<u8>, AnalysisError> {
        let mut buffer = Vec::new();
        if bom {
            buffer.extend_from_slice(&UTF8_BOM);
        }
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(buffer);
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| AnalysisError::Io(e.into_error()))
    }
}

/// JSON envelope around a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDocument {
    pub request_id: String,
    /// RFC 3339
    pub generated_at: String,
    pub producer: String,
    pub rows: Vec<Vec<String>>,
}

/// Builds output tables at a fixed display precision
#[derive(Debug, Clone, Copy)]
pub struct ResultAssembler {
    codec: ScaledCodec,
    precision: usize,
}

impl ResultAssembler {
    pub fn new(codec: ScaledCodec, precision: usize) -> Self {
        Self { codec, precision }
    }

    fn scaled(&self, value: f64) -> String {
        self.codec.format(value, self.precision)
    }

    fn natural(&self, value: f64) -> String {
        format_fixed(value, self.precision)
    }

    /// Max-of-means table, one column per channel
    pub fn max_mean_table(&self, report: &MaxMeanReport) -> Table {
        let mut rows = vec![header_row(&report.channel_order)];

        let repeat = |label: &str, cell: String| {
            let mut row = vec![label.to_string()];
            row.extend(std::iter::repeat(cell).take(report.results.len()));
            row
        };
        rows.push(repeat(RANGE_START_LABEL, self.scaled(report.range_start)));
        rows.push(repeat(RANGE_END_LABEL, self.scaled(report.range_end)));

        let per_channel = |label: &str, cell: &dyn Fn(usize) -> String| {
            let mut row = vec![label.to_string()];
            row.extend((0..report.results.len()).map(cell));
            row
        };
        rows.push(per_channel(WINDOW_START_LABEL, &|i| {
            self.scaled(report.results[i].best_start_time)
        }));
        rows.push(per_channel(WINDOW_END_LABEL, &|i| {
            self.scaled(report.results[i].best_end_time)
        }));
        rows.push(per_channel(MAX_MEAN_LABEL, &|i| {
            self.scaled(report.results[i].max_mean)
        }));

        Table { rows }
    }

    /// Interval statistics table
    pub fn interval_stats_table(&self, stats: &Stats) -> Table {
        let channels = &stats.channel_order;
        let mut rows = vec![header_row(channels)];

        let repeat = |label: &str, cell: String| {
            let mut row = vec![label.to_string()];
            row.extend(std::iter::repeat(cell).take(channels.len()));
            row
        };
        rows.push(repeat(START_PHASE_LABEL, stats.start_phase.clone()));
        rows.push(repeat(START_TIME_LABEL, self.natural(stats.start_emg_time)));
        rows.push(repeat(END_PHASE_LABEL, stats.end_phase.clone()));
        rows.push(repeat(END_TIME_LABEL, self.natural(stats.end_emg_time)));

        let mut means = vec![MEAN_LABEL.to_string()];
        let mut maxes = vec![MAX_LABEL.to_string()];
        for name in channels {
            means.push(
                stats
                    .channel_means
                    .get(name)
                    .map_or_else(|| NOT_AVAILABLE.to_string(), |v| self.scaled(*v)),
            );
            maxes.push(
                stats
                    .channel_maxes
                    .get(name)
                    .map_or_else(|| NOT_AVAILABLE.to_string(), |v| self.scaled(*v)),
            );
        }
        rows.push(means);
        rows.push(maxes);

        Table { rows }
    }

    /// Phase-bucket table: a max row and a mean row per phase, then peak times
    pub fn phase_stats_table(&self, stats: &PhaseStats) -> Table {
        let mut rows = vec![header_row(&stats.channel_order)];

        for (label, bucket) in stats.labels.iter().zip(&stats.buckets) {
            let mut max_row = vec![format!("{label} {MAX_LABEL}")];
            let mut mean_row = vec![format!("{label} {MEAN_LABEL}")];
            for summary in bucket {
                match summary {
                    Some(s) => {
                        max_row.push(self.scaled(s.max));
                        mean_row.push(self.scaled(s.mean));
                    }
                    None => {
                        max_row.push(NOT_AVAILABLE.to_string());
                        mean_row.push(NOT_AVAILABLE.to_string());
                    }
                }
            }
            rows.push(max_row);
            rows.push(mean_row);
        }

        let mut peak_row = vec![PEAK_TIME_LABEL.to_string()];
        peak_row.extend(stats.peak_times.iter().map(|t| match t {
            Some(t) => self.scaled(*t),
            None => NOT_AVAILABLE.to_string(),
        }));
        rows.push(peak_row);

        Table { rows }
    }

    /// A whole stream back as rows; time keeps its source precision
    pub fn stream_table(&self, stream: &EmgStream) -> Table {
        let mut header = vec![TIME_HEADER.to_string()];
        header.extend(stream.headers().iter().cloned());

        let channels = stream.channels();
        let time_precision = stream.original_time_precision();
        let mut rows = Vec::with_capacity(stream.len() + 1);
        rows.push(header);
        for (i, &t) in stream.time().iter().enumerate() {
            let mut row = Vec::with_capacity(channels.channel_count() + 1);
            row.push(self.codec.format(t, time_precision));
            row.extend(channels.iter().map(|(_, values)| self.scaled(values[i])));
            rows.push(row);
        }
        Table { rows }
    }

    /// Encode a table in the requested output format
    pub fn encode(
        &self,
        table: &Table,
        format: OutputFormat,
        bom: bool,
    ) -> Result<Vec<u8>, AnalysisError> {
        match format {
            OutputFormat::Csv => table.to_csv_bytes(bom),
            OutputFormat::Json => {
                let document = TableDocument {
                    request_id: Uuid::new_v4().to_string(),
                    generated_at: Utc::now().to_rfc3339(),
                    producer: format!("{}/{}", crate::PRODUCER_NAME, crate::KINESYNC_VERSION),
                    rows: table.rows.clone(),
                };
                Ok(serde_json::to_vec_pretty(&document)?)
            }
            OutputFormat::Xlsx => Err(AnalysisError::invalid(
                "output_format",
                "xlsx output is not supported; use csv or json",
            )),
        }
    }
}

fn header_row(channels: &[String]) -> Vec<String> {
    let mut header = Vec::with_capacity(channels.len() + 1);
    header.push(String::new());
    header.extend(channels.iter().cloned());
    header
}

/// Replace characters that are unsafe in file names with `_`
pub fn sanitize_file_component(name: &str) -> String {
    name.chars()
        .map(|c| if UNSAFE_FILE_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// `<subject>_<start>-<end>_statistics.<ext>`
pub fn output_file_name(subject: &str, start: &str, end: &str, format: OutputFormat) -> String {
    format!(
        "{}_{start}-{end}_statistics.{}",
        sanitize_file_component(subject),
        format.extension()
    )
}
