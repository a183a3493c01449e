//! Core types for the kinesync analysis engine
//!
//! Streams produced by the parsers, the landmark model of a subject's phase
//! manifest, analysis requests, and the result records consumed by the
//! assembler.
//!
//! Values taken from a recording (stream times and samples) live in the
//! scaled domain described in [`crate::numeric`]. Values taken from the
//! manifest (landmarks, and the EMG times derived from them) are in natural
//! units.

use crate::error::{AnalysisError, PhaseLookupReason};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

/// EMG sample rate (Hz)
pub const EMG_RATE_HZ: f64 = 1000.0;
/// Motion capture frame rate (Hz)
pub const MOTION_RATE_HZ: f64 = 250.0;
/// Force plate sample rate (Hz)
pub const FORCE_RATE_HZ: f64 = 1000.0;

/// Named channels sampled on a common time base.
///
/// Channel values are stored densely in header order; `lookup` maps a name
/// back to its position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelTable {
    headers: Vec<String>,
    values: Vec<Vec<f64>>,
    #[serde(skip)]
    lookup: HashMap<String, usize>,
}

impl ChannelTable {
    fn new(headers: Vec<String>, values: Vec<Vec<f64>>, len: usize) -> Result<Self, AnalysisError> {
        if headers.len() != values.len() {
            return Err(AnalysisError::invalid(
                "channels",
                format!("{} headers but {} value columns", headers.len(), values.len()),
            ));
        }
        let mut lookup = HashMap::with_capacity(headers.len());
        for (i, (name, column)) in headers.iter().zip(&values).enumerate() {
            if column.len() != len {
                return Err(AnalysisError::invalid(
                    name.clone(),
                    format!("channel holds {} samples, time axis holds {len}", column.len()),
                ));
            }
            if lookup.insert(name.clone(), i).is_some() {
                return Err(AnalysisError::invalid(name.clone(), "duplicate channel name"));
            }
        }
        Ok(Self {
            headers,
            values,
            lookup,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn channel_count(&self) -> usize {
        self.headers.len()
    }

    /// Values of the channel at a 0-based header position
    pub fn column(&self, position: usize) -> Option<&[f64]> {
        self.values.get(position).map(Vec::as_slice)
    }

    /// Values of a channel by name
    pub fn channel(&self, name: &str) -> Option<&[f64]> {
        self.lookup.get(name).and_then(|&i| self.column(i))
    }

    /// Iterate `(name, values)` in header order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.headers
            .iter()
            .zip(&self.values)
            .map(|(h, v)| (h.as_str(), v.as_slice()))
    }

    fn slice(&self, start: usize, end: usize) -> Self {
        Self {
            headers: self.headers.clone(),
            values: self.values.iter().map(|v| v[start..end].to_vec()).collect(),
            lookup: self.lookup.clone(),
        }
    }
}

/// Surface EMG recording (1 kHz)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmgStream {
    /// Strictly increasing sample times (scaled seconds)
    time: Vec<f64>,
    channels: ChannelTable,
    /// Decimal places observed in the source time column
    original_time_precision: usize,
    scaling_factor: u32,
}

impl EmgStream {
    /// Build a stream, checking that every channel matches the time axis
    /// and that time is strictly increasing.
    pub fn new(
        time: Vec<f64>,
        headers: Vec<String>,
        values: Vec<Vec<f64>>,
        original_time_precision: usize,
        scaling_factor: u32,
    ) -> Result<Self, AnalysisError> {
        if let Some(w) = time.windows(2).position(|w| w[1] <= w[0]) {
            return Err(AnalysisError::invalid(
                "time",
                format!("time is not strictly increasing at sample {}", w + 1),
            ));
        }
        let channels = ChannelTable::new(headers, values, time.len())?;
        Ok(Self {
            time,
            channels,
            original_time_precision,
            scaling_factor,
        })
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn headers(&self) -> &[String] {
        self.channels.headers()
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn original_time_precision(&self) -> usize {
        self.original_time_precision
    }

    pub fn scaling_factor(&self) -> u32 {
        self.scaling_factor
    }

    /// Index range `[start, end)` of samples with `lo <= time <= hi` (scaled)
    pub fn index_range(&self, lo: f64, hi: f64) -> (usize, usize) {
        let start = self.time.partition_point(|&t| t < lo);
        let end = self.time.partition_point(|&t| t <= hi);
        (start, end.max(start))
    }

    /// Copy of the samples with `lo <= time <= hi` (scaled, both inclusive)
    pub fn slice_time(&self, lo: f64, hi: f64) -> EmgStream {
        let (start, end) = self.index_range(lo, hi);
        EmgStream {
            time: self.time[start..end].to_vec(),
            channels: self.channels.slice(start, end),
            original_time_precision: self.original_time_precision,
            scaling_factor: self.scaling_factor,
        }
    }
}

/// Optical motion capture recording (250 Hz, index addressed)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionStream {
    /// Strictly increasing 1-based frame indices (gaps permitted)
    index: Vec<i64>,
    channels: ChannelTable,
    scaling_factor: u32,
}

impl MotionStream {
    pub fn new(
        index: Vec<i64>,
        headers: Vec<String>,
        values: Vec<Vec<f64>>,
        scaling_factor: u32,
    ) -> Result<Self, AnalysisError> {
        if let Some(w) = index.windows(2).position(|w| w[1] <= w[0]) {
            return Err(AnalysisError::invalid(
                "index",
                format!("frame index is not strictly increasing at row {}", w + 1),
            ));
        }
        let channels = ChannelTable::new(headers, values, index.len())?;
        Ok(Self {
            index,
            channels,
            scaling_factor,
        })
    }

    pub fn index(&self) -> &[i64] {
        &self.index
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn scaling_factor(&self) -> u32 {
        self.scaling_factor
    }

    /// First and last frame index
    pub fn coverage(&self) -> Option<(i64, i64)> {
        Some((*self.index.first()?, *self.index.last()?))
    }
}

/// Metadata extracted from the head of an ANC force file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForceMetadata {
    pub trial_name: Option<String>,
    pub precise_rate: Option<f64>,
    pub declared_channels: Option<usize>,
}

/// Force plate recording (1 kHz, shares its origin with motion)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForceStream {
    /// Strictly increasing sample times (scaled seconds)
    time: Vec<f64>,
    channels: ChannelTable,
    metadata: ForceMetadata,
    scaling_factor: u32,
}

impl ForceStream {
    pub fn new(
        time: Vec<f64>,
        headers: Vec<String>,
        values: Vec<Vec<f64>>,
        metadata: ForceMetadata,
        scaling_factor: u32,
    ) -> Result<Self, AnalysisError> {
        if let Some(w) = time.windows(2).position(|w| w[1] <= w[0]) {
            return Err(AnalysisError::invalid(
                "time",
                format!("time is not strictly increasing at sample {}", w + 1),
            ));
        }
        let channels = ChannelTable::new(headers, values, time.len())?;
        Ok(Self {
            time,
            channels,
            metadata,
            scaling_factor,
        })
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn metadata(&self) -> &ForceMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn scaling_factor(&self) -> u32 {
        self.scaling_factor
    }
}

/// Per-channel divisors read from row 1 of a reference file (scaled)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceValues {
    pub headers: Vec<String>,
    pub values: Vec<f64>,
    pub scaling_factor: u32,
}

/// Clock a landmark was observed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkClock {
    /// Force-plate seconds
    ForceTime,
    /// Motion-capture frame index
    MotionIndex,
}

/// Named temporal events of a jump trial, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Landmark {
    P0,
    P1,
    P2,
    S,
    C,
    D,
    T0,
    T,
    O,
    L,
}

impl Landmark {
    pub const ALL: [Landmark; 10] = [
        Landmark::P0,
        Landmark::P1,
        Landmark::P2,
        Landmark::S,
        Landmark::C,
        Landmark::D,
        Landmark::T0,
        Landmark::T,
        Landmark::O,
        Landmark::L,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Landmark::P0 => "P0",
            Landmark::P1 => "P1",
            Landmark::P2 => "P2",
            Landmark::S => "S",
            Landmark::C => "C",
            Landmark::D => "D",
            Landmark::T0 => "T0",
            Landmark::T => "T",
            Landmark::O => "O",
            Landmark::L => "L",
        }
    }

    /// Position in the canonical sequence `P0 < P1 < ... < L`
    pub fn rank(&self) -> usize {
        *self as usize
    }

    pub fn clock(&self) -> LandmarkClock {
        match self {
            Landmark::D | Landmark::O => LandmarkClock::MotionIndex,
            _ => LandmarkClock::ForceTime,
        }
    }
}

impl FromStr for Landmark {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Landmark::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == name)
            .ok_or_else(|| AnalysisError::phase(name, PhaseLookupReason::UnknownName))
    }
}

impl std::fmt::Display for Landmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A landmark's recorded value in its native clock
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "clock", content = "value", rename_all = "snake_case")]
pub enum LandmarkValue {
    ForceTime(f64),
    MotionIndex(i64),
}

impl LandmarkValue {
    /// Zero is the "not recorded" sentinel
    pub fn is_set(&self) -> bool {
        match *self {
            LandmarkValue::ForceTime(t) => t != 0.0,
            LandmarkValue::MotionIndex(i) => i != 0,
        }
    }

    pub fn clock(&self) -> LandmarkClock {
        match self {
            LandmarkValue::ForceTime(_) => LandmarkClock::ForceTime,
            LandmarkValue::MotionIndex(_) => LandmarkClock::MotionIndex,
        }
    }
}

/// The ten landmarks of one subject (natural units, zero = missing)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub p0: f64,
    pub p1: f64,
    pub p2: f64,
    pub s: f64,
    pub c: f64,
    pub d: i64,
    pub t0: f64,
    pub t: f64,
    pub o: i64,
    pub l: f64,
}

impl Landmarks {
    pub fn get(&self, landmark: Landmark) -> LandmarkValue {
        match landmark {
            Landmark::P0 => LandmarkValue::ForceTime(self.p0),
            Landmark::P1 => LandmarkValue::ForceTime(self.p1),
            Landmark::P2 => LandmarkValue::ForceTime(self.p2),
            Landmark::S => LandmarkValue::ForceTime(self.s),
            Landmark::C => LandmarkValue::ForceTime(self.c),
            Landmark::D => LandmarkValue::MotionIndex(self.d),
            Landmark::T0 => LandmarkValue::ForceTime(self.t0),
            Landmark::T => LandmarkValue::ForceTime(self.t),
            Landmark::O => LandmarkValue::MotionIndex(self.o),
            Landmark::L => LandmarkValue::ForceTime(self.l),
        }
    }

    /// Look a landmark up by name
    pub fn get_named(&self, name: &str) -> Result<LandmarkValue, AnalysisError> {
        Ok(self.get(name.parse()?))
    }
}

/// One row of the phase manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub subject: String,
    pub motion_file: String,
    pub force_file: String,
    pub emg_file: String,
    /// Motion-frame index aligned to EMG sample 0
    pub emg_motion_offset: i64,
    pub landmarks: Landmarks,
}

/// Parsed phase manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub subjects: Vec<SubjectRecord>,
}

impl Manifest {
    /// Subject at a 0-based row position
    pub fn subject(&self, index: usize) -> Result<&SubjectRecord, AnalysisError> {
        self.subjects.get(index).ok_or_else(|| {
            AnalysisError::invalid(
                "subject_index",
                format!("{index} is out of range ({} subjects)", self.subjects.len()),
            )
        })
    }

    pub fn find(&self, subject: &str) -> Option<&SubjectRecord> {
        self.subjects.iter().find(|s| s.subject == subject)
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

/// A statistics request between two named landmarks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub manifest_path: PathBuf,
    pub data_folder: PathBuf,
    pub start_phase: String,
    pub end_phase: String,
    /// 0-based manifest row
    pub subject_index: usize,
}

/// EMG-time interval in natural seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

/// Mean and maximum of one channel over an interval (scaled)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub mean: f64,
    pub max: f64,
}

/// Per-channel statistics between two landmarks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub subject: String,
    pub start_phase: String,
    pub end_phase: String,
    /// Natural seconds on the EMG clock
    pub start_emg_time: f64,
    pub end_emg_time: f64,
    pub channel_order: Vec<String>,
    /// Scaled
    pub channel_means: HashMap<String, f64>,
    /// Scaled
    pub channel_maxes: HashMap<String, f64>,
}

/// Best window of one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowResult {
    /// 1-based EMG column (column 0 is time)
    pub channel_index: usize,
    /// Scaled time of the first sample in the best window
    pub best_start_time: f64,
    /// Scaled time of the last sample in the best window
    pub best_end_time: f64,
    /// Scaled mean of the best window
    pub max_mean: f64,
}

/// Window engine output for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxMeanReport {
    pub window_size: usize,
    /// Scaled time of the first sample considered
    pub range_start: f64,
    /// Scaled time of the last sample considered
    pub range_end: f64,
    pub channel_order: Vec<String>,
    pub results: Vec<WindowResult>,
}

/// Per-phase, per-channel summaries plus the time of each channel's peak
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub labels: Vec<String>,
    pub channel_order: Vec<String>,
    /// `buckets[phase][channel]`; `None` when no sample fell in the phase
    pub buckets: Vec<Vec<Option<ChannelSummary>>>,
    /// Scaled EMG time of each channel's global maximum
    pub peak_times: Vec<Option<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> EmgStream {
        EmgStream::new(
            vec![1.0, 2.0, 3.0, 4.0],
            vec!["A".into(), "B".into()],
            vec![vec![10.0, 20.0, 30.0, 40.0], vec![1.0, 2.0, 3.0, 4.0]],
            2,
            10,
        )
        .unwrap()
    }

    #[test]
    fn test_emg_stream_rejects_length_mismatch() {
        let result = EmgStream::new(vec![1.0, 2.0], vec!["A".into()], vec![vec![1.0]], 2, 10);
        assert!(result.is_err());
    }

    #[test]
    fn test_emg_stream_rejects_non_increasing_time() {
        let result = EmgStream::new(vec![1.0, 1.0], vec!["A".into()], vec![vec![1.0, 2.0]], 2, 10);
        assert!(result.is_err());
    }

    #[test]
    fn test_emg_stream_rejects_duplicate_names() {
        let result = EmgStream::new(
            vec![1.0],
            vec!["A".into(), "A".into()],
            vec![vec![1.0], vec![2.0]],
            2,
            10,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_slice_time_is_inclusive() {
        let sliced = stream().slice_time(2.0, 3.0);
        assert_eq!(sliced.time(), &[2.0, 3.0]);
        assert_eq!(sliced.channels().channel("A").unwrap(), &[20.0, 30.0]);
        assert_eq!(sliced.channels().channel("B").unwrap(), &[2.0, 3.0]);
    }

    #[test]
    fn test_slice_time_outside_is_empty() {
        let sliced = stream().slice_time(5.0, 9.0);
        assert!(sliced.is_empty());
        assert_eq!(sliced.headers().len(), 2);
    }

    #[test]
    fn test_landmark_parse_and_rank() {
        assert_eq!("T0".parse::<Landmark>().unwrap(), Landmark::T0);
        assert!("Q".parse::<Landmark>().is_err());
        assert!(Landmark::P0.rank() < Landmark::L.rank());
        assert_eq!(Landmark::D.clock(), LandmarkClock::MotionIndex);
        assert_eq!(Landmark::S.clock(), LandmarkClock::ForceTime);
    }

    #[test]
    fn test_landmark_value_sentinel() {
        let landmarks = Landmarks {
            d: 350,
            ..Default::default()
        };
        assert!(landmarks.get(Landmark::D).is_set());
        assert!(!landmarks.get(Landmark::S).is_set());
    }
}
