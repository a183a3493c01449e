//! Interval and phase-bucket statistics
//!
//! Interval statistics summarise a stream already sliced to a landmark
//! interval. Phase-bucket statistics split one stream across several
//! intervals; a sample exactly on an interval boundary belongs to no bucket.

use crate::error::AnalysisError;
use crate::numeric::ScaledCodec;
use crate::phase::PhaseRange;
use crate::types::{ChannelSummary, EmgStream, PhaseStats, Stats, TimeRange};
use std::collections::HashMap;

/// Mean and max of a value sequence; both zero when empty
pub fn summarize(values: &[f64]) -> ChannelSummary {
    if values.is_empty() {
        return ChannelSummary::default();
    }
    let sum: f64 = values.iter().sum();
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    ChannelSummary {
        mean: sum / values.len() as f64,
        max,
    }
}

/// Stateless statistics over EMG streams
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticsEngine {
    codec: ScaledCodec,
}

impl StatisticsEngine {
    pub fn new(codec: ScaledCodec) -> Self {
        Self { codec }
    }

    /// Per-channel mean and max of a stream already restricted to `phase`
    pub fn interval_stats(&self, subject: &str, phase: &PhaseRange, slice: &EmgStream) -> Stats {
        let mut channel_means = HashMap::with_capacity(slice.headers().len());
        let mut channel_maxes = HashMap::with_capacity(slice.headers().len());
        for (name, values) in slice.channels().iter() {
            let summary = summarize(values);
            channel_means.insert(name.to_string(), summary.mean);
            channel_maxes.insert(name.to_string(), summary.max);
        }

        Stats {
            subject: subject.to_string(),
            start_phase: phase.start.to_string(),
            end_phase: phase.end.to_string(),
            start_emg_time: phase.start_emg_time,
            end_emg_time: phase.end_emg_time,
            channel_order: slice.headers().to_vec(),
            channel_means,
            channel_maxes,
        }
    }

    /// Summaries of the samples strictly inside each interval, plus the time
    /// of every channel's global maximum.
    ///
    /// `intervals` are natural EMG seconds and must pair one-to-one with
    /// `labels`.
    pub fn phase_bucket_stats(
        &self,
        stream: &EmgStream,
        intervals: &[TimeRange],
        labels: &[String],
    ) -> Result<PhaseStats, AnalysisError> {
        if intervals.len() != labels.len() {
            return Err(AnalysisError::invalid(
                "phase_labels",
                format!(
                    "{} intervals but {} phase labels configured",
                    intervals.len(),
                    labels.len()
                ),
            ));
        }

        let time = stream.time();
        let buckets = intervals
            .iter()
            .map(|interval| {
                let lo = self.codec.to_scaled(interval.start);
                let hi = self.codec.to_scaled(interval.end);
                let first = time.partition_point(|&t| t <= lo);
                let last = time.partition_point(|&t| t < hi);
                stream
                    .channels()
                    .iter()
                    .map(|(_, values)| {
                        (first < last).then(|| summarize(&values[first..last]))
                    })
                    .collect()
            })
            .collect();

        let peak_times = stream
            .channels()
            .iter()
            .map(|(_, values)| peak_index(values).map(|i| time[i]))
            .collect();

        Ok(PhaseStats {
            labels: labels.to_vec(),
            channel_order: stream.headers().to_vec(),
            buckets,
            peak_times,
        })
    }
}

/// Index of the first occurrence of the maximum
fn peak_index(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}
