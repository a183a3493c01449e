//! Sliding-window maximum of means
//!
//! For each channel, finds the `window_size`-sample contiguous window with
//! the largest arithmetic mean. Channels run in parallel on a
//! [`WorkerPool`]; results come back in header order.

use crate::error::AnalysisError;
use crate::numeric::ScaledCodec;
use crate::pool::{CancelToken, WorkerPool};
use crate::types::{EmgStream, MaxMeanReport, TimeRange, WindowResult};
use tracing::debug;

/// Best window found in one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestWindow {
    /// Offset of the first sample, relative to the slice searched
    pub start: usize,
    pub mean: f64,
}

/// Incremental max-of-means over `values`.
///
/// Keeps the earliest window on ties. Returns `None` when `window_size` is
/// zero or larger than the slice.
pub fn max_mean_window(values: &[f64], window_size: usize) -> Option<BestWindow> {
    if window_size == 0 || values.len() < window_size {
        return None;
    }
    let width = window_size as f64;
    let mut sum: f64 = values[..window_size].iter().sum();
    let mut best_sum = sum;
    let mut best_start = 0;

    for start in 1..=values.len() - window_size {
        sum += values[start + window_size - 1] - values[start - 1];
        if sum / width > best_sum / width {
            best_sum = sum;
            best_start = start;
        }
    }

    Some(BestWindow {
        start: best_start,
        mean: best_sum / width,
    })
}

/// Channel-parallel window engine
pub struct WindowEngine {
    codec: ScaledCodec,
    pool: WorkerPool,
}

impl WindowEngine {
    pub fn new(codec: ScaledCodec, pool: WorkerPool) -> Self {
        Self { codec, pool }
    }

    /// Sample index range `[start, end]` (inclusive) selected by `range`.
    ///
    /// `range` is in natural EMG seconds; an end of zero means "to the end".
    pub fn select_range(
        &self,
        stream: &EmgStream,
        range: Option<TimeRange>,
    ) -> Option<(usize, usize)> {
        let time = stream.time();
        let last = time.len().checked_sub(1)?;
        let Some(range) = range else {
            return Some((0, last));
        };

        let lo = self.codec.to_scaled(range.start);
        let start = time.partition_point(|&t| t < lo);
        let end = if range.end == 0.0 {
            last
        } else {
            let hi = self.codec.to_scaled(range.end);
            time.partition_point(|&t| t <= hi).checked_sub(1)?
        };
        (start <= end && start <= last).then_some((start, end))
    }

    /// Best `window_size`-sample window of every channel
    pub fn max_mean(
        &self,
        stream: &EmgStream,
        window_size: usize,
        range: Option<TimeRange>,
        cancel: &CancelToken,
    ) -> Result<MaxMeanReport, AnalysisError> {
        if window_size < 1 {
            return Err(AnalysisError::invalid("window_size", "must be at least 1"));
        }

        let (start, end) = self
            .select_range(stream, range)
            .ok_or(AnalysisError::InsufficientData {
                required: window_size,
                available: 0,
            })?;
        let available = end - start + 1;
        if available < window_size {
            return Err(AnalysisError::InsufficientData {
                required: window_size,
                available,
            });
        }

        let time = stream.time();
        let channels = stream.channels();
        debug!(
            channels = channels.channel_count(),
            window_size,
            samples = available,
            "computing max-of-means"
        );

        let results = self.pool.run(channels.channel_count(), cancel, |position| {
            let values = channels.column(position).ok_or_else(|| {
                AnalysisError::invalid("channel", format!("no channel at position {position}"))
            })?;
            let best = max_mean_window(&values[start..=end], window_size).ok_or(
                AnalysisError::InsufficientData {
                    required: window_size,
                    available,
                },
            )?;
            let first = start + best.start;
            Ok(WindowResult {
                channel_index: position + 1,
                best_start_time: time[first],
                best_end_time: time[first + window_size - 1],
                max_mean: best.mean,
            })
        })?;

        Ok(MaxMeanReport {
            window_size,
            range_start: time[start],
            range_end: time[end],
            channel_order: stream.headers().to_vec(),
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn engine() -> WindowEngine {
        WindowEngine::new(ScaledCodec::default(), WorkerPool::new(4))
    }

    fn stream(time: Vec<f64>, channels: Vec<(&str, Vec<f64>)>) -> EmgStream {
        let (headers, values): (Vec<String>, Vec<Vec<f64>>) = channels
            .into_iter()
            .map(|(name, v)| (name.to_string(), v))
            .unzip();
        EmgStream::new(time, headers, values, 2, 10).unwrap()
    }

    fn naive(values: &[f64], window: usize) -> (usize, f64) {
        let mut best = (0, f64::NEG_INFINITY);
        for start in 0..=values.len() - window {
            let mean = values[start..start + window].iter().sum::<f64>() / window as f64;
            if mean > best.1 {
                best = (start, mean);
            }
        }
        best
    }

    #[test]
    fn test_single_channel_max_mean() {
        let s = stream(vec![1.0, 2.0, 3.0, 4.0], vec![("ch", vec![100.0, 200.0, 150.0, 300.0])]);
        let report = engine().max_mean(&s, 2, None, &CancelToken::new()).unwrap();
        assert_eq!(report.results.len(), 1);
        let r = report.results[0];
        assert_eq!(r.channel_index, 1);
        assert_eq!(r.best_start_time, 3.0);
        assert_eq!(r.best_end_time, 4.0);
        assert_eq!(r.max_mean, 225.0);
    }

    #[test]
    fn test_multi_channel_max_mean() {
        let s = stream(
            vec![1.0, 2.0, 3.0],
            vec![("Ch1", vec![100.0, 200.0, 150.0]), ("Ch2", vec![50.0, 100.0, 75.0])],
        );
        let report = engine().max_mean(&s, 2, None, &CancelToken::new()).unwrap();
        assert_eq!(report.channel_order, vec!["Ch1", "Ch2"]);
        assert_eq!(report.results[0].channel_index, 1);
        assert_eq!(report.results[0].max_mean, 175.0);
        // best window starts at sample 1, time 2
        assert_eq!(report.results[0].best_start_time, 2.0);
        assert_eq!(report.results[0].best_end_time, 3.0);
        assert_eq!(report.results[1].channel_index, 2);
        assert_eq!(report.results[1].max_mean, 87.5);
        assert_eq!(report.results[1].best_start_time, 2.0);
    }

    #[test]
    fn test_ties_keep_earliest_window() {
        let best = max_mean_window(&[5.0, 5.0, 1.0, 5.0, 5.0], 2).unwrap();
        assert_eq!(best.start, 0);
        assert_eq!(best.mean, 5.0);
    }

    #[test]
    fn test_incremental_matches_naive() {
        let mut seed = 0x2545_f491_u64;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed % 1000) as f64
        };
        for len in [1usize, 2, 7, 50, 301] {
            let values: Vec<f64> = (0..len).map(|_| next()).collect();
            for window in 1..=len.min(12) {
                let best = max_mean_window(&values, window).unwrap();
                let (start, mean) = naive(&values, window);
                assert_eq!(best.start, start, "len {len} window {window}");
                assert!((best.mean - mean).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_window_bounds() {
        let s = stream(vec![1.0, 2.0, 3.0], vec![("a", vec![1.0, 2.0, 3.0])]);
        let token = CancelToken::new();
        assert_eq!(
            engine().max_mean(&s, 0, None, &token).unwrap_err().kind(),
            ErrorKind::InputValidation
        );
        assert_eq!(
            engine().max_mean(&s, 4, None, &token).unwrap_err().kind(),
            ErrorKind::InsufficientData
        );
    }

    #[test]
    fn test_range_selection_is_inclusive() {
        // natural seconds 0.1 .. 0.5
        let time: Vec<f64> = (1..=5).map(|i| i as f64 * 1e9).collect();
        let s = stream(time, vec![("a", vec![9.0, 1.0, 2.0, 3.0, 9.0])]);
        let e = engine();
        assert_eq!(e.select_range(&s, Some(TimeRange::new(0.2, 0.4))), Some((1, 3)));
        assert_eq!(e.select_range(&s, Some(TimeRange::new(0.15, 0.0))), Some((1, 4)));
        assert_eq!(e.select_range(&s, Some(TimeRange::new(0.6, 0.9))), None);

        let report = e
            .max_mean(&s, 2, Some(TimeRange::new(0.2, 0.4)), &CancelToken::new())
            .unwrap();
        assert_eq!(report.range_start, 2e9);
        assert_eq!(report.range_end, 4e9);
        assert_eq!(report.results[0].best_start_time, 3e9);
        assert_eq!(report.results[0].max_mean, 2.5);

        let err = e
            .max_mean(&s, 4, Some(TimeRange::new(0.2, 0.4)), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let time: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let channels: Vec<(&str, Vec<f64>)> = ["a", "b", "c", "d", "e", "f"]
            .into_iter()
            .enumerate()
            .map(|(k, name)| (name, (0..200).map(|i| ((i * (k + 3)) % 17) as f64).collect()))
            .collect();
        let s = stream(time, channels);
        let first = engine().max_mean(&s, 9, None, &CancelToken::new()).unwrap();
        let second = engine().max_mean(&s, 9, None, &CancelToken::new()).unwrap();
        assert_eq!(first, second);
    }
}
