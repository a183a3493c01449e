//! Cross-stream time synchronization
//!
//! Three clocks are in play:
//! - motion frames, 1-based indices at 250 Hz (frame `i` sits at `(i - 1) / 250` s)
//! - force seconds, which share their origin with the motion clock
//! - EMG seconds, whose sample 0 coincides with motion frame `emg_motion_offset`
//!
//! All conversions work in natural units and round half away from zero.

use crate::types::{LandmarkValue, MOTION_RATE_HZ};
use serde::{Deserialize, Serialize};

/// Motion time (s) of a 1-based frame index; indices below 1 map to 0
pub fn motion_index_to_motion_time(index: i64) -> f64 {
    if index < 1 {
        return 0.0;
    }
    (index - 1) as f64 / MOTION_RATE_HZ
}

/// Nearest 1-based frame index for a motion time, clamped to at least 1
pub fn motion_time_to_motion_index(time: f64) -> i64 {
    ((time * MOTION_RATE_HZ).round() as i64 + 1).max(1)
}

/// Force and motion clocks share their origin
pub fn force_time_to_motion_index(time: f64) -> i64 {
    motion_time_to_motion_index(time)
}

pub fn motion_index_to_force_time(index: i64) -> f64 {
    motion_index_to_motion_time(index)
}

/// Alignment between the EMG clock and the motion/force clock of one recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSync {
    /// Motion frame index that coincides with EMG sample 0
    pub emg_motion_offset: i64,
}

impl TimeSync {
    pub fn new(emg_motion_offset: i64) -> Self {
        Self { emg_motion_offset }
    }

    /// EMG time (s) of a motion frame. May be negative for frames before EMG start.
    pub fn motion_index_to_emg_time(&self, index: i64) -> f64 {
        (index - self.emg_motion_offset) as f64 / MOTION_RATE_HZ
    }

    /// Nearest motion frame for an EMG time, clamped to at least 1
    pub fn emg_time_to_motion_index(&self, time: f64) -> i64 {
        ((time * MOTION_RATE_HZ).round() as i64 + self.emg_motion_offset).max(1)
    }

    pub fn force_time_to_emg_time(&self, time: f64) -> f64 {
        self.motion_index_to_emg_time(force_time_to_motion_index(time))
    }

    pub fn emg_time_to_force_time(&self, time: f64) -> f64 {
        motion_index_to_force_time(self.emg_time_to_motion_index(time))
    }

    pub fn motion_time_to_emg_time(&self, time: f64) -> f64 {
        self.motion_index_to_emg_time(motion_time_to_motion_index(time))
    }

    pub fn emg_time_to_motion_time(&self, time: f64) -> f64 {
        motion_index_to_motion_time(self.emg_time_to_motion_index(time))
    }

    /// EMG time of a landmark recorded in either native clock
    pub fn landmark_to_emg_time(&self, value: LandmarkValue) -> f64 {
        match value {
            LandmarkValue::ForceTime(t) => self.force_time_to_emg_time(t),
            LandmarkValue::MotionIndex(i) => self.motion_index_to_emg_time(i),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_index_time_conversions() {
        assert_eq!(motion_index_to_motion_time(1), 0.0);
        assert_eq!(motion_index_to_motion_time(251), 1.0);
        assert_eq!(motion_index_to_motion_time(0), 0.0);
        assert_eq!(motion_index_to_motion_time(-5), 0.0);

        assert_eq!(motion_time_to_motion_index(0.0), 1);
        assert_eq!(motion_time_to_motion_index(1.0), 251);
        assert_eq!(motion_time_to_motion_index(-3.0), 1);
    }

    #[test]
    fn test_rounding_is_half_away_from_zero() {
        // 0.002 s * 250 = 0.5 frames
        assert_eq!(motion_time_to_motion_index(0.002), 2);
        let sync = TimeSync::new(10);
        assert_eq!(sync.emg_time_to_motion_index(-0.002), 9);
    }

    #[test]
    fn test_force_time_to_emg_time() {
        let sync = TimeSync::new(100);
        assert_eq!(force_time_to_motion_index(8.0), 2001);
        assert!((sync.force_time_to_emg_time(8.0) - 7.604).abs() < 1e-9);
    }

    #[test]
    fn test_motion_index_to_emg_time() {
        let sync = TimeSync::new(100);
        assert_eq!(sync.motion_index_to_emg_time(350), 1.0);
        assert_eq!(sync.motion_index_to_emg_time(100), 0.0);
        assert!(sync.motion_index_to_emg_time(50) < 0.0);
    }

    #[test]
    fn test_emg_round_trip_within_one_frame() {
        for offset in [1, 37, 100, 2500] {
            let sync = TimeSync::new(offset);
            let mut t = 0.0;
            while t < 12.0 {
                let back = sync.motion_index_to_emg_time(sync.emg_time_to_motion_index(t));
                assert!(
                    (back - t).abs() <= 1.0 / MOTION_RATE_HZ,
                    "offset {offset} t {t} came back as {back}"
                );
                t += 0.0137;
            }
        }
    }

    #[test]
    fn test_force_emg_inverse() {
        let sync = TimeSync::new(120);
        let emg = sync.force_time_to_emg_time(3.2);
        assert!((sync.emg_time_to_force_time(emg) - 3.2).abs() < 1e-9);
    }

    #[test]
    fn test_landmark_dispatch() {
        let sync = TimeSync::new(100);
        assert_eq!(sync.landmark_to_emg_time(LandmarkValue::MotionIndex(350)), 1.0);
        assert!((sync.landmark_to_emg_time(LandmarkValue::ForceTime(8.0)) - 7.604).abs() < 1e-9);
    }
}
