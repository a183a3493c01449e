//! Phase resolution
//!
//! Turns a pair of named landmarks into an interval on the EMG clock.

use crate::error::{AnalysisError, PhaseLookupReason};
use crate::sync::TimeSync;
use crate::types::{Landmark, LandmarkClock, Landmarks, TimeRange};
use serde::{Deserialize, Serialize};

/// EMG interval between two landmarks, with the clock each was recorded in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseRange {
    pub start: Landmark,
    pub end: Landmark,
    /// Natural EMG seconds
    pub start_emg_time: f64,
    pub end_emg_time: f64,
    pub start_clock: LandmarkClock,
    pub end_clock: LandmarkClock,
}

impl PhaseRange {
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start_emg_time, self.end_emg_time)
    }
}

/// Resolve `start_name..end_name` to EMG seconds using the recording's offset
pub fn get_phase_time_range(
    landmarks: &Landmarks,
    start_name: &str,
    end_name: &str,
    emg_motion_offset: i64,
) -> Result<PhaseRange, AnalysisError> {
    let start: Landmark = start_name.parse()?;
    let end: Landmark = end_name.parse()?;
    resolve(landmarks, start, end, emg_motion_offset)
}

/// Resolve an already-parsed landmark pair
pub fn resolve(
    landmarks: &Landmarks,
    start: Landmark,
    end: Landmark,
    emg_motion_offset: i64,
) -> Result<PhaseRange, AnalysisError> {
    let start_value = landmarks.get(start);
    let end_value = landmarks.get(end);

    if !start_value.is_set() {
        return Err(AnalysisError::phase(start.as_str(), PhaseLookupReason::ValueNotSet));
    }
    if !end_value.is_set() {
        return Err(AnalysisError::phase(end.as_str(), PhaseLookupReason::ValueNotSet));
    }

    let sync = TimeSync::new(emg_motion_offset);
    let start_emg_time = sync.landmark_to_emg_time(start_value);
    let end_emg_time = sync.landmark_to_emg_time(end_value);

    if start_emg_time > end_emg_time {
        return Err(AnalysisError::phase(
            format!("{start}-{end}"),
            PhaseLookupReason::ReversedInterval,
        ));
    }

    Ok(PhaseRange {
        start,
        end,
        start_emg_time,
        end_emg_time,
        start_clock: start.clock(),
        end_clock: end.clock(),
    })
}

/// Require `start` to come strictly before `end` in the canonical sequence
pub fn validate_phase_order(start_name: &str, end_name: &str) -> Result<(Landmark, Landmark), AnalysisError> {
    let start: Landmark = start_name.parse()?;
    let end: Landmark = end_name.parse()?;
    if start.rank() >= end.rank() {
        return Err(AnalysisError::phase(
            format!("{start}-{end}"),
            PhaseLookupReason::OutOfOrder,
        ));
    }
    Ok((start, end))
}

/// Split a phase label such as `"S-C"` into its landmark pair
pub fn parse_phase_label(label: &str) -> Result<(Landmark, Landmark), AnalysisError> {
    let (start, end) = label.split_once('-').ok_or_else(|| {
        AnalysisError::invalid("phase_labels", format!("{label:?} is not of the form START-END"))
    })?;
    validate_phase_order(start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn landmarks() -> Landmarks {
        Landmarks {
            p0: 0.5,
            s: 1.2,
            c: 1.6,
            d: 350,
            l: 8.0,
            ..Default::default()
        }
    }

    fn reason(err: AnalysisError) -> PhaseLookupReason {
        match err {
            AnalysisError::PhaseLookup { reason, .. } => reason,
            other => panic!("expected phase lookup error, got {other:?}"),
        }
    }

    #[test]
    fn test_cross_clock_resolution() {
        let range = get_phase_time_range(&landmarks(), "D", "L", 100).unwrap();
        assert!((range.start_emg_time - 1.0).abs() < 0.01);
        assert!((range.end_emg_time - 7.604).abs() < 0.01);
        assert_eq!(range.start_clock, LandmarkClock::MotionIndex);
        assert_eq!(range.end_clock, LandmarkClock::ForceTime);
    }

    #[test]
    fn test_unknown_name() {
        let err = get_phase_time_range(&landmarks(), "Q", "L", 100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PhaseLookup);
        assert_eq!(reason(err), PhaseLookupReason::UnknownName);
    }

    #[test]
    fn test_value_not_set() {
        let err = get_phase_time_range(&landmarks(), "S", "T", 100).unwrap_err();
        assert_eq!(reason(err), PhaseLookupReason::ValueNotSet);
    }

    #[test]
    fn test_reversed_interval() {
        // C lands on frame 401; D is recorded at frame 100
        let lm = Landmarks {
            c: 1.6,
            d: 100,
            ..landmarks()
        };
        let err = get_phase_time_range(&lm, "C", "D", 0).unwrap_err();
        assert_eq!(reason(err), PhaseLookupReason::ReversedInterval);
    }

    #[test]
    fn test_validate_phase_order() {
        assert!(validate_phase_order("P0", "L").is_ok());
        assert_eq!(
            reason(validate_phase_order("L", "P0").unwrap_err()),
            PhaseLookupReason::OutOfOrder
        );
        assert_eq!(
            reason(validate_phase_order("S", "S").unwrap_err()),
            PhaseLookupReason::OutOfOrder
        );
    }

    #[test]
    fn test_parse_phase_label() {
        assert_eq!(parse_phase_label("T0-T").unwrap(), (Landmark::T0, Landmark::T));
        assert!(parse_phase_label("S").is_err());
        assert!(parse_phase_label("C-S").is_err());
    }
}
