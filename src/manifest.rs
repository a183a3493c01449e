//! Phase manifest parser
//!
//! The manifest is a CSV with a header row and one row per subject:
//!
//! ```text
//! subject,motionFile,forceFile,emgFile,emgMotionOffset,P0,P1,P2,S,C,D,T0,T,O,L
//! ```
//!
//! `D` and `O` are motion frame indices; every other landmark is force-plate
//! seconds. Landmarks stay in natural units. Missing values read as zero.

use crate::error::{AnalysisError, FormatError};
use crate::numeric::{is_missing, ScaledCodec};
use crate::parsers::{decode_text, read_rows, Row};
use crate::types::{Landmark, Landmarks, Manifest, SubjectRecord};

/// Fixed column count of a manifest row
pub const MANIFEST_COLUMNS: usize = 15;

/// Force-time landmarks in canonical order; adjacent set pairs must not decrease
const FORCE_TIME_SEQUENCE: [Landmark; 8] = [
    Landmark::P0,
    Landmark::P1,
    Landmark::P2,
    Landmark::S,
    Landmark::C,
    Landmark::T0,
    Landmark::T,
    Landmark::L,
];

/// Parse and validate a manifest file held in memory
pub fn parse_manifest(bytes: &[u8]) -> Result<Manifest, AnalysisError> {
    let text = decode_text(bytes, "manifest")?;
    let rows = read_rows(text, b',')?;

    let (header, data) = rows
        .split_first()
        .ok_or_else(|| FormatError::new("MISSING_HEADER", "manifest", "no header row found"))?;
    if header.cells.len() < MANIFEST_COLUMNS {
        return Err(FormatError::new(
            "BAD_HEADER",
            "manifest",
            format!("expected {MANIFEST_COLUMNS} columns, header has {}", header.cells.len()),
        )
        .at(0, None)
        .into());
    }

    let mut subjects = Vec::with_capacity(data.len());
    for (n, row) in data.iter().enumerate() {
        let record = parse_row(row, n + 1)?;
        validate_record(&record, n + 1)?;
        subjects.push(record);
    }

    if subjects.is_empty() {
        return Err(FormatError::new("NO_DATA", "manifest", "manifest lists no subjects").into());
    }
    Ok(Manifest { subjects })
}

fn parse_row(row: &Row, n: usize) -> Result<SubjectRecord, AnalysisError> {
    if row.cells.len() < MANIFEST_COLUMNS {
        return Err(FormatError::new(
            "SHORT_ROW",
            "manifest",
            format!("expected {MANIFEST_COLUMNS} columns, found {}", row.cells.len()),
        )
        .at(n, None)
        .into());
    }

    let float = |col: usize| -> Result<f64, AnalysisError> {
        ScaledCodec::unscaled()
            .parse(row.cell(col))
            .map_err(|_| bad_cell(row, n, col, "number"))
    };
    let integer = |col: usize| -> Result<i64, AnalysisError> {
        let raw = row.cell(col);
        if is_missing(raw) {
            return Ok(0);
        }
        raw.parse().map_err(|_| bad_cell(row, n, col, "integer"))
    };

    Ok(SubjectRecord {
        subject: row.cell(0).to_string(),
        motion_file: row.cell(1).to_string(),
        force_file: row.cell(2).to_string(),
        emg_file: row.cell(3).to_string(),
        emg_motion_offset: integer(4)?,
        landmarks: Landmarks {
            p0: float(5)?,
            p1: float(6)?,
            p2: float(7)?,
            s: float(8)?,
            c: float(9)?,
            d: integer(10)?,
            t0: float(11)?,
            t: float(12)?,
            o: integer(13)?,
            l: float(14)?,
        },
    })
}

fn bad_cell(row: &Row, n: usize, col: usize, expected: &str) -> AnalysisError {
    FormatError::new(
        "BAD_CELL",
        "manifest",
        format!("expected {expected}, found {:?}", row.cell(col)),
    )
    .at(n, Some(col))
    .into()
}

/// Check required fields and landmark ordering of one subject
pub fn validate_record(record: &SubjectRecord, row: usize) -> Result<(), AnalysisError> {
    let required = [
        ("subject", &record.subject),
        ("motionFile", &record.motion_file),
        ("forceFile", &record.force_file),
        ("emgFile", &record.emg_file),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(AnalysisError::invalid(
                field,
                format!("row {row}: required field is empty"),
            ));
        }
    }

    if record.emg_motion_offset < 0 {
        return Err(AnalysisError::invalid(
            "emgMotionOffset",
            format!("row {row}: {} is negative", record.emg_motion_offset),
        ));
    }

    let landmarks = &record.landmarks;
    for pair in FORCE_TIME_SEQUENCE.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let (va, vb) = (force_time(landmarks, a), force_time(landmarks, b));
        if va != 0.0 && vb != 0.0 && va > vb {
            return Err(AnalysisError::invalid(
                b.as_str(),
                format!("row {row}: {a} ({va}) falls after {b} ({vb})"),
            ));
        }
    }
    Ok(())
}

fn force_time(landmarks: &Landmarks, landmark: Landmark) -> f64 {
    match landmarks.get(landmark) {
        crate::types::LandmarkValue::ForceTime(t) => t,
        crate::types::LandmarkValue::MotionIndex(_) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    const HEADER: &str = "subject,motionFile,forceFile,emgFile,emgMotionOffset,P0,P1,P2,S,C,D,T0,T,O,L";

    fn manifest(rows: &[&str]) -> Result<Manifest, AnalysisError> {
        let text = format!("{HEADER}\n{}\n", rows.join("\n"));
        parse_manifest(text.as_bytes())
    }

    #[test]
    fn test_parse_manifest_row() {
        let m = manifest(&["S01,m.csv,f.anc,e.csv,100,0.5,0.8,1.0,1.2,1.6,350,2.0,2.1,600,8.0"]).unwrap();
        assert_eq!(m.len(), 1);
        let s = m.subject(0).unwrap();
        assert_eq!(s.subject, "S01");
        assert_eq!(s.emg_file, "e.csv");
        assert_eq!(s.emg_motion_offset, 100);
        assert_eq!(s.landmarks.d, 350);
        assert_eq!(s.landmarks.o, 600);
        assert_eq!(s.landmarks.l, 8.0);
        assert_eq!(s.landmarks.s, 1.2);
    }

    #[test]
    fn test_missing_sentinels_become_zero() {
        let m = manifest(&["S01,m.csv,f.anc,e.csv,0,NA,,x,1.2,-,N/A,2.0,X,,8.0"]).unwrap();
        let lm = m.subjects[0].landmarks;
        assert_eq!(lm.p0, 0.0);
        assert_eq!(lm.p1, 0.0);
        assert_eq!(lm.c, 0.0);
        assert_eq!(lm.d, 0);
        assert_eq!(lm.o, 0);
        assert_eq!(lm.t, 0.0);
    }

    #[test]
    fn test_out_of_order_landmarks_rejected() {
        let err = manifest(&["S01,m.csv,f.anc,e.csv,0,0.5,0.4,,,,,,,,"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputValidation);
    }

    #[test]
    fn test_zero_landmarks_skip_order_check() {
        assert!(manifest(&["S01,m.csv,f.anc,e.csv,0,0.5,0,0.4,,,,,,,"]).is_ok());
    }

    #[test]
    fn test_empty_required_field_rejected() {
        let err = manifest(&["S01,,f.anc,e.csv,0,,,,,,,,,,"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputValidation);
    }

    #[test]
    fn test_negative_offset_rejected() {
        let err = manifest(&["S01,m.csv,f.anc,e.csv,-1,,,,,,,,,,"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputValidation);
    }

    #[test]
    fn test_short_row_is_format_error() {
        let err = manifest(&["S01,m.csv,f.anc"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileFormat);
    }

    #[test]
    fn test_non_integer_motion_landmark() {
        let err = manifest(&["S01,m.csv,f.anc,e.csv,0,,,,,,3.5,,,,"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileFormat);
    }

    #[test]
    fn test_subject_index_out_of_range() {
        let m = manifest(&["S01,m.csv,f.anc,e.csv,0,,,,,,,,,,"]).unwrap();
        assert!(m.subject(3).is_err());
        assert!(m.find("S01").is_some());
    }
}
