//! Reference normalization
//!
//! Divides every sample of a primary EMG stream by a per-channel reference
//! value (typically a maximum voluntary contraction). Both sides are scaled,
//! so the divisor is brought back to natural units first and the output
//! stays in the scaled domain.

use crate::error::AnalysisError;
use crate::types::{EmgStream, ReferenceValues};
use tracing::{debug, warn};

/// Normalizer for dividing a stream by reference values
pub struct Normalizer;

impl Normalizer {
    /// Normalize `primary` by `reference`, channel by channel in header order
    pub fn normalize(
        primary: &EmgStream,
        reference: &ReferenceValues,
    ) -> Result<EmgStream, AnalysisError> {
        let channels = primary.channels();
        if channels.channel_count() != reference.values.len() {
            return Err(AnalysisError::invalid(
                "reference",
                format!(
                    "primary has {} channels, reference has {}",
                    channels.channel_count(),
                    reference.values.len()
                ),
            ));
        }

        if let Some(position) = reference.values.iter().position(|&v| v == 0.0) {
            return Err(AnalysisError::DivisionByZero {
                channel: position + 1,
            });
        }

        for (name, reference_name) in primary.headers().iter().zip(&reference.headers) {
            if name != reference_name {
                warn!(
                    primary = %name,
                    reference = %reference_name,
                    "reference channel name differs; matching by position"
                );
            }
        }

        let scale = 10f64.powi(reference.scaling_factor as i32);
        let values = channels
            .iter()
            .zip(&reference.values)
            .map(|((_, samples), &divisor)| {
                let divisor = divisor / scale;
                samples.iter().map(|v| v / divisor).collect()
            })
            .collect();

        debug!(
            channels = channels.channel_count(),
            samples = primary.len(),
            "normalized stream"
        );

        EmgStream::new(
            primary.time().to_vec(),
            primary.headers().to_vec(),
            values,
            primary.original_time_precision(),
            primary.scaling_factor(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::numeric::ScaledCodec;
    use pretty_assertions::assert_eq;

    fn codec() -> ScaledCodec {
        ScaledCodec::default()
    }

    fn primary(rows: &[[f64; 2]]) -> EmgStream {
        let c = codec();
        EmgStream::new(
            (0..rows.len()).map(|i| c.to_scaled(i as f64 * 0.001)).collect(),
            vec!["RF".into(), "VL".into()],
            (0..2)
                .map(|col| rows.iter().map(|r| c.to_scaled(r[col])).collect())
                .collect(),
            3,
            c.scaling_factor(),
        )
        .unwrap()
    }

    fn reference(values: [f64; 2]) -> ReferenceValues {
        let c = codec();
        ReferenceValues {
            headers: vec!["RF".into(), "VL".into()],
            values: values.iter().map(|&v| c.to_scaled(v)).collect(),
            scaling_factor: c.scaling_factor(),
        }
    }

    #[test]
    fn test_zero_reference_names_channel() {
        let err = Normalizer::normalize(&primary(&[[200.0, 300.0]]), &reference([100.0, 0.0]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DivisionByZero);
        assert!(err.to_string().contains("reference value at channel 2 is zero"));
    }

    #[test]
    fn test_normalize_divides_each_channel() {
        let input = primary(&[[200.0, 300.0], [50.0, 75.0], [0.0, 30.0]]);
        let out = Normalizer::normalize(&input, &reference([100.0, 150.0])).unwrap();

        assert_eq!(out.time(), input.time());
        assert_eq!(out.headers(), input.headers());
        assert_eq!(out.original_time_precision(), 3);

        let c = codec();
        for (col, divisor) in [100.0, 150.0].into_iter().enumerate() {
            let got = out.channels().column(col).unwrap();
            let want = input.channels().column(col).unwrap();
            for (g, w) in got.iter().zip(want) {
                let expected = c.to_natural(*w) / divisor;
                assert!((c.to_natural(*g) - expected).abs() < 1e-12);
            }
        }
        assert_eq!(c.to_natural(out.channels().column(0).unwrap()[0]), 2.0);
    }

    #[test]
    fn test_channel_count_mismatch_rejected() {
        let mut r = reference([1.0, 2.0]);
        r.headers.push("TA".into());
        r.values.push(1.0);
        let err = Normalizer::normalize(&primary(&[[1.0, 1.0]]), &r).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputValidation);
    }

    #[test]
    fn test_negative_reference_is_allowed() {
        let out = Normalizer::normalize(&primary(&[[4.0, 9.0]]), &reference([-2.0, 3.0])).unwrap();
        let c = codec();
        assert_eq!(c.to_natural(out.channels().column(0).unwrap()[0]), -2.0);
        assert_eq!(c.to_natural(out.channels().column(1).unwrap()[0]), 3.0);
    }
}
