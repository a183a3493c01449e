//! Scaled numeric codec
//!
//! Every number read from a recording is stored as an `f64` pre-multiplied by
//! `10^scaling_factor`. Values only leave the scaled domain at the output
//! boundary, where [`ScaledCodec::format`] divides the factor back out.
//!
//! Parsing works on the decimal digits directly (`"0.123"` becomes
//! `123 * 10^(k - 3)`) so that ordinary recordings land on exact integers in
//! the scaled domain.

use crate::error::AnalysisError;

/// Default base-10 exponent applied to parsed values
pub const DEFAULT_SCALING_FACTOR: u32 = 10;

/// Largest scaling factor accepted by the codec
pub const MAX_SCALING_FACTOR: u32 = 20;

/// Tokens that decode to zero instead of failing
pub const MISSING_SENTINELS: [&str; 6] = ["", "NA", "N/A", "x", "X", "-"];

/// Digit count above which the mantissa no longer fits an exact `u64`
const MAX_EXACT_DIGITS: usize = 18;

/// Upper bound reported by [`observed_precision`]
pub const MAX_OBSERVED_PRECISION: usize = 20;

/// Returns true when the (already trimmed) token is a "missing" sentinel
pub fn is_missing(token: &str) -> bool {
    MISSING_SENTINELS.contains(&token)
}

/// Parser/formatter bound to one scaling factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaledCodec {
    scaling_factor: u32,
}

impl Default for ScaledCodec {
    fn default() -> Self {
        Self {
            scaling_factor: DEFAULT_SCALING_FACTOR,
        }
    }
}

impl ScaledCodec {
    /// Create a codec for the given scaling factor
    pub fn new(scaling_factor: u32) -> Result<Self, AnalysisError> {
        if scaling_factor > MAX_SCALING_FACTOR {
            return Err(AnalysisError::invalid(
                "scaling_factor",
                format!("{scaling_factor} exceeds the maximum of {MAX_SCALING_FACTOR}"),
            ));
        }
        Ok(Self { scaling_factor })
    }

    /// Codec that keeps values in natural units (used for manifest landmarks)
    pub fn unscaled() -> Self {
        Self { scaling_factor: 0 }
    }

    pub fn scaling_factor(&self) -> u32 {
        self.scaling_factor
    }

    /// `10^scaling_factor`
    pub fn scale(&self) -> f64 {
        10f64.powi(self.scaling_factor as i32)
    }

    /// Move a natural-unit value into the scaled domain
    pub fn to_scaled(&self, value: f64) -> f64 {
        value * self.scale()
    }

    /// Move a scaled value back to natural units
    pub fn to_natural(&self, value: f64) -> f64 {
        value / self.scale()
    }

    /// Parse a token into the scaled domain. Sentinels decode to zero.
    pub fn parse(&self, raw: &str) -> Result<f64, AnalysisError> {
        let token = raw.trim();
        if is_missing(token) {
            return Ok(0.0);
        }
        self.parse_strict(token)
    }

    /// Parse a token into the scaled domain, treating sentinels as failures.
    ///
    /// Used for time columns, where a blank cell must skip the row rather than
    /// fabricate a zero timestamp.
    pub fn parse_strict(&self, raw: &str) -> Result<f64, AnalysisError> {
        let token = raw.trim();
        let fail = || AnalysisError::Parse {
            token: raw.to_string(),
        };

        let (mantissa, exponent) = match token.find(['e', 'E']) {
            Some(pos) => {
                let exp: i32 = token[pos + 1..].trim().parse().map_err(|_| fail())?;
                (token[..pos].trim(), exp)
            }
            None => (token, 0),
        };

        let decimal = Decimal::parse(mantissa).ok_or_else(fail)?;
        let fraction_digits = i32::try_from(decimal.fraction_digits).map_err(|_| fail())?;
        let power = (self.scaling_factor as i32)
            .checked_add(exponent)
            .and_then(|p| p.checked_sub(fraction_digits))
            .ok_or_else(fail)?;
        let magnitude = apply_power(decimal.digits, power);
        if !magnitude.is_finite() {
            return Err(fail());
        }
        Ok(if decimal.negative { -magnitude } else { magnitude })
    }

    /// Format a scaled value in natural units with `precision` decimals
    pub fn format(&self, value: f64, precision: usize) -> String {
        let natural = self.to_natural(value);
        format_fixed(natural, precision)
    }
}

/// Format a natural-unit value with `precision` decimals, never emitting `-0`
pub fn format_fixed(value: f64, precision: usize) -> String {
    let text = format!("{:.*}", precision, value);
    if text.starts_with('-') && text[1..].chars().all(|c| c == '0' || c == '.') {
        text[1..].to_string()
    } else {
        text
    }
}

/// Number of decimal places a token expresses in natural units.
///
/// `"1.25"` has two; `"1.5E-3"` has four (one mantissa digit shifted by three).
/// The result never exceeds [`MAX_OBSERVED_PRECISION`].
pub fn observed_precision(raw: &str) -> usize {
    let token = raw.trim();
    let (mantissa, exponent) = match token.find(['e', 'E']) {
        Some(pos) => (&token[..pos], token[pos + 1..].trim().parse::<i64>().unwrap_or(0)),
        None => (token, 0),
    };
    let fraction = mantissa
        .split_once('.')
        .map(|(_, frac)| frac.trim().len())
        .unwrap_or(0) as i64;
    let digits = fraction.saturating_sub(exponent).clamp(0, MAX_OBSERVED_PRECISION as i64);
    digits as usize
}

/// Decimal digits of a mantissa with the decimal point removed
struct Decimal {
    negative: bool,
    digits: Digits,
    fraction_digits: usize,
}

enum Digits {
    Exact(u64),
    Approximate(f64),
}

impl Decimal {
    fn parse(text: &str) -> Option<Self> {
        let (negative, body) = match text.as_bytes().first()? {
            b'-' => (true, &text[1..]),
            b'+' => (false, &text[1..]),
            _ => (false, text),
        };

        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }

        let all_digits = format!("{int_part}{frac_part}");
        let significant = all_digits.trim_start_matches('0');
        let digits = if significant.len() <= MAX_EXACT_DIGITS {
            Digits::Exact(significant.parse().unwrap_or(0))
        } else {
            Digits::Approximate(significant.parse().ok()?)
        };

        Some(Self {
            negative,
            digits,
            fraction_digits: frac_part.len(),
        })
    }
}

fn apply_power(digits: Digits, power: i32) -> f64 {
    let base = match digits {
        Digits::Exact(n) => n as f64,
        Digits::Approximate(v) => v,
    };
    if base == 0.0 {
        return 0.0;
    }
    let shift = 10f64.powi(power.unsigned_abs().min(i32::MAX as u32) as i32);
    if power >= 0 {
        base * shift
    } else {
        base / shift
    }
}
