//! Decision duration parsing.
//!
//! The decision API reports remaining ban time as a signed sequence of
//! decimal numbers with unit suffixes, e.g. `"4h3m2.5s"`, `"-1m"`, `"300ms"`.
//! Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `"0"` is
//! accepted; any other number must carry a unit.

use crate::error::DurationError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

/// A signed, nanosecond-precision duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignedDuration {
    nanos: i64,
}

impl SignedDuration {
    pub const ZERO: Self = Self { nanos: 0 };

    pub fn from_nanos(nanos: i64) -> Self {
        Self { nanos }
    }

    pub fn as_nanos(&self) -> i64 {
        self.nanos
    }

    pub fn is_negative(&self) -> bool {
        self.nanos < 0
    }

    /// Convert to a `std` duration; negative values clamp to zero.
    pub fn to_std(&self) -> Duration {
        u64::try_from(self.nanos)
            .map(Duration::from_nanos)
            .unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for SignedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negative() {
            write!(f, "-")?;
        }
        let d = Duration::from_nanos(self.nanos.unsigned_abs());
        write!(f, "{d:?}")
    }
}

impl FromStr for SignedDuration {
    type Err = DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s)
    }
}

/// Parse a duration string such as `"4h3m"` or `"-1.5h"`.
pub fn parse_duration(input: &str) -> Result<SignedDuration, DurationError> {
    if input.is_empty() {
        return Err(DurationError::Empty);
    }
    let invalid = || DurationError::Invalid(input.to_string());

    let (negative, mut rest) = match input.as_bytes()[0] {
        b'-' => (true, &input[1..]),
        b'+' => (false, &input[1..]),
        _ => (false, input),
    };

    if rest == "0" {
        return Ok(SignedDuration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        // Integer part.
        let int_len = leading_digits(rest);
        let int_part = &rest[..int_len];
        rest = &rest[int_len..];

        // Optional fraction.
        let mut frac_part = "";
        if let Some(after_dot) = rest.strip_prefix('.') {
            let frac_len = leading_digits(after_dot);
            frac_part = &after_dot[..frac_len];
            rest = &after_dot[frac_len..];
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        // Unit runs until the next digit or dot.
        let unit_len = rest
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(rest.len());
        if unit_len == 0 {
            return Err(DurationError::MissingUnit(input.to_string()));
        }
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];
        let scale = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;

        let overflow = || DurationError::Overflow(input.to_string());
        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| overflow())?
        };
        let mut nanos = whole.checked_mul(scale).ok_or_else(overflow)?;

        if !frac_part.is_empty() {
            // Digits beyond nanosecond precision of an hour cannot matter.
            let digits = &frac_part[..frac_part.len().min(20)];
            let numerator: u128 = digits.parse().map_err(|_| invalid())?;
            let denominator = 10u128.pow(digits.len() as u32);
            nanos = nanos
                .checked_add(numerator * scale / denominator)
                .ok_or_else(overflow)?;
        }

        total = total.checked_add(nanos).ok_or_else(overflow)?;
        if total > i64::MAX as u128 + u128::from(negative) {
            return Err(overflow());
        }
    }

    let nanos = if negative {
        // Bounded above by i64::MAX + 1, so the negation fits.
        (total as i128).wrapping_neg() as i64
    } else {
        total as i64
    };
    Ok(SignedDuration::from_nanos(nanos))
}

fn leading_digits(s: &str) -> usize {
    s.bytes().take_while(u8::is_ascii_digit).count()
}

fn unit_nanos(unit: &str) -> Option<u128> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => NANOS_PER_MICRO,
        "ms" => NANOS_PER_MILLI,
        "s" => NANOS_PER_SEC,
        "m" => 60 * NANOS_PER_SEC,
        "h" => 3600 * NANOS_PER_SEC,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: &str) -> f64 {
        parse_duration(s).unwrap().as_nanos() as f64 / 1e9
    }

    #[test]
    fn test_decision_api_formats() {
        assert_eq!(secs("4h0m0s"), 14_400.0);
        assert_eq!(secs("4h3m"), 14_580.0);
        assert_eq!(secs("3h59m58.912712016s"), 14_398.912712016);
        assert_eq!(secs("300ms"), 0.3);
        assert_eq!(secs("1.5h"), 5_400.0);
        assert_eq!(secs(".5s"), 0.5);
        assert_eq!(secs("1us"), 0.000_001);
        assert_eq!(secs("1µs"), 0.000_001);
        assert_eq!(secs("7ns"), 0.000_000_007);
    }

    #[test]
    fn test_signs() {
        assert_eq!(secs("-1m"), -60.0);
        assert_eq!(secs("+2s"), 2.0);
        assert!(parse_duration("-3h").unwrap().is_negative());
        assert_eq!(parse_duration("-3h").unwrap().to_std(), Duration::ZERO);
    }

    #[test]
    fn test_zero() {
        assert_eq!(parse_duration("0").unwrap(), SignedDuration::ZERO);
        assert_eq!(parse_duration("-0").unwrap(), SignedDuration::ZERO);
        assert_eq!(parse_duration("0s").unwrap(), SignedDuration::ZERO);
    }

    #[test]
    fn test_malformed() {
        assert_eq!(parse_duration(""), Err(DurationError::Empty));
        assert!(matches!(parse_duration("-"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_duration("abc"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_duration("."), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_duration("10"), Err(DurationError::MissingUnit(_))));
        assert!(matches!(parse_duration("4h3"), Err(DurationError::MissingUnit(_))));
        assert!(matches!(
            parse_duration("3d"),
            Err(DurationError::UnknownUnit { .. })
        ));
        assert!(matches!(
            parse_duration("99999999999999999999h"),
            Err(DurationError::Overflow(_))
        ));
        // The whole part fits u128 nanoseconds; the fraction pushes it past.
        assert!(matches!(
            parse_duration("94522879700260684295381835.9h"),
            Err(DurationError::Overflow(_))
        ));
    }

    #[test]
    fn test_ordering_and_display() {
        let a: SignedDuration = "1h".parse().unwrap();
        let b: SignedDuration = "59m".parse().unwrap();
        assert!(a > b);
        assert_eq!(a.to_std(), Duration::from_secs(3600));
        assert_eq!(a.to_string(), "3600s");
        assert_eq!(
            "-1s".parse::<SignedDuration>().unwrap().to_string(),
            "-1s"
        );
    }
}
