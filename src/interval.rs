use core::fmt;
use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const NANOS_PER_SEC: u128 = 1_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntervalError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration \"{0}\"")]
    Invalid(String),
    #[error("missing unit in duration \"{0}\"")]
    MissingUnit(String),
    #[error("unknown unit \"{unit}\" in duration \"{input}\"")]
    UnknownUnit { unit: String, input: String },
    #[error("duration \"{0}\" is out of range")]
    OutOfRange(String),
}

// Sampling period of the control loop.
// Parsed from and printed as a duration string such as
// "300ms", "30s", "1m30s" or "1.5h"
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Interval(Duration);

impl Interval {
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for Interval {
    type Err = IntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();

        if input.is_empty() {
            return Err(IntervalError::Empty);
        }

        // A bare zero is the only value allowed without a unit
        if input == "0" {
            return Ok(Self(Duration::ZERO));
        }

        let mut total: u128 = 0;
        let mut rest = input;

        while !rest.is_empty() {
            // Split the leading number from its unit
            let number_len = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(rest.len());
            let (number, tail) = rest.split_at(number_len);

            if number.is_empty() {
                return Err(IntervalError::Invalid(input.to_string()));
            }

            let unit_len = tail
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_len);

            if unit.is_empty() {
                return Err(IntervalError::MissingUnit(input.to_string()));
            }

            let scale = unit_nanos(unit).ok_or_else(|| {
                IntervalError::UnknownUnit {
                    unit: unit.to_string(),
                    input: input.to_string(),
                }
            })?;

            let value = scaled(number, scale)
                .ok_or_else(|| IntervalError::Invalid(input.to_string()))?;

            total = total
                .checked_add(value)
                .ok_or_else(|| IntervalError::OutOfRange(input.to_string()))?;

            rest = tail;
        }

        let secs = u64::try_from(total / NANOS_PER_SEC)
            .map_err(|_| IntervalError::OutOfRange(input.to_string()))?;
        let nanos = (total % NANOS_PER_SEC) as u32;

        Ok(Self(Duration::new(secs, nanos)))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        let nanos = self.0.subsec_nanos();

        if secs == 0 {
            return match nanos {
                0 => write!(f, "0s"),
                n if n % 1_000_000 == 0 => write!(f, "{}ms", n / 1_000_000),
                n if n % 1_000 == 0 => write!(f, "{}µs", n / 1_000),
                n => write!(f, "{n}ns"),
            };
        }

        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        if hours > 0 {
            write!(f, "{hours}h{minutes}m")?;
        } else if minutes > 0 {
            write!(f, "{minutes}m")?;
        }

        if nanos == 0 {
            write!(f, "{seconds}s")
        } else {
            let fraction = format!("{nanos:09}");
            write!(f, "{seconds}.{}s", fraction.trim_end_matches('0'))
        }
    }
}

impl TryFrom<String> for Interval {
    type Error = IntervalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.to_string()
    }
}

impl From<Duration> for Interval {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl From<Interval> for Duration {
    fn from(value: Interval) -> Self {
        value.0
    }
}

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3600 * NANOS_PER_SEC),
        _ => None,
    }
}

// Convert a decimal number of the given unit to nanoseconds,
// fractional digits past nanosecond precision are truncated
fn scaled(number: &str, scale: u128) -> Option<u128> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));

    if whole.is_empty() && fraction.is_empty() {
        return None;
    }

    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut value = whole.checked_mul(scale)?;

    if !fraction.is_empty() {
        let digits = &fraction[..fraction.len().min(18)];
        let fraction: u128 = digits.parse().ok()?;
        let divisor = 10u128.pow(digits.len() as u32);

        value = value.checked_add(fraction * scale / divisor)?;
    }

    Some(value)
}
