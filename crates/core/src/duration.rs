//! Duration strings used in config and sample files.
//!
//! Accepts an optional sign followed by one or more `<decimal><unit>` groups,
//! e.g. `"90s"`, `"1h30m"`, `"1.5h"`, `"-250ms"`. Recognised units are
//! `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`, `d` and `w`. A bare `"0"` is
//! zero.

use std::time::Duration;

use chrono::TimeDelta;

use crate::error::{ConfigError, Result};

const NANOS_PER_SEC: i128 = 1_000_000_000;

fn unit_nanos(unit: &str) -> Option<i128> {
    let nanos = match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => NANOS_PER_SEC,
        "m" => 60 * NANOS_PER_SEC,
        "h" => 3_600 * NANOS_PER_SEC,
        "d" => 86_400 * NANOS_PER_SEC,
        "w" => 604_800 * NANOS_PER_SEC,
        _ => return None,
    };
    Some(nanos)
}

fn invalid(input: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidDuration {
        input: input.to_string(),
        reason: reason.into(),
    }
}

/// Parse a duration string into a signed [`TimeDelta`].
pub fn parse_duration(input: &str) -> Result<TimeDelta> {
    let trimmed = input.trim();
    let (negative, mut rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    if rest == "0" {
        return Ok(TimeDelta::zero());
    }
    if rest.is_empty() {
        return Err(invalid(input, "empty duration"));
    }

    let mut total: i128 = 0;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..number_end];
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        if number.is_empty() || number == "." {
            return Err(invalid(input, "expected a number"));
        }
        if unit.is_empty() {
            return Err(invalid(input, format!("missing unit after '{number}'")));
        }
        let scale = unit_nanos(unit).ok_or_else(|| invalid(input, format!("unknown unit '{unit}'")))?;

        total += scaled(input, number, scale)?;
        if total > i64::MAX as i128 {
            return Err(invalid(input, "overflow"));
        }
    }

    let nanos = if negative { -total } else { total };
    Ok(TimeDelta::nanoseconds(nanos as i64))
}

/// `whole.fraction * scale` in integer arithmetic, truncating below 1ns.
fn scaled(input: &str, number: &str, scale: i128) -> Result<i128> {
    let (whole, fraction) = match number.split_once('.') {
        Some((w, f)) => (w, f),
        None => (number, ""),
    };
    if fraction.contains('.') {
        return Err(invalid(input, format!("malformed number '{number}'")));
    }

    let whole: i128 = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u64>()
            .map_err(|_| invalid(input, format!("malformed number '{number}'")))?
            .into()
    };

    let mut value = whole
        .checked_mul(scale)
        .ok_or_else(|| invalid(input, "overflow"))?;

    // Nanosecond resolution needs at most 18 fractional digits.
    let digits = &fraction[..fraction.len().min(18)];
    if !digits.is_empty() {
        let frac: i128 = digits
            .parse::<u64>()
            .map_err(|_| invalid(input, format!("malformed number '{number}'")))?
            .into();
        value += frac * scale / 10i128.pow(digits.len() as u32);
    }

    Ok(value)
}

/// Parse a duration that must not be negative.
pub fn parse_std_duration(input: &str) -> Result<Duration> {
    let delta = parse_duration(input)?;
    delta
        .to_std()
        .map_err(|_| invalid(input, "must not be negative"))
}

/// Serde adapter for `std::time::Duration` fields written as duration
/// strings. Integers are read as whole seconds.
pub mod serde_str {
    use std::fmt;
    use std::time::Duration;

    use serde::de::{self, Visitor};
    use serde::Deserializer;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a duration such as \"30s\" or \"1h30m\"")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
            super::parse_std_duration(v).map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom(format!("duration must not be negative: {v}")))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DurationVisitor)
    }

    /// Same as [`deserialize`], for optional fields.
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer};

        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "super")] Duration);

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
        }
    }
}
