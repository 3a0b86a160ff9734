//! Human-readable durations such as `200ms`, `5s` or `1m30s`.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Parses a duration string made of one or more `<number><unit>` segments.
///
/// Supported units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. Numbers
/// may have a fractional part (`1.5s`). A bare `0` is accepted.
///
/// # Errors
///
/// Returns a description of the problem if the string is empty, has a
/// segment without a unit, or uses an unknown unit.
///
/// # Examples
///
/// ```
/// use shared::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        if number_len == 0 {
            return Err(format!("expected a number in duration {input:?}"));
        }
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid number {number:?} in duration {input:?}"))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let nanos_per_unit = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            other => return Err(format!("unknown unit {other:?} in duration {input:?}")),
        };

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let nanos = (value * nanos_per_unit).round() as u64;
        total += Duration::from_nanos(nanos);
        rest = tail;
    }
    Ok(total)
}

/// Formats a duration using the largest units that represent it exactly.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }
    if duration.subsec_nanos() != 0 {
        if duration.subsec_nanos() % 1_000_000 == 0 && duration.as_secs() == 0 {
            return format!("{}ms", duration.subsec_millis());
        }
        return format!("{}ms", duration.as_secs_f64() * 1e3);
    }

    let mut secs = duration.as_secs();
    let mut out = String::new();
    for (unit, size) in [("h", 3600), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{unit}", secs / size));
            secs %= size;
        }
    }
    out
}

/// Serde adapter for `Duration` fields written as duration strings.
///
/// ```ignore
/// #[serde(with = "crate::config::duration")]
/// timeout: Duration,
/// ```
///
/// # Errors
///
/// Fails deserialization if the value is not a valid duration string.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Serializes a `Duration` as a duration string.
///
/// # Errors
///
/// Propagates serializer errors.
#[allow(clippy::trivially_copy_pass_by_ref)]
pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(*duration))
}
