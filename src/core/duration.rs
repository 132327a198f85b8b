//! Compact duration syntax shared by configuration, tier files and the CLI
//!
//! Accepts strings like `30s`, `5m`, `2h`, `3d`, `1w` or `1h30m`.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.2.0: Table-driven parsing and formatting, minute/second pairs
//! - 1.1.0: Serde helpers for tier files
//! - 1.0.0: Extracted from the reminder command parser

use chrono::Duration;
use serde::{Deserialize, Deserializer};

/// Suffix, spoken name and length in seconds, largest first
const UNITS: [(char, &str, i64); 5] = [
    ('w', "week", 604_800),
    ('d', "day", 86_400),
    ('h', "hour", 3_600),
    ('m', "minute", 60),
    ('s', "second", 1),
];

/// Parse a time duration string like "30m", "2h", "1d", "1h30m"
///
/// Whitespace is ignored. Returns `None` for empty, zero or malformed input.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();

    let mut rest = compact.as_str();
    let mut total: i64 = 0;
    while !rest.is_empty() {
        let split = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if split == 0 {
            return None;
        }
        let (number, tail) = rest.split_at(split);

        let mut tail = tail.chars();
        let suffix = tail.next()?;
        let (_, _, unit) = UNITS.iter().find(|(c, _, _)| *c == suffix)?;
        let value: i64 = number.parse().ok()?;
        total = total.checked_add(value.checked_mul(*unit)?)?;
        rest = tail.as_str();
    }

    if total > 0 {
        Duration::try_seconds(total)
    } else {
        None
    }
}

/// Format a duration into a human-readable string
///
/// Shows the largest non-zero unit from days down to seconds, plus the next
/// unit when it is non-zero: "1 day 1 hour", "1 minute 30 seconds".
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds();
    let mut remaining = total.unsigned_abs();
    let counts: Vec<(&str, u64)> = UNITS[1..]
        .iter()
        .map(|(_, name, unit)| {
            let unit = unit.unsigned_abs();
            let count = remaining / unit;
            remaining %= unit;
            (*name, count)
        })
        .collect();

    let Some(lead) = counts.iter().position(|(_, count)| *count > 0) else {
        return "0 seconds".to_string();
    };

    let text = counts[lead..]
        .iter()
        .take(2)
        .filter(|(_, count)| *count > 0)
        .map(|(name, count)| format!("{count} {name}{}", if *count == 1 { "" } else { "s" }))
        .collect::<Vec<_>>()
        .join(" ");

    if total < 0 {
        format!("-{text}")
    } else {
        text
    }
}

/// Serde adapter for fields written in the compact duration syntax
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {raw:?}")))
}

/// Like [`deserialize_duration`] for optional fields (pair with `#[serde(default)]`)
pub fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_duration(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {raw:?}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::seconds(30)));
        assert_eq!(parse_duration("30m"), Some(Duration::minutes(30)));
        assert_eq!(parse_duration("2h"), Some(Duration::hours(2)));
        assert_eq!(parse_duration("1d"), Some(Duration::days(1)));
        assert_eq!(parse_duration("1w"), Some(Duration::weeks(1)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::minutes(90)));
        assert_eq!(parse_duration(" 3D "), Some(Duration::days(3)));
        assert_eq!(parse_duration("1h 30m"), Some(Duration::minutes(90)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration("invalid"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("0m"), None);
        assert_eq!(parse_duration("15"), None);
        assert_eq!(parse_duration("5x"), None);
        assert_eq!(parse_duration("m5"), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(30)), "30 seconds");
        assert_eq!(format_duration(Duration::seconds(1)), "1 second");
        assert_eq!(format_duration(Duration::minutes(1)), "1 minute");
        assert_eq!(format_duration(Duration::minutes(2)), "2 minutes");
        assert_eq!(format_duration(Duration::hours(1)), "1 hour");
        assert_eq!(format_duration(Duration::seconds(3660)), "1 hour 1 minute");
        assert_eq!(format_duration(Duration::days(1)), "1 day");
        assert_eq!(format_duration(Duration::hours(25)), "1 day 1 hour");
        assert_eq!(format_duration(Duration::weeks(1)), "7 days");
    }

    #[test]
    fn test_format_duration_pairs_adjacent_units() {
        assert_eq!(format_duration(Duration::seconds(90)), "1 minute 30 seconds");
        assert_eq!(format_duration(Duration::seconds(3_661)), "1 hour 1 minute");
        assert_eq!(format_duration(Duration::seconds(86_400 + 59)), "1 day");
        assert_eq!(format_duration(Duration::zero()), "0 seconds");
        assert_eq!(format_duration(Duration::milliseconds(500)), "0 seconds");
        assert_eq!(format_duration(Duration::minutes(-5)), "-5 minutes");
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert_eq!(parse_duration("99999999999999999999s"), None);
        assert_eq!(parse_duration("9223372036854775807w"), None);
    }
}
