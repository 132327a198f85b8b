//! # Reminder Tier Table
//!
//! Ordered, immutable list of reminder offsets (farthest first) with their
//! matching tolerance. Validated once when the process starts; the window
//! matcher only ever sees a valid table.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.2.0: Derive tolerances from the trigger cadence
//! - 1.1.0: YAML tier files
//! - 1.0.0: Built-in 3d/2d/1d/6h/1h table

use crate::core::duration::{deserialize_duration, deserialize_optional_duration, format_duration};
use crate::core::error::{ReminderError, Result};
use chrono::Duration;
use serde::Deserialize;

/// Tolerance used by the built-in table
const STANDARD_TOLERANCE_MINUTES: i64 = 5;

/// A named offset-before-deadline reminder policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderTier {
    /// Stable key stored in a task's flag set (e.g. `3d`)
    pub name: String,
    /// Human text used in messages (e.g. `3 days`)
    pub label: String,
    /// How long before the deadline the reminder fires
    pub offset: Duration,
    /// Half-width of the matching window around `offset`
    pub tolerance: Duration,
}

impl ReminderTier {
    pub fn new(name: &str, label: &str, offset: Duration, tolerance: Duration) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            offset,
            tolerance,
        }
    }

    /// Whether `until_deadline` lies in `[offset - tolerance, offset + tolerance]`
    pub fn window_contains(&self, until_deadline: Duration) -> bool {
        (until_deadline - self.offset).abs() <= self.tolerance
    }
}

/// One entry in a YAML tier file
#[derive(Debug, Clone, Deserialize)]
struct TierEntry {
    name: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(deserialize_with = "deserialize_duration")]
    offset: Duration,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    tolerance: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize)]
struct TierFile {
    tiers: Vec<TierEntry>,
}

/// Validated, ordered tier list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    tiers: Vec<ReminderTier>,
}

impl TierTable {
    /// Build a table, rejecting anything that could match two tiers at once
    pub fn new(tiers: Vec<ReminderTier>) -> Result<Self> {
        let table = Self { tiers };
        table.validate()?;
        Ok(table)
    }

    /// Build a table whose tolerances are derived from the trigger cadence
    ///
    /// Each window is made exactly as wide as the interval (rounded up to a
    /// whole second), so at least one invocation lands inside every window.
    pub fn with_cadence(offsets: &[(&str, Duration)], interval: Duration) -> Result<Self> {
        let tolerance = cadence_tolerance(interval)?;
        let tiers = offsets
            .iter()
            .map(|(name, offset)| ReminderTier::new(name, &format_duration(*offset), *offset, tolerance))
            .collect();
        Self::new(tiers)
    }

    /// Built-in table: 3 days, 2 days, 1 day, 6 hours, 1 hour, all ±5 minutes
    pub fn standard() -> Self {
        let tolerance = Duration::minutes(STANDARD_TOLERANCE_MINUTES);
        Self {
            tiers: vec![
                ReminderTier::new("3d", "3 days", Duration::days(3), tolerance),
                ReminderTier::new("2d", "2 days", Duration::days(2), tolerance),
                ReminderTier::new("1d", "1 day", Duration::days(1), tolerance),
                ReminderTier::new("6h", "6 hours", Duration::hours(6), tolerance),
                ReminderTier::new("1h", "1 hour", Duration::hours(1), tolerance),
            ],
        }
    }

    /// Load a tier table from a YAML file
    ///
    /// Tiers without an explicit tolerance get one derived from `interval`.
    pub fn load(path: &str, interval: Duration) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ReminderError::config(format!("cannot read tier file {path}: {e}")))?;
        Self::from_yaml(&contents, interval)
    }

    /// Parse a tier table from YAML text
    pub fn from_yaml(contents: &str, interval: Duration) -> Result<Self> {
        let file: TierFile = serde_yaml::from_str(contents)
            .map_err(|e| ReminderError::config(format!("invalid tier file: {e}")))?;

        let mut tiers = Vec::with_capacity(file.tiers.len());
        for entry in file.tiers {
            let tolerance = match entry.tolerance {
                Some(tolerance) => tolerance,
                None => cadence_tolerance(interval)?,
            };
            let label = entry.label.unwrap_or_else(|| format_duration(entry.offset));
            tiers.push(ReminderTier::new(&entry.name, &label, entry.offset, tolerance));
        }

        Self::new(tiers)
    }

    fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(ReminderError::config("tier table must contain at least one tier"));
        }

        for (i, tier) in self.tiers.iter().enumerate() {
            if tier.name.is_empty()
                || !tier
                    .name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            {
                return Err(ReminderError::config(format!(
                    "tier name must be lowercase letters, digits or underscores: {:?}",
                    tier.name
                )));
            }

            if self.tiers[..i].iter().any(|t| t.name == tier.name) {
                return Err(ReminderError::config(format!("duplicate tier name: {}", tier.name)));
            }

            if tier.offset <= Duration::zero() {
                return Err(ReminderError::config(format!(
                    "tier {} must have a positive offset",
                    tier.name
                )));
            }

            if tier.tolerance <= Duration::zero() || tier.tolerance >= tier.offset {
                return Err(ReminderError::config(format!(
                    "tier {} tolerance must be positive and smaller than its offset",
                    tier.name
                )));
            }
        }

        for pair in self.tiers.windows(2) {
            let (farther, nearer) = (&pair[0], &pair[1]);
            if farther.offset <= nearer.offset {
                return Err(ReminderError::config(format!(
                    "tier offsets must be strictly decreasing ({} then {})",
                    farther.name, nearer.name
                )));
            }

            let gap = farther.offset - nearer.offset;
            for tier in [farther, nearer] {
                if tier.tolerance * 2 >= gap {
                    return Err(ReminderError::config(format!(
                        "tier {} tolerance ({}) must be under half the gap between {} and {} ({})",
                        tier.name,
                        format_duration(tier.tolerance),
                        farther.name,
                        nearer.name,
                        format_duration(gap)
                    )));
                }
            }
        }

        Ok(())
    }

    /// Reject tolerances too narrow for the trigger cadence
    ///
    /// A window narrower than the interval between invocations can be
    /// skipped entirely.
    pub fn validate_cadence(&self, interval: Duration) -> Result<()> {
        for tier in &self.tiers {
            if tier.tolerance * 2 < interval {
                return Err(ReminderError::config(format!(
                    "tier {} window ({} wide) is narrower than the trigger interval ({})",
                    tier.name,
                    format_duration(tier.tolerance * 2),
                    format_duration(interval)
                )));
            }
        }
        Ok(())
    }

    /// Tiers in farthest-to-nearest order
    pub fn iter(&self) -> std::slice::Iter<'_, ReminderTier> {
        self.tiers.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ReminderTier> {
        self.tiers.iter().find(|t| t.name == name)
    }

    /// Default candidate lookahead: farthest offset plus its tolerance
    pub fn scan_window(&self) -> Duration {
        self.tiers
            .first()
            .map(|t| t.offset + t.tolerance)
            .unwrap_or_else(Duration::zero)
    }

    /// Width (2 × tolerance) of the widest matching window
    pub fn widest_window(&self) -> Duration {
        self.tiers
            .iter()
            .map(|t| t.tolerance * 2)
            .max()
            .unwrap_or_else(Duration::zero)
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl<'a> IntoIterator for &'a TierTable {
    type Item = &'a ReminderTier;
    type IntoIter = std::slice::Iter<'a, ReminderTier>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn cadence_tolerance(interval: Duration) -> Result<Duration> {
    if interval <= Duration::zero() {
        return Err(ReminderError::config("trigger interval must be positive"));
    }
    Ok(Duration::seconds((interval.num_seconds() + 1) / 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(name: &str, offset: Duration, tolerance: Duration) -> ReminderTier {
        ReminderTier::new(name, name, offset, tolerance)
    }

    #[test]
    fn test_standard_table_is_valid() {
        let table = TierTable::standard();
        assert!(table.validate().is_ok());
        assert!(table.validate_cadence(Duration::minutes(5)).is_ok());
        let names: Vec<_> = table.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["3d", "2d", "1d", "6h", "1h"]);
    }

    #[test]
    fn test_scan_window() {
        let table = TierTable::standard();
        assert_eq!(table.scan_window(), Duration::days(3) + Duration::minutes(5));
        assert_eq!(table.widest_window(), Duration::minutes(10));
    }

    #[test]
    fn test_window_contains_is_closed_interval() {
        let t = tier("1h", Duration::hours(1), Duration::minutes(2));
        assert!(t.window_contains(Duration::hours(1)));
        assert!(t.window_contains(Duration::minutes(62)));
        assert!(t.window_contains(Duration::minutes(58)));
        assert!(!t.window_contains(Duration::minutes(62) + Duration::seconds(1)));
        assert!(!t.window_contains(Duration::minutes(57)));
    }

    #[test]
    fn test_rejects_empty_table() {
        assert!(TierTable::new(vec![]).is_err());
    }

    #[test]
    fn test_rejects_non_decreasing_offsets() {
        let result = TierTable::new(vec![
            tier("1d", Duration::days(1), Duration::minutes(5)),
            tier("3d", Duration::days(3), Duration::minutes(5)),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_overlapping_windows() {
        // 30m apart with 15m tolerance: a single instant could match both
        let result = TierTable::new(vec![
            tier("90m", Duration::minutes(90), Duration::minutes(15)),
            tier("1h", Duration::hours(1), Duration::minutes(5)),
        ]);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("90m"), "unexpected error: {err}");
    }

    #[test]
    fn test_rejects_tolerance_reaching_deadline() {
        let result = TierTable::new(vec![tier("10m", Duration::minutes(10), Duration::minutes(10))]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(TierTable::new(vec![tier("3 days", Duration::days(3), Duration::minutes(5))]).is_err());
        assert!(TierTable::new(vec![tier("", Duration::days(3), Duration::minutes(5))]).is_err());
        assert!(TierTable::new(vec![
            tier("x", Duration::days(3), Duration::minutes(5)),
            tier("x", Duration::days(1), Duration::minutes(5)),
        ])
        .is_err());
    }

    #[test]
    fn test_cadence_validation() {
        let table = TierTable::standard();
        // 10 minute windows cannot be guaranteed a hit every 15 minutes
        assert!(table.validate_cadence(Duration::minutes(15)).is_err());
        assert!(table.validate_cadence(Duration::minutes(10)).is_ok());
    }

    #[test]
    fn test_with_cadence_derives_tolerance() {
        let table = TierTable::with_cadence(
            &[("1d", Duration::days(1)), ("1h", Duration::hours(1))],
            Duration::seconds(61),
        )
        .unwrap();
        for t in &table {
            assert_eq!(t.tolerance, Duration::seconds(31));
        }
        assert!(table.validate_cadence(Duration::seconds(61)).is_ok());
        assert_eq!(table.get("1d").unwrap().label, "1 day");
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
tiers:
  - name: 3d
    label: three days
    offset: 3d
    tolerance: 5m
  - name: 1h
    offset: 1h
"#;
        let table = TierTable::from_yaml(yaml, Duration::minutes(2)).unwrap();
        assert_eq!(table.len(), 2);

        let far = table.get("3d").unwrap();
        assert_eq!(far.label, "three days");
        assert_eq!(far.tolerance, Duration::minutes(5));

        let near = table.get("1h").unwrap();
        assert_eq!(near.label, "1 hour");
        assert_eq!(near.tolerance, Duration::minutes(1));
    }

    #[test]
    fn test_from_yaml_rejects_bad_duration() {
        let yaml = "tiers:\n  - name: soon\n    offset: tomorrow\n";
        let err = TierTable::from_yaml(yaml, Duration::minutes(5)).unwrap_err();
        assert!(matches!(err, ReminderError::Configuration(_)));
    }
}
