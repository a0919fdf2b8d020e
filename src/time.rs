//! Retention threshold parsing and age filtering.

use crate::error::{Result, SweepError};
use chrono::{DateTime, Local};
use std::time::{Duration, SystemTime};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Default retention: roughly six months.
pub const DEFAULT_RETENTION_DAYS: u64 = 182;

/// Files must be strictly older than `cutoff` to be compressed.
#[derive(Debug, Clone, Copy)]
pub struct RetentionFilter {
    threshold: Duration,
    cutoff: SystemTime,
}

impl RetentionFilter {
    /// Build a filter whose cutoff is `threshold` before the current time.
    pub fn new(threshold: Duration) -> Result<Self> {
        Self::at(threshold, SystemTime::now())
    }

    /// Build a filter relative to an explicit point in time.
    pub fn at(threshold: Duration, now: SystemTime) -> Result<Self> {
        if threshold < Duration::from_secs(SECS_PER_DAY) {
            return Err(SweepError::config(format!(
                "retention threshold must be at least one day, got {}s",
                threshold.as_secs()
            )));
        }
        let cutoff = now.checked_sub(threshold).ok_or_else(|| {
            SweepError::config(format!(
                "retention threshold of {} days reaches before the epoch",
                threshold.as_secs() / SECS_PER_DAY
            ))
        })?;
        Ok(RetentionFilter { threshold, cutoff })
    }

    pub fn from_days(days: u64) -> Result<Self> {
        Self::new(Duration::from_secs(days.saturating_mul(SECS_PER_DAY)))
    }

    /// Returns true if a file modified at `modified_time` is old enough to compress
    pub fn passes(&self, modified_time: SystemTime) -> bool {
        modified_time < self.cutoff
    }

    pub fn cutoff(&self) -> SystemTime {
        self.cutoff
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn threshold_days(&self) -> u64 {
        self.threshold.as_secs() / SECS_PER_DAY
    }

    /// Cutoff rendered in local time, for logs and the run summary.
    pub fn cutoff_display(&self) -> String {
        let local: DateTime<Local> = self.cutoff.into();
        local.format("%Y-%m-%d %H:%M").to_string()
    }
}

/// Per-category counts gathered while classifying matching files
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AgeStats {
    pub matched: usize,
    pub eligible: usize,
    pub too_young: usize,
}

/// Parse a duration string with optional unit suffix
/// Supports: h (hours), d (days), w (weeks), m (months)
/// Plain numbers are days, e.g. "182", "182d", "26w", "6m", "48h"
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim();

    let (num_str, unit) = if let Some(pos) = duration_str.find(|c: char| c.is_alphabetic()) {
        let (num, unit) = duration_str.split_at(pos);
        (num, Some(unit))
    } else {
        (duration_str, None)
    };

    let value: u64 = num_str.trim().parse().map_err(|_| {
        SweepError::config(format!(
            "invalid retention '{}': expected a number, got '{}'",
            duration_str, num_str
        ))
    })?;

    let unit_secs = match unit {
        None | Some("d") | Some("D") => SECS_PER_DAY,
        Some("h") | Some("H") => 60 * 60,
        Some("w") | Some("W") => 7 * SECS_PER_DAY,
        // Months are approximated as 30 days
        Some("m") | Some("M") => 30 * SECS_PER_DAY,
        Some(unknown) => {
            return Err(SweepError::config(format!(
                "invalid retention unit '{}'. Supported units: h (hours), d (days), w (weeks), m (months)",
                unknown
            )));
        }
    };

    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| SweepError::config(format!("retention '{}' is too large", duration_str)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: u64 = SECS_PER_DAY;

    #[test]
    fn test_parse_duration_default_days() {
        let duration = parse_duration("182").unwrap();
        assert_eq!(duration.as_secs(), 182 * DAY);
    }

    #[test]
    fn test_parse_duration_explicit_days() {
        assert_eq!(parse_duration("15d").unwrap().as_secs(), 15 * DAY);
        assert_eq!(parse_duration("15D").unwrap().as_secs(), 15 * DAY);
    }

    #[test]
    fn test_parse_duration_hours() {
        assert_eq!(parse_duration("48h").unwrap().as_secs(), 48 * 60 * 60);
    }

    #[test]
    fn test_parse_duration_weeks() {
        assert_eq!(parse_duration("26w").unwrap().as_secs(), 26 * 7 * DAY);
    }

    #[test]
    fn test_parse_duration_months() {
        assert_eq!(parse_duration("6m").unwrap().as_secs(), 6 * 30 * DAY);
    }

    #[test]
    fn test_parse_duration_with_whitespace() {
        assert_eq!(parse_duration("  15d  ").unwrap().as_secs(), 15 * DAY);
    }

    #[test]
    fn test_parse_duration_invalid_unit() {
        let err = parse_duration("15x").unwrap_err();
        assert!(err.to_string().contains("invalid retention unit"));
    }

    #[test]
    fn test_parse_duration_invalid_number() {
        let err = parse_duration("abc").unwrap_err();
        assert!(err.to_string().contains("expected a number"));
    }

    #[test]
    fn test_parse_duration_negative_rejected() {
        assert!(parse_duration("-5").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        let err = parse_duration("18446744073709551615w").unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_filter_rejects_zero_threshold() {
        let err = RetentionFilter::from_days(0).unwrap_err();
        assert!(matches!(err, SweepError::Configuration(_)));
    }

    #[test]
    fn test_filter_rejects_sub_day_threshold() {
        assert!(RetentionFilter::new(Duration::from_secs(48 * 60)).is_err());
    }

    #[test]
    fn test_filter_passes_old_file() {
        let now = SystemTime::now();
        let filter = RetentionFilter::at(Duration::from_secs(182 * DAY), now).unwrap();
        assert!(filter.passes(now - Duration::from_secs(200 * DAY)));
    }

    #[test]
    fn test_filter_rejects_young_file() {
        let now = SystemTime::now();
        let filter = RetentionFilter::at(Duration::from_secs(182 * DAY), now).unwrap();
        assert!(!filter.passes(now - Duration::from_secs(10 * DAY)));
    }

    #[test]
    fn test_filter_cutoff_is_exclusive() {
        let now = SystemTime::now();
        let filter = RetentionFilter::at(Duration::from_secs(182 * DAY), now).unwrap();
        assert!(!filter.passes(filter.cutoff()));
        assert!(filter.passes(filter.cutoff() - Duration::from_secs(1)));
    }

    #[test]
    fn test_filter_threshold_days() {
        let filter = RetentionFilter::from_days(DEFAULT_RETENTION_DAYS).unwrap();
        assert_eq!(filter.threshold_days(), 182);
        assert_eq!(filter.threshold().as_secs(), 182 * DAY);
    }

    #[test]
    fn test_age_stats_default() {
        let stats = AgeStats::default();
        assert_eq!(stats.matched, 0);
        assert_eq!(stats.eligible, 0);
        assert_eq!(stats.too_young, 0);
    }
}
