//! Frequency grammar (`"5min"`, `"1h"`, …), timestamp formatting/parsing,
//! and half-open window slicing.

use chrono::{DateTime, Duration, TimeZone, Utc};

/// A parsed frequency value, e.g. `5min`, `1h`, `2d`, `1w`, `3m` (30-day months).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frequency {
    pub value: i64,
    pub unit: Unit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

impl Frequency {
    /// Parse `<integer><unit>` where unit is one of `s`, `min`, `h`, `d`,
    /// `w`, `m`. `m` means 30-day months for interval arithmetic.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let split_at = s.find(|c: char| !c.is_ascii_digit())?;
        let (num, unit) = s.split_at(split_at);
        let value: i64 = num.parse().ok()?;
        let unit = match unit {
            "s" => Unit::Seconds,
            "min" => Unit::Minutes,
            "h" => Unit::Hours,
            "d" => Unit::Days,
            "w" => Unit::Weeks,
            "m" => Unit::Months,
            _ => return None,
        };
        Some(Self { value, unit })
    }

    /// Convert to a `chrono::Duration`. Months are modeled as fixed 30-day
    /// intervals rather than calendar months, so a month-denominated window
    /// always has a constant length.
    pub fn to_duration(self) -> Duration {
        match self.unit {
            Unit::Seconds => Duration::seconds(self.value),
            Unit::Minutes => Duration::minutes(self.value),
            Unit::Hours => Duration::hours(self.value),
            Unit::Days => Duration::days(self.value),
            Unit::Weeks => Duration::weeks(self.value),
            Unit::Months => Duration::days(self.value * 30),
        }
    }

    /// The query-parameter unit token used by relative-window range keys
    /// (e.g. `hours=3`).
    pub fn query_unit_name(self) -> &'static str {
        match self.unit {
            Unit::Seconds => "seconds",
            Unit::Minutes => "minutes",
            Unit::Hours => "hours",
            Unit::Days => "days",
            Unit::Weeks => "weeks",
            Unit::Months => "months",
        }
    }
}

/// Format an instant per a configured format string. The sentinel `%s`
/// (an exact match, not merely contained in the pattern) means integer
/// seconds-since-epoch; any other pattern is treated as strftime.
pub fn format_timestamp(instant: DateTime<Utc>, format: &str) -> String {
    if format == "%s" {
        return instant.timestamp().to_string();
    }
    instant.format(format).to_string()
}

/// Parse a timestamp string with the same `%s`-sentinel rule as
/// [`format_timestamp`].
pub fn parse_timestamp(s: &str, format: &str) -> Option<DateTime<Utc>> {
    if format == "%s" {
        let secs: i64 = s.parse().ok()?;
        return Utc.timestamp_opt(secs, 0).single();
    }
    let naive = chrono::NaiveDateTime::parse_from_str(s, format).ok()?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

/// A half-open `[start, end)` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// Split `[start, end)` into the maximal list of consecutive half-open
    /// sub-windows of size `subwindow`, the final one possibly shorter. If
    /// `subwindow` is `None` or larger than the whole range, a single
    /// interval covering the range is emitted.
    pub fn slices(start: DateTime<Utc>, end: DateTime<Utc>, subwindow: Option<Duration>) -> Vec<Window> {
        if start >= end {
            return Vec::new();
        }
        let Some(sub) = subwindow else {
            return vec![Window { start, end }];
        };
        if sub <= Duration::zero() || sub >= end - start {
            return vec![Window { start, end }];
        }

        let mut out = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let next = (cursor + sub).min(end);
            out.push(Window {
                start: cursor,
                end: next,
            });
            cursor = next;
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_units() {
        assert_eq!(Frequency::parse("5min"), Some(Frequency { value: 5, unit: Unit::Minutes }));
        assert_eq!(Frequency::parse("1h"), Some(Frequency { value: 1, unit: Unit::Hours }));
        assert_eq!(Frequency::parse("30s"), Some(Frequency { value: 30, unit: Unit::Seconds }));
        assert_eq!(Frequency::parse("2d"), Some(Frequency { value: 2, unit: Unit::Days }));
        assert_eq!(Frequency::parse("1w"), Some(Frequency { value: 1, unit: Unit::Weeks }));
        assert_eq!(Frequency::parse("3m"), Some(Frequency { value: 3, unit: Unit::Months }));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert_eq!(Frequency::parse("5y"), None);
    }

    #[test]
    fn months_are_30_days() {
        let f = Frequency::parse("1m").unwrap();
        assert_eq!(f.to_duration(), Duration::days(30));
    }

    #[test]
    fn sentinel_percent_s_is_exact_match_only() {
        let t = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        assert_eq!(format_timestamp(t, "%s"), "1700000000");
        // a pattern merely containing %s is NOT treated as the sentinel
        assert_ne!(format_timestamp(t, "ts=%s"), "1700000000");
    }

    #[test]
    fn format_and_parse_roundtrip_rfc_like() {
        let fmt = "%Y-%m-%dT%H:%M:%SZ";
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap();
        let s = format_timestamp(t, fmt);
        assert_eq!(s, "2025-01-01T03:00:00Z");
        assert_eq!(parse_timestamp(&s, fmt), Some(t));
    }

    #[test]
    fn window_join_law() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mid = Utc.with_ymd_and_hms(2025, 1, 1, 1, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap();

        let whole = Window::slices(start, end, None);
        let left = Window::slices(start, mid, None);
        let right = Window::slices(mid, end, None);

        assert_eq!(whole.len(), 1);
        assert_eq!(whole[0].start, left[0].start);
        assert_eq!(left[0].end, right[0].start);
        assert_eq!(right[0].end, whole[0].end);
    }

    #[test]
    fn slices_cover_range_with_short_final_interval() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap();
        let windows = Window::slices(start, end, Some(Duration::hours(1)));
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].start, start);
        assert_eq!(windows[2].end, end);
        for w in &windows {
            assert!(w.start < w.end);
        }
    }

    #[test]
    fn subwindow_larger_than_range_yields_single_unit() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 1, 1, 0, 0).unwrap();
        let windows = Window::slices(start, end, Some(Duration::hours(5)));
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0], Window { start, end });
    }

    #[test]
    fn empty_range_yields_no_windows() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert!(Window::slices(t, t, None).is_empty());
    }
}
