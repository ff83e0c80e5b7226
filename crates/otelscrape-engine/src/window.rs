//! Window Planner (§4.5): turns one source's configuration plus its
//! persisted `last_success` into the work units a tick must execute, and
//! the outer bound `last_success` advances to when every unit succeeds.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use otelscrape_common::config::{RangeKeys, ScrapeMode, SourceConfig};
use otelscrape_common::time::{format_timestamp, Frequency, Unit, Window};

/// One request's time-bound query contribution. `encoded` goes through the
/// HTTP client's normal (percent-encoding) query serialization; `raw` is a
/// literal `key=value` fragment appended straight to the URL, for APIs that
/// require reserved characters verbatim (e.g. `created[gte]=...`).
#[derive(Debug, Clone, Default)]
pub struct TimeQuery {
    pub encoded: Vec<(String, String)>,
    pub raw: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub time_query: TimeQuery,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub units: Vec<WorkUnit>,
    /// The outer bound `last_success` advances to if every unit in this
    /// plan succeeds. `None` for instant mode and relative-keys range mode,
    /// neither of which persists a start boundary.
    pub advance_to: Option<DateTime<Utc>>,
    /// True when the tick was skipped outright (overlap policy), in which
    /// case `units` is empty and nothing should be attempted.
    pub skipped: bool,
}

impl Plan {
    fn skipped() -> Self {
        Self { units: Vec::new(), advance_to: None, skipped: true }
    }
}

/// Build the plan for one tick. `in_flight` reflects whether a previous
/// scrape for this source is still running; combined with
/// `allow_overlap_scans` this implements the admission check from §4.6 step 1.
/// `default_allow_overlap` is `scraper.allowOverlapScans`, used when the
/// source does not override it.
pub fn plan(
    source: &SourceConfig,
    default_time_format: &str,
    last_success: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    in_flight: bool,
    default_allow_overlap: bool,
) -> Plan {
    let allow_overlap = source.allow_overlap_scans.unwrap_or(default_allow_overlap);
    if in_flight && !allow_overlap {
        return Plan::skipped();
    }

    match source.mode {
        ScrapeMode::Instant => Plan {
            units: vec![WorkUnit { time_query: TimeQuery::default() }],
            advance_to: None,
            skipped: false,
        },
        ScrapeMode::Range => plan_range(source, default_time_format, last_success, now),
    }
}

fn plan_range(source: &SourceConfig, default_time_format: &str, last_success: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Plan {
    let Some(range_keys) = &source.range_keys else {
        // Config validation rejects `mode: range` without `rangeKeys` before the
        // engine ever ticks; fall back to a single instant-shaped unit defensively.
        return Plan { units: vec![WorkUnit { time_query: TimeQuery::default() }], advance_to: None, skipped: false };
    };

    match range_keys {
        RangeKeys::Explicit { start_key, end_key, url_encode_time_keys } => {
            plan_explicit(source, default_time_format, last_success, now, start_key, end_key, *url_encode_time_keys)
        }
        RangeKeys::Relative { unit, value, take_negative } => plan_relative(unit, value, *take_negative, source),
    }
}

#[allow(clippy::too_many_arguments)]
fn plan_explicit(
    source: &SourceConfig,
    default_time_format: &str,
    last_success: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    start_key: &str,
    end_key: &str,
    url_encode: bool,
) -> Plan {
    let format = source.time_format.as_deref().unwrap_or(default_time_format);

    let start = last_success
        .or_else(|| source.first_scrape_start.as_deref().and_then(|s| otelscrape_common::time::parse_timestamp(s, format)))
        .unwrap_or_else(|| now - fallback_lookback(source));
    let end = now;

    if start >= end {
        return Plan { units: Vec::new(), advance_to: Some(end), skipped: false };
    }

    let subwindow = source.parallel_window.as_ref().map(|pw| {
        Frequency { value: i64::try_from(pw.value).unwrap_or(i64::MAX), unit: parse_unit(&pw.unit) }.to_duration()
    });

    let units = Window::slices(start, end, subwindow)
        .into_iter()
        .map(|w| {
            let start_s = format_timestamp(w.start, format);
            let end_s = format_timestamp(w.end, format);
            let time_query = if url_encode {
                TimeQuery { encoded: vec![(start_key.to_string(), start_s), (end_key.to_string(), end_s)], raw: Vec::new() }
            } else {
                TimeQuery { encoded: Vec::new(), raw: vec![(start_key.to_string(), start_s), (end_key.to_string(), end_s)] }
            };
            WorkUnit { time_query }
        })
        .collect();

    Plan { units, advance_to: Some(end), skipped: false }
}

fn plan_relative(unit: &str, value: &str, take_negative: bool, source: &SourceConfig) -> Plan {
    let resolved_value = if value == "from-config" {
        Frequency::parse(&source.frequency).map_or_else(|| value.to_string(), |f| f.value.to_string())
    } else {
        value.to_string()
    };
    let rendered = if take_negative { format!("-{resolved_value}") } else { resolved_value };

    Plan {
        units: vec![WorkUnit { time_query: TimeQuery { encoded: vec![(unit.to_string(), rendered)], raw: Vec::new() } }],
        advance_to: None,
        skipped: false,
    }
}

fn fallback_lookback(source: &SourceConfig) -> ChronoDuration {
    Frequency::parse(&source.frequency).map_or_else(ChronoDuration::zero, Frequency::to_duration)
}

fn parse_unit(s: &str) -> Unit {
    match s {
        "seconds" | "s" => Unit::Seconds,
        "hours" | "h" => Unit::Hours,
        "days" | "d" => Unit::Days,
        "weeks" | "w" => Unit::Weeks,
        "months" | "m" => Unit::Months,
        _ => Unit::Minutes,
    }
}
