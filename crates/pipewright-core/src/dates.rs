//! Relative date resolution.
//!
//! Two kinds of symbolic dates are resolved against a [`Clock`]:
//!
//! - Placeholders: `now`, `now+30d`, `now-7d`, anywhere in a JSON tree.
//! - Presets: `YTD`, `QTD` and `MTD`, expanded into a `{start, end}` range.
//!
//! Resolved instants are ISO-8601 strings with millisecond precision, the same
//! representation the store uses for timestamps. A placeholder under `$gte` is
//! moved to the start of its day and one under `$lte` to the last millisecond
//! of its day, so day-granularity filters include both end days.

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;

use crate::clock::Clock;

/// Which end of a day an instant is rounded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBound {
    /// 00:00:00.000.
    Start,
    /// 23:59:59.999.
    End,
    /// No rounding.
    Exact,
}

impl DateBound {
    /// The rounding implied by the operator key a value sits under.
    pub fn for_key(key: Option<&str>) -> Self {
        match key {
            Some("$gte") => Self::Start,
            Some("$lte") => Self::End,
            _ => Self::Exact,
        }
    }

    /// Apply this rounding to `instant`.
    pub fn apply(self, instant: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Start => start_of_day(instant.date_naive()),
            Self::End => end_of_day(instant.date_naive()),
            Self::Exact => instant,
        }
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^now(?:([+-])(\d+)d)?$").expect("valid placeholder regex"))
}

/// Day offset of a placeholder token, or `None` if `token` is not one.
pub fn placeholder_offset(token: &str) -> Option<i64> {
    let caps = placeholder_regex().captures(token)?;
    match (caps.get(1), caps.get(2)) {
        (Some(sign), Some(days)) => {
            let days: i64 = days.as_str().parse().ok()?;
            Some(if sign.as_str() == "-" { -days } else { days })
        }
        _ => Some(0),
    }
}

/// Whether `token` is a date placeholder.
pub fn is_placeholder(token: &str) -> bool {
    placeholder_offset(token).is_some()
}

/// Resolve a single placeholder token to an ISO-8601 instant.
pub fn resolve_placeholder(token: &str, bound: DateBound, now: DateTime<Utc>) -> Option<String> {
    let offset = placeholder_offset(token)?;
    let instant = now.checked_add_signed(Duration::try_days(offset)?)?;
    Some(format_instant(bound.apply(instant)))
}

/// Rewrite every placeholder in `value`, in place, relative to `now`.
///
/// Callers own `value`; resolve a clone when the tree belongs to someone else.
pub fn resolve_placeholders(value: &mut Value, now: DateTime<Utc>) {
    resolve_in(value, None, now);
}

/// A copy of `value` with every placeholder resolved against `clock`.
pub fn resolved(value: &Value, clock: &dyn Clock) -> Value {
    let mut copy = value.clone();
    resolve_placeholders(&mut copy, clock.now());
    copy
}

fn resolve_in(value: &mut Value, key: Option<&str>, now: DateTime<Utc>) {
    match value {
        Value::String(token) => {
            if let Some(instant) = resolve_placeholder(token, DateBound::for_key(key), now) {
                *value = Value::String(instant);
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve_in(item, key, now);
            }
        }
        Value::Object(map) => {
            for (k, v) in map.iter_mut() {
                resolve_in(v, Some(k), now);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Resolve one bound of an explicit date range.
///
/// Placeholders are resolved; bare `YYYY-MM-DD` dates are widened to the start
/// or end of that day; anything else is returned unchanged.
pub fn resolve_range_bound(raw: &str, bound: DateBound, now: DateTime<Utc>) -> String {
    if let Some(instant) = resolve_placeholder(raw, bound, now) {
        return instant;
    }
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) if bound == DateBound::End => format_instant(end_of_day(date)),
        Ok(date) => format_instant(start_of_day(date)),
        Err(_) => raw.to_string(),
    }
}

/// Format an instant the way the store stores timestamps.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Midnight at the start of `date`, UTC.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// The last millisecond of `date`, UTC.
pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_milli_opt(23, 59, 59, 999)
        .unwrap_or_else(|| date.and_time(chrono::NaiveTime::MIN))
        .and_utc()
}

/// A named date range relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePreset {
    /// Year to date: the whole current calendar year.
    Ytd,
    /// Quarter to date.
    Qtd,
    /// Month to date.
    Mtd,
}

impl DatePreset {
    /// Parse a preset name (`YTD`, `QTD`, `MTD`, any case).
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "YTD" => Some(Self::Ytd),
            "QTD" => Some(Self::Qtd),
            "MTD" => Some(Self::Mtd),
            _ => None,
        }
    }

    /// The range this preset covers at `now`.
    pub fn range(self, now: DateTime<Utc>) -> DateRange {
        let today = now.date_naive();
        let year = today.year();
        let first_of = |month: u32| NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(today);

        let (start, end) = match self {
            Self::Ytd => (
                first_of(1),
                NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(today),
            ),
            Self::Qtd => (first_of((today.month0() / 3) * 3 + 1), today),
            Self::Mtd => (first_of(today.month()), today),
        };

        DateRange {
            start: start_of_day(start),
            end: end_of_day(end),
        }
    }
}

/// An inclusive instant range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    /// First included instant.
    pub start: DateTime<Utc>,
    /// Last included instant.
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// `{ "$gte": start, "$lte": end }`.
    pub fn to_predicate(&self) -> Value {
        serde_json::json!({
            "$gte": format_instant(self.start),
            "$lte": format_instant(self.end),
        })
    }
}
