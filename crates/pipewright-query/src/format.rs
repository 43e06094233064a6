//! Display formatting for result fields.
//!
//! Locale conventions cover the locales reports are rendered in. Unknown tags
//! fall back to a locale with the same language, then to `en-US`.

use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use pipewright_core::{FormatKind, FormatSpec};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;

/// Locale used when a spec names none.
pub const DEFAULT_LOCALE: &str = "en-US";

/// Currency used when a currency spec names none.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Fraction digits shown for plain numbers when `decimals` is absent.
const DEFAULT_MAX_FRACTION: u32 = 3;

/// Fraction digits shown for percentages when `decimals` is absent.
const DEFAULT_PERCENT_FRACTION: u32 = 2;

/// Upper bound on requested fraction digits.
pub const MAX_FRACTION_DIGITS: u32 = 100;

const NBSP: &str = "\u{a0}";
const NNBSP: &str = "\u{202f}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateOrder {
    /// 6/15/2024
    MonthDayYear,
    /// 15/06/2024
    DayMonthYear,
    /// 2024/6/15
    YearMonthDay,
}

/// Number and date conventions for one locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locale {
    tag: &'static str,
    group: &'static str,
    decimal: &'static str,
    /// Integers shorter than this are not grouped.
    min_grouping_digits: usize,
    currency_first: bool,
    /// Separator between amount and symbol (or symbol and amount).
    currency_space: &'static str,
    date_order: DateOrder,
    date_separator: char,
    date_padded: bool,
}

const LOCALES: &[Locale] = &[
    Locale {
        tag: "en-US",
        group: ",",
        decimal: ".",
        min_grouping_digits: 4,
        currency_first: true,
        currency_space: "",
        date_order: DateOrder::MonthDayYear,
        date_separator: '/',
        date_padded: false,
    },
    Locale {
        tag: "en-GB",
        group: ",",
        decimal: ".",
        min_grouping_digits: 4,
        currency_first: true,
        currency_space: "",
        date_order: DateOrder::DayMonthYear,
        date_separator: '/',
        date_padded: true,
    },
    Locale {
        tag: "en-IN",
        group: ",",
        decimal: ".",
        min_grouping_digits: 4,
        currency_first: true,
        currency_space: "",
        date_order: DateOrder::DayMonthYear,
        date_separator: '/',
        date_padded: false,
    },
    Locale {
        tag: "de-DE",
        group: ".",
        decimal: ",",
        min_grouping_digits: 4,
        currency_first: false,
        currency_space: NBSP,
        date_order: DateOrder::DayMonthYear,
        date_separator: '.',
        date_padded: false,
    },
    Locale {
        tag: "fr-FR",
        group: NNBSP,
        decimal: ",",
        min_grouping_digits: 4,
        currency_first: false,
        currency_space: NBSP,
        date_order: DateOrder::DayMonthYear,
        date_separator: '/',
        date_padded: true,
    },
    Locale {
        tag: "es-ES",
        group: ".",
        decimal: ",",
        min_grouping_digits: 5,
        currency_first: false,
        currency_space: NBSP,
        date_order: DateOrder::DayMonthYear,
        date_separator: '/',
        date_padded: false,
    },
    Locale {
        tag: "it-IT",
        group: ".",
        decimal: ",",
        min_grouping_digits: 4,
        currency_first: false,
        currency_space: NBSP,
        date_order: DateOrder::DayMonthYear,
        date_separator: '/',
        date_padded: false,
    },
    Locale {
        tag: "pt-BR",
        group: ".",
        decimal: ",",
        min_grouping_digits: 4,
        currency_first: true,
        currency_space: NBSP,
        date_order: DateOrder::DayMonthYear,
        date_separator: '/',
        date_padded: true,
    },
    Locale {
        tag: "ja-JP",
        group: ",",
        decimal: ".",
        min_grouping_digits: 4,
        currency_first: true,
        currency_space: "",
        date_order: DateOrder::YearMonthDay,
        date_separator: '/',
        date_padded: false,
    },
];

impl Locale {
    /// Resolve a BCP 47 tag.
    pub fn resolve(tag: Option<&str>) -> &'static Self {
        let tag = tag.unwrap_or(DEFAULT_LOCALE).replace('_', "-");
        let language = tag.split('-').next().unwrap_or_default();

        LOCALES
            .iter()
            .find(|l| l.tag.eq_ignore_ascii_case(&tag))
            .or_else(|| {
                LOCALES.iter().find(|l| {
                    l.tag
                        .split('-')
                        .next()
                        .is_some_and(|lang| lang.eq_ignore_ascii_case(language))
                })
            })
            .unwrap_or(&LOCALES[0])
    }

    /// The canonical tag.
    pub const fn tag(&self) -> &'static str {
        self.tag
    }

    /// Render `value` with at least `min` and at most `max` fraction digits.
    pub fn number(&self, value: Decimal, min: u32, max: u32) -> String {
        let rounded = value.round_dp_with_strategy(max, RoundingStrategy::MidpointAwayFromZero);
        let negative = rounded.is_sign_negative() && !rounded.is_zero();
        let digits = rounded.abs().to_string();
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((&digits, ""));

        let mut frac = frac_part.trim_end_matches('0').to_string();
        while frac.len() < min as usize {
            frac.push('0');
        }

        let mut out = String::new();
        if negative {
            out.push('-');
        }
        out.push_str(&self.group_digits(int_part));
        if !frac.is_empty() {
            out.push_str(self.decimal);
            out.push_str(&frac);
        }
        out
    }

    fn group_digits(&self, int_part: &str) -> String {
        if int_part.len() < self.min_grouping_digits {
            return int_part.to_string();
        }
        let mut out = String::with_capacity(int_part.len() + int_part.len() / 3 * self.group.len());
        for (i, c) in int_part.chars().enumerate() {
            if i > 0 && (int_part.len() - i) % 3 == 0 {
                out.push_str(self.group);
            }
            out.push(c);
        }
        out
    }

    /// Render an amount of `currency`.
    pub fn currency(&self, value: Decimal, currency: &str, decimals: Option<u32>) -> String {
        let currency = currency.to_ascii_uppercase();
        let digits = decimals.unwrap_or_else(|| minor_digits(&currency));
        let amount = self.number(value.abs(), digits, digits);
        let symbol = currency_symbol(&currency);
        let rounds_to_zero = !amount.chars().any(|c| c.is_ascii_digit() && c != '0');
        let sign = if value.is_sign_negative() && !rounds_to_zero { "-" } else { "" };

        // Bare ISO codes always get a separator so they do not run into digits.
        let space = if symbol == currency && self.currency_space.is_empty() {
            NBSP
        } else {
            self.currency_space
        };

        if self.currency_first {
            format!("{sign}{symbol}{space}{amount}")
        } else {
            format!("{sign}{amount}{space}{symbol}")
        }
    }

    /// Render a short date.
    pub fn date(&self, date: NaiveDate) -> String {
        let (day, month, year) = (date.day(), date.month(), date.year());
        let sep = self.date_separator;
        let pad = |n: u32| {
            if self.date_padded {
                format!("{n:02}")
            } else {
                n.to_string()
            }
        };
        match self.date_order {
            DateOrder::MonthDayYear => format!("{}{sep}{}{sep}{year}", pad(month), pad(day)),
            DateOrder::DayMonthYear => format!("{}{sep}{}{sep}{year}", pad(day), pad(month)),
            DateOrder::YearMonthDay => format!("{year}{sep}{}{sep}{}", pad(month), pad(day)),
        }
    }
}

/// Render a ratio as a percentage: `ratio * 100` with exactly `decimals`
/// fraction digits, no grouping, and a `%` suffix.
///
/// Returns `None` if the scaled value overflows.
pub fn percentage(ratio: Decimal, decimals: u32) -> Option<String> {
    let value = ratio
        .checked_mul(Decimal::ONE_HUNDRED)?
        .round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    let value = if value.is_zero() { Decimal::ZERO } else { value };

    let mut text = value.to_string();
    let frac_len = text.split_once('.').map_or(0, |(_, frac)| frac.len());
    if decimals > 0 && frac_len == 0 {
        text.push('.');
    }
    for _ in frac_len..decimals as usize {
        text.push('0');
    }
    text.push('%');
    Some(text)
}

/// ISO 4217 minor unit digits.
pub fn minor_digits(currency: &str) -> u32 {
    match currency {
        "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "HUF" => 0,
        "BHD" | "KWD" | "OMR" | "JOD" | "TND" => 3,
        _ => 2,
    }
}

/// Display symbol for a currency; unknown codes are shown as-is.
pub fn currency_symbol(currency: &str) -> &str {
    match currency {
        "USD" => "$",
        "EUR" => "€",
        "GBP" => "£",
        "INR" => "₹",
        "JPY" => "¥",
        "BRL" => "R$",
        "CNY" => "CN¥",
        "KRW" => "₩",
        "CAD" => "CA$",
        "AUD" => "A$",
        "MXN" => "MX$",
        other => other,
    }
}

/// Read a number from a JSON number or numeric string.
pub fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(Decimal::from_f64_retain)),
        Value::String(s) => {
            let s = s.trim();
            Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s)).ok()
        }
        _ => None,
    }
}

/// Read a date from an ISO-8601 string or epoch milliseconds, in UTC.
pub fn as_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc).date_naive())
            .ok()
            .or_else(|| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .or_else(|| {
                chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|dt| dt.date())
            }),
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| dt.date_naive())
        }
        _ => None,
    }
}

/// Format `value` per `spec`.
///
/// Returns `None` when the value cannot be read as the kind the spec asks for.
pub fn format_value(value: &Value, spec: &FormatSpec) -> Option<String> {
    let locale = Locale::resolve(spec.locale.as_deref());
    let decimals = spec.decimals.map(|d| d.min(MAX_FRACTION_DIGITS));
    match spec.kind {
        FormatKind::Number => {
            let value = as_decimal(value)?;
            Some(match decimals {
                Some(d) => locale.number(value, d, d),
                None => locale.number(value, 0, DEFAULT_MAX_FRACTION),
            })
        }
        FormatKind::Currency => {
            let currency = spec.currency.as_deref().unwrap_or(DEFAULT_CURRENCY);
            Some(locale.currency(as_decimal(value)?, currency, decimals))
        }
        FormatKind::Percentage => {
            percentage(as_decimal(value)?, decimals.unwrap_or(DEFAULT_PERCENT_FRACTION))
        }
        FormatKind::Date => as_date(value).map(|d| locale.date(d)),
    }
}
