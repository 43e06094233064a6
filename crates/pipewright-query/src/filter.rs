//! Filter key parsing and value coercion.
//!
//! Runtime filters arrive as a flat map whose keys may carry an operator
//! suffix: `status`, `amount__gte`, `tags__in`. Each entry becomes a predicate
//! fragment in the store's match dialect.

use chrono::{DateTime, Utc};
use pipewright_core::dates::{self, DateBound};
use pipewright_core::Document;
use serde_json::{json, Value};

/// Separator between field name and operator in a filter key.
pub const OPERATOR_SEPARATOR: &str = "__";

/// A filter operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Implicit equality (no suffix). Arrays become `$in`.
    Eq,
    /// `__in`.
    In,
    /// `__gte`.
    Gte,
    /// `__lte`.
    Lte,
    /// `__gt`.
    Gt,
    /// `__lt`.
    Lt,
    /// `__ne`.
    Ne,
    /// `__regex`.
    Regex,
    /// `__like`, case-insensitive regex.
    Like,
    /// `__exists`.
    Exists,
}

impl Operator {
    /// Parse an operator suffix.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "in" => Self::In,
            "gte" => Self::Gte,
            "lte" => Self::Lte,
            "gt" => Self::Gt,
            "lt" => Self::Lt,
            "ne" => Self::Ne,
            "regex" => Self::Regex,
            "like" => Self::Like,
            "exists" => Self::Exists,
            _ => return None,
        })
    }

    /// Rounding applied to date placeholders used with this operator.
    pub const fn date_bound(self) -> DateBound {
        match self {
            Self::Gte => DateBound::Start,
            Self::Lte => DateBound::End,
            _ => DateBound::Exact,
        }
    }
}

/// A filter key split into its logical field and operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterKey<'a> {
    /// Logical field name, before mapping.
    pub field: &'a str,
    /// Operator.
    pub operator: Operator,
}

/// Split a filter key on its first `__`.
///
/// A key without a separator, or whose suffix is not a known operator, is an
/// equality test on the whole key.
pub fn parse_key(key: &str) -> FilterKey<'_> {
    if let Some((field, suffix)) = key.split_once(OPERATOR_SEPARATOR) {
        if let Some(operator) = Operator::from_suffix(suffix) {
            return FilterKey { field, operator };
        }
        tracing::warn!("unknown filter operator `{suffix}` in `{key}`, using equality");
    }
    FilterKey {
        field: key,
        operator: Operator::Eq,
    }
}

/// A predicate on one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Field equals the value.
    Equals(Value),
    /// Field satisfies operator expressions, e.g. `{ "$gte": 5 }`.
    Operators(Document),
}

impl Predicate {
    fn op(name: &str, value: Value) -> Self {
        let mut ops = Document::new();
        ops.insert(name.to_string(), value);
        Self::Operators(ops)
    }

    /// The predicate as a JSON value.
    pub fn into_value(self) -> Value {
        match self {
            Self::Equals(v) => v,
            Self::Operators(ops) => Value::Object(ops),
        }
    }
}

/// Whether a filter value carries no information and must be dropped.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Coerce a filter value into a predicate. Blank values yield `None`.
pub fn coerce(operator: Operator, value: &Value, now: DateTime<Utc>) -> Option<Predicate> {
    if is_blank(value) {
        return None;
    }
    let value = resolve_date(value, operator.date_bound(), now);

    Some(match operator {
        Operator::Eq => match value {
            Value::Array(_) => Predicate::op("$in", value),
            other => Predicate::Equals(other),
        },
        Operator::In => Predicate::op("$in", as_array(value)),
        Operator::Gte => Predicate::op("$gte", value),
        Operator::Lte => Predicate::op("$lte", value),
        Operator::Gt => Predicate::op("$gt", value),
        Operator::Lt => Predicate::op("$lt", value),
        Operator::Ne => Predicate::op("$ne", value),
        Operator::Regex | Operator::Like => {
            let mut ops = Document::new();
            ops.insert("$regex".to_string(), value);
            ops.insert("$options".to_string(), json!("i"));
            Predicate::Operators(ops)
        }
        Operator::Exists => Predicate::op("$exists", Value::Bool(truthy(&value))),
    })
}

fn resolve_date(value: &Value, bound: DateBound, now: DateTime<Utc>) -> Value {
    match value {
        Value::String(token) => dates::resolve_placeholder(token, bound, now)
            .map_or_else(|| value.clone(), Value::String),
        _ => value.clone(),
    }
}

/// Wrap a scalar in an array; arrays pass through.
pub fn as_array(value: Value) -> Value {
    match value {
        Value::Array(_) => value,
        other => Value::Array(vec![other]),
    }
}

/// Interpret a filter value as a boolean.
///
/// Query strings carry booleans as text, so `"false"`, `"0"` and `"no"` are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            !(s.is_empty()
                || s == "0"
                || s.eq_ignore_ascii_case("false")
                || s.eq_ignore_ascii_case("no"))
        }
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Whether every key of `doc` is a `$` operator.
pub fn is_operator_object(doc: &Document) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

/// Merge a predicate into a match fragment at `path`.
///
/// Operator predicates are merged into an existing operator object for the same
/// path, so `amount__gte` and `amount__lte` produce one range. Anything else
/// replaces what was there.
pub fn merge_predicate(fragment: &mut Document, path: &str, predicate: Predicate) {
    if let Predicate::Operators(ops) = &predicate {
        if let Some(Value::Object(existing)) = fragment.get_mut(path) {
            if is_operator_object(existing) {
                for (op, value) in ops {
                    existing.insert(op.clone(), value.clone());
                }
                return;
            }
        }
    }
    fragment.insert(path.to_string(), predicate.into_value());
}
