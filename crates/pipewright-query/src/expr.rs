//! Restricted arithmetic over result rows.
//!
//! Calculations are evaluated by a closed interpreter: literals, field
//! references, sums, products, quotients and negation. Nothing else can be
//! expressed, so a config can never reach host capabilities.
//!
//! JSON expressions use the store's operator spelling:
//!
//! ```json
//! { "$divide": [{ "$multiply": ["$qty", "$price"] }, 100] }
//! ```
//!
//! Evaluation rules:
//!
//! - A missing or `null` field, or a blank string, counts as zero.
//! - Numeric strings are parsed, including scientific notation. Values outside
//!   [`Decimal`]'s range (magnitude above about 7.9e28, or more than 28
//!   fraction digits such as `"1e-40"`) are rejected like non-numeric text.
//! - Division by zero yields zero. Any other overflow is an error.

use std::str::FromStr;

use pipewright_core::ResultRow;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Number, Value};

use crate::error::CalculationError;

/// An arithmetic expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A numeric literal.
    Literal(Decimal),
    /// A row field, by dotted path.
    Field(String),
    /// Left-fold sum.
    Add(Vec<Expr>),
    /// Left-fold product.
    Multiply(Vec<Expr>),
    /// Quotient; zero when the divisor is zero.
    Divide(Box<Expr>, Box<Expr>),
    /// Arithmetic negation.
    Negate(Box<Expr>),
}

impl Expr {
    /// `left / right`.
    pub fn divide(left: Self, right: Self) -> Self {
        Self::Divide(Box::new(left), Box::new(right))
    }

    /// `-inner`.
    pub fn negate(inner: Self) -> Self {
        Self::Negate(Box::new(inner))
    }

    /// `left - right`, as a sum with a negated operand.
    pub fn subtract(left: Self, right: Self) -> Self {
        Self::Add(vec![left, Self::negate(right)])
    }

    /// Translate a JSON expression.
    ///
    /// Returns `None` if any operator in the tree is outside the closed set;
    /// such expressions are opaque to this crate.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Decimal::from_str(&n.to_string())
                .ok()
                .or_else(|| n.as_f64().and_then(Decimal::from_f64_retain))
                .map(Self::Literal),
            Value::String(s) => match s.strip_prefix('$') {
                Some(path) if !path.is_empty() => Some(Self::Field(path.to_string())),
                _ => Decimal::from_str(s.trim()).ok().map(Self::Literal),
            },
            Value::Object(map) if map.len() == 1 => {
                let (op, operands) = map.iter().next()?;
                let operands = match operands {
                    Value::Array(items) => items.iter().map(Self::from_json).collect::<Option<Vec<_>>>()?,
                    single => vec![Self::from_json(single)?],
                };
                match op.as_str() {
                    "$add" => Some(Self::Add(operands)),
                    "$multiply" => Some(Self::Multiply(operands)),
                    "$divide" => {
                        let [left, right]: [Self; 2] = operands.try_into().ok()?;
                        Some(Self::divide(left, right))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Evaluate against `row`.
    pub fn evaluate(&self, row: &ResultRow) -> Result<Decimal, CalculationError> {
        match self {
            Self::Literal(d) => Ok(*d),
            Self::Field(path) => field_value(row, path),
            Self::Add(terms) => terms.iter().try_fold(Decimal::ZERO, |acc, term| {
                acc.checked_add(term.evaluate(row)?)
                    .ok_or(CalculationError::Overflow)
            }),
            Self::Multiply(factors) => {
                // An empty product is zero, matching the store's `$multiply: []`.
                let Some((first, rest)) = factors.split_first() else {
                    return Ok(Decimal::ZERO);
                };
                rest.iter().try_fold(first.evaluate(row)?, |acc, factor| {
                    acc.checked_mul(factor.evaluate(row)?)
                        .ok_or(CalculationError::Overflow)
                })
            }
            Self::Divide(left, right) => {
                let divisor = right.evaluate(row)?;
                if divisor.is_zero() {
                    return Ok(Decimal::ZERO);
                }
                left.evaluate(row)?
                    .checked_div(divisor)
                    .ok_or(CalculationError::Overflow)
            }
            Self::Negate(inner) => Ok(-inner.evaluate(row)?),
        }
    }
}

/// Look up a dotted path in a row.
pub fn lookup<'a>(row: &'a ResultRow, path: &str) -> Option<&'a Value> {
    if let Some(value) = row.get(path) {
        return Some(value);
    }
    let mut segments = path.split('.');
    let mut current = row.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn field_value(row: &ResultRow, path: &str) -> Result<Decimal, CalculationError> {
    match lookup(row, path) {
        None | Some(Value::Null) => Ok(Decimal::ZERO),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(Decimal::from_f64_retain))
            .ok_or_else(|| CalculationError::InvalidNumber(n.to_string())),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Decimal::ZERO),
        Some(Value::String(s)) => Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .map_err(|_| CalculationError::NonNumeric(path.to_string())),
        Some(_) => Err(CalculationError::NonNumeric(path.to_string())),
    }
}

/// Convert a result to JSON: integers stay integers, the rest become floats.
pub fn decimal_to_json(value: Decimal) -> Value {
    let value = value.normalize();
    if value.is_integer() {
        if let Some(i) = value.to_i64() {
            return Value::Number(i.into());
        }
    }
    value
        .to_f64()
        .and_then(Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

/// Evaluate a JSON expression against `row`.
///
/// Expressions using operators outside `$add`, `$multiply` and `$divide` are
/// returned unchanged.
pub fn evaluate_expression(expression: &Value, row: &ResultRow) -> Result<Value, CalculationError> {
    match Expr::from_json(expression) {
        Some(expr) => expr.evaluate(row).map(decimal_to_json),
        None => {
            tracing::debug!("expression {expression} is outside the arithmetic subset, passing through");
            Ok(expression.clone())
        }
    }
}
