//! Formula parser.
//!
//! Formulas are infix arithmetic over row fields, e.g. `($qty * $price) - $discount`.
//! They parse into the same [`Expr`] tree as JSON expressions.
//!
//! Uses chumsky for parser combinators.

use std::str::FromStr;

use chumsky::prelude::*;
use rust_decimal::Decimal;

use crate::error::CalculationError;
use crate::expr::Expr;

type ParserInput<'a> = &'a str;
type ParserExtra<'a> = extra::Err<Rich<'a, char>>;

/// Parse a formula.
///
/// # Errors
///
/// Returns [`CalculationError::Syntax`] if the formula is malformed.
pub fn parse(source: &str) -> Result<Expr, CalculationError> {
    let (result, errs) = ws()
        .ignore_then(expr())
        .then_ignore(ws())
        .then_ignore(end())
        .parse(source)
        .into_output_errors();

    if let Some(expr) = result {
        return Ok(expr);
    }
    Err(errs.first().map_or_else(
        || CalculationError::Syntax {
            position: source.len(),
            message: "unexpected end of formula".to_string(),
        },
        |e| CalculationError::Syntax {
            position: e.span().start,
            message: e.to_string(),
        },
    ))
}

/// Parse whitespace.
fn ws<'a>() -> impl Parser<'a, ParserInput<'a>, (), ParserExtra<'a>> + Clone {
    one_of(" \t\r\n").repeated().ignored()
}

fn digits<'a>() -> impl Parser<'a, ParserInput<'a>, &'a str, ParserExtra<'a>> + Clone {
    one_of("0123456789").repeated().at_least(1).to_slice()
}

/// An unsigned decimal literal; the sign is handled by unary minus.
fn number<'a>() -> impl Parser<'a, ParserInput<'a>, Expr, ParserExtra<'a>> + Clone {
    digits()
        .then(just('.').ignore_then(digits()).or_not())
        .to_slice()
        .try_map(|s: &str, span| {
            Decimal::from_str(s)
                .map(Expr::Literal)
                .map_err(|_| Rich::custom(span, "invalid number"))
        })
}

/// `$identifier`, where identifiers may contain dots for nested fields.
fn field<'a>() -> impl Parser<'a, ParserInput<'a>, Expr, ParserExtra<'a>> + Clone {
    just('$').ignore_then(
        any()
            .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
            .repeated()
            .at_least(1)
            .to_slice()
            .map(|s: &str| Expr::Field(s.to_string())),
    )
}

#[derive(Debug, Clone, Copy)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

fn combine(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    match (op, left) {
        (BinaryOp::Add, Expr::Add(mut terms)) => {
            terms.push(right);
            Expr::Add(terms)
        }
        (BinaryOp::Add, left) => Expr::Add(vec![left, right]),
        (BinaryOp::Sub, Expr::Add(mut terms)) => {
            terms.push(Expr::negate(right));
            Expr::Add(terms)
        }
        (BinaryOp::Sub, left) => Expr::subtract(left, right),
        (BinaryOp::Mul, Expr::Multiply(mut factors)) => {
            factors.push(right);
            Expr::Multiply(factors)
        }
        (BinaryOp::Mul, left) => Expr::Multiply(vec![left, right]),
        (BinaryOp::Div, left) => Expr::divide(left, right),
    }
}

/// Arithmetic with the usual precedence.
fn expr<'a>() -> impl Parser<'a, ParserInput<'a>, Expr, ParserExtra<'a>> {
    recursive(|expr| {
        let primary = choice((
            number(),
            field(),
            expr.delimited_by(just('(').then(ws()), ws().then(just(')'))),
        ));

        let unary = just('-')
            .then_ignore(ws())
            .repeated()
            .foldr(primary, |_, e| Expr::negate(e));

        let multiplicative = unary.clone().foldl(
            ws().ignore_then(choice((
                just('*').to(BinaryOp::Mul),
                just('/').to(BinaryOp::Div),
            )))
            .then_ignore(ws())
            .then(unary)
            .repeated(),
            |left, (op, right)| combine(left, op, right),
        );

        multiplicative.clone().foldl(
            ws().ignore_then(choice((
                just('+').to(BinaryOp::Add),
                just('-').to(BinaryOp::Sub),
            )))
            .then_ignore(ws())
            .then(multiplicative)
            .repeated(),
            |left, (op, right)| combine(left, op, right),
        )
    })
}
