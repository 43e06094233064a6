//! Result post-processing: calculated fields, then display formatting.

use indexmap::IndexMap;
use pipewright_core::{Calculation, PostProcessSpec, ResultRow};
use rayon::prelude::*;
use serde_json::Value;

use crate::error::CalculationError;
use crate::expr::{decimal_to_json, evaluate_expression, Expr};
use crate::format::format_value;
use crate::formula;

/// Applies a [`PostProcessSpec`] to result rows.
///
/// Formulas are parsed once, when the processor is created.
#[derive(Debug, Clone)]
pub struct ResultPostProcessor<'a> {
    spec: &'a PostProcessSpec,
    formulas: IndexMap<&'a str, Result<Expr, CalculationError>>,
}

impl<'a> ResultPostProcessor<'a> {
    /// Create a processor for `spec`.
    pub fn new(spec: &'a PostProcessSpec) -> Self {
        let formulas = spec
            .calculations
            .iter()
            .filter_map(|(field, calculation)| {
                let source = calculation.formula.as_deref()?;
                let parsed = formula::parse(source);
                if let Err(err) = &parsed {
                    tracing::debug!("formula for `{field}` does not parse: {err}");
                }
                Some((field.as_str(), parsed))
            })
            .collect();
        Self { spec, formulas }
    }

    /// Process every row. Row order is preserved.
    pub fn process(&self, rows: &[ResultRow]) -> Vec<ResultRow> {
        if self.spec.is_empty() {
            return rows.to_vec();
        }
        rows.par_iter().map(|row| self.process_row(row)).collect()
    }

    /// Process one row.
    ///
    /// Calculations run in declaration order and see earlier results. A
    /// failing calculation sets its field to `null`; the row is still returned.
    pub fn process_row(&self, row: &ResultRow) -> ResultRow {
        let mut out = row.clone();

        for (field, calculation) in &self.spec.calculations {
            let value = match self.calculate(field, calculation, &out) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!("calculation `{field}` failed: {err}");
                    Value::Null
                }
            };
            out.insert(field.clone(), value);
        }

        for (field, spec) in &self.spec.formatting {
            let Some(value) = out.get_mut(field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            match format_value(value, spec) {
                Some(text) => *value = Value::String(text),
                None => tracing::debug!("cannot format `{field}` ({value}) as {:?}", spec.kind),
            }
        }
        out
    }

    /// Evaluate the calculation for `field` against `row`.
    ///
    /// A formula takes precedence over an expression.
    fn calculate(
        &self,
        field: &str,
        calculation: &Calculation,
        row: &ResultRow,
    ) -> Result<Value, CalculationError> {
        if let Some(parsed) = self.formulas.get(field) {
            let expr = parsed.as_ref().map_err(Clone::clone)?;
            return expr.evaluate(row).map(decimal_to_json);
        }
        match &calculation.expression {
            Some(expression) => evaluate_expression(expression, row),
            None => Err(CalculationError::Empty),
        }
    }
}

/// Apply `spec` to `rows`.
pub fn post_process(rows: &[ResultRow], spec: &PostProcessSpec) -> Vec<ResultRow> {
    ResultPostProcessor::new(spec).process(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipewright_core::{FormatKind, FormatSpec};
    use serde_json::json;

    fn rows(value: Value) -> Vec<ResultRow> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_calculations_chain() {
        let mut spec = PostProcessSpec::default();
        spec.calculations
            .insert("subtotal".into(), Calculation::formula("$qty * $price"));
        spec.calculations
            .insert("total".into(), Calculation::formula("$subtotal + $shipping"));

        let out = post_process(&rows(json!([{ "qty": 3, "price": 2, "shipping": 5 }])), &spec);
        assert_eq!(out[0]["subtotal"], json!(6));
        assert_eq!(out[0]["total"], json!(11));
        let keys: Vec<_> = out[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["qty", "price", "shipping", "subtotal", "total"]);
    }

    #[test]
    fn test_failed_calculation_is_null() {
        let mut spec = PostProcessSpec::default();
        spec.calculations
            .insert("bad".into(), Calculation::formula("$qty *"));
        spec.calculations
            .insert("nonnumeric".into(), Calculation::formula("$name + 1"));
        spec.calculations.insert("empty".into(), Calculation::default());
        spec.calculations
            .insert("ok".into(), Calculation::formula("$qty + 1"));

        let out = post_process(&rows(json!([{ "qty": 1, "name": "x" }])), &spec);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["bad"], Value::Null);
        assert_eq!(out[0]["nonnumeric"], Value::Null);
        assert_eq!(out[0]["empty"], Value::Null);
        assert_eq!(out[0]["ok"], json!(2));
    }

    #[test]
    fn test_formatting_skips_null_and_unformattable() {
        let mut spec = PostProcessSpec::default();
        spec.formatting
            .insert("amount".into(), FormatSpec::new(FormatKind::Currency));
        spec.formatting
            .insert("missing".into(), FormatSpec::new(FormatKind::Number));
        spec.formatting
            .insert("note".into(), FormatSpec::new(FormatKind::Number));
        spec.formatting
            .insert("nothing".into(), FormatSpec::new(FormatKind::Date));

        let out = post_process(
            &rows(json!([{ "amount": 12.5, "note": "n/a", "nothing": null }])),
            &spec,
        );
        assert_eq!(out[0]["amount"], "$12.50");
        assert_eq!(out[0]["note"], "n/a");
        assert_eq!(out[0]["nothing"], Value::Null);
        assert!(!out[0].contains_key("missing"));
    }

    #[test]
    fn test_formulas_parsed_once() {
        let mut spec = PostProcessSpec::default();
        spec.calculations
            .insert("total".into(), Calculation::formula("$qty * $price"));
        spec.calculations
            .insert("bad".into(), Calculation::formula("$qty +"));
        spec.calculations.insert(
            "both".into(),
            Calculation {
                formula: Some("$qty + 1".into()),
                expression: Some(json!({ "$multiply": ["$qty", 100] })),
            },
        );
        spec.calculations.insert(
            "expr".into(),
            Calculation {
                formula: None,
                expression: Some(json!({ "$add": ["$qty", 2] })),
            },
        );

        let processor = ResultPostProcessor::new(&spec);
        assert_eq!(processor.formulas.len(), 3);
        assert!(processor.formulas["total"].is_ok());
        assert!(matches!(
            processor.formulas["bad"],
            Err(CalculationError::Syntax { .. })
        ));
        assert!(!processor.formulas.contains_key("expr"));

        let out = processor.process(&rows(json!([
            { "qty": 2, "price": 3 },
            { "qty": 4, "price": 5 }
        ])));
        assert_eq!(out[0]["total"], json!(6));
        assert_eq!(out[1]["total"], json!(20));
        assert_eq!(out[1]["bad"], Value::Null);
        assert_eq!(out[1]["both"], json!(5));
        assert_eq!(out[1]["expr"], json!(6));
    }

    #[test]
    fn test_order_preserved() {
        let mut spec = PostProcessSpec::default();
        spec.calculations
            .insert("double".into(), Calculation::formula("$n * 2"));
        let input: Vec<ResultRow> = (0..500)
            .map(|n| json!({ "n": n }).as_object().cloned().unwrap())
            .collect();
        let out = post_process(&input, &spec);
        assert!(out
            .iter()
            .enumerate()
            .all(|(i, row)| row["double"] == json!(i * 2)));
    }
}
