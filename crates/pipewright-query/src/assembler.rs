//! Pipeline assembly.
//!
//! The assembler owns stage order. It runs in one of two modes:
//!
//! - **Template**: the config supplies `pipeline`. The base match is emitted
//!   first, then the template (placeholders resolved) with the line-item match
//!   injected once, right after the first `$unwind`.
//! - **Declarative**: stages are built from the config in a fixed order:
//!   match, unwind (+ line-item match), lookups, post-lookup match, group,
//!   project, sort, limit.

use chrono::{DateTime, Utc};
use pipewright_core::dates;
use pipewright_core::{
    Accumulator, AggregationConfig, Document, GroupBy, LookupSpec, PipelineStage, UnwindSpec,
};
use serde_json::{json, Value};

use crate::error::{ConfigurationError, LookupSpecError};
use crate::matcher::MatchFragments;

/// Turns match fragments and a config into an ordered stage list.
#[derive(Debug, Clone, Copy)]
pub struct PipelineAssembler<'a> {
    config: &'a AggregationConfig,
    now: DateTime<Utc>,
}

impl<'a> PipelineAssembler<'a> {
    /// Create an assembler for `config`.
    pub const fn new(config: &'a AggregationConfig, now: DateTime<Utc>) -> Self {
        Self { config, now }
    }

    /// Assemble the pipeline.
    pub fn assemble(&self, fragments: MatchFragments) -> Result<Vec<PipelineStage>, ConfigurationError> {
        match &self.config.pipeline {
            Some(template) => self.assemble_template(template, fragments),
            None => Ok(self.assemble_declarative(fragments)),
        }
    }

    fn assemble_template(
        &self,
        template: &[Value],
        fragments: MatchFragments,
    ) -> Result<Vec<PipelineStage>, ConfigurationError> {
        let mut template = Value::Array(template.to_vec());
        dates::resolve_placeholders(&mut template, self.now);
        let Value::Array(template) = template else {
            unreachable!("placeholder resolution preserves arrays");
        };

        let mut stages = Vec::with_capacity(template.len() + 2);
        stages.push(PipelineStage::Match(fragments.base));

        let mut line_items = Some(fragments.line_items).filter(|m| !m.is_empty());
        for (index, doc) in template.iter().enumerate() {
            let stage = PipelineStage::from_document(doc).map_err(|source| {
                ConfigurationError::InvalidStage {
                    config: self.config.name.clone(),
                    index,
                    source,
                }
            })?;
            let is_unwind = stage.is_unwind();
            stages.push(stage);

            if is_unwind {
                if let Some(matcher) = line_items.take() {
                    tracing::debug!("injecting element match after template stage {index}");
                    stages.push(PipelineStage::Match(matcher));
                }
            }
        }

        if line_items.is_some() {
            tracing::warn!(
                "aggregation `{}`: element filters dropped, template has no $unwind stage",
                self.config.name
            );
        }
        Ok(stages)
    }

    fn assemble_declarative(&self, fragments: MatchFragments) -> Vec<PipelineStage> {
        let config = self.config;
        let mut stages = vec![PipelineStage::Match(fragments.base)];

        if let Some(unwind) = &config.unwind {
            stages.push(PipelineStage::Unwind(unwind_body(unwind)));
            if !fragments.line_items.is_empty() {
                stages.push(PipelineStage::Match(fragments.line_items));
            }
        } else if !fragments.line_items.is_empty() {
            tracing::warn!(
                "aggregation `{}`: element filters dropped, config has no unwind",
                config.name
            );
        }

        for (index, lookup) in config.lookups.iter().enumerate() {
            match self.lookup_stage(index, lookup) {
                Ok(stage) => {
                    stages.push(stage);
                    if lookup.unwind() {
                        stages.push(PipelineStage::Unwind(Value::String(format!(
                            "${}",
                            lookup.as_field()
                        ))));
                    }
                }
                Err(err) => {
                    tracing::warn!("aggregation `{}`: {err}; skipping stage", config.name);
                }
            }
        }

        if let Some(filter) = &config.post_lookup_filter {
            let mut filter = Value::Object(filter.clone());
            dates::resolve_placeholders(&mut filter, self.now);
            if let Value::Object(filter) = filter {
                stages.push(PipelineStage::Match(filter));
            }
        }

        if let Some(group) = &config.group_by {
            stages.push(PipelineStage::Group(group_body(group)));
        }
        if let Some(project) = &config.project {
            stages.push(PipelineStage::Project(project.clone()));
        }
        if let Some(sort) = &config.sort {
            stages.push(PipelineStage::Sort(sort.clone()));
        }
        if let Some(limit) = &config.limit {
            stages.push(PipelineStage::Limit(limit.clone()));
        }

        tracing::debug!(
            "aggregation `{}`: assembled {} declarative stages",
            config.name,
            stages.len()
        );
        stages
    }

    /// Build one `$lookup` stage.
    pub fn lookup_stage(&self, index: usize, lookup: &LookupSpec) -> Result<PipelineStage, LookupSpecError> {
        let mut body = Document::new();
        match lookup {
            LookupSpec::Simple(l) => {
                body.insert("from".into(), json!(l.from));
                body.insert("localField".into(), json!(l.local_field));
                body.insert("foreignField".into(), json!(l.foreign_field));
                body.insert("as".into(), json!(l.as_field));
            }
            LookupSpec::Correlated(l) => {
                let mut pipeline = Value::Array(l.pipeline.clone());
                dates::resolve_placeholders(&mut pipeline, self.now);
                body.insert("from".into(), json!(l.from));
                body.insert("let".into(), Value::Object(l.let_vars.clone()));
                body.insert("pipeline".into(), pipeline);
                body.insert("as".into(), json!(l.as_field));
            }
            LookupSpec::Incomplete(l) => {
                return Err(LookupSpecError {
                    index,
                    from: l.from.clone(),
                    as_field: l.as_field.clone(),
                });
            }
        }
        Ok(PipelineStage::Lookup(body))
    }
}

fn unwind_body(unwind: &UnwindSpec) -> Value {
    match unwind.preserve_null_and_empty_arrays {
        Some(preserve) => json!({
            "path": unwind.field_ref(),
            "preserveNullAndEmptyArrays": preserve,
        }),
        None => Value::String(unwind.field_ref()),
    }
}

/// Build a `$group` body: `_id` first, then each accumulator.
pub fn group_body(group: &GroupBy) -> Document {
    let mut body = Document::new();
    body.insert("_id".into(), group.id.clone());
    for (name, accumulator) in &group.fields {
        body.insert(name.clone(), accumulator_body(accumulator));
    }
    body
}

/// Translate one accumulator into the store's dialect.
pub fn accumulator_body(accumulator: &Accumulator) -> Value {
    let single = |operator: &str, operand: Value| {
        let mut doc = Document::new();
        doc.insert(format!("${}", operator.trim_start_matches('$')), operand);
        Value::Object(doc)
    };

    match accumulator {
        Accumulator::Named(name) if name.trim_start_matches('$') == "count" => single("sum", json!(1)),
        Accumulator::Named(name) => single(name, json!(1)),
        Accumulator::Operator { operator, field } => single(operator, field.clone()),
        Accumulator::Expression { expression } => expression.clone(),
        Accumulator::Raw(doc) => Value::Object(doc.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pipewright_core::{IncompleteLookup, SimpleLookup};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap()
    }

    fn fragments(base: Value, line_items: Value) -> MatchFragments {
        MatchFragments {
            base: base.as_object().cloned().unwrap_or_default(),
            line_items: line_items.as_object().cloned().unwrap_or_default(),
        }
    }

    fn operators(stages: &[PipelineStage]) -> Vec<&str> {
        stages.iter().map(PipelineStage::operator).collect()
    }

    #[test]
    fn test_accumulators() {
        assert_eq!(accumulator_body(&Accumulator::Named("count".into())), json!({ "$sum": 1 }));
        assert_eq!(accumulator_body(&Accumulator::Named("sum".into())), json!({ "$sum": 1 }));
        assert_eq!(
            accumulator_body(&Accumulator::Operator {
                operator: "$avg".into(),
                field: json!("$total")
            }),
            json!({ "$avg": "$total" })
        );
        assert_eq!(
            accumulator_body(&Accumulator::Expression {
                expression: json!({ "$sum": { "$multiply": ["$qty", "$price"] } })
            }),
            json!({ "$sum": { "$multiply": ["$qty", "$price"] } })
        );
        let raw = json!({ "$push": "$name" });
        assert_eq!(
            accumulator_body(&Accumulator::Raw(raw.as_object().cloned().unwrap())),
            raw
        );
    }

    #[test]
    fn test_declarative_order() {
        let config = AggregationConfig::builder("full", "documents")
            .unwind(UnwindSpec {
                path: "lineItems".into(),
                preserve_null_and_empty_arrays: Some(true),
            })
            .lookup(LookupSpec::Simple(SimpleLookup {
                from: "customers".into(),
                as_field: "customer".into(),
                local_field: "data.customerId".into(),
                foreign_field: "_id".into(),
                unwind: true,
            }))
            .post_lookup_filter(json!({ "customer.active": true }))
            .group_id(json!("$customer.name"))
            .accumulator("orders", Accumulator::Named("count".into()))
            .project(json!({ "orders": 1 }))
            .sort(json!({ "orders": -1 }))
            .limit(json!(10))
            .build();

        let stages = PipelineAssembler::new(&config, now())
            .assemble(fragments(json!({ "documentType": "order" }), json!({ "sku": "A" })))
            .unwrap();

        assert_eq!(
            operators(&stages),
            vec![
                "$match", "$unwind", "$match", "$lookup", "$unwind", "$match", "$group",
                "$project", "$sort", "$limit"
            ]
        );
        assert_eq!(
            stages[1].body(),
            json!({ "path": "$lineItems", "preserveNullAndEmptyArrays": true })
        );
        assert_eq!(stages[2].body(), json!({ "sku": "A" }));
        assert_eq!(stages[4].body(), json!("$customer"));
        assert_eq!(
            stages[6].body(),
            json!({ "_id": "$customer.name", "orders": { "$sum": 1 } })
        );
    }

    #[test]
    fn test_incomplete_lookup_skipped() {
        let config = AggregationConfig::builder("partial", "documents")
            .lookup(LookupSpec::Incomplete(IncompleteLookup {
                from: "x".into(),
                as_field: "y".into(),
            }))
            .limit(json!(5))
            .build();
        let stages = PipelineAssembler::new(&config, now())
            .assemble(fragments(json!({ "documentType": "a" }), json!({})))
            .unwrap();
        assert_eq!(operators(&stages), vec!["$match", "$limit"]);

        let err = PipelineAssembler::new(&config, now())
            .lookup_stage(0, &config.lookups[0])
            .unwrap_err();
        assert_eq!(err.as_field, "y");
    }

    #[test]
    fn test_template_injects_once() {
        let config = AggregationConfig::builder("template", "documents")
            .pipeline(vec![
                json!({ "$unwind": "$lineItems" }),
                json!({ "$match": { "lineItems.due": { "$lte": "now" } } }),
                json!({ "$unwind": "$lineItems.coats" }),
                json!({ "$group": { "_id": "$lineItems.paintSpecId" } }),
            ])
            .build();

        let stages = PipelineAssembler::new(&config, now())
            .assemble(fragments(
                json!({ "documentType": "workOrder" }),
                json!({ "paintSpecId": "PS-7" }),
            ))
            .unwrap();

        assert_eq!(
            operators(&stages),
            vec!["$match", "$unwind", "$match", "$match", "$unwind", "$group"]
        );
        assert_eq!(stages[2].body(), json!({ "paintSpecId": "PS-7" }));
        assert_eq!(
            stages[3].body(),
            json!({ "lineItems.due": { "$lte": "2024-06-15T23:59:59.999Z" } })
        );
        // The caller's template is untouched.
        assert_eq!(
            config.pipeline.as_ref().unwrap()[1]["$match"]["lineItems.due"]["$lte"],
            "now"
        );
    }

    #[test]
    fn test_template_without_unwind_drops_element_match() {
        let config = AggregationConfig::builder("flat", "documents")
            .pipeline(vec![
                json!({ "$match": { "status": "open" } }),
                json!({ "$group": { "_id": "$status", "n": { "$sum": 1 } } }),
            ])
            .build();

        let stages = PipelineAssembler::new(&config, now())
            .assemble(fragments(
                json!({ "documentType": "workOrder" }),
                json!({ "paintSpecId": "PS-7" }),
            ))
            .unwrap();

        assert_eq!(operators(&stages), vec!["$match", "$match", "$group"]);
        assert_eq!(stages[0].body(), json!({ "documentType": "workOrder" }));
        assert_eq!(stages[1].body(), json!({ "status": "open" }));
        assert!(stages
            .iter()
            .filter_map(PipelineStage::as_match)
            .all(|m| !m.contains_key("paintSpecId")));
    }

    #[test]
    fn test_declarative_without_unwind_drops_element_match() {
        let config = AggregationConfig::builder("flat", "documents")
            .sort(json!({ "createdAt": -1 }))
            .build();

        let stages = PipelineAssembler::new(&config, now())
            .assemble(fragments(
                json!({ "documentType": "workOrder" }),
                json!({ "paintSpecId": "PS-7" }),
            ))
            .unwrap();

        assert_eq!(operators(&stages), vec!["$match", "$sort"]);
        assert_eq!(stages[0].body(), json!({ "documentType": "workOrder" }));
    }

    #[test]
    fn test_template_invalid_stage() {
        let config = AggregationConfig::builder("broken", "documents")
            .pipeline(vec![json!({ "$limit": 1 }), json!({ "limit": 1 })])
            .build();
        let err = PipelineAssembler::new(&config, now())
            .assemble(fragments(json!({ "documentType": "a" }), json!({})))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidStage { index: 1, .. }));
    }
}
