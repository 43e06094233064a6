//! Match fragment construction.
//!
//! Filters are split into two fragments: the base match, which scopes whole
//! documents and always leads the pipeline, and the line-item match, which
//! tests individual array elements and is only meaningful right after the
//! array has been unwound.

use chrono::{DateTime, Utc};
use pipewright_core::dates::{self, DateBound, DatePreset};
use pipewright_core::{AggregationConfig, Document, FilterParameters};
use serde_json::Value;

use crate::filter::{coerce, merge_predicate, parse_key, Operator, Predicate};
use crate::mapping::{FieldMapper, FieldPath};

/// Logical filter key carrying a date range preset or `{start, end}` object.
pub const DATE_RANGE_KEY: &str = "date_range";

/// The two match fragments computed from a config and its filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchFragments {
    /// Document-level predicate; starts from the config's base filter.
    pub base: Document,
    /// Element-level predicate, keyed relative to the array element.
    pub line_items: Document,
}

/// Builds [`MatchFragments`].
#[derive(Debug)]
pub struct MatchStageBuilder<'a> {
    config: &'a AggregationConfig,
    mapper: FieldMapper<'a>,
    now: DateTime<Utc>,
    protected: &'a [String],
}

impl<'a> MatchStageBuilder<'a> {
    /// Create a builder for `config`, resolving relative dates against `now`.
    pub fn new(config: &'a AggregationConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            mapper: FieldMapper::new(&config.field_mappings, config.array_prefixes()),
            now,
            protected: &[],
        }
    }

    /// Base-filter keys that runtime filters may not override.
    pub fn protect(mut self, keys: &'a [String]) -> Self {
        self.protected = keys;
        self
    }

    /// Compute both fragments.
    pub fn build(&self, filters: &FilterParameters) -> MatchFragments {
        let mut base = Value::Object(self.config.base_filter.clone());
        dates::resolve_placeholders(&mut base, self.now);

        let mut fragments = MatchFragments {
            base: match base {
                Value::Object(map) => map,
                _ => Document::new(),
            },
            line_items: Document::new(),
        };

        for (key, value) in filters {
            self.apply(&mut fragments, key, value);
        }
        fragments
    }

    fn apply(&self, fragments: &mut MatchFragments, key: &str, value: &Value) {
        let parsed = parse_key(key);

        let predicate = if parsed.field == DATE_RANGE_KEY && parsed.operator == Operator::Eq {
            self.date_range(value)
                .or_else(|| coerce(parsed.operator, value, self.now))
        } else {
            coerce(parsed.operator, value, self.now)
        };
        let Some(predicate) = predicate else {
            tracing::debug!("dropping blank filter `{key}`");
            return;
        };

        match self.mapper.resolve(parsed.field) {
            FieldPath::Element { array, path } => {
                tracing::debug!("routing filter `{key}` to element match on `{array}.{path}`");
                merge_predicate(&mut fragments.line_items, &path, predicate);
            }
            FieldPath::Document(path) => {
                if self.protected.iter().any(|k| *k == path)
                    && self.config.base_filter.contains_key(&path)
                {
                    tracing::warn!(
                        "filter `{key}` targets discriminator `{path}` of `{}`, ignoring",
                        self.config.name
                    );
                    return;
                }
                merge_predicate(&mut fragments.base, &path, predicate);
            }
        }
    }

    /// Expand a preset name or an explicit `{start, end}` object.
    ///
    /// Unknown preset names yield `None` and fall back to literal equality.
    fn date_range(&self, value: &Value) -> Option<Predicate> {
        match value {
            Value::String(name) => {
                let range = DatePreset::parse(name)?.range(self.now);
                match range.to_predicate() {
                    Value::Object(ops) => Some(Predicate::Operators(ops)),
                    _ => None,
                }
            }
            Value::Object(bounds) => {
                let mut ops = Document::new();
                for (key, op, bound) in [
                    ("start", "$gte", DateBound::Start),
                    ("end", "$lte", DateBound::End),
                ] {
                    match bounds.get(key) {
                        Some(Value::String(raw)) if !raw.is_empty() => {
                            let resolved = dates::resolve_range_bound(raw, bound, self.now);
                            ops.insert(op.to_string(), Value::String(resolved));
                        }
                        Some(v) if !crate::filter::is_blank(v) => {
                            ops.insert(op.to_string(), v.clone());
                        }
                        _ => {}
                    }
                }
                (!ops.is_empty()).then_some(Predicate::Operators(ops))
            }
            _ => None,
        }
    }
}
