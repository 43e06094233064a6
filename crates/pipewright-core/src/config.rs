//! Aggregation configuration schema.
//!
//! An [`AggregationConfig`] is the declarative blueprint the compiler turns into
//! an ordered pipeline. It is deserialized from the camelCase JSON shape used by
//! config stores:
//!
//! ```json
//! {
//!   "name": "paint-usage",
//!   "collection": "documents",
//!   "baseFilter": { "documentType": "workOrder" },
//!   "fieldMappings": { "paintSpec": "lineItems.paintSpecId" },
//!   "unwind": { "path": "$lineItems" },
//!   "groupBy": { "id": "$lineItems.paintSpecId", "fields": { "jobs": "count" } }
//! }
//! ```
//!
//! Shapes the compiler cannot interpret fail here, at load time, rather than
//! during pipeline assembly. The one deliberate exception is a lookup with
//! neither join form, which loads as [`LookupSpec::Incomplete`] and is skipped
//! when the pipeline is assembled.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stage::unwind_path;
use crate::Document;

/// Array field whose element paths are always filtered after unwinding.
pub const DEFAULT_ARRAY_FIELD: &str = "lineItems";

/// The compiled query blueprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationConfig {
    /// Diagnostic name.
    #[serde(default)]
    pub name: String,
    /// Logical source of rows.
    #[serde(default)]
    pub collection: String,
    /// Static predicate scoping every query; carries the document-type discriminator.
    #[serde(default)]
    pub base_filter: Document,
    /// Logical filter key to physical field path.
    #[serde(default)]
    pub field_mappings: IndexMap<String, String>,
    /// Array fields whose element paths must be filtered after unwinding.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub array_fields: Vec<String>,
    /// Array expansion stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unwind: Option<UnwindSpec>,
    /// Joins against other collections.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lookups: Vec<LookupSpec>,
    /// Grouping stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<GroupBy>,
    /// `$project` body, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Value>,
    /// `$sort` body, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Value>,
    /// `$limit` body, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<Value>,
    /// Row post-processing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_process: Option<PostProcessSpec>,
    /// Author-supplied stage template that bypasses declarative assembly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Vec<Value>>,
    /// Predicate applied after all lookups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_lookup_filter: Option<Document>,
}

impl AggregationConfig {
    /// Start building a configuration.
    pub fn builder(name: impl Into<String>, collection: impl Into<String>) -> AggregationConfigBuilder {
        AggregationConfigBuilder::new(name, collection)
    }

    /// Parse a configuration from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Parse a configuration from an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Every array field whose element paths need post-unwind filtering.
    ///
    /// Starts with [`DEFAULT_ARRAY_FIELD`], then adds the declared
    /// `arrayFields`, the declarative unwind path, and the path of every
    /// `$unwind` stage in the template, without duplicates.
    pub fn array_prefixes(&self) -> Vec<String> {
        let mut prefixes = vec![DEFAULT_ARRAY_FIELD.to_string()];
        let mut push = |path: &str| {
            let path = path.trim_start_matches('$');
            if !path.is_empty() && !prefixes.iter().any(|p| p == path) {
                prefixes.push(path.to_string());
            }
        };

        for field in &self.array_fields {
            push(field);
        }
        if let Some(unwind) = &self.unwind {
            push(&unwind.path);
        }
        for stage in self.pipeline.iter().flatten() {
            if let Some(path) = stage.get("$unwind").and_then(unwind_path) {
                push(path);
            }
        }

        prefixes
    }
}

/// Array expansion (`$unwind`) specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnwindSpec {
    /// Array path, with or without the leading `$`.
    pub path: String,
    /// Keep documents whose array is missing or empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_null_and_empty_arrays: Option<bool>,
}

impl UnwindSpec {
    /// Unwind `path`, dropping documents with missing or empty arrays.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            preserve_null_and_empty_arrays: None,
        }
    }

    /// The path as a `$`-prefixed field reference.
    pub fn field_ref(&self) -> String {
        if self.path.starts_with('$') {
            self.path.clone()
        } else {
            format!("${}", self.path)
        }
    }
}

/// A join against another collection.
///
/// Variant order matters for deserialization: a spec is correlated when it has
/// a `pipeline`, simple when it has `localField`/`foreignField`, and incomplete
/// otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LookupSpec {
    /// `let`/`pipeline` join.
    Correlated(CorrelatedLookup),
    /// `localField`/`foreignField` equality join.
    Simple(SimpleLookup),
    /// Neither join form present.
    Incomplete(IncompleteLookup),
}

impl LookupSpec {
    /// Foreign collection name.
    pub fn from(&self) -> &str {
        match self {
            Self::Correlated(l) => &l.from,
            Self::Simple(l) => &l.from,
            Self::Incomplete(l) => &l.from,
        }
    }

    /// Output array field.
    pub fn as_field(&self) -> &str {
        match self {
            Self::Correlated(l) => &l.as_field,
            Self::Simple(l) => &l.as_field,
            Self::Incomplete(l) => &l.as_field,
        }
    }

    /// Whether the joined array should be unwound right after the lookup.
    pub const fn unwind(&self) -> bool {
        match self {
            Self::Correlated(l) => l.unwind,
            Self::Simple(l) => l.unwind,
            Self::Incomplete(_) => false,
        }
    }
}

/// Equality join on a local and a foreign field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleLookup {
    /// Foreign collection.
    pub from: String,
    /// Output array field.
    #[serde(rename = "as")]
    pub as_field: String,
    /// Field on the input documents.
    pub local_field: String,
    /// Field on the foreign documents.
    pub foreign_field: String,
    /// Unwind the output array afterwards.
    #[serde(default)]
    pub unwind: bool,
}

/// Join driven by a sub-pipeline with bound variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedLookup {
    /// Foreign collection.
    pub from: String,
    /// Output array field.
    #[serde(rename = "as")]
    pub as_field: String,
    /// Variables bound from the input document.
    #[serde(rename = "let", default)]
    pub let_vars: Document,
    /// Sub-pipeline run against the foreign collection.
    pub pipeline: Vec<Value>,
    /// Unwind the output array afterwards.
    #[serde(default)]
    pub unwind: bool,
}

/// A lookup that names neither join form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteLookup {
    /// Foreign collection, if given.
    #[serde(default)]
    pub from: String,
    /// Output array field, if given.
    #[serde(rename = "as", default)]
    pub as_field: String,
}

/// Grouping stage specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupBy {
    /// The `_id` grouping key expression.
    #[serde(default)]
    pub id: Value,
    /// Output fields and their accumulators.
    #[serde(default)]
    pub fields: IndexMap<String, Accumulator>,
}

/// One accumulator in a grouping stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Accumulator {
    /// Named reduction over `1`, e.g. `"sum"` or `"count"`.
    Named(String),
    /// `{ "operator": "sum", "field": "$amount" }`.
    Operator {
        /// Accumulator name, with or without `$`.
        operator: String,
        /// Operand expression.
        field: Value,
    },
    /// `{ "expression": { "$sum": { "$multiply": [...] } } }`.
    Expression {
        /// A complete accumulator expression.
        expression: Value,
    },
    /// Any other object, assumed to already be a valid accumulator.
    Raw(Document),
}

/// Row post-processing specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostProcessSpec {
    /// Calculated fields, applied in order.
    #[serde(default)]
    pub calculations: IndexMap<String, Calculation>,
    /// Display formatting per field.
    #[serde(default)]
    pub formatting: IndexMap<String, FormatSpec>,
}

impl PostProcessSpec {
    /// Whether the spec changes anything.
    pub fn is_empty(&self) -> bool {
        self.calculations.is_empty() && self.formatting.is_empty()
    }
}

/// A calculated field.
///
/// `formula` takes precedence when both forms are present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Calculation {
    /// Arithmetic template such as `"$qty * $price"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    /// Expression in the `$add`/`$multiply`/`$divide` algebra.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<Value>,
}

impl Calculation {
    /// A formula-based calculation.
    pub fn formula(formula: impl Into<String>) -> Self {
        Self {
            formula: Some(formula.into()),
            expression: None,
        }
    }

    /// An expression-based calculation.
    pub const fn expression(expression: Value) -> Self {
        Self {
            formula: None,
            expression: Some(expression),
        }
    }
}

/// How to render one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSpec {
    /// Transform kind.
    #[serde(rename = "type")]
    pub kind: FormatKind,
    /// BCP 47 locale tag; `en-US` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// ISO 4217 code for `currency`; `USD` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Fixed number of fraction digits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u32>,
}

impl FormatSpec {
    /// A spec of the given kind with default locale and precision.
    pub const fn new(kind: FormatKind) -> Self {
        Self {
            kind,
            locale: None,
            currency: None,
            decimals: None,
        }
    }

    /// Set the locale.
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Set the currency code.
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// Set fixed fraction digits.
    pub const fn with_decimals(mut self, decimals: u32) -> Self {
        self.decimals = Some(decimals);
        self
    }
}

/// Formatting transform kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    /// Locale-aware digit grouping.
    Number,
    /// Locale and currency aware amount.
    Currency,
    /// `value * 100` with a `%` suffix.
    Percentage,
    /// Locale short date.
    Date,
}

/// Builder for [`AggregationConfig`].
#[derive(Debug, Clone)]
pub struct AggregationConfigBuilder {
    config: AggregationConfig,
}

fn into_document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

impl AggregationConfigBuilder {
    /// Create a builder for a config named `name` over `collection`.
    pub fn new(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            config: AggregationConfig {
                name: name.into(),
                collection: collection.into(),
                ..Default::default()
            },
        }
    }

    /// Set the base filter. Non-object values are ignored.
    pub fn base_filter(mut self, filter: Value) -> Self {
        self.config.base_filter = into_document(filter);
        self
    }

    /// Map a logical filter key to a physical path.
    pub fn field_mapping(mut self, logical: impl Into<String>, physical: impl Into<String>) -> Self {
        self.config
            .field_mappings
            .insert(logical.into(), physical.into());
        self
    }

    /// Declare an array field for nested-element filtering.
    pub fn array_field(mut self, field: impl Into<String>) -> Self {
        self.config.array_fields.push(field.into());
        self
    }

    /// Unwind an array path.
    pub fn unwind(mut self, spec: UnwindSpec) -> Self {
        self.config.unwind = Some(spec);
        self
    }

    /// Add a lookup.
    pub fn lookup(mut self, lookup: LookupSpec) -> Self {
        self.config.lookups.push(lookup);
        self
    }

    /// Set the grouping key.
    pub fn group_id(mut self, id: Value) -> Self {
        self.config.group_by.get_or_insert_with(GroupBy::default).id = id;
        self
    }

    /// Add a grouped output field.
    pub fn accumulator(mut self, name: impl Into<String>, accumulator: Accumulator) -> Self {
        self.config
            .group_by
            .get_or_insert_with(GroupBy::default)
            .fields
            .insert(name.into(), accumulator);
        self
    }

    /// Set the `$project` body.
    pub fn project(mut self, project: Value) -> Self {
        self.config.project = Some(project);
        self
    }

    /// Set the `$sort` body.
    pub fn sort(mut self, sort: Value) -> Self {
        self.config.sort = Some(sort);
        self
    }

    /// Set the `$limit` body.
    pub fn limit(mut self, limit: Value) -> Self {
        self.config.limit = Some(limit);
        self
    }

    /// Use a custom stage template instead of declarative assembly.
    pub fn pipeline(mut self, stages: Vec<Value>) -> Self {
        self.config.pipeline = Some(stages);
        self
    }

    /// Set the post-lookup predicate. Non-object values are ignored.
    pub fn post_lookup_filter(mut self, filter: Value) -> Self {
        self.config.post_lookup_filter = Some(into_document(filter));
        self
    }

    /// Set row post-processing.
    pub fn post_process(mut self, spec: PostProcessSpec) -> Self {
        self.config.post_process = Some(spec);
        self
    }

    /// Finish building.
    pub fn build(self) -> AggregationConfig {
        self.config
    }
}
