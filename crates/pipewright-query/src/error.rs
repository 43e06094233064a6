//! Compiler error types.

use pipewright_core::{PipelineStage, StageError};
use serde_json::Value;
use thiserror::Error;

/// A structurally invalid aggregation config.
///
/// Raised before the executor is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// The base filter has no usable document-type discriminator.
    #[error(
        "aggregation `{config}`: baseFilter must contain a document-type discriminator (one of: {})",
        expected.join(", ")
    )]
    MissingDiscriminator {
        /// Config name.
        config: String,
        /// Keys that would have been accepted.
        expected: Vec<String>,
    },
    /// A template stage is not a valid stage document.
    #[error("aggregation `{config}`: pipeline stage {index} is invalid: {source}")]
    InvalidStage {
        /// Config name.
        config: String,
        /// Zero-based position in the template.
        index: usize,
        /// What was wrong with it.
        source: StageError,
    },
}

/// A lookup spec with neither join form. Recovered by skipping the stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("lookup {index} (from `{from}` as `{as_field}`) has neither localField/foreignField nor let/pipeline")]
pub struct LookupSpecError {
    /// Zero-based position in `lookups`.
    pub index: usize,
    /// Foreign collection, possibly empty.
    pub from: String,
    /// Output field, possibly empty.
    pub as_field: String,
}

/// Error raised by the store behind the executor boundary.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// The store rejected or failed the assembled pipeline.
#[derive(Debug, Error)]
#[error("aggregation `{config}` failed in the store: {source}")]
pub struct ExecutionError {
    /// Config name.
    pub config: String,
    /// The pipeline that was sent.
    pub pipeline: Vec<PipelineStage>,
    /// The store's error.
    #[source]
    pub source: StoreError,
}

impl ExecutionError {
    /// The offending pipeline in native form, for diagnostics.
    pub fn pipeline_json(&self) -> Value {
        Value::Array(self.pipeline.iter().map(PipelineStage::to_document).collect())
    }
}

/// A single post-process calculation failed.
///
/// Isolated to one field of one row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalculationError {
    /// The formula is not valid arithmetic.
    #[error("syntax error at position {position}: {message}")]
    Syntax {
        /// Byte offset in the formula.
        position: usize,
        /// Parser message.
        message: String,
    },
    /// A referenced field holds something that is not a number.
    #[error("field `{0}` is not numeric")]
    NonNumeric(String),
    /// A numeric literal cannot be represented.
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    /// Intermediate result out of range.
    #[error("arithmetic overflow")]
    Overflow,
    /// The calculation has neither a formula nor an expression.
    #[error("calculation has neither formula nor expression")]
    Empty,
}

/// Error returned by a full compile, execute and post-process run.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// The config is structurally invalid.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The store failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl AggregationError {
    /// HTTP status a routing layer should answer with.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Configuration(_) => 400,
            Self::Execution(_) => 500,
        }
    }
}
