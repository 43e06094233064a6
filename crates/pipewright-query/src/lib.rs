//! Aggregation pipeline compiler and result post-processor.
//!
//! This crate turns an [`AggregationConfig`](pipewright_core::AggregationConfig)
//! plus runtime filter parameters into an ordered list of
//! [`PipelineStage`](pipewright_core::PipelineStage)s for a document store,
//! and shapes the rows the store returns.
//!
//! # Overview
//!
//! - [`filter`] parses `field__operator` keys and coerces values
//! - [`matcher`] splits filters into document-level and element-level matches
//! - [`assembler`] orders stages, in template or declarative mode
//! - [`compiler`] ties those together behind an injectable clock
//! - [`expr`] and [`formula`] evaluate calculated fields without any string eval
//! - [`postprocess`] applies calculations and [`format`]ting to result rows
//! - [`executor`] is the store boundary and the end-to-end run
//!
//! # Example
//!
//! ```
//! use pipewright_core::{AggregationConfig, FilterParameters};
//! use pipewright_query::compile;
//! use serde_json::json;
//!
//! let config = AggregationConfig::builder("open-orders", "documents")
//!     .base_filter(json!({ "documentType": "order" }))
//!     .field_mapping("status", "data.status")
//!     .limit(json!(50))
//!     .build();
//!
//! let mut filters = FilterParameters::new();
//! filters.insert("status__in".into(), json!(["open", "held"]));
//!
//! let stages = compile(&config, &filters).unwrap();
//! assert_eq!(stages.len(), 2);
//! assert_eq!(
//!     stages[0].body(),
//!     json!({ "documentType": "order", "data.status": { "$in": ["open", "held"] } })
//! );
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod assembler;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod expr;
pub mod filter;
pub mod format;
pub mod formula;
pub mod mapping;
pub mod matcher;
pub mod postprocess;

pub use assembler::PipelineAssembler;
pub use compiler::{compile, Compiler, CompilerOptions};
pub use error::{
    AggregationError, CalculationError, ConfigurationError, ExecutionError, LookupSpecError,
    StoreError,
};
pub use executor::{Aggregation, AggregationResponse, Executor, ResponseMeta};
pub use expr::{evaluate_expression, Expr};
pub use matcher::{MatchFragments, MatchStageBuilder};
pub use postprocess::{post_process, ResultPostProcessor};
