//! Core types for pipewright.
//!
//! This crate provides the building blocks shared by the aggregation compiler:
//!
//! - [`AggregationConfig`] - The declarative query blueprint and its sub-specs
//! - [`PipelineStage`] - Tagged intermediate representation of one pipeline stage
//! - [`Clock`] - Injectable source of "now"
//! - [`dates`] - Date placeholder (`now-7d`) and preset (`YTD`, `QTD`, `MTD`) resolution
//!
//! # Example
//!
//! ```
//! use pipewright_core::{AggregationConfig, PipelineStage};
//! use serde_json::json;
//!
//! let config = AggregationConfig::builder("open-orders", "documents")
//!     .base_filter(json!({ "documentType": "order" }))
//!     .sort(json!({ "createdAt": -1 }))
//!     .build();
//!
//! assert_eq!(config.collection, "documents");
//! let stage = PipelineStage::from_document(&json!({ "$limit": 10 })).unwrap();
//! assert_eq!(stage.operator(), "$limit");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod dates;
pub mod error;
pub mod stage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    Accumulator, AggregationConfig, AggregationConfigBuilder, Calculation, CorrelatedLookup,
    FormatKind, FormatSpec, GroupBy, IncompleteLookup, LookupSpec, PostProcessSpec, SimpleLookup,
    UnwindSpec, DEFAULT_ARRAY_FIELD,
};
pub use dates::{DateBound, DatePreset, DateRange};
pub use error::StageError;
pub use stage::PipelineStage;

/// A JSON object with insertion-ordered keys.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// A single row returned by the executor.
pub type ResultRow = Document;

/// Runtime filter parameters keyed by `field` or `field__operator`.
pub type FilterParameters = Document;
