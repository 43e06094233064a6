//! The store boundary and the end-to-end run.
//!
//! Compilation never touches the store. An [`Executor`] receives the finished
//! stage list; its rows are then post-processed and wrapped in the response
//! envelope the routing layer returns.

use pipewright_core::dates::format_instant;
use pipewright_core::{AggregationConfig, Clock, FilterParameters, PipelineStage, ResultRow, SystemClock};
use serde::Serialize;

use crate::compiler::Compiler;
use crate::error::{AggregationError, ExecutionError, StoreError};
use crate::postprocess::post_process;

/// Runs a compiled pipeline against a document store.
pub trait Executor {
    /// Execute `stages` against `collection`.
    ///
    /// # Errors
    ///
    /// Returns whatever the store reports; it is wrapped in an
    /// [`ExecutionError`] with the pipeline attached.
    fn execute(&self, collection: &str, stages: &[PipelineStage]) -> Result<Vec<ResultRow>, StoreError>;
}

impl<E: Executor + ?Sized> Executor for &E {
    fn execute(&self, collection: &str, stages: &[PipelineStage]) -> Result<Vec<ResultRow>, StoreError> {
        (**self).execute(collection, stages)
    }
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn execute(&self, collection: &str, stages: &[PipelineStage]) -> Result<Vec<ResultRow>, StoreError> {
        (**self).execute(collection, stages)
    }
}

/// Response envelope: rows plus metadata about the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationResponse {
    /// Post-processed rows.
    pub data: Vec<ResultRow>,
    /// Run metadata.
    pub meta: ResponseMeta,
}

/// Metadata describing a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseMeta {
    /// Number of rows in `data`.
    pub count: usize,
    /// Name of the config that ran.
    pub config: String,
    /// When the run happened, ISO-8601.
    pub timestamp: String,
    /// The filters as received.
    pub filters: FilterParameters,
}

/// Compile, execute and post-process in one call.
#[derive(Debug, Clone, Default)]
pub struct Aggregation<C: Clock = SystemClock> {
    compiler: Compiler<C>,
}

impl Aggregation<SystemClock> {
    /// An aggregation runner with the default compiler.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Clock> Aggregation<C> {
    /// An aggregation runner using `compiler`.
    pub const fn with_compiler(compiler: Compiler<C>) -> Self {
        Self { compiler }
    }

    /// Run `config` with `filters` through `executor`.
    ///
    /// # Errors
    ///
    /// Configuration errors are raised before `executor` is called. Store
    /// failures are returned as [`AggregationError::Execution`] and never retried.
    pub fn run<E: Executor>(
        &self,
        config: &AggregationConfig,
        filters: &FilterParameters,
        executor: &E,
    ) -> Result<AggregationResponse, AggregationError> {
        let pipeline = self.compiler.compile(config, filters)?;

        let rows = executor
            .execute(&config.collection, &pipeline)
            .map_err(|source| ExecutionError {
                config: config.name.clone(),
                pipeline: pipeline.clone(),
                source,
            })?;
        tracing::debug!("aggregation `{}` returned {} rows", config.name, rows.len());

        let data = match &config.post_process {
            Some(spec) if !spec.is_empty() => post_process(&rows, spec),
            _ => rows,
        };

        Ok(AggregationResponse {
            meta: ResponseMeta {
                count: data.len(),
                config: config.name.clone(),
                timestamp: format_instant(self.compiler.clock().now()),
                filters: filters.clone(),
            },
            data,
        })
    }
}
