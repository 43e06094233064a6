//! Core error types.

use thiserror::Error;

/// Error returned when a JSON value is not a well-formed pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The stage is not a JSON object.
    #[error("stage must be an object")]
    NotAnObject,
    /// The stage object does not have exactly one key.
    #[error("stage must have exactly one operator, found {0}")]
    OperatorCount(usize),
    /// The single key is not a `$`-prefixed operator.
    #[error("stage key `{0}` is not an operator")]
    NotAnOperator(String),
    /// The stage body has the wrong JSON type.
    #[error("{operator} body must be {expected}")]
    InvalidBody {
        /// Stage operator.
        operator: String,
        /// Expected body shape.
        expected: &'static str,
    },
}
