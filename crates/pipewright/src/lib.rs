//! Pipewright CLI tools.
//!
//! This crate provides command-line tools around the aggregation compiler:
//!
//! - `pw-compile`: Compile a config and filters into a pipeline
//! - `pw-postprocess`: Apply a config's calculations and formatting to result rows
//!
//! # Example Usage
//!
//! ```bash
//! pw-compile invoices.json -F customer__in='["C-1","C-2"]' -F date_range=MTD --pretty
//! pw-postprocess invoices.json rows.json --pretty
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cmd;
pub mod input;
