//! Implementation of the pw-compile command.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use pipewright_core::FixedClock;
use pipewright_query::{Compiler, CompilerOptions};
use serde_json::Value;

use crate::input::{load_config, load_filters, parse_assignment, parse_instant, write_json};

/// Compile an aggregation config and runtime filters into a pipeline.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The aggregation config (JSON)
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// JSON object of filter parameters
    #[arg(long, value_name = "FILE")]
    pub filters: Option<PathBuf>,

    /// A single filter parameter; repeatable, overrides --filters
    #[arg(short = 'F', long = "filter", value_name = "KEY=VALUE", value_parser = parse_assignment)]
    pub filter: Vec<(String, Value)>,

    /// Resolve relative dates against this instant instead of the system clock
    #[arg(long, value_name = "RFC3339", value_parser = parse_instant)]
    pub now: Option<DateTime<Utc>>,

    /// Base-filter keys accepted as the document-type discriminator
    #[arg(long = "discriminator", value_name = "KEY")]
    pub discriminators: Vec<String>,

    /// Pretty-print the pipeline
    #[arg(long)]
    pub pretty: bool,

    /// Show debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

fn run(args: &Args) -> Result<ExitCode> {
    let config = load_config(&args.config)?;
    let filters = load_filters(args.filters.as_deref(), &args.filter)?;

    let mut options = CompilerOptions::default();
    if !args.discriminators.is_empty() {
        options = options.with_discriminator_keys(args.discriminators.iter().cloned());
    }
    let now = args.now.unwrap_or_else(Utc::now);
    let compiler = Compiler::with_clock(FixedClock::new(now)).options(options);

    match compiler.compile(&config, &filters) {
        Ok(stages) => {
            write_json(&stages, args.pretty)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("error: {e}");
            Ok(ExitCode::from(1))
        }
    }
}

/// Main entry point for the compile command.
pub fn main() -> ExitCode {
    let args = Args::parse();
    super::init_tracing(args.verbose);

    match run(&args) {
        Ok(exit_code) => exit_code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
