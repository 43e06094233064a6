//! Implementation of the pw-postprocess command.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use pipewright_query::post_process;

use crate::input::{load_config, load_rows, write_json};

/// Apply a config's calculations and formatting to result rows.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The aggregation config whose `postProcess` section is applied
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Rows as a JSON array or response envelope; `-` or absent reads stdin
    #[arg(value_name = "ROWS")]
    pub rows: Option<PathBuf>,

    /// Pretty-print the rows
    #[arg(long)]
    pub pretty: bool,

    /// Show debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

fn run(args: &Args) -> Result<ExitCode> {
    let config = load_config(&args.config)?;
    let rows = load_rows(args.rows.as_deref())?;

    let rows = match &config.post_process {
        Some(spec) => post_process(&rows, spec),
        None => {
            tracing::warn!("config `{}` has no postProcess section", config.name);
            rows
        }
    };

    write_json(&rows, args.pretty)?;
    Ok(ExitCode::SUCCESS)
}

/// Main entry point for the post-process command.
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
