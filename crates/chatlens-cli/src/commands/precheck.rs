use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use chatlens_core::config::PipelineConfig;
use chatlens_import::precheck;

use super::log_progress;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct PrecheckArgs {
    /// Raw export (JSON array of conversations)
    pub input: PathBuf,

    /// JSON configuration file; only the `precheck` section is used
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run(args: &PrecheckArgs, format: OutputFormat) -> Result<()> {
    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let mut progress = log_progress("precheck");
    let report = precheck::run(&args.input, &config.precheck, Some(&mut progress));

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("Pre-check: {}", args.input.display());
            for line in report.summary_lines() {
                println!("  {line}");
            }
            println!();
            if report.ready() {
                println!("Ready for analysis.");
            } else {
                println!("Not ready for analysis.");
            }
        }
    }
    Ok(())
}
