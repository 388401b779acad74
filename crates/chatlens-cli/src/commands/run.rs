use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

use chatlens_analysis::{alignment, coupling, domains, dynamics, profile, robustness, topics};
use chatlens_core::storage::MessageStore;
use chatlens_import::{parse, precheck, ExportFormat};

use super::{log_progress, stage_failed, StageArgs};
use crate::output::format::format_run;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct RunArgs {
    /// Raw export (JSON array of conversations)
    pub input: PathBuf,

    #[command(flatten)]
    pub stage: StageArgs,

    /// Export shape (tree or list); detected when omitted
    #[arg(long = "export-format")]
    pub export_format: Option<ExportFormat>,

    /// Run even if the export fails the pre-check minimums
    #[arg(long)]
    pub skip_precheck: bool,
}

pub fn run(args: &RunArgs, format: OutputFormat) -> Result<()> {
    let config = args.stage.load_config()?;
    let out = &args.stage.out;
    let mut stages: Vec<(&str, Value)> = Vec::new();

    if !args.skip_precheck {
        let mut progress = log_progress("precheck");
        let report = precheck::run(&args.input, &config.precheck, Some(&mut progress));
        if !report.ready() {
            let details = report.summary_lines().join("\n  ");
            anyhow::bail!(
                "Export did not pass the pre-check (use --skip-precheck to run anyway):\n  {details}"
            );
        }
        stages.push(("precheck", serde_json::to_value(&report)?));
    }

    let mut store = MessageStore::open(&args.stage.db)
        .with_context(|| format!("Failed to open message store {}", args.stage.db.display()))?;
    let mut progress = log_progress("parse");
    let parsed = parse::run(&args.input, &mut store, args.export_format, Some(&mut progress))
        .with_context(|| format!("Failed to parse {}", args.input.display()))?;
    stages.push(("parse", serde_json::to_value(&parsed)?));
    args.stage.ensure_out()?;

    let mut progress = log_progress("profile");
    let summary = profile::run(&store, out, &config.profile, Some(&mut progress))
        .map_err(|e| stage_failed("Profile scoring", e))?;
    stages.push(("profile", serde_json::to_value(&summary)?));

    let mut progress = log_progress("topics");
    let summary = topics::run(&store, out, &config.topics, Some(&mut progress))
        .map_err(|e| stage_failed("Topic model", e))?;
    stages.push(("topics", serde_json::to_value(&summary)?));

    let mut progress = log_progress("domains");
    let summary = domains::run(&store, out, &config.domains, Some(&mut progress))
        .map_err(|e| stage_failed("Domain mapping", e))?;
    stages.push(("domains", serde_json::to_value(&summary)?));

    let mut progress = log_progress("alignment");
    let summary =
        alignment::run(out, Some(&mut progress)).map_err(|e| stage_failed("Alignment", e))?;
    stages.push(("alignment", serde_json::to_value(&summary)?));

    let mut progress = log_progress("robustness");
    let summary = robustness::run(&store, out, &config.robustness, Some(&mut progress))
        .map_err(|e| stage_failed("Robustness testing", e))?;
    stages.push(("robustness", serde_json::to_value(&summary)?));

    let mut progress = log_progress("coupling");
    let summary = coupling::run(out, &config.coupling, Some(&mut progress))
        .map_err(|e| stage_failed("Coupling analysis", e))?;
    stages.push(("coupling", serde_json::to_value(&summary)?));

    let mut progress = log_progress("dynamics");
    let summary = dynamics::run(&store, out, &config.dynamics, Some(&mut progress))
        .map_err(|e| stage_failed("Dynamics analysis", e))?;
    stages.push(("dynamics", serde_json::to_value(&summary)?));

    tracing::info!(out = %out.display(), "Pipeline complete");
    println!("{}", format_run(&stages, format));
    Ok(())
}
