use anyhow::Result;

use chatlens_analysis::alignment;

use super::{log_progress, stage_failed, StageArgs};
use crate::output::format::format_summary;
use crate::output::OutputFormat;

/// Alignment reads only the domain share tables, so the store is not opened.
pub fn run(args: &StageArgs, format: OutputFormat) -> Result<()> {
    let mut progress = log_progress("alignment");
    let summary = alignment::run(&args.out, Some(&mut progress))
        .map_err(|e| stage_failed("Alignment", e))?;
    println!("{}", format_summary("Dyadic alignment", &summary, format));
    Ok(())
}
