use anyhow::Result;

use chatlens_analysis::coupling;

use super::{log_progress, stage_failed, StageArgs};
use crate::output::format::format_summary;
use crate::output::OutputFormat;

pub fn run(args: &StageArgs, format: OutputFormat) -> Result<()> {
    let config = args.load_config()?;
    let mut progress = log_progress("coupling");
    let summary = coupling::run(&args.out, &config.coupling, Some(&mut progress))
        .map_err(|e| stage_failed("Coupling analysis", e))?;
    println!("{}", format_summary("Directional coupling", &summary, format));
    Ok(())
}
