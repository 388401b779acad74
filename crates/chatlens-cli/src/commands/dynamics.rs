use anyhow::Result;

use chatlens_analysis::dynamics;

use super::{log_progress, stage_failed, StageArgs};
use crate::output::format::format_summary;
use crate::output::OutputFormat;

pub fn run(args: &StageArgs, format: OutputFormat) -> Result<()> {
    let config = args.load_config()?;
    let store = args.open_store()?;
    args.ensure_out()?;

    let mut progress = log_progress("dynamics");
    let summary = dynamics::run(&store, &args.out, &config.dynamics, Some(&mut progress))
        .map_err(|e| stage_failed("Dynamics analysis", e))?;
    println!("{}", format_summary("Dynamics", &summary, format));
    Ok(())
}
