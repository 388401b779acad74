use anyhow::Result;

use chatlens_analysis::topics;

use super::{log_progress, stage_failed, StageArgs};
use crate::output::format::format_summary;
use crate::output::OutputFormat;

pub fn run(args: &StageArgs, format: OutputFormat) -> Result<()> {
    let config = args.load_config()?;
    let store = args.open_store()?;
    args.ensure_out()?;

    let mut progress = log_progress("topics");
    let summary = topics::run(&store, &args.out, &config.topics, Some(&mut progress))
        .map_err(|e| stage_failed("Topic model", e))?;
    println!("{}", format_summary("Topics", &summary, format));
    Ok(())
}
