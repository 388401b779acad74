use anyhow::Result;

use chatlens_analysis::domains;

use super::{log_progress, stage_failed, StageArgs};
use crate::output::format::format_summary;
use crate::output::OutputFormat;

pub fn run(args: &StageArgs, format: OutputFormat) -> Result<()> {
    let config = args.load_config()?;
    let store = args.open_store()?;
    args.ensure_out()?;

    let mut progress = log_progress("domains");
    let summary = domains::run(&store, &args.out, &config.domains, Some(&mut progress))
        .map_err(|e| stage_failed("Domain mapping", e))?;
    println!("{}", format_summary("Macro domains", &summary, format));
    Ok(())
}
