use anyhow::Result;

use chatlens_analysis::profile;

use super::{log_progress, stage_failed, StageArgs};
use crate::output::format::format_summary;
use crate::output::OutputFormat;

pub fn run(args: &StageArgs, format: OutputFormat) -> Result<()> {
    let config = args.load_config()?;
    let store = args.open_store()?;
    args.ensure_out()?;

    let mut progress = log_progress("profile");
    let summary = profile::run(&store, &args.out, &config.profile, Some(&mut progress))
        .map_err(|e| stage_failed("Profile scoring", e))?;
    println!("{}", format_summary("Profile", &summary, format));
    Ok(())
}
