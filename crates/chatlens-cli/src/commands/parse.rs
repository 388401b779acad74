use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use chatlens_core::storage::MessageStore;
use chatlens_import::{parse, ExportFormat};

use super::log_progress;
use crate::output::format::format_summary;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct ParseArgs {
    /// Raw export (JSON array of conversations)
    pub input: PathBuf,

    /// Canonical message store to (re)write
    #[arg(long, default_value = "chatlens.db")]
    pub db: PathBuf,

    /// Export shape (tree or list); detected when omitted
    #[arg(long = "export-format")]
    pub export_format: Option<ExportFormat>,
}

pub fn run(args: &ParseArgs, format: OutputFormat) -> Result<()> {
    let mut store = MessageStore::open(&args.db)
        .with_context(|| format!("Failed to open message store {}", args.db.display()))?;
    let mut progress = log_progress("parse");
    let summary = parse::run(&args.input, &mut store, args.export_format, Some(&mut progress))
        .with_context(|| format!("Failed to parse {}", args.input.display()))?;
    println!("{}", format_summary("Parse", &summary, format));
    Ok(())
}
