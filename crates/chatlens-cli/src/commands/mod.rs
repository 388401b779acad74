pub mod alignment;
pub mod coupling;
pub mod domains;
pub mod dynamics;
pub mod parse;
pub mod precheck;
pub mod profile;
pub mod robustness;
pub mod run;
pub mod topics;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use chatlens_analysis::{AnalysisError, ErrorClass};
use chatlens_core::config::PipelineConfig;
use chatlens_core::storage::MessageStore;

#[derive(Subcommand)]
pub enum Commands {
    /// Check whether an export is large enough to analyse
    Precheck(precheck::PrecheckArgs),
    /// Parse an export into the canonical message store
    Parse(parse::ParseArgs),
    /// Score lexical markers per message and per month
    Profile(StageArgs),
    /// Fit fine topic clusters and monthly topic entropy
    Topics(StageArgs),
    /// Group fine clusters into macro domains and build share tables
    Domains(StageArgs),
    /// Monthly user/assistant divergence over macro domains
    Alignment(StageArgs),
    /// Refit topics over a grid and test against null models
    Robustness(StageArgs),
    /// Test directional lag-1 coupling between the two roles
    Coupling(StageArgs),
    /// Scale separation, states, rolling entropy and initiation tests
    Dynamics(StageArgs),
    /// Run the whole pipeline on an export
    Run(run::RunArgs),
}

/// Arguments shared by every analysis stage.
#[derive(Args, Clone)]
pub struct StageArgs {
    /// Canonical message store
    #[arg(long, default_value = "chatlens.db")]
    pub db: PathBuf,

    /// Directory for stage output tables
    #[arg(long, default_value = "out")]
    pub out: PathBuf,

    /// JSON configuration file (every section optional)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl StageArgs {
    pub fn load_config(&self) -> Result<PipelineConfig> {
        match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display())),
            None => Ok(PipelineConfig::default()),
        }
    }

    pub fn open_store(&self) -> Result<MessageStore> {
        MessageStore::open_existing(&self.db).with_context(|| {
            format!(
                "Failed to open message store {} (run `chatlens parse` first)",
                self.db.display()
            )
        })
    }

    pub fn ensure_out(&self) -> Result<()> {
        std::fs::create_dir_all(&self.out)
            .with_context(|| format!("Failed to create {}", self.out.display()))
    }
}

/// Progress observer that forwards stage progress to the log.
pub fn log_progress(stage: &'static str) -> impl FnMut(f64, &str) {
    move |fraction, status| {
        tracing::info!(stage, percent = (fraction * 100.0).round(), "{status}");
    }
}

/// Attach a hint matching the failure class to a stage error.
pub fn stage_failed(stage: &str, err: AnalysisError) -> anyhow::Error {
    let hint = match err.class() {
        ErrorClass::Input => "check that earlier stages ran with the same --out",
        ErrorClass::Configuration => "check the configuration values",
        ErrorClass::Computation => "the data cannot support this analysis",
    };
    anyhow::Error::new(err).context(format!("{stage} failed ({hint})"))
}
