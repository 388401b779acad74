use std::path::Path;

use serde::{Deserialize, Serialize};

use chatlens_core::model::{Role, ShareTable};
use chatlens_core::storage::write_rows;
use chatlens_core::{Progress, ProgressObserver};

use crate::domains::read_monthly_shares;
use crate::error::AnalysisError;
use crate::stats::{js_divergence, mean};

pub const ALIGNMENT_FILE: &str = "dyadic_alignment_monthly.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRow {
    pub year_month: String,
    pub user_messages: u64,
    pub assistant_messages: u64,
    pub js_divergence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentSummary {
    pub months: usize,
    /// Months present for only one role.
    pub skipped_months: usize,
    pub mean_divergence: f64,
}

/// Monthly user-vs-assistant Jensen-Shannon divergence over macro domains.
pub fn monthly_alignment(table: &ShareTable) -> Vec<AlignmentRow> {
    table
        .shared_periods()
        .into_iter()
        .filter_map(|month| {
            let user = table.shares(&month, Role::User)?;
            let assistant = table.shares(&month, Role::Assistant)?;
            let js = js_divergence(&user, &assistant)?;
            Some(AlignmentRow {
                user_messages: table.total(&month, Role::User),
                assistant_messages: table.total(&month, Role::Assistant),
                js_divergence: js,
                year_month: month,
            })
        })
        .collect()
}

pub fn run(
    out_dir: &Path,
    progress: Option<&mut dyn ProgressObserver>,
) -> Result<AlignmentSummary, AnalysisError> {
    let mut progress = Progress::new("alignment", progress);
    progress.report(0.0, "Loading monthly domain shares");
    let table = read_monthly_shares(out_dir)?;

    progress.report(0.3, "Computing monthly divergence");
    let rows = monthly_alignment(&table);
    write_rows(&out_dir.join(ALIGNMENT_FILE), &rows)?;

    let divergences: Vec<f64> = rows.iter().map(|r| r.js_divergence).collect();
    let summary = AlignmentSummary {
        months: rows.len(),
        skipped_months: table.periods().count() - rows.len(),
        mean_divergence: mean(&divergences),
    };
    tracing::info!(
        months = summary.months,
        mean_divergence = summary.mean_divergence,
        "Dyadic alignment computed"
    );
    progress.finish("Alignment complete");
    Ok(summary)
}
