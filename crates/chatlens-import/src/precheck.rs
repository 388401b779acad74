use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chatlens_core::config::PrecheckConfig;
use chatlens_core::model::Role;
use chatlens_core::{Progress, ProgressObserver};

use crate::import::{detect_conversations, extract_messages, ExportFormat};
use crate::parse::load_export;

/// What a raw export contains, and whether it is large enough to analyze.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrecheckReport {
    pub format: Option<ExportFormat>,
    pub format_confidence: String,
    pub total_conversations: usize,
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub months_covered: usize,
    pub min_user_messages: usize,
    pub min_months: usize,
    pub passes_message_minimum: bool,
    pub passes_month_minimum: bool,
    pub warnings: Vec<String>,
}

impl PrecheckReport {
    pub fn ready(&self) -> bool {
        self.format.is_some() && self.passes_message_minimum && self.passes_month_minimum
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let yes_no = |b: bool| if b { "YES" } else { "NO" };
        let format = self.format.map_or("unknown", |f| f.as_str());
        let mut lines = vec![
            format!("Format detected : {format} ({})", self.format_confidence),
            format!("Conversations   : {}", self.total_conversations),
            format!("Total messages  : {}", self.total_messages),
            format!("  user          : {}", self.user_messages),
            format!("  assistant     : {}", self.assistant_messages),
        ];
        if let (Some(first), Some(last)) = (self.earliest, self.latest) {
            lines.push(format!(
                "Date range      : {} to {}",
                first.format("%Y-%m-%d"),
                last.format("%Y-%m-%d")
            ));
            lines.push(format!("Months covered  : {}", self.months_covered));
        }
        lines.push(format!(
            "Meets msg min ({}) : {}",
            self.min_user_messages,
            yes_no(self.passes_message_minimum)
        ));
        lines.push(format!(
            "Meets month min ({}) : {}",
            self.min_months,
            yes_no(self.passes_month_minimum)
        ));
        if !self.warnings.is_empty() {
            lines.push("Warnings:".into());
            lines.extend(self.warnings.iter().map(|w| format!("  ! {w}")));
        }
        lines
    }
}

/// Inspect the export at `json_path` without writing anything.
///
/// Problems with the file itself (missing, not JSON, unknown shape) are
/// reported as warnings on a report that is not `ready()`.
pub fn run(
    json_path: &Path,
    config: &PrecheckConfig,
    progress: Option<&mut dyn ProgressObserver>,
) -> PrecheckReport {
    let mut progress = Progress::new("precheck", progress);
    let mut report = PrecheckReport {
        min_user_messages: config.min_user_messages,
        min_months: config.min_months,
        ..Default::default()
    };

    progress.report(0.0, "Loading file");
    let conversations = match load_export(json_path) {
        Ok((conversations, _)) => conversations,
        Err(e) => {
            tracing::warn!("Pre-check could not load {}: {e}", json_path.display());
            report.warnings.push(format!("Could not load export: {e}"));
            progress.finish("Pre-check complete");
            return report;
        }
    };

    progress.report(0.2, "Detecting format");
    let format = match detect_conversations(&conversations) {
        Ok(f) => f,
        Err(reason) => {
            report.format_confidence = reason;
            report.warnings.push(
                "Format not recognised. Expected a tree-shaped or list-shaped conversation export."
                    .into(),
            );
            progress.finish("Pre-check complete");
            return report;
        }
    };
    report.format = Some(format);
    report.format_confidence = format.description().into();
    report.total_conversations = conversations.len();

    progress.report(0.4, "Counting messages");
    let extraction = extract_messages(format, &conversations);
    report.total_messages = extraction.messages.len();
    report.user_messages = extraction
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .count();
    report.assistant_messages = report.total_messages - report.user_messages;
    report.passes_message_minimum = report.user_messages >= config.min_user_messages;
    if !report.passes_message_minimum {
        report.warnings.push(format!(
            "Only {} user messages found; minimum required is {}.",
            report.user_messages, config.min_user_messages
        ));
    }

    progress.report(0.7, "Checking date range");
    let timestamps = extraction.messages.iter().map(|m| m.timestamp);
    let earliest = timestamps.clone().reduce(f64::min);
    let latest = timestamps.reduce(f64::max);
    match (earliest, latest) {
        (Some(first), Some(last)) => {
            report.earliest = to_datetime(first);
            report.latest = to_datetime(last);
            let months: BTreeSet<&str> = extraction
                .messages
                .iter()
                .map(|m| m.year_month.as_str())
                .collect();
            report.months_covered = months.len();
            report.passes_month_minimum = report.months_covered >= config.min_months;
            if !report.passes_month_minimum {
                report.warnings.push(format!(
                    "Only {} distinct month(s) of data found; minimum required is {}.",
                    report.months_covered, config.min_months
                ));
            }
        }
        _ => report
            .warnings
            .push("No valid timestamps found in messages.".into()),
    }

    tracing::info!(
        format = %format,
        user_messages = report.user_messages,
        months = report.months_covered,
        ready = report.ready(),
        "Pre-check finished"
    );
    progress.finish("Pre-check complete");
    report
}

fn to_datetime(ts: f64) -> Option<DateTime<Utc>> {
    let secs = ts.floor();
    let nanos = ((ts - secs) * 1e9) as u32;
    DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
}
