//! Regime structure over macro domains: scale separation, behavioural
//! states, rolling entropy and who initiates topic shifts and episodes.

mod initiation;
mod rolling;
mod scale;
mod states;

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use chatlens_core::config::DynamicsConfig;
use chatlens_core::model::{Message, Role};
use chatlens_core::storage::{write_rows, MessageStore};
use chatlens_core::{Progress, ProgressObserver};

use crate::domains::{
    read_domain_count, read_monthly_shares, read_node_domains, read_weekly_shares, NodeDomainRow,
};
use crate::error::AnalysisError;

pub use initiation::{
    episode_initiation, shift_initiation, EpisodeAnalysis, EpisodeDetailRow, EpisodeSummaryRow,
    ShiftAnalysis, ShiftDetailRow, ShiftSummaryRow, ThreadEpisodeRow,
};
pub use rolling::{rolling_entropy, RollingEntropyRow};
pub use scale::{scale_separation, ScaleSeparationRow};
pub use states::{classify, transition_summary, State, StateRow, TransitionRow};

pub const SCALE_FILE: &str = "scale_separation_report.csv";
pub const MONTHLY_STATES_FILE: &str = "monthly_states.csv";
pub const WEEKLY_STATES_FILE: &str = "monthly_states_refined.csv";
pub const TRANSITIONS_FILE: &str = "state_transition_summary.csv";
pub const WEEKLY_TRANSITIONS_FILE: &str = "state_transition_summary_refined.csv";
pub const SHIFT_SUMMARY_FILE: &str = "step10b_shift_initiation_summary.csv";
pub const SHIFT_DETAIL_FILE: &str = "step10b_shift_initiation_detail.csv";
pub const EPISODE_DETAIL_FILE: &str = "step10b2_episode_detail.csv";
pub const EPISODE_SUMMARY_FILE: &str = "step10b2_episode_summary.csv";
pub const EPISODE_THREADS_FILE: &str = "step10b2_thread_summary.csv";

pub fn rolling_file_name(window: usize) -> String {
    format!("rolling_entropy_{window}.csv")
}

/// A stored message joined with its macro domain.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMessage {
    pub node_id: String,
    pub thread_id: String,
    pub role: Role,
    pub timestamp: f64,
    pub year_month: String,
    pub year_week: String,
    pub macro_domain: usize,
}

/// Join messages with their domain labels, ordered by (timestamp, node_id).
/// Returns the labeled messages and the number left without a label.
pub fn label_messages(
    messages: Vec<Message>,
    nodes: &[NodeDomainRow],
) -> (Vec<LabeledMessage>, usize) {
    let domains: HashMap<&str, usize> = nodes
        .iter()
        .map(|n| (n.node_id.as_str(), n.macro_domain))
        .collect();
    let total = messages.len();
    let mut labeled: Vec<LabeledMessage> = messages
        .into_iter()
        .filter_map(|m| {
            let macro_domain = *domains.get(m.node_id.as_str())?;
            Some(LabeledMessage {
                year_week: m.year_week(),
                node_id: m.node_id,
                thread_id: m.thread_id,
                role: m.role,
                timestamp: m.timestamp,
                year_month: m.year_month,
                macro_domain,
            })
        })
        .collect();
    labeled.sort_by(|a, b| {
        a.timestamp
            .total_cmp(&b.timestamp)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    let unlabeled = total - labeled.len();
    (labeled, unlabeled)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicsSummary {
    pub messages: usize,
    pub unlabeled_messages: usize,
    pub scale_months: usize,
    pub monthly_states: usize,
    pub weekly_states: usize,
    pub rolling_windows: usize,
    pub threads_analyzed: usize,
    pub shifts: usize,
    pub episodes: usize,
}

pub fn run(
    store: &MessageStore,
    out_dir: &Path,
    config: &DynamicsConfig,
    progress: Option<&mut dyn ProgressObserver>,
) -> Result<DynamicsSummary, AnalysisError> {
    config.validate()?;
    let mut progress = Progress::new("dynamics", progress);
    progress.report(0.0, "Loading labeled messages");
    let nodes = read_node_domains(out_dir)?;
    let (messages, unlabeled) = label_messages(store.messages()?, &nodes);
    if unlabeled > 0 {
        tracing::warn!(unlabeled, "Messages without a macro domain were skipped");
    }
    let n_domains = messages
        .iter()
        .map(|m| m.macro_domain + 1)
        .max()
        .unwrap_or(0)
        .max(read_domain_count(out_dir)?);
    let monthly = read_monthly_shares(out_dir)?;
    let weekly = read_weekly_shares(out_dir)?;

    progress.report(0.1, "Scale separation");
    let scale = scale_separation(&messages, config.role, n_domains);
    write_rows(&out_dir.join(SCALE_FILE), &scale)?;

    progress.report(0.2, "State segmentation");
    let monthly_states = classify(&monthly, config);
    let weekly_states = classify(&weekly, config);
    write_rows(&out_dir.join(MONTHLY_STATES_FILE), &monthly_states)?;
    write_rows(&out_dir.join(WEEKLY_STATES_FILE), &weekly_states)?;
    write_rows(
        &out_dir.join(TRANSITIONS_FILE),
        &transition_summary(&monthly_states),
    )?;
    write_rows(
        &out_dir.join(WEEKLY_TRANSITIONS_FILE),
        &transition_summary(&weekly_states),
    )?;

    progress.report(0.3, "Rolling entropy");
    let windows = rolling_entropy(
        &messages,
        config.rolling_window,
        config.rolling_stride,
        n_domains,
    );
    write_rows(&out_dir.join(rolling_file_name(config.rolling_window)), &windows)?;

    progress.report(0.4, "Shift initiation");
    let shifts = shift_initiation(&messages, config);
    write_rows(&out_dir.join(SHIFT_DETAIL_FILE), &shifts.detail)?;
    let shift_summary: Vec<ShiftSummaryRow> = shifts.summary.iter().cloned().collect();
    write_rows(&out_dir.join(SHIFT_SUMMARY_FILE), &shift_summary)?;

    progress.report(0.9, "Episode initiation");
    let episodes = episode_initiation(&messages, config);
    write_rows(&out_dir.join(EPISODE_DETAIL_FILE), &episodes.detail)?;
    write_rows(&out_dir.join(EPISODE_THREADS_FILE), &episodes.threads)?;
    let episode_summary: Vec<EpisodeSummaryRow> = episodes.summary.iter().cloned().collect();
    write_rows(&out_dir.join(EPISODE_SUMMARY_FILE), &episode_summary)?;

    let summary = DynamicsSummary {
        messages: messages.len(),
        unlabeled_messages: unlabeled,
        scale_months: scale.len(),
        monthly_states: monthly_states.len(),
        weekly_states: weekly_states.len(),
        rolling_windows: windows.len(),
        threads_analyzed: shifts.detail.len(),
        shifts: shift_summary.first().map_or(0, |s| s.n_shifts),
        episodes: episodes.detail.len(),
    };
    tracing::info!(
        threads = summary.threads_analyzed,
        shifts = summary.shifts,
        episodes = summary.episodes,
        "Dynamics computed"
    );
    progress.finish("Dynamics complete");
    Ok(summary)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::LabeledMessage;
    use chatlens_core::model::Role;

    /// One thread in time order; `turns` lists (role, domain) per message.
    pub fn thread(id: &str, start: f64, turns: &[(Role, usize)]) -> Vec<LabeledMessage> {
        turns.iter()
            .enumerate()
            .map(|(i, &(role, macro_domain))| LabeledMessage {
                node_id: format!("{id}-{i:03}"),
                thread_id: id.to_string(),
                role,
                timestamp: start + i as f64,
                year_month: "2024-01".into(),
                year_week: "2024-W01".into(),
                macro_domain,
            })
            .collect()
    }

    pub fn alternating(n: usize, domain: impl Fn(usize) -> usize) -> Vec<(Role, usize)> {
        (0..n)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                (role, domain(i))
            })
            .collect()
    }
}
