use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use chatlens_core::config::ProfileConfig;
use chatlens_core::model::{Message, Role};
use chatlens_core::storage::{write_rows, MessageStore};
use chatlens_core::{Progress, ProgressObserver};

use crate::error::AnalysisError;

pub const PROFILE_FILE: &str = "ai_view_profile_v01.csv";
pub const TRAJECTORY_FILE: &str = "trajectory_monthly.csv";

/// Marker categories, in column order.
pub const CATEGORIES: [&str; 5] = [
    "system_thinking",
    "future_orient",
    "meta_cognitive",
    "relational",
    "uncertainty",
];

const SYSTEM_THINKING: &[&str] = &[
    "system", "systems", "process", "processes", "framework", "frameworks", "structure",
    "structures", "pipeline", "architecture", "feedback loop", "feedback loops", "workflow",
    "mechanism", "dependency", "dependencies", "interconnected", "holistic", "component",
    "components", "model", "models",
];
const FUTURE_ORIENT: &[&str] = &[
    "will", "going to", "plan", "plans", "planning", "future", "next", "eventually",
    "tomorrow", "goal", "goals", "roadmap", "long term", "long-term", "later", "upcoming",
    "intend", "aim",
];
const META_COGNITIVE: &[&str] = &[
    "i think", "i realize", "i realise", "i notice", "i wonder", "reflect", "reflecting",
    "my thinking", "my understanding", "i understand", "i learned", "i'm aware",
    "in hindsight", "on second thought", "rethink", "reconsider",
];
const RELATIONAL: &[&str] = &[
    "we", "us", "our", "together", "collaborate", "collaboration", "team", "partner",
    "friend", "friends", "family", "help me", "thank you", "thanks", "appreciate", "you and i",
    "relationship",
];
const UNCERTAINTY: &[&str] = &[
    "maybe", "perhaps", "might", "possibly", "not sure", "unsure", "uncertain", "i guess",
    "probably", "seems", "could be", "unclear", "don't know", "kind of", "sort of",
];

/// Case-insensitive, word-bounded patterns for the five marker categories.
pub struct Lexicon {
    patterns: Vec<Regex>,
}

impl Lexicon {
    pub fn new() -> Result<Self, AnalysisError> {
        let patterns = [
            SYSTEM_THINKING,
            FUTURE_ORIENT,
            META_COGNITIVE,
            RELATIONAL,
            UNCERTAINTY,
        ]
        .iter()
        .map(|terms| compile(terms))
        .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Non-overlapping hit counts per category for one text.
    pub fn score(&self, text: &str) -> [u32; 5] {
        let mut scores = [0u32; 5];
        for (slot, pattern) in scores.iter_mut().zip(&self.patterns) {
            *slot = pattern.find_iter(text).count() as u32;
        }
        scores
    }
}

fn compile(terms: &[&str]) -> Result<Regex, AnalysisError> {
    // Longer phrases first so "feedback loops" wins over "feedback loop".
    let mut terms: Vec<&str> = terms.to_vec();
    terms.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    let alternation = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))
        .map_err(|e| AnalysisError::Computation(format!("lexicon pattern: {e}")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub node_id: String,
    pub thread_id: String,
    pub role: Role,
    pub year_month: String,
    pub word_count: usize,
    pub system_thinking: u32,
    pub future_orient: u32,
    pub meta_cognitive: u32,
    pub relational: u32,
    pub uncertainty: u32,
}

impl ProfileRow {
    /// Category hits in [`CATEGORIES`] order.
    pub fn hits(&self) -> [u32; 5] {
        [
            self.system_thinking,
            self.future_orient,
            self.meta_cognitive,
            self.relational,
            self.uncertainty,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRow {
    pub year_month: String,
    pub user_messages: u64,
    pub system_thinking: f64,
    pub future_orient: f64,
    pub meta_cognitive: f64,
    pub relational: f64,
    pub uncertainty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub messages_scored: usize,
    pub user_messages: usize,
    pub months: usize,
    /// Total hits per category over user messages.
    pub user_totals: BTreeMap<String, u64>,
}

pub fn score_messages(lexicon: &Lexicon, messages: &[Message]) -> Vec<ProfileRow> {
    messages
        .iter()
        .map(|m| {
            let [system_thinking, future_orient, meta_cognitive, relational, uncertainty] =
                lexicon.score(&m.text);
            ProfileRow {
                node_id: m.node_id.clone(),
                thread_id: m.thread_id.clone(),
                role: m.role,
                year_month: m.year_month.clone(),
                word_count: m.text.split_whitespace().count(),
                system_thinking,
                future_orient,
                meta_cognitive,
                relational,
                uncertainty,
            }
        })
        .collect()
}

/// Monthly hit rates per `rate_base` user messages. Months without user
/// messages are omitted.
pub fn monthly_trajectory(rows: &[ProfileRow], rate_base: f64) -> Vec<TrajectoryRow> {
    let mut months: BTreeMap<&str, (u64, [u64; 5])> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.role == Role::User) {
        let entry = months.entry(row.year_month.as_str()).or_default();
        entry.0 += 1;
        for (acc, h) in entry.1.iter_mut().zip(row.hits()) {
            *acc += u64::from(h);
        }
    }
    months
        .into_iter()
        .map(|(month, (n, hits))| {
            let rate = |h: u64| h as f64 / n as f64 * rate_base;
            TrajectoryRow {
                year_month: month.to_string(),
                user_messages: n,
                system_thinking: rate(hits[0]),
                future_orient: rate(hits[1]),
                meta_cognitive: rate(hits[2]),
                relational: rate(hits[3]),
                uncertainty: rate(hits[4]),
            }
        })
        .collect()
}

/// Score every stored message and write the per-message and monthly tables.
pub fn run(
    store: &MessageStore,
    out_dir: &Path,
    config: &ProfileConfig,
    progress: Option<&mut dyn ProgressObserver>,
) -> Result<ProfileSummary, AnalysisError> {
    config.validate()?;
    let mut progress = Progress::new("profile", progress);
    progress.report(0.0, "Loading messages");
    let messages = store.messages()?;
    let lexicon = Lexicon::new()?;

    progress.report(0.2, "Scoring lexical markers");
    let rows = score_messages(&lexicon, &messages);

    progress.report(0.7, "Aggregating monthly trajectory");
    let trajectory = monthly_trajectory(&rows, config.rate_base);

    let mut user_totals: BTreeMap<String, u64> =
        CATEGORIES.iter().map(|c| (c.to_string(), 0)).collect();
    let mut user_messages = 0;
    for row in rows.iter().filter(|r| r.role == Role::User) {
        user_messages += 1;
        for (name, h) in CATEGORIES.iter().zip(row.hits()) {
            if let Some(total) = user_totals.get_mut(*name) {
                *total += u64::from(h);
            }
        }
    }

    progress.report(0.9, "Writing profile tables");
    write_rows(&out_dir.join(PROFILE_FILE), &rows)?;
    write_rows(&out_dir.join(TRAJECTORY_FILE), &trajectory)?;

    let summary = ProfileSummary {
        messages_scored: rows.len(),
        user_messages,
        months: trajectory.len(),
        user_totals,
    };
    tracing::info!(
        messages = summary.messages_scored,
        months = summary.months,
        "Profile scoring complete"
    );
    progress.finish("Profile complete");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatlens_core::storage::read_rows;

    fn message(id: &str, role: Role, ts: f64, text: &str) -> Message {
        Message::new(id, "t", role, ts, text).unwrap()
    }

    #[test]
    fn test_lexicon_counts_word_bounded_hits() {
        let lexicon = Lexicon::new().unwrap();
        let scores = lexicon.score("Maybe we could PLAN the System. Systemic? Perhaps not sure.");
        // "System" matches, "Systemic" does not.
        assert_eq!(scores[0], 1);
        assert_eq!(scores[1], 1);
        assert_eq!(scores[3], 1);
        assert_eq!(scores[4], 3);
        assert_eq!(lexicon.score(""), [0; 5]);
    }

    #[test]
    fn test_longer_phrases_are_not_double_counted() {
        let lexicon = Lexicon::new().unwrap();
        assert_eq!(lexicon.score("feedback loops everywhere")[0], 1);
    }

    #[test]
    fn test_run_writes_one_row_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MessageStore::open_in_memory().unwrap();
        let messages = vec![
            message("a", Role::User, 1_704_067_200.0, "maybe a plan"),
            message("b", Role::Assistant, 1_704_067_260.0, "the system will help"),
            message("c", Role::User, 1_706_745_600.0, "no markers here"),
            message("d", Role::Assistant, 1_709_251_200.0, "assistant only month"),
        ];
        store.replace_all(&messages, &[], &[]).unwrap();

        let summary = run(&store, dir.path(), &ProfileConfig::default(), None).unwrap();
        assert_eq!(summary.messages_scored, 4);
        assert_eq!(summary.user_messages, 2);
        assert_eq!(summary.months, 2);

        let rows: Vec<ProfileRow> = read_rows(&dir.path().join(PROFILE_FILE)).unwrap();
        assert_eq!(rows.len(), 4);
        let trajectory: Vec<TrajectoryRow> =
            read_rows(&dir.path().join(TRAJECTORY_FILE)).unwrap();
        assert_eq!(trajectory.len(), 2);
        assert_eq!(trajectory[0].year_month, "2024-01");
        assert_eq!(trajectory[0].user_messages, 1);
        assert_eq!(trajectory[0].uncertainty, 1000.0);
        assert_eq!(trajectory[0].future_orient, 1000.0);
        assert_eq!(trajectory[1].uncertainty, 0.0);
    }

    #[test]
    fn test_rerun_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MessageStore::open_in_memory().unwrap();
        store
            .replace_all(
                &[message("a", Role::User, 1_704_067_200.0, "we might plan")],
                &[],
                &[],
            )
            .unwrap();
        run(&store, dir.path(), &ProfileConfig::default(), None).unwrap();
        let first = std::fs::read(dir.path().join(PROFILE_FILE)).unwrap();
        run(&store, dir.path(), &ProfileConfig::default(), None).unwrap();
        assert_eq!(first, std::fs::read(dir.path().join(PROFILE_FILE)).unwrap());
    }
}
