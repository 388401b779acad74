//! Who moves the conversation: domain shifts and sustained episodes per
//! thread, attributed to the role that opened them.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use chatlens_core::config::DynamicsConfig;
use chatlens_core::model::Role;

use super::LabeledMessage;
use crate::stats::{self, binomial_two_sided, mean, p_greater, p_less, p_two_sided, std_dev};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftSummaryRow {
    pub n_threads: usize,
    pub n_shifts: usize,
    pub user_initiated: usize,
    pub assistant_initiated: usize,
    pub user_share: f64,
    pub null_mean: f64,
    pub null_std: f64,
    pub p_user: f64,
    pub p_assistant: f64,
    pub p_two_sided: f64,
    pub n_permutations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftDetailRow {
    pub thread_id: String,
    pub n_messages: usize,
    pub n_shifts: usize,
    pub user_initiated: usize,
    pub assistant_initiated: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShiftAnalysis {
    /// Absent when no eligible thread contains a shift.
    pub summary: Option<ShiftSummaryRow>,
    pub detail: Vec<ShiftDetailRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeDetailRow {
    pub thread_id: String,
    pub episode_index: usize,
    pub macro_domain: usize,
    pub start_ts: f64,
    pub end_ts: f64,
    pub length: usize,
    pub initiator: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummaryRow {
    pub n_episodes: usize,
    pub user_initiated: usize,
    pub assistant_initiated: usize,
    pub user_share: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadEpisodeRow {
    pub thread_id: String,
    pub n_messages: usize,
    pub n_episodes: usize,
    pub user_initiated: usize,
    pub assistant_initiated: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeAnalysis {
    /// Absent when no episode was found.
    pub summary: Option<EpisodeSummaryRow>,
    pub detail: Vec<EpisodeDetailRow>,
    pub threads: Vec<ThreadEpisodeRow>,
}

/// Threads with at least `min_len` messages, each in stream order.
fn eligible_threads(messages: &[LabeledMessage], min_len: usize) -> Vec<Vec<&LabeledMessage>> {
    let mut threads: BTreeMap<&str, Vec<&LabeledMessage>> = BTreeMap::new();
    for m in messages {
        threads.entry(m.thread_id.as_str()).or_default().push(m);
    }
    threads
        .into_values()
        .filter(|t| t.len() >= min_len)
        .collect()
}

/// Most frequent domain among `members`. A tie keeps the previous bucket's
/// domain when it is among the leaders, otherwise the leader seen first.
fn dominant_domain(members: &[&LabeledMessage], previous: Option<usize>) -> usize {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for m in members {
        *counts.entry(m.macro_domain).or_default() += 1;
    }
    let top = counts.values().copied().max().unwrap_or(0);
    if let Some(prev) = previous.filter(|p| counts.get(p) == Some(&top)) {
        return prev;
    }
    members
        .iter()
        .map(|m| m.macro_domain)
        .find(|d| counts.get(d) == Some(&top))
        .unwrap_or_default()
}

/// Positions of the messages credited with a shift. The thread is cut into
/// buckets of `bucket_secs` from its first message; where a bucket's dominant
/// domain differs from the previous bucket's, the first message in the new
/// bucket carrying the new domain opened the shift.
fn shift_positions(thread: &[&LabeledMessage], bucket_secs: f64) -> Vec<usize> {
    let Some(first) = thread.first() else {
        return Vec::new();
    };
    let start = first.timestamp;
    let bucket_of = |m: &LabeledMessage| ((m.timestamp - start) / bucket_secs).floor() as u64;

    let mut positions = Vec::new();
    let mut previous = None;
    let mut begin = 0;
    while begin < thread.len() {
        let id = bucket_of(thread[begin]);
        let end = (begin..thread.len())
            .find(|&i| bucket_of(thread[i]) != id)
            .unwrap_or(thread.len());
        let members = &thread[begin..end];
        let dominant = dominant_domain(members, previous);
        if previous.is_some_and(|p| p != dominant) {
            if let Some(offset) = members.iter().position(|m| m.macro_domain == dominant) {
                positions.push(begin + offset);
            }
        }
        previous = Some(dominant);
        begin = end;
    }
    positions
}

fn count_users(roles: &[Role], positions: &[usize]) -> usize {
    positions.iter().filter(|&&i| roles[i] == Role::User).count()
}

/// Attribute each change of dominant domain between consecutive time buckets
/// of a thread to the role that introduced it, and test the user share
/// against role labels permuted within each thread.
pub fn shift_initiation(messages: &[LabeledMessage], config: &DynamicsConfig) -> ShiftAnalysis {
    let threads = eligible_threads(messages, config.min_thread_msgs);
    let mut sequences: Vec<(Vec<Role>, Vec<usize>)> = Vec::with_capacity(threads.len());
    let mut detail = Vec::with_capacity(threads.len());

    for thread in &threads {
        let roles: Vec<Role> = thread.iter().map(|m| m.role).collect();
        let shifts = shift_positions(thread, config.shift_bucket_secs);
        let user_initiated = count_users(&roles, &shifts);
        detail.push(ShiftDetailRow {
            thread_id: thread[0].thread_id.clone(),
            n_messages: thread.len(),
            n_shifts: shifts.len(),
            user_initiated,
            assistant_initiated: shifts.len() - user_initiated,
        });
        sequences.push((roles, shifts));
    }

    let n_shifts: usize = detail.iter().map(|d| d.n_shifts).sum();
    if n_shifts == 0 {
        return ShiftAnalysis {
            summary: None,
            detail,
        };
    }
    let user_initiated: usize = detail.iter().map(|d| d.user_initiated).sum();
    let observed = user_initiated as f64 / n_shifts as f64;

    let null = stats::parallel_trials(
        config.shift_permutations,
        config.random_state,
        &[],
        |rng| {
            let users: usize = sequences
                .iter()
                .filter(|(_, shifts)| !shifts.is_empty())
                .map(|(roles, shifts)| {
                    let mut permuted = roles.clone();
                    permuted.shuffle(rng);
                    count_users(&permuted, shifts)
                })
                .sum();
            users as f64 / n_shifts as f64
        },
    );
    let null_mean = mean(&null);
    let centered: Vec<f64> = null.iter().map(|v| v - null_mean).collect();

    tracing::debug!(n_shifts, observed, null_mean, "Shift initiation tested");
    ShiftAnalysis {
        summary: Some(ShiftSummaryRow {
            n_threads: detail.len(),
            n_shifts,
            user_initiated,
            assistant_initiated: n_shifts - user_initiated,
            user_share: observed,
            null_mean,
            null_std: std_dev(&null),
            p_user: p_greater(observed, &null),
            p_assistant: p_less(observed, &null),
            p_two_sided: p_two_sided(observed - null_mean, &centered),
            n_permutations: config.shift_permutations,
        }),
        detail,
    }
}

/// Find maximal single-domain runs of at least `min_episode_len` messages
/// in eligible threads and test who opens them against a fair coin.
pub fn episode_initiation(messages: &[LabeledMessage], config: &DynamicsConfig) -> EpisodeAnalysis {
    let mut out = EpisodeAnalysis::default();
    for thread in eligible_threads(messages, config.min_thread_msgs) {
        let mut row = ThreadEpisodeRow {
            thread_id: thread[0].thread_id.clone(),
            n_messages: thread.len(),
            n_episodes: 0,
            user_initiated: 0,
            assistant_initiated: 0,
        };
        for run in thread.chunk_by(|a, b| a.macro_domain == b.macro_domain) {
            if run.len() < config.min_episode_len {
                continue;
            }
            let first = run[0];
            match first.role {
                Role::User => row.user_initiated += 1,
                Role::Assistant => row.assistant_initiated += 1,
            }
            out.detail.push(EpisodeDetailRow {
                thread_id: row.thread_id.clone(),
                episode_index: row.n_episodes,
                macro_domain: first.macro_domain,
                start_ts: first.timestamp,
                end_ts: run[run.len() - 1].timestamp,
                length: run.len(),
                initiator: first.role,
            });
            row.n_episodes += 1;
        }
        out.threads.push(row);
    }

    let n = out.detail.len();
    if n > 0 {
        let users = out
            .detail
            .iter()
            .filter(|e| e.initiator == Role::User)
            .count();
        out.summary = Some(EpisodeSummaryRow {
            n_episodes: n,
            user_initiated: users,
            assistant_initiated: n - users,
            user_share: users as f64 / n as f64,
            p_value: binomial_two_sided(users as u64, n as u64, 0.5),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::fixtures::{alternating, thread};

    /// One-second buckets: fixture messages are a second apart, so every
    /// message is its own bucket.
    fn config() -> DynamicsConfig {
        DynamicsConfig {
            shift_permutations: 200,
            shift_bucket_secs: 1.0,
            ..DynamicsConfig::default()
        }
    }

    #[test]
    fn test_user_led_shifts_are_detected() {
        // Domain flips at every even position after the first pair, which is
        // always a user turn.
        let turns = alternating(20, |i| (i / 2) % 2);
        let mut messages = thread("a", 0.0, &turns);
        messages.extend(thread("short", 100.0, &alternating(5, |i| i % 2)));

        let analysis = shift_initiation(&messages, &config());
        assert_eq!(analysis.detail.len(), 1);
        let summary = analysis.summary.unwrap();
        assert_eq!(summary.n_shifts, 9);
        assert_eq!(summary.user_initiated, 9);
        assert_eq!(summary.user_share, 1.0);
        assert!(summary.p_user < 0.05);
        assert!(summary.p_assistant > 0.9);
        assert!(summary.null_mean > 0.3 && summary.null_mean < 0.7);
    }

    #[test]
    fn test_shift_compares_dominant_domain_of_buckets() {
        const DOMAINS: [usize; 12] = [0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 1];
        let messages = thread("a", 0.0, &alternating(12, |i| DOMAINS[i]));
        let config = DynamicsConfig {
            min_thread_msgs: 10,
            shift_bucket_secs: 4.0,
            ..config()
        };

        // Buckets [0..4) [4..8) [8..12): dominant 0, then 1 (first carried by
        // the assistant at position 5), then a 1/2 tie that keeps 1.
        let analysis = shift_initiation(&messages, &config);
        let summary = analysis.summary.unwrap();
        assert_eq!(summary.n_shifts, 1);
        assert_eq!(summary.assistant_initiated, 1);
        assert_eq!(summary.user_share, 0.0);

        let per_message = DynamicsConfig {
            shift_bucket_secs: 1.0,
            ..config
        };
        let detail = shift_initiation(&messages, &per_message).detail;
        assert_eq!(detail[0].n_shifts, 3);
    }

    #[test]
    fn test_no_shifts_means_no_summary() {
        let messages = thread("a", 0.0, &alternating(30, |_| 2));
        let analysis = shift_initiation(&messages, &config());
        assert!(analysis.summary.is_none());
        assert_eq!(analysis.detail[0].n_shifts, 0);
    }

    #[test]
    fn test_episodes_and_binomial_test() {
        let mut turns = alternating(25, |i| usize::from(i >= 20));
        turns[0].0 = Role::Assistant;
        let mut messages = thread("a", 0.0, &turns);
        messages.extend(thread("b", 100.0, &alternating(24, |_| 1)));
        messages.extend(thread("c", 200.0, &alternating(22, |_| 0)));

        let analysis = episode_initiation(&messages, &config());
        assert_eq!(analysis.detail.len(), 3);
        let first = &analysis.detail[0];
        assert_eq!(first.thread_id, "a");
        assert_eq!(first.length, 20);
        assert_eq!(first.initiator, Role::Assistant);
        assert_eq!(first.end_ts, 19.0);

        let summary = analysis.summary.unwrap();
        assert_eq!(summary.user_initiated, 2);
        assert_eq!(summary.assistant_initiated, 1);
        assert!((summary.p_value - 1.0).abs() < 1e-9);
        assert_eq!(analysis.threads.len(), 3);
        assert_eq!(analysis.threads[0].n_episodes, 1);
    }

    #[test]
    fn test_threads_below_minimum_have_no_episodes() {
        let messages = thread("a", 0.0, &alternating(10, |_| 0));
        let analysis = episode_initiation(&messages, &config());
        assert!(analysis.summary.is_none());
        assert!(analysis.detail.is_empty());
        assert!(analysis.threads.is_empty());
    }
}
