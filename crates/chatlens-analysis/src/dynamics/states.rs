use serde::{Deserialize, Serialize};

use chatlens_core::config::{DynamicsConfig, StatePolicy};
use chatlens_core::model::ShareTable;

use crate::stats::{entropy, js_divergence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Exploration,
    Consolidation,
    Transitional,
}

impl State {
    pub const ALL: [State; 3] = [State::Exploration, State::Consolidation, State::Transitional];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRow {
    pub period: String,
    pub n_messages: u64,
    pub entropy_norm: f64,
    /// Change in normalized entropy from the previous period; empty for the first.
    pub entropy_delta: Option<f64>,
    /// JSD to the previous period's shares; empty for the first.
    pub volatility: Option<f64>,
    pub state: State,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRow {
    pub from_state: State,
    pub to_state: State,
    pub count: usize,
}

fn by_level(h: f64, config: &DynamicsConfig) -> State {
    if h >= config.entropy_high {
        State::Exploration
    } else if h <= config.entropy_low {
        State::Consolidation
    } else {
        State::Transitional
    }
}

fn by_rate(delta: Option<f64>, config: &DynamicsConfig) -> State {
    match delta {
        Some(d) if d >= config.rate_threshold => State::Exploration,
        Some(d) if d <= -config.rate_threshold => State::Consolidation,
        _ => State::Transitional,
    }
}

/// Classify every period in which the configured role has messages.
pub fn classify(table: &ShareTable, config: &DynamicsConfig) -> Vec<StateRow> {
    let max_entropy = (table.n_domains() as f64).log2();
    let mut rows: Vec<StateRow> = Vec::new();
    let mut previous: Option<Vec<f64>> = None;

    for period in table.periods() {
        let Some(shares) = table.shares(period, config.role) else {
            continue;
        };
        let entropy_norm = if max_entropy > 0.0 {
            (entropy(&shares) / max_entropy).min(1.0)
        } else {
            0.0
        };
        let entropy_delta = rows.last().map(|r| entropy_norm - r.entropy_norm);
        let volatility = previous
            .as_deref()
            .and_then(|prev| js_divergence(prev, &shares));
        let state = match config.state_policy {
            StatePolicy::StaticLevel => by_level(entropy_norm, config),
            StatePolicy::RateBased => by_rate(entropy_delta, config),
        };
        rows.push(StateRow {
            period: period.to_string(),
            n_messages: table.total(period, config.role),
            entropy_norm,
            entropy_delta,
            volatility,
            state,
        });
        previous = Some(shares);
    }
    rows
}

/// Counts of consecutive-period transitions as a full 3x3 matrix.
pub fn transition_summary(rows: &[StateRow]) -> Vec<TransitionRow> {
    let index = |s: State| State::ALL.iter().position(|x| *x == s).unwrap_or(0);
    let mut counts = [[0usize; 3]; 3];
    for pair in rows.windows(2) {
        counts[index(pair[0].state)][index(pair[1].state)] += 1;
    }
    State::ALL
        .iter()
        .flat_map(|&from| {
            State::ALL.iter().map(move |&to| TransitionRow {
                from_state: from,
                to_state: to,
                count: counts[index(from)][index(to)],
            })
        })
        .collect()
}
