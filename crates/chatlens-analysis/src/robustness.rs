//! Hyperparameter grid refits and permutation null models for the fine
//! topic structure.

use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use serde::{Deserialize, Serialize};

use chatlens_core::config::RobustnessConfig;
use chatlens_core::model::Role;
use chatlens_core::storage::{write_rows, MessageStore};
use chatlens_core::{Progress, ProgressObserver};

use crate::error::AnalysisError;
use crate::stats::{self, entropy_of_counts, js_divergence, mean, p_greater, std_dev};
use crate::topics;

pub const NULL_TESTS_FILE: &str = "robustness_null_tests.csv";

pub fn curve_file_name(k: usize, svd: usize) -> String {
    format!("robustness_curves_k{k}_svd{svd}.csv")
}

/// The three null models, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullModel {
    MonthShuffle,
    RoleShuffle,
    VolumeDownsample,
}

impl NullModel {
    pub const ALL: [NullModel; 3] = [
        NullModel::MonthShuffle,
        NullModel::RoleShuffle,
        NullModel::VolumeDownsample,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullTestRow {
    pub k: usize,
    pub svd: usize,
    pub null_model: NullModel,
    pub observed: f64,
    pub null_mean: f64,
    pub null_var: f64,
    pub p_value: f64,
    pub n_permutations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveRow {
    pub year_month: String,
    pub n_messages: u64,
    pub entropy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustnessSummary {
    pub messages: usize,
    pub vocabulary: usize,
    pub grid_points: usize,
    pub null_tests: usize,
    pub min_p_value: f64,
}

/// Messages reduced to what the null models permute: month index, role and
/// fine cluster label.
struct Sample<'a> {
    months: &'a [usize],
    roles: &'a [Role],
    labels: &'a [usize],
    n_months: usize,
    k: usize,
}

impl Sample<'_> {
    fn counts_by_month(&self, months: &[usize], members: impl Iterator<Item = usize>) -> Vec<Vec<u64>> {
        let mut counts = vec![vec![0u64; self.k]; self.n_months];
        for i in members {
            counts[months[i]][self.labels[i]] += 1;
        }
        counts
    }

    /// Standard deviation over months of the monthly entropy curve.
    fn curve_std(&self, months: &[usize], members: impl Iterator<Item = usize>) -> f64 {
        let entropies: Vec<f64> = self
            .counts_by_month(months, members)
            .iter()
            .filter(|c| c.iter().any(|n| *n > 0))
            .map(|c| entropy_of_counts(c))
            .collect();
        std_dev(&entropies)
    }

    /// Mean monthly JSD between user and assistant cluster distributions.
    fn role_divergence(&self, roles: &[Role]) -> f64 {
        let mut counts = vec![[vec![0.0; self.k], vec![0.0; self.k]]; self.n_months];
        for (i, role) in roles.iter().enumerate() {
            let slot = usize::from(*role == Role::Assistant);
            counts[self.months[i]][slot][self.labels[i]] += 1.0;
        }
        let divergences: Vec<f64> = counts
            .iter()
            .filter_map(|[user, assistant]| js_divergence(user, assistant))
            .collect();
        mean(&divergences)
    }

    fn observed(&self, model: NullModel) -> f64 {
        match model {
            NullModel::MonthShuffle | NullModel::VolumeDownsample => {
                self.curve_std(self.months, 0..self.labels.len())
            }
            NullModel::RoleShuffle => self.role_divergence(self.roles),
        }
    }

    fn null_trial(&self, model: NullModel, by_month: &[Vec<usize>], floor: usize, rng: &mut StdRng) -> f64 {
        match model {
            NullModel::MonthShuffle => {
                let mut months = self.months.to_vec();
                months.shuffle(rng);
                self.curve_std(&months, 0..self.labels.len())
            }
            NullModel::RoleShuffle => {
                let mut roles = self.roles.to_vec();
                roles.shuffle(rng);
                self.role_divergence(&roles)
            }
            NullModel::VolumeDownsample => {
                let mut members = Vec::with_capacity(floor * by_month.len());
                for group in by_month.iter().filter(|g| !g.is_empty()) {
                    members.extend(index::sample(rng, group.len(), floor).into_iter().map(|j| group[j]));
                }
                self.curve_std(self.months, members.into_iter())
            }
        }
    }
}

/// Refit the topic model over the configured grid and test each fit against
/// the three null models.
pub fn run(
    store: &MessageStore,
    out_dir: &Path,
    config: &RobustnessConfig,
    progress: Option<&mut dyn ProgressObserver>,
) -> Result<RobustnessSummary, AnalysisError> {
    config.validate()?;
    let mut progress = Progress::new("robustness", progress);
    progress.report(0.0, "Loading messages");
    let messages = store.messages()?;
    let grid = config.grid();
    if let Some((k, _)) = grid.iter().find(|(k, _)| *k > messages.len()) {
        return Err(AnalysisError::Config(format!(
            "robustness k={k} exceeds the number of messages ({})",
            messages.len()
        )));
    }

    progress.report(0.05, "Building TF-IDF matrix");
    let mut base = config.topics.clone();
    base.random_state = config.random_state;
    let matrix = topics::build_matrix(&messages, &base)?;

    let mut month_names: Vec<&str> = messages.iter().map(|m| m.year_month.as_str()).collect();
    month_names.sort_unstable();
    month_names.dedup();
    let months: Vec<usize> = messages
        .iter()
        .map(|m| month_names.binary_search(&m.year_month.as_str()).unwrap_or(0))
        .collect();
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    let mut by_month: Vec<Vec<usize>> = vec![Vec::new(); month_names.len()];
    for (i, &m) in months.iter().enumerate() {
        by_month[m].push(i);
    }
    let floor = by_month.iter().map(Vec::len).filter(|n| *n > 0).min().unwrap_or(0);

    let mut rows = Vec::new();
    for (gi, &(k, svd)) in grid.iter().enumerate() {
        progress.report_within(0.1, 0.95, gi, grid.len(), &format!("Refitting k={k}, svd={svd}"));
        let fit = topics::fit_reduced(&matrix, k, svd, &base)?;
        let labels = &fit.clustering.labels;

        let curve: Vec<CurveRow> =
            topics::monthly_entropy(messages.iter().map(|m| m.year_month.as_str()), labels, k)
                .into_iter()
                .map(|r| CurveRow {
                    year_month: r.year_month,
                    n_messages: r.n_messages,
                    entropy: r.entropy,
                })
                .collect();
        write_rows(&out_dir.join(curve_file_name(k, svd)), &curve)?;

        let sample = Sample {
            months: &months,
            roles: &roles,
            labels,
            n_months: month_names.len(),
            k,
        };
        for (ni, model) in NullModel::ALL.into_iter().enumerate() {
            let observed = sample.observed(model);
            let null = stats::parallel_trials(
                config.n_permutations,
                config.random_state,
                &[gi as u64, ni as u64],
                |rng| sample.null_trial(model, &by_month, floor, rng),
            );
            rows.push(NullTestRow {
                k,
                svd,
                null_model: model,
                observed,
                null_mean: mean(&null),
                null_var: stats::variance(&null),
                p_value: p_greater(observed, &null),
                n_permutations: config.n_permutations,
            });
        }
        tracing::debug!(k, svd, "Grid point tested");
    }

    write_rows(&out_dir.join(NULL_TESTS_FILE), &rows)?;
    let summary = RobustnessSummary {
        messages: messages.len(),
        vocabulary: matrix.n_terms(),
        grid_points: grid.len(),
        null_tests: rows.len(),
        min_p_value: rows.iter().map(|r| r.p_value).fold(1.0, f64::min),
    };
    tracing::info!(
        grid_points = summary.grid_points,
        null_tests = summary.null_tests,
        "Robustness tests complete"
    );
    progress.finish("Robustness complete");
    Ok(summary)
}
