//! Directional lag-1 coupling between the two roles' macro-domain shifts.

use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use chatlens_core::config::CouplingConfig;
use chatlens_core::model::{Role, ShareTable};
use chatlens_core::storage::write_rows;
use chatlens_core::{Progress, ProgressObserver};

use crate::domains::{read_monthly_shares, read_weekly_shares};
use crate::error::AnalysisError;
use crate::stats::{self, cosine, mean, p_two_sided};

pub const WEEKLY_SUMMARY_FILE: &str = "weekly_directional_summary.csv";
pub const WEEKLY_BY_DOMAIN_FILE: &str = "weekly_directional_by_domain.csv";
pub const SUMMARY_FILE: &str = "step9_directional_coupling_summary.csv";
pub const BY_DOMAIN_FILE: &str = "step9_directional_coupling_by_domain.csv";
pub const PAIRS_FILE: &str = "step9_directional_coupling_pairs.csv";

/// Shifts need two units and a lagged pair needs two shifts.
const MIN_UNITS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Weekly,
    Monthly,
}

impl Granularity {
    pub const ALL: [Granularity; 2] = [Granularity::Weekly, Granularity::Monthly];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "user->assistant")]
    UserToAssistant,
    #[serde(rename = "assistant->user")]
    AssistantToUser,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::UserToAssistant, Direction::AssistantToUser];

    pub fn source(&self) -> Role {
        match self {
            Self::UserToAssistant => Role::User,
            Self::AssistantToUser => Role::Assistant,
        }
    }

    pub fn target(&self) -> Role {
        self.source().other()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouplingSummaryRow {
    pub granularity: Granularity,
    pub direction: Direction,
    pub n_units: usize,
    pub n_pairs: usize,
    pub statistic: f64,
    pub null_mean: f64,
    pub p_value: f64,
    pub n_permutations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouplingDomainRow {
    pub granularity: Granularity,
    pub direction: Direction,
    pub macro_domain: usize,
    pub n_units: usize,
    pub statistic: f64,
    pub null_mean: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouplingPairRow {
    pub granularity: Granularity,
    pub direction: Direction,
    pub source_unit: String,
    pub target_unit: String,
    pub cosine: f64,
}

/// All rows produced for one granularity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Coupling {
    pub summary: Vec<CouplingSummaryRow>,
    pub by_domain: Vec<CouplingDomainRow>,
    pub pairs: Vec<CouplingPairRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouplingStageSummary {
    pub weekly_units: usize,
    pub monthly_units: usize,
    pub summary_rows: usize,
    pub domain_rows: usize,
    pub pair_rows: usize,
}

/// First differences of each role's share vectors over the units both
/// roles are present in.
struct Shifts {
    units: Vec<String>,
    user: Vec<Vec<f64>>,
    assistant: Vec<Vec<f64>>,
}

impl Shifts {
    fn from_table(table: &ShareTable) -> Self {
        let units = table.shared_periods();
        let diff = |role: Role| -> Vec<Vec<f64>> {
            let vectors: Vec<Vec<f64>> = units
                .iter()
                .map(|u| {
                    table
                        .shares(u, role)
                        .unwrap_or_else(|| vec![0.0; table.n_domains()])
                })
                .collect();
            vectors
                .windows(2)
                .map(|w| w[1].iter().zip(&w[0]).map(|(b, a)| b - a).collect())
                .collect()
        };
        Self {
            user: diff(Role::User),
            assistant: diff(Role::Assistant),
            units,
        }
    }

    fn of(&self, role: Role) -> &[Vec<f64>] {
        match role {
            Role::User => &self.user,
            Role::Assistant => &self.assistant,
        }
    }
}

/// Cosines of source shift `order[t]` against target shift `t + 1`; pairs
/// with a zero-norm side are skipped.
fn lagged_cosines<'a>(
    source: &'a [Vec<f64>],
    target: &'a [Vec<f64>],
    order: &'a [usize],
) -> impl Iterator<Item = (usize, f64)> + 'a {
    (0..target.len().saturating_sub(1))
        .filter_map(move |t| cosine(&source[order[t]], &target[t + 1]).map(|c| (t, c)))
}

fn aggregate_statistic(source: &[Vec<f64>], target: &[Vec<f64>], order: &[usize]) -> Option<f64> {
    let cosines: Vec<f64> = lagged_cosines(source, target, order).map(|(_, c)| c).collect();
    (!cosines.is_empty()).then(|| mean(&cosines))
}

/// Lag-1 cosine between one domain's source and target shift series.
fn domain_statistic(source: &[f64], target: &[f64], order: &[usize]) -> Option<f64> {
    let lagged = target.len().saturating_sub(1);
    let x: Vec<f64> = order[..lagged].iter().map(|&i| source[i]).collect();
    cosine(&x, &target[1..])
}

/// Seeded null draws. Permutations for which the statistic is undefined are
/// dropped, so p-values count defined draws only.
fn null_draws<F>(config: &CouplingConfig, indices: &[u64], trial: F) -> Vec<f64>
where
    F: Fn(&mut StdRng) -> Option<f64> + Sync,
{
    stats::parallel_trials(config.n_permutations, config.random_state, indices, |rng| {
        trial(rng).unwrap_or(f64::NAN)
    })
    .into_iter()
    .filter(|v| !v.is_nan())
    .collect()
}

/// Coupling rows for one granularity's share table.
pub fn directional(
    table: &ShareTable,
    granularity: Granularity,
    config: &CouplingConfig,
) -> Coupling {
    let shifts = Shifts::from_table(table);
    let n_units = shifts.units.len();
    let mut out = Coupling::default();
    if n_units < MIN_UNITS {
        return out;
    }
    let n_shifts = n_units - 1;
    let identity: Vec<usize> = (0..n_shifts).collect();
    let gi = granularity as u64;

    for (di, direction) in Direction::ALL.into_iter().enumerate() {
        let source = shifts.of(direction.source());
        let target = shifts.of(direction.target());
        let shuffled = |rng: &mut StdRng| {
            let mut order = identity.clone();
            order.shuffle(rng);
            order
        };

        for (t, c) in lagged_cosines(source, target, &identity) {
            out.pairs.push(CouplingPairRow {
                granularity,
                direction,
                source_unit: shifts.units[t + 1].clone(),
                target_unit: shifts.units[t + 2].clone(),
                cosine: c,
            });
        }

        if let Some(observed) = aggregate_statistic(source, target, &identity) {
            let null = null_draws(config, &[gi, di as u64, u64::MAX], |rng| {
                aggregate_statistic(source, target, &shuffled(rng))
            });
            out.summary.push(CouplingSummaryRow {
                granularity,
                direction,
                n_units,
                n_pairs: lagged_cosines(source, target, &identity).count(),
                statistic: observed,
                null_mean: mean(&null),
                p_value: p_two_sided(observed, &null),
                n_permutations: config.n_permutations,
            });
        }

        for d in 0..table.n_domains() {
            let x: Vec<f64> = source.iter().map(|v| v[d]).collect();
            let y: Vec<f64> = target.iter().map(|v| v[d]).collect();
            let Some(observed) = domain_statistic(&x, &y, &identity) else {
                continue;
            };
            let null = null_draws(config, &[gi, di as u64, d as u64], |rng| {
                domain_statistic(&x, &y, &shuffled(rng))
            });
            out.by_domain.push(CouplingDomainRow {
                granularity,
                direction,
                macro_domain: d,
                n_units,
                statistic: observed,
                null_mean: mean(&null),
                p_value: p_two_sided(observed, &null),
            });
        }
    }
    out
}

pub fn run(
    out_dir: &Path,
    config: &CouplingConfig,
    progress: Option<&mut dyn ProgressObserver>,
) -> Result<CouplingStageSummary, AnalysisError> {
    config.validate()?;
    let mut progress = Progress::new("coupling", progress);
    progress.report(0.0, "Loading domain shares");
    let weekly_table = read_weekly_shares(out_dir)?;
    let monthly_table = read_monthly_shares(out_dir)?;

    progress.report(0.1, "Testing weekly coupling");
    let weekly = directional(&weekly_table, Granularity::Weekly, config);
    progress.report(0.6, "Testing monthly coupling");
    let monthly = directional(&monthly_table, Granularity::Monthly, config);

    progress.report(0.95, "Writing coupling tables");
    write_rows(&out_dir.join(WEEKLY_SUMMARY_FILE), &weekly.summary)?;
    write_rows(&out_dir.join(WEEKLY_BY_DOMAIN_FILE), &weekly.by_domain)?;

    let summary: Vec<CouplingSummaryRow> =
        weekly.summary.iter().chain(&monthly.summary).cloned().collect();
    let by_domain: Vec<CouplingDomainRow> =
        weekly.by_domain.iter().chain(&monthly.by_domain).cloned().collect();
    let pairs: Vec<CouplingPairRow> = weekly.pairs.into_iter().chain(monthly.pairs).collect();
    write_rows(&out_dir.join(SUMMARY_FILE), &summary)?;
    write_rows(&out_dir.join(BY_DOMAIN_FILE), &by_domain)?;
    write_rows(&out_dir.join(PAIRS_FILE), &pairs)?;

    let result = CouplingStageSummary {
        weekly_units: weekly_table.shared_periods().len(),
        monthly_units: monthly_table.shared_periods().len(),
        summary_rows: summary.len(),
        domain_rows: by_domain.len(),
        pair_rows: pairs.len(),
    };
    tracing::info!(
        weekly_units = result.weekly_units,
        monthly_units = result.monthly_units,
        domain_rows = result.domain_rows,
        "Directional coupling computed"
    );
    progress.finish("Coupling complete");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatlens_core::model::{MonthlyShareRow, WeeklyShareRow};
    use chatlens_core::storage::read_rows;

    use crate::domains::{
        DomainSummaryRow, MONTHLY_SHARES_FILE, SUMMARY_FILE as DOMAIN_SUMMARY, WEEKLY_SHARES_FILE,
    };

    const USER_D0: [u64; 8] = [5, 9, 2, 6, 1, 8, 3, 7];

    /// The assistant repeats the user's previous-period mix, so every
    /// assistant shift echoes the user's shift one unit earlier.
    fn echo_table(periods: &[String]) -> ShareTable {
        let mut table = ShareTable::new(2);
        for (t, period) in periods.iter().enumerate() {
            let u = USER_D0[t];
            table.add_count(period, Role::User, 0, u);
            table.add_count(period, Role::User, 1, 10 - u);
            let a = if t == 0 { 5 } else { USER_D0[t - 1] };
            table.add_count(period, Role::Assistant, 0, a);
            table.add_count(period, Role::Assistant, 1, 10 - a);
        }
        table
    }

    fn months(n: usize) -> Vec<String> {
        (1..=n).map(|m| format!("2024-{m:02}")).collect()
    }

    fn config() -> CouplingConfig {
        CouplingConfig {
            n_permutations: 50,
            random_state: 42,
        }
    }

    #[test]
    fn test_echo_gives_full_forward_coupling() {
        let coupling = directional(&echo_table(&months(8)), Granularity::Monthly, &config());
        let forward = coupling
            .summary
            .iter()
            .find(|r| r.direction == Direction::UserToAssistant)
            .unwrap();
        assert_eq!(forward.n_units, 8);
        assert_eq!(forward.n_pairs, 6);
        assert!((forward.statistic - 1.0).abs() < 1e-9);
        assert!(forward.p_value > 0.0 && forward.p_value <= 1.0);

        let domains: Vec<&CouplingDomainRow> = coupling
            .by_domain
            .iter()
            .filter(|r| r.direction == Direction::UserToAssistant)
            .collect();
        assert_eq!(domains.len(), 2);
        assert!(domains.iter().all(|r| (r.statistic - 1.0).abs() < 1e-9));

        let first = &coupling.pairs[0];
        assert_eq!(first.source_unit, "2024-02");
        assert_eq!(first.target_unit, "2024-03");
    }

    #[test]
    fn test_too_few_units_are_omitted() {
        let coupling = directional(&echo_table(&months(2)), Granularity::Monthly, &config());
        assert_eq!(coupling, Coupling::default());
    }

    #[test]
    fn test_undefined_permutations_are_left_out_of_null() {
        // The lone non-zero source shift lands past the lag window in about a
        // third of the orders, leaving an all-zero vector with no cosine.
        let source = [1.0, 0.0, 0.0];
        let target = [0.0, 1.0, 0.5];
        let config = CouplingConfig {
            n_permutations: 300,
            ..CouplingConfig::default()
        };
        let null = null_draws(&config, &[], |rng| {
            let mut order = vec![0, 1, 2];
            order.shuffle(rng);
            domain_statistic(&source, &target, &order)
        });
        assert!(!null.is_empty());
        assert!(null.len() < 300);
        assert!(null.iter().all(|v| *v > 0.4));
    }

    #[test]
    fn test_constant_source_has_no_rows() {
        let mut table = ShareTable::new(2);
        for (t, period) in months(5).iter().enumerate() {
            table.add_count(period, Role::User, 0, 4);
            table.add_count(period, Role::User, 1, 6);
            table.add_count(period, Role::Assistant, 0, USER_D0[t]);
            table.add_count(period, Role::Assistant, 1, 10 - USER_D0[t]);
        }
        let coupling = directional(&table, Granularity::Monthly, &config());
        assert!(coupling.pairs.is_empty());
        assert!(coupling.summary.is_empty());
        assert!(coupling.by_domain.is_empty());
    }

    #[test]
    fn test_run_writes_both_granularities() {
        let dir = tempfile::tempdir().unwrap();
        let summary: Vec<DomainSummaryRow> = (0..2)
            .map(|d| DomainSummaryRow {
                macro_domain: d,
                label: format!("d{d}"),
                n_fine_clusters: 1,
                n_messages: 0,
                user_messages: 0,
                assistant_messages: 0,
            })
            .collect();
        write_rows(&dir.path().join(DOMAIN_SUMMARY), &summary).unwrap();
        let monthly: Vec<MonthlyShareRow> = echo_table(&months(8)).to_monthly_rows();
        write_rows(&dir.path().join(MONTHLY_SHARES_FILE), &monthly).unwrap();
        let weeks: Vec<String> = (1..=8).map(|w| format!("2024-W{w:02}")).collect();
        let weekly: Vec<WeeklyShareRow> = echo_table(&weeks).to_weekly_rows();
        write_rows(&dir.path().join(WEEKLY_SHARES_FILE), &weekly).unwrap();

        let result = run(dir.path(), &config(), None).unwrap();
        assert_eq!(result.weekly_units, 8);
        assert_eq!(result.monthly_units, 8);

        let weekly_rows: Vec<CouplingSummaryRow> =
            read_rows(&dir.path().join(WEEKLY_SUMMARY_FILE)).unwrap();
        assert!(weekly_rows.iter().all(|r| r.granularity == Granularity::Weekly));
        let all: Vec<CouplingSummaryRow> = read_rows(&dir.path().join(SUMMARY_FILE)).unwrap();
        assert_eq!(all.len(), result.summary_rows);
        assert!(all.iter().any(|r| r.granularity == Granularity::Monthly));
        let pairs: Vec<CouplingPairRow> = read_rows(&dir.path().join(PAIRS_FILE)).unwrap();
        assert_eq!(pairs.len(), result.pair_rows);

        let first = std::fs::read(dir.path().join(BY_DOMAIN_FILE)).unwrap();
        run(dir.path(), &config(), None).unwrap();
        assert_eq!(first, std::fs::read(dir.path().join(BY_DOMAIN_FILE)).unwrap());
    }
}
