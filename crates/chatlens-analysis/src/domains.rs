//! Macro domains: size-weighted k-means over fine cluster centroids, then
//! per-message labels and per-period share tables.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use chatlens_core::config::DomainConfig;
use chatlens_core::model::{MonthlyShareRow, Role, ShareTable, WeeklyShareRow};
use chatlens_core::storage::{read_rows, write_rows, MessageStore};
use chatlens_core::{Progress, ProgressObserver};

use crate::error::AnalysisError;
use crate::stats::entropy_of_counts;
use crate::topics::{self, AssignmentRow, ClusterSummaryRow, KMeans};

pub const MAP_FILE: &str = "macro_cluster_map.csv";
pub const NODE_FILE: &str = "node_to_macro_domain.csv";
pub const SUMMARY_FILE: &str = "macro_domain_summary.csv";
pub const MONTHLY_SHARES_FILE: &str = "macro_monthly_domain_shares.csv";
pub const WEEKLY_SHARES_FILE: &str = "macro_weekly_domain_shares.csv";
pub const METRICS_FILE: &str = "macro_monthly_metrics.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroMapRow {
    pub fine_cluster: usize,
    pub macro_domain: usize,
    pub fine_label: String,
    pub fine_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDomainRow {
    pub node_id: String,
    pub fine_cluster: usize,
    pub macro_domain: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSummaryRow {
    pub macro_domain: usize,
    pub label: String,
    pub n_fine_clusters: usize,
    pub n_messages: u64,
    pub user_messages: u64,
    pub assistant_messages: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyMetricRow {
    pub year_month: String,
    pub role: Role,
    pub n_messages: u64,
    pub n_domains: usize,
    pub entropy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainStageSummary {
    pub fine_clusters: usize,
    pub macro_domains: usize,
    pub messages: usize,
    pub months: usize,
    pub weeks: usize,
    /// Assignment rows whose node is no longer in the store.
    pub unmatched_assignments: usize,
}

/// Group fine clusters into `config.n_macro` domains.
///
/// `centroids` maps fine cluster id to its centroid; `sizes` gives each
/// cluster's message count, used as its weight. Returns fine id -> domain.
pub fn map_fine_to_macro(
    centroids: &BTreeMap<usize, Vec<f64>>,
    sizes: &BTreeMap<usize, usize>,
    config: &DomainConfig,
) -> Result<BTreeMap<usize, usize>, AnalysisError> {
    if config.n_macro == 0 || config.n_macro > centroids.len() {
        return Err(AnalysisError::Config(format!(
            "n_macro ({}) must be between 1 and the number of fine clusters ({})",
            config.n_macro,
            centroids.len()
        )));
    }
    let ids: Vec<usize> = centroids.keys().copied().collect();
    let points: Vec<Vec<f64>> = centroids.values().cloned().collect();
    let weights: Vec<f64> = ids
        .iter()
        .map(|id| sizes.get(id).copied().unwrap_or(0) as f64)
        .collect();
    let clustering = KMeans {
        k: config.n_macro,
        max_iter: config.max_iter,
        seed: config.random_state,
    }
    .fit_weighted(&points, &weights)?;
    Ok(ids.into_iter().zip(clustering.labels).collect())
}

/// Domain label: the label of its largest fine cluster (lowest id on ties).
fn domain_labels(
    mapping: &BTreeMap<usize, usize>,
    fine: &BTreeMap<usize, (String, usize)>,
    n_macro: usize,
) -> Vec<String> {
    (0..n_macro)
        .map(|d| {
            mapping
                .iter()
                .filter(|(_, m)| **m == d)
                .filter_map(|(f, _)| fine.get(f).map(|(label, size)| (*f, label, *size)))
                .max_by(|a, b| a.2.cmp(&b.2).then(b.0.cmp(&a.0)))
                .map_or_else(|| format!("domain {d}"), |(_, label, _)| label.clone())
        })
        .collect()
}

/// Read the per-message macro labels written by [`run`].
pub fn read_node_domains(out_dir: &Path) -> Result<Vec<NodeDomainRow>, AnalysisError> {
    Ok(read_rows(&out_dir.join(NODE_FILE))?)
}

/// Number of macro domains recorded in the summary table.
pub fn read_domain_count(out_dir: &Path) -> Result<usize, AnalysisError> {
    let rows: Vec<DomainSummaryRow> = read_rows(&out_dir.join(SUMMARY_FILE))?;
    Ok(rows.iter().map(|r| r.macro_domain + 1).max().unwrap_or(0))
}

pub fn read_monthly_shares(out_dir: &Path) -> Result<ShareTable, AnalysisError> {
    let n = read_domain_count(out_dir)?;
    let rows: Vec<MonthlyShareRow> = read_rows(&out_dir.join(MONTHLY_SHARES_FILE))?;
    Ok(ShareTable::from_monthly_rows(&rows, n))
}

pub fn read_weekly_shares(out_dir: &Path) -> Result<ShareTable, AnalysisError> {
    let n = read_domain_count(out_dir)?;
    let rows: Vec<WeeklyShareRow> = read_rows(&out_dir.join(WEEKLY_SHARES_FILE))?;
    Ok(ShareTable::from_weekly_rows(&rows, n))
}

/// Map fine clusters to macro domains and write the domain tables.
pub fn run(
    store: &MessageStore,
    out_dir: &Path,
    config: &DomainConfig,
    progress: Option<&mut dyn ProgressObserver>,
) -> Result<DomainStageSummary, AnalysisError> {
    config.validate()?;
    let mut progress = Progress::new("domains", progress);
    progress.report(0.0, "Loading topic tables");
    let assignments: Vec<AssignmentRow> = read_rows(&out_dir.join(topics::ASSIGNMENTS_FILE))?;
    let clusters: Vec<ClusterSummaryRow> = read_rows(&out_dir.join(topics::SUMMARY_FILE))?;
    let centroids = topics::read_centroids(&out_dir.join(topics::CENTROIDS_FILE))?;

    if let Some(missing) = assignments
        .iter()
        .find(|a| !centroids.contains_key(&a.fine_cluster))
    {
        return Err(AnalysisError::Config(format!(
            "node {} is assigned to fine cluster {} which has no centroid",
            missing.node_id, missing.fine_cluster
        )));
    }

    let mut sizes: BTreeMap<usize, usize> = BTreeMap::new();
    for a in &assignments {
        *sizes.entry(a.fine_cluster).or_default() += 1;
    }
    let fine: BTreeMap<usize, (String, usize)> = clusters
        .iter()
        .map(|c| {
            let size = sizes.get(&c.cluster_id).copied().unwrap_or(0);
            (c.cluster_id, (c.label.clone(), size))
        })
        .collect();

    progress.report(0.2, "Clustering fine topics into macro domains");
    let mapping = map_fine_to_macro(&centroids, &sizes, config)?;
    let labels = domain_labels(&mapping, &fine, config.n_macro);

    progress.report(0.5, "Labelling messages");
    let messages = store.messages()?;
    let by_node: HashMap<&str, usize> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| (m.node_id.as_str(), i))
        .collect();

    let mut node_rows = Vec::with_capacity(assignments.len());
    let mut monthly = ShareTable::new(config.n_macro);
    let mut weekly = ShareTable::new(config.n_macro);
    let mut per_domain = vec![[0u64; 2]; config.n_macro];
    let mut unmatched = 0;
    for a in &assignments {
        let Some(&i) = by_node.get(a.node_id.as_str()) else {
            unmatched += 1;
            continue;
        };
        let m = &messages[i];
        let domain = mapping[&a.fine_cluster];
        monthly.add(&m.year_month, m.role, domain);
        weekly.add(&m.year_week(), m.role, domain);
        per_domain[domain][role_slot(m.role)] += 1;
        node_rows.push(NodeDomainRow {
            node_id: a.node_id.clone(),
            fine_cluster: a.fine_cluster,
            macro_domain: domain,
        });
    }
    if unmatched > 0 {
        tracing::warn!(unmatched, "Assignments reference messages missing from the store");
    }

    progress.report(0.8, "Writing domain tables");
    let map_rows: Vec<MacroMapRow> = mapping
        .iter()
        .map(|(&f, &d)| {
            let (label, size) = fine.get(&f).cloned().unwrap_or_default();
            MacroMapRow {
                fine_cluster: f,
                macro_domain: d,
                fine_label: label,
                fine_size: size,
            }
        })
        .collect();
    let summary_rows: Vec<DomainSummaryRow> = labels
        .iter()
        .enumerate()
        .map(|(d, label)| DomainSummaryRow {
            macro_domain: d,
            label: label.clone(),
            n_fine_clusters: mapping.values().filter(|m| **m == d).count(),
            n_messages: per_domain[d][0] + per_domain[d][1],
            user_messages: per_domain[d][0],
            assistant_messages: per_domain[d][1],
        })
        .collect();
    let metrics = monthly_metrics(&monthly);

    write_rows(&out_dir.join(MAP_FILE), &map_rows)?;
    write_rows(&out_dir.join(NODE_FILE), &node_rows)?;
    write_rows(&out_dir.join(SUMMARY_FILE), &summary_rows)?;
    write_rows(&out_dir.join(MONTHLY_SHARES_FILE), &monthly.to_monthly_rows())?;
    write_rows(&out_dir.join(WEEKLY_SHARES_FILE), &weekly.to_weekly_rows())?;
    write_rows(&out_dir.join(METRICS_FILE), &metrics)?;

    let summary = DomainStageSummary {
        fine_clusters: centroids.len(),
        macro_domains: config.n_macro,
        messages: node_rows.len(),
        months: monthly.periods().count(),
        weeks: weekly.periods().count(),
        unmatched_assignments: unmatched,
    };
    tracing::info!(
        fine = summary.fine_clusters,
        macro_domains = summary.macro_domains,
        months = summary.months,
        "Macro domains mapped"
    );
    progress.finish("Domains complete");
    Ok(summary)
}

fn role_slot(role: Role) -> usize {
    match role {
        Role::User => 0,
        Role::Assistant => 1,
    }
}

/// Per (month, role): message count, number of domains used, entropy in bits.
pub fn monthly_metrics(table: &ShareTable) -> Vec<MonthlyMetricRow> {
    let mut rows = Vec::new();
    for period in table.periods() {
        for role in Role::ALL {
            let Some(counts) = table.counts(period, role) else {
                continue;
            };
            let n: u64 = counts.iter().sum();
            if n == 0 {
                continue;
            }
            rows.push(MonthlyMetricRow {
                year_month: period.to_string(),
                role,
                n_messages: n,
                n_domains: counts.iter().filter(|c| **c > 0).count(),
                entropy: entropy_of_counts(counts),
            });
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::fixtures::themed_messages;
    use chatlens_core::config::TopicConfig;

    fn prepared(dir: &Path) -> MessageStore {
        let mut store = MessageStore::open_in_memory().unwrap();
        store.replace_all(&themed_messages(6), &[], &[]).unwrap();
        let config = TopicConfig {
            n_clusters: 3,
            svd_components: 3,
            min_df: 1,
            max_df: 0.9,
            ..TopicConfig::default()
        };
        topics::run(&store, dir, &config, None).unwrap();
        store
    }

    fn domain_config(n_macro: usize) -> DomainConfig {
        DomainConfig {
            n_macro,
            ..DomainConfig::default()
        }
    }

    #[test]
    fn test_every_fine_cluster_is_mapped() {
        let dir = tempfile::tempdir().unwrap();
        let store = prepared(dir.path());
        let summary = run(&store, dir.path(), &domain_config(2), None).unwrap();
        assert_eq!(summary.fine_clusters, 3);
        assert_eq!(summary.messages, 72);
        assert_eq!(summary.months, 4);

        let map: Vec<MacroMapRow> = read_rows(&dir.path().join(MAP_FILE)).unwrap();
        assert_eq!(map.len(), 3);
        assert!(map.iter().all(|r| r.macro_domain < 2));
        let nodes = read_node_domains(dir.path()).unwrap();
        assert_eq!(nodes.len(), 72);
    }

    #[test]
    fn test_monthly_shares_sum_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = prepared(dir.path());
        run(&store, dir.path(), &domain_config(3), None).unwrap();
        let rows: Vec<MonthlyShareRow> =
            read_rows(&dir.path().join(MONTHLY_SHARES_FILE)).unwrap();
        let mut sums: BTreeMap<(String, Role), f64> = BTreeMap::new();
        for r in &rows {
            *sums.entry((r.year_month.clone(), r.role)).or_default() += r.share;
            assert!(r.n_messages > 0);
        }
        assert_eq!(sums.len(), 8);
        assert!(sums.values().all(|s| (s - 1.0).abs() < 1e-9));

        let table = read_monthly_shares(dir.path()).unwrap();
        assert_eq!(table.n_domains(), 3);
        assert_eq!(table.shared_periods().len(), 4);
    }

    #[test]
    fn test_metrics_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let store = prepared(dir.path());
        run(&store, dir.path(), &domain_config(3), None).unwrap();
        let metrics: Vec<MonthlyMetricRow> = read_rows(&dir.path().join(METRICS_FILE)).unwrap();
        assert_eq!(metrics.len(), 8);
        for m in &metrics {
            assert_eq!(m.n_domains, 3);
            assert!((m.entropy - 3f64.log2()).abs() < 1e-9);
        }
        let summary: Vec<DomainSummaryRow> = read_rows(&dir.path().join(SUMMARY_FILE)).unwrap();
        assert_eq!(summary.len(), 3);
        assert_eq!(summary.iter().map(|s| s.n_messages).sum::<u64>(), 72);
        assert!(summary.iter().all(|s| s.n_fine_clusters == 1));
    }

    #[test]
    fn test_too_many_domains_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = prepared(dir.path());
        let err = run(&store, dir.path(), &domain_config(4), None).unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Configuration);
        assert!(!dir.path().join(MAP_FILE).exists());
    }

    #[test]
    fn test_unknown_fine_cluster_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = prepared(dir.path());
        let mut rows: Vec<AssignmentRow> =
            read_rows(&dir.path().join(topics::ASSIGNMENTS_FILE)).unwrap();
        rows[0].fine_cluster = 17;
        write_rows(&dir.path().join(topics::ASSIGNMENTS_FILE), &rows).unwrap();
        let err = run(&store, dir.path(), &domain_config(2), None).unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
    }

    #[test]
    fn test_missing_topic_tables_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::open_in_memory().unwrap();
        let err = run(&store, dir.path(), &domain_config(2), None).unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Input);
    }
}
