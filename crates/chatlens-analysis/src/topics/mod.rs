//! Fine topic model: TF-IDF, truncated SVD, k-means.

pub mod kmeans;
pub mod svd;
pub mod tfidf;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use chatlens_core::config::TopicConfig;
use chatlens_core::model::Message;
use chatlens_core::storage::{write_rows, MessageStore};
use chatlens_core::{CoreError, Progress, ProgressObserver};

use crate::error::AnalysisError;
use crate::stats::entropy_of_counts;

pub use kmeans::{Clustering, KMeans};
pub use tfidf::{TfidfMatrix, Tokenizer, VocabularyLimits};

pub const ASSIGNMENTS_FILE: &str = "node_to_fine_cluster.csv";
pub const ENTROPY_FILE: &str = "monthly_topic_entropy_tfidf.csv";
pub const SUMMARY_FILE: &str = "cluster_summary_tfidf.csv";
pub const CENTROIDS_FILE: &str = "fine_cluster_centroids.csv";

const LABEL_TERMS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRow {
    pub node_id: String,
    pub fine_cluster: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropyRow {
    pub year_month: String,
    pub n_messages: u64,
    pub entropy: f64,
    pub max_entropy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummaryRow {
    pub cluster_id: usize,
    pub size: usize,
    pub label: String,
    /// Ranked representative terms joined with `;`.
    pub top_terms: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSummary {
    pub messages: usize,
    pub vocabulary: usize,
    pub components: usize,
    pub clusters: usize,
    pub months: usize,
    pub mean_entropy: f64,
    pub iterations: usize,
}

/// Reduced vectors plus a clustering of them.
#[derive(Debug, Clone)]
pub struct TopicFit {
    pub reduced: Vec<Vec<f64>>,
    pub clustering: Clustering,
}

/// Project `matrix` to `components` dimensions and cluster into `k` topics.
pub fn fit_reduced(
    matrix: &TfidfMatrix,
    k: usize,
    components: usize,
    config: &TopicConfig,
) -> Result<TopicFit, AnalysisError> {
    let reduced = svd::reduce(matrix, components, config.power_iterations, config.random_state);
    let clustering = KMeans {
        k,
        max_iter: config.max_iter,
        seed: config.random_state,
    }
    .fit(&reduced)?;
    Ok(TopicFit {
        reduced,
        clustering,
    })
}

pub fn build_matrix(messages: &[Message], config: &TopicConfig) -> Result<TfidfMatrix, AnalysisError> {
    let tokenizer = Tokenizer::new()?;
    let documents: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
    tfidf::fit_transform(
        &tokenizer,
        &documents,
        VocabularyLimits {
            min_df: config.min_df,
            max_df: config.max_df,
            n_features: config.n_features,
        },
    )
}

/// Ranked discriminative terms per cluster: cluster mean TF-IDF minus the
/// corpus mean, highest first, positive scores only.
pub fn discriminative_terms(
    matrix: &TfidfMatrix,
    labels: &[usize],
    k: usize,
    top: usize,
) -> Vec<Vec<String>> {
    let corpus = matrix.column_means();
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (doc, &l) in labels.iter().enumerate() {
        members[l].push(doc);
    }
    members
        .into_iter()
        .map(|docs| {
            if docs.is_empty() {
                return Vec::new();
            }
            let mean = matrix.mean_of(docs);
            let mut scored: Vec<(usize, f64)> = mean
                .iter()
                .zip(&corpus)
                .enumerate()
                .map(|(j, (m, c))| (j, m - c))
                .filter(|(_, s)| *s > 0.0)
                .collect();
            scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            scored
                .into_iter()
                .take(top)
                .map(|(j, _)| matrix.vocabulary[j].clone())
                .collect()
        })
        .collect()
}

pub fn cluster_label(cluster_id: usize, terms: &[String]) -> String {
    if terms.is_empty() {
        return format!("cluster {cluster_id}");
    }
    terms
        .iter()
        .take(LABEL_TERMS)
        .cloned()
        .collect::<Vec<_>>()
        .join(" / ")
}

/// Per-month entropy (bits) of the cluster distribution, with `log2 k` as
/// the ceiling. `months` yields one bucket per label, in label order.
pub fn monthly_entropy<'a>(
    months: impl IntoIterator<Item = &'a str>,
    labels: &[usize],
    k: usize,
) -> Vec<EntropyRow> {
    let mut counts: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
    for (month, &l) in months.into_iter().zip(labels) {
        counts.entry(month).or_insert_with(|| vec![0; k])[l] += 1;
    }
    let max_entropy = (k as f64).log2();
    counts
        .into_iter()
        .map(|(month, c)| EntropyRow {
            year_month: month.to_string(),
            n_messages: c.iter().sum(),
            entropy: entropy_of_counts(&c).min(max_entropy),
            max_entropy,
        })
        .collect()
}

pub fn write_centroids(path: &Path, centroids: &[Vec<f64>]) -> Result<(), AnalysisError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dim = centroids.first().map_or(0, Vec::len);
    let mut writer = csv::Writer::from_writer(BufWriter::new(File::create(path)?));
    let mut header = vec!["cluster_id".to_string()];
    header.extend((0..dim).map(|d| format!("c{d}")));
    writer.write_record(&header)?;
    for (id, c) in centroids.iter().enumerate() {
        let mut record = vec![id.to_string()];
        record.extend(c.iter().map(|x| x.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read `fine_cluster_centroids.csv` as cluster id -> centroid.
pub fn read_centroids(path: &Path) -> Result<BTreeMap<usize, Vec<f64>>, AnalysisError> {
    if !path.exists() {
        return Err(CoreError::MissingTable(path.display().to_string()).into());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut out = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        let mut fields = record.iter();
        let id = fields
            .next()
            .and_then(|f| f.parse::<usize>().ok())
            .ok_or_else(|| AnalysisError::Computation(format!("bad cluster id in {}", path.display())))?;
        let values = fields
            .map(|f| f.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AnalysisError::Computation(format!("bad centroid value: {e}")))?;
        out.insert(id, values);
    }
    Ok(out)
}

/// Fit the fine topic model over every stored message and write its tables.
pub fn run(
    store: &MessageStore,
    out_dir: &Path,
    config: &TopicConfig,
    progress: Option<&mut dyn ProgressObserver>,
) -> Result<TopicSummary, AnalysisError> {
    config.validate()?;
    let mut progress = Progress::new("topics", progress);
    progress.report(0.0, "Loading messages");
    let messages = store.messages()?;
    if config.n_clusters > messages.len() {
        return Err(AnalysisError::Config(format!(
            "n_clusters ({}) exceeds the number of messages ({})",
            config.n_clusters,
            messages.len()
        )));
    }

    progress.report(0.1, "Building TF-IDF matrix");
    let matrix = build_matrix(&messages, config)?;

    progress.report(0.3, "Reducing dimensions and clustering");
    let fit = fit_reduced(&matrix, config.n_clusters, config.svd_components, config)?;
    let labels = &fit.clustering.labels;

    progress.report(0.8, "Labelling clusters");
    let terms = discriminative_terms(&matrix, labels, config.n_clusters, config.top_terms);
    let sizes = fit.clustering.sizes();
    let summary_rows: Vec<ClusterSummaryRow> = terms
        .iter()
        .enumerate()
        .map(|(id, t)| ClusterSummaryRow {
            cluster_id: id,
            size: sizes[id],
            label: cluster_label(id, t),
            top_terms: t.join(";"),
        })
        .collect();

    let assignments: Vec<AssignmentRow> = messages
        .iter()
        .zip(labels)
        .map(|(m, &l)| AssignmentRow {
            node_id: m.node_id.clone(),
            fine_cluster: l,
        })
        .collect();
    let entropy = monthly_entropy(
        messages.iter().map(|m| m.year_month.as_str()),
        labels,
        config.n_clusters,
    );

    progress.report(0.9, "Writing topic tables");
    write_rows(&out_dir.join(ASSIGNMENTS_FILE), &assignments)?;
    write_rows(&out_dir.join(ENTROPY_FILE), &entropy)?;
    write_rows(&out_dir.join(SUMMARY_FILE), &summary_rows)?;
    write_centroids(&out_dir.join(CENTROIDS_FILE), &fit.clustering.centroids)?;

    let entropies: Vec<f64> = entropy.iter().map(|r| r.entropy).collect();
    let summary = TopicSummary {
        messages: messages.len(),
        vocabulary: matrix.n_terms(),
        components: fit.reduced.first().map_or(0, Vec::len),
        clusters: config.n_clusters,
        months: entropy.len(),
        mean_entropy: crate::stats::mean(&entropies),
        iterations: fit.clustering.iterations,
    };
    tracing::info!(
        messages = summary.messages,
        vocabulary = summary.vocabulary,
        clusters = summary.clusters,
        "Topic model fitted"
    );
    progress.finish("Topics complete");
    Ok(summary)
}
