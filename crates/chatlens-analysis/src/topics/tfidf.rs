use std::collections::{BTreeMap, HashMap, HashSet};

use regex::Regex;

use crate::error::AnalysisError;

/// English stop words removed before n-grams are formed.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "across", "after", "afterwards", "again", "against", "all", "almost",
    "alone", "along", "already", "also", "although", "always", "am", "among", "amongst", "an",
    "and", "another", "any", "anyhow", "anyone", "anything", "anyway", "anywhere", "are",
    "around", "as", "at", "be", "became", "because", "become", "becomes", "becoming", "been",
    "before", "beforehand", "behind", "being", "below", "beside", "besides", "between", "beyond",
    "both", "but", "by", "can", "cannot", "could", "did", "do", "does", "doing", "done", "down",
    "due", "during", "each", "eg", "either", "else", "elsewhere", "enough", "etc", "even",
    "ever", "every", "everyone", "everything", "everywhere", "except", "few", "for", "former",
    "formerly", "from", "further", "had", "has", "have", "having", "he", "hence", "her", "here",
    "hereafter", "hereby", "herein", "hers", "herself", "him", "himself", "his", "how",
    "however", "ie", "if", "in", "indeed", "into", "is", "it", "its", "itself", "just", "last",
    "latter", "least", "less", "ll", "many", "may", "me", "meanwhile", "might", "mine", "more",
    "moreover", "most", "mostly", "much", "must", "my", "myself", "neither", "never",
    "nevertheless", "no", "nobody", "none", "nor", "not", "nothing", "now", "nowhere", "of",
    "off", "often", "on", "once", "one", "only", "onto", "or", "other", "others", "otherwise",
    "our", "ours", "ourselves", "out", "over", "own", "per", "perhaps", "please", "rather", "re",
    "same", "seem", "seemed", "seeming", "seems", "several", "she", "should", "since", "so",
    "some", "somehow", "someone", "something", "sometime", "sometimes", "somewhere", "still",
    "such", "than", "that", "the", "their", "theirs", "them", "themselves", "then", "thence",
    "there", "thereafter", "thereby", "therefore", "therein", "these", "they", "this", "those",
    "though", "through", "throughout", "thru", "thus", "to", "together", "too", "toward",
    "towards", "under", "until", "up", "upon", "us", "ve", "very", "via", "was", "we", "well",
    "were", "what", "whatever", "when", "whence", "whenever", "where", "whereafter", "whereas",
    "whereby", "wherein", "whereupon", "wherever", "whether", "which", "while", "whither",
    "who", "whoever", "whole", "whom", "whose", "why", "will", "with", "within", "without",
    "would", "yet", "you", "your", "yours", "yourself", "yourselves",
];

/// Lowercasing word tokenizer producing unigrams and adjacent bigrams.
pub struct Tokenizer {
    word: Regex,
    stop: HashSet<&'static str>,
}

impl Tokenizer {
    pub fn new() -> Result<Self, AnalysisError> {
        let word = Regex::new(r"\b\w\w+\b")
            .map_err(|e| AnalysisError::Computation(format!("token pattern: {e}")))?;
        Ok(Self {
            word,
            stop: STOP_WORDS.iter().copied().collect(),
        })
    }

    pub fn terms(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let words: Vec<&str> = self
            .word
            .find_iter(&lower)
            .map(|m| m.as_str())
            .filter(|w| !self.stop.contains(*w))
            .collect();
        let mut terms: Vec<String> = words.iter().map(|w| w.to_string()).collect();
        terms.extend(words.windows(2).map(|pair| format!("{} {}", pair[0], pair[1])));
        terms
    }
}

/// Sparse row: (term index, weight) pairs sorted by term index.
pub type SparseRow = Vec<(usize, f64)>;

/// Row-normalized TF-IDF document-term matrix.
#[derive(Debug, Clone)]
pub struct TfidfMatrix {
    /// Vocabulary, sorted lexically; column `j` is `vocabulary[j]`.
    pub vocabulary: Vec<String>,
    pub rows: Vec<SparseRow>,
}

impl TfidfMatrix {
    pub fn n_docs(&self) -> usize {
        self.rows.len()
    }

    pub fn n_terms(&self) -> usize {
        self.vocabulary.len()
    }

    /// Column means over all documents.
    pub fn column_means(&self) -> Vec<f64> {
        self.mean_of(0..self.rows.len())
    }

    /// Column means over the selected documents.
    pub fn mean_of(&self, docs: impl IntoIterator<Item = usize>) -> Vec<f64> {
        let mut sums = vec![0.0; self.n_terms()];
        let mut n = 0usize;
        for d in docs {
            n += 1;
            for &(j, v) in &self.rows[d] {
                sums[j] += v;
            }
        }
        if n > 0 {
            for s in &mut sums {
                *s /= n as f64;
            }
        }
        sums
    }
}

/// Vocabulary limits applied before weighting.
#[derive(Debug, Clone, Copy)]
pub struct VocabularyLimits {
    pub min_df: usize,
    pub max_df: f64,
    pub n_features: usize,
}

/// Build the TF-IDF matrix for `documents`.
///
/// Terms must appear in at least `min_df` documents and at most a `max_df`
/// fraction of them; the `n_features` most frequent survivors are kept.
/// Weights use smooth idf `ln((1 + n) / (1 + df)) + 1` and rows are
/// L2-normalized.
pub fn fit_transform(
    tokenizer: &Tokenizer,
    documents: &[&str],
    limits: VocabularyLimits,
) -> Result<TfidfMatrix, AnalysisError> {
    let n_docs = documents.len();
    let tokenized: Vec<Vec<String>> = documents.iter().map(|d| tokenizer.terms(d)).collect();

    let mut df: HashMap<&str, usize> = HashMap::new();
    let mut tf_total: HashMap<&str, usize> = HashMap::new();
    for terms in &tokenized {
        let mut seen = HashSet::new();
        for t in terms {
            *tf_total.entry(t.as_str()).or_default() += 1;
            if seen.insert(t.as_str()) {
                *df.entry(t.as_str()).or_default() += 1;
            }
        }
    }

    let max_doc_count = limits.max_df * n_docs as f64;
    let mut candidates: Vec<(&str, usize)> = df
        .iter()
        .filter(|(_, &d)| d >= limits.min_df && d as f64 <= max_doc_count)
        .map(|(t, _)| (*t, tf_total.get(t).copied().unwrap_or(0)))
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    candidates.truncate(limits.n_features);

    if candidates.is_empty() {
        return Err(AnalysisError::Computation(format!(
            "empty vocabulary after document-frequency cutoffs (min_df={}, max_df={}, {n_docs} documents)",
            limits.min_df, limits.max_df
        )));
    }

    let mut vocabulary: Vec<String> = candidates.iter().map(|(t, _)| t.to_string()).collect();
    vocabulary.sort();
    let index: HashMap<&str, usize> = vocabulary
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();
    let idf: Vec<f64> = vocabulary
        .iter()
        .map(|t| {
            let d = df.get(t.as_str()).copied().unwrap_or(0) as f64;
            ((1.0 + n_docs as f64) / (1.0 + d)).ln() + 1.0
        })
        .collect();

    let rows = tokenized
        .iter()
        .map(|terms| {
            let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
            for t in terms {
                if let Some(&j) = index.get(t.as_str()) {
                    *counts.entry(j).or_default() += 1.0;
                }
            }
            let mut row: SparseRow = counts.into_iter().map(|(j, c)| (j, c * idf[j])).collect();
            let norm = row.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                for (_, v) in &mut row {
                    *v /= norm;
                }
            }
            row
        })
        .collect();

    tracing::debug!(
        documents = n_docs,
        vocabulary = vocabulary.len(),
        "TF-IDF matrix built"
    );
    Ok(TfidfMatrix { vocabulary, rows })
}
