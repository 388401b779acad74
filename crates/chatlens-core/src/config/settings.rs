use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::Role;

/// Configuration for every pipeline stage, loadable from one JSON document.
/// Every section and field is optional; omitted values take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub precheck: PrecheckConfig,
    pub profile: ProfileConfig,
    pub topics: TopicConfig,
    pub domains: DomainConfig,
    pub robustness: RobustnessConfig,
    pub coupling: CouplingConfig,
    pub dynamics: DynamicsConfig,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.precheck.validate()?;
        self.profile.validate()?;
        self.topics.validate()?;
        self.domains.validate()?;
        self.robustness.validate()?;
        self.coupling.validate()?;
        self.dynamics.validate()
    }
}

fn require(ok: bool, msg: impl FnOnce() -> String) -> Result<(), CoreError> {
    if ok {
        Ok(())
    } else {
        Err(CoreError::Config(msg()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecheckConfig {
    pub min_user_messages: usize,
    pub min_months: usize,
}

impl Default for PrecheckConfig {
    fn default() -> Self {
        Self {
            min_user_messages: 2000,
            min_months: 3,
        }
    }
}

impl PrecheckConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Monthly marker rates are expressed per this many user messages.
    pub rate_base: f64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self { rate_base: 1000.0 }
    }
}

impl ProfileConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        require(self.rate_base > 0.0, || {
            format!("profile.rate_base must be positive, got {}", self.rate_base)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Vocabulary cap (unigrams + bigrams).
    pub n_features: usize,
    pub svd_components: usize,
    pub n_clusters: usize,
    /// Minimum document frequency, absolute count.
    pub min_df: usize,
    /// Maximum document frequency, fraction of documents.
    pub max_df: f64,
    pub random_state: u64,
    pub top_terms: usize,
    pub max_iter: usize,
    pub power_iterations: usize,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            n_features: 60_000,
            svd_components: 200,
            n_clusters: 60,
            min_df: 5,
            max_df: 0.6,
            random_state: 42,
            top_terms: 10,
            max_iter: 100,
            power_iterations: 2,
        }
    }
}

impl TopicConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        require(self.n_features > 0, || "topics.n_features must be > 0".into())?;
        require(self.svd_components > 0, || {
            "topics.svd_components must be > 0".into()
        })?;
        require(self.n_clusters > 0, || "topics.n_clusters must be > 0".into())?;
        require(self.max_df > 0.0 && self.max_df <= 1.0, || {
            format!("topics.max_df must be in (0, 1], got {}", self.max_df)
        })?;
        require(self.max_iter > 0, || "topics.max_iter must be > 0".into())
    }
}

/// Meta-clustering of fine topic clusters into macro domains: size-weighted
/// k-means over the fine cluster centroids in the reduced SVD space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    pub n_macro: usize,
    pub random_state: u64,
    pub max_iter: usize,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            n_macro: 8,
            random_state: 42,
            max_iter: 100,
        }
    }
}

impl DomainConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        require(self.n_macro > 0, || "domains.n_macro must be > 0".into())?;
        require(self.max_iter > 0, || "domains.max_iter must be > 0".into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobustnessConfig {
    pub k_values: Vec<usize>,
    pub svd_values: Vec<usize>,
    pub n_permutations: usize,
    pub random_state: u64,
    /// Base topic model settings; `n_clusters` and `svd_components` are
    /// overridden per grid point.
    pub topics: TopicConfig,
}

impl Default for RobustnessConfig {
    fn default() -> Self {
        Self {
            k_values: vec![40, 60, 80],
            svd_values: vec![100, 200],
            n_permutations: 200,
            random_state: 42,
            topics: TopicConfig::default(),
        }
    }
}

impl RobustnessConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        require(!self.k_values.is_empty() && !self.svd_values.is_empty(), || {
            "robustness grid must contain at least one k and one svd value".into()
        })?;
        require(self.k_values.iter().all(|&k| k > 0), || {
            "robustness.k_values must be > 0".into()
        })?;
        require(self.svd_values.iter().all(|&d| d > 0), || {
            "robustness.svd_values must be > 0".into()
        })?;
        require(self.n_permutations > 0, || {
            "robustness.n_permutations must be > 0".into()
        })?;
        self.topics.validate()
    }

    /// Grid points in row-major order: every k with every svd value.
    pub fn grid(&self) -> Vec<(usize, usize)> {
        self.k_values
            .iter()
            .flat_map(|&k| self.svd_values.iter().map(move |&d| (k, d)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouplingConfig {
    pub n_permutations: usize,
    pub random_state: u64,
}

impl Default for CouplingConfig {
    fn default() -> Self {
        Self {
            n_permutations: 2_000,
            random_state: 42,
        }
    }
}

impl CouplingConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        require(self.n_permutations > 0, || {
            "coupling.n_permutations must be > 0".into()
        })
    }
}

/// How months (and weeks) are classified into behavioural states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatePolicy {
    /// Absolute thresholds on normalized macro-domain entropy.
    StaticLevel,
    /// Thresholds on the first difference of normalized entropy.
    RateBased,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicsConfig {
    pub rolling_window: usize,
    pub rolling_stride: usize,
    pub min_thread_msgs: usize,
    pub min_episode_len: usize,
    pub shift_permutations: usize,
    /// Width of the per-thread time buckets whose dominant domains are
    /// compared when looking for shifts, in seconds from the thread's first
    /// message.
    pub shift_bucket_secs: f64,
    pub random_state: u64,
    pub state_policy: StatePolicy,
    pub entropy_high: f64,
    pub entropy_low: f64,
    pub rate_threshold: f64,
    /// Role whose shares drive scale separation and state segmentation.
    pub role: Role,
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        Self {
            rolling_window: 250,
            rolling_stride: 250,
            min_thread_msgs: 20,
            min_episode_len: 20,
            shift_permutations: 5_000,
            shift_bucket_secs: 600.0,
            random_state: 42,
            state_policy: StatePolicy::StaticLevel,
            entropy_high: 0.75,
            entropy_low: 0.5,
            rate_threshold: 0.05,
            role: Role::User,
        }
    }
}

impl DynamicsConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        require(self.rolling_window > 0 && self.rolling_stride > 0, || {
            "dynamics.rolling_window and rolling_stride must be > 0".into()
        })?;
        require(self.min_thread_msgs > 0 && self.min_episode_len > 0, || {
            "dynamics.min_thread_msgs and min_episode_len must be > 0".into()
        })?;
        require(self.shift_permutations > 0, || {
            "dynamics.shift_permutations must be > 0".into()
        })?;
        require(
            self.shift_bucket_secs.is_finite() && self.shift_bucket_secs > 0.0,
            || "dynamics.shift_bucket_secs must be a positive number".into(),
        )?;
        require(self.entropy_low <= self.entropy_high, || {
            format!(
                "dynamics.entropy_low ({}) must not exceed entropy_high ({})",
                self.entropy_low, self.entropy_high
            )
        })?;
        require(self.rate_threshold >= 0.0, || {
            "dynamics.rate_threshold must be >= 0".into()
        })
    }
}
