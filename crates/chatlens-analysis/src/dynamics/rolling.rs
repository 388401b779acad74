use serde::{Deserialize, Serialize};

use super::LabeledMessage;
use crate::stats::entropy_of_counts;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingEntropyRow {
    pub window_index: usize,
    pub start_ts: f64,
    pub end_ts: f64,
    pub start_month: String,
    pub n_messages: usize,
    pub entropy: f64,
    pub entropy_norm: f64,
}

/// Macro-domain entropy over fixed-size windows of the time-ordered message
/// stream. Only complete windows are emitted.
pub fn rolling_entropy(
    messages: &[LabeledMessage],
    window: usize,
    stride: usize,
    n_domains: usize,
) -> Vec<RollingEntropyRow> {
    if window == 0 || stride == 0 || messages.len() < window {
        return Vec::new();
    }
    let max_entropy = (n_domains as f64).log2();
    (0..=messages.len() - window)
        .step_by(stride)
        .enumerate()
        .map(|(window_index, start)| {
            let slice = &messages[start..start + window];
            let mut counts = vec![0u64; n_domains];
            for m in slice {
                if let Some(c) = counts.get_mut(m.macro_domain) {
                    *c += 1;
                }
            }
            let entropy = entropy_of_counts(&counts);
            RollingEntropyRow {
                window_index,
                start_ts: slice[0].timestamp,
                end_ts: slice[window - 1].timestamp,
                start_month: slice[0].year_month.clone(),
                n_messages: window,
                entropy,
                entropy_norm: if max_entropy > 0.0 {
                    entropy / max_entropy
                } else {
                    0.0
                },
            }
        })
        .collect()
}
