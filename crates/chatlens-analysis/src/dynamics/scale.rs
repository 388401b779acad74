use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use chatlens_core::model::Role;

use super::LabeledMessage;
use crate::stats::{mean, std_dev, total_variation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleSeparationRow {
    pub year_month: String,
    pub n_weeks: usize,
    /// Mean over domains of the spread of weekly shares inside the month.
    pub weekly_variability: f64,
    /// Total-variation distance to the previous month's shares.
    pub monthly_variability: f64,
    /// (weekly - monthly) / (weekly + monthly), in [-1, 1].
    pub scale_index: f64,
}

fn normalize(counts: &[u64]) -> Vec<f64> {
    let n: u64 = counts.iter().sum();
    counts
        .iter()
        .map(|&c| if n == 0 { 0.0 } else { c as f64 / n as f64 })
        .collect()
}

/// Compare within-month weekly churn to month-over-month change for one
/// role. The first month has nothing to compare against and is omitted, as
/// are months where both measures are zero.
pub fn scale_separation(
    messages: &[LabeledMessage],
    role: Role,
    n_domains: usize,
) -> Vec<ScaleSeparationRow> {
    let mut months: BTreeMap<&str, BTreeMap<&str, Vec<u64>>> = BTreeMap::new();
    for m in messages.iter().filter(|m| m.role == role) {
        let counts = months
            .entry(m.year_month.as_str())
            .or_default()
            .entry(m.year_week.as_str())
            .or_insert_with(|| vec![0; n_domains]);
        if let Some(c) = counts.get_mut(m.macro_domain) {
            *c += 1;
        }
    }

    let mut rows = Vec::new();
    let mut previous: Option<Vec<f64>> = None;
    for (month, weeks) in months {
        let mut month_counts = vec![0u64; n_domains];
        for counts in weeks.values() {
            for (total, c) in month_counts.iter_mut().zip(counts) {
                *total += c;
            }
        }
        let shares = normalize(&month_counts);
        let weekly: Vec<Vec<f64>> = weeks.values().map(|c| normalize(c)).collect();
        let spreads: Vec<f64> = (0..n_domains)
            .map(|d| std_dev(&weekly.iter().map(|w| w[d]).collect::<Vec<_>>()))
            .collect();
        let w = mean(&spreads);

        if let Some(prev) = &previous {
            let m = total_variation(prev, &shares);
            if w + m > 0.0 {
                rows.push(ScaleSeparationRow {
                    year_month: month.to_string(),
                    n_weeks: weeks.len(),
                    weekly_variability: w,
                    monthly_variability: m,
                    scale_index: (w - m) / (w + m),
                });
            }
        }
        previous = Some(shares);
    }
    rows
}
