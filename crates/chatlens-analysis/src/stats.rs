//! Shared statistics: information measures, vector similarity, seeded
//! permutation trials and exact tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Comparisons against an observed statistic tolerate this much float noise.
const TIE_EPS: f64 = 1e-12;

/// Shannon entropy in bits of a non-negative weight vector.
///
/// Weights are normalized first; an all-zero vector has entropy 0.
pub fn entropy(weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let h: f64 = weights
        .iter()
        .filter(|w| **w > 0.0)
        .map(|w| {
            let p = w / total;
            -p * p.log2()
        })
        .sum();
    h.max(0.0)
}

pub fn entropy_of_counts(counts: &[u64]) -> f64 {
    let weights: Vec<f64> = counts.iter().map(|c| *c as f64).collect();
    entropy(&weights)
}

/// Jensen-Shannon divergence, base 2, between two weight vectors of equal
/// length. Inputs are normalized; `None` when either has no mass.
pub fn js_divergence(p: &[f64], q: &[f64]) -> Option<f64> {
    debug_assert_eq!(p.len(), q.len());
    let sp: f64 = p.iter().sum();
    let sq: f64 = q.iter().sum();
    if sp <= 0.0 || sq <= 0.0 {
        return None;
    }
    let kl = |a: f64, m: f64| if a > 0.0 { a * (a / m).log2() } else { 0.0 };
    let mut js = 0.0;
    for (a, b) in p.iter().zip(q) {
        let a = a / sp;
        let b = b / sq;
        let m = 0.5 * (a + b);
        if m > 0.0 {
            js += 0.5 * kl(a, m) + 0.5 * kl(b, m);
        }
    }
    Some(js.clamp(0.0, 1.0))
}

/// Half the L1 distance between two distributions.
pub fn total_variation(p: &[f64], q: &[f64]) -> f64 {
    0.5 * p.iter().zip(q).map(|(a, b)| (a - b).abs()).sum::<f64>()
}

/// Cosine similarity, or `None` when either vector has zero norm.
pub fn cosine(a: &[f64], b: &[f64]) -> Option<f64> {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = norm(a);
    let nb = norm(b);
    if na <= TIE_EPS || nb <= TIE_EPS {
        return None;
    }
    Some((dot / (na * nb)).clamp(-1.0, 1.0))
}

pub fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// One-sided permutation p-value for "null at least as large as observed".
pub fn p_greater(observed: f64, null: &[f64]) -> f64 {
    let hits = null.iter().filter(|v| **v >= observed - TIE_EPS).count();
    (1 + hits) as f64 / (1 + null.len()) as f64
}

/// One-sided permutation p-value for "null at most as large as observed".
pub fn p_less(observed: f64, null: &[f64]) -> f64 {
    let hits = null.iter().filter(|v| **v <= observed + TIE_EPS).count();
    (1 + hits) as f64 / (1 + null.len()) as f64
}

/// Two-sided permutation p-value on absolute magnitude.
pub fn p_two_sided(observed: f64, null: &[f64]) -> f64 {
    let obs = observed.abs();
    let hits = null.iter().filter(|v| v.abs() >= obs - TIE_EPS).count();
    (1 + hits) as f64 / (1 + null.len()) as f64
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Derive an independent seed from a master seed and a path of indices.
pub fn derive_seed(master: u64, indices: &[u64]) -> u64 {
    indices
        .iter()
        .fold(splitmix64(master), |acc, i| splitmix64(acc ^ splitmix64(*i)))
}

/// Run `n` independent seeded trials in parallel.
///
/// Trial `t` is seeded from `(master, indices.., t)` and results come back in
/// trial order, so the output does not depend on thread scheduling.
pub fn parallel_trials<F>(n: usize, master: u64, indices: &[u64], trial: F) -> Vec<f64>
where
    F: Fn(&mut StdRng) -> f64 + Sync,
{
    (0..n)
        .into_par_iter()
        .map(|t| {
            let mut path = indices.to_vec();
            path.push(t as u64);
            let mut rng = StdRng::seed_from_u64(derive_seed(master, &path));
            trial(&mut rng)
        })
        .collect()
}

/// Standard normal draw by the Box-Muller transform.
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Exact two-sided binomial test of `k` successes in `n` trials against
/// success probability `p`: the total probability of outcomes no more likely
/// than the observed one.
pub fn binomial_two_sided(k: u64, n: u64, p: f64) -> f64 {
    if n == 0 {
        return 1.0;
    }
    let ln_p = p.ln();
    let ln_q = (1.0 - p).ln();
    let mut ln_choose = 0.0;
    let mut log_pmf = Vec::with_capacity(n as usize + 1);
    for i in 0..=n {
        if i > 0 {
            ln_choose += ((n - i + 1) as f64).ln() - (i as f64).ln();
        }
        log_pmf.push(ln_choose + i as f64 * ln_p + (n - i) as f64 * ln_q);
    }
    let observed = log_pmf[k.min(n) as usize];
    // Relative tolerance so symmetric outcomes count as "equally likely".
    let cutoff = observed + (1.0 + 1e-7f64).ln();
    let total: f64 = log_pmf
        .iter()
        .filter(|lp| **lp <= cutoff)
        .map(|lp| lp.exp())
        .sum();
    total.min(1.0)
}
