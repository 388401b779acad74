use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::AnalysisError;

const TOLERANCE: f64 = 1e-10;

/// Seeded k-means with k-means++ initialization and optional point weights.
#[derive(Debug, Clone, Copy)]
pub struct KMeans {
    pub k: usize,
    pub max_iter: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub iterations: usize,
    pub inertia: f64,
}

impl Clustering {
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centroids.len()];
        for &l in &self.labels {
            sizes[l] += 1;
        }
        sizes
    }
}

impl KMeans {
    pub fn fit(&self, points: &[Vec<f64>]) -> Result<Clustering, AnalysisError> {
        let weights = vec![1.0; points.len()];
        self.fit_weighted(points, &weights)
    }

    pub fn fit_weighted(
        &self,
        points: &[Vec<f64>],
        weights: &[f64],
    ) -> Result<Clustering, AnalysisError> {
        if self.k == 0 || self.k > points.len() {
            return Err(AnalysisError::Config(format!(
                "cannot form {} clusters from {} points",
                self.k,
                points.len()
            )));
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = self.init_plus_plus(points, weights, &mut rng);
        let mut labels = vec![usize::MAX; points.len()];
        let mut iterations = 0;

        for _ in 0..self.max_iter.max(1) {
            iterations += 1;
            let assigned: Vec<usize> = points
                .par_iter()
                .map(|p| nearest(p, &centroids).0)
                .collect();
            let changed = assigned != labels;
            labels = assigned;

            let updated = self.update_centroids(points, weights, &mut labels, &centroids);
            let shift = centroids
                .iter()
                .zip(&updated)
                .map(|(a, b)| squared_distance(a, b))
                .fold(0.0, f64::max);
            centroids = updated;
            if !changed || shift <= TOLERANCE {
                break;
            }
        }

        let inertia = points
            .iter()
            .zip(&labels)
            .zip(weights)
            .map(|((p, &l), w)| w * squared_distance(p, &centroids[l]))
            .sum();
        Ok(Clustering {
            labels,
            centroids,
            iterations,
            inertia,
        })
    }

    fn init_plus_plus(&self, points: &[Vec<f64>], weights: &[f64], rng: &mut StdRng) -> Vec<Vec<f64>> {
        let mut centroids = Vec::with_capacity(self.k);
        let first = sample_weighted(weights, rng).unwrap_or(0);
        centroids.push(points[first].clone());
        let mut d2: Vec<f64> = points
            .iter()
            .map(|p| squared_distance(p, &centroids[0]))
            .collect();

        while centroids.len() < self.k {
            let scores: Vec<f64> = d2.iter().zip(weights).map(|(d, w)| d * w).collect();
            // Every point already coincides with a centroid.
            let next = sample_weighted(&scores, rng)
                .unwrap_or_else(|| centroids.len().min(points.len() - 1));
            let c = points[next].clone();
            for (d, p) in d2.iter_mut().zip(points) {
                *d = d.min(squared_distance(p, &c));
            }
            centroids.push(c);
        }
        centroids
    }

    /// Weighted means of assigned points; an empty cluster is re-seeded with
    /// the point farthest from its current centroid.
    fn update_centroids(
        &self,
        points: &[Vec<f64>],
        weights: &[f64],
        labels: &mut [usize],
        previous: &[Vec<f64>],
    ) -> Vec<Vec<f64>> {
        let dim = points.first().map_or(0, Vec::len);
        let mut sums = vec![vec![0.0; dim]; self.k];
        let mut mass = vec![0.0; self.k];
        let mut counts = vec![0usize; self.k];
        for ((p, &l), &w) in points.iter().zip(labels.iter()).zip(weights) {
            counts[l] += 1;
            mass[l] += w;
            for (s, x) in sums[l].iter_mut().zip(p) {
                *s += w * x;
            }
        }

        for c in 0..self.k {
            if counts[c] > 0 {
                continue;
            }
            let far = (0..points.len())
                .filter(|&i| counts[labels[i]] > 1)
                .max_by(|&a, &b| {
                    let da = squared_distance(&points[a], &previous[labels[a]]);
                    let db = squared_distance(&points[b], &previous[labels[b]]);
                    da.total_cmp(&db).then(b.cmp(&a))
                });
            let Some(i) = far else { continue };
            let old = labels[i];
            counts[old] -= 1;
            mass[old] -= weights[i];
            for (s, x) in sums[old].iter_mut().zip(&points[i]) {
                *s -= weights[i] * x;
            }
            labels[i] = c;
            counts[c] = 1;
            mass[c] = weights[i];
            sums[c] = points[i].iter().map(|x| weights[i] * x).collect();
        }

        sums.into_iter()
            .zip(mass)
            .zip(previous)
            .map(|((s, m), prev)| {
                if m > 0.0 {
                    s.into_iter().map(|x| x / m).collect()
                } else {
                    prev.clone()
                }
            })
            .collect()
    }
}

/// Index of the nearest centroid (lowest index on ties) and its squared distance.
pub fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = squared_distance(point, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn sample_weighted(weights: &[f64], rng: &mut StdRng) -> Option<usize> {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    let mut target = rng.gen::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        if *w <= 0.0 {
            continue;
        }
        if target < *w {
            return Some(i);
        }
        target -= w;
    }
    weights.iter().rposition(|w| *w > 0.0)
}
