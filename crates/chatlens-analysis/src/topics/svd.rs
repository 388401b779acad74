//! Randomized truncated SVD of a sparse TF-IDF matrix.
//!
//! Range finding with a seeded Gaussian test matrix and power iterations,
//! then an exact eigen-solve of the small projected Gram matrix.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::stats::gaussian;

use super::tfidf::TfidfMatrix;

const OVERSAMPLE: usize = 10;
const JACOBI_SWEEPS: usize = 100;

/// Dense row-major matrix.
type Dense = Vec<Vec<f64>>;

/// Reduce `matrix` to `components` dimensions (capped by its shape).
///
/// Returns one L2-normalized row per document; documents with no terms map
/// to the zero vector.
pub fn reduce(matrix: &TfidfMatrix, components: usize, power_iterations: usize, seed: u64) -> Dense {
    let n = matrix.n_docs();
    let m = matrix.n_terms();
    let k = components.min(n).min(m);
    if k == 0 {
        return vec![Vec::new(); n];
    }
    let l = (k + OVERSAMPLE).min(n).min(m);

    let mut rng = StdRng::seed_from_u64(seed);
    let omega: Dense = (0..m)
        .map(|_| (0..l).map(|_| gaussian(&mut rng)).collect())
        .collect();

    let mut q = multiply(matrix, &omega, l);
    orthonormalize(&mut q);
    for _ in 0..power_iterations {
        let mut z = multiply_transpose(matrix, &q, l);
        orthonormalize(&mut z);
        q = multiply(matrix, &z, l);
        orthonormalize(&mut q);
    }

    // B = Q^T A, stored as l rows of length m.
    let mut b = vec![vec![0.0; m]; l];
    for (i, row) in matrix.rows.iter().enumerate() {
        for &(j, v) in row {
            for c in 0..l {
                b[c][j] += q[i][c] * v;
            }
        }
    }
    let gram: Dense = (0..l)
        .map(|r| (0..l).map(|c| dot(&b[r], &b[c])).collect())
        .collect();
    let (values, vectors) = symmetric_eigen(gram);

    let mut order: Vec<usize> = (0..l).collect();
    order.sort_by(|a, b| values[*b].total_cmp(&values[*a]).then(a.cmp(b)));
    order.truncate(k);
    let singular: Vec<f64> = order.iter().map(|&i| values[i].max(0.0).sqrt()).collect();

    // A V = Q U S
    let mut reduced: Dense = q
        .iter()
        .map(|qrow| {
            order
                .iter()
                .zip(&singular)
                .map(|(&e, s)| (0..l).map(|c| qrow[c] * vectors[c][e]).sum::<f64>() * s)
                .collect()
        })
        .collect();
    for row in &mut reduced {
        normalize(row);
    }
    reduced
}

/// A (n x m, sparse) times a dense m x l matrix.
fn multiply(matrix: &TfidfMatrix, dense: &Dense, l: usize) -> Dense {
    matrix
        .rows
        .iter()
        .map(|row| {
            let mut out = vec![0.0; l];
            for &(j, v) in row {
                for (o, d) in out.iter_mut().zip(&dense[j]) {
                    *o += v * d;
                }
            }
            out
        })
        .collect()
}

/// A^T times a dense n x l matrix.
fn multiply_transpose(matrix: &TfidfMatrix, dense: &Dense, l: usize) -> Dense {
    let mut out = vec![vec![0.0; l]; matrix.n_terms()];
    for (row, drow) in matrix.rows.iter().zip(dense) {
        for &(j, v) in row {
            for (o, d) in out[j].iter_mut().zip(drow) {
                *o += v * d;
            }
        }
    }
    out
}

/// Orthonormalize the columns of a row-major matrix in place (modified
/// Gram-Schmidt, two passes). Columns that collapse become zero.
fn orthonormalize(mat: &mut Dense) {
    let rows = mat.len();
    let cols = mat.first().map_or(0, Vec::len);
    let mut columns: Dense = (0..cols)
        .map(|c| (0..rows).map(|r| mat[r][c]).collect())
        .collect();
    for _ in 0..2 {
        for c in 0..cols {
            let (done, rest) = columns.split_at_mut(c);
            let current = &mut rest[0];
            for prev in done.iter() {
                let proj = dot(prev, current);
                for (x, p) in current.iter_mut().zip(prev) {
                    *x -= proj * p;
                }
            }
            normalize(current);
        }
    }
    for (r, row) in mat.iter_mut().enumerate() {
        for (c, x) in row.iter_mut().enumerate() {
            *x = columns[c][r];
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(v: &mut [f64]) {
    let norm = dot(v, v).sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    } else {
        v.fill(0.0);
    }
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Returns the eigenvalues and a matrix whose column `i` is the eigenvector
/// of eigenvalue `i`.
pub(crate) fn symmetric_eigen(mut a: Dense) -> (Vec<f64>, Dense) {
    let n = a.len();
    let mut v: Dense = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for _ in 0..JACOBI_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| a[i][j] * a[i][j])
            .sum();
        let scale: f64 = (0..n).map(|i| a[i][i] * a[i][i]).sum::<f64>().max(1e-300);
        if off <= 1e-22 * scale {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if a[p][q].abs() < 1e-300 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let t = if theta == 0.0 { 1.0 } else { t };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[k][p];
                    let akq = a[k][q];
                    a[k][p] = c * akp - s * akq;
                    a[k][q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[p][k];
                    let aqk = a[q][k];
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
                for row in v.iter_mut() {
                    let vp = row[p];
                    let vq = row[q];
                    row[p] = c * vp - s * vq;
                    row[q] = s * vp + c * vq;
                }
            }
        }
    }
    let values = (0..n).map(|i| a[i][i]).collect();
    (values, v)
}
