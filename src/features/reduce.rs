//! Linear dimensionality reduction for the concatenated sparse feature
//! blocks: a randomized truncated SVD fitted on the sample matrix, applied
//! row-by-row at transform time.
//!
//! The factorization uses the standard randomized range finder (two power
//! iterations with re-orthonormalization) followed by an exact eigensolve of
//! the small `B·Bᵀ` Gram matrix, so only `O(rows × l)` dense state is held
//! for `l = k + oversample` columns.

use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use super::SparseVec;

const OVERSAMPLE: usize = 8;
const POWER_ITERATIONS: usize = 2;

/// Fitted truncated SVD. `components` holds `Vᵀ` with one row per retained
/// singular direction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TruncatedSvd {
    components: Array2<f32>,
}

impl TruncatedSvd {
    /// Number of retained components (rank), at most the requested width.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.components.nrows()
    }

    /// Fit on sparse sample rows of width `n_features`, retaining at most
    /// `n_components` directions. A fixed seed keeps refits deterministic.
    #[must_use]
    pub fn fit(
        rows: &[SparseVec],
        n_features: usize,
        n_components: usize,
        seed: u64,
    ) -> Self {
        let n_rows = rows.len();
        let k = n_components.min(n_rows).min(n_features);
        if k == 0 {
            return Self::default();
        }
        let l = (k + OVERSAMPLE).min(n_rows).min(n_features);

        let mut rng = StdRng::seed_from_u64(seed);
        let mut omega = Array2::<f32>::zeros((n_features, l));
        for value in &mut omega {
            *value = rng.random_range(-1.0..1.0);
        }

        // Range finder: Y = X·Ω, refined by power iterations.
        let mut y = sparse_dot_dense(rows, &omega, n_rows);
        for _ in 0..POWER_ITERATIONS {
            orthonormalize_columns(&mut y);
            let mut z = sparse_t_dot_dense(rows, &y, n_features);
            orthonormalize_columns(&mut z);
            y = sparse_dot_dense(rows, &z, n_rows);
        }
        orthonormalize_columns(&mut y);
        let q = y;

        // B = Qᵀ·X, small enough for an exact eigensolve of B·Bᵀ.
        let b = dense_t_dot_sparse(&q, rows, n_features);
        let gram = b.dot(&b.t());
        let (eigenvalues, eigenvectors) = jacobi_eigh(gram);

        let mut components = Array2::<f32>::zeros((k, n_features));
        for c in 0..k {
            let sigma = eigenvalues[c].max(0.0).sqrt();
            if sigma <= 1e-7 {
                continue;
            }
            // vᵀ_c = uᵀ_c · B / σ_c
            for j in 0..n_features {
                let mut acc = 0.0;
                for r in 0..b.nrows() {
                    acc += eigenvectors[(r, c)] * b[(r, j)];
                }
                components[(c, j)] = acc / sigma;
            }
        }

        Self { components }
    }

    /// Project one sparse row onto the retained components.
    #[must_use]
    pub fn transform(&self, row: &SparseVec) -> Array1<f32> {
        let mut out = Array1::<f32>::zeros(self.rank());
        for &(j, v) in row {
            if j < self.components.ncols() {
                for c in 0..self.rank() {
                    out[c] += v * self.components[(c, j)];
                }
            }
        }
        out
    }
}

fn sparse_dot_dense(rows: &[SparseVec], dense: &Array2<f32>, n_rows: usize) -> Array2<f32> {
    let l = dense.ncols();
    let mut out = Array2::<f32>::zeros((n_rows, l));
    for (i, row) in rows.iter().enumerate() {
        for &(j, v) in row {
            for c in 0..l {
                out[(i, c)] += v * dense[(j, c)];
            }
        }
    }
    out
}

fn sparse_t_dot_dense(rows: &[SparseVec], dense: &Array2<f32>, n_features: usize) -> Array2<f32> {
    let l = dense.ncols();
    let mut out = Array2::<f32>::zeros((n_features, l));
    for (i, row) in rows.iter().enumerate() {
        for &(j, v) in row {
            for c in 0..l {
                out[(j, c)] += v * dense[(i, c)];
            }
        }
    }
    out
}

fn dense_t_dot_sparse(q: &Array2<f32>, rows: &[SparseVec], n_features: usize) -> Array2<f32> {
    let l = q.ncols();
    let mut out = Array2::<f32>::zeros((l, n_features));
    for (i, row) in rows.iter().enumerate() {
        for &(j, v) in row {
            for c in 0..l {
                out[(c, j)] += v * q[(i, c)];
            }
        }
    }
    out
}

/// Modified Gram-Schmidt over the columns of `m`. Near-dependent columns are
/// zeroed instead of amplified.
fn orthonormalize_columns(m: &mut Array2<f32>) {
    let (rows, cols) = m.dim();
    for c in 0..cols {
        for prev in 0..c {
            let mut dot = 0.0;
            for r in 0..rows {
                dot += m[(r, c)] * m[(r, prev)];
            }
            for r in 0..rows {
                m[(r, c)] -= dot * m[(r, prev)];
            }
        }
        let norm: f32 = (0..rows).map(|r| m[(r, c)] * m[(r, c)]).sum::<f32>().sqrt();
        if norm > 1e-7 {
            for r in 0..rows {
                m[(r, c)] /= norm;
            }
        } else {
            for r in 0..rows {
                m[(r, c)] = 0.0;
            }
        }
    }
}

/// Cyclic Jacobi eigendecomposition of a small symmetric matrix. Returns
/// eigenvalues and eigenvectors sorted descending.
fn jacobi_eigh(mut a: Array2<f32>) -> (Array1<f32>, Array2<f32>) {
    let n = a.nrows();
    let mut v = Array2::<f32>::eye(n);

    for _ in 0..100 {
        let mut off_diagonal = 0.0f32;
        for p in 0..n {
            for q in (p + 1)..n {
                off_diagonal += a[(p, q)] * a[(p, q)];
            }
        }
        if off_diagonal.sqrt() < 1e-9 {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                if a[(p, q)].abs() < 1e-12 {
                    continue;
                }
                let theta = (a[(q, q)] - a[(p, p)]) / (2.0 * a[(p, q)]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for i in 0..n {
                    let aip = a[(i, p)];
                    let aiq = a[(i, q)];
                    a[(i, p)] = c * aip - s * aiq;
                    a[(i, q)] = s * aip + c * aiq;
                }
                for j in 0..n {
                    let apj = a[(p, j)];
                    let aqj = a[(q, j)];
                    a[(p, j)] = c * apj - s * aqj;
                    a[(q, j)] = s * apj + c * aqj;
                }
                for i in 0..n {
                    let vip = v[(i, p)];
                    let viq = v[(i, q)];
                    v[(i, p)] = c * vip - s * viq;
                    v[(i, q)] = s * vip + c * viq;
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&x, &y| a[(y, y)].total_cmp(&a[(x, x)]));

    let eigenvalues = Array1::from_iter(order.iter().map(|&i| a[(i, i)]));
    let mut eigenvectors = Array2::<f32>::zeros((n, n));
    for (dst, &src) in order.iter().enumerate() {
        for r in 0..n {
            eigenvectors[(r, dst)] = v[(r, src)];
        }
    }
    (eigenvalues, eigenvectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense_to_sparse(rows: &[Vec<f32>]) -> Vec<SparseVec> {
        rows.iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(_, v)| **v != 0.0)
                    .map(|(j, v)| (j, *v))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn jacobi_recovers_diagonal_eigenvalues() {
        let mut m = Array2::<f32>::zeros((3, 3));
        m[(0, 0)] = 3.0;
        m[(1, 1)] = 1.0;
        m[(2, 2)] = 2.0;
        let (values, _) = jacobi_eigh(m);
        assert!((values[0] - 3.0).abs() < 1e-5);
        assert!((values[1] - 2.0).abs() < 1e-5);
        assert!((values[2] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn fit_is_deterministic_for_fixed_seed() {
        let rows = dense_to_sparse(&[
            vec![1.0, 0.0, 2.0, 0.0],
            vec![0.0, 1.0, 0.0, 3.0],
            vec![2.0, 0.0, 4.0, 0.0],
        ]);
        let a = TruncatedSvd::fit(&rows, 4, 2, 42);
        let b = TruncatedSvd::fit(&rows, 4, 2, 42);
        assert_eq!(a.components, b.components);
    }

    #[test]
    fn rank_is_capped_by_rows_and_features() {
        let rows = dense_to_sparse(&[vec![1.0, 2.0, 0.0]]);
        let svd = TruncatedSvd::fit(&rows, 3, 256, 42);
        assert_eq!(svd.rank(), 1);
    }

    #[test]
    fn projection_preserves_dominant_direction() {
        // Rows are multiples of one direction; a rank-1 projection must keep
        // their relative magnitudes.
        let rows = dense_to_sparse(&[
            vec![1.0, 1.0, 0.0],
            vec![2.0, 2.0, 0.0],
            vec![3.0, 3.0, 0.0],
        ]);
        let svd = TruncatedSvd::fit(&rows, 3, 2, 42);
        let p1 = svd.transform(&rows[0]);
        let p3 = svd.transform(&rows[2]);
        assert!((p3[0] / p1[0] - 3.0).abs() < 1e-3);
    }
}
