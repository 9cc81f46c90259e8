//! Implicit-feedback alternating least squares over the sparse user×item
//! interaction matrix.
//!
//! Confidence follows the standard implicit-ALS form `c = 1 + alpha·w`; each
//! half-step solves an independent regularized normal equation per row via
//! Cholesky, so the factor count stays the only dense dimension.

use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sprs::CsMat;

/// ALS hyperparameters, all configurable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlsParams {
    pub factors: usize,
    pub regularization: f32,
    pub iterations: usize,
    pub alpha: f32,
}

impl Default for AlsParams {
    fn default() -> Self {
        Self {
            factors: 64,
            regularization: 0.1,
            iterations: 50,
            alpha: 40.0,
        }
    }
}

/// Factorized model: one latent row per user and per item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlsModel {
    pub user_factors: Array2<f32>,
    pub item_factors: Array2<f32>,
}

impl AlsModel {
    /// Train on a user×item weight matrix. A fixed seed keeps the
    /// factorization reproducible across retrains on identical data.
    pub fn train(matrix: &CsMat<f32>, params: AlsParams, seed: u64) -> Result<Self> {
        let (n_users, n_items) = (matrix.rows(), matrix.cols());
        anyhow::ensure!(n_users > 0 && n_items > 0, "empty interaction matrix");

        let transposed = matrix.transpose_view().to_csr();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut user_factors = random_factors(&mut rng, n_users, params.factors);
        let mut item_factors = random_factors(&mut rng, n_items, params.factors);

        for _ in 0..params.iterations {
            user_factors = solve_side(matrix, &item_factors, params)
                .context("failed solving user factors")?;
            item_factors = solve_side(&transposed, &user_factors, params)
                .context("failed solving item factors")?;
        }

        Ok(Self {
            user_factors,
            item_factors,
        })
    }

    /// Cosine similarity between two users' latent factors.
    #[must_use]
    pub fn user_cosine_similarity(&self, a: usize, b: usize) -> f32 {
        let row_a = self.user_factors.row(a);
        let row_b = self.user_factors.row(b);
        let norm_a = row_a.dot(&row_a).sqrt();
        let norm_b = row_b.dot(&row_b).sqrt();
        if norm_a <= 0.0 || norm_b <= 0.0 {
            return 0.0;
        }
        row_a.dot(&row_b) / (norm_a * norm_b)
    }
}

fn random_factors(rng: &mut StdRng, rows: usize, factors: usize) -> Array2<f32> {
    let mut m = Array2::<f32>::zeros((rows, factors));
    for value in &mut m {
        *value = rng.random_range(0.0..0.01);
    }
    m
}

/// One ALS half-step: recompute every row factor against the fixed other
/// side. Rows are independent, so they solve in parallel.
fn solve_side(matrix: &CsMat<f32>, fixed: &Array2<f32>, params: AlsParams) -> Result<Array2<f32>> {
    let factors = params.factors;
    let fixed_gram = fixed.t().dot(fixed);

    let solved: Vec<Array1<f32>> = (0..matrix.rows())
        .into_par_iter()
        .map(|row_idx| {
            let mut a = fixed_gram.clone();
            for f in 0..factors {
                a[(f, f)] += params.regularization;
            }
            let mut b = Array1::<f32>::zeros(factors);

            if let Some(row) = matrix.outer_view(row_idx) {
                for (col, &weight) in row.iter() {
                    let confidence = 1.0 + params.alpha * weight;
                    let y = fixed.row(col);
                    // A += (c - 1)·y·yᵀ ; b += c·y
                    for i in 0..factors {
                        let yi = y[i];
                        b[i] += confidence * yi;
                        for j in 0..factors {
                            a[(i, j)] += (confidence - 1.0) * yi * y[j];
                        }
                    }
                }
            }

            cholesky_solve(&a, &b)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut out = Array2::<f32>::zeros((matrix.rows(), factors));
    for (row_idx, row) in solved.into_iter().enumerate() {
        out.row_mut(row_idx).assign(&row);
    }
    Ok(out)
}

/// Solve `A·x = b` for symmetric positive-definite `A` via Cholesky.
fn cholesky_solve(a: &Array2<f32>, b: &Array1<f32>) -> Result<Array1<f32>> {
    let n = a.nrows();
    let mut l = Array2::<f32>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[(i, j)];
            for k in 0..j {
                sum -= l[(i, k)] * l[(j, k)];
            }
            if i == j {
                anyhow::ensure!(sum > 0.0, "matrix is not positive definite");
                l[(i, i)] = sum.sqrt();
            } else {
                l[(i, j)] = sum / l[(j, j)];
            }
        }
    }

    // Forward then backward substitution.
    let mut y = Array1::<f32>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[(i, k)] * y[k];
        }
        y[i] = sum / l[(i, i)];
    }
    let mut x = Array1::<f32>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[(k, i)] * x[k];
        }
        x[i] = sum / l[(i, i)];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    fn small_matrix() -> CsMat<f32> {
        // Users 0,1 share items; user 2 is disjoint.
        let mut tri = TriMat::new((3, 4));
        tri.add_triplet(0, 0, 3.0);
        tri.add_triplet(0, 1, 3.0);
        tri.add_triplet(1, 0, 3.0);
        tri.add_triplet(1, 1, 3.0);
        tri.add_triplet(2, 2, 3.0);
        tri.add_triplet(2, 3, 3.0);
        tri.to_csr()
    }

    #[test]
    fn cholesky_solves_identity() {
        let a = Array2::eye(3);
        let b = ndarray::arr1(&[1.0, 2.0, 3.0]);
        let x = cholesky_solve(&a, &b).unwrap();
        for i in 0..3 {
            assert!((x[i] - b[i]).abs() < 1e-5);
        }
    }

    #[test]
    fn training_shapes_match_matrix() {
        let params = AlsParams {
            factors: 8,
            iterations: 5,
            ..AlsParams::default()
        };
        let model = AlsModel::train(&small_matrix(), params, 42).unwrap();
        assert_eq!(model.user_factors.dim(), (3, 8));
        assert_eq!(model.item_factors.dim(), (4, 8));
    }

    #[test]
    fn co_consuming_users_are_more_similar_than_disjoint_ones() {
        let params = AlsParams {
            factors: 8,
            iterations: 15,
            ..AlsParams::default()
        };
        let model = AlsModel::train(&small_matrix(), params, 42).unwrap();
        let same_taste = model.user_cosine_similarity(0, 1);
        let different_taste = model.user_cosine_similarity(0, 2);
        assert!(
            same_taste > different_taste,
            "expected {same_taste} > {different_taste}"
        );
    }

    #[test]
    fn empty_matrix_is_an_error() {
        let tri: TriMat<f32> = TriMat::new((0, 0));
        assert!(AlsModel::train(&tri.to_csr(), AlsParams::default(), 42).is_err());
    }
}
