use ndarray::{Array2, ArrayView1};
use rand::seq::index::sample;
use rand::{SeedableRng, rngs::StdRng};

/// Simple K-Means clustering over the rows of a dense matrix, used to train
/// the IVF coarse quantizer. Seeded so index builds are reproducible.
pub(crate) struct KMeans {
    pub(crate) centroids: Array2<f32>,
}

impl KMeans {
    /// Runs K-Means clustering.
    ///
    /// # Arguments
    /// * `data` - Row-major matrix of data points.
    /// * `k` - Number of clusters.
    /// * `max_iterations` - Maximum number of iterations.
    pub(crate) fn new(data: &Array2<f32>, k: usize, max_iterations: usize, seed: u64) -> Self {
        let n = data.nrows();
        let dim = data.ncols();
        if n == 0 || k == 0 {
            return Self {
                centroids: Array2::zeros((0, dim)),
            };
        }

        let k = k.min(n);
        let mut rng = StdRng::seed_from_u64(seed);

        // Initialize centroids from distinct random rows
        let mut centroids = Array2::<f32>::zeros((k, dim));
        for (c, row_idx) in sample(&mut rng, n, k).into_iter().enumerate() {
            centroids.row_mut(c).assign(&data.row(row_idx));
        }

        let mut assignments = vec![0usize; n];
        let mut changes = true;
        let mut iterations = 0;

        while changes && iterations < max_iterations {
            changes = false;
            iterations += 1;

            // E-step: assign points to nearest centroid
            for (i, point) in data.rows().into_iter().enumerate() {
                let mut min_dist_sq = f32::MAX;
                let mut best_cluster = 0;
                for (j, centroid) in centroids.rows().into_iter().enumerate() {
                    let dist_sq = distance_sq(&point, &centroid);
                    if dist_sq < min_dist_sq {
                        min_dist_sq = dist_sq;
                        best_cluster = j;
                    }
                }
                if assignments[i] != best_cluster {
                    assignments[i] = best_cluster;
                    changes = true;
                }
            }

            // M-step: update centroids
            let mut sums = Array2::<f32>::zeros((k, dim));
            let mut counts = vec![0usize; k];
            for (i, &cluster) in assignments.iter().enumerate() {
                let mut sum_row = sums.row_mut(cluster);
                sum_row += &data.row(i);
                counts[cluster] += 1;
            }
            for j in 0..k {
                if counts[j] > 0 {
                    let mut centroid = centroids.row_mut(j);
                    centroid.assign(&sums.row(j));
                    centroid /= counts[j] as f32;
                }
                // Empty clusters keep their previous centroid
            }
        }

        Self { centroids }
    }
}

fn distance_sq(a: &ArrayView1<f32>, b: &ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_two_obvious_clusters() {
        let data = ndarray::arr2(&[
            [0.0, 0.0],
            [0.1, 0.0],
            [0.0, 0.1],
            [5.0, 5.0],
            [5.1, 5.0],
            [5.0, 5.1],
        ]);
        let kmeans = KMeans::new(&data, 2, 50, 42);
        assert_eq!(kmeans.centroids.nrows(), 2);
        let mut mean_coords: Vec<f32> = kmeans
            .centroids
            .rows()
            .into_iter()
            .map(|c| c.sum() / 2.0)
            .collect();
        mean_coords.sort_by(f32::total_cmp);
        assert!(mean_coords[0] < 1.0);
        assert!(mean_coords[1] > 4.0);
    }

    #[test]
    fn k_is_capped_by_point_count() {
        let data = ndarray::arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        let kmeans = KMeans::new(&data, 10, 10, 42);
        assert_eq!(kmeans.centroids.nrows(), 2);
    }
}
