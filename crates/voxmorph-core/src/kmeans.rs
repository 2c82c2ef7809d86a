//! K-means clustering over entry feature rows.
//!
//! Backs the cluster-mapping outlier eliminator: source and target feature
//! spaces are partitioned independently and the two assignments compared.
//! Initialisation uses a seeded linear congruential generator, so a given
//! `(data, config)` always produces the same clustering, and elimination
//! results are reproducible run to run.

use serde::{Deserialize, Serialize};

use crate::distance::euclidean;
use crate::types::FeatureVector;

/// K-means training parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KMeansConfig {
    /// Number of clusters; capped at the number of data rows.
    pub num_clusters: usize,
    /// Maximum Lloyd iterations.
    pub max_iterations: usize,
    /// Seed for deterministic centroid initialisation.
    pub seed: u64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            num_clusters: 30,
            max_iterations: 200,
            seed: 0x5EED,
        }
    }
}

/// A trained clustering with the statistics the eliminator thresholds on.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansModel {
    /// Cluster mean vectors.
    pub centroids: Vec<FeatureVector>,
    /// Cluster index of each input row, in input order.
    pub assignments: Vec<usize>,
    /// Diagonal variance of each cluster's members. Clusters with fewer
    /// than two members fall back to the global variance.
    pub cluster_variances: Vec<FeatureVector>,
    /// Diagonal variance over all input rows.
    pub global_variances: FeatureVector,
}

impl KMeansModel {
    /// Index of the centroid nearest to `point`.
    pub fn nearest(&self, point: &[f64]) -> usize {
        let mut best = 0;
        let mut best_dist = f64::MAX;
        for (i, c) in self.centroids.iter().enumerate() {
            let d = euclidean(point, c);
            if d < best_dist {
                best_dist = d;
                best = i;
            }
        }
        best
    }

    pub fn num_clusters(&self) -> usize {
        self.centroids.len()
    }
}

/// Train a clustering on the given rows. Lloyd's algorithm with
/// deterministic LCG-seeded initialisation.
///
/// # Panics
/// Panics if `data` is empty or rows have inconsistent lengths.
pub fn train(data: &[FeatureVector], config: &KMeansConfig) -> KMeansModel {
    assert!(!data.is_empty(), "k-means training data must not be empty");
    let dim = data[0].len();
    for (i, row) in data.iter().enumerate() {
        assert_eq!(row.len(), dim, "row {i} has inconsistent dimension");
    }
    let k = config.num_clusters.max(1).min(data.len());

    // Deterministic seeded pick of initial centroids.
    let mut centroids: Vec<FeatureVector> = Vec::with_capacity(k);
    let mut rng_state = config.seed;
    for i in 0..k {
        rng_state = rng_state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let idx = ((rng_state >> 33) as usize + i * data.len() / k) % data.len();
        centroids.push(data[idx].clone());
    }

    let mut assignments = vec![0usize; data.len()];
    for _iter in 0..config.max_iterations {
        let mut changed = false;
        for (i, point) in data.iter().enumerate() {
            let mut best = 0;
            let mut best_dist = f64::MAX;
            for (j, centroid) in centroids.iter().enumerate() {
                let dist: f64 = point
                    .iter()
                    .zip(centroid)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                if dist < best_dist {
                    best_dist = dist;
                    best = j;
                }
            }
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }

        if !changed {
            break;
        }

        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, point) in data.iter().enumerate() {
            let c = assignments[i];
            counts[c] += 1;
            for (d, val) in point.iter().enumerate() {
                sums[c][d] += val;
            }
        }
        for j in 0..k {
            if counts[j] > 0 {
                for d in 0..dim {
                    centroids[j][d] = sums[j][d] / counts[j] as f64;
                }
            }
        }
    }

    let global_variances = column_variances(data, dim);
    let cluster_variances = (0..k)
        .map(|j| {
            let members: Vec<FeatureVector> = data
                .iter()
                .zip(&assignments)
                .filter(|(_, &a)| a == j)
                .map(|(row, _)| row.clone())
                .collect();
            if members.len() < 2 {
                global_variances.clone()
            } else {
                column_variances(&members, dim)
            }
        })
        .collect();

    KMeansModel {
        centroids,
        assignments,
        cluster_variances,
        global_variances,
    }
}

/// Per-dimension population variance of a set of rows.
fn column_variances(rows: &[FeatureVector], dim: usize) -> FeatureVector {
    let n = rows.len() as f64;
    let mut mean = vec![0.0; dim];
    for row in rows {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v;
        }
    }
    for m in mean.iter_mut() {
        *m /= n;
    }
    let mut var = vec![0.0; dim];
    for row in rows {
        for ((v, m), x) in var.iter_mut().zip(&mean).zip(row) {
            let d = x - m;
            *v += d * d;
        }
    }
    for v in var.iter_mut() {
        *v /= n;
    }
    var
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clustered_data() -> Vec<FeatureVector> {
        let centers = [(0.0, 0.0), (10.0, 10.0)];
        let mut data = Vec::new();
        for (cx, cy) in centers {
            for i in 0..10 {
                let offset = i as f64 * 0.05;
                data.push(vec![cx + offset, cy - offset]);
            }
        }
        data
    }

    #[test]
    fn test_two_well_separated_clusters() {
        let model = train(&clustered_data(), &KMeansConfig {
            num_clusters: 2,
            ..Default::default()
        });
        assert_eq!(model.num_clusters(), 2);
        // All points of one blob land in the same cluster.
        let first = model.assignments[0];
        assert!(model.assignments[..10].iter().all(|&a| a == first));
        let second = model.assignments[10];
        assert_ne!(first, second);
        assert!(model.assignments[10..].iter().all(|&a| a == second));
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let data = clustered_data();
        let config = KMeansConfig::default();
        let a = train(&data, &config);
        let b = train(&data, &config);
        assert_eq!(a.assignments, b.assignments);
        assert_eq!(a.centroids, b.centroids);
    }

    #[test]
    fn test_clusters_capped_at_data_len() {
        let data = vec![vec![1.0], vec![2.0]];
        let model = train(&data, &KMeansConfig {
            num_clusters: 10,
            ..Default::default()
        });
        assert!(model.num_clusters() <= 2);
    }

    #[test]
    fn test_nearest() {
        let model = train(&clustered_data(), &KMeansConfig {
            num_clusters: 2,
            ..Default::default()
        });
        let near_origin = model.nearest(&[0.1, 0.1]);
        let near_far = model.nearest(&[9.9, 9.9]);
        assert_ne!(near_origin, near_far);
    }

    #[test]
    fn test_variances_are_per_dimension() {
        let data = vec![vec![0.0, 0.0], vec![2.0, 0.0], vec![4.0, 0.0]];
        let model = train(&data, &KMeansConfig {
            num_clusters: 1,
            ..Default::default()
        });
        assert!(model.global_variances[0] > 0.0);
        assert_eq!(model.global_variances[1], 0.0);
    }
}
