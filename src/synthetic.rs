use faer::traits::ComplexField;
use faer::Mat;
use num_traits::{Float, FromPrimitive};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Generate synthetic data with cluster structure
///
/// Cluster centres sit on random unit directions pushed out to a common
/// radius from the origin, so they are pairwise separated without any
/// dependence on the dimensionality. Each point picks a cluster uniformly
/// at random and scatters around its centre with Gaussian noise. Handy
/// for recall experiments where the true neighbour structure is
/// non-trivial.
///
/// ### Params
///
/// * `n_samples` - Number of points
/// * `dim` - Embedding dimensionality
/// * `n_clusters` - Number of distinct clusters
/// * `cluster_std` - Standard deviation within clusters
/// * `seed` - Random seed for reproducibility
///
/// ### Returns
///
/// Matrix of shape (n_samples, dim)
pub fn generate_clustered_data<T>(
    n_samples: usize,
    dim: usize,
    n_clusters: usize,
    cluster_std: f64,
    seed: u64,
) -> Mat<T>
where
    T: Float + FromPrimitive + ComplexField,
{
    const CENTRE_RADIUS: f64 = 8.0;

    let mut rng = StdRng::seed_from_u64(seed);

    let centres: Vec<Vec<f64>> = (0..n_clusters)
        .map(|_| {
            let direction: Vec<f64> = (0..dim).map(|_| rng.sample(StandardNormal)).collect();
            let norm = direction
                .iter()
                .map(|v| v * v)
                .sum::<f64>()
                .sqrt()
                .max(f64::EPSILON);
            direction
                .into_iter()
                .map(|v| v * CENTRE_RADIUS / norm)
                .collect()
        })
        .collect();

    let labels: Vec<usize> = (0..n_samples)
        .map(|_| rng.random_range(0..n_clusters))
        .collect();

    let mut data = Mat::<T>::zeros(n_samples, dim);
    for (i, &label) in labels.iter().enumerate() {
        for j in 0..dim {
            let noise: f64 = rng.sample(StandardNormal);
            data[(i, j)] = T::from_f64(centres[label][j] + noise * cluster_std).unwrap();
        }
    }

    data
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_and_reproducibility() {
        let a = generate_clustered_data::<f32>(50, 4, 3, 0.5, 7);
        let b = generate_clustered_data::<f32>(50, 4, 3, 0.5, 7);

        assert_eq!(a.nrows(), 50);
        assert_eq!(a.ncols(), 4);
        for i in 0..50 {
            for j in 0..4 {
                assert_eq!(a[(i, j)], b[(i, j)]);
            }
        }
    }

    #[test]
    fn test_values_are_finite() {
        let data = generate_clustered_data::<f64>(100, 3, 4, 1.0, 11);
        for i in 0..100 {
            for j in 0..3 {
                assert!(data[(i, j)].is_finite());
            }
        }
    }

    #[test]
    fn test_points_stay_near_a_centre() {
        // tight noise keeps every point close to the centre radius
        let data = generate_clustered_data::<f64>(200, 5, 4, 0.1, 3);
        for i in 0..200 {
            let norm: f64 = (0..5).map(|j| data[(i, j)] * data[(i, j)]).sum::<f64>().sqrt();
            assert!((norm - 8.0).abs() < 2.0, "point {i} at radius {norm}");
        }
    }
}
