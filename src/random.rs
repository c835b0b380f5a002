use num_traits::{Float, FromPrimitive, ToPrimitive};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::cmp::Ordering;

use crate::dist::{PairDistance, QueryDist, SelfDist, VecSet};
use crate::error::NndError;
use crate::graph::KnnGraph;

/// Run a row builder over `[0, n)`, optionally block-parallel
fn fill_rows<T, F>(
    n: usize,
    parallel: bool,
    block_size: usize,
    grain_size: usize,
    f: F,
) -> Vec<Vec<(usize, T)>>
where
    T: Float + Send + Sync,
    F: Fn(usize) -> Vec<(usize, T)> + Sync,
{
    if !parallel {
        return (0..n).map(f).collect();
    }

    let block = block_size.max(1);
    let mut rows = Vec::with_capacity(n);
    let mut begin = 0;
    while begin < n {
        let end = (begin + block).min(n);
        let mut chunk: Vec<Vec<(usize, T)>> = (begin..end)
            .into_par_iter()
            .with_min_len(grain_size.max(1))
            .map(&f)
            .collect();
        rows.append(&mut chunk);
        begin = end;
    }
    rows
}

fn sort_row_ascending<T: Float>(row: &mut [(usize, T)]) {
    row.sort_unstable_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
}

/// k distinct uniform-random neighbours per point
///
/// The usual seeding for nearest neighbour descent. Draws are seeded per
/// row, so the graph is identical for any worker count.
///
/// ### Params
///
/// * `store` - Ingested data
/// * `k` - Neighbours per point, self excluded
/// * `order_by_distance` - Sort each row ascending by distance
/// * `parallel` / `block_size` / `grain_size` - Worker-pool knobs
/// * `seed` - Seed for the per-row draws
/// * `verbose` - Accepted for surface symmetry; generation is too cheap
///   to report on
///
/// ### Returns
///
/// The random graph, or `NndError::InvalidK`.
#[allow(clippy::too_many_arguments)]
pub fn random_knn_build<T>(
    store: &VecSet<T>,
    k: usize,
    order_by_distance: bool,
    parallel: bool,
    block_size: usize,
    grain_size: usize,
    seed: u64,
    _verbose: bool,
) -> Result<KnnGraph<T>, NndError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
{
    let n = store.n();
    if k == 0 || k + 1 > n {
        return Err(NndError::InvalidK {
            k,
            max: n.saturating_sub(1),
        });
    }

    let dist = SelfDist::new(store);
    let rows = fill_rows(n, parallel, block_size, grain_size, |i| {
        let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(i as u64));
        let mut row: Vec<(usize, T)> = rand::seq::index::sample(&mut rng, n, k + 1)
            .into_iter()
            .filter(|&j| j != i)
            .take(k)
            .map(|j| (j, dist.distance(i, j)))
            .collect();
        if order_by_distance {
            sort_row_ascending(&mut row);
        }
        row
    });

    Ok(KnnGraph::from_rows(rows, k))
}

/// k distinct uniform-random references per query point
///
/// ### Params
///
/// * `reference` / `query` - Ingested collections (same metric and
///   dimensionality)
/// * `k` - References per query point
/// * Remaining knobs as in [`random_knn_build`]
#[allow(clippy::too_many_arguments)]
pub fn random_knn_query<T>(
    reference: &VecSet<T>,
    query: &VecSet<T>,
    k: usize,
    order_by_distance: bool,
    parallel: bool,
    block_size: usize,
    grain_size: usize,
    seed: u64,
    _verbose: bool,
) -> Result<KnnGraph<T>, NndError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
{
    let n_ref = reference.n();
    let n_query = query.n();

    if reference.dim() != query.dim() {
        return Err(NndError::ShapeMismatch {
            expected: reference.dim(),
            got: query.dim(),
        });
    }
    if k == 0 || k > n_ref {
        return Err(NndError::InvalidK { k, max: n_ref });
    }

    let dist = QueryDist::new(reference, query);
    let rows = fill_rows(n_query, parallel, block_size, grain_size, |i| {
        let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(i as u64));
        let mut row: Vec<(usize, T)> = rand::seq::index::sample(&mut rng, n_ref, k)
            .into_iter()
            .map(|j| (j, dist.distance(i, j)))
            .collect();
        if order_by_distance {
            sort_row_ascending(&mut row);
        }
        row
    });

    Ok(KnnGraph::from_rows(rows, k))
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::Dist;
    use crate::heap::NPOS;
    use crate::synthetic::generate_clustered_data;

    fn store(n: usize) -> VecSet<f64> {
        let mat = generate_clustered_data::<f64>(n, 3, 2, 0.5, 9);
        VecSet::from_mat(mat.as_ref(), Dist::Euclidean).unwrap()
    }

    #[test]
    fn test_rows_are_distinct_and_self_free() {
        let store = store(40);
        let graph = random_knn_build(&store, 6, false, false, 4096, 1, 42, false).unwrap();

        for i in 0..40 {
            let mut idx: Vec<usize> = graph.idx_row(i).to_vec();
            assert!(!idx.contains(&i));
            assert!(!idx.contains(&NPOS));
            idx.sort_unstable();
            idx.dedup();
            assert_eq!(idx.len(), 6);
        }
    }

    #[test]
    fn test_order_by_distance() {
        let store = store(40);
        let graph = random_knn_build(&store, 6, true, false, 4096, 1, 42, false).unwrap();

        for i in 0..40 {
            let d = graph.dist_row(i);
            for w in d.windows(2) {
                assert!(w[0] <= w[1]);
            }
        }
    }

    #[test]
    fn test_seeded_runs_are_identical_and_parallel_agrees() {
        let store = store(40);
        let a = random_knn_build(&store, 6, true, false, 4096, 1, 123, false).unwrap();
        let b = random_knn_build(&store, 6, true, false, 4096, 1, 123, false).unwrap();
        let c = random_knn_build(&store, 6, true, true, 8, 2, 123, false).unwrap();

        assert_eq!(a.idx, b.idx);
        assert_eq!(a.idx, c.idx);
    }

    #[test]
    fn test_query_rows_reference_valid_points() {
        let reference = store(30);
        let query = store(10);
        let graph =
            random_knn_query(&reference, &query, 5, true, false, 4096, 1, 5, false).unwrap();

        assert_eq!(graph.n_points, 10);
        for i in 0..10 {
            for &j in graph.idx_row(i) {
                assert!(j < 30);
            }
        }
    }

    #[test]
    fn test_k_bounds() {
        let store = store(10);
        assert!(matches!(
            random_knn_build(&store, 10, false, false, 4096, 1, 1, false),
            Err(NndError::InvalidK { k: 10, max: 9 })
        ));
        assert!(random_knn_build(&store, 9, false, false, 4096, 1, 1, false).is_ok());
    }
}
