#![allow(clippy::needless_range_loop)]

pub mod brute_force;
pub mod candidates;
pub mod dist;
pub mod error;
pub mod graph;
pub mod heap;
pub mod merge;
pub mod nndescent;
pub mod parallel;
pub mod prune;
pub mod query;
pub mod random;
pub mod synthetic;
pub mod update;

use faer::MatRef;
use num_traits::{Float, FromPrimitive, ToPrimitive};
use std::sync::atomic::AtomicBool;

pub use crate::candidates::CandidateSampling;
pub use crate::dist::{parse_metric, Dist, VecSet};
pub use crate::error::NndError;
pub use crate::graph::{recall, KnnGraph};
pub use crate::heap::{NeighborHeap, NPOS};
pub use crate::merge::{merge_all_graphs, merge_graphs};
pub use crate::nndescent::{NndParams, NndResult};
pub use crate::prune::degree_prune;

/////////////////
// Brute force //
/////////////////

/// Exact k-NN graph over a data matrix
///
/// Ground truth by full scan; O(n^2) distance evaluations.
///
/// ### Params
///
/// * `data` - The data matrix. Rows represent the samples, columns the
///   embedding dimensions.
/// * `k` - Number of neighbours per point, self excluded
/// * `metric` - One of `"euclidean"`, `"l2"`, `"cosine"`, `"manhattan"`,
///   `"hamming"`
/// * `parallel` - Scan rows on the worker pool
/// * `grain_size` - Rows per worker chunk
/// * `verbose` - Print progress
///
/// ### Returns
///
/// The exact graph, rows sorted ascending by distance.
pub fn brute_force_knn<T>(
    data: MatRef<T>,
    k: usize,
    metric: &str,
    parallel: bool,
    grain_size: usize,
    verbose: bool,
) -> Result<KnnGraph<T>, NndError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
{
    let metric = parse_metric(metric)?;
    let store = VecSet::from_mat(data, metric)?;
    brute_force::brute_force_build(&store, k, parallel, grain_size, verbose)
}

/// Exact query k-NN against a reference matrix
///
/// ### Params
///
/// * `reference` - The reference matrix (samples x features)
/// * `query` - The query matrix (samples x features)
/// * Remaining parameters as in [`brute_force_knn`]
///
/// ### Returns
///
/// Each query's exact `k` nearest references.
pub fn brute_force_knn_query<T>(
    reference: MatRef<T>,
    query: MatRef<T>,
    k: usize,
    metric: &str,
    parallel: bool,
    grain_size: usize,
    verbose: bool,
) -> Result<KnnGraph<T>, NndError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
{
    let metric = parse_metric(metric)?;
    let reference = VecSet::from_mat(reference, metric)?;
    let query = VecSet::from_mat(query, metric)?;
    brute_force::brute_force_query(&reference, &query, k, parallel, grain_size, verbose)
}

////////////////
// Random kNN //
////////////////

/// k distinct uniform-random neighbours per point
///
/// The usual initialisation for [`nnd_knn`].
///
/// ### Params
///
/// * `data` - The data matrix (samples x features)
/// * `k` - Number of neighbours per point, self excluded
/// * `metric` - Distance metric name
/// * `order_by_distance` - Sort each row ascending by distance
/// * `parallel` / `block_size` / `grain_size` - Worker-pool knobs
/// * `seed` - Seed for the per-row draws
/// * `verbose` - Print progress
///
/// ### Returns
///
/// The random graph.
#[allow(clippy::too_many_arguments)]
pub fn random_knn<T>(
    data: MatRef<T>,
    k: usize,
    metric: &str,
    order_by_distance: bool,
    parallel: bool,
    block_size: usize,
    grain_size: usize,
    seed: u64,
    verbose: bool,
) -> Result<KnnGraph<T>, NndError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
{
    let metric = parse_metric(metric)?;
    let store = VecSet::from_mat(data, metric)?;
    random::random_knn_build(
        &store,
        k,
        order_by_distance,
        parallel,
        block_size,
        grain_size,
        seed,
        verbose,
    )
}

/// k distinct uniform-random references per query point
///
/// ### Params
///
/// As [`random_knn`], over a reference/query matrix pair.
#[allow(clippy::too_many_arguments)]
pub fn random_knn_query<T>(
    reference: MatRef<T>,
    query: MatRef<T>,
    k: usize,
    metric: &str,
    order_by_distance: bool,
    parallel: bool,
    block_size: usize,
    grain_size: usize,
    seed: u64,
    verbose: bool,
) -> Result<KnnGraph<T>, NndError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
{
    let metric = parse_metric(metric)?;
    let reference = VecSet::from_mat(reference, metric)?;
    let query = VecSet::from_mat(query, metric)?;
    random::random_knn_query(
        &reference,
        &query,
        k,
        order_by_distance,
        parallel,
        block_size,
        grain_size,
        seed,
        verbose,
    )
}

////////////////
// NN-Descent //
////////////////

/// Build an approximate k-NN graph by nearest neighbour descent
///
/// ### Params
///
/// * `data` - The data matrix. Rows represent the samples, columns the
///   embedding dimensions.
/// * `k` - Number of neighbours per point
/// * `metric` - Distance metric name
/// * `init` - Optional initial graph with `k`-wide rows; a seeded random
///   graph is generated when absent
/// * `params` - Descent parameters
/// * `interrupt` - Optional host abort flag; an interrupted run returns
///   the best graph so far with `converged = false`
///
/// ### Returns
///
/// The refined graph plus convergence information.
pub fn nnd_knn<T>(
    data: MatRef<T>,
    k: usize,
    metric: &str,
    init: Option<&KnnGraph<T>>,
    params: &NndParams,
    interrupt: Option<&AtomicBool>,
) -> Result<NndResult<T>, NndError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
{
    let metric = parse_metric(metric)?;
    let store = VecSet::from_mat(data, metric)?;

    match init {
        Some(graph) => {
            if graph.n_nbrs != k {
                return Err(NndError::ShapeMismatch {
                    expected: k,
                    got: graph.n_nbrs,
                });
            }
            nndescent::nnd_build(&store, graph, params, interrupt)
        }
        None => {
            let init = random::random_knn_build(
                &store,
                k,
                false,
                params.parallel,
                params.block_size,
                params.grain_size,
                params.seed,
                params.verbose,
            )?;
            nndescent::nnd_build(&store, &init, params, interrupt)
        }
    }
}

/// Query a reference k-NN graph by nearest neighbour descent
///
/// ### Params
///
/// * `reference` / `query` - Reference and query matrices (same metric
///   and dimensionality)
/// * `reference_knn` - k-NN graph over the references
/// * `k` - Number of references to return per query
/// * `metric` - Distance metric name
/// * `init` - Optional initial query graph; seeded random references are
///   drawn when absent
/// * `params` / `interrupt` - As in [`nnd_knn`]
///
/// ### Returns
///
/// Each query's approximate `k` nearest references.
#[allow(clippy::too_many_arguments)]
pub fn nnd_knn_query<T>(
    reference: MatRef<T>,
    query: MatRef<T>,
    reference_knn: &KnnGraph<T>,
    k: usize,
    metric: &str,
    init: Option<&KnnGraph<T>>,
    params: &NndParams,
    interrupt: Option<&AtomicBool>,
) -> Result<NndResult<T>, NndError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
{
    let metric = parse_metric(metric)?;
    let reference = VecSet::from_mat(reference, metric)?;
    let query_store = VecSet::from_mat(query, metric)?;

    let init_graph;
    let init = match init {
        Some(graph) => {
            if graph.n_nbrs != k {
                return Err(NndError::ShapeMismatch {
                    expected: k,
                    got: graph.n_nbrs,
                });
            }
            graph
        }
        None => {
            init_graph = random::random_knn_query(
                &reference,
                &query_store,
                k,
                false,
                params.parallel,
                params.block_size,
                params.grain_size,
                params.seed,
                params.verbose,
            )?;
            &init_graph
        }
    };

    query::nnd_query(&reference, &query_store, reference_knn, init, params, interrupt)
}

/////////////
// Pruning //
/////////////

/// Occlusion-prune the long edges of a k-NN graph
///
/// ### Params
///
/// * `data` - The data matrix the graph was built over
/// * `graph` - The graph to diversify
/// * `metric` - Distance metric name
/// * `prune_probability` - Bernoulli chance of dropping an occluded edge,
///   in `(0, 1]`
/// * `seed` - Seed for the per-row draws
///
/// ### Returns
///
/// Per-row `(neighbour, distance)` lists of retained edges.
pub fn diversify<T>(
    data: MatRef<T>,
    graph: &KnnGraph<T>,
    metric: &str,
    prune_probability: f64,
    seed: u64,
) -> Result<Vec<Vec<(usize, T)>>, NndError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
{
    let metric = parse_metric(metric)?;
    let store = VecSet::from_mat(data, metric)?;
    prune::diversify(&store, graph, prune_probability, seed)
}

///////////
// Tests //
///////////
