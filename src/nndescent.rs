use num_traits::{Float, FromPrimitive, ToPrimitive};
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thousands::*;

use crate::candidates::*;
use crate::dist::{SelfDist, VecSet};
use crate::error::NndError;
use crate::graph::{graph_to_heap, heap_to_graph, HeapAdd, KnnGraph};
use crate::heap::{NeighborHeap, RowLockedHeap, NPOS};
use crate::parallel::{for_blocks, par_for_blocks};
use crate::update::*;

////////////////
// Parameters //
////////////////

/// Tuning knobs for nearest neighbour descent
///
/// ### Fields
///
/// * `max_candidates` - Candidate-list cap per iteration. Typical values
///   are 50-60; larger explores more pairs per iteration.
/// * `n_iters` - Maximum number of descent iterations.
/// * `delta` - Convergence tolerance: the descent stops once an iteration
///   changes at most `delta * k * n` heap slots.
/// * `sampling` - Candidate priority: uniform-random subsampling or
///   closest-edges-first.
/// * `low_memory` - Serial path only: drop the seen-pair set and rely on
///   the heap's in-row dedup. Less memory, more distance computations.
/// * `parallel` - Use the worker pool with per-row locking.
/// * `block_size` - Rows per super-batch; interrupts are polled between
///   super-batches.
/// * `grain_size` - Rows per worker chunk.
/// * `seed` - Seed for all random draws. Runs with the same seed and
///   inputs are reproducible.
/// * `verbose` - Print per-iteration progress.
#[derive(Clone, Debug)]
pub struct NndParams {
    pub max_candidates: usize,
    pub n_iters: usize,
    pub delta: f64,
    pub sampling: CandidateSampling,
    pub low_memory: bool,
    pub parallel: bool,
    pub block_size: usize,
    pub grain_size: usize,
    pub seed: u64,
    pub verbose: bool,
}

impl Default for NndParams {
    fn default() -> Self {
        Self {
            max_candidates: 50,
            n_iters: 10,
            delta: 0.001,
            sampling: CandidateSampling::Random,
            low_memory: false,
            parallel: false,
            block_size: 16384,
            grain_size: 1,
            seed: 42,
            verbose: false,
        }
    }
}

/// Outcome of a descent run
///
/// `converged` is false when the run stopped on the iteration cap or on a
/// host interrupt; the graph is the best found either way, rows sorted
/// ascending.
#[derive(Clone, Debug)]
pub struct NndResult<T> {
    pub graph: KnnGraph<T>,
    pub converged: bool,
    pub n_iters_run: usize,
}

#[inline]
pub(crate) fn is_converged(n_updates: usize, tol: f64) -> bool {
    n_updates as f64 <= tol
}

////////////////
// Local join //
////////////////

/// Cross-evaluate candidate pairs for rows `begin..end`
///
/// NEW pairs are evaluated once (`k >= j`), NEW x OLD pairs are
/// enumerated fully, OLD x OLD pairs are skipped since both endpoints
/// were pivots in an earlier iteration. Improvements propagate to both
/// endpoints through the updater.
///
/// ### Returns
///
/// The number of heap slots changed.
pub fn local_join<T, U>(
    updater: &mut U,
    new_nbrs: &NeighborHeap<T>,
    old_nbrs: &NeighborHeap<T>,
    begin: usize,
    end: usize,
) -> usize
where
    T: Float + Send + Sync,
    U: GraphUpdater<T>,
{
    let max_candidates = new_nbrs.n_nbrs();
    let mut c = 0;

    for i in begin..end {
        for j in 0..max_candidates {
            let p = new_nbrs.index(i, j);
            if p == NPOS {
                continue;
            }
            for k in j..max_candidates {
                let q = new_nbrs.index(i, k);
                if q == NPOS {
                    continue;
                }
                c += updater.generate_and_apply(p, q);
            }
            for k in 0..max_candidates {
                let q = old_nbrs.index(i, k);
                if q == NPOS {
                    continue;
                }
                c += updater.generate_and_apply(p, q);
            }
        }
    }
    c
}

///////////
// Build //
///////////

/// Refine an initial k-NN graph by nearest neighbour descent
///
/// ### Params
///
/// * `store` - Ingested data
/// * `init` - Initial neighbour graph (random or better); its row width
///   fixes `k`
/// * `params` - Descent parameters
/// * `interrupt` - Optional host abort flag, polled between super-batches
///   and iterations; an interrupted run returns the best graph so far
///
/// ### Returns
///
/// The refined graph with convergence information, or a validation error.
pub fn nnd_build<T>(
    store: &VecSet<T>,
    init: &KnnGraph<T>,
    params: &NndParams,
    interrupt: Option<&AtomicBool>,
) -> Result<NndResult<T>, NndError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
{
    let n = store.n();
    let k = init.n_nbrs;

    if init.n_points != n {
        return Err(NndError::ShapeMismatch {
            expected: n,
            got: init.n_points,
        });
    }
    if k == 0 || k + 1 > n {
        return Err(NndError::InvalidK {
            k,
            max: n.saturating_sub(1),
        });
    }
    init.validate(n)?;

    match params.sampling {
        CandidateSampling::Random => {
            let factory = RandomPriorityFactory { seed: params.seed };
            nnd_build_impl(store, init, params, interrupt, &factory)
        }
        CandidateSampling::Distance => {
            nnd_build_impl(store, init, params, interrupt, &DistancePriorityFactory)
        }
    }
}

fn nnd_build_impl<T, F>(
    store: &VecSet<T>,
    init: &KnnGraph<T>,
    params: &NndParams,
    interrupt: Option<&AtomicBool>,
    factory: &F,
) -> Result<NndResult<T>, NndError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
    F: CandidatePriorityFactory<T>,
{
    let n = store.n();
    let k = init.n_nbrs;
    let dist = SelfDist::new(store);
    let tol = params.delta * k as f64 * n as f64;

    let start = Instant::now();
    if params.verbose {
        println!(
            "Running NN-Descent: {} samples, k={}, max_candidates={}",
            n.separate_with_underscores(),
            k,
            params.max_candidates
        );
    }

    let mut current = NeighborHeap::new(n, k);
    graph_to_heap(&mut current, init, HeapAdd::Symmetric);

    let mut converged = false;
    let mut n_iters_run = 0;
    let mut seen: FxHashSet<(usize, usize)> = FxHashSet::default();

    for iter in 0..params.n_iters {
        n_iters_run = iter + 1;

        let mut new_nbrs = NeighborHeap::new(n, params.max_candidates);
        let mut old_nbrs = NeighborHeap::new(n, params.max_candidates);

        if params.parallel {
            let new_locked = RowLockedHeap::new(new_nbrs);
            let old_locked = RowLockedHeap::new(old_nbrs);
            let (_, was_interrupted) = par_for_blocks(
                n,
                params.block_size,
                params.grain_size,
                interrupt,
                |b, e| {
                    build_candidates_locked(&current, factory, iter, &new_locked, &old_locked, b, e);
                    0
                },
            );
            new_nbrs = new_locked.into_inner();
            old_nbrs = old_locked.into_inner();
            if was_interrupted {
                break;
            }
            flag_retained_new_candidates(&mut current, &new_nbrs, true);
        } else {
            let mut priority = factory.create(iter);
            build_candidates(&current, &mut priority, &mut new_nbrs, &mut old_nbrs, 0, n);
            flag_retained_new_candidates(&mut current, &new_nbrs, false);
        }

        if F::SHOULD_SORT {
            if params.parallel {
                new_nbrs.deheap_sort_parallel();
                old_nbrs.deheap_sort_parallel();
            } else {
                new_nbrs.deheap_sort();
                old_nbrs.deheap_sort();
            }
        }

        let (c, was_interrupted) = if params.parallel {
            let shared = RowLockedHeap::new(current);
            let res = par_for_blocks(
                n,
                params.block_size,
                params.grain_size,
                interrupt,
                |b, e| {
                    let mut updater = LockingGraphUpdater::new(&shared, &dist);
                    local_join(&mut updater, &new_nbrs, &old_nbrs, b, e)
                },
            );
            current = shared.into_inner();
            res
        } else if params.low_memory {
            let mut updater = SerialHeapGraphUpdater::new(&mut current, &dist);
            for_blocks(n, params.block_size, interrupt, |b, e| {
                local_join(&mut updater, &new_nbrs, &old_nbrs, b, e)
            })
        } else {
            let mut updater = BatchGraphUpdater::new(&mut current, &dist, &mut seen);
            for_blocks(n, params.block_size, interrupt, |b, e| {
                local_join(&mut updater, &new_nbrs, &old_nbrs, b, e)
            })
        };

        if params.verbose {
            println!(
                "  Iteration {}: {} updates (rate={:.5})",
                iter + 1,
                c.separate_with_underscores(),
                c as f64 / (k as f64 * n as f64)
            );
        }

        if was_interrupted {
            break;
        }
        if is_converged(c, tol) {
            if params.verbose {
                println!("  Converged after {} iterations", iter + 1);
            }
            converged = true;
            break;
        }
        if interrupt.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            break;
        }
    }

    if params.parallel {
        current.deheap_sort_parallel();
    } else {
        current.deheap_sort();
    }

    if params.verbose {
        println!("Total time: {:.2?}", start.elapsed());
    }

    Ok(NndResult {
        graph: heap_to_graph(&current),
        converged,
        n_iters_run,
    })
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brute_force::brute_force_build;
    use crate::dist::Dist;
    use crate::graph::recall;
    use crate::random::random_knn_build;
    use crate::synthetic::generate_clustered_data;
    use crate::update::BatchGraphUpdater;

    fn clustered_store(n: usize, dim: usize) -> VecSet<f64> {
        let mat = generate_clustered_data::<f64>(n, dim, 3, 0.5, 42);
        VecSet::from_mat(mat.as_ref(), Dist::Euclidean).unwrap()
    }

    #[test]
    fn test_local_join_evaluates_each_new_pair_once() {
        // candidate row 0 holds NEW pivots {1, 2}; rows 1, 2 stay empty
        let store = clustered_store(3, 2);
        let dist = SelfDist::new(&store);

        let mut new_nbrs = NeighborHeap::new(3, 2);
        new_nbrs.checked_push(0, 0.9, 1, 1);
        new_nbrs.checked_push(0, 0.5, 2, 1);
        let old_nbrs = NeighborHeap::new(3, 2);

        let mut current = NeighborHeap::new(3, 3);
        let mut seen = FxHashSet::default();
        let mut updater = BatchGraphUpdater::new(&mut current, &dist, &mut seen);

        let c = local_join(&mut updater, &new_nbrs, &old_nbrs, 0, 3);

        // (1,1) and (2,2) are self pairs; only d(1,2) is computed, and the
        // symmetric insert lands in both empty rows
        assert_eq!(updater.n_pairs(), 1);
        assert_eq!(c, 2);
        assert!(current.contains(1, 2));
        assert!(current.contains(2, 1));
    }

    #[test]
    fn test_trivial_tolerance_halts_after_one_iteration() {
        // with k = n - 1 an iteration can change at most n * (n - 1)
        // slots (each distinct pair is evaluated once and pushes at most
        // twice), so delta = 1 makes tol an absolute ceiling
        let store = clustered_store(20, 4);
        let init = random_knn_build(&store, 19, false, false, 4096, 1, 99, false).unwrap();

        let params = NndParams {
            delta: 1.0,
            n_iters: 10,
            ..NndParams::default()
        };
        let res = nnd_build(&store, &init, &params, None).unwrap();

        assert!(res.converged);
        assert_eq!(res.n_iters_run, 1);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let store = clustered_store(20, 4);
        let init = random_knn_build(&store, 5, false, false, 4096, 1, 7, false).unwrap();

        let bad_k = KnnGraph::from_rows(vec![vec![]; 20], 0);
        assert!(matches!(
            nnd_build(&store, &bad_k, &NndParams::default(), None),
            Err(NndError::InvalidK { .. })
        ));

        let mut bad_idx = init.clone();
        bad_idx.idx[3] = 20;
        assert!(matches!(
            nnd_build(&store, &bad_idx, &NndParams::default(), None),
            Err(NndError::IndexOutOfBounds { index: 20, .. })
        ));

        let short = KnnGraph::from_rows(vec![vec![(0, 0.1_f64)]; 19], 1);
        assert!(matches!(
            nnd_build(&store, &short, &NndParams::default(), None),
            Err(NndError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_descent_reaches_brute_force_recall() {
        let store = clustered_store(150, 5);
        let k = 10;
        let exact = brute_force_build(&store, k, false, 1, false).unwrap();
        let init = random_knn_build(&store, k, false, false, 4096, 1, 42, false).unwrap();

        let params = NndParams {
            n_iters: 20,
            max_candidates: 50,
            ..NndParams::default()
        };
        let res = nnd_build(&store, &init, &params, None).unwrap();

        let r = recall(&res.graph, &exact);
        assert!(r >= 0.9, "recall {r} below 0.9");
    }

    #[test]
    fn test_descent_invariants_hold() {
        let store = clustered_store(80, 4);
        let k = 6;
        let init = random_knn_build(&store, k, false, false, 4096, 1, 11, false).unwrap();
        let res = nnd_build(&store, &init, &NndParams::default(), None).unwrap();

        for i in 0..80 {
            let idx = res.graph.idx_row(i);
            let dist = res.graph.dist_row(i);

            // self-exclusion and uniqueness
            let mut occupied: Vec<usize> =
                idx.iter().copied().filter(|&j| j != NPOS).collect();
            assert!(!occupied.contains(&i));
            occupied.sort_unstable();
            let len = occupied.len();
            occupied.dedup();
            assert_eq!(occupied.len(), len);

            // ascending rows
            for w in dist.windows(2) {
                assert!(w[0] <= w[1] || w[1].is_infinite());
            }
        }
    }

    #[test]
    fn test_parallel_build_reaches_recall_parity() {
        let store = clustered_store(150, 5);
        let k = 10;
        let exact = brute_force_build(&store, k, false, 1, false).unwrap();
        let init = random_knn_build(&store, k, false, false, 4096, 1, 42, false).unwrap();

        let params = NndParams {
            n_iters: 20,
            max_candidates: 50,
            parallel: true,
            block_size: 64,
            grain_size: 8,
            ..NndParams::default()
        };
        let res = nnd_build(&store, &init, &params, None).unwrap();

        let r = recall(&res.graph, &exact);
        assert!(r >= 0.9, "parallel recall {r} below 0.9");
    }

    #[test]
    fn test_low_memory_path_matches_default_recall() {
        let store = clustered_store(100, 4);
        let k = 8;
        let exact = brute_force_build(&store, k, false, 1, false).unwrap();
        let init = random_knn_build(&store, k, false, false, 4096, 1, 5, false).unwrap();

        let params = NndParams {
            n_iters: 15,
            low_memory: true,
            ..NndParams::default()
        };
        let res = nnd_build(&store, &init, &params, None).unwrap();
        assert!(recall(&res.graph, &exact) >= 0.9);
    }

    #[test]
    fn test_distance_sampling_converges_too() {
        let store = clustered_store(100, 4);
        let k = 8;
        let exact = brute_force_build(&store, k, false, 1, false).unwrap();
        let init = random_knn_build(&store, k, false, false, 4096, 1, 5, false).unwrap();

        let params = NndParams {
            n_iters: 15,
            sampling: CandidateSampling::Distance,
            ..NndParams::default()
        };
        let res = nnd_build(&store, &init, &params, None).unwrap();
        assert!(recall(&res.graph, &exact) >= 0.85);
    }

    #[test]
    fn test_preset_interrupt_returns_unconverged_graph() {
        let store = clustered_store(60, 4);
        let init = random_knn_build(&store, 5, false, false, 4096, 1, 3, false).unwrap();

        let flag = AtomicBool::new(true);
        let res = nnd_build(&store, &init, &NndParams::default(), Some(&flag)).unwrap();

        assert!(!res.converged);
        // rows still come back sorted
        for i in 0..60 {
            let d = res.graph.dist_row(i);
            for w in d.windows(2) {
                assert!(w[0] <= w[1] || w[1].is_infinite());
            }
        }
    }
}
