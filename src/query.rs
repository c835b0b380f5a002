use num_traits::{Float, FromPrimitive, ToPrimitive};
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thousands::*;

use crate::candidates::*;
use crate::dist::{QueryDist, VecSet};
use crate::error::NndError;
use crate::graph::{graph_to_heap, heap_to_graph, HeapAdd, KnnGraph};
use crate::heap::{NeighborHeap, RowLockedHeap, NPOS};
use crate::nndescent::{is_converged, NndParams, NndResult};
use crate::parallel::{for_blocks, par_for_blocks};
use crate::update::{GraphUpdater, LockingQueryGraphUpdater, QueryGraphUpdater};

/// Neighbour-of-neighbour search for rows `begin..end` of the query set
///
/// For every NEW reference in a query's candidate row, every general
/// neighbour of that reference is tried against the query. A per-query
/// seen set keeps each reference from being measured twice in one pass.
///
/// ### Returns
///
/// The number of heap slots changed.
pub fn non_search_query<T, U>(
    updater: &mut U,
    new_nbrs: &NeighborHeap<T>,
    gn_graph: &NeighborHeap<T>,
    begin: usize,
    end: usize,
) -> usize
where
    T: Float + Send + Sync,
    U: GraphUpdater<T>,
{
    let max_candidates = new_nbrs.n_nbrs();
    let mut c = 0;
    let mut seen: FxHashSet<usize> =
        FxHashSet::with_capacity_and_hasher(max_candidates, Default::default());

    for query_idx in begin..end {
        for j in 0..max_candidates {
            let ref_idx = new_nbrs.index(query_idx, j);
            if ref_idx == NPOS {
                continue;
            }
            for k in 0..gn_graph.n_nbrs() {
                let nbr_ref = gn_graph.index(ref_idx, k);
                if nbr_ref == NPOS || !seen.insert(nbr_ref) {
                    continue;
                }
                c += updater.generate_and_apply(query_idx, nbr_ref);
            }
        }
        seen.clear();
    }
    c
}

/// Query a fixed reference k-NN graph by descent
///
/// The reference graph is read-only: queries have no reverse neighbours,
/// so the general-neighbour heap over the references is built once and the
/// per-iteration step explores it from each query's NEW candidates.
///
/// ### Params
///
/// * `reference` / `query` - Ingested point collections (same metric and
///   dimensionality)
/// * `reference_knn` - k-NN graph over the references
/// * `init` - Initial query neighbour lists (reference indices); its row
///   width fixes `k`
/// * `params` - Descent parameters
/// * `interrupt` - Optional host abort flag
///
/// ### Returns
///
/// Each query's approximate `k` nearest references, or a validation error.
pub fn nnd_query<T>(
    reference: &VecSet<T>,
    query: &VecSet<T>,
    reference_knn: &KnnGraph<T>,
    init: &KnnGraph<T>,
    params: &NndParams,
    interrupt: Option<&AtomicBool>,
) -> Result<NndResult<T>, NndError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
{
    let n_ref = reference.n();
    let n_query = query.n();
    let k = init.n_nbrs;

    if reference.dim() != query.dim() {
        return Err(NndError::ShapeMismatch {
            expected: reference.dim(),
            got: query.dim(),
        });
    }
    if reference_knn.n_points != n_ref {
        return Err(NndError::ShapeMismatch {
            expected: n_ref,
            got: reference_knn.n_points,
        });
    }
    if init.n_points != n_query {
        return Err(NndError::ShapeMismatch {
            expected: n_query,
            got: init.n_points,
        });
    }
    if k == 0 || k > n_ref {
        return Err(NndError::InvalidK { k, max: n_ref });
    }
    reference_knn.validate(n_ref)?;
    init.validate(n_ref)?;

    match params.sampling {
        CandidateSampling::Random => {
            let factory = RandomPriorityFactory { seed: params.seed };
            nnd_query_impl(reference, query, reference_knn, init, params, interrupt, &factory)
        }
        CandidateSampling::Distance => nnd_query_impl(
            reference,
            query,
            reference_knn,
            init,
            params,
            interrupt,
            &DistancePriorityFactory,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn nnd_query_impl<T, F>(
    reference: &VecSet<T>,
    query: &VecSet<T>,
    reference_knn: &KnnGraph<T>,
    init: &KnnGraph<T>,
    params: &NndParams,
    interrupt: Option<&AtomicBool>,
    factory: &F,
) -> Result<NndResult<T>, NndError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
    F: CandidatePriorityFactory<T>,
{
    let n_ref = reference.n();
    let n_query = query.n();
    let k = init.n_nbrs;
    let dist = QueryDist::new(reference, query);
    let tol = params.delta * k as f64 * n_query as f64;

    let start = Instant::now();
    if params.verbose {
        println!(
            "Querying reference k-NN: {} queries against {} references, k={}",
            n_query.separate_with_underscores(),
            n_ref.separate_with_underscores(),
            k
        );
    }

    let mut current = NeighborHeap::new(n_query, k);
    graph_to_heap(&mut current, init, HeapAdd::Query);

    // the reference side never changes, so its candidate neighbourhoods
    // are assembled a single time
    let mut gn_graph = NeighborHeap::new(n_ref, params.max_candidates);
    let mut gn_priority = factory.create(0);
    build_general_nbrs(reference_knn, &mut gn_priority, &mut gn_graph);

    let flag_on_add = params.max_candidates >= k;

    let mut converged = false;
    let mut n_iters_run = 0;

    for iter in 0..params.n_iters {
        n_iters_run = iter + 1;

        let mut new_nbrs = NeighborHeap::new(n_query, params.max_candidates);

        if params.parallel {
            let new_locked = RowLockedHeap::new(new_nbrs);
            let (_, was_interrupted) = par_for_blocks(
                n_query,
                params.block_size,
                params.grain_size,
                interrupt,
                |b, e| {
                    build_query_candidates_locked(&current, factory, iter, &new_locked, b, e);
                    0
                },
            );
            new_nbrs = new_locked.into_inner();
            if was_interrupted {
                break;
            }
            flag_retained_new_candidates(&mut current, &new_nbrs, true);
        } else {
            let mut priority = factory.create(iter);
            build_query_candidates(&mut current, &mut priority, &mut new_nbrs, flag_on_add);
            if !flag_on_add {
                flag_retained_new_candidates(&mut current, &new_nbrs, false);
            }
        }

        if F::SHOULD_SORT {
            if params.parallel {
                new_nbrs.deheap_sort_parallel();
            } else {
                new_nbrs.deheap_sort();
            }
        }

        let (c, was_interrupted) = if params.parallel {
            let shared = RowLockedHeap::new(current);
            let res = par_for_blocks(
                n_query,
                params.block_size,
                params.grain_size,
                interrupt,
                |b, e| {
                    let mut updater = LockingQueryGraphUpdater::new(&shared, &dist);
                    non_search_query(&mut updater, &new_nbrs, &gn_graph, b, e)
                },
            );
            current = shared.into_inner();
            res
        } else {
            let mut updater = QueryGraphUpdater::new(&mut current, &dist);
            for_blocks(n_query, params.block_size, interrupt, |b, e| {
                non_search_query(&mut updater, &new_nbrs, &gn_graph, b, e)
            })
        };

        if params.verbose {
            println!(
                "  Iteration {}: {} updates (rate={:.5})",
                iter + 1,
                c.separate_with_underscores(),
                c as f64 / (k as f64 * n_query as f64)
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
