use num_traits::{Float, FromPrimitive, ToPrimitive};
use rayon::prelude::*;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thousands::*;

use crate::dist::{PairDistance, QueryDist, SelfDist, VecSet};
use crate::error::NndError;
use crate::graph::KnnGraph;
use crate::heap::OrderedFloat;

/// Exact top-k scan of one row against `n_targets` candidates
///
/// A bounded max-heap keeps the k smallest distances seen; NaN distances
/// count as infinitely far and are skipped.
fn top_k_scan<T, D>(
    dist: &D,
    i: usize,
    n_targets: usize,
    k: usize,
    skip: Option<usize>,
) -> Vec<(usize, T)>
where
    T: Float + Send + Sync,
    D: PairDistance<T>,
{
    let mut heap: BinaryHeap<(OrderedFloat<T>, usize)> = BinaryHeap::with_capacity(k + 1);

    for j in 0..n_targets {
        if Some(j) == skip {
            continue;
        }
        let d = dist.distance(i, j);
        if d.is_nan() {
            continue;
        }
        if heap.len() < k {
            heap.push((OrderedFloat(d), j));
        } else if d < heap.peek().unwrap().0 .0 {
            heap.pop();
            heap.push((OrderedFloat(d), j));
        }
    }

    let mut results: Vec<_> = heap.into_iter().collect();
    results.sort_unstable_by_key(|&(d, _)| d);
    results
        .into_iter()
        .map(|(OrderedFloat(d), j)| (j, d))
        .collect()
}

/// Exact k-NN graph by full scan (ground truth)
///
/// O(n^2) distance evaluations; prohibitive on large collections but the
/// reference answer everything else is measured against.
///
/// ### Params
///
/// * `store` - Ingested data
/// * `k` - Neighbours per point, self excluded
/// * `parallel` - Scan rows on the worker pool
/// * `grain_size` - Rows per worker chunk
/// * `verbose` - Print progress
///
/// ### Returns
///
/// The exact graph, rows ascending by distance.
pub fn brute_force_build<T>(
    store: &VecSet<T>,
    k: usize,
    parallel: bool,
    grain_size: usize,
    verbose: bool,
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
    let counter = Arc::new(AtomicUsize::new(0));

    let scan_row = |i: usize| {
        let row = top_k_scan(&dist, i, n, k, Some(i));
        if verbose {
            let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
            if count.is_multiple_of(100_000) {
                println!(
                    " Processed {} / {} samples.",
                    count.separate_with_underscores(),
                    n.separate_with_underscores()
                );
            }
        }
        row
    };

    let rows: Vec<Vec<(usize, T)>> = if parallel {
        (0..n)
            .into_par_iter()
            .with_min_len(grain_size.max(1))
            .map(scan_row)
            .collect()
    } else {
        (0..n).map(scan_row).collect()
    };

    Ok(KnnGraph::from_rows(rows, k))
}

/// Exact query k-NN by full scan of the reference collection
///
/// ### Params
///
/// * `reference` / `query` - Ingested collections (same metric and
///   dimensionality)
/// * `k` - Neighbours per query point
/// * `parallel` - Scan query rows on the worker pool
/// * `grain_size` - Rows per worker chunk
/// * `verbose` - Print progress
///
/// ### Returns
///
/// Each query's exact `k` nearest references.
pub fn brute_force_query<T>(
    reference: &VecSet<T>,
    query: &VecSet<T>,
    k: usize,
    parallel: bool,
    grain_size: usize,
    verbose: bool,
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
    let counter = Arc::new(AtomicUsize::new(0));

    let scan_row = |i: usize| {
        let row = top_k_scan(&dist, i, n_ref, k, None);
        if verbose {
            let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
            if count.is_multiple_of(100_000) {
                println!(
                    " Processed {} / {} samples.",
                    count.separate_with_underscores(),
                    n_query.separate_with_underscores()
                );
            }
        }
        row
    };

    let rows: Vec<Vec<(usize, T)>> = if parallel {
        (0..n_query)
            .into_par_iter()
            .with_min_len(grain_size.max(1))
            .map(scan_row)
            .collect()
    } else {
        (0..n_query).map(scan_row).collect()
    };

    Ok(KnnGraph::from_rows(rows, k))
}

///////////
// Tests //
///////////
