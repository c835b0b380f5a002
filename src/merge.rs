use num_traits::Float;

use crate::error::NndError;
use crate::graph::{graph_to_heap, graph_to_heap_locked, heap_to_graph, HeapAdd, KnnGraph};
use crate::heap::{NeighborHeap, RowLockedHeap};
use crate::parallel::par_for_blocks;

fn check_source<T>(graph: &KnnGraph<T>, n: usize, is_query: bool) -> Result<(), NndError>
where
    T: Float + Send + Sync,
{
    if graph.n_points != n {
        return Err(NndError::ShapeMismatch {
            expected: n,
            got: graph.n_points,
        });
    }
    // query edges point into a foreign collection; only symmetric merges
    // dereference target rows
    if !is_query {
        graph.validate(n)?;
    }
    Ok(())
}

fn load<T>(
    heap: &mut NeighborHeap<T>,
    graph: &KnnGraph<T>,
    add: HeapAdd,
    parallel: bool,
    block_size: usize,
    grain_size: usize,
) where
    T: Float + Send + Sync,
{
    if parallel {
        let locked = RowLockedHeap::new(std::mem::replace(heap, NeighborHeap::new(0, 0)));
        par_for_blocks(graph.n_points, block_size, grain_size, None, |b, e| {
            graph_to_heap_locked(&locked, graph, add, b, e);
            0
        });
        *heap = locked.into_inner();
    } else {
        graph_to_heap(heap, graph, add);
    }
}

/// Set-union merge of two k-NN graphs
///
/// Edges of both graphs flow through one bounded heap per row, so each
/// row keeps the `k` best of the union; duplicated `(src, dst)` pairs are
/// inserted once. Symmetric merges also propagate reverse edges.
///
/// ### Params
///
/// * `g1` / `g2` - Graphs over the same point collection (equal row
///   counts; `g1` fixes the output width)
/// * `is_query` - Unidirectional insert for query graphs
/// * `parallel` / `block_size` / `grain_size` - Worker-pool knobs
/// * `verbose` - Print progress
///
/// ### Returns
///
/// The merged graph, rows ascending by distance.
pub fn merge_graphs<T>(
    g1: &KnnGraph<T>,
    g2: &KnnGraph<T>,
    is_query: bool,
    parallel: bool,
    block_size: usize,
    grain_size: usize,
    verbose: bool,
) -> Result<KnnGraph<T>, NndError>
where
    T: Float + Send + Sync,
{
    let n = g1.n_points;
    let k = g1.n_nbrs;
    check_source(g1, n, is_query)?;
    check_source(g2, n, is_query)?;

    if verbose {
        println!("Merging graphs");
    }

    let add = if is_query {
        HeapAdd::Query
    } else {
        HeapAdd::Symmetric
    };

    let mut heap = NeighborHeap::new(n, k);
    load(&mut heap, g1, add, parallel, block_size, grain_size);
    load(&mut heap, g2, add, parallel, block_size, grain_size);

    if parallel {
        heap.deheap_sort_parallel();
    } else {
        heap.deheap_sort();
    }
    Ok(heap_to_graph(&heap))
}

/// Merge a non-empty list of k-NN graphs
///
/// ### Params
///
/// As [`merge_graphs`], folding over `graphs` in order.
pub fn merge_all_graphs<T>(
    graphs: &[KnnGraph<T>],
    is_query: bool,
    parallel: bool,
    block_size: usize,
    grain_size: usize,
    verbose: bool,
) -> Result<KnnGraph<T>, NndError>
where
    T: Float + Send + Sync,
{
    let first = graphs.first().ok_or(NndError::EmptyMergeList)?;
    let n = first.n_points;
    let k = first.n_nbrs;
    for graph in graphs {
        check_source(graph, n, is_query)?;
    }

    if verbose {
        println!("Merging {} graphs", graphs.len());
    }

    let add = if is_query {
        HeapAdd::Query
    } else {
        HeapAdd::Symmetric
    };

    let mut heap = NeighborHeap::new(n, k);
    for graph in graphs {
        load(&mut heap, graph, add, parallel, block_size, grain_size);
    }

    if parallel {
        heap.deheap_sort_parallel();
    } else {
        heap.deheap_sort();
    }
    Ok(heap_to_graph(&heap))
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::{Dist, VecSet};
    use crate::heap::NPOS;
    use crate::random::random_knn_build;
    use crate::synthetic::generate_clustered_data;

    fn store(n: usize) -> VecSet<f64> {
        let mat = generate_clustered_data::<f64>(n, 3, 2, 0.5, 17);
        VecSet::from_mat(mat.as_ref(), Dist::Euclidean).unwrap()
    }

    fn row_worst(graph: &KnnGraph<f64>, i: usize) -> f64 {
        graph
            .dist_row(i)
            .iter()
            .copied()
            .filter(|d| d.is_finite())
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_query_merge_is_idempotent() {
        let store = store(30);
        let g = random_knn_build(&store, 5, true, false, 4096, 1, 8, false).unwrap();

        let merged = merge_graphs(&g, &g, true, false, 4096, 1, false).unwrap();

        assert_eq!(merged.idx, g.idx);
        assert_eq!(merged.dist, g.dist);
    }

    #[test]
    fn test_symmetric_self_merge_is_improvement_only() {
        use rustc_hash::FxHashSet;

        let store = store(30);
        let g = random_knn_build(&store, 5, true, false, 4096, 1, 8, false).unwrap();

        let merged = merge_graphs(&g, &g, false, false, 4096, 1, false).unwrap();

        // reciprocal inserts mean symmetric self-merge is not the identity:
        // every retained edge must come from G or its reverse, and rows
        // only ever improve
        let mut closure = FxHashSet::default();
        for i in 0..30 {
            for &j in g.idx_row(i) {
                closure.insert((i, j));
                closure.insert((j, i));
            }
        }

        for i in 0..30 {
            for &j in merged.idx_row(i) {
                if j != NPOS {
                    assert!(closure.contains(&(i, j)), "foreign edge ({i}, {j})");
                }
            }
            assert!(row_worst(&merged, i) <= row_worst(&g, i) + 1e-12);
        }
    }

    #[test]
    fn test_symmetric_merge_improves_rows() {
        let store = store(30);
        let a = random_knn_build(&store, 5, true, false, 4096, 1, 8, false).unwrap();
        let b = random_knn_build(&store, 5, true, false, 4096, 1, 99, false).unwrap();

        let merged = merge_graphs(&a, &b, false, false, 4096, 1, false).unwrap();

        for i in 0..30 {
            assert!(row_worst(&merged, i) <= row_worst(&a, i) + 1e-12);
            // merged rows stay clean
            let mut idx: Vec<usize> = merged
                .idx_row(i)
                .iter()
                .copied()
                .filter(|&j| j != NPOS)
                .collect();
            assert!(!idx.contains(&i));
            idx.sort_unstable();
            let len = idx.len();
            idx.dedup();
            assert_eq!(idx.len(), len);
        }
    }

    #[test]
    fn test_parallel_merge_matches_serial_for_query() {
        let store = store(30);
        let a = random_knn_build(&store, 5, true, false, 4096, 1, 8, false).unwrap();
        let b = random_knn_build(&store, 5, true, false, 4096, 1, 99, false).unwrap();

        let serial = merge_graphs(&a, &b, true, false, 4096, 1, false).unwrap();
        let parallel = merge_graphs(&a, &b, true, true, 8, 2, false).unwrap();

        // query merges touch each row independently, so the parallel run
        // is bitwise identical
        assert_eq!(serial.idx, parallel.idx);
    }

    #[test]
    fn test_merge_all_folds_left() {
        let store = store(30);
        let a = random_knn_build(&store, 5, true, false, 4096, 1, 8, false).unwrap();
        let b = random_knn_build(&store, 5, true, false, 4096, 1, 99, false).unwrap();
        let c = random_knn_build(&store, 5, true, false, 4096, 1, 123, false).unwrap();

        let pairwise = merge_graphs(
            &merge_graphs(&a, &b, true, false, 4096, 1, false).unwrap(),
            &c,
            true,
            false,
            4096,
            1,
            false,
        )
        .unwrap();
        let all =
            merge_all_graphs(&[a, b, c], true, false, 4096, 1, false).unwrap();

        assert_eq!(pairwise.idx, all.idx);
    }

    #[test]
    fn test_merge_validation() {
        let store = store(30);
        let a = random_knn_build(&store, 5, true, false, 4096, 1, 8, false).unwrap();
        let small = store_n20_graph();

        assert!(matches!(
            merge_graphs(&a, &small, false, false, 4096, 1, false),
            Err(NndError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            merge_all_graphs::<f64>(&[], false, false, 4096, 1, false),
            Err(NndError::EmptyMergeList)
        ));
    }

    fn store_n20_graph() -> KnnGraph<f64> {
        let store = store(20);
        random_knn_build(&store, 5, true, false, 4096, 1, 8, false).unwrap()
    }
}
