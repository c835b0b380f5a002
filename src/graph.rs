use num_traits::Float;
use rustc_hash::FxHashSet;
use std::cmp::Ordering;

use crate::error::NndError;
use crate::heap::{NeighborHeap, RowLockedHeap, NPOS};

///////////////
// k-NN view //
///////////////

/// Dense k-NN graph: per row the neighbour indices and distances
///
/// Row-major `(n_points, n_nbrs)` arrays, 0-indexed. Rows produced by the
/// builders are sorted ascending by distance; unfilled slots carry `NPOS`
/// and `+inf`.
#[derive(Clone, Debug)]
pub struct KnnGraph<T> {
    pub n_points: usize,
    pub n_nbrs: usize,
    pub idx: Vec<usize>,
    pub dist: Vec<T>,
}

impl<T> KnnGraph<T>
where
    T: Float + Send + Sync,
{
    /// Assemble a graph from per-row neighbour lists
    ///
    /// ### Params
    ///
    /// * `rows` - One `(neighbour, distance)` list per point; rows longer
    ///   than `n_nbrs` are truncated, shorter rows are padded.
    /// * `n_nbrs` - Row width of the dense output
    pub fn from_rows(rows: Vec<Vec<(usize, T)>>, n_nbrs: usize) -> Self {
        let n_points = rows.len();
        let mut idx = vec![NPOS; n_points * n_nbrs];
        let mut dist = vec![T::infinity(); n_points * n_nbrs];

        for (i, row) in rows.into_iter().enumerate() {
            for (slot, (j, d)) in row.into_iter().take(n_nbrs).enumerate() {
                idx[i * n_nbrs + slot] = j;
                dist[i * n_nbrs + slot] = d;
            }
        }

        Self {
            n_points,
            n_nbrs,
            idx,
            dist,
        }
    }

    /// Neighbour indices of row `i`
    #[inline]
    pub fn idx_row(&self, i: usize) -> &[usize] {
        &self.idx[i * self.n_nbrs..(i + 1) * self.n_nbrs]
    }

    /// Neighbour distances of row `i`
    #[inline]
    pub fn dist_row(&self, i: usize) -> &[T] {
        &self.dist[i * self.n_nbrs..(i + 1) * self.n_nbrs]
    }

    /// Check every referenced index against a collection size
    ///
    /// ### Params
    ///
    /// * `n_ref` - Number of points the indices may refer to
    ///
    /// ### Returns
    ///
    /// `Ok(())`, or the first out-of-bounds index found.
    pub fn validate(&self, n_ref: usize) -> Result<(), NndError> {
        for &j in &self.idx {
            if j != NPOS && j >= n_ref {
                return Err(NndError::IndexOutOfBounds {
                    index: j,
                    n_points: n_ref,
                });
            }
        }
        Ok(())
    }

    /// Convert to sparse per-row neighbour lists, dropping empty slots
    pub fn to_rows(&self) -> Vec<Vec<(usize, T)>> {
        (0..self.n_points)
            .map(|i| {
                self.idx_row(i)
                    .iter()
                    .zip(self.dist_row(i).iter())
                    .filter(|(&j, _)| j != NPOS)
                    .map(|(&j, &d)| (j, d))
                    .collect()
            })
            .collect()
    }
}

//////////////////
// Heap <-> kNN //
//////////////////

/// Insert policy when loading edges into a heap
///
/// Symmetric adds push every edge in both directions (graph build, where
/// reverse neighbours carry information); query adds push forward only
/// (query rows must never leak into the reference side).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapAdd {
    Symmetric,
    Query,
}

/// Load a dense graph into a neighbour heap
///
/// Each row's edges are pushed farthest-first so the bounded rows absorb
/// every forward edge that fits; all inserts are flagged new.
///
/// ### Params
///
/// * `heap` - Destination heap, `n_points` rows
/// * `graph` - Source edges
/// * `add` - Symmetric or query insert policy
pub fn graph_to_heap<T>(heap: &mut NeighborHeap<T>, graph: &KnnGraph<T>, add: HeapAdd)
where
    T: Float + Send + Sync,
{
    for i in 0..graph.n_points {
        for (j, d) in row_edges_desc(graph, i) {
            match add {
                HeapAdd::Symmetric => heap.checked_push_pair(i, d, j, 1),
                HeapAdd::Query => heap.checked_push(i, d, j, 1),
            };
        }
    }
}

/// Row-locked variant of [`graph_to_heap`] for one worker chunk
pub fn graph_to_heap_locked<T>(
    heap: &RowLockedHeap<T>,
    graph: &KnnGraph<T>,
    add: HeapAdd,
    begin: usize,
    end: usize,
) where
    T: Float + Send + Sync,
{
    for i in begin..end {
        for (j, d) in row_edges_desc(graph, i) {
            match add {
                HeapAdd::Symmetric => heap.checked_push_pair(i, d, j, 1),
                HeapAdd::Query => heap.checked_push(i, d, j, 1),
            };
        }
    }
}

/// Occupied edges of one row, farthest first
fn row_edges_desc<T: Float + Send + Sync>(graph: &KnnGraph<T>, i: usize) -> Vec<(usize, T)> {
    let mut edges: Vec<(usize, T)> = graph
        .idx_row(i)
        .iter()
        .zip(graph.dist_row(i).iter())
        .filter(|(&j, &d)| j != NPOS && d.is_finite())
        .map(|(&j, &d)| (j, d))
        .collect();
    edges.sort_unstable_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    edges
}

/// Copy a heap out into a dense graph
///
/// Callers sort the heap first when ascending rows are wanted.
pub fn heap_to_graph<T>(heap: &NeighborHeap<T>) -> KnnGraph<T>
where
    T: Float + Send + Sync,
{
    let n_points = heap.n_points();
    let n_nbrs = heap.n_nbrs();
    let mut idx = Vec::with_capacity(n_points * n_nbrs);
    let mut dist = Vec::with_capacity(n_points * n_nbrs);

    for i in 0..n_points {
        for slot in 0..n_nbrs {
            idx.push(heap.index(i, slot));
            dist.push(heap.distance(i, slot));
        }
    }

    KnnGraph {
        n_points,
        n_nbrs,
        idx,
        dist,
    }
}

////////////
// Recall //
////////////

/// Mean Recall@K of an approximate graph against an exact one
///
/// ### Params
///
/// * `approx` - The approximate k-NN graph
/// * `exact` - The ground-truth graph (same shape)
///
/// ### Returns
///
/// Fraction of true neighbours recovered, averaged over rows.
pub fn recall<T>(approx: &KnnGraph<T>, exact: &KnnGraph<T>) -> f64
where
    T: Float + Send + Sync,
{
    let mut total = 0.0;
    for i in 0..exact.n_points {
        let approx_set: FxHashSet<usize> = approx
            .idx_row(i)
            .iter()
            .copied()
            .filter(|&j| j != NPOS)
            .collect();

        let truth: Vec<usize> = exact
            .idx_row(i)
            .iter()
            .copied()
            .filter(|&j| j != NPOS)
            .collect();
        if truth.is_empty() {
            continue;
        }

        let matches = truth.iter().filter(|j| approx_set.contains(j)).count();
        total += matches as f64 / truth.len() as f64;
    }
    total / exact.n_points as f64
}

///////////
// Tests //
///////////
