use num_traits::{Float, FromPrimitive};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::graph::KnnGraph;
use crate::heap::{NeighborHeap, RowLockedHeap, NPOS};

////////////////
// Priorities //
////////////////

/// Candidate sampling strategy, selected at the public API
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CandidateSampling {
    /// Uniform-random priorities: candidate heaps hold a random subsample
    /// of the eligible edges
    #[default]
    Random,
    /// True-distance priorities: candidate heaps hold the closest edges
    Distance,
}

/// Assigns the sampling priority used when an edge enters a candidate heap
pub trait CandidatePriority<T> {
    /// Called once per row before its edges are scanned
    fn begin_row(&mut self, row: usize);

    /// Priority for an edge whose stored distance is `edge_dist`
    fn priority(&mut self, edge_dist: T) -> T;
}

/// Creates per-worker priority streams
///
/// `SHOULD_SORT` is a static property of the priority: sorting candidate
/// rows is only informative when priorities are true distances.
pub trait CandidatePriorityFactory<T>: Sync {
    type Priority: CandidatePriority<T>;

    const SHOULD_SORT: bool;

    /// A fresh priority stream for one iteration
    fn create(&self, iter: usize) -> Self::Priority;
}

/// Uniform-random priorities
///
/// Draws are seeded per `(iteration, row)` so candidate selection is
/// identical for any worker count or chunking.
pub struct RandomPriorityFactory {
    pub seed: u64,
}

pub struct RandomPriority {
    base: u64,
    rng: SmallRng,
}

impl<T> CandidatePriorityFactory<T> for RandomPriorityFactory
where
    T: Float + FromPrimitive,
{
    type Priority = RandomPriority;

    const SHOULD_SORT: bool = false;

    fn create(&self, iter: usize) -> RandomPriority {
        let base = self.seed.wrapping_add((iter as u64) << 32);
        RandomPriority {
            base,
            rng: SmallRng::seed_from_u64(base),
        }
    }
}

impl<T> CandidatePriority<T> for RandomPriority
where
    T: Float + FromPrimitive,
{
    fn begin_row(&mut self, row: usize) {
        self.rng = SmallRng::seed_from_u64(self.base.wrapping_add(row as u64));
    }

    fn priority(&mut self, _edge_dist: T) -> T {
        T::from_f64(self.rng.random::<f64>()).unwrap_or_else(T::zero)
    }
}

/// True-distance priorities
pub struct DistancePriorityFactory;

pub struct DistancePriority;

impl<T> CandidatePriorityFactory<T> for DistancePriorityFactory
where
    T: Float + FromPrimitive,
{
    type Priority = DistancePriority;

    const SHOULD_SORT: bool = true;

    fn create(&self, _iter: usize) -> DistancePriority {
        DistancePriority
    }
}

impl<T> CandidatePriority<T> for DistancePriority
where
    T: Float + FromPrimitive,
{
    fn begin_row(&mut self, _row: usize) {}

    fn priority(&mut self, edge_dist: T) -> T {
        edge_dist
    }
}

/////////////////////
// Build selection //
/////////////////////

/// Partition the current edges into NEW and OLD candidate heaps
///
/// Every edge is pushed symmetrically, so the candidate heaps pick up
/// forward and reverse candidates in one scan instead of materialising a
/// reverse list and down-sampling it.
///
/// ### Params
///
/// * `current` - The graph being refined (read only here)
/// * `priority` - Sampling priority stream
/// * `new_nbrs` / `old_nbrs` - Candidate heaps, `max_candidates` wide
/// * `begin` / `end` - Row range to scan
pub fn build_candidates<T, P>(
    current: &NeighborHeap<T>,
    priority: &mut P,
    new_nbrs: &mut NeighborHeap<T>,
    old_nbrs: &mut NeighborHeap<T>,
    begin: usize,
    end: usize,
) where
    T: Float + Send + Sync,
    P: CandidatePriority<T>,
{
    for i in begin..end {
        priority.begin_row(i);
        for j in 0..current.n_nbrs() {
            let idx = current.index(i, j);
            if idx == NPOS {
                continue;
            }
            let d = priority.priority(current.distance(i, j));
            let flag = current.flag(i, j);
            if flag == 1 {
                new_nbrs.checked_push_pair(i, d, idx, flag);
            } else {
                old_nbrs.checked_push_pair(i, d, idx, flag);
            }
        }
    }
}

/// Row-locked variant of [`build_candidates`] for one worker chunk
pub fn build_candidates_locked<T, F>(
    current: &NeighborHeap<T>,
    factory: &F,
    iter: usize,
    new_nbrs: &RowLockedHeap<T>,
    old_nbrs: &RowLockedHeap<T>,
    begin: usize,
    end: usize,
) where
    T: Float + Send + Sync,
    F: CandidatePriorityFactory<T>,
{
    let mut priority = factory.create(iter);
    for i in begin..end {
        priority.begin_row(i);
        for j in 0..current.n_nbrs() {
            let idx = current.index(i, j);
            if idx == NPOS {
                continue;
            }
            let d = priority.priority(current.distance(i, j));
            let flag = current.flag(i, j);
            if flag == 1 {
                new_nbrs.checked_push_pair(i, d, idx, flag);
            } else {
                old_nbrs.checked_push_pair(i, d, idx, flag);
            }
        }
    }
}

/// Mark retained NEW candidates as OLD in the current graph
///
/// A neighbour selected as a pivot this iteration must not be re-selected
/// in the next one; only neighbours that actually survived into the NEW
/// candidate heap are flipped, so edges dropped under capacity pressure
/// keep their chance.
pub fn flag_retained_new_candidates<T>(
    current: &mut NeighborHeap<T>,
    new_cands: &NeighborHeap<T>,
    parallel: bool,
) where
    T: Float + Send + Sync,
{
    if parallel {
        let (idx, flags, k) = current.idx_and_flags_mut();
        flags.par_chunks_mut(k).enumerate().for_each(|(i, row_flags)| {
            for (j, flag) in row_flags.iter_mut().enumerate() {
                let id = idx[i * k + j];
                if id != NPOS && new_cands.contains(i, id) {
                    *flag = 0;
                }
            }
        });
    } else {
        for i in 0..current.n_points() {
            for j in 0..current.n_nbrs() {
                let id = current.index(i, j);
                if id != NPOS && new_cands.contains(i, id) {
                    current.set_flag(i, j, 0);
                }
            }
        }
    }
}

/////////////////////
// Query selection //
/////////////////////

/// Select NEW query candidates
///
/// Queries have no reverse neighbours, so only forward edges are scanned
/// and no OLD heap is needed. With `flag_on_add` (valid when
/// `max_candidates >= k`, where an accepted push can never be evicted
/// later) accepted pushes flip their flag immediately; otherwise the
/// caller runs the retention pass. Either way a neighbour goes OLD only
/// if it is a member of the final candidate heap.
pub fn build_query_candidates<T, P>(
    current: &mut NeighborHeap<T>,
    priority: &mut P,
    new_cands: &mut NeighborHeap<T>,
    flag_on_add: bool,
) where
    T: Float + Send + Sync,
    P: CandidatePriority<T>,
{
    for i in 0..current.n_points() {
        priority.begin_row(i);
        for j in 0..current.n_nbrs() {
            if current.flag(i, j) != 1 {
                continue;
            }
            let idx = current.index(i, j);
            if idx == NPOS {
                continue;
            }
            let d = priority.priority(current.distance(i, j));
            let added = new_cands.checked_push(i, d, idx, 1);
            if flag_on_add && added > 0 {
                current.set_flag(i, j, 0);
            }
        }
    }
}

/// Row-locked variant for one worker chunk
///
/// Flag flips are deferred to [`flag_retained_new_candidates`], which the
/// parallel driver always runs; membership in the final candidate heap is
/// the canonical criterion either way.
pub fn build_query_candidates_locked<T, F>(
    current: &NeighborHeap<T>,
    factory: &F,
    iter: usize,
    new_cands: &RowLockedHeap<T>,
    begin: usize,
    end: usize,
) where
    T: Float + Send + Sync,
    F: CandidatePriorityFactory<T>,
{
    let mut priority = factory.create(iter);
    for i in begin..end {
        priority.begin_row(i);
        for j in 0..current.n_nbrs() {
            if current.flag(i, j) != 1 {
                continue;
            }
            let idx = current.index(i, j);
            if idx == NPOS {
                continue;
            }
            let d = priority.priority(current.distance(i, j));
            new_cands.checked_push(i, d, idx, 1);
        }
    }
}

//////////////////////
// General-nbr heap //
//////////////////////

/// Build the reference general-neighbour heap, once per query
///
/// The reference k-NN is static during a query, so its candidate
/// neighbourhoods (forward plus reverse, priority-sampled) only need to be
/// assembled a single time.
pub fn build_general_nbrs<T, P>(
    reference_knn: &KnnGraph<T>,
    priority: &mut P,
    gn_graph: &mut NeighborHeap<T>,
) where
    T: Float + Send + Sync,
    P: CandidatePriority<T>,
{
    for i in 0..reference_knn.n_points {
        priority.begin_row(i);
        for j in 0..reference_knn.n_nbrs {
            let r = reference_knn.idx_row(i)[j];
            if r == NPOS {
                continue;
            }
            let d = priority.priority(reference_knn.dist_row(i)[j]);
            gn_graph.checked_push_pair(i, d, r, 1);
        }
    }
}

///////////
// Tests //
///////////
