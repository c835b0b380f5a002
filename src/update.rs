use num_traits::Float;
use rustc_hash::FxHashSet;

use crate::dist::PairDistance;
use crate::heap::{NeighborHeap, RowLockedHeap};

/// Applies one candidate pair to the current graph
///
/// `generate_and_apply(p, q)` computes the pair distance and attempts the
/// heap inserts, returning the number of slots changed (0, 1 or 2). Build
/// variants push symmetrically and never push when `p == q`; query
/// variants push into the query row only.
pub trait GraphUpdater<T> {
    fn generate_and_apply(&mut self, p: usize, q: usize) -> usize;
}

#[inline(always)]
fn apply_pair<T: Float + Send + Sync, D: PairDistance<T>>(
    heap: &mut NeighborHeap<T>,
    dist: &D,
    p: usize,
    q: usize,
) -> usize {
    let d = dist.distance(p, q);
    let mut c = 0;
    if d < heap.threshold(p) {
        c += heap.checked_push(p, d, q, 1);
    }
    if d < heap.threshold(q) {
        c += heap.checked_push(q, d, p, 1);
    }
    c
}

/////////////////////
// Serial variants //
/////////////////////

/// Serial fast path: a seen-pair set skips repeat distance computations
///
/// The set is handed in by the caller so it can persist across iterations;
/// the heap's in-row dedup still guards the actual inserts.
pub struct BatchGraphUpdater<'a, T, D> {
    heap: &'a mut NeighborHeap<T>,
    dist: &'a D,
    seen: &'a mut FxHashSet<(usize, usize)>,
    n_pairs: usize,
}

impl<'a, T, D> BatchGraphUpdater<'a, T, D> {
    pub fn new(
        heap: &'a mut NeighborHeap<T>,
        dist: &'a D,
        seen: &'a mut FxHashSet<(usize, usize)>,
    ) -> Self {
        Self {
            heap,
            dist,
            seen,
            n_pairs: 0,
        }
    }

    /// Distinct pairs evaluated so far
    pub fn n_pairs(&self) -> usize {
        self.n_pairs
    }
}

impl<T, D> GraphUpdater<T> for BatchGraphUpdater<'_, T, D>
where
    T: Float + Send + Sync,
    D: PairDistance<T>,
{
    fn generate_and_apply(&mut self, p: usize, q: usize) -> usize {
        if p == q {
            return 0;
        }
        let key = if p < q { (p, q) } else { (q, p) };
        if !self.seen.insert(key) {
            return 0;
        }
        self.n_pairs += 1;
        apply_pair(self.heap, self.dist, p, q)
    }
}

/// Serial variant without the seen set: less memory, more distance calls
pub struct SerialHeapGraphUpdater<'a, T, D> {
    heap: &'a mut NeighborHeap<T>,
    dist: &'a D,
}

impl<'a, T, D> SerialHeapGraphUpdater<'a, T, D> {
    pub fn new(heap: &'a mut NeighborHeap<T>, dist: &'a D) -> Self {
        Self { heap, dist }
    }
}

impl<T, D> GraphUpdater<T> for SerialHeapGraphUpdater<'_, T, D>
where
    T: Float + Send + Sync,
    D: PairDistance<T>,
{
    fn generate_and_apply(&mut self, p: usize, q: usize) -> usize {
        if p == q {
            return 0;
        }
        apply_pair(self.heap, self.dist, p, q)
    }
}

//////////////////////
// Parallel variant //
//////////////////////

/// Parallel build updater over a row-locked heap
///
/// The unlocked threshold reads reject far candidates before any lock is
/// taken; the locks are held only around the heap mutation, never around
/// the distance computation.
pub struct LockingGraphUpdater<'a, T, D> {
    heap: &'a RowLockedHeap<T>,
    dist: &'a D,
}

impl<'a, T, D> LockingGraphUpdater<'a, T, D> {
    pub fn new(heap: &'a RowLockedHeap<T>, dist: &'a D) -> Self {
        Self { heap, dist }
    }
}

impl<T, D> GraphUpdater<T> for LockingGraphUpdater<'_, T, D>
where
    T: Float + Send + Sync,
    D: PairDistance<T>,
{
    fn generate_and_apply(&mut self, p: usize, q: usize) -> usize {
        if p == q {
            return 0;
        }
        let d = self.dist.distance(p, q);
        let mut c = 0;
        if d < self.heap.threshold(p) {
            c += self.heap.checked_push(p, d, q, 1);
        }
        if d < self.heap.threshold(q) {
            c += self.heap.checked_push(q, d, p, 1);
        }
        c
    }
}

////////////////////
// Query variants //
////////////////////

/// Serial query updater: inserts flow into the query row only
///
/// `p` indexes the query collection, `q` the reference collection, so no
/// self-pair test applies.
pub struct QueryGraphUpdater<'a, T, D> {
    heap: &'a mut NeighborHeap<T>,
    dist: &'a D,
}

impl<'a, T, D> QueryGraphUpdater<'a, T, D> {
    pub fn new(heap: &'a mut NeighborHeap<T>, dist: &'a D) -> Self {
        Self { heap, dist }
    }
}

impl<T, D> GraphUpdater<T> for QueryGraphUpdater<'_, T, D>
where
    T: Float + Send + Sync,
    D: PairDistance<T>,
{
    fn generate_and_apply(&mut self, p: usize, q: usize) -> usize {
        let d = self.dist.distance(p, q);
        if d < self.heap.threshold(p) {
            self.heap.checked_push(p, d, q, 1)
        } else {
            0
        }
    }
}

/// Parallel query updater over a row-locked heap
pub struct LockingQueryGraphUpdater<'a, T, D> {
    heap: &'a RowLockedHeap<T>,
    dist: &'a D,
}

impl<'a, T, D> LockingQueryGraphUpdater<'a, T, D> {
    pub fn new(heap: &'a RowLockedHeap<T>, dist: &'a D) -> Self {
        Self { heap, dist }
    }
}

impl<T, D> GraphUpdater<T> for LockingQueryGraphUpdater<'_, T, D>
where
    T: Float + Send + Sync,
    D: PairDistance<T>,
{
    fn generate_and_apply(&mut self, p: usize, q: usize) -> usize {
        let d = self.dist.distance(p, q);
        if d < self.heap.threshold(p) {
            self.heap.checked_push(p, d, q, 1)
        } else {
            0
        }
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Distance provider backed by a literal matrix
    struct TableDist {
        table: Vec<Vec<f64>>,
    }

    impl PairDistance<f64> for TableDist {
        fn distance(&self, i: usize, j: usize) -> f64 {
            self.table[i][j]
        }
    }

    fn line_dist(n: usize) -> TableDist {
        // points 0..n on a line, d(i, j) = |i - j|
        let table = (0..n)
            .map(|i| (0..n).map(|j| (i as f64 - j as f64).abs()).collect())
            .collect();
        TableDist { table }
    }

    #[test]
    fn test_batch_updater_counts_and_dedups() {
        let dist = line_dist(4);
        let mut heap = NeighborHeap::new(4, 2);
        let mut seen = FxHashSet::default();
        let mut updater = BatchGraphUpdater::new(&mut heap, &dist, &mut seen);

        // fresh pair updates both rows
        assert_eq!(updater.generate_and_apply(1, 2), 2);
        assert_eq!(updater.n_pairs(), 1);

        // repeat pair (either orientation) is skipped entirely
        assert_eq!(updater.generate_and_apply(2, 1), 0);
        assert_eq!(updater.n_pairs(), 1);

        // self pair never pushes
        assert_eq!(updater.generate_and_apply(3, 3), 0);
        assert_eq!(updater.n_pairs(), 1);
    }

    #[test]
    fn test_one_sided_improvement_still_applies() {
        let dist = line_dist(8);
        let mut heap = NeighborHeap::new(8, 1);
        heap.checked_push(0, 1.0, 1, 1);
        heap.checked_push(7, 10.0, 2, 1);

        let mut updater = SerialHeapGraphUpdater::new(&mut heap, &dist);

        // d(0, 7) = 7: too far for row 0 (worst 1.0) but improves row 7
        assert_eq!(updater.generate_and_apply(0, 7), 1);
        assert!(heap.contains(7, 0));
        assert!(!heap.contains(0, 7));
    }

    #[test]
    fn test_locking_updater_matches_serial() {
        let dist = line_dist(5);

        let mut serial_heap = NeighborHeap::new(5, 2);
        let mut updater = SerialHeapGraphUpdater::new(&mut serial_heap, &dist);
        let pairs = [(0, 1), (1, 3), (2, 4), (0, 4), (3, 4)];
        let c_serial: usize = pairs
            .iter()
            .map(|&(p, q)| updater.generate_and_apply(p, q))
            .sum();

        let locked = RowLockedHeap::new(NeighborHeap::new(5, 2));
        let mut updater = LockingGraphUpdater::new(&locked, &dist);
        let c_locked: usize = pairs
            .iter()
            .map(|&(p, q)| updater.generate_and_apply(p, q))
            .sum();
        let locked_heap = locked.into_inner();

        assert_eq!(c_serial, c_locked);
        for row in 0..5 {
            let mut a: Vec<usize> = (0..serial_heap.row_len(row))
                .map(|s| serial_heap.index(row, s))
                .collect();
            let mut b: Vec<usize> = (0..locked_heap.row_len(row))
                .map(|s| locked_heap.index(row, s))
                .collect();
            a.sort_unstable();
            b.sort_unstable();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_query_updater_is_one_directional() {
        let dist = line_dist(4);
        let mut heap = NeighborHeap::new(4, 2);
        let mut updater = QueryGraphUpdater::new(&mut heap, &dist);

        assert_eq!(updater.generate_and_apply(0, 3), 1);
        assert!(heap.contains(0, 3));
        assert!(!heap.contains(3, 0));

        // equal indices are distinct points in a query (different sets)
        let mut updater = QueryGraphUpdater::new(&mut heap, &dist);
        assert_eq!(updater.generate_and_apply(1, 1), 1);
        assert!(heap.contains(1, 1));
    }
}
