use num_traits::Float;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::cell::UnsafeCell;

/// Sentinel marking an empty heap slot
pub const NPOS: usize = usize::MAX;

///////////////////
// Float on heap //
///////////////////

/// Wrapper giving floats a total order for use in `BinaryHeap`
#[derive(Clone, Copy, Debug)]
pub struct OrderedFloat<T>(pub T);

impl<T: Float> PartialEq for OrderedFloat<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: Float> Eq for OrderedFloat<T> {}

impl<T: Float> PartialOrd for OrderedFloat<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Float> Ord for OrderedFloat<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .partial_cmp(&other.0)
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}

////////////////////
// Neighbour heap //
////////////////////

/// Per-point bounded max-heap of neighbour candidates
///
/// Three parallel row-major arrays of shape `(n_points, n_nbrs)`. Each row
/// is a max-heap keyed on distance: slot 0 holds the worst retained
/// distance, which gives O(1) rejection of far candidates and O(log k)
/// insertion. Occupied slots form a prefix of the row; empty slots carry
/// `NPOS` / `+inf`.
///
/// ### Fields
///
/// * `idx` - Neighbour indices, `NPOS` when empty
/// * `dist` - Neighbour distances, `+inf` when empty
/// * `flags` - Incremental-search flags: `1` = new (not yet used as a
///   pivot), `0` = old
pub struct NeighborHeap<T> {
    n_points: usize,
    n_nbrs: usize,
    idx: Vec<usize>,
    dist: Vec<T>,
    flags: Vec<u8>,
}

impl<T> NeighborHeap<T>
where
    T: Float + Send + Sync,
{
    /// Create an empty heap
    ///
    /// ### Params
    ///
    /// * `n_points` - Number of rows
    /// * `n_nbrs` - Fixed capacity per row
    pub fn new(n_points: usize, n_nbrs: usize) -> Self {
        Self {
            n_points,
            n_nbrs,
            idx: vec![NPOS; n_points * n_nbrs],
            dist: vec![T::infinity(); n_points * n_nbrs],
            flags: vec![0; n_points * n_nbrs],
        }
    }

    /// Number of rows
    pub fn n_points(&self) -> usize {
        self.n_points
    }

    /// Per-row capacity
    pub fn n_nbrs(&self) -> usize {
        self.n_nbrs
    }

    /// Neighbour index at `(row, slot)`
    #[inline(always)]
    pub fn index(&self, row: usize, slot: usize) -> usize {
        self.idx[row * self.n_nbrs + slot]
    }

    /// Neighbour distance at `(row, slot)`
    #[inline(always)]
    pub fn distance(&self, row: usize, slot: usize) -> T {
        self.dist[row * self.n_nbrs + slot]
    }

    /// Flag at `(row, slot)`
    #[inline(always)]
    pub fn flag(&self, row: usize, slot: usize) -> u8 {
        self.flags[row * self.n_nbrs + slot]
    }

    #[inline(always)]
    pub(crate) fn set_flag(&mut self, row: usize, slot: usize, value: u8) {
        self.flags[row * self.n_nbrs + slot] = value;
    }

    /// Worst retained distance of `row` (`+inf` while the row is empty)
    #[inline(always)]
    pub fn threshold(&self, row: usize) -> T {
        self.dist[row * self.n_nbrs]
    }

    /// Linear scan of `row` for `index`
    pub fn contains(&self, row: usize, index: usize) -> bool {
        let base = row * self.n_nbrs;
        self.idx[base..base + self.n_nbrs].contains(&index)
    }

    /// Number of occupied slots in `row`
    ///
    /// Occupied slots always form a prefix of the row.
    pub fn row_len(&self, row: usize) -> usize {
        let base = row * self.n_nbrs;
        self.idx[base..base + self.n_nbrs]
            .iter()
            .position(|&i| i == NPOS)
            .unwrap_or(self.n_nbrs)
    }

    /// Split borrow for row-parallel flag passes
    pub(crate) fn idx_and_flags_mut(&mut self) -> (&[usize], &mut [u8], usize) {
        (&self.idx, &mut self.flags, self.n_nbrs)
    }

    /// Dedup-checked bounded insert
    ///
    /// Rejects any candidate at least as far as the row's current worst
    /// (NaN distances therefore never enter), rejects duplicates by linear
    /// scan, and otherwise restores the heap order.
    ///
    /// ### Params
    ///
    /// * `row` - Target row
    /// * `d` - Candidate distance
    /// * `index` - Candidate neighbour index
    /// * `flag` - `1` for new, `0` for old
    ///
    /// ### Returns
    ///
    /// The number of slots changed (0 or 1).
    pub fn checked_push(&mut self, row: usize, d: T, index: usize, flag: u8) -> usize {
        if !(d < self.threshold(row)) {
            return 0;
        }
        if self.contains(row, index) {
            return 0;
        }
        self.unchecked_push(row, d, index, flag);
        1
    }

    /// Symmetric insert of the edge `(i, j)` into both rows
    ///
    /// ### Returns
    ///
    /// The number of slots changed (0, 1 or 2).
    pub fn checked_push_pair(&mut self, i: usize, d: T, j: usize, flag: u8) -> usize {
        let mut c = self.checked_push(i, d, j, flag);
        if i != j {
            c += self.checked_push(j, d, i, flag);
        }
        c
    }

    /// Insert without the threshold / dedup checks
    ///
    /// While the row has spare capacity the candidate lands in the first
    /// empty slot and sifts up; once full it replaces the root and sifts
    /// down. Callers must have applied `checked_push`'s gates.
    pub(crate) fn unchecked_push(&mut self, row: usize, d: T, index: usize, flag: u8) {
        let k = self.n_nbrs;
        let base = row * k;
        let len = self.row_len(row);

        if len < k {
            // sift up from the first empty slot
            let mut slot = len;
            self.dist[base + slot] = d;
            self.idx[base + slot] = index;
            self.flags[base + slot] = flag;

            while slot > 0 {
                let parent = (slot - 1) / 2;
                if self.dist[base + parent] < self.dist[base + slot] {
                    self.dist.swap(base + parent, base + slot);
                    self.idx.swap(base + parent, base + slot);
                    self.flags.swap(base + parent, base + slot);
                    slot = parent;
                } else {
                    break;
                }
            }
            return;
        }

        // full row: overwrite the root and sift down
        let mut slot = 0;
        loop {
            let left = 2 * slot + 1;
            let right = left + 1;
            let swap = if left >= k {
                break;
            } else if right >= k || self.dist[base + left] >= self.dist[base + right] {
                if d < self.dist[base + left] {
                    left
                } else {
                    break;
                }
            } else if d < self.dist[base + right] {
                right
            } else {
                break;
            };

            self.dist[base + slot] = self.dist[base + swap];
            self.idx[base + slot] = self.idx[base + swap];
            self.flags[base + slot] = self.flags[base + swap];
            slot = swap;
        }

        self.dist[base + slot] = d;
        self.idx[base + slot] = index;
        self.flags[base + slot] = flag;
    }

    /// Sort every row ascending by distance, in place
    ///
    /// Classic deheap: repeatedly swap the root with the last unsorted slot
    /// of the occupied prefix and sift a shrinking heap. Empty tail slots
    /// are untouched. Flags are not meaningful after sorting.
    pub fn deheap_sort(&mut self) {
        for row in 0..self.n_points {
            let base = row * self.n_nbrs;
            let len = self.row_len(row);
            let (dist, idx) = (
                &mut self.dist[base..base + self.n_nbrs],
                &mut self.idx[base..base + self.n_nbrs],
            );
            Self::sort_row(&mut dist[..len], &mut idx[..len]);
        }
    }

    /// Parallel variant of [`NeighborHeap::deheap_sort`]
    pub fn deheap_sort_parallel(&mut self) {
        let k = self.n_nbrs;
        self.dist
            .par_chunks_mut(k)
            .zip(self.idx.par_chunks_mut(k))
            .for_each(|(dist, idx)| {
                let len = idx.iter().position(|&i| i == NPOS).unwrap_or(k);
                Self::sort_row(&mut dist[..len], &mut idx[..len]);
            });
    }

    fn sort_row(dist: &mut [T], idx: &mut [usize]) {
        for end in (1..dist.len()).rev() {
            dist.swap(0, end);
            idx.swap(0, end);
            Self::siftdown(&mut dist[..end], &mut idx[..end]);
        }
    }

    fn siftdown(dist: &mut [T], idx: &mut [usize]) {
        let len = dist.len();
        let mut elt = 0;
        loop {
            let left = 2 * elt + 1;
            let right = left + 1;
            let mut swap = elt;
            if left < len && dist[left] > dist[swap] {
                swap = left;
            }
            if right < len && dist[right] > dist[swap] {
                swap = right;
            }
            if swap == elt {
                break;
            }
            dist.swap(elt, swap);
            idx.swap(elt, swap);
            elt = swap;
        }
    }
}

/////////////////////
// Row-locked heap //
/////////////////////

/// Concurrent wrapper around a [`NeighborHeap`]
///
/// Guards each row with its own mutex so parallel workers racing on the
/// same target row serialise only for the brief sift window; workers
/// touching different rows never contend. The heap is moved in for the
/// duration of a parallel phase and taken back with
/// [`RowLockedHeap::into_inner`] once the phase has completed.
pub struct RowLockedHeap<T> {
    inner: UnsafeCell<NeighborHeap<T>>,
    locks: Vec<Mutex<()>>,
}

// SAFETY: every mutation of row r happens under locks[r]; rows occupy
// disjoint ranges of the backing arrays.
unsafe impl<T: Send + Sync> Sync for RowLockedHeap<T> {}

impl<T> RowLockedHeap<T>
where
    T: Float + Send + Sync,
{
    pub fn new(heap: NeighborHeap<T>) -> Self {
        let locks = (0..heap.n_points()).map(|_| Mutex::new(())).collect();
        Self {
            inner: UnsafeCell::new(heap),
            locks,
        }
    }

    /// Take the heap back after the parallel phase
    pub fn into_inner(self) -> NeighborHeap<T> {
        self.inner.into_inner()
    }

    /// Unlocked read of the row's worst retained distance
    ///
    /// Thresholds only ever decrease, so a stale value merely costs a
    /// redundant locked re-check inside `checked_push`.
    #[inline(always)]
    pub fn threshold(&self, row: usize) -> T {
        unsafe { (*self.inner.get()).threshold(row) }
    }

    /// Locked [`NeighborHeap::checked_push`] on `row`
    pub fn checked_push(&self, row: usize, d: T, index: usize, flag: u8) -> usize {
        let _guard = self.locks[row].lock();
        let heap = unsafe { &mut *self.inner.get() };
        heap.checked_push(row, d, index, flag)
    }

    /// Symmetric locked insert; the two row locks are taken one at a time
    pub fn checked_push_pair(&self, i: usize, d: T, j: usize, flag: u8) -> usize {
        let mut c = self.checked_push(i, d, j, flag);
        if i != j {
            c += self.checked_push(j, d, i, flag);
        }
        c
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_new_heap_is_empty() {
        let heap = NeighborHeap::<f32>::new(3, 4);
        for row in 0..3 {
            assert_eq!(heap.row_len(row), 0);
            assert!(heap.threshold(row).is_infinite());
            for slot in 0..4 {
                assert_eq!(heap.index(row, slot), NPOS);
            }
        }
    }

    #[test]
    fn test_threshold_rejection() {
        let mut heap = NeighborHeap::<f64>::new(1, 3);

        assert_eq!(heap.checked_push(0, 10.0, 7, 1), 1);
        assert_relative_eq!(heap.threshold(0), 10.0);

        // worse than the current root is rejected
        assert_eq!(heap.checked_push(0, 20.0, 8, 1), 0);

        assert_eq!(heap.checked_push(0, 5.0, 9, 1), 1);
        assert_relative_eq!(heap.threshold(0), 10.0);

        assert_eq!(heap.checked_push(0, 3.0, 10, 1), 1);
        assert_relative_eq!(heap.threshold(0), 10.0);

        let row: Vec<(usize, f64)> = (0..3).map(|s| (heap.index(0, s), heap.distance(0, s))).collect();
        assert!(row.contains(&(7, 10.0)));
        assert!(row.contains(&(9, 5.0)));
        assert!(row.contains(&(10, 3.0)));
    }

    #[test]
    fn test_eviction_when_full() {
        let mut heap = NeighborHeap::<f64>::new(1, 3);
        heap.checked_push(0, 10.0, 7, 1);
        heap.checked_push(0, 5.0, 9, 1);
        heap.checked_push(0, 3.0, 10, 1);

        // full row: a closer candidate evicts the root
        assert_eq!(heap.checked_push(0, 4.0, 11, 1), 1);
        assert_relative_eq!(heap.threshold(0), 5.0);
        assert!(!heap.contains(0, 7));
        assert!(heap.contains(0, 11));
    }

    #[test]
    fn test_dedup() {
        let mut heap = NeighborHeap::<f32>::new(1, 3);
        assert_eq!(heap.checked_push(0, 2.0, 4, 1), 1);
        assert_eq!(heap.checked_push(0, 2.0, 4, 1), 0);
        assert_eq!(heap.row_len(0), 1);
    }

    #[test]
    fn test_nan_is_excluded() {
        let mut heap = NeighborHeap::<f32>::new(1, 3);
        assert_eq!(heap.checked_push(0, f32::NAN, 1, 1), 0);
        heap.checked_push(0, 1.0, 2, 1);
        assert_eq!(heap.checked_push(0, f32::NAN, 3, 1), 0);
        assert_eq!(heap.row_len(0), 1);
    }

    #[test]
    fn test_push_pair_skips_reverse_on_self() {
        let mut heap = NeighborHeap::<f32>::new(2, 3);
        assert_eq!(heap.checked_push_pair(0, 1.0, 1, 1), 2);
        assert_eq!(heap.checked_push_pair(1, 0.5, 1, 1), 1);
        assert!(heap.contains(1, 0));
        assert!(heap.contains(0, 1));
    }

    #[test]
    fn test_heap_property_after_random_pushes() {
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        let mut rng = SmallRng::seed_from_u64(42);
        let k = 8;
        let mut heap = NeighborHeap::<f64>::new(4, k);

        for _ in 0..500 {
            let row = rng.random_range(0..4);
            let idx = rng.random_range(0..1000);
            let d: f64 = rng.random();
            heap.checked_push(row, d, idx, 1);
        }

        for row in 0..4 {
            let len = heap.row_len(row);
            for slot in 1..len {
                let parent = (slot - 1) / 2;
                assert!(heap.distance(row, parent) >= heap.distance(row, slot));
            }
            // no duplicates among occupied slots
            let mut seen: Vec<usize> = (0..len).map(|s| heap.index(row, s)).collect();
            seen.sort_unstable();
            seen.dedup();
            assert_eq!(seen.len(), len);
        }
    }

    #[test]
    fn test_deheap_sort_ascending() {
        let mut heap = NeighborHeap::<f64>::new(1, 5);
        for (d, j) in [(0.9, 1), (0.5, 2), (0.7, 3), (0.2, 4), (0.4, 5)] {
            heap.checked_push(0, d, j, 1);
        }
        heap.deheap_sort();

        let dists: Vec<f64> = (0..heap.row_len(0)).map(|s| heap.distance(0, s)).collect();
        for w in dists.windows(2) {
            assert!(w[0] <= w[1]);
        }
        assert_relative_eq!(dists[0], 0.2);
    }

    #[test]
    fn test_deheap_sort_partial_row() {
        let mut heap = NeighborHeap::<f64>::new(1, 5);
        heap.checked_push(0, 3.0, 1, 1);
        heap.checked_push(0, 1.0, 2, 1);
        heap.deheap_sort();

        assert_eq!(heap.index(0, 0), 2);
        assert_relative_eq!(heap.distance(0, 0), 1.0);
        assert_eq!(heap.index(0, 1), 1);
        assert_relative_eq!(heap.distance(0, 1), 3.0);
        assert_eq!(heap.index(0, 2), NPOS);
        assert!(heap.distance(0, 2).is_infinite());
    }

    #[test]
    fn test_row_locked_heap_parallel_pushes() {
        use rayon::prelude::*;

        let heap = NeighborHeap::<f64>::new(4, 8);
        let locked = RowLockedHeap::new(heap);

        // hammer a few shared rows from many workers
        (0..256usize).into_par_iter().for_each(|i| {
            let d = 1.0 / (i + 1) as f64;
            locked.checked_push(i % 4, d, i + 10, 1);
        });

        let heap = locked.into_inner();
        for row in 0..4 {
            let len = heap.row_len(row);
            assert!(len > 0);
            for slot in 1..len {
                let parent = (slot - 1) / 2;
                assert!(heap.distance(row, parent) >= heap.distance(row, slot));
            }
        }
    }
}
