use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// True when the host has requested an abort
#[inline]
fn interrupt_requested(interrupt: Option<&AtomicBool>) -> bool {
    interrupt.is_some_and(|flag| flag.load(Ordering::Relaxed))
}

/// Serial super-batch walk over `[0, n)`
///
/// The body is invoked once per `block_size`-row batch; the interrupt flag
/// is polled between batches, never inside one, so heap state stays
/// consistent when a run is abandoned.
///
/// ### Params
///
/// * `n` - Row count
/// * `block_size` - Rows per super-batch
/// * `interrupt` - Optional host abort flag
/// * `body` - `(begin, end) -> update count`
///
/// ### Returns
///
/// `(total updates, interrupted)`
pub fn for_blocks<F>(
    n: usize,
    block_size: usize,
    interrupt: Option<&AtomicBool>,
    mut body: F,
) -> (usize, bool)
where
    F: FnMut(usize, usize) -> usize,
{
    let block = block_size.max(1);
    let mut total = 0;
    let mut begin = 0;

    while begin < n {
        let end = (begin + block).min(n);
        total += body(begin, end);
        if interrupt_requested(interrupt) {
            return (total, true);
        }
        begin = end;
    }

    (total, false)
}

/// Parallel super-batch walk over `[0, n)`
///
/// Each super-batch is split into `grain_size`-row chunks distributed over
/// the worker pool; workers run to chunk completion without suspension.
/// Interrupt polling happens between super-batches on the driver thread.
///
/// ### Params
///
/// * `n` - Row count
/// * `block_size` - Rows per super-batch
/// * `grain_size` - Rows per worker chunk
/// * `interrupt` - Optional host abort flag
/// * `body` - `(begin, end) -> update count`, run concurrently on
///   disjoint chunks
///
/// ### Returns
///
/// `(total updates, interrupted)`
pub fn par_for_blocks<F>(
    n: usize,
    block_size: usize,
    grain_size: usize,
    interrupt: Option<&AtomicBool>,
    body: F,
) -> (usize, bool)
where
    F: Fn(usize, usize) -> usize + Sync,
{
    let block = block_size.max(1);
    let grain = grain_size.max(1);
    let mut total = 0;
    let mut begin = 0;

    while begin < n {
        let end = (begin + block).min(n);
        let chunks: Vec<(usize, usize)> = (begin..end)
            .step_by(grain)
            .map(|b| (b, (b + grain).min(end)))
            .collect();

        total += chunks.into_par_iter().map(|(b, e)| body(b, e)).sum::<usize>();

        if interrupt_requested(interrupt) {
            return (total, true);
        }
        begin = end;
    }

    (total, false)
}

///////////
// Tests //
///////////
