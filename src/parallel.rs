//! C11: the range-partitioned parallel-for loop used by the demixer to
//! fan work out across solve slots and subtract slots. Grounded on
//! `aocommon::ParallelFor`'s contract (each index runs exactly once, on
//! exactly one worker, which gets a stable worker id for slot-private
//! scratch) but built directly on `rayon::scope` rather than a bespoke
//! thread pool, since a pool already exists in this crate's dependency
//! stack.

use rayon::prelude::*;

/// Splits `0..n` into `n_workers` contiguous, roughly-equal ranges. The
/// first `n % n_workers` partitions get one extra index.
fn partition_ranges(n: usize, n_workers: usize) -> Vec<std::ops::Range<usize>> {
    let n_workers = n_workers.max(1);
    let base = n / n_workers;
    let remainder = n % n_workers;
    let mut ranges = Vec::with_capacity(n_workers);
    let mut start = 0;
    for w in 0..n_workers {
        let len = base + if w < remainder { 1 } else { 0 };
        ranges.push(start..(start + len));
        start += len;
    }
    ranges
}

/// Runs `f(index, worker_id)` once for every `index` in `begin..end`,
/// partitioned across `rayon::current_num_threads()` workers. Blocks
/// until every index has run (one barrier per call), matching the
/// chunk-boundary re-serialisation the demixer relies on between
/// parallel sections.
pub fn parallel_for<F>(begin: usize, end: usize, f: F)
where
    F: Fn(usize, usize) + Sync,
{
    if begin >= end {
        return;
    }
    let n = end - begin;
    let n_workers = rayon::current_num_threads();
    let ranges = partition_ranges(n, n_workers);

    ranges
        .into_par_iter()
        .enumerate()
        .for_each(|(worker_id, range)| {
            for i in range {
                f(begin + i, worker_id);
            }
        });
}
