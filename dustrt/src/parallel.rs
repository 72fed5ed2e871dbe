//! Fixed-size worker pool with contiguous index-range partitioning.

use crate::error::{Error, Result};
use std::ops::Range;
use std::sync::Mutex;

/// Owns a fixed pool of worker threads. Work items are partitioned into
/// contiguous index ranges, one per worker; there is no work stealing
/// between ranges.
pub struct ParallelFactory {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl ParallelFactory {
    /// Constructs a factory with the specified number of worker threads;
    /// zero selects the number of logical cores.
    ///
    /// # Errors
    ///
    /// Returns an error when the thread pool cannot be created.
    pub fn new(threads: usize) -> Result<Self> {
        let threads = if threads == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            threads
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|err| Error::Other(anyhow::Error::new(err)))?;
        Ok(Self { pool, threads })
    }

    /// Returns the number of worker threads in the pool.
    #[must_use]
    pub const fn thread_count(&self) -> usize {
        self.threads
    }

    /// Runs `body(worker, range)` on the pool, partitioning `0..n` into
    /// at most `thread_count` contiguous ranges. The first error
    /// returned by any worker is propagated; the remaining workers
    /// still run to completion.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by any worker.
    pub fn try_ranges<F>(&self, n: usize, body: F) -> Result<()>
    where
        F: Fn(usize, Range<usize>) -> Result<()> + Sync,
    {
        if n == 0 {
            return Ok(());
        }
        let chunk = n.div_ceil(self.threads);
        let failure: Mutex<Option<Error>> = Mutex::new(None);
        self.pool.scope(|scope| {
            for worker in 0..self.threads {
                let start = worker * chunk;
                if start >= n {
                    break;
                }
                let end = (start + chunk).min(n);
                let body = &body;
                let failure = &failure;
                scope.spawn(move |_| {
                    if let Err(err) = body(worker, start..end) {
                        failure.lock().expect("failure mutex").get_or_insert(err);
                    }
                });
            }
        });
        match failure.into_inner().expect("failure mutex") {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Runs `body(worker, range)` on the pool, partitioning `0..n` into
    /// contiguous ranges.
    pub fn for_ranges<F>(&self, n: usize, body: F)
    where
        F: Fn(usize, Range<usize>) + Sync,
    {
        self.try_ranges(n, |worker, range| {
            body(worker, range);
            Ok(())
        })
        .expect("infallible body");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ranges_cover_every_index_once() {
        let factory = ParallelFactory::new(4).unwrap();
        let n = 1000;
        let counters: Vec<AtomicUsize> = (0..n).map(|_| AtomicUsize::new(0)).collect();
        factory.for_ranges(n, |_, range| {
            for index in range {
                counters[index].fetch_add(1, Ordering::Relaxed);
            }
        });
        assert!(counters
            .iter()
            .all(|counter| counter.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn worker_indices_are_within_pool_size() {
        let factory = ParallelFactory::new(3).unwrap();
        factory.for_ranges(17, |worker, _| {
            assert!(worker < 3);
        });
    }

    #[test]
    fn errors_propagate_from_workers() {
        let factory = ParallelFactory::new(2).unwrap();
        let result = factory.try_ranges(10, |_, range| {
            if range.contains(&7) {
                Err(Error::fatal("boom"))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn empty_workload_is_a_no_op() {
        let factory = ParallelFactory::new(2).unwrap();
        factory.for_ranges(0, |_, _| panic!("must not be called"));
    }
}
