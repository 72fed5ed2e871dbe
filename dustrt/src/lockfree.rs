//! Lock-free accumulation of floating point values shared between
//! threads.

use std::sync::atomic::{AtomicU64, Ordering};

/// A double precision accumulator that supports concurrent additions
/// through a compare-exchange loop on the bit representation.
#[derive(Debug, Default)]
pub struct AtomicDouble(AtomicU64);

impl AtomicDouble {
    /// Constructs an accumulator holding zero.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Adds `value` to the accumulator. Safe under concurrent updates
    /// from any number of threads; individual additions are atomic.
    pub fn add(&self, value: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let updated = (f64::from_bits(current) + value).to_bits();
            match self
                .0
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the accumulated value.
    #[must_use]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Overwrites the accumulated value. Not atomic with respect to
    /// concurrent `add` calls; only for single-threaded calibration.
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Allocates a vector of `n` zeroed accumulators.
#[must_use]
pub fn zeroed(n: usize) -> Vec<AtomicDouble> {
    std::iter::repeat_with(AtomicDouble::new).take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn sequential_adds_accumulate() {
        let acc = AtomicDouble::new();
        for _ in 0..10 {
            acc.add(0.5);
        }
        assert_approx_eq!(f64, acc.get(), 5.0, epsilon = 1e-15);
    }

    #[test]
    fn concurrent_adds_lose_nothing() {
        let acc = AtomicDouble::new();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..10_000 {
                        acc.add(1.0);
                    }
                });
            }
        });
        assert_approx_eq!(f64, acc.get(), 40_000.0, epsilon = 1e-9);
    }
}
