//! Per-thread random source.
//!
//! Each worker thread owns a single mutable stream, seeded
//! deterministically from a global seed plus the worker index. There is
//! no shared state between streams.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::f64::consts::PI;

/// Default global seed used when the configuration does not override it.
pub const DEFAULT_SEED: u64 = 4357;

/// A single uniform random stream with domain-specific sampling helpers.
pub struct Random {
    rng: Pcg64,
    /// Cached second deviate of the Box-Muller pair.
    spare_gauss: Option<f64>,
}

impl Random {
    /// Constructs the stream for the worker with the given index,
    /// deterministically derived from the global seed.
    #[must_use]
    pub fn new(seed: u64, worker: usize) -> Self {
        Self {
            rng: Pcg64::seed_from_u64(seed.wrapping_add(0x9e37_79b9_7f4a_7c15_u64.wrapping_mul(worker as u64 + 1))),
            spare_gauss: None,
        }
    }

    /// Returns a deviate uniformly distributed over `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Returns a gaussian deviate with mean 0 and variance 1, using the
    /// Box-Muller transform.
    pub fn gauss(&mut self) -> f64 {
        if let Some(z) = self.spare_gauss.take() {
            return z;
        }
        // reject u1 == 0 so the logarithm stays finite
        let mut u1 = self.uniform();
        while u1 == 0.0 {
            u1 = self.uniform();
        }
        let u2 = self.uniform();
        let radius = (-2.0 * u1.ln()).sqrt();
        let (sin2, cos2) = (2.0 * PI * u2).sin_cos();
        self.spare_gauss = Some(radius * sin2);
        radius * cos2
    }

    /// Returns the square root of a uniform deviate, i.e. a deviate with
    /// density `2x` on `[0, 1)`.
    pub fn sqrt_uniform(&mut self) -> f64 {
        self.uniform().sqrt()
    }

    /// Returns a deviate distributed as `exp(-x)` over `[0, ∞)`.
    pub fn exponent(&mut self) -> f64 {
        -(1.0 - self.uniform()).ln()
    }

    /// Returns an isotropically distributed direction.
    pub fn direction(&mut self) -> crate::vec3::Direction {
        let costheta = 2.0 * self.uniform() - 1.0;
        let theta = costheta.clamp(-1.0, 1.0).acos();
        let phi = 2.0 * PI * self.uniform();
        crate::vec3::Direction::from_angles(theta, phi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn streams_are_deterministic() {
        let mut a = Random::new(42, 3);
        let mut b = Random::new(42, 3);
        for _ in 0..100 {
            assert_eq!(a.uniform(), b.uniform());
        }
    }

    #[test]
    fn worker_streams_differ() {
        let mut a = Random::new(42, 0);
        let mut b = Random::new(42, 1);
        let equal = (0..100).filter(|_| a.uniform() == b.uniform()).count();
        assert!(equal < 5);
    }

    #[test]
    fn uniform_moments() {
        let mut rng = Random::new(DEFAULT_SEED, 0);
        let n = 100_000;
        let mean = (0..n).map(|_| rng.uniform()).sum::<f64>() / f64::from(n);
        assert_approx_eq!(f64, mean, 0.5, epsilon = 5e-3);
    }

    #[test]
    fn gauss_moments() {
        let mut rng = Random::new(DEFAULT_SEED, 0);
        let n = 100_000;
        let samples: Vec<f64> = (0..n).map(|_| rng.gauss()).collect();
        let mean = samples.iter().sum::<f64>() / f64::from(n);
        let var = samples.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / f64::from(n);
        assert_approx_eq!(f64, mean, 0.0, epsilon = 2e-2);
        assert_approx_eq!(f64, var, 1.0, epsilon = 2e-2);
    }

    #[test]
    fn directions_are_unit_and_balanced() {
        let mut rng = Random::new(DEFAULT_SEED, 0);
        let n = 10_000;
        let mut mean_z = 0.0;
        for _ in 0..n {
            let dir = rng.direction();
            assert_approx_eq!(f64, dir.to_vec().norm(), 1.0, epsilon = 1e-12);
            mean_z += dir.z();
        }
        assert_approx_eq!(f64, mean_z / f64::from(n), 0.0, epsilon = 2e-2);
    }
}
