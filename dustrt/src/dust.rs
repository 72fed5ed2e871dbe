//! The dust system: a dust grid combined with the cell densities of a
//! dust distribution and the wavelength-dependent optical properties of
//! the grain mixture.

use crate::error::{Error, Result};
use crate::geometry::Geometry;
use crate::grid::DustGrid;
use crate::random::Random;
use crate::vec3::{Direction, Position};

/// Wavelength-dependent optical properties of the dust mixture: the
/// extinction opacity, the scattering albedo, and the scattering
/// asymmetry, one value per wavelength index.
pub struct DustMix {
    kappa: Vec<f64>,
    albedo: Vec<f64>,
    asymmetry: Vec<f64>,
}

impl DustMix {
    /// Constructor; validates that the three tables have the same length
    /// and physical values.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a table is empty or a value is
    /// out of range.
    pub fn new(kappa: Vec<f64>, albedo: Vec<f64>, asymmetry: Vec<f64>) -> Result<Self> {
        if kappa.is_empty() || kappa.len() != albedo.len() || kappa.len() != asymmetry.len() {
            return Err(Error::Config(
                "the dust mix tables should have one entry per wavelength".to_owned(),
            ));
        }
        if kappa.iter().any(|&value| value < 0.0) {
            return Err(Error::Config(
                "the extinction opacity should be positive".to_owned(),
            ));
        }
        if albedo.iter().any(|&value| !(0.0..=1.0).contains(&value)) {
            return Err(Error::Config(
                "the scattering albedo should be between 0 and 1".to_owned(),
            ));
        }
        if asymmetry.iter().any(|&value| !(-1.0..=1.0).contains(&value)) {
            return Err(Error::Config(
                "the scattering asymmetry should be between -1 and 1".to_owned(),
            ));
        }
        Ok(Self {
            kappa,
            albedo,
            asymmetry,
        })
    }

    /// Constructs a grey mixture with the same properties at every
    /// wavelength.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a value is out of range.
    pub fn grey(nlambda: usize, kappa: f64, albedo: f64, asymmetry: f64) -> Result<Self> {
        Self::new(
            vec![kappa; nlambda],
            vec![albedo; nlambda],
            vec![asymmetry; nlambda],
        )
    }

    /// Returns the extinction opacity at wavelength index `ell`.
    #[must_use]
    pub fn kappa(&self, ell: usize) -> f64 {
        self.kappa[ell]
    }

    /// Returns the scattering albedo at wavelength index `ell`.
    #[must_use]
    pub fn albedo(&self, ell: usize) -> f64 {
        self.albedo[ell]
    }

    /// Returns the scattering asymmetry at wavelength index `ell`.
    #[must_use]
    pub fn asymmetry(&self, ell: usize) -> f64 {
        self.asymmetry[ell]
    }
}

/// The dust system combines the grid, the per-cell densities sampled
/// from a dust distribution, and the optical properties of the mixture.
/// It is read-only during the photon loop, so photon packets can safely
/// hold a shared reference to it.
pub struct DustSystem {
    grid: Box<dyn DustGrid>,
    mix: DustMix,
    /// Dust mass density per cell, in program units.
    rhov: Vec<f64>,
}

impl DustSystem {
    /// The number of density samples drawn per cell at setup.
    const SAMPLES_PER_CELL: usize = 100;

    /// Constructs the dust system by estimating the mean density in each
    /// grid cell from uniformly drawn sample positions, scaled so the
    /// grid holds the specified total dust mass.
    pub fn new(
        grid: Box<dyn DustGrid>,
        mix: DustMix,
        geometry: &dyn Geometry,
        total_mass: f64,
        random: &mut Random,
    ) -> Self {
        let ncells = grid.cell_count();
        let mut rhov = vec![0.0; ncells];
        for (m, rho) in rhov.iter_mut().enumerate() {
            let mut sum = 0.0;
            for _ in 0..Self::SAMPLES_PER_CELL {
                sum += geometry.density(grid.random_position_in_cell(m, random));
            }
            *rho = total_mass * sum / Self::SAMPLES_PER_CELL as f64;
        }
        Self { grid, mix, rhov }
    }

    /// Returns the dust grid.
    #[must_use]
    pub fn grid(&self) -> &dyn DustGrid {
        self.grid.as_ref()
    }

    /// Returns the optical properties of the mixture.
    #[must_use]
    pub const fn mix(&self) -> &DustMix {
        &self.mix
    }

    /// Returns the dust density in the cell with index `m`.
    #[must_use]
    pub fn density_in_cell(&self, m: usize) -> f64 {
        self.rhov[m]
    }

    /// Returns the optical depth at wavelength index `ell` along the ray
    /// from `position` in `direction`, accumulated over at most
    /// `distance`.
    #[must_use]
    pub fn optical_depth(
        &self,
        ell: usize,
        position: Position,
        direction: Direction,
        distance: f64,
    ) -> f64 {
        let kappa = self.mix.kappa(ell);
        let mut tau = 0.0;
        let mut covered = 0.0;
        for segment in self.grid.path(position, direction).segments() {
            let ds = segment.ds.min(distance - covered);
            if ds <= 0.0 {
                break;
            }
            if segment.cell >= 0 {
                tau += kappa * self.rhov[segment.cell as usize] * ds;
            }
            covered += ds;
            if covered >= distance {
                break;
            }
        }
        tau
    }

    /// Returns the optical depth along the full ray to infinity together
    /// with the cumulative optical depth at the end of every segment,
    /// reusing a caller-provided buffer. Used by the photon cycle to
    /// sample interaction points.
    pub fn fill_optical_depths(
        &self,
        ell: usize,
        position: Position,
        direction: Direction,
        path: &mut crate::grid::GridPath,
        cumulative: &mut Vec<f64>,
    ) -> f64 {
        let kappa = self.mix.kappa(ell);
        *path = self.grid.path(position, direction);
        cumulative.clear();
        let mut tau = 0.0;
        for segment in path.segments() {
            if segment.cell >= 0 {
                tau += kappa * self.rhov[segment.cell as usize] * segment.ds;
            }
            cumulative.push(tau);
        }
        tau
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ShellGeometry;
    use crate::grid::{linear_mesh, SphericalGrid};
    use crate::random::{Random, DEFAULT_SEED};
    use float_cmp::assert_approx_eq;
    use std::f64::consts::PI;

    fn uniform_system(kappa: f64) -> DustSystem {
        // a shell with p = 0 is a uniform density over [rmin, rmax]
        let geometry = ShellGeometry::new(0.5, 2.0, 0.0).unwrap();
        let grid = SphericalGrid::new(linear_mesh(0.0, 2.0, 8), linear_mesh(0.0, PI, 4)).unwrap();
        let mut random = Random::new(DEFAULT_SEED, 0);
        DustSystem::new(Box::new(grid), DustMix::grey(1, kappa, 0.5, 0.0).unwrap(),
            &geometry, 1.0, &mut random)
    }

    #[test]
    fn mix_validates_tables() {
        assert!(DustMix::new(vec![1.0], vec![0.5], vec![0.0]).is_ok());
        assert!(DustMix::new(vec![1.0], vec![1.5], vec![0.0]).is_err());
        assert!(DustMix::new(vec![-1.0], vec![0.5], vec![0.0]).is_err());
        assert!(DustMix::new(vec![1.0, 2.0], vec![0.5], vec![0.0]).is_err());
    }

    #[test]
    fn optical_depth_scales_with_distance() {
        let system = uniform_system(2.0);
        let origin = Position::new(0.0, 0.0, 0.0);
        let direction = Direction::new(1.0, 0.0, 0.0);
        let full = system.optical_depth(0, origin, direction, f64::MAX);
        let half = system.optical_depth(0, origin, direction, 1.0);
        assert!(full > half);
        assert!(half > 0.0);
    }

    #[test]
    fn optical_depth_matches_analytic_uniform_value() {
        // uniform density rho = mass / volume inside [rmin, rmax]
        let kappa = 2.0;
        let system = uniform_system(kappa);
        let rho = 1.0 / (4.0 / 3.0 * PI * (2.0f64.powi(3) - 0.5f64.powi(3)));
        let expected = kappa * rho * 1.5;
        let tau = system.optical_depth(
            0,
            Position::new(0.0, 0.0, 0.0),
            Direction::new(1.0, 0.0, 0.0),
            f64::MAX,
        );
        // the cell densities are Monte Carlo estimates, so allow a few
        // percent of sampling noise
        assert_approx_eq!(f64, tau, expected, epsilon = 0.05 * expected);
    }

    #[test]
    fn cumulative_depths_are_monotonic() {
        let system = uniform_system(1.0);
        let mut path = crate::grid::GridPath::default();
        let mut cumulative = Vec::new();
        let tau = system.fill_optical_depths(
            0,
            Position::new(-3.0, 0.1, 0.0),
            Direction::new(1.0, 0.0, 0.0),
            &mut path,
            &mut cumulative,
        );
        assert_eq!(cumulative.len(), path.segments().len());
        assert!(cumulative.windows(2).all(|w| w[0] <= w[1]));
        assert_approx_eq!(f64, tau, *cumulative.last().unwrap(), epsilon = 1e-12);
    }
}
