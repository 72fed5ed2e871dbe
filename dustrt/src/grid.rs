//! Spatial discretization of the dust distribution.
//!
//! A dust grid partitions space into cells supporting constant-time cell
//! identification and, most importantly, ray traversal: converting a
//! parametric ray into an ordered sequence of (cell, path-length)
//! segments. The traversal is the hot loop of the engine and must stay
//! numerically robust across billions of photon events.

use crate::error::{Error, Result};
use crate::random::Random;
use crate::vec3::{Direction, Position, Vec3};
use std::f64::consts::PI;

/// A single traversal segment: the index of the crossed cell and the
/// path length inside it. A cell index of −1 denotes the external
/// approach from outside the grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    /// Cell index, or −1 for the segment outside the grid.
    pub cell: i32,
    /// Path length covered inside the cell.
    pub ds: f64,
}

/// The ordered, finite sequence of segments covering a ray from its
/// starting position until it leaves the grid.
#[derive(Clone, Debug, Default)]
pub struct GridPath {
    segments: Vec<Segment>,
}

impl GridPath {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            segments: Vec::with_capacity(capacity),
        }
    }

    fn add(&mut self, cell: i32, ds: f64) {
        self.segments.push(Segment { cell, ds });
    }

    /// Returns the segments in traversal order.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns true when the ray never passes through the grid.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the total path length covered inside the grid, i.e. the
    /// sum of the interior segment lengths.
    #[must_use]
    pub fn interior_length(&self) -> f64 {
        self.segments
            .iter()
            .filter(|segment| segment.cell >= 0)
            .map(|segment| segment.ds)
            .sum()
    }
}

/// A cell-wise partition of space.
pub trait DustGrid: Send + Sync {
    /// Returns the number of cells in the grid.
    fn cell_count(&self) -> usize;

    /// Returns the radius of the smallest origin-centered sphere
    /// containing the grid.
    fn outer_radius(&self) -> f64;

    /// Returns the index of the cell containing the position, or −1 when
    /// the position lies outside the grid.
    fn cell_index(&self, position: Position) -> i32;

    /// Returns the center of the cell with index `m`.
    fn central_position(&self, m: usize) -> Position;

    /// Draws a position uniformly distributed over the physical volume
    /// of the cell with index `m`.
    fn random_position_in_cell(&self, m: usize, random: &mut Random) -> Position;

    /// Returns the volume of the cell with index `m`, or zero for an
    /// invalid index.
    fn volume(&self, m: usize) -> f64;

    /// Returns the ordered segment sequence covering the ray from
    /// `position` along `direction` until it exits the outermost
    /// boundary.
    fn path(&self, position: Position, direction: Direction) -> GridPath;
}

////////////////////////////////////////////////////////////////////
// mesh builders

/// Returns `n + 1` linearly spaced boundaries over `[min, max]`.
#[must_use]
pub fn linear_mesh(min: f64, max: f64, n: usize) -> Vec<f64> {
    (0..=n)
        .map(|i| min + (max - min) * i as f64 / n as f64)
        .collect()
}

/// Returns `n + 1` boundaries over `[0, rmax]` with a zero first point
/// and the remaining points logarithmically spaced from `rmin` to
/// `rmax`.
#[must_use]
pub fn zero_log_mesh(rmin: f64, rmax: f64, n: usize) -> Vec<f64> {
    let logrmin = rmin.log10();
    let logrmax = rmax.log10();
    let mut mesh = Vec::with_capacity(n + 1);
    mesh.push(0.0);
    for i in 0..n {
        mesh.push(10f64.powf(logrmin + i as f64 * (logrmax - logrmin) / (n - 1) as f64));
    }
    mesh
}

/// Returns `n + 1` boundaries over `[0, rmax]` whose bin widths form a
/// geometric series with the specified ratio of the outermost to the
/// innermost width. A ratio within 1e-3 of one yields a linear mesh.
#[must_use]
pub fn power_mesh(rmax: f64, ratio: f64, n: usize) -> Vec<f64> {
    if (ratio - 1.0).abs() < 1e-3 {
        return linear_mesh(0.0, rmax, n);
    }
    let q = ratio.powf(1.0 / (n as f64 - 1.0));
    (0..=n)
        .map(|i| (1.0 - q.powi(i as i32)) / (1.0 - q.powi(n as i32)) * rmax)
        .collect()
}

/// Returns `n + 1` linearly spaced boundaries over `[−zmax, +zmax]`.
#[must_use]
pub fn symmetric_mesh(zmax: f64, n: usize) -> Vec<f64> {
    linear_mesh(-zmax, zmax, n)
}

/// Returns `n + 1` boundaries over `[−zmax, +zmax]`, symmetric around
/// zero, whose bin widths grow geometrically away from the midplane
/// with the specified ratio of the outermost to the innermost width.
/// The bin count `n` must be even.
#[must_use]
pub fn symmetric_power_mesh(zmax: f64, ratio: f64, n: usize) -> Vec<f64> {
    assert!(n % 2 == 0, "a symmetric power mesh needs an even bin count");
    let half = power_mesh(zmax, ratio, n / 2);
    let mut mesh: Vec<f64> = half.iter().skip(1).rev().map(|&z| -z).collect();
    mesh.extend(half);
    mesh
}

// Returns the smallest positive solution of x^2 + 2 b x + c = 0,
// or 0 if there is no positive solution.
fn smallest_positive_solution(b: f64, c: f64) -> f64 {
    // x1 = -b - sqrt(b*b - c), x2 = -b + sqrt(b*b - c), x1 * x2 = c
    if b * b > c {
        if b > 0.0 {
            // x1 is always negative; x2 is positive only if c < 0
            if c < 0.0 {
                let x1 = -b - (b * b - c).sqrt();
                return c / x1;
            }
        } else {
            // x2 is always positive; x1 is positive only if c > 0
            let x2 = -b + (b * b - c).sqrt();
            if c > 0.0 {
                let x1 = c / x2;
                if x1 < x2 {
                    return x1;
                }
            }
            return x2;
        }
    }
    0.0
}

// Returns the smallest positive solution of a x^2 + 2 b x + c = 0,
// falling back to the linear equation for a near-degenerate quadratic.
fn smallest_positive_solution_general(a: f64, b: f64, c: f64) -> f64 {
    if a.abs() > 1e-9 {
        return smallest_positive_solution(b / a, c / a);
    }
    let x = -0.5 * c / b;
    if x > 0.0 {
        return x;
    }
    0.0
}

// Returns the distance to the first intersection between the ray
// (bfr, bfk) and the sphere with the given radius, or 0 if there is
// no intersection.
fn first_intersection_sphere(bfr: Vec3, bfk: Vec3, r: f64) -> f64 {
    smallest_positive_solution(Vec3::dot(bfr, bfk), bfr.norm2() - r * r)
}

// Returns the distance to the first intersection between the ray
// (bfr, bfk) and the cone with the given cos(theta), or 0 if there is
// no intersection. The degenerate cone with zero cosine is the
// equatorial plane and is treated separately.
fn first_intersection_cone(bfr: Vec3, bfk: Vec3, c: f64) -> f64 {
    if c == 0.0 {
        -bfr.z / bfk.z
    } else {
        smallest_positive_solution_general(
            c * c - bfk.z * bfk.z,
            c * c * Vec3::dot(bfr, bfk) - bfr.z * bfk.z,
            c * c * bfr.norm2() - bfr.z * bfr.z,
        )
    }
}

// Returns the distance to the first intersection between the ray
// (bfr, bfk) and the infinite cylinder with the given radius around the
// z axis, or 0 if there is no intersection.
fn first_intersection_cylinder(bfr: Vec3, bfk: Vec3, r: f64) -> f64 {
    smallest_positive_solution_general(
        bfk.x * bfk.x + bfk.y * bfk.y,
        bfr.x * bfk.x + bfr.y * bfk.y,
        bfr.x * bfr.x + bfr.y * bfr.y - r * r,
    )
}

fn upper_bin(boundaries: &[f64], value: f64) -> usize {
    // index of the bin whose lower boundary is the largest one <= value;
    // clamps to the first bin below the grid and to the last bin above
    let mut low: isize = -1;
    let mut high = boundaries.len() as isize - 1;
    while high - low > 1 {
        let mid = (high + low) >> 1;
        if value >= boundaries[mid as usize] {
            low = mid;
        } else {
            high = mid;
        }
    }
    low.max(0) as usize
}

////////////////////////////////////////////////////////////////////

/// An axisymmetric grid in spherical coordinates: ascending radial
/// boundaries `r_0 = 0 … r_Nr = r_max` and polar boundaries
/// `θ_0 = 0 … θ_Nθ = π`. The cell with radial index `i` and polar index
/// `k` has identifier `m = k + Nθ·i`.
pub struct SphericalGrid {
    rv: Vec<f64>,
    thetav: Vec<f64>,
    /// Cosines of the polar boundaries with the equatorial boundary
    /// forced to exactly zero.
    cv: Vec<f64>,
    nr: usize,
    ntheta: usize,
    rmax: f64,
}

impl SphericalGrid {
    /// Constructs the grid from its boundary meshes.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the meshes are malformed, or
    /// when the equatorial plane is not represented exactly once among
    /// the polar boundaries (the traversal treats the zero-cosine cone as
    /// a special case).
    pub fn new(rv: Vec<f64>, thetav: Vec<f64>) -> Result<Self> {
        if rv.len() < 2 || rv[0] != 0.0 || !rv.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::Config(
                "the radial mesh should start at zero and be strictly ascending".to_owned(),
            ));
        }
        if thetav.len() < 3
            || thetav[0] != 0.0
            || (thetav[thetav.len() - 1] - PI).abs() > 1e-12
            || !thetav.windows(2).all(|w| w[0] < w[1])
        {
            return Err(Error::Config(
                "the polar mesh should be strictly ascending from 0 to pi".to_owned(),
            ));
        }

        let nr = rv.len() - 1;
        let ntheta = thetav.len() - 1;
        let rmax = rv[nr];

        // pre-calculate the cosines for each angular boundary;
        // the xy-plane must occur exactly once because path() checks
        // for a zero c value
        let mut cv = vec![0.0; ntheta + 1];
        cv[0] = 1.0;
        cv[ntheta] = -1.0;
        let mut zeroes = 0;
        for k in 1..ntheta {
            cv[k] = thetav[k].cos();
            if cv[k].abs() < 1e-9 {
                zeroes += 1;
                cv[k] = 0.0;
            }
        }
        if zeroes != 1 {
            return Err(Error::Config(
                "the grid point with theta = pi/2 must occur exactly once".to_owned(),
            ));
        }

        Ok(Self {
            rv,
            thetav,
            cv,
            nr,
            ntheta,
            rmax,
        })
    }

    fn which_r_cell(&self, r: f64) -> usize {
        if r > self.rmax {
            return self.nr;
        }
        upper_bin(&self.rv, r)
    }

    fn which_theta_cell(&self, theta: f64) -> usize {
        if theta <= 0.0 {
            return 0;
        }
        upper_bin(&self.thetav, theta).min(self.ntheta - 1)
    }

    fn index(&self, i: usize, k: usize) -> i32 {
        (k + self.ntheta * i) as i32
    }

    fn invert_index(&self, m: usize) -> (usize, usize) {
        (m / self.ntheta, m % self.ntheta)
    }
}

impl DustGrid for SphericalGrid {
    fn cell_count(&self) -> usize {
        self.nr * self.ntheta
    }

    fn outer_radius(&self) -> f64 {
        self.rmax
    }

    fn cell_index(&self, position: Position) -> i32 {
        let (r, theta, _) = position.spherical();
        let i = self.which_r_cell(r);
        if i >= self.nr {
            return -1;
        }
        self.index(i, self.which_theta_cell(theta))
    }

    fn central_position(&self, m: usize) -> Position {
        let (i, k) = self.invert_index(m);
        let r = 0.5 * (self.rv[i] + self.rv[i + 1]);
        let theta = 0.5 * (self.thetav[k] + self.thetav[k + 1]);
        Position::from_spherical(r, theta, 0.0)
    }

    fn random_position_in_cell(&self, m: usize, random: &mut Random) -> Position {
        let (i, k) = self.invert_index(m);
        let ris = self.rv[i] * self.rv[i];
        let ri1s = self.rv[i + 1] * self.rv[i + 1];
        let r = (ris + (ri1s - ris) * random.uniform()).sqrt();
        let theta = self.thetav[k] + (self.thetav[k + 1] - self.thetav[k]) * random.uniform();
        let phi = 2.0 * PI * random.uniform();
        Position::from_spherical(r, theta, phi)
    }

    fn volume(&self, m: usize) -> f64 {
        let (i, k) = self.invert_index(m);
        if i >= self.nr || k >= self.ntheta {
            return 0.0;
        }
        (2.0 / 3.0)
            * PI
            * (self.rv[i + 1].powi(3) - self.rv[i].powi(3))
            * (self.thetav[k].cos() - self.thetav[k + 1].cos())
    }

    fn path(&self, position: Position, direction: Direction) -> GridPath {
        // small value relative to the domain size
        let eps = 1e-11 * self.rmax;

        let mut path = GridPath::with_capacity(2 * self.nr + self.ntheta + 2);
        let mut bfr = position.to_vec();
        let bfk = direction.to_vec();

        // move the photon packet to the first grid cell that it will
        // pass; if it does not pass any grid cell, return an empty path
        let r2 = bfr.norm2();
        if r2 > self.rmax * self.rmax {
            let ds = first_intersection_sphere(bfr, bfk, self.rmax);
            if ds == 0.0 {
                return GridPath::default();
            }
            path.add(-1, ds);
            bfr += bfk * (ds + eps);
        } else if r2 == 0.0 {
            // push the position away from the origin so that it has a
            // meaningful cell number
            bfr += bfk * eps;
        }

        // determine the indices of the cell containing the starting
        // point; in the rare case that the point is still outside the
        // grid, return an empty path
        let (r, theta, _) = Position::from(bfr).spherical();
        let mut i = self.which_r_cell(r);
        let mut k = self.which_theta_cell(theta);
        if i >= self.nr {
            return GridPath::default();
        }

        // loop over cells/path segments until we leave the grid
        while i < self.nr {
            // consider the potential exit points for each of the four
            // cell boundaries; the smallest positive intersection
            // distance wins
            let mut ds = f64::MAX; // large but not infinite, so that infinite candidates are discarded
            let mut inext = i;
            let mut knext = k;

            // inner radial boundary (not applicable to the innermost cell)
            if i > 0 {
                let s = first_intersection_sphere(bfr, bfk, self.rv[i]);
                if s > 0.0 && s < ds {
                    ds = s;
                    inext = i - 1;
                    knext = k;
                }
            }

            // outer radial boundary (always applicable)
            {
                let s = first_intersection_sphere(bfr, bfk, self.rv[i + 1]);
                if s > 0.0 && s < ds {
                    ds = s;
                    // terminates the loop when incremented beyond the
                    // outermost boundary
                    inext = i + 1;
                    knext = k;
                }
            }

            // upper angular boundary (not applicable to the uppermost cell)
            if k > 0 {
                let s = first_intersection_cone(bfr, bfk, self.cv[k]);
                if s > 0.0 && s < ds {
                    ds = s;
                    inext = i;
                    knext = k - 1;
                }
            }

            // lower angular boundary (not applicable to the lowest cell)
            if k < self.ntheta - 1 {
                let s = first_intersection_cone(bfr, bfk, self.cv[k + 1]);
                if s > 0.0 && s < ds {
                    ds = s;
                    inext = i;
                    knext = k + 1;
                }
            }

            if inext != i || knext != k {
                // an exit point was found: add a segment, move to the
                // next point, and update the cell indices
                path.add(self.index(i, k), ds);
                bfr += bfk * (ds + eps);
                i = inext;
                k = knext;
            } else {
                // otherwise move a tiny bit along the path and reset the
                // current cell indices
                log::warn!("No exit point found from dust grid cell");
                bfr += bfk * eps;
                let (r, theta, _) = Position::from(bfr).spherical();
                i = self.which_r_cell(r);
                k = self.which_theta_cell(theta);
            }
        }

        path
    }
}

////////////////////////////////////////////////////////////////////

/// An axisymmetric grid in cylindrical coordinates: ascending radial
/// boundaries `R_0 = 0 … R_NR` and axial boundaries
/// `z_0 = −z_max … z_Nz = +z_max`. The cell with radial index `i` and
/// axial index `k` has identifier `m = k + Nz·i`.
pub struct CylindricalGrid {
    rv: Vec<f64>,
    zv: Vec<f64>,
    nr: usize,
    nz: usize,
    rmax: f64,
    zmax: f64,
}

impl CylindricalGrid {
    /// Constructs the grid from its boundary meshes.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a mesh is malformed.
    pub fn new(rv: Vec<f64>, zv: Vec<f64>) -> Result<Self> {
        if rv.len() < 2 || rv[0] != 0.0 || !rv.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::Config(
                "the radial mesh should start at zero and be strictly ascending".to_owned(),
            ));
        }
        if zv.len() < 2
            || !zv.windows(2).all(|w| w[0] < w[1])
            || (zv[0] + zv[zv.len() - 1]).abs() > 1e-12 * zv[zv.len() - 1].abs()
        {
            return Err(Error::Config(
                "the axial mesh should be strictly ascending and symmetric around zero".to_owned(),
            ));
        }
        let nr = rv.len() - 1;
        let nz = zv.len() - 1;
        let rmax = rv[nr];
        let zmax = zv[nz];
        Ok(Self {
            rv,
            zv,
            nr,
            nz,
            rmax,
            zmax,
        })
    }

    fn which_r_cell(&self, big_r: f64) -> usize {
        if big_r > self.rmax {
            return self.nr;
        }
        upper_bin(&self.rv, big_r)
    }

    fn which_z_cell(&self, z: f64) -> isize {
        if z < self.zv[0] {
            return -1;
        }
        if z > self.zmax {
            return self.nz as isize;
        }
        upper_bin(&self.zv, z) as isize
    }

    fn index(&self, i: usize, k: usize) -> i32 {
        (k + self.nz * i) as i32
    }

    fn invert_index(&self, m: usize) -> (usize, usize) {
        (m / self.nz, m % self.nz)
    }

    fn inside(&self, bfr: Vec3) -> bool {
        bfr.x * bfr.x + bfr.y * bfr.y <= self.rmax * self.rmax
            && bfr.z >= self.zv[0]
            && bfr.z <= self.zmax
    }
}

impl DustGrid for CylindricalGrid {
    fn cell_count(&self) -> usize {
        self.nr * self.nz
    }

    fn outer_radius(&self) -> f64 {
        self.rmax.hypot(self.zmax)
    }

    fn cell_index(&self, position: Position) -> i32 {
        let i = self.which_r_cell(position.cylindrical_radius());
        if i >= self.nr {
            return -1;
        }
        let k = self.which_z_cell(position.z());
        if k < 0 || k >= self.nz as isize {
            return -1;
        }
        self.index(i, k as usize)
    }

    fn central_position(&self, m: usize) -> Position {
        let (i, k) = self.invert_index(m);
        let big_r = 0.5 * (self.rv[i] + self.rv[i + 1]);
        let z = 0.5 * (self.zv[k] + self.zv[k + 1]);
        Position::from_cylindrical(big_r, 0.0, z)
    }

    fn random_position_in_cell(&self, m: usize, random: &mut Random) -> Position {
        let (i, k) = self.invert_index(m);
        let ris = self.rv[i] * self.rv[i];
        let ri1s = self.rv[i + 1] * self.rv[i + 1];
        let big_r = (ris + (ri1s - ris) * random.uniform()).sqrt();
        let z = self.zv[k] + (self.zv[k + 1] - self.zv[k]) * random.uniform();
        let phi = 2.0 * PI * random.uniform();
        Position::from_cylindrical(big_r, phi, z)
    }

    fn volume(&self, m: usize) -> f64 {
        let (i, k) = self.invert_index(m);
        if i >= self.nr || k >= self.nz {
            return 0.0;
        }
        PI * (self.rv[i + 1] * self.rv[i + 1] - self.rv[i] * self.rv[i])
            * (self.zv[k + 1] - self.zv[k])
    }

    fn path(&self, position: Position, direction: Direction) -> GridPath {
        let eps = 1e-11 * self.rmax.max(self.zmax);

        let mut path = GridPath::with_capacity(2 * self.nr + self.nz + 2);
        let mut bfr = position.to_vec();
        let bfk = direction.to_vec();

        // move the photon packet to the first grid cell that it will
        // pass, entering through the outer cylinder or one of the
        // horizontal end planes
        if !self.inside(bfr) {
            let mut candidates = [
                first_intersection_cylinder(bfr, bfk, self.rmax),
                (self.zv[0] - bfr.z) / bfk.z,
                (self.zmax - bfr.z) / bfk.z,
            ];
            candidates.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mut entered = false;
            for s in candidates {
                if s > 0.0 && s.is_finite() && self.inside(bfr + bfk * (s + eps)) {
                    path.add(-1, s);
                    bfr += bfk * (s + eps);
                    entered = true;
                    break;
                }
            }
            if !entered {
                return GridPath::default();
            }
        }

        // determine the indices of the cell containing the starting point
        let mut i = self.which_r_cell(bfr.x.hypot(bfr.y)) as isize;
        let mut k = self.which_z_cell(bfr.z);
        if i >= self.nr as isize || k < 0 || k >= self.nz as isize {
            return GridPath::default();
        }

        // loop over cells/path segments until we leave the grid
        while i < self.nr as isize && k >= 0 && k < self.nz as isize {
            let iu = i as usize;
            let ku = k as usize;
            let mut ds = f64::MAX;
            let mut inext = i;
            let mut knext = k;

            // inner radial boundary (not applicable to the innermost cell)
            if iu > 0 {
                let s = first_intersection_cylinder(bfr, bfk, self.rv[iu]);
                if s > 0.0 && s < ds {
                    ds = s;
                    inext = i - 1;
                    knext = k;
                }
            }

            // outer radial boundary (always applicable)
            {
                let s = first_intersection_cylinder(bfr, bfk, self.rv[iu + 1]);
                if s > 0.0 && s < ds {
                    ds = s;
                    inext = i + 1;
                    knext = k;
                }
            }

            // lower horizontal boundary
            {
                let s = (self.zv[ku] - bfr.z) / bfk.z;
                if s > 0.0 && s < ds {
                    ds = s;
                    inext = i;
                    knext = k - 1;
                }
            }

            // upper horizontal boundary
            {
                let s = (self.zv[ku + 1] - bfr.z) / bfk.z;
                if s > 0.0 && s < ds {
                    ds = s;
                    inext = i;
                    knext = k + 1;
                }
            }

            if inext != i || knext != k {
                path.add(self.index(iu, ku), ds);
                bfr += bfk * (ds + eps);
                i = inext;
                k = knext;
            } else {
                log::warn!("No exit point found from dust grid cell");
                bfr += bfk * eps;
                i = self.which_r_cell(bfr.x.hypot(bfr.y)) as isize;
                k = self.which_z_cell(bfr.z);
            }
        }

        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{Random, DEFAULT_SEED};
    use float_cmp::assert_approx_eq;
    use std::f64::consts::FRAC_PI_2;

    fn unit_spherical_grid() -> SphericalGrid {
        SphericalGrid::new(vec![0.0, 1.0, 2.0], vec![0.0, FRAC_PI_2, PI]).unwrap()
    }

    #[test]
    fn equatorial_plane_must_occur_exactly_once() {
        // polar mesh without the equatorial plane
        let result = SphericalGrid::new(
            vec![0.0, 1.0],
            vec![0.0, 1.0, PI],
        );
        assert!(result.is_err());
        // polar mesh with an odd bin count around pi/2 is fine
        assert!(SphericalGrid::new(vec![0.0, 1.0], linear_mesh(0.0, PI, 4)).is_ok());
    }

    #[test]
    fn ray_from_origin_along_x() {
        let grid = unit_spherical_grid();
        let path = grid.path(Position::new(0.0, 0.0, 0.0), Direction::new(1.0, 0.0, 0.0));
        let segments = path.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].cell, 1);
        assert_approx_eq!(f64, segments[0].ds, 1.0, epsilon = 1e-9);
        assert_eq!(segments[1].cell, 3);
        assert_approx_eq!(f64, segments[1].ds, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn ray_entering_from_outside() {
        let grid = unit_spherical_grid();
        let path = grid.path(Position::new(3.0, 0.0, 0.0), Direction::new(-1.0, 0.0, 0.0));
        let segments = path.segments();
        assert_eq!(segments[0].cell, -1);
        assert_approx_eq!(f64, segments[0].ds, 1.0, epsilon = 1e-9);
        assert_eq!(segments[1].cell, 3);
        assert_approx_eq!(f64, segments[1].ds, 1.0, epsilon = 1e-8);
        assert_eq!(segments[2].cell, 1);
        assert_approx_eq!(f64, segments[2].ds, 2.0, epsilon = 1e-8);
        // the diametrical chord covers the full sphere
        assert_approx_eq!(f64, path.interior_length(), 4.0, epsilon = 1e-8);
    }

    #[test]
    fn ray_missing_the_grid_is_empty() {
        let grid = unit_spherical_grid();
        let path = grid.path(Position::new(3.0, 0.0, 0.0), Direction::new(0.0, 1.0, 0.0));
        assert!(path.is_empty());
        let path = grid.path(Position::new(3.0, 2.5, 0.0), Direction::new(-1.0, 0.0, 0.0));
        assert!(path.is_empty());
    }

    #[test]
    fn chord_length_matches_interior_sum() {
        let grid = SphericalGrid::new(
            zero_log_mesh(0.1, 7.0, 20),
            linear_mesh(0.0, PI, 10),
        )
        .unwrap();
        let mut random = Random::new(DEFAULT_SEED, 0);
        for _ in 0..2000 {
            // a ray from outside aimed at a random interior point
            let target = grid.random_position_in_cell(
                (random.uniform() * grid.cell_count() as f64) as usize,
                &mut random,
            );
            let origin = Position::from(random.direction().to_vec() * 20.0);
            let delta = target.to_vec() - origin.to_vec();
            let direction = Direction::new(delta.x, delta.y, delta.z);
            let path = grid.path(origin, direction);
            assert!(!path.is_empty());

            // the chord through the outer sphere has length 2 sqrt(rmax^2 - p^2)
            // where p is the impact parameter of the ray
            let p2 = Vec3::cross(origin.to_vec(), direction.to_vec()).norm2();
            let chord = 2.0 * (grid.outer_radius().powi(2) - p2).sqrt();
            assert_approx_eq!(
                f64,
                path.interior_length(),
                chord,
                epsilon = 1e-9 * grid.outer_radius()
            );
        }
    }

    #[test]
    fn starting_on_a_boundary_yields_segments() {
        let grid = unit_spherical_grid();
        let path = grid.path(Position::new(2.0, 0.0, 0.0), Direction::new(-1.0, 0.0, 0.0));
        assert!(!path.is_empty());
        assert_approx_eq!(f64, path.interior_length(), 4.0, epsilon = 1e-8);

        let path = grid.path(Position::new(1.0, 0.0, 0.0), Direction::new(1.0, 0.0, 0.0));
        assert!(!path.is_empty());
        assert_approx_eq!(f64, path.interior_length(), 1.0, epsilon = 1e-8);
    }

    #[test]
    fn origin_start_lands_in_matching_theta_bucket() {
        let grid = SphericalGrid::new(vec![0.0, 1.0], linear_mesh(0.0, PI, 4)).unwrap();
        // direction near the pole: theta bucket 0
        let path = grid.path(Position::new(0.0, 0.0, 0.0), Direction::new(0.1, 0.0, 1.0));
        assert_eq!(path.segments()[0].cell, 0);
        // direction near the negative pole: theta bucket 3
        let path = grid.path(Position::new(0.0, 0.0, 0.0), Direction::new(0.1, 0.0, -1.0));
        assert_eq!(path.segments()[0].cell, 3);
    }

    #[test]
    fn equatorial_linear_branch_matches_near_degenerate_cone() {
        let grid = unit_spherical_grid();
        let bfr = Vec3::new(0.3, -0.2, 0.4);
        let bfk = Direction::new(0.1, 0.25, -1.0).to_vec();
        let exact = first_intersection_cone(bfr, bfk, 0.0);
        let nearly = first_intersection_cone(bfr, bfk, 1e-12);
        assert_approx_eq!(f64, exact, nearly, epsilon = 1e-8 * grid.outer_radius());
    }

    #[test]
    fn spherical_volumes_sum_to_grid_volume() {
        let grid = SphericalGrid::new(
            power_mesh(3.0, 10.0, 15),
            linear_mesh(0.0, PI, 8),
        )
        .unwrap();
        let total: f64 = (0..grid.cell_count()).map(|m| grid.volume(m)).sum();
        let expected = 4.0 / 3.0 * PI * 27.0;
        assert_approx_eq!(f64, total, expected, epsilon = 1e-12 * expected);
    }

    #[test]
    fn spherical_cell_samples_stay_in_cell() {
        let grid = SphericalGrid::new(
            zero_log_mesh(0.5, 4.0, 6),
            linear_mesh(0.0, PI, 6),
        )
        .unwrap();
        let mut random = Random::new(DEFAULT_SEED, 1);
        for m in 0..grid.cell_count() {
            for _ in 0..200 {
                let pos = grid.random_position_in_cell(m, &mut random);
                assert_eq!(grid.cell_index(pos), m as i32);
            }
        }
    }

    fn unit_cylindrical_grid() -> CylindricalGrid {
        CylindricalGrid::new(vec![0.0, 1.0], vec![-1.0, 0.0, 1.0]).unwrap()
    }

    #[test]
    fn axial_ray_through_cylindrical_grid() {
        let grid = unit_cylindrical_grid();
        let path = grid.path(Position::new(0.0, 0.0, -2.0), Direction::new(0.0, 0.0, 1.0));
        let segments = path.segments();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].cell, -1);
        assert_approx_eq!(f64, segments[0].ds, 1.0, epsilon = 1e-9);
        assert_eq!(segments[1].cell, 0);
        assert_approx_eq!(f64, segments[1].ds, 1.0, epsilon = 1e-8);
        assert_eq!(segments[2].cell, 1);
        assert_approx_eq!(f64, segments[2].ds, 1.0, epsilon = 1e-8);
    }

    #[test]
    fn radial_ray_through_cylindrical_grid() {
        let grid = CylindricalGrid::new(vec![0.0, 1.0, 2.0], vec![-1.0, 0.0, 1.0]).unwrap();
        let path = grid.path(Position::new(-3.0, 0.0, 0.5), Direction::new(1.0, 0.0, 0.0));
        let segments = path.segments();
        assert_eq!(segments[0].cell, -1);
        assert_approx_eq!(f64, segments[0].ds, 1.0, epsilon = 1e-9);
        // crosses cells (1,1), (0,1), (0,1) mirrored, (1,1) mirrored
        assert_approx_eq!(f64, path.interior_length(), 4.0, epsilon = 1e-8);
        assert_eq!(segments[1].cell, 3);
        assert_eq!(segments[2].cell, 1);
    }

    #[test]
    fn cylindrical_volumes_sum_to_grid_volume() {
        let grid = CylindricalGrid::new(
            power_mesh(2.0, 5.0, 12),
            symmetric_mesh(1.5, 9),
        )
        .unwrap();
        let total: f64 = (0..grid.cell_count()).map(|m| grid.volume(m)).sum();
        let expected = PI * 4.0 * 3.0;
        assert_approx_eq!(f64, total, expected, epsilon = 1e-12 * expected);
    }

    #[test]
    fn cylindrical_cell_samples_stay_in_cell() {
        let grid = CylindricalGrid::new(
            zero_log_mesh(0.2, 2.0, 5),
            symmetric_mesh(1.0, 4),
        )
        .unwrap();
        let mut random = Random::new(DEFAULT_SEED, 2);
        for m in 0..grid.cell_count() {
            for _ in 0..200 {
                let pos = grid.random_position_in_cell(m, &mut random);
                assert_eq!(grid.cell_index(pos), m as i32);
            }
        }
    }

    #[test]
    fn cylindrical_ray_missing_the_grid_is_empty() {
        let grid = unit_cylindrical_grid();
        let path = grid.path(Position::new(5.0, 0.0, 0.0), Direction::new(0.0, 1.0, 0.0));
        assert!(path.is_empty());
        let path = grid.path(Position::new(0.0, 0.0, 5.0), Direction::new(0.0, 0.0, 1.0));
        assert!(path.is_empty());
    }

    #[test]
    fn mesh_builders_produce_expected_boundaries() {
        let mesh = linear_mesh(0.0, 2.0, 4);
        assert_eq!(mesh, vec![0.0, 0.5, 1.0, 1.5, 2.0]);

        let mesh = zero_log_mesh(1.0, 100.0, 3);
        assert_eq!(mesh.len(), 4);
        assert_eq!(mesh[0], 0.0);
        assert_approx_eq!(f64, mesh[1], 1.0, epsilon = 1e-12);
        assert_approx_eq!(f64, mesh[2], 10.0, epsilon = 1e-10);
        assert_approx_eq!(f64, mesh[3], 100.0, epsilon = 1e-10);

        let mesh = power_mesh(1.0, 1.0, 5);
        assert_approx_eq!(f64, mesh[1] - mesh[0], 0.2, epsilon = 1e-12);

        let mesh = power_mesh(1.0, 8.0, 4);
        // the width ratio between the outermost and innermost bin is 8
        let first = mesh[1] - mesh[0];
        let last = mesh[4] - mesh[3];
        assert_approx_eq!(f64, last / first, 8.0, epsilon = 1e-9);
        assert_approx_eq!(f64, mesh[4], 1.0, epsilon = 1e-12);

        let mesh = symmetric_power_mesh(2.0, 4.0, 6);
        assert_eq!(mesh.len(), 7);
        assert_eq!(mesh[3], 0.0);
        assert_approx_eq!(f64, mesh[0], -2.0, epsilon = 1e-12);
        assert_approx_eq!(f64, mesh[6], 2.0, epsilon = 1e-12);
        // mirror symmetry and outward-growing widths
        assert_approx_eq!(f64, mesh[1], -mesh[5], epsilon = 1e-12);
        assert!(mesh[4] - mesh[3] < mesh[6] - mesh[5]);
    }
}
