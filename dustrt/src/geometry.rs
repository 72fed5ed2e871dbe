//! Analytical density geometries.
//!
//! Every geometry describes a density distribution that is normalized to
//! unit total mass by construction, can draw random positions
//! distributed according to that density, and exposes the line integrals
//! of the density through the origin along the principal axes.

use crate::error::{Error, Result};
use crate::random::Random;
use crate::special::{self, SersicFunction};
use crate::vec3::{Direction, Position};
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A normalized density distribution over three-dimensional space.
///
/// New geometries plug into the engine by implementing this trait; the
/// dust system and the stellar system only ever see the trait.
pub trait Geometry: Send + Sync {
    /// Returns the density at the specified position. The density is
    /// non-negative and integrates to one over all space.
    fn density(&self, position: Position) -> f64;

    /// Draws a random position distributed according to the density.
    fn generate_position(&self, random: &mut Random) -> Position;

    /// Returns the X-axis surface density `∫ ρ dx` through the origin.
    fn sigma_x(&self) -> f64;

    /// Returns the Y-axis surface density `∫ ρ dy` through the origin.
    fn sigma_y(&self) -> f64;

    /// Returns the Z-axis surface density `∫ ρ dz` through the origin.
    fn sigma_z(&self) -> f64;
}

/// A spherically symmetric density distribution, described by its radial
/// profile alone.
pub trait SphericalGeometry: Send + Sync {
    /// Returns the density at radius `r`.
    fn density_r(&self, r: f64) -> f64;

    /// Draws a random radius from the radial mass distribution.
    fn random_radius(&self, random: &mut Random) -> f64;

    /// Returns the radial surface density `∫_0^∞ ρ(r) dr`.
    fn sigma_r(&self) -> f64;
}

fn isotropic_position(r: f64, random: &mut Random) -> Position {
    let costheta = 2.0 * random.uniform() - 1.0;
    let theta = costheta.clamp(-1.0, 1.0).acos();
    let phi = 2.0 * PI * random.uniform();
    Position::from_spherical(r, theta, phi)
}

// The spherical and axisymmetric helper traits supply the full Geometry
// surface through these impls, so each concrete family only spells out
// its own profile and sampler.
macro_rules! impl_geometry_for_spherical {
    ($type:ty) => {
        impl Geometry for $type {
            fn density(&self, position: Position) -> f64 {
                self.density_r(position.norm())
            }

            fn generate_position(&self, random: &mut Random) -> Position {
                isotropic_position(self.random_radius(random), random)
            }

            fn sigma_x(&self) -> f64 {
                2.0 * self.sigma_r()
            }

            fn sigma_y(&self) -> f64 {
                2.0 * self.sigma_r()
            }

            fn sigma_z(&self) -> f64 {
                2.0 * self.sigma_r()
            }
        }
    };
}

/// An axisymmetric density distribution described in cylindrical
/// coordinates.
pub trait AxialGeometry: Send + Sync {
    /// Returns the density at cylindrical radius `R` and height `z`.
    fn density_rz(&self, big_r: f64, z: f64) -> f64;

    /// Draws a random position from the distribution.
    fn generate_axial_position(&self, random: &mut Random) -> Position;

    /// Returns the radial surface density `∫_0^∞ ρ(R, 0) dR`.
    fn sigma_big_r(&self) -> f64;

    /// Returns the axial surface density `∫_{-∞}^{∞} ρ(0, z) dz`.
    fn sigma_axial(&self) -> f64;
}

macro_rules! impl_geometry_for_axial {
    ($type:ty) => {
        impl Geometry for $type {
            fn density(&self, position: Position) -> f64 {
                self.density_rz(position.cylindrical_radius(), position.z())
            }

            fn generate_position(&self, random: &mut Random) -> Position {
                self.generate_axial_position(random)
            }

            fn sigma_x(&self) -> f64 {
                2.0 * self.sigma_big_r()
            }

            fn sigma_y(&self) -> f64 {
                2.0 * self.sigma_big_r()
            }

            fn sigma_z(&self) -> f64 {
                self.sigma_axial()
            }
        }
    };
}

////////////////////////////////////////////////////////////////////

/// A spherical shell with a power-law density `ρ ∝ r^{-p}` between an
/// inner and an outer radius.
pub struct ShellGeometry {
    rmin: f64,
    rmax: f64,
    p: f64,
    // cached values
    smin: f64,
    sdiff: f64,
    a: f64,
}

impl ShellGeometry {
    /// Constructor; validates the property values.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a radius or the exponent is out
    /// of range.
    pub fn new(rmin: f64, rmax: f64, p: f64) -> Result<Self> {
        if rmin <= 0.0 {
            return Err(Error::Config(
                "the inner radius of the shell should be positive".to_owned(),
            ));
        }
        if rmax <= rmin {
            return Err(Error::Config(
                "the outer radius of the shell should be larger than the inner radius".to_owned(),
            ));
        }
        if p < 0.0 {
            return Err(Error::Config(
                "the power law exponent p should be positive".to_owned(),
            ));
        }
        let smin = special::gln(p - 2.0, rmin);
        let sdiff = special::gln2(p - 2.0, rmax, rmin);
        let a = 0.25 / PI / sdiff;
        Ok(Self {
            rmin,
            rmax,
            p,
            smin,
            sdiff,
            a,
        })
    }
}

impl SphericalGeometry for ShellGeometry {
    fn density_r(&self, r: f64) -> f64 {
        if r < self.rmin || r > self.rmax {
            0.0
        } else {
            self.a * r.powf(-self.p)
        }
    }

    fn random_radius(&self, random: &mut Random) -> f64 {
        let s = self.smin + random.uniform() * self.sdiff;
        special::gexp(self.p - 2.0, s)
    }

    fn sigma_r(&self) -> f64 {
        self.a * special::gln2(self.p, self.rmax, self.rmin)
    }
}

impl_geometry_for_spherical!(ShellGeometry);

////////////////////////////////////////////////////////////////////

/// A spherical Sersic distribution with index `n` and effective radius
/// `r_eff`.
pub struct SersicGeometry {
    n: f64,
    reff: f64,
    rho0: f64,
    b: f64,
    function: SersicFunction,
}

impl SersicGeometry {
    /// Constructor; validates the property values and tabulates the
    /// profile.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the index or the radius is out
    /// of range.
    pub fn new(n: f64, reff: f64) -> Result<Self> {
        if n <= 0.5 || n > 10.0 {
            return Err(Error::Config(
                "the Sersic index n should be between 0.5 and 10".to_owned(),
            ));
        }
        if reff <= 0.0 {
            return Err(Error::Config(
                "the effective radius should be positive".to_owned(),
            ));
        }
        Ok(Self {
            n,
            reff,
            rho0: 1.0 / (reff * reff * reff),
            b: special::sersic_b(n),
            function: SersicFunction::new(n),
        })
    }
}

impl SphericalGeometry for SersicGeometry {
    fn density_r(&self, r: f64) -> f64 {
        self.rho0 * self.function.density(r / self.reff)
    }

    fn random_radius(&self, random: &mut Random) -> f64 {
        self.reff * self.function.inverse_mass(random.uniform())
    }

    fn sigma_r(&self) -> f64 {
        1.0 / (self.reff * self.reff) * self.b.powf(2.0 * self.n)
            / (2.0 * PI * special::gamma(2.0 * self.n + 1.0))
    }
}

impl_geometry_for_spherical!(SersicGeometry);

////////////////////////////////////////////////////////////////////

/// A dusty torus: `ρ ∝ r^{-p} exp(-q |cos θ|)` within the half opening
/// angle `Δ` around the equatorial plane, between an inner and an outer
/// radius. The inner radius can optionally vary with polar angle to
/// model anisotropic central heating.
pub struct TorusGeometry {
    p: f64,
    q: f64,
    rmin: f64,
    rmax: f64,
    aniso_radius: bool,
    rcut: f64,
    // cached values
    sin_delta: f64,
    smin: f64,
    sdiff: f64,
    a: f64,
}

impl TorusGeometry {
    /// Constructor; validates the property values.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when an exponent, an angle or a
    /// radius is out of range.
    pub fn new(
        p: f64,
        q: f64,
        delta: f64,
        rmin: f64,
        rmax: f64,
        aniso_radius: bool,
        rcut: f64,
    ) -> Result<Self> {
        if p < 0.0 {
            return Err(Error::Config(
                "the radial power law exponent p of the torus should be positive".to_owned(),
            ));
        }
        if q < 0.0 {
            return Err(Error::Config(
                "the polar index q of the torus should be positive".to_owned(),
            ));
        }
        if delta < 0.0 {
            return Err(Error::Config(
                "the half opening angle of the torus should be positive".to_owned(),
            ));
        }
        if rmin <= 0.0 {
            return Err(Error::Config(
                "the minimum radius of the torus should be positive".to_owned(),
            ));
        }
        if rmax <= rmin {
            return Err(Error::Config(
                "the maximum radius of the torus should be larger than the minimum radius"
                    .to_owned(),
            ));
        }
        if aniso_radius && rcut <= 0.0 {
            return Err(Error::Config(
                "the inner cutoff radius of the torus should be positive".to_owned(),
            ));
        }

        let sin_delta = delta.sin();
        let smin = special::gln(p - 2.0, rmin);
        let sdiff = special::gln2(p - 2.0, rmax, rmin);
        let a = if q > 1e-3 {
            q * 0.25 / PI / sdiff / (1.0 - (-q * sin_delta).exp())
        } else {
            0.25 / PI / sdiff / sin_delta
        };
        Ok(Self {
            p,
            q,
            rmin,
            rmax,
            aniso_radius,
            rcut,
            sin_delta,
            smin,
            sdiff,
            a,
        })
    }
}

impl AxialGeometry for TorusGeometry {
    fn density_rz(&self, big_r: f64, z: f64) -> f64 {
        let r = big_r.hypot(z);
        if r == 0.0 || r >= self.rmax {
            return 0.0;
        }
        let costheta = z / r;
        if self.aniso_radius {
            let rminani =
                self.rmin * (6.0 / 7.0 * costheta.abs() * (2.0 * costheta.abs() + 1.0)).sqrt();
            if r <= rminani || r < self.rcut {
                return 0.0;
            }
        } else if r <= self.rmin {
            return 0.0;
        }
        if costheta.abs() >= self.sin_delta {
            return 0.0;
        }
        self.a * r.powf(-self.p) * (-self.q * costheta.abs()).exp()
    }

    fn generate_axial_position(&self, random: &mut Random) -> Position {
        let s = self.smin + random.uniform() * self.sdiff;
        let r = special::gexp(self.p - 2.0, s);
        let x = random.uniform();
        let costheta = if self.q < 1e-3 {
            (1.0 - 2.0 * x) * self.sin_delta
        } else {
            let b = 1.0 - (-self.q * self.sin_delta).exp();
            if x < 0.5 {
                -(1.0 - b * (1.0 - 2.0 * x)).ln() / self.q
            } else {
                (1.0 - b * (2.0 * x - 1.0)).ln() / self.q
            }
        };
        let theta = costheta.clamp(-1.0, 1.0).acos();
        let phi = 2.0 * PI * random.uniform();
        Position::from_spherical(r, theta, phi)
    }

    fn sigma_big_r(&self) -> f64 {
        self.a * special::gln2(self.p, self.rmax, self.rmin)
    }

    fn sigma_axial(&self) -> f64 {
        0.0
    }
}

impl_geometry_for_axial!(TorusGeometry);

////////////////////////////////////////////////////////////////////

/// The passive disk of a T Tauri star:
/// `ρ ∝ (R/R_d)^{-1} exp(-π/4 (z/h(R))²)` with a flaring scale height
/// `h(R) = z_d (R/R_d)^{9/8}` between an inner and an outer radius.
pub struct TTauriDiskGeometry {
    rinn: f64,
    rout: f64,
    rd: f64,
    zd: f64,
    rho0: f64,
}

impl TTauriDiskGeometry {
    /// Constructor; validates the property values.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a radius or a scale is out of
    /// range.
    pub fn new(rinn: f64, rout: f64, rd: f64, zd: f64) -> Result<Self> {
        if rinn <= 0.0 {
            return Err(Error::Config(
                "the inner radius of the disk should be positive".to_owned(),
            ));
        }
        if rout <= rinn {
            return Err(Error::Config(
                "the outer radius of the disk must be larger than the inner radius".to_owned(),
            ));
        }
        if rd <= 0.0 {
            return Err(Error::Config(
                "the radial scale length Rd should be positive".to_owned(),
            ));
        }
        if zd <= 0.0 {
            return Err(Error::Config(
                "the axial scale height zd should be positive".to_owned(),
            ));
        }
        let rho0 = 17.0 / 32.0 / PI / (rd * rd * zd)
            / ((rout / rd).powf(17.0 / 8.0) - (rinn / rd).powf(17.0 / 8.0));
        Ok(Self {
            rinn,
            rout,
            rd,
            zd,
            rho0,
        })
    }
}

impl AxialGeometry for TTauriDiskGeometry {
    fn density_rz(&self, big_r: f64, z: f64) -> f64 {
        if big_r < self.rinn || big_r > self.rout {
            return 0.0;
        }
        let h = self.zd * (big_r / self.rd).powf(1.125);
        self.rho0 / (big_r / self.rd) * (-PI / 4.0 * (z / h) * (z / h)).exp()
    }

    fn generate_axial_position(&self, random: &mut Random) -> Position {
        let phi = 2.0 * PI * random.uniform();
        let tinn = self.rinn.powf(2.125);
        let tout = self.rout.powf(2.125);
        let big_r = (tinn + random.uniform() * (tout - tinn)).powf(1.0 / 2.125);
        let h = self.zd * (big_r / self.rd).powf(1.125);
        let sigma = (2.0 / PI).sqrt() * h;
        let z = random.gauss() * sigma;
        Position::from_cylindrical(big_r, phi, z)
    }

    fn sigma_big_r(&self) -> f64 {
        self.rho0 * self.rd * (self.rout / self.rinn).ln()
    }

    fn sigma_axial(&self) -> f64 {
        0.0
    }
}

impl_geometry_for_axial!(TTauriDiskGeometry);

////////////////////////////////////////////////////////////////////

/// A multi-Gaussian expansion: a discrete mixture of anisotropic
/// gaussian components, each with a mass, a dispersion and an intrinsic
/// flattening.
pub struct MgeGeometry {
    massv: Vec<f64>,
    cumulv: Vec<f64>,
    sigmav: Vec<f64>,
    qv: Vec<f64>,
}

impl MgeGeometry {
    /// Constructs the mixture from explicit components `(mass, σ, q)`.
    /// Masses are normalized to unit total; flattenings are the intrinsic
    /// values.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the component list is empty or
    /// a dispersion or flattening is out of range.
    pub fn from_components(components: &[(f64, f64, f64)]) -> Result<Self> {
        if components.is_empty() {
            return Err(Error::Config(
                "the MGE expansion should contain at least one component".to_owned(),
            ));
        }
        for &(mass, sigma, q) in components {
            if mass <= 0.0 || sigma <= 0.0 || q <= 0.0 || q > 1.0 {
                return Err(Error::Config(
                    "each MGE component needs a positive mass and dispersion and a flattening in (0, 1]"
                        .to_owned(),
                ));
            }
        }
        let total: f64 = components.iter().map(|&(mass, _, _)| mass).sum();
        let massv: Vec<f64> = components.iter().map(|&(mass, _, _)| mass / total).collect();
        let mut cumulv = Vec::with_capacity(massv.len());
        let mut cumulative = 0.0;
        for &mass in &massv {
            cumulative += mass;
            cumulv.push(cumulative);
        }
        Ok(Self {
            massv,
            cumulv,
            sigmav: components.iter().map(|&(_, sigma, _)| sigma).collect(),
            qv: components.iter().map(|&(_, _, q)| q).collect(),
        })
    }

    /// Reads the raw MGE expansion from a whitespace-separated file with
    /// one `mass dispersion flattening` triple per line, converts the
    /// dispersions from pixels to physical scale, and deprojects the
    /// apparent flattenings for the given inclination (Bacon 1985).
    ///
    /// # Errors
    ///
    /// Returns a resource error when the file cannot be read, and a
    /// configuration error when a value is out of range.
    pub fn from_file(path: &Path, pixelscale: f64, inclination: f64) -> Result<Self> {
        if pixelscale <= 0.0 {
            return Err(Error::Config(
                "the pixel scale of the MGE-expanded image should be positive".to_owned(),
            ));
        }
        if !(0.0..=PI / 2.0).contains(&inclination) {
            return Err(Error::Config(
                "the inclination should be between 0 and 90 degrees".to_owned(),
            ));
        }

        let file = File::open(path).map_err(|err| Error::Resource {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;
        log::info!("Reading MGE expansion data from file {}...", path.display());

        let cosi = inclination.cos();
        let sini = inclination.sin();
        let mut components = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|err| Error::Resource {
                path: path.to_owned(),
                reason: err.to_string(),
            })?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() != 3 {
                return Err(Error::Resource {
                    path: path.to_owned(),
                    reason: format!("expected 3 fields per line, found {}", fields.len()),
                });
            }
            let mass: f64 = parse_field(fields[0], path)?;
            let sigma: f64 = parse_field(fields[1], path)?;
            let q: f64 = parse_field(fields[2], path)?;
            // deproject the apparent flattening to the intrinsic one
            let q2 = (q - cosi) * (q + cosi);
            if q2 <= 0.0 {
                return Err(Error::Config(format!(
                    "the apparent flattening {q} cannot be deprojected for this inclination"
                )));
            }
            components.push((mass, sigma * pixelscale, q2.sqrt() / sini));
        }
        Self::from_components(&components)
    }
}

fn parse_field(field: &str, path: &Path) -> Result<f64> {
    field.parse().map_err(|_| Error::Resource {
        path: path.to_owned(),
        reason: format!("invalid numeric field '{field}'"),
    })
}

impl AxialGeometry for MgeGeometry {
    fn density_rz(&self, big_r: f64, z: f64) -> f64 {
        let mut rho = 0.0;
        for i in 0..self.massv.len() {
            let q = self.qv[i];
            let sigma = self.sigmav[i];
            let rho0 = self.massv[i] / ((2.0 * PI).sqrt() * sigma).powi(3) / q;
            let m2 = big_r * big_r + z * z / (q * q);
            rho += rho0 * (-0.5 * m2 / (sigma * sigma)).exp();
        }
        rho
    }

    fn generate_axial_position(&self, random: &mut Random) -> Position {
        let x = random.uniform();
        let i = self
            .cumulv
            .iter()
            .position(|&cumulative| x <= cumulative)
            .unwrap_or(self.cumulv.len() - 1);
        let sigma = self.sigmav[i];
        let q = self.qv[i];
        Position::new(
            sigma * random.gauss(),
            sigma * random.gauss(),
            q * sigma * random.gauss(),
        )
    }

    fn sigma_big_r(&self) -> f64 {
        let mut sum = 0.0;
        for i in 0..self.massv.len() {
            sum += self.massv[i] / (4.0 * PI) / (self.sigmav[i] * self.sigmav[i]) / self.qv[i];
        }
        sum
    }

    fn sigma_axial(&self) -> f64 {
        let mut sum = 0.0;
        for i in 0..self.massv.len() {
            sum += self.massv[i] / (2.0 * PI) / (self.sigmav[i] * self.sigmav[i]);
        }
        sum
    }
}

impl_geometry_for_axial!(MgeGeometry);

////////////////////////////////////////////////////////////////////

/// Decorator that flattens a spherical geometry into a spheroid by
/// scaling the z axis with a flattening parameter `q`.
pub struct SpheroidalGeometry {
    geometry: Box<dyn SphericalGeometry>,
    q: f64,
}

impl SpheroidalGeometry {
    /// Constructor; validates the flattening parameter.
    ///
    /// # Errors
    ///
    /// Returns a configuration error unless `0 < q ≤ 1`.
    pub fn new(geometry: Box<dyn SphericalGeometry>, q: f64) -> Result<Self> {
        if q <= 0.0 || q > 1.0 {
            return Err(Error::Config(
                "the flattening parameter q should be between 0 and 1".to_owned(),
            ));
        }
        Ok(Self { geometry, q })
    }
}

impl AxialGeometry for SpheroidalGeometry {
    fn density_rz(&self, big_r: f64, z: f64) -> f64 {
        let m = (big_r * big_r + z * z / (self.q * self.q)).sqrt();
        self.geometry.density_r(m) / self.q
    }

    fn generate_axial_position(&self, random: &mut Random) -> Position {
        // spheroidal coordinates: x = m sin(tau) cos(phi),
        // y = m sin(tau) sin(phi), z = q m cos(tau)
        let m = self.geometry.random_radius(random);
        let costau = 2.0 * random.uniform() - 1.0;
        let sintau = (1.0 - costau * costau).sqrt();
        let phi = 2.0 * PI * random.uniform();
        Position::new(
            m * sintau * phi.cos(),
            m * sintau * phi.sin(),
            self.q * m * costau,
        )
    }

    fn sigma_big_r(&self) -> f64 {
        self.geometry.sigma_r() / self.q
    }

    fn sigma_axial(&self) -> f64 {
        2.0 * self.geometry.sigma_r()
    }
}

impl_geometry_for_axial!(SpheroidalGeometry);

////////////////////////////////////////////////////////////////////

/// Decorator that rotates an arbitrary geometry over the Z-X-Z Euler
/// angles `(α, β, γ)`.
pub struct RotatedGeometry {
    geometry: Box<dyn Geometry>,
    matrix: [[f64; 3]; 3],
}

impl RotatedGeometry {
    /// Constructor; validates the angles and caches the rotation matrix.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when an angle is out of range.
    pub fn new(geometry: Box<dyn Geometry>, alpha: f64, beta: f64, gamma: f64) -> Result<Self> {
        if !(0.0..=2.0 * PI).contains(&alpha) {
            return Err(Error::Config(
                "the angle alpha should be between 0 and 360 degrees".to_owned(),
            ));
        }
        if !(0.0..=PI).contains(&beta) {
            return Err(Error::Config(
                "the angle beta should be between 0 and 180 degrees".to_owned(),
            ));
        }
        if !(0.0..=2.0 * PI).contains(&gamma) {
            return Err(Error::Config(
                "the angle gamma should be between 0 and 360 degrees".to_owned(),
            ));
        }
        let (sinalpha, cosalpha) = alpha.sin_cos();
        let (sinbeta, cosbeta) = beta.sin_cos();
        let (singamma, cosgamma) = gamma.sin_cos();
        let matrix = [
            [
                cosalpha * cosgamma - sinalpha * cosbeta * singamma,
                sinalpha * cosgamma + cosalpha * cosbeta * singamma,
                sinbeta * singamma,
            ],
            [
                -cosalpha * singamma - sinalpha * cosbeta * cosgamma,
                -sinalpha * singamma + cosalpha * cosbeta * cosgamma,
                sinbeta * cosgamma,
            ],
            [
                sinalpha * sinbeta,
                -cosalpha * sinbeta,
                cosbeta,
            ],
        ];
        Ok(Self { geometry, matrix })
    }

    fn rotate(&self, position: Position) -> Position {
        let (x, y, z) = position.cartesian();
        let m = &self.matrix;
        Position::new(
            m[0][0] * x + m[0][1] * y + m[0][2] * z,
            m[1][0] * x + m[1][1] * y + m[1][2] * z,
            m[2][0] * x + m[2][1] * y + m[2][2] * z,
        )
    }

    fn derotate(&self, position: Position) -> Position {
        // the inverse rotation is the transpose
        let (x, y, z) = position.cartesian();
        let m = &self.matrix;
        Position::new(
            m[0][0] * x + m[1][0] * y + m[2][0] * z,
            m[0][1] * x + m[1][1] * y + m[2][1] * z,
            m[0][2] * x + m[1][2] * y + m[2][2] * z,
        )
    }

    /// Applies the rotation to a direction.
    #[must_use]
    pub fn rotate_direction(&self, direction: Direction) -> Direction {
        let rotated = self.rotate(Position::from(direction.to_vec()));
        let (x, y, z) = rotated.cartesian();
        Direction::new(x, y, z)
    }
}

impl Geometry for RotatedGeometry {
    fn density(&self, position: Position) -> f64 {
        self.geometry.density(self.derotate(position))
    }

    fn generate_position(&self, random: &mut Random) -> Position {
        self.rotate(self.geometry.generate_position(random))
    }

    fn sigma_x(&self) -> f64 {
        self.geometry.sigma_x()
    }

    fn sigma_y(&self) -> f64 {
        self.geometry.sigma_y()
    }

    fn sigma_z(&self) -> f64 {
        self.geometry.sigma_z()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::Random;
    use float_cmp::assert_approx_eq;

    #[test]
    fn shell_rejects_bad_parameters() {
        assert!(ShellGeometry::new(0.0, 2.0, 2.0).is_err());
        assert!(ShellGeometry::new(2.0, 1.0, 2.0).is_err());
        assert!(ShellGeometry::new(1.0, 2.0, -1.0).is_err());
    }

    #[test]
    fn shell_radius_distribution_matches_analytic_cdf() {
        // rho ~ r^-2 on [1, 2]: analytic CDF (1/rmin - 1/r)/(1/rmin - 1/rmax)
        let shell = ShellGeometry::new(1.0, 2.0, 2.0).unwrap();
        let mut random = Random::new(crate::random::DEFAULT_SEED, 0);
        let n = 1_000_000;
        let mut radii: Vec<f64> = (0..n).map(|_| shell.random_radius(&mut random)).collect();
        radii.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let cdf = |r: f64| (1.0 - 1.0 / r) / (1.0 - 0.5);
        let mut ks = 0.0_f64;
        for (i, &r) in radii.iter().enumerate() {
            let empirical = (i + 1) as f64 / n as f64;
            ks = ks.max((empirical - cdf(r)).abs());
        }
        assert!(ks < 0.002, "Kolmogorov-Smirnov statistic {ks} too large");
    }

    #[test]
    fn shell_density_normalizes_to_unit_mass() {
        let shell = ShellGeometry::new(1.0, 2.0, 2.0).unwrap();
        // integrate 4 pi r^2 rho over the shell with the midpoint rule
        let n = 10_000;
        let dr = 1.0 / n as f64;
        let mass: f64 = (0..n)
            .map(|i| {
                let r = 1.0 + (i as f64 + 0.5) * dr;
                4.0 * PI * r * r * shell.density_r(r) * dr
            })
            .sum();
        assert_approx_eq!(f64, mass, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn torus_samples_fall_inside_support() {
        let torus = TorusGeometry::new(1.0, 2.0, 0.5, 1.0, 10.0, false, 0.0).unwrap();
        let mut random = Random::new(crate::random::DEFAULT_SEED, 1);
        for _ in 0..10_000 {
            let pos = torus.generate_axial_position(&mut random);
            let (r, theta, _) = pos.spherical();
            assert!(r >= 1.0 - 1e-9 && r <= 10.0 + 1e-9);
            assert!(theta.cos().abs() <= 0.5f64.sin() + 1e-9);
            assert!(torus.density(pos) > 0.0);
        }
    }

    #[test]
    fn torus_mass_integrates_to_one() {
        let torus = TorusGeometry::new(1.5, 1.0, 0.7, 1.0, 5.0, false, 0.0).unwrap();
        // midpoint rule in (r, costheta)
        let (nr, nc) = (2000, 400);
        let dr = 4.0 / nr as f64;
        let dc = 2.0 / nc as f64;
        let mut mass = 0.0;
        for i in 0..nr {
            let r = 1.0 + (i as f64 + 0.5) * dr;
            for j in 0..nc {
                let costheta: f64 = -1.0 + (j as f64 + 0.5) * dc;
                let sintheta = (1.0 - costheta * costheta).sqrt();
                let rho = torus.density_rz(r * sintheta, r * costheta);
                mass += 2.0 * PI * r * r * rho * dr * dc;
            }
        }
        assert_approx_eq!(f64, mass, 1.0, epsilon = 1e-2);
    }

    #[test]
    fn ttauri_disk_mass_integrates_to_one() {
        let disk = TTauriDiskGeometry::new(0.1, 5.0, 1.0, 0.1).unwrap();
        let (nr, nz) = (2000, 2000);
        let dr = 4.9 / nr as f64;
        let dz = 2.0 / nz as f64;
        let mut mass = 0.0;
        for i in 0..nr {
            let big_r = 0.1 + (i as f64 + 0.5) * dr;
            for j in 0..nz {
                let z = -1.0 + (j as f64 + 0.5) * dz;
                mass += 2.0 * PI * big_r * disk.density_rz(big_r, z) * dr * dz;
            }
        }
        assert_approx_eq!(f64, mass, 1.0, epsilon = 1e-2);
    }

    #[test]
    fn mge_component_choice_is_mass_weighted() {
        let mge =
            MgeGeometry::from_components(&[(3.0, 1.0, 0.8), (1.0, 10.0, 0.5)]).unwrap();
        let mut random = Random::new(crate::random::DEFAULT_SEED, 2);
        let n = 20_000;
        let mut narrow = 0;
        for _ in 0..n {
            let pos = mge.generate_axial_position(&mut random);
            if pos.norm() < 5.0 {
                narrow += 1;
            }
        }
        // 75% of the mass sits in the sigma = 1 component
        let fraction = f64::from(narrow) / f64::from(n);
        assert!(fraction > 0.70 && fraction < 0.85, "fraction {fraction}");
    }

    #[test]
    fn spheroidal_density_relates_to_spherical() {
        let shell = ShellGeometry::new(1.0, 2.0, 0.0).unwrap();
        let reference = shell.density_r(1.5);
        let spheroid =
            SpheroidalGeometry::new(Box::new(ShellGeometry::new(1.0, 2.0, 0.0).unwrap()), 0.5)
                .unwrap();
        // on the equatorial plane m = R
        assert_approx_eq!(
            f64,
            spheroid.density_rz(1.5, 0.0),
            reference / 0.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn rotated_geometry_preserves_marginal_surface_densities() {
        let inner = Box::new(TTauriDiskGeometry::new(0.1, 5.0, 1.0, 0.1).unwrap());
        let reference = TTauriDiskGeometry::new(0.1, 5.0, 1.0, 0.1).unwrap();
        let rotated = RotatedGeometry::new(inner, 0.3, 0.8, 1.2).unwrap();
        assert_approx_eq!(f64, rotated.sigma_x(), reference.sigma_x(), epsilon = 1e-12);
        assert_approx_eq!(f64, rotated.sigma_z(), reference.sigma_z(), epsilon = 1e-12);
    }

    #[test]
    fn rotation_round_trips_density() {
        let inner = Box::new(TTauriDiskGeometry::new(0.1, 5.0, 1.0, 0.1).unwrap());
        let reference = TTauriDiskGeometry::new(0.1, 5.0, 1.0, 0.1).unwrap();
        let rotated = RotatedGeometry::new(inner, 0.3, 0.8, 1.2).unwrap();
        let original = Position::new(1.3, 0.2, 0.05);
        let moved = rotated.rotate(original);
        assert_approx_eq!(
            f64,
            rotated.density(moved),
            reference.density(original),
            epsilon = 1e-12
        );
        // rotations preserve distances
        assert_approx_eq!(f64, moved.norm(), original.norm(), epsilon = 1e-12);
    }

    #[test]
    fn zero_beta_rotation_is_plane_rotation() {
        let inner = Box::new(TTauriDiskGeometry::new(0.1, 5.0, 1.0, 0.1).unwrap());
        let rotated = RotatedGeometry::new(inner, 0.0, 0.0, 0.0).unwrap();
        let pos = Position::new(0.7, -0.4, 0.2);
        let moved = rotated.rotate(pos);
        assert_approx_eq!(f64, moved.x(), pos.x(), epsilon = 1e-12);
        assert_approx_eq!(f64, moved.y(), pos.y(), epsilon = 1e-12);
        assert_approx_eq!(f64, moved.z(), pos.z(), epsilon = 1e-12);
    }
}
