//! Geometry primitives: three-component vectors, positions with
//! cartesian, cylindrical and spherical decompositions, and unit-norm
//! directions.

use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// A vector in three-dimensional euclidean space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    /// Cartesian x component.
    pub x: f64,
    /// Cartesian y component.
    pub y: f64,
    /// Cartesian z component.
    pub z: f64,
}

impl Vec3 {
    /// Constructor from cartesian components.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Returns the scalar product of the two vectors.
    #[must_use]
    pub fn dot(a: Self, b: Self) -> f64 {
        a.x * b.x + a.y * b.y + a.z * b.z
    }

    /// Returns the vector product of the two vectors.
    #[must_use]
    pub fn cross(a: Self, b: Self) -> Self {
        Self::new(
            a.y * b.z - a.z * b.y,
            a.z * b.x - a.x * b.z,
            a.x * b.y - a.y * b.x,
        )
    }

    /// Returns the squared norm of the vector.
    #[must_use]
    pub fn norm2(self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// Returns the norm of the vector.
    #[must_use]
    pub fn norm(self) -> f64 {
        self.norm2().sqrt()
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// A point in space. The internal representation is cartesian; the
/// cylindrical and spherical decompositions are computed on demand.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Position(Vec3);

impl Position {
    /// Constructor from cartesian coordinates.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self(Vec3::new(x, y, z))
    }

    /// Constructor from cylindrical coordinates `(R, φ, z)`.
    #[must_use]
    pub fn from_cylindrical(big_r: f64, phi: f64, z: f64) -> Self {
        Self(Vec3::new(big_r * phi.cos(), big_r * phi.sin(), z))
    }

    /// Constructor from spherical coordinates `(r, θ, φ)`.
    #[must_use]
    pub fn from_spherical(r: f64, theta: f64, phi: f64) -> Self {
        let (sintheta, costheta) = theta.sin_cos();
        let (sinphi, cosphi) = phi.sin_cos();
        Self(Vec3::new(
            r * sintheta * cosphi,
            r * sintheta * sinphi,
            r * costheta,
        ))
    }

    /// Returns the cartesian coordinates `(x, y, z)`.
    #[must_use]
    pub const fn cartesian(self) -> (f64, f64, f64) {
        (self.0.x, self.0.y, self.0.z)
    }

    /// Returns the cylindrical coordinates `(R, φ, z)`.
    #[must_use]
    pub fn cylindrical(self) -> (f64, f64, f64) {
        let big_r = self.0.x.hypot(self.0.y);
        let phi = self.0.y.atan2(self.0.x);
        (big_r, phi, self.0.z)
    }

    /// Returns the spherical coordinates `(r, θ, φ)`. For the origin the
    /// angles are zero.
    #[must_use]
    pub fn spherical(self) -> (f64, f64, f64) {
        let r = self.0.norm();
        if r == 0.0 {
            return (0.0, 0.0, 0.0);
        }
        let theta = (self.0.z / r).clamp(-1.0, 1.0).acos();
        let phi = self.0.y.atan2(self.0.x);
        (r, theta, phi)
    }

    /// Returns the x coordinate.
    #[must_use]
    pub const fn x(self) -> f64 {
        self.0.x
    }

    /// Returns the y coordinate.
    #[must_use]
    pub const fn y(self) -> f64 {
        self.0.y
    }

    /// Returns the z coordinate.
    #[must_use]
    pub const fn z(self) -> f64 {
        self.0.z
    }

    /// Returns the cylindrical radius `R = √(x²+y²)`.
    #[must_use]
    pub fn cylindrical_radius(self) -> f64 {
        self.0.x.hypot(self.0.y)
    }

    /// Returns the position as a plain vector from the origin.
    #[must_use]
    pub const fn to_vec(self) -> Vec3 {
        self.0
    }

    /// Returns the squared distance from the origin.
    #[must_use]
    pub fn norm2(self) -> f64 {
        self.0.norm2()
    }

    /// Returns the distance from the origin.
    #[must_use]
    pub fn norm(self) -> f64 {
        self.0.norm()
    }

    /// Returns the position shifted over `distance` along `direction`.
    #[must_use]
    pub fn shifted(self, direction: Direction, distance: f64) -> Self {
        Self(self.0 + direction.to_vec() * distance)
    }
}

impl From<Vec3> for Position {
    fn from(v: Vec3) -> Self {
        Self(v)
    }
}

/// A direction in space, guaranteed to have unit norm within 1e-12.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Direction(Vec3);

impl Direction {
    /// Constructor from cartesian components; the result is normalized.
    ///
    /// # Panics
    ///
    /// Panics if the components are all zero.
    #[must_use]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        let v = Vec3::new(x, y, z);
        let norm = v.norm();
        assert!(norm > 0.0, "a direction must have a nonzero norm");
        Self(v * (1.0 / norm))
    }

    /// Constructor from the spherical angles `(θ, φ)`.
    #[must_use]
    pub fn from_angles(theta: f64, phi: f64) -> Self {
        let (sintheta, costheta) = theta.sin_cos();
        let (sinphi, cosphi) = phi.sin_cos();
        Self(Vec3::new(
            sintheta * cosphi,
            sintheta * sinphi,
            costheta,
        ))
    }

    /// Returns the cartesian components `(kx, ky, kz)`.
    #[must_use]
    pub const fn cartesian(self) -> (f64, f64, f64) {
        (self.0.x, self.0.y, self.0.z)
    }

    /// Returns the x component.
    #[must_use]
    pub const fn x(self) -> f64 {
        self.0.x
    }

    /// Returns the y component.
    #[must_use]
    pub const fn y(self) -> f64 {
        self.0.y
    }

    /// Returns the z component.
    #[must_use]
    pub const fn z(self) -> f64 {
        self.0.z
    }

    /// Returns the direction as a plain unit vector.
    #[must_use]
    pub const fn to_vec(self) -> Vec3 {
        self.0
    }

    /// Returns the reversed direction.
    #[must_use]
    pub fn reversed(self) -> Self {
        Self(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn coordinate_round_trips() {
        let pos = Position::from_spherical(2.0, FRAC_PI_2, PI / 4.0);
        let (r, theta, phi) = pos.spherical();
        assert_approx_eq!(f64, r, 2.0, epsilon = 1e-12);
        assert_approx_eq!(f64, theta, FRAC_PI_2, epsilon = 1e-12);
        assert_approx_eq!(f64, phi, PI / 4.0, epsilon = 1e-12);

        let pos = Position::from_cylindrical(3.0, PI / 6.0, -1.0);
        let (big_r, phi, z) = pos.cylindrical();
        assert_approx_eq!(f64, big_r, 3.0, epsilon = 1e-12);
        assert_approx_eq!(f64, phi, PI / 6.0, epsilon = 1e-12);
        assert_approx_eq!(f64, z, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn direction_has_unit_norm() {
        let dir = Direction::new(1.0, 2.0, 3.0);
        assert_approx_eq!(f64, dir.to_vec().norm(), 1.0, epsilon = 1e-12);

        let dir = Direction::from_angles(0.3, 1.2);
        assert_approx_eq!(f64, dir.to_vec().norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn spherical_origin_is_well_defined() {
        let (r, theta, phi) = Position::new(0.0, 0.0, 0.0).spherical();
        assert_eq!(r, 0.0);
        assert_eq!(theta, 0.0);
        assert_eq!(phi, 0.0);
    }

    #[test]
    fn cross_product_is_orthogonal() {
        let a = Vec3::new(1.0, 0.5, -0.3);
        let b = Vec3::new(-0.2, 1.0, 0.7);
        let c = Vec3::cross(a, b);
        assert_approx_eq!(f64, Vec3::dot(a, c), 0.0, epsilon = 1e-12);
        assert_approx_eq!(f64, Vec3::dot(b, c), 0.0, epsilon = 1e-12);
    }
}
