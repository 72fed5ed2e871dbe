//! Polarization state of a photon packet.

/// Describes the polarization state of a photon packet through the four
/// Stokes parameters `I`, `Q`, `U` and `V`. The parameters are
/// normalized to dimensionless values through division by `I`, so `I = 1`
/// at all times and only `(Q, U, V)` are stored.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StokesVector {
    q: f64,
    u: f64,
    v: f64,
}

impl StokesVector {
    /// Constructs an unpolarized Stokes vector.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            q: 0.0,
            u: 0.0,
            v: 0.0,
        }
    }

    /// Resets the Stokes vector to an unpolarized state.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Sets the Stokes vector to the specified parameter values, after
    /// normalizing them through division by `i`. If `i = 0`, the Stokes
    /// vector is set to an unpolarized state.
    pub fn set_stokes(&mut self, i: f64, q: f64, u: f64, v: f64) {
        if i == 0.0 {
            self.clear();
        } else {
            self.q = q / i;
            self.u = u / i;
            self.v = v / i;
        }
    }

    /// Returns the Stokes parameter `I`, which is always equal to one.
    #[must_use]
    pub const fn stokes_i(&self) -> f64 {
        1.0
    }

    /// Returns the Stokes parameter `Q`.
    #[must_use]
    pub const fn stokes_q(&self) -> f64 {
        self.q
    }

    /// Returns the Stokes parameter `U`.
    #[must_use]
    pub const fn stokes_u(&self) -> f64 {
        self.u
    }

    /// Returns the Stokes parameter `V`.
    #[must_use]
    pub const fn stokes_v(&self) -> f64 {
        self.v
    }

    /// Returns the total polarization degree `√(Q²+U²+V²)`.
    #[must_use]
    pub fn total_polarization_degree(&self) -> f64 {
        (self.q * self.q + self.u * self.u + self.v * self.v).sqrt()
    }

    /// Returns the linear polarization degree `√(Q²+U²)`.
    #[must_use]
    pub fn linear_polarization_degree(&self) -> f64 {
        self.q.hypot(self.u)
    }

    /// Returns the polarization position angle in radians.
    #[must_use]
    pub fn polarization_angle(&self) -> f64 {
        if self.u == 0.0 && self.q == 0.0 {
            0.0
        } else {
            0.5 * self.u.atan2(self.q)
        }
    }

    /// Rotates the Stokes vector over the specified angle around the
    /// current flight direction, i.e. applies a 2-D rotation over `2α`
    /// in the `(Q, U)` plane.
    pub fn rotate(&mut self, alpha: f64) {
        let (sinalpha, cosalpha) = (2.0 * alpha).sin_cos();
        let q = cosalpha * self.q - sinalpha * self.u;
        let u = sinalpha * self.q + cosalpha * self.u;
        self.q = q;
        self.u = u;
    }

    /// Transforms the polarization state by applying the Mueller matrix
    /// with the specified coefficients (and zero elements elsewhere).
    pub fn apply_mueller(&mut self, s11: f64, s12: f64, s33: f64, s34: f64) {
        let i = s11 + s12 * self.q;
        let q = s12 + s11 * self.q;
        let u = s33 * self.u + s34 * self.v;
        let v = -s34 * self.u + s33 * self.v;
        self.set_stokes(i, q, u, v);
    }
}
