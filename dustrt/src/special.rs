//! Special functions used by the analytical density geometries: the
//! generalized logarithm and exponential, the Euler gamma function, and
//! the tabulated Sersic profile.

use std::f64::consts::PI;

/// Returns the generalized logarithm `g_p(x)`, defined as
/// `x^(1-p)/(1-p)` for `p ≠ 1` and `ln x` for `p = 1`.
#[must_use]
pub fn gln(p: f64, x: f64) -> f64 {
    if (p - 1.0).abs() < 1e-9 {
        x.ln()
    } else {
        x.powf(1.0 - p) / (1.0 - p)
    }
}

/// Returns the difference `g_p(x1) - g_p(x2)` of generalized logarithms.
#[must_use]
pub fn gln2(p: f64, x1: f64, x2: f64) -> f64 {
    gln(p, x1) - gln(p, x2)
}

/// Returns the generalized exponential, the inverse of [`gln`]:
/// `((1-p)·s)^(1/(1-p))` for `p ≠ 1` and `exp(s)` for `p = 1`.
#[must_use]
pub fn gexp(p: f64, s: f64) -> f64 {
    if (p - 1.0).abs() < 1e-9 {
        s.exp()
    } else {
        ((1.0 - p) * s).powf(1.0 / (1.0 - p))
    }
}

/// Returns the Euler gamma function `Γ(x)` for positive arguments,
/// through the Lanczos approximation (g = 7, n = 9).
#[must_use]
pub fn gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 9] = [
        0.99999999999980993,
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];
    if x < 0.5 {
        // reflection formula keeps the approximation accurate near zero
        return PI / ((PI * x).sin() * gamma(1.0 - x));
    }
    let x = x - 1.0;
    let mut sum = COEFFICIENTS[0];
    for (i, &c) in COEFFICIENTS.iter().enumerate().skip(1) {
        sum += c / (x + i as f64);
    }
    let t = x + 7.5;
    (2.0 * PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * sum
}

/// Returns the dimensionless Sersic parameter `b(n)` through the
/// asymptotic series of Ciotti & Bertin (1999).
#[must_use]
pub fn sersic_b(n: f64) -> f64 {
    2.0 * n - 1.0 / 3.0 + 4.0 / 405.0 / n + 46.0 / 25515.0 / (n * n)
        + 131.0 / 1148175.0 / (n * n * n)
}

/// Tabulated spatial Sersic profile for index `n`, normalized so the
/// total mass equals one when the radius is expressed in units of the
/// effective radius. The spatial density follows the analytical
/// deprojection `ρ(s) ∝ s^{-p_n} exp(-b s^{1/n})` of Lima Neto, Gerbal &
/// Marquez (1999); the cumulative mass profile is tabulated on a
/// logarithmic radius grid and inverted by table lookup.
pub struct SersicFunction {
    sv: Vec<f64>,
    rhov: Vec<f64>,
    massv: Vec<f64>,
}

impl SersicFunction {
    const NPOINTS: usize = 1000;
    const SMIN: f64 = 1e-6;
    const SMAX: f64 = 1e4;

    /// Tabulates the profile for Sersic index `n`.
    #[must_use]
    pub fn new(n: f64) -> Self {
        let b = sersic_b(n);
        let p = 1.0 - 0.6097 / n + 0.05463 / (n * n);
        let logsmin = Self::SMIN.log10();
        let logsmax = Self::SMAX.log10();
        let dlogs = (logsmax - logsmin) / (Self::NPOINTS - 1) as f64;

        let sv: Vec<f64> = (0..Self::NPOINTS)
            .map(|i| 10f64.powf(logsmin + i as f64 * dlogs))
            .collect();
        let mut rhov: Vec<f64> = sv
            .iter()
            .map(|&s| s.powf(-p) * (-b * s.powf(1.0 / n)).exp())
            .collect();

        // cumulative mass by trapezoidal integration of 4 pi rho s^2
        let mut massv = vec![0.0; Self::NPOINTS];
        for i in 1..Self::NPOINTS {
            let f0 = 4.0 * PI * rhov[i - 1] * sv[i - 1] * sv[i - 1];
            let f1 = 4.0 * PI * rhov[i] * sv[i] * sv[i];
            massv[i] = massv[i - 1] + 0.5 * (f0 + f1) * (sv[i] - sv[i - 1]);
        }
        let total = massv[Self::NPOINTS - 1];
        for i in 0..Self::NPOINTS {
            rhov[i] /= total;
            massv[i] /= total;
        }

        Self { sv, rhov, massv }
    }

    /// Returns the normalized density at dimensionless radius `s`.
    #[must_use]
    pub fn density(&self, s: f64) -> f64 {
        if s <= 0.0 {
            return self.rhov[0];
        }
        if s >= Self::SMAX {
            return 0.0;
        }
        let s = s.max(Self::SMIN);
        let index = match self
            .sv
            .binary_search_by(|x| x.partial_cmp(&s).expect("radius grid is finite"))
        {
            Ok(i) => return self.rhov[i],
            Err(i) => i,
        };
        // log-log interpolation between bracketing table points
        let (s0, s1) = (self.sv[index - 1], self.sv[index]);
        let (r0, r1) = (self.rhov[index - 1], self.rhov[index]);
        let fraction = (s / s0).ln() / (s1 / s0).ln();
        r0 * (r1 / r0).powf(fraction)
    }

    /// Returns the radius within which the specified mass fraction
    /// `x ∈ [0, 1)` is enclosed.
    #[must_use]
    pub fn inverse_mass(&self, x: f64) -> f64 {
        let index = match self
            .massv
            .binary_search_by(|m| m.partial_cmp(&x).expect("mass profile is finite"))
        {
            Ok(i) => return self.sv[i],
            Err(i) => i.clamp(1, Self::NPOINTS - 1),
        };
        let (m0, m1) = (self.massv[index - 1], self.massv[index]);
        let (s0, s1) = (self.sv[index - 1], self.sv[index]);
        if m1 == m0 {
            return s0;
        }
        s0 + (x - m0) / (m1 - m0) * (s1 - s0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn generalized_log_and_exp_are_inverse() {
        for &p in &[0.0, 0.5, 1.0, 2.0, 3.5] {
            for &x in &[0.1, 1.0, 7.3] {
                assert_approx_eq!(f64, gexp(p, gln(p, x)), x, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn generalized_log_reduces_to_log() {
        assert_approx_eq!(f64, gln(1.0, 2.5), 2.5f64.ln(), epsilon = 1e-12);
        // p = 2: g(x) = -1/x
        assert_approx_eq!(f64, gln(2.0, 4.0), -0.25, epsilon = 1e-12);
    }

    #[test]
    fn gamma_matches_known_values() {
        assert_approx_eq!(f64, gamma(1.0), 1.0, epsilon = 1e-10);
        assert_approx_eq!(f64, gamma(5.0), 24.0, epsilon = 1e-8);
        assert_approx_eq!(f64, gamma(0.5), PI.sqrt(), epsilon = 1e-10);
    }

    #[test]
    fn sersic_b_for_exponential_profile() {
        // n = 1 corresponds to the exponential disk value b ~ 1.678
        assert_approx_eq!(f64, sersic_b(1.0), 1.6783, epsilon = 1e-3);
    }

    #[test]
    fn sersic_mass_profile_is_normalized() {
        let sf = SersicFunction::new(4.0);
        assert_approx_eq!(f64, sf.inverse_mass(0.0), SersicFunction::SMIN, epsilon = 1e-6);
        // the enclosed mass is monotonic in radius
        let half = sf.inverse_mass(0.5);
        let ninety = sf.inverse_mass(0.9);
        assert!(half > 0.0);
        assert!(ninety > half);
    }

    #[test]
    fn sersic_density_decreases() {
        let sf = SersicFunction::new(2.0);
        assert!(sf.density(0.1) > sf.density(1.0));
        assert!(sf.density(1.0) > sf.density(10.0));
    }
}
