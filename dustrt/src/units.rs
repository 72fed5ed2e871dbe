//! Output unit systems.
//!
//! Internally the engine works in SI units throughout; the unit system
//! only affects output values and the unit names written in file
//! headers.

/// One astronomical unit in meters.
pub const AU: f64 = 1.495978707e11;
/// One parsec in meters.
pub const PARSEC: f64 = 3.0856775813e16;
/// The solar bolometric luminosity in watts.
pub const LSUN: f64 = 3.846e26;
/// One arcsecond in radians.
pub const ARCSEC: f64 = std::f64::consts::PI / 648_000.0;
/// One square arcsecond in steradians.
pub const ARCSEC2: f64 = ARCSEC * ARCSEC;

/// The unit system used for all simulation output.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum UnitSystem {
    /// Strict SI units.
    #[default]
    Si,
    /// Units traditional in stellar astrophysics: AU, micron, solar
    /// luminosities, arcsec.
    Stellar,
}

impl UnitSystem {
    /// Parses a unit system name as it appears in configuration files.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SIUnits" => Some(Self::Si),
            "StellarUnits" => Some(Self::Stellar),
            _ => None,
        }
    }

    /// Returns the name of the output length unit.
    #[must_use]
    pub const fn ulength(self) -> &'static str {
        match self {
            Self::Si => "m",
            Self::Stellar => "AU",
        }
    }

    /// Converts an internal length (m) to the output length unit.
    #[must_use]
    pub fn olength(self, length: f64) -> f64 {
        match self {
            Self::Si => length,
            Self::Stellar => length / AU,
        }
    }

    /// Returns the name of the output wavelength unit.
    #[must_use]
    pub const fn uwavelength(self) -> &'static str {
        match self {
            Self::Si => "m",
            Self::Stellar => "micron",
        }
    }

    /// Converts an internal wavelength (m) to the output wavelength
    /// unit.
    #[must_use]
    pub fn owavelength(self, lambda: f64) -> f64 {
        match self {
            Self::Si => lambda,
            Self::Stellar => lambda / 1e-6,
        }
    }

    /// Returns the name of the output flux density unit.
    #[must_use]
    pub const fn ufluxdensity(self) -> &'static str {
        match self {
            Self::Si => "W/m3",
            Self::Stellar => "W/m2/micron",
        }
    }

    /// Converts an internal wavelength flux density (W/m3) to the output
    /// flux density unit.
    #[must_use]
    pub fn ofluxdensity(self, _lambda: f64, flux: f64) -> f64 {
        match self {
            Self::Si => flux,
            Self::Stellar => flux * 1e-6,
        }
    }

    /// Returns the name of the output surface brightness unit.
    #[must_use]
    pub const fn usurfacebrightness(self) -> &'static str {
        match self {
            Self::Si => "W/m3/sr",
            Self::Stellar => "W/m2/micron/arcsec2",
        }
    }

    /// Converts an internal surface brightness (W/m3/sr) to the output
    /// surface brightness unit.
    #[must_use]
    pub fn osurfacebrightness(self, _lambda: f64, brightness: f64) -> f64 {
        match self {
            Self::Si => brightness,
            Self::Stellar => brightness * 1e-6 * ARCSEC2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn si_conversions_are_identity() {
        let units = UnitSystem::Si;
        assert_eq!(units.olength(2.0), 2.0);
        assert_eq!(units.owavelength(3e-7), 3e-7);
        assert_eq!(units.ofluxdensity(3e-7, 5.0), 5.0);
        assert_eq!(units.osurfacebrightness(3e-7, 5.0), 5.0);
    }

    #[test]
    fn stellar_conversions_scale() {
        let units = UnitSystem::Stellar;
        assert_approx_eq!(f64, units.olength(AU), 1.0, epsilon = 1e-12);
        assert_approx_eq!(f64, units.owavelength(1e-6), 1.0, epsilon = 1e-12);
        // W/m3 -> W/m2/micron divides by 1e6
        assert_approx_eq!(f64, units.ofluxdensity(1e-6, 1e6), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn names_follow_the_system() {
        assert_eq!(UnitSystem::Si.ufluxdensity(), "W/m3");
        assert_eq!(UnitSystem::Stellar.uwavelength(), "micron");
        assert_eq!(UnitSystem::from_name("StellarUnits"), Some(UnitSystem::Stellar));
        assert_eq!(UnitSystem::from_name("ImperialUnits"), None);
    }
}
