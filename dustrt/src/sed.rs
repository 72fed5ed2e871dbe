//! Stellar spectral energy distribution resources.
//!
//! SED libraries are text tables at fixed relative paths under a
//! resource root; the engine reads them line-wise with whitespace
//! separated fields and converts wavelength columns from Angstrom to
//! meters at load.

use crate::error::{Error, Result};
use crate::wavelength::WavelengthGrid;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// An emissivity table: wavelengths in meters with the corresponding
/// (unnormalized) emissivities.
pub struct SedTable {
    lambdav: Vec<f64>,
    jv: Vec<f64>,
}

impl SedTable {
    /// Constructs the table from parallel wavelength and emissivity
    /// vectors.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the vectors are empty,
    /// unequal, or not strictly ascending in wavelength.
    pub fn new(lambdav: Vec<f64>, jv: Vec<f64>) -> Result<Self> {
        if lambdav.is_empty() || lambdav.len() != jv.len() {
            return Err(Error::Config(
                "an SED table needs matching wavelength and emissivity columns".to_owned(),
            ));
        }
        if !lambdav.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::Config(
                "the wavelengths of an SED table should be strictly ascending".to_owned(),
            ));
        }
        Ok(Self { lambdav, jv })
    }

    /// Reads a two-column table with one `lambda j` pair per line, the
    /// wavelength in Angstrom. Blank lines and lines starting with `#`
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Returns a resource error when the file is missing or malformed.
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| Error::Resource {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;
        log::info!("Reading SED data from file {}...", path.display());
        let mut lambdav = Vec::new();
        let mut jv = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|err| Error::Resource {
                path: path.to_owned(),
                reason: err.to_string(),
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut fields = trimmed.split_whitespace();
            let lambda: f64 = parse(fields.next(), path)?;
            let j: f64 = parse(fields.next(), path)?;
            // conversion from Angstrom to m
            lambdav.push(lambda / 1e10);
            jv.push(j);
        }
        Self::new(lambdav, jv)
    }

    /// Returns the emissivity at wavelength `lambda` by log-log
    /// interpolation, or zero outside the tabulated range.
    #[must_use]
    pub fn emissivity(&self, lambda: f64) -> f64 {
        if lambda < self.lambdav[0] || lambda > self.lambdav[self.lambdav.len() - 1] {
            return 0.0;
        }
        let index = match self
            .lambdav
            .binary_search_by(|x| x.partial_cmp(&lambda).expect("finite wavelengths"))
        {
            Ok(i) => return self.jv[i],
            Err(i) => i,
        };
        let (l0, l1) = (self.lambdav[index - 1], self.lambdav[index]);
        let (j0, j1) = (self.jv[index - 1], self.jv[index]);
        if j0 <= 0.0 || j1 <= 0.0 {
            // fall back to linear interpolation near zero emissivities
            return j0 + (lambda - l0) / (l1 - l0) * (j1 - j0);
        }
        let fraction = (lambda / l0).ln() / (l1 / l0).ln();
        j0 * (j1 / j0).powf(fraction)
    }

    /// Resamples the table onto a simulation wavelength grid and returns
    /// the luminosity fraction per bin, normalized to unit sum.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the table does not overlap the
    /// wavelength grid.
    pub fn luminosity_fractions(&self, grid: &WavelengthGrid) -> Result<Vec<f64>> {
        let mut fractions: Vec<f64> = (0..grid.nlambda())
            .map(|ell| self.emissivity(grid.lambda(ell)) * grid.dlambda(ell))
            .collect();
        let total: f64 = fractions.iter().sum();
        if total <= 0.0 {
            return Err(Error::Config(
                "the SED does not overlap the simulation wavelength grid".to_owned(),
            ));
        }
        for fraction in &mut fractions {
            *fraction /= total;
        }
        Ok(fractions)
    }
}

fn parse(field: Option<&str>, path: &Path) -> Result<f64> {
    field
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| Error::Resource {
            path: path.to_owned(),
            reason: "malformed table line".to_owned(),
        })
}

/// A Kurucz-style atmosphere model library: one file per metallicity bin
/// and effective temperature, with eleven flux columns per line covering
/// the surface gravity grid.
pub struct KuruczSed;

impl KuruczSed {
    const NLAMBDA: usize = 1221;

    fn metallicity_folder(z: f64) -> &'static str {
        match z {
            z if z < -4.75 => "km50",
            z if z < -4.25 => "km45",
            z if z < -3.75 => "km40",
            z if z < -3.25 => "km35",
            z if z < -2.75 => "km30",
            z if z < -2.25 => "km25",
            z if z < -1.75 => "km20",
            z if z < -1.25 => "km15",
            z if z < -0.75 => "km10",
            z if z < -0.40 => "km05",
            z if z < -0.25 => "km03",
            z if z < -0.15 => "km02",
            z if z < -0.05 => "km01",
            z if z < 0.05 => "kp00",
            z if z < 0.15 => "kp01",
            z if z < 0.25 => "kp02",
            z if z < 0.40 => "kp03",
            z if z < 0.75 => "kp05",
            _ => "kp10",
        }
    }

    /// Reads the library under `resource_root/SED/Kurucz/` for the given
    /// metallicity, effective temperature and surface gravity, and
    /// interpolates between the two files bracketing the temperature.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an out-of-range temperature and
    /// a resource error for missing or inconsistent files.
    pub fn read(resource_root: &Path, z: f64, teff: f64, g: f64) -> Result<SedTable> {
        if !(3500.0..=10_000.0).contains(&teff) {
            return Err(Error::Config(
                "the effective temperature should be between 3500 and 10000".to_owned(),
            ));
        }
        let folder = Self::metallicity_folder(z);
        let base = resource_root.join("SED").join("Kurucz").join(folder);

        // determine the two files bracketing the desired temperature,
        // including the rightmost margin in the last bin
        let mut teff_low = (teff / 250.0).floor() * 250.0;
        if teff_low == 10_000.0 {
            teff_low -= 250.0;
        }
        let teff_high = teff_low + 250.0;
        let path_low = base.join(format!("{folder}_{teff_low:.0}.dat"));
        let path_high = base.join(format!("{folder}_{teff_high:.0}.dat"));

        // the flux column within each file depends on the surface gravity
        let column = if g < 0.0 {
            0
        } else if g > 5.0 {
            10
        } else {
            (2.0 * g + 0.5).floor() as usize
        };

        let (lambda_low, flux_low) = Self::read_model(&path_low, column)?;
        let (lambda_high, flux_high) = Self::read_model(&path_high, column)?;
        if lambda_low != lambda_high {
            return Err(Error::Resource {
                path: path_high,
                reason: "wavelength grids of the bracketing files differ".to_owned(),
            });
        }

        // linear interpolation in effective temperature
        let weight = (teff - teff_low) / (teff_high - teff_low);
        let jv = flux_low
            .iter()
            .zip(&flux_high)
            .map(|(low, high)| low + weight * (high - low))
            .collect();
        SedTable::new(lambda_low, jv)
    }

    fn read_model(path: &Path, column: usize) -> Result<(Vec<f64>, Vec<f64>)> {
        let file = File::open(path).map_err(|err| Error::Resource {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;
        log::info!("Reading SED data from file {}...", path.display());
        let mut lambdav = Vec::with_capacity(Self::NLAMBDA);
        let mut jv = Vec::with_capacity(Self::NLAMBDA);
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|err| Error::Resource {
                path: path.to_owned(),
                reason: err.to_string(),
            })?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() != 13 {
                return Err(Error::Resource {
                    path: path.to_owned(),
                    reason: format!("expected 13 fields per line, found {}", fields.len()),
                });
            }
            // fields: running number, lambda in Angstrom, 11 flux columns
            let lambda: f64 = parse(Some(fields[1]), path)?;
            let flux: f64 = parse(Some(fields[2 + column]), path)?;
            lambdav.push(lambda / 1e10);
            jv.push(flux);
        }
        Ok((lambdav, jv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use std::io::Write;

    #[test]
    fn table_requires_ascending_wavelengths() {
        assert!(SedTable::new(vec![2e-7, 1e-7], vec![1.0, 1.0]).is_err());
        assert!(SedTable::new(vec![], vec![]).is_err());
        assert!(SedTable::new(vec![1e-7], vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn emissivity_interpolates_and_clamps() {
        let table = SedTable::new(vec![1e-7, 1e-6], vec![10.0, 1.0]).unwrap();
        assert_eq!(table.emissivity(5e-8), 0.0);
        assert_eq!(table.emissivity(2e-6), 0.0);
        assert_approx_eq!(f64, table.emissivity(1e-7), 10.0, epsilon = 1e-12);
        // log-log interpolation: halfway in log lambda means the
        // geometric mean of the emissivities
        let halfway = (1e-7f64 * 1e-6f64).sqrt();
        assert_approx_eq!(
            f64,
            table.emissivity(halfway),
            (10.0f64 * 1.0).sqrt(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn luminosity_fractions_sum_to_one() {
        let table = SedTable::new(vec![1e-7, 5e-7, 1e-6], vec![3.0, 2.0, 1.0]).unwrap();
        let grid = WavelengthGrid::logarithmic(1.5e-7, 9e-7, 8).unwrap();
        let fractions = table.luminosity_fractions(&grid).unwrap();
        assert_eq!(fractions.len(), 8);
        assert_approx_eq!(f64, fractions.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn disjoint_grid_is_rejected() {
        let table = SedTable::new(vec![1e-7, 2e-7], vec![1.0, 1.0]).unwrap();
        let grid = WavelengthGrid::new(vec![1e-5]).unwrap();
        assert!(table.luminosity_fractions(&grid).is_err());
    }

    #[test]
    fn two_column_file_reads_in_angstrom() {
        let dir = std::env::temp_dir().join("dustrt_sed_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("flat.dat");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "# lambda j").unwrap();
        writeln!(file, "1000 1.0").unwrap();
        writeln!(file, "2000 2.0").unwrap();
        drop(file);

        let table = SedTable::read(&path).unwrap();
        assert_approx_eq!(f64, table.lambdav[0], 1e-7, epsilon = 1e-18);
        assert_approx_eq!(f64, table.lambdav[1], 2e-7, epsilon = 1e-18);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn kurucz_brackets_open_their_own_files() {
        // build a tiny two-temperature library and check that the upper
        // bracketing file contributes to the interpolated emissivities
        let root = std::env::temp_dir().join("dustrt_kurucz_test");
        let dir = root.join("SED").join("Kurucz").join("kp00");
        std::fs::create_dir_all(&dir).unwrap();

        let write_model = |teff: u32, scale: f64| {
            let path = dir.join(format!("kp00_{teff}.dat"));
            let mut file = File::create(&path).unwrap();
            for (index, lambda) in [1000.0, 2000.0, 4000.0].iter().enumerate() {
                let fluxes = (0..11)
                    .map(|m| format!("{:.1}", scale * (m + 1) as f64))
                    .collect::<Vec<_>>()
                    .join(" ");
                writeln!(file, "{} {} {}", index + 1, lambda, fluxes).unwrap();
            }
        };
        write_model(5000, 1.0);
        write_model(5250, 3.0);

        // halfway between the brackets with gravity column 4
        let table = KuruczSed::read(&root, 0.0, 5125.0, 2.0).unwrap();
        // column index floor(2 * 2.0 + 0.5) = 4, so base flux 5.0;
        // halfway interpolation between scales 1 and 3 doubles it
        assert_approx_eq!(f64, table.jv[0], 10.0, epsilon = 1e-12);
        std::fs::remove_dir_all(&root).ok();
    }
}
