//! The ordered wavelength grid of a simulation.

use crate::error::{Error, Result};
use itertools::Itertools;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// An ordered sequence of wavelengths with per-bin widths. All
/// wavelengths are stored in meters.
pub struct WavelengthGrid {
    lambdav: Vec<f64>,
    dlambdav: Vec<f64>,
}

impl WavelengthGrid {
    /// Constructs the grid from an explicit list of wavelengths, which
    /// is sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the list is empty or contains
    /// a non-positive wavelength.
    pub fn new(mut lambdav: Vec<f64>) -> Result<Self> {
        if lambdav.is_empty() {
            return Err(Error::Config(
                "the wavelength grid should contain at least one wavelength".to_owned(),
            ));
        }
        if lambdav.iter().any(|&lambda| lambda <= 0.0) {
            return Err(Error::Config(
                "all wavelengths should be positive".to_owned(),
            ));
        }
        lambdav.sort_by(|a, b| a.partial_cmp(b).expect("wavelengths are finite"));

        // bin widths: half the distance between the neighbouring
        // wavelengths, one-sided at the borders
        let n = lambdav.len();
        let dlambdav = if n == 1 {
            vec![lambdav[0]]
        } else {
            let mut widths = Vec::with_capacity(n);
            widths.push(lambdav[1] - lambdav[0]);
            widths.extend(
                lambdav
                    .iter()
                    .tuple_windows()
                    .map(|(left, _, right)| 0.5 * (right - left)),
            );
            widths.push(lambdav[n - 1] - lambdav[n - 2]);
            widths
        };
        Ok(Self { lambdav, dlambdav })
    }

    /// Constructs a logarithmically spaced grid of `n` wavelengths over
    /// `[min, max]`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the range or count is invalid.
    pub fn logarithmic(min: f64, max: f64, n: usize) -> Result<Self> {
        if min <= 0.0 || max <= min {
            return Err(Error::Config(
                "the wavelength range should be positive and ascending".to_owned(),
            ));
        }
        if n < 2 {
            return Err(Error::Config(
                "a logarithmic wavelength grid needs at least two wavelengths".to_owned(),
            ));
        }
        let logmin = min.log10();
        let logmax = max.log10();
        Self::new(
            (0..n)
                .map(|ell| 10f64.powf(logmin + (logmax - logmin) * ell as f64 / (n - 1) as f64))
                .collect(),
        )
    }

    /// Reads the grid from a text file: the number of wavelengths on the
    /// first line, followed by one wavelength in micron per line. The
    /// values are converted to meters and sorted.
    ///
    /// # Errors
    ///
    /// Returns a resource error when the file is missing or malformed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| Error::Resource {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;
        log::info!(
            "Reading wavelength grid data from file {}...",
            path.display()
        );
        let mut tokens = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|err| Error::Resource {
                path: path.to_owned(),
                reason: err.to_string(),
            })?;
            tokens.extend(
                line.split_whitespace()
                    .map(str::to_owned)
                    .collect::<Vec<_>>(),
            );
        }
        let mut iter = tokens.iter();
        let count: usize = iter
            .next()
            .and_then(|token| token.parse().ok())
            .ok_or_else(|| Error::Resource {
                path: path.to_owned(),
                reason: "missing wavelength count".to_owned(),
            })?;
        let mut lambdav = Vec::with_capacity(count);
        for _ in 0..count {
            let token = iter.next().ok_or_else(|| Error::Resource {
                path: path.to_owned(),
                reason: "fewer wavelengths than announced".to_owned(),
            })?;
            let lambda: f64 = token.parse().map_err(|_| Error::Resource {
                path: path.to_owned(),
                reason: format!("invalid wavelength '{token}'"),
            })?;
            // conversion from micron to m
            lambdav.push(lambda * 1e-6);
        }
        Self::new(lambdav)
    }

    /// Returns the number of wavelengths.
    #[must_use]
    pub fn nlambda(&self) -> usize {
        self.lambdav.len()
    }

    /// Returns the wavelength at index `ell`.
    #[must_use]
    pub fn lambda(&self, ell: usize) -> f64 {
        self.lambdav[ell]
    }

    /// Returns the bin width at index `ell`.
    #[must_use]
    pub fn dlambda(&self, ell: usize) -> f64 {
        self.dlambdav[ell]
    }

    /// Returns all wavelengths in ascending order.
    #[must_use]
    pub fn wavelengths(&self) -> &[f64] {
        &self.lambdav
    }
}
