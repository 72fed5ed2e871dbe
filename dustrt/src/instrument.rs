//! Synthetic observing instruments.
//!
//! All instruments observe from a distant vantage point along a fixed
//! direction, so the projection onto the detector plane is parallel.
//! Peel-off photon packets sent towards an instrument are attenuated by
//! the optical depth along their path and accumulated thread-safely;
//! calibration to physical flux units happens once at write-out.

use crate::error::{Error, Result};
use crate::fits::Image;
use crate::lockfree::{self, AtomicDouble};
use crate::photon::PeelOffPhotonPacket;
use crate::units::UnitSystem;
use crate::vec3::Direction;
use crate::wavelength::WavelengthGrid;
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Output conventions shared by all instruments at write-out time.
pub struct OutputContext<'a> {
    /// Directory receiving the output files.
    pub output_path: PathBuf,
    /// Prefix prepended to every output file name.
    pub prefix: String,
    /// The active unit system.
    pub units: UnitSystem,
    /// The simulation's wavelength grid.
    pub wavelengths: &'a WavelengthGrid,
}

impl OutputContext<'_> {
    fn file_path(&self, instrument: &str, rest: &str) -> PathBuf {
        self.output_path
            .join(format!("{}_{}_{}", self.prefix, instrument, rest))
    }
}

/// An instrument that registers peel-off photon packets and writes its
/// accumulated data at the end of a simulation.
pub trait Instrument: Send + Sync {
    /// Returns the instrument name used in output file names.
    fn name(&self) -> &str;

    /// Returns the direction towards the observer.
    fn observer_direction(&self) -> Direction;

    /// Registers a peel-off photon packet. Called concurrently from all
    /// worker threads.
    fn detect(&self, pp: &PeelOffPhotonPacket);

    /// Calibrates the accumulated data and writes the output files.
    ///
    /// # Errors
    ///
    /// Returns an error when an output file cannot be written.
    fn write(&self, ctx: &OutputContext) -> Result<()>;
}

/// The common parameterization of a distant instrument: a name, a
/// distance, and the three pointing angles. The pointing vectors are
/// derived once at construction and constant thereafter.
pub struct DistantInstrumentCore {
    name: String,
    distance: f64,
    costheta: f64,
    sintheta: f64,
    cosphi: f64,
    sinphi: f64,
    cospa: f64,
    sinpa: f64,
    bfkobs: Direction,
    bfkx: Direction,
    bfky: Direction,
}

impl DistantInstrumentCore {
    /// Constructor; validates the distance and derives the pointing
    /// vectors from inclination θ, azimuth φ and position angle ω.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the distance is not positive.
    pub fn new(
        name: impl Into<String>,
        distance: f64,
        inclination: f64,
        azimuth: f64,
        position_angle: f64,
    ) -> Result<Self> {
        if distance <= 0.0 {
            return Err(Error::Config("Distance was not set".to_owned()));
        }
        let (sintheta, costheta) = inclination.sin_cos();
        let (sinphi, cosphi) = azimuth.sin_cos();
        let (sinpa, cospa) = position_angle.sin_cos();

        let bfkobs = Direction::from_angles(inclination, azimuth);
        let bfkx = Direction::new(
            cosphi * costheta * sinpa - sinphi * cospa,
            sinphi * costheta * sinpa + cosphi * cospa,
            -sintheta * sinpa,
        );
        let bfky = Direction::new(
            -cosphi * costheta * cospa - sinphi * sinpa,
            -sinphi * costheta * cospa + cosphi * sinpa,
            sintheta * cospa,
        );
        Ok(Self {
            name: name.into(),
            distance,
            costheta,
            sintheta,
            cosphi,
            sinphi,
            cospa,
            sinpa,
            bfkobs,
            bfkx,
            bfky,
        })
    }

    /// Returns the instrument name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the distance to the observer.
    #[must_use]
    pub const fn distance(&self) -> f64 {
        self.distance
    }

    /// Returns the direction towards the observer.
    #[must_use]
    pub const fn bfkobs(&self) -> Direction {
        self.bfkobs
    }

    /// Returns the unit vector along the detector x axis.
    #[must_use]
    pub const fn bfkx(&self) -> Direction {
        self.bfkx
    }

    /// Returns the unit vector along the detector y axis.
    #[must_use]
    pub const fn bfky(&self) -> Direction {
        self.bfky
    }

    /// Projects a position onto the detector plane coordinates
    /// `(x', y')`.
    #[must_use]
    pub fn project(&self, x: f64, y: f64, z: f64) -> (f64, f64) {
        let xpp = -self.sinphi * x + self.cosphi * y;
        let ypp =
            -self.cosphi * self.costheta * x - self.sinphi * self.costheta * y + self.sintheta * z;
        let xp = self.cospa * xpp - self.sinpa * ypp;
        let yp = self.sinpa * xpp + self.cospa * ypp;
        (xp, yp)
    }
}

////////////////////////////////////////////////////////////////////

/// A single detector frame: a rectangular pixel array with thread-safe
/// accumulators for the total flux and, optionally, one extra channel
/// per stellar component.
pub struct InstrumentFrame {
    nxp: usize,
    nyp: usize,
    xpres: f64,
    ypres: f64,
    xpmin: f64,
    ypmin: f64,
    ftotv: Vec<AtomicDouble>,
    fcompvv: Vec<Vec<AtomicDouble>>,
}

impl InstrumentFrame {
    /// Constructor; validates the pixel counts and extents, and
    /// allocates accumulators for `ncomp` stellar component channels
    /// (zero to record the total only).
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a count or extent is not
    /// positive.
    pub fn new(nxp: usize, nyp: usize, xpmax: f64, ypmax: f64, ncomp: usize) -> Result<Self> {
        if nxp < 2 || nyp < 2 {
            return Err(Error::Config("Number of pixels was not set".to_owned()));
        }
        if xpmax <= 0.0 || ypmax <= 0.0 {
            return Err(Error::Config("Maximum extent was not set".to_owned()));
        }
        let xpres = 2.0 * xpmax / (nxp - 1) as f64;
        let ypres = 2.0 * ypmax / (nyp - 1) as f64;
        Ok(Self {
            nxp,
            nyp,
            xpres,
            ypres,
            xpmin: -xpmax,
            ypmin: -ypmax,
            ftotv: lockfree::zeroed(nxp * nyp),
            fcompvv: (0..ncomp).map(|_| lockfree::zeroed(nxp * nyp)).collect(),
        })
    }

    /// Returns the number of pixels along x.
    #[must_use]
    pub const fn pixels_x(&self) -> usize {
        self.nxp
    }

    /// Returns the number of pixels along y.
    #[must_use]
    pub const fn pixels_y(&self) -> usize {
        self.nyp
    }

    /// Returns the linear index of the detector pixel receiving a
    /// photon packet at the given position, or `None` when the packet
    /// misses the pixel range.
    #[must_use]
    pub fn pixel_on_detector(
        &self,
        core: &DistantInstrumentCore,
        x: f64,
        y: f64,
        z: f64,
    ) -> Option<usize> {
        let (xp, yp) = core.project(x, y, z);
        let i = ((xp - self.xpmin) / self.xpres + 0.5).floor();
        let j = ((yp - self.ypmin) / self.ypres + 0.5).floor();
        if i < 0.0 || i >= self.nxp as f64 || j < 0.0 || j >= self.nyp as f64 {
            None
        } else {
            Some(i as usize + self.nxp * j as usize)
        }
    }

    /// Registers a peel-off photon packet: the carried luminosity
    /// attenuated by the optical depth along the packet's path is added
    /// to the pixel under the packet position.
    pub fn detect(&self, core: &DistantInstrumentCore, pp: &PeelOffPhotonPacket) {
        let (x, y, z) = pp.packet().position.cartesian();
        if let Some(l) = self.pixel_on_detector(core, x, y, z) {
            let extinguished = pp.packet().luminosity * (-pp.optical_depth_to_infinity()).exp();
            self.ftotv[l].add(extinguished);
            if let Some(component) = pp.packet().stellar {
                if let Some(frame) = self.fcompvv.get(component) {
                    frame[l].add(extinguished);
                }
            }
        }
    }

    /// Returns the calibration factor applied to the accumulated
    /// luminosities at wavelength index `ell`: division by the bin
    /// width, by the pixel solid angle, and by `4π D²`, followed by the
    /// unit conversion of the resulting surface brightness.
    #[must_use]
    pub fn calibration_factor(
        &self,
        core: &DistantInstrumentCore,
        ell: usize,
        ctx: &OutputContext,
    ) -> f64 {
        let dlambda = ctx.wavelengths.dlambda(ell);
        let xpresang = 2.0 * (self.xpres / (2.0 * core.distance)).atan();
        let ypresang = 2.0 * (self.ypres / (2.0 * core.distance)).atan();
        let area = xpresang * ypresang;
        let fourpid2 = 4.0 * PI * core.distance * core.distance;
        let unitfactor = ctx
            .units
            .osurfacebrightness(ctx.wavelengths.lambda(ell), 1.0);
        unitfactor / (dlambda * area * fourpid2)
    }

    /// Calibrates the frame at wavelength index `ell` and writes one
    /// FITS file per recorded channel.
    ///
    /// # Errors
    ///
    /// Returns an error when an output file cannot be written.
    pub fn calibrate_and_write_data(
        &self,
        core: &DistantInstrumentCore,
        ell: usize,
        ctx: &OutputContext,
    ) -> Result<()> {
        let factor = self.calibration_factor(core, ell, ctx);

        let mut channels: Vec<(String, &[AtomicDouble])> =
            vec![("total".to_owned(), &self.ftotv)];
        for (component, frame) in self.fcompvv.iter().enumerate() {
            channels.push((format!("stellar_{component}"), frame));
        }

        for (channel, accumulators) in channels {
            let data: Vec<f64> = accumulators.iter().map(|acc| acc.get() * factor).collect();
            let data = ndarray::Array2::from_shape_vec((self.nyp, self.nxp), data)
                .expect("accumulators match the pixel counts");
            let path = ctx.file_path(core.name(), &format!("{channel}_{ell}.fits"));
            log::info!(
                "Writing {} flux {} to FITS file {}...",
                channel,
                ell,
                path.display()
            );
            Image {
                data,
                incx: ctx.units.olength(self.xpres),
                incy: ctx.units.olength(self.ypres),
                bunit: ctx.units.usurfacebrightness().to_owned(),
                cunit: ctx.units.ulength().to_owned(),
            }
            .write(&path)?;
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////

/// An instrument recording a spectral energy distribution: one flux
/// accumulator per wavelength, no spatial information.
pub struct SedInstrument {
    core: DistantInstrumentCore,
    ftotv: Vec<AtomicDouble>,
}

impl SedInstrument {
    /// Constructor.
    #[must_use]
    pub fn new(core: DistantInstrumentCore, nlambda: usize) -> Self {
        Self {
            core,
            ftotv: lockfree::zeroed(nlambda),
        }
    }

    /// Writes the accumulated fluxes, calibrated to flux density units,
    /// as a tab-separated text file with one row per wavelength.
    fn write_sed(&self, ctx: &OutputContext) -> Result<()> {
        let path = ctx.file_path(self.core.name(), "sed.dat");
        log::info!("Writing SED to {}...", path.display());
        let resource_err = |err: std::io::Error| Error::Resource {
            path: path.clone(),
            reason: err.to_string(),
        };

        let fourpid2 = 4.0 * PI * self.core.distance * self.core.distance;
        let mut file = BufWriter::new(File::create(&path).map_err(resource_err)?);
        writeln!(file, "# column 1: lambda ({})", ctx.units.uwavelength()).map_err(resource_err)?;
        writeln!(
            file,
            "# column 2: total flux; F_lambda ({})",
            ctx.units.ufluxdensity()
        )
        .map_err(resource_err)?;
        for ell in 0..ctx.wavelengths.nlambda() {
            let lambda = ctx.wavelengths.lambda(ell);
            // luminosity (W) -> monochromatic luminosity (W/m) -> flux
            // density (W/m3)
            let flux = self.ftotv[ell].get() / ctx.wavelengths.dlambda(ell) / fourpid2;
            writeln!(
                file,
                "{:.7e}\t{:.7e}",
                ctx.units.owavelength(lambda),
                ctx.units.ofluxdensity(lambda, flux)
            )
            .map_err(resource_err)?;
        }
        Ok(())
    }
}

impl Instrument for SedInstrument {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn observer_direction(&self) -> Direction {
        self.core.bfkobs()
    }

    fn detect(&self, pp: &PeelOffPhotonPacket) {
        let extinguished = pp.packet().luminosity * (-pp.optical_depth_to_infinity()).exp();
        self.ftotv[pp.packet().ell].add(extinguished);
    }

    fn write(&self, ctx: &OutputContext) -> Result<()> {
        self.write_sed(ctx)
    }
}

////////////////////////////////////////////////////////////////////

/// An instrument holding one detector frame per wavelength. The frames
/// may differ in pixel counts and extents, but the pointing is shared.
pub struct MultiFrameInstrument {
    core: DistantInstrumentCore,
    frames: Vec<InstrumentFrame>,
}

impl MultiFrameInstrument {
    /// Constructor; the number of frames must equal the number of
    /// wavelengths.
    ///
    /// # Errors
    ///
    /// Returns a configuration error on a frame count mismatch.
    pub fn new(
        core: DistantInstrumentCore,
        frames: Vec<InstrumentFrame>,
        nlambda: usize,
    ) -> Result<Self> {
        if frames.len() != nlambda {
            return Err(Error::Config(
                "Number of instrument frames must equal number of wavelengths".to_owned(),
            ));
        }
        Ok(Self { core, frames })
    }

    /// Returns the per-wavelength frames.
    #[must_use]
    pub fn frames(&self) -> &[InstrumentFrame] {
        &self.frames
    }

    /// Returns the shared pointing and distance parameters.
    #[must_use]
    pub const fn core(&self) -> &DistantInstrumentCore {
        &self.core
    }
}

impl Instrument for MultiFrameInstrument {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn observer_direction(&self) -> Direction {
        self.core.bfkobs()
    }

    fn detect(&self, pp: &PeelOffPhotonPacket) {
        self.frames[pp.packet().ell].detect(&self.core, pp);
    }

    fn write(&self, ctx: &OutputContext) -> Result<()> {
        for (ell, frame) in self.frames.iter().enumerate() {
            frame.calibrate_and_write_data(&self.core, ell, ctx)?;
        }
        Ok(())
    }
}

/// Returns the raw accumulated totals of a detector frame, without
/// calibration. Intended for diagnostics.
#[must_use]
pub fn frame_totals(frame: &InstrumentFrame) -> Vec<f64> {
    frame.ftotv.iter().map(AtomicDouble::get).collect()
}
