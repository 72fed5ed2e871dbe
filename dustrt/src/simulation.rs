//! The simulation backbone: component lifecycle, context wiring, the
//! stellar system, and the Monte Carlo photon loop.

use crate::dust::DustSystem;
use crate::error::{Error, Result};
use crate::geometry::Geometry;
use crate::grid::{DustGrid, GridPath};
use crate::instrument::{
    DistantInstrumentCore, Instrument, InstrumentFrame, MultiFrameInstrument, OutputContext,
    SedInstrument,
};
use crate::parallel::ParallelFactory;
use crate::photon::{PeelOffPhotonPacket, PhotonPacket};
use crate::random::Random;
use crate::sed::{KuruczSed, SedTable};
use crate::units::UnitSystem;
use crate::vec3::{Direction, Vec3};
use crate::wavelength::WavelengthGrid;
use std::f64::consts::PI;
use std::path::{Path, PathBuf};

/// Input, output and resource locations for a simulation.
#[derive(Clone, Debug)]
pub struct FilePaths {
    input_path: PathBuf,
    output_path: PathBuf,
    prefix: String,
    resource_root: PathBuf,
}

impl FilePaths {
    /// Constructor.
    #[must_use]
    pub const fn new(
        input_path: PathBuf,
        output_path: PathBuf,
        prefix: String,
        resource_root: PathBuf,
    ) -> Self {
        Self {
            input_path,
            output_path,
            prefix,
            resource_root,
        }
    }

    /// Resolves an input file name against the input directory.
    #[must_use]
    pub fn input(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.input_path.join(path)
        }
    }

    /// Returns the output directory.
    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Returns the output file prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Replaces the output file prefix.
    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    /// Returns the resource root directory.
    #[must_use]
    pub fn resource_root(&self) -> &Path {
        &self.resource_root
    }
}

/// Lifecycle state of a simulation.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum State {
    /// Constructed, not yet set up.
    Created,
    /// Setup in progress.
    SetupStarted,
    /// Ready to run.
    SetupDone,
    /// The run has been performed.
    Run,
}

/// Parsed description of a stellar SED, resolved into luminosity
/// fractions during setup.
pub enum SedSpec {
    /// A two-column table file under the input directory.
    File {
        /// File name relative to the input directory.
        filename: String,
    },
    /// A Kurucz-style model atmosphere from the resource library.
    Kurucz {
        /// Metallicity `[Fe/H]`.
        metallicity: f64,
        /// Effective temperature in K.
        temperature: f64,
        /// Surface gravity `log g`.
        gravity: f64,
    },
    /// Equal luminosity in every wavelength bin.
    Flat,
}

/// Parsed description of a stellar component.
pub struct StellarComponentSpec {
    /// Bolometric luminosity in W.
    pub luminosity: f64,
    /// The emitting density geometry.
    pub geometry: Box<dyn Geometry>,
    /// The spectral shape.
    pub sed: SedSpec,
}

/// Parsed description of the dust system.
pub struct DustSpec {
    /// Total dust mass in kg.
    pub mass: f64,
    /// The dust density geometry.
    pub geometry: Box<dyn Geometry>,
    /// The spatial grid.
    pub grid: Box<dyn DustGrid>,
    /// The optical properties.
    pub mix: crate::dust::DustMix,
}

/// Parsed description of one detector frame.
pub struct FrameSpec {
    /// Pixels along x.
    pub pixels_x: usize,
    /// Pixels along y.
    pub pixels_y: usize,
    /// Half extent along x in m.
    pub extent_x: f64,
    /// Half extent along y in m.
    pub extent_y: f64,
}

/// Parsed description of an instrument.
pub enum InstrumentSpec {
    /// An SED-only instrument.
    Sed {
        /// Pointing and distance.
        core: DistantInstrumentCore,
    },
    /// An imaging instrument with one frame per wavelength.
    MultiFrame {
        /// Pointing and distance.
        core: DistantInstrumentCore,
        /// Per-wavelength frame descriptions.
        frames: Vec<FrameSpec>,
        /// Record one extra channel per stellar component.
        write_stellar_comps: bool,
    },
}

/// A stellar component ready for the photon loop.
struct StellarComponent {
    geometry: Box<dyn Geometry>,
    luminosity: f64,
    /// Luminosity fraction per wavelength bin, unit sum.
    fractions: Vec<f64>,
}

/// The collection of emitting components.
struct StellarSystem {
    components: Vec<StellarComponent>,
}

impl StellarSystem {
    fn ncomp(&self) -> usize {
        self.components.len()
    }

    /// Luminosity of one component inside wavelength bin `ell`.
    fn luminosity(&self, comp: usize, ell: usize) -> f64 {
        let component = &self.components[comp];
        component.luminosity * component.fractions[ell]
    }

    /// Total luminosity inside wavelength bin `ell`.
    fn total_luminosity(&self, ell: usize) -> f64 {
        (0..self.ncomp()).map(|comp| self.luminosity(comp, ell)).sum()
    }

    /// Draws a component with probability proportional to its
    /// luminosity at wavelength bin `ell`.
    fn pick_component(&self, ell: usize, random: &mut Random) -> usize {
        let total = self.total_luminosity(ell);
        let target = random.uniform() * total;
        let mut cumulative = 0.0;
        for comp in 0..self.ncomp() {
            cumulative += self.luminosity(comp, ell);
            if target <= cumulative {
                return comp;
            }
        }
        self.ncomp() - 1
    }
}

// The Henyey-Greenstein phase function, normalized so that the
// average over all directions equals one.
fn hg_phase(g: f64, costheta: f64) -> f64 {
    if g.abs() < 1e-6 {
        return 1.0;
    }
    let g2 = g * g;
    (1.0 - g2) / (1.0 + g2 - 2.0 * g * costheta).powf(1.5)
}

// Draws the cosine of a scattering angle from the Henyey-Greenstein
// phase function.
fn sample_hg_costheta(g: f64, random: &mut Random) -> f64 {
    if g.abs() < 1e-6 {
        return 2.0 * random.uniform() - 1.0;
    }
    let g2 = g * g;
    let fraction = (1.0 - g2) / (1.0 - g + 2.0 * g * random.uniform());
    ((1.0 + g2 - fraction * fraction) / (2.0 * g)).clamp(-1.0, 1.0)
}

// Builds a direction at the given scattering angle around the
// propagation direction, with a uniformly random azimuth.
fn scattered_direction(direction: Direction, costheta: f64, random: &mut Random) -> Direction {
    let k = direction.to_vec();
    // an axis guaranteed not to be parallel to the direction
    let axis = if k.z.abs() < 0.9 {
        Vec3::new(0.0, 0.0, 1.0)
    } else {
        Vec3::new(1.0, 0.0, 0.0)
    };
    let u = Vec3::cross(k, axis);
    let u = u * (1.0 / u.norm());
    let v = Vec3::cross(k, u);
    let sintheta = (1.0 - costheta * costheta).max(0.0).sqrt();
    let (sinphi, cosphi) = (2.0 * PI * random.uniform()).sin_cos();
    let scattered = k * costheta + (u * cosphi + v * sinphi) * sintheta;
    Direction::new(scattered.x, scattered.y, scattered.z)
}

// Returns the geometric distance along a traversed path at which the
// cumulative optical depth reaches `tau`.
fn distance_for_optical_depth(path: &GridPath, cumulative: &[f64], tau: f64) -> f64 {
    let mut covered = 0.0;
    let mut tau_start = 0.0;
    for (segment, &tau_end) in path.segments().iter().zip(cumulative) {
        if tau_end > tau {
            return covered + (tau - tau_start) / (tau_end - tau_start) * segment.ds;
        }
        covered += segment.ds;
        tau_start = tau_end;
    }
    covered
}

/// A configured Monte Carlo simulation, moving through the lifecycle
/// Created -> SetupStarted -> SetupDone -> Run.
pub struct Simulation {
    state: State,
    packets: usize,
    seed: u64,
    min_weight_reduction: f64,
    threads: usize,
    units: UnitSystem,
    wavelengths: WavelengthGrid,
    component_specs: Vec<StellarComponentSpec>,
    dust_spec: Option<DustSpec>,
    instrument_specs: Vec<InstrumentSpec>,
    paths: FilePaths,
    // populated during setup
    stellar: Option<StellarSystem>,
    dust: Option<DustSystem>,
    instruments: Vec<Box<dyn Instrument>>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("state", &self.state)
            .field("packets", &self.packets)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Assembles a simulation in the created state from parsed parts.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_parts(
        packets: usize,
        seed: u64,
        min_weight_reduction: f64,
        threads: usize,
        units: UnitSystem,
        wavelengths: WavelengthGrid,
        component_specs: Vec<StellarComponentSpec>,
        dust_spec: Option<DustSpec>,
        instrument_specs: Vec<InstrumentSpec>,
        paths: FilePaths,
    ) -> Self {
        Self {
            state: State::Created,
            packets,
            seed,
            min_weight_reduction,
            threads,
            units,
            wavelengths,
            component_specs,
            dust_spec,
            instrument_specs,
            paths,
            stellar: None,
            dust: None,
            instruments: Vec::new(),
        }
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Returns the wavelength grid.
    #[must_use]
    pub const fn wavelengths(&self) -> &WavelengthGrid {
        &self.wavelengths
    }

    /// Returns the file paths of this simulation.
    #[must_use]
    pub const fn file_paths(&self) -> &FilePaths {
        &self.paths
    }

    /// Replaces the output file prefix; used by drivers that run the
    /// same simulation many times.
    pub fn set_output_prefix(&mut self, prefix: impl Into<String>) {
        self.paths.set_prefix(prefix);
    }

    /// Overrides the number of worker threads (zero selects the number
    /// of logical cores).
    pub fn set_thread_count(&mut self, threads: usize) {
        self.threads = threads;
    }

    /// Returns the names of the configured instruments, in order.
    #[must_use]
    pub fn instrument_names(&self) -> Vec<String> {
        if self.instruments.is_empty() {
            // setup consumes the specs when it builds the instruments
            self.instrument_specs
                .iter()
                .map(|spec| match spec {
                    InstrumentSpec::Sed { core } | InstrumentSpec::MultiFrame { core, .. } => {
                        core.name().to_owned()
                    }
                })
                .collect()
        } else {
            self.instruments
                .iter()
                .map(|instrument| instrument.name().to_owned())
                .collect()
        }
    }

    fn resolve_sed(&self, spec: &SedSpec) -> Result<Vec<f64>> {
        match spec {
            SedSpec::File { filename } => {
                SedTable::read(&self.paths.input(filename))?.luminosity_fractions(&self.wavelengths)
            }
            SedSpec::Kurucz {
                metallicity,
                temperature,
                gravity,
            } => KuruczSed::read(
                self.paths.resource_root(),
                *metallicity,
                *temperature,
                *gravity,
            )?
            .luminosity_fractions(&self.wavelengths),
            SedSpec::Flat => {
                let n = self.wavelengths.nlambda();
                Ok(vec![1.0 / n as f64; n])
            }
        }
    }

    /// Runs the two setup phases: local validation happened while the
    /// configuration was parsed, so this resolves everything that needs
    /// the full context (SED resources against the wavelength grid, the
    /// dust cell densities, the instrument frames). Calling setup on an
    /// already set up simulation does nothing.
    ///
    /// # Errors
    ///
    /// Returns the first setup failure, or a fatal error on a reentrant
    /// call.
    pub fn setup(&mut self) -> Result<()> {
        match self.state {
            State::Created => {}
            State::SetupStarted => {
                return Err(Error::fatal("Simulation setup is already in progress"));
            }
            _ => return Ok(()),
        }
        self.state = State::SetupStarted;

        // stellar system
        let mut components = Vec::new();
        for spec in std::mem::take(&mut self.component_specs) {
            let fractions = self.resolve_sed(&spec.sed)?;
            components.push(StellarComponent {
                geometry: spec.geometry,
                luminosity: spec.luminosity,
                fractions,
            });
        }
        if components.is_empty() {
            return Err(Error::Config(
                "the stellar system should contain at least one component".to_owned(),
            ));
        }
        let ncomp = components.len();
        self.stellar = Some(StellarSystem { components });

        // dust system
        if let Some(spec) = self.dust_spec.take() {
            let mut random = Random::new(self.seed, 0);
            self.dust = Some(DustSystem::new(
                spec.grid,
                spec.mix,
                spec.geometry.as_ref(),
                spec.mass,
                &mut random,
            ));
        }

        // instruments
        let nlambda = self.wavelengths.nlambda();
        for spec in std::mem::take(&mut self.instrument_specs) {
            let instrument: Box<dyn Instrument> = match spec {
                InstrumentSpec::Sed { core } => Box::new(SedInstrument::new(core, nlambda)),
                InstrumentSpec::MultiFrame {
                    core,
                    frames,
                    write_stellar_comps,
                } => {
                    let nchannels = if write_stellar_comps { ncomp } else { 0 };
                    let frames = frames
                        .into_iter()
                        .map(|frame| {
                            InstrumentFrame::new(
                                frame.pixels_x,
                                frame.pixels_y,
                                frame.extent_x,
                                frame.extent_y,
                                nchannels,
                            )
                        })
                        .collect::<Result<Vec<_>>>()?;
                    Box::new(MultiFrameInstrument::new(core, frames, nlambda)?)
                }
            };
            self.instruments.push(instrument);
        }

        self.state = State::SetupDone;
        Ok(())
    }

    /// Performs the Monte Carlo photon loop for every wavelength and
    /// writes the instrument output.
    ///
    /// # Errors
    ///
    /// Fatal when the simulation has not been set up; otherwise the
    /// first error from the photon loop or the output writers.
    pub fn run(&mut self) -> Result<()> {
        if self.state != State::SetupDone {
            return Err(Error::fatal(
                "Simulation has not been setup before being run",
            ));
        }
        self.state = State::Run;

        let factory = ParallelFactory::new(self.threads)?;
        log::info!(
            "Starting the simulation with {} thread(s)...",
            factory.thread_count()
        );

        for ell in 0..self.wavelengths.nlambda() {
            self.run_wavelength(ell, &factory)?;
        }

        let ctx = OutputContext {
            output_path: self.paths.output_path.clone(),
            prefix: self.paths.prefix.clone(),
            units: self.units,
            wavelengths: &self.wavelengths,
        };
        for instrument in &self.instruments {
            instrument.write(&ctx)?;
        }
        Ok(())
    }

    /// Convenience wrapper performing setup followed by the run.
    ///
    /// # Errors
    ///
    /// See [`Self::setup`] and [`Self::run`].
    pub fn setup_and_run(&mut self) -> Result<()> {
        self.setup()?;
        self.run()
    }

    fn run_wavelength(&self, ell: usize, factory: &ParallelFactory) -> Result<()> {
        let stellar = self.stellar.as_ref().expect("setup populated the system");
        let total = stellar.total_luminosity(ell);
        if total <= 0.0 {
            return Ok(());
        }
        log::info!(
            "Launching {} photon packets for wavelength {} of {}...",
            self.packets,
            ell + 1,
            self.wavelengths.nlambda()
        );

        let lpp = total / self.packets as f64;
        let minl = lpp / self.min_weight_reduction;
        let dust = self.dust.as_ref();
        let instruments = &self.instruments;
        let stream_seed = self.seed ^ (ell as u64).wrapping_mul(0xd1b5_4a32_d192_ed03);

        factory.try_ranges(self.packets, |worker, range| {
            let mut random = Random::new(stream_seed, worker);
            let mut path = GridPath::default();
            let mut cumulative: Vec<f64> = Vec::new();

            for _ in range {
                // launch from a stellar component
                let comp = stellar.pick_component(ell, &mut random);
                let position = stellar.components[comp]
                    .geometry
                    .generate_position(&mut random);
                let direction = random.direction();
                let mut pp = PhotonPacket::new(Some(comp), ell, position, direction, lpp);

                // peel-off at emission: isotropic sources radiate the
                // same luminosity towards every instrument
                for instrument in instruments {
                    let peel = PeelOffPhotonPacket::new(
                        &pp,
                        instrument.observer_direction(),
                        pp.luminosity,
                        dust,
                    );
                    instrument.detect(&peel);
                }

                let Some(dust) = dust else { continue };
                let mix = dust.mix();
                let albedo = mix.albedo(ell);
                let g = mix.asymmetry(ell);

                loop {
                    let tau_path = dust.fill_optical_depths(
                        ell,
                        pp.position,
                        pp.direction,
                        &mut path,
                        &mut cumulative,
                    );
                    if tau_path <= 0.0 {
                        break;
                    }

                    // the fraction that neither escapes nor is absorbed
                    // continues as a scattering
                    let interacting = 1.0 - (-tau_path).exp();
                    pp.luminosity *= interacting * albedo;
                    if pp.luminosity <= minl {
                        break;
                    }

                    // forced propagation to the interaction point
                    let tau = -(1.0 - random.uniform() * interacting).ln();
                    let distance = distance_for_optical_depth(&path, &cumulative, tau);
                    pp.propagate(distance);

                    // peel-off at scattering, weighted by the phase
                    // function towards each observer
                    for instrument in instruments {
                        let observer = instrument.observer_direction();
                        let costheta =
                            Vec3::dot(pp.direction.to_vec(), observer.to_vec());
                        let weight = hg_phase(g, costheta);
                        let peel = PeelOffPhotonPacket::new(
                            &pp,
                            observer,
                            pp.luminosity * weight,
                            Some(dust),
                        );
                        instrument.detect(&peel);
                    }

                    // scatter into a new direction
                    let costheta = sample_hg_costheta(g, &mut random);
                    let direction = scattered_direction(pp.direction, costheta, &mut random);
                    pp.scatter(direction);
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dust::DustMix;
    use crate::geometry::ShellGeometry;
    use crate::grid::{linear_mesh, SphericalGrid};
    use crate::units;
    use float_cmp::assert_approx_eq;

    fn test_paths(tag: &str) -> FilePaths {
        let dir = std::env::temp_dir().join(format!("dustrt_sim_{tag}"));
        std::fs::create_dir_all(&dir).unwrap();
        FilePaths::new(dir.clone(), dir, "sim".to_owned(), std::env::temp_dir())
    }

    fn point_like_component() -> StellarComponentSpec {
        StellarComponentSpec {
            luminosity: units::LSUN,
            geometry: Box::new(ShellGeometry::new(1e8, 2e8, 2.0).unwrap()),
            sed: SedSpec::Flat,
        }
    }

    fn sed_instrument_spec(distance: f64) -> InstrumentSpec {
        InstrumentSpec::Sed {
            core: DistantInstrumentCore::new("i0", distance, 0.0, 0.0, 0.0).unwrap(),
        }
    }

    #[test]
    fn run_before_setup_is_fatal() {
        let mut simulation = Simulation::from_parts(
            10,
            1,
            1e4,
            1,
            UnitSystem::Si,
            WavelengthGrid::new(vec![1e-6]).unwrap(),
            vec![point_like_component()],
            None,
            vec![sed_instrument_spec(units::PARSEC)],
            test_paths("unset"),
        );
        assert!(simulation.run().is_err());
    }

    #[test]
    fn setup_is_idempotent() {
        let mut simulation = Simulation::from_parts(
            10,
            1,
            1e4,
            1,
            UnitSystem::Si,
            WavelengthGrid::new(vec![1e-6]).unwrap(),
            vec![point_like_component()],
            None,
            vec![sed_instrument_spec(units::PARSEC)],
            test_paths("idem"),
        );
        simulation.setup().unwrap();
        assert_eq!(simulation.state(), State::SetupDone);
        simulation.setup().unwrap();
        assert_eq!(simulation.state(), State::SetupDone);
    }

    #[test]
    fn transparent_run_conserves_luminosity() {
        let distance = units::PARSEC;
        let paths = test_paths("transparent");
        let output = paths.output_path().to_owned();
        let mut simulation = Simulation::from_parts(
            2000,
            42,
            1e4,
            2,
            UnitSystem::Si,
            WavelengthGrid::new(vec![1e-6]).unwrap(),
            vec![point_like_component()],
            None,
            vec![sed_instrument_spec(distance)],
            paths,
        );
        simulation.setup_and_run().unwrap();

        // without dust every packet contributes its full luminosity, so
        // the recorded flux equals L / dlambda / (4 pi D^2) exactly
        let content = std::fs::read_to_string(output.join("sim_i0_sed.dat")).unwrap();
        let data_line = content
            .lines()
            .find(|line| !line.starts_with('#'))
            .unwrap();
        let flux: f64 = data_line
            .split_whitespace()
            .nth(1)
            .unwrap()
            .parse()
            .unwrap();
        let dlambda = 1e-6;
        let expected = units::LSUN / dlambda / (4.0 * PI * distance * distance);
        // the output file carries eight significant digits
        assert_approx_eq!(f64, flux, expected, epsilon = 1e-7 * expected);
    }

    #[test]
    fn dust_attenuates_the_sed() {
        let distance = units::PARSEC;

        let run = |dust: Option<DustSpec>, tag: &str| -> f64 {
            let paths = test_paths(tag);
            let output = paths.output_path().to_owned();
            let mut simulation = Simulation::from_parts(
                5000,
                42,
                1e4,
                2,
                UnitSystem::Si,
                WavelengthGrid::new(vec![1e-6]).unwrap(),
                vec![point_like_component()],
                dust,
                vec![sed_instrument_spec(distance)],
                paths,
            );
            simulation.setup_and_run().unwrap();
            let content = std::fs::read_to_string(output.join("sim_i0_sed.dat")).unwrap();
            let data_line = content
                .lines()
                .find(|line| !line.starts_with('#'))
                .unwrap();
            data_line
                .split_whitespace()
                .nth(1)
                .unwrap()
                .parse()
                .unwrap()
        };

        let transparent = run(None, "clear");

        // an optically thick shell around the source
        let grid = SphericalGrid::new(
            linear_mesh(0.0, 1e9, 10),
            linear_mesh(0.0, PI, 4),
        )
        .unwrap();
        let volume = 4.0 / 3.0 * PI * 1e9f64.powi(3);
        let kappa_rho_target = 3.0 / 1e9; // tau ~ 3 across the grid radius
        let mass = kappa_rho_target * volume; // with kappa = 1
        let dusty = run(
            Some(DustSpec {
                mass,
                geometry: Box::new(ShellGeometry::new(1e7, 1e9, 0.0).unwrap()),
                grid: Box::new(grid),
                mix: DustMix::grey(1, 1.0, 0.4, 0.0).unwrap(),
            }),
            "dusty",
        );

        assert!(dusty < transparent);
        assert!(dusty > 0.0);
    }

    #[test]
    fn hg_phase_is_normalized() {
        // the direction average of the phase function is one
        for &g in &[0.0, 0.3, -0.5, 0.9] {
            let n = 100_000;
            let mut sum = 0.0;
            for i in 0..n {
                let costheta = -1.0 + 2.0 * (i as f64 + 0.5) / n as f64;
                sum += hg_phase(g, costheta);
            }
            assert_approx_eq!(f64, sum / n as f64, 1.0, epsilon = 2e-3);
        }
    }

    #[test]
    fn hg_sampling_matches_mean_cosine() {
        // the mean cosine of the Henyey-Greenstein distribution is g
        let mut random = Random::new(7, 0);
        for &g in &[0.0, 0.4, -0.6] {
            let n = 200_000;
            let mean: f64 =
                (0..n).map(|_| sample_hg_costheta(g, &mut random)).sum::<f64>() / f64::from(n);
            assert_approx_eq!(f64, mean, g, epsilon = 5e-3);
        }
    }

    #[test]
    fn scattered_direction_preserves_angle() {
        let mut random = Random::new(11, 0);
        let direction = Direction::new(0.3, -0.5, 0.8);
        for _ in 0..100 {
            let costheta = 2.0 * random.uniform() - 1.0;
            let scattered = scattered_direction(direction, costheta, &mut random);
            assert_approx_eq!(
                f64,
                Vec3::dot(direction.to_vec(), scattered.to_vec()),
                costheta,
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn optical_depth_inversion_walks_segments() {
        // a ray entering a unit-opacity grid from outside: the external
        // approach contributes length but no optical depth
        let grid = SphericalGrid::new(linear_mesh(0.0, 2.0, 2), linear_mesh(0.0, PI, 2)).unwrap();
        let path = grid.path(
            crate::vec3::Position::new(-3.0, 0.0, 0.0),
            Direction::new(1.0, 0.0, 0.0),
        );
        let taus: Vec<f64> = path
            .segments()
            .iter()
            .scan(0.0, |tau, segment| {
                if segment.cell >= 0 {
                    *tau += segment.ds;
                }
                Some(*tau)
            })
            .collect();
        // one unit of optical depth is reached one unit of length past
        // the external approach segment
        let distance = distance_for_optical_depth(&path, &taus, 1.0);
        assert_approx_eq!(f64, distance, path.segments()[0].ds + 1.0, epsilon = 1e-9);
        // the full depth maps to the full covered length
        let total: f64 = path.segments().iter().map(|segment| segment.ds).sum();
        let interior = path.interior_length();
        assert_approx_eq!(
            f64,
            distance_for_optical_depth(&path, &taus, interior),
            total,
            epsilon = 1e-9
        );
    }
}
