//! Photon packets: discrete carriers of monochromatic luminosity used
//! by the Monte Carlo engine.

use crate::dust::DustSystem;
use crate::stokes::StokesVector;
use crate::vec3::{Direction, Position};

/// A photon packet, propagated through the dusty medium by the Monte
/// Carlo loop. Not a physical photon: it carries a luminosity at a
/// single wavelength index.
#[derive(Clone, Debug)]
pub struct PhotonPacket {
    /// Index of the emitting stellar component, or `None` for dust
    /// emission.
    pub stellar: Option<usize>,
    /// Index in the simulation's wavelength grid.
    pub ell: usize,
    /// Current position.
    pub position: Position,
    /// Current propagation direction.
    pub direction: Direction,
    /// Carried luminosity.
    pub luminosity: f64,
    /// Number of scattering events experienced so far.
    pub nscatt: u32,
    /// Polarization state.
    pub stokes: StokesVector,
}

impl PhotonPacket {
    /// Constructs a packet at emission: unpolarized, zero scatterings.
    #[must_use]
    pub fn new(
        stellar: Option<usize>,
        ell: usize,
        position: Position,
        direction: Direction,
        luminosity: f64,
    ) -> Self {
        Self {
            stellar,
            ell,
            position,
            direction,
            luminosity,
            nscatt: 0,
            stokes: StokesVector::new(),
        }
    }

    /// Returns true for a packet emitted by a stellar component.
    #[must_use]
    pub const fn is_stellar(&self) -> bool {
        self.stellar.is_some()
    }

    /// Moves the packet over `distance` along its direction.
    pub fn propagate(&mut self, distance: f64) {
        self.position = self.position.shifted(self.direction, distance);
    }

    /// Registers a scattering event into the new direction.
    pub fn scatter(&mut self, direction: Direction) {
        self.nscatt += 1;
        self.direction = direction;
    }
}

/// A photon packet peeled off from a regular packet after an emission or
/// scattering event, aimed directly at an instrument. It holds a
/// read-only reference to the dust system so that it can calculate the
/// optical depth of the path along which it is moving; the dust system
/// outlives every packet.
pub struct PeelOffPhotonPacket<'a> {
    packet: PhotonPacket,
    dust: Option<&'a DustSystem>,
}

impl<'a> PeelOffPhotonPacket<'a> {
    /// Constructs a peel-off packet by copying the relevant
    /// characteristics of a regular packet and attaching the dust
    /// system.
    #[must_use]
    pub fn new(
        source: &PhotonPacket,
        direction: Direction,
        luminosity: f64,
        dust: Option<&'a DustSystem>,
    ) -> Self {
        Self {
            packet: PhotonPacket {
                stellar: source.stellar,
                ell: source.ell,
                position: source.position,
                direction,
                luminosity,
                nscatt: source.nscatt,
                stokes: source.stokes,
            },
            dust,
        }
    }

    /// Returns the underlying photon packet.
    #[must_use]
    pub const fn packet(&self) -> &PhotonPacket {
        &self.packet
    }

    /// Returns the optical depth over the specified distance of the path
    /// along which the packet is moving. Without a dust system the
    /// optical depth is zero.
    #[must_use]
    pub fn optical_depth(&self, distance: f64) -> f64 {
        self.dust.map_or(0.0, |dust| {
            dust.optical_depth(
                self.packet.ell,
                self.packet.position,
                self.packet.direction,
                distance,
            )
        })
    }

    /// Returns the optical depth over the complete path to infinity.
    #[must_use]
    pub fn optical_depth_to_infinity(&self) -> f64 {
        self.optical_depth(f64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn propagation_moves_along_direction() {
        let mut packet = PhotonPacket::new(
            Some(0),
            2,
            Position::new(1.0, 0.0, 0.0),
            Direction::new(0.0, 0.0, 1.0),
            1.0,
        );
        packet.propagate(2.5);
        assert_approx_eq!(f64, packet.position.z(), 2.5, epsilon = 1e-12);
        assert_approx_eq!(f64, packet.position.x(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn scattering_counts_events() {
        let mut packet = PhotonPacket::new(
            None,
            0,
            Position::default(),
            Direction::new(1.0, 0.0, 0.0),
            1.0,
        );
        assert!(!packet.is_stellar());
        packet.scatter(Direction::new(0.0, 1.0, 0.0));
        packet.scatter(Direction::new(0.0, 0.0, 1.0));
        assert_eq!(packet.nscatt, 2);
        assert_eq!(packet.direction, Direction::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn peel_off_without_dust_sees_no_extinction() {
        let packet = PhotonPacket::new(
            Some(1),
            0,
            Position::default(),
            Direction::new(1.0, 0.0, 0.0),
            3.0,
        );
        let peel = PeelOffPhotonPacket::new(&packet, Direction::new(0.0, 1.0, 0.0), 3.0, None);
        assert_eq!(peel.optical_depth_to_infinity(), 0.0);
        assert_eq!(peel.packet().stellar, Some(1));
        assert_eq!(peel.packet().direction, Direction::new(0.0, 1.0, 0.0));
    }
}
