//! View orientation: a unit direction plus an in-plane rotation.

use crate::util::math::wrap_rad;
use nalgebra::{Unit, UnitQuaternion, Vector3};
use rand::Rng;
use std::f64::consts::PI;

/// Orientation of a template copy.
///
/// The equivalent rotation first spins by `angle` about +z and then carries
/// +z onto `direction` along the shortest arc, so `rotation() * z == direction`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Orientation {
    direction: Vector3<f64>,
    angle: f64,
}

impl Default for Orientation {
    fn default() -> Self {
        Self::identity()
    }
}

impl Orientation {
    /// Creates an orientation, normalizing the direction and wrapping the angle.
    ///
    /// A zero or non-finite direction becomes +z.
    pub fn new(direction: Vector3<f64>, angle: f64) -> Self {
        let norm = direction.norm();
        let direction = if norm.is_finite() && norm > 1e-12 {
            direction / norm
        } else {
            Vector3::z()
        };
        let angle = if angle.is_finite() { wrap_rad(angle) } else { 0.0 };
        Self { direction, angle }
    }

    pub fn identity() -> Self {
        Self {
            direction: Vector3::z(),
            angle: 0.0,
        }
    }

    pub fn direction(&self) -> Vector3<f64> {
        self.direction
    }

    /// In-plane rotation in radians, in `[-pi, pi)`.
    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// Rotation taking template coordinates into this orientation.
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        direction_rotation(&self.direction)
            * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), self.angle)
    }

    /// Recovers the orientation of a rotation.
    pub fn from_rotation(rotation: &UnitQuaternion<f64>) -> Self {
        let direction = rotation * Vector3::z();
        let direction = Self::new(direction, 0.0).direction;
        let spin = direction_rotation(&direction).inverse() * rotation;
        let angle = 2.0 * spin.k.atan2(spin.w);
        Self::new(direction, angle)
    }

    /// Full rotation angle (radians) between two orientations.
    pub fn angle_to(&self, other: &Orientation) -> f64 {
        self.rotation().angle_to(&other.rotation())
    }

    /// Angle (radians) between the two view directions only.
    pub fn direction_angle(&self, other: &Orientation) -> f64 {
        self.direction.dot(&other.direction).clamp(-1.0, 1.0).acos()
    }

    /// Uniformly distributed random orientation.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let z: f64 = rng.random_range(-1.0..=1.0);
        let phi: f64 = rng.random_range(-PI..PI);
        let r = (1.0 - z * z).max(0.0).sqrt();
        let angle: f64 = rng.random_range(-PI..PI);
        Self::new(Vector3::new(r * phi.cos(), r * phi.sin(), z), angle)
    }

    /// Returns a copy rotated about `axis` by `angle` (direction only).
    pub(crate) fn tilted(&self, axis: &Unit<Vector3<f64>>, angle: f64) -> Self {
        let q = UnitQuaternion::from_axis_angle(axis, angle);
        Self::new(q * self.direction, self.angle)
    }
}

/// Shortest-arc rotation carrying +z onto `direction` (unit length).
fn direction_rotation(direction: &Vector3<f64>) -> UnitQuaternion<f64> {
    if direction.z < -1.0 + 1e-12 {
        // Antipodal: half turn about y.
        return UnitQuaternion::from_axis_angle(&Vector3::y_axis(), PI);
    }
    UnitQuaternion::rotation_between(&Vector3::z(), direction).unwrap_or_else(UnitQuaternion::identity)
}

#[cfg(test)]
mod tests {
    use super::Orientation;
    use nalgebra::Vector3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn zero_direction_becomes_z() {
        let o = Orientation::new(Vector3::zeros(), 0.3);
        assert_eq!(o.direction(), Vector3::z());
        assert!((o.angle() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn rotation_maps_z_onto_direction() {
        let o = Orientation::new(Vector3::new(1.0, 2.0, -0.5), 1.1);
        let mapped = o.rotation() * Vector3::z();
        assert!((mapped - o.direction()).norm() < 1e-12);
    }

    #[test]
    fn rotation_round_trip() {
        let cases = [
            Orientation::new(Vector3::new(0.3, -0.4, 0.8), -2.0),
            Orientation::new(Vector3::new(0.0, 0.0, -1.0), 0.7),
            Orientation::new(Vector3::new(0.0, 0.0, 1.0), -1.2),
            Orientation::new(Vector3::new(1.0, 0.0, 0.0), 3.0),
        ];
        for o in cases {
            let back = Orientation::from_rotation(&o.rotation());
            assert!(o.angle_to(&back) < 1e-9, "{o:?} -> {back:?}");
        }
    }

    #[test]
    fn in_plane_spin_about_z_matches_angle() {
        let a = Orientation::new(Vector3::z(), 0.0);
        let b = Orientation::new(Vector3::z(), 0.4);
        assert!((a.angle_to(&b) - 0.4).abs() < 1e-12);
        assert!(a.direction_angle(&b).abs() < 1e-12);
    }

    #[test]
    fn direction_angle_of_orthogonal_views() {
        let a = Orientation::new(Vector3::z(), 0.0);
        let b = Orientation::new(Vector3::x(), 0.0);
        assert!((a.direction_angle(&b) - FRAC_PI_2).abs() < 1e-12);
        let c = Orientation::new(-Vector3::z(), 0.0);
        assert!((a.angle_to(&c) - PI).abs() < 1e-9);
    }

    #[test]
    fn random_orientations_are_unit() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let o = Orientation::random(&mut rng);
            assert!((o.direction().norm() - 1.0).abs() < 1e-12);
            assert!(o.angle() >= -PI && o.angle() < PI);
        }
    }
}
