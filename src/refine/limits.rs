//! Shift and angular limits relative to a starting pose.

use crate::bank::Orientation;
use crate::refine::Pose;
use crate::util::math::wrap_rad;
use crate::util::{VolMatchError, VolMatchResult};
use nalgebra::Vector3;

/// Allowed displacement from the start location (voxels).
///
/// The region is every point within `radius` of a solid cylinder aligned
/// with the view direction: `along` is its half length and `orthogonal` its
/// radius. With both at zero it is a sphere; `along` alone gives a capsule
/// and `orthogonal` alone a dilated disc.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShiftLimit {
    pub radius: f64,
    pub along: f64,
    pub orthogonal: f64,
}

impl Default for ShiftLimit {
    fn default() -> Self {
        Self {
            radius: 3.0,
            along: 0.0,
            orthogonal: 0.0,
        }
    }
}

impl ShiftLimit {
    pub fn sphere(radius: f64) -> Self {
        Self {
            radius,
            along: 0.0,
            orthogonal: 0.0,
        }
    }

    pub fn validate(&self) -> VolMatchResult<()> {
        let ok = [self.radius, self.along, self.orthogonal]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0);
        if ok {
            Ok(())
        } else {
            Err(VolMatchError::InvalidParameter {
                name: "shift_limit",
                reason: "radius, along and orthogonal must be finite and >= 0",
            })
        }
    }

    /// Whether `displacement` is allowed for a view along `axis` (unit length).
    pub fn allows(&self, displacement: &Vector3<f64>, axis: &Vector3<f64>) -> bool {
        let a = displacement.dot(axis);
        let perp = (displacement - axis * a).norm();
        let da = (a.abs() - self.along).max(0.0);
        let dp = (perp - self.orthogonal).max(0.0);
        da * da + dp * dp <= self.radius * self.radius + 1e-9
    }
}

/// Allowed orientation change from the start (radians).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AngularLimit {
    /// Largest angle between the start and candidate view directions.
    pub view: f64,
    /// Largest change of the in-plane angle.
    pub angle: f64,
}

impl Default for AngularLimit {
    fn default() -> Self {
        Self {
            view: 10f64.to_radians(),
            angle: 10f64.to_radians(),
        }
    }
}

impl AngularLimit {
    pub fn validate(&self) -> VolMatchResult<()> {
        if !(self.view.is_finite() && self.angle.is_finite()) || self.view < 0.0 || self.angle < 0.0 {
            return Err(VolMatchError::InvalidParameter {
                name: "angular_limit",
                reason: "view and angle limits must be finite and >= 0",
            });
        }
        Ok(())
    }

    /// Whether `candidate` lies within the limits around `reference`.
    pub fn allows(&self, reference: &Orientation, candidate: &Orientation) -> bool {
        let eps = 1e-9;
        if reference.direction_angle(candidate) > self.view + eps {
            return false;
        }
        wrap_rad(candidate.angle() - reference.angle()).abs() <= self.angle + eps
    }
}

/// Combined limits checked before a proposal is scored.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Limits {
    pub shift: ShiftLimit,
    pub angular: AngularLimit,
}

impl Limits {
    pub fn validate(&self) -> VolMatchResult<()> {
        self.shift.validate()?;
        self.angular.validate()
    }

    /// Whether `candidate` stays within the limits around `start`.
    pub fn allows(&self, start: &Pose, candidate: &Pose) -> bool {
        let axis = start.orientation.direction();
        let displacement = candidate.location - start.location;
        if !self.shift.allows(&displacement, &axis) {
            return false;
        }
        self.angular.allows(&start.orientation, &candidate.orientation)
    }
}

#[cfg(test)]
mod tests {
    use super::{AngularLimit, Limits, ShiftLimit};
    use crate::bank::Orientation;
    use crate::refine::Pose;
    use nalgebra::Vector3;

    #[test]
    fn sphere_capsule_and_disc() {
        let z = Vector3::z();
        let sphere = ShiftLimit::sphere(2.0);
        assert!(sphere.allows(&Vector3::new(0.0, 0.0, 2.0), &z));
        assert!(!sphere.allows(&Vector3::new(0.0, 0.0, 2.5), &z));

        let capsule = ShiftLimit {
            radius: 1.0,
            along: 4.0,
            orthogonal: 0.0,
        };
        assert!(capsule.allows(&Vector3::new(0.0, 0.5, 4.5), &z));
        assert!(!capsule.allows(&Vector3::new(2.0, 0.0, 0.0), &z));

        let disc = ShiftLimit {
            radius: 1.0,
            along: 0.0,
            orthogonal: 4.0,
        };
        assert!(disc.allows(&Vector3::new(4.5, 0.0, 0.5), &z));
        assert!(!disc.allows(&Vector3::new(0.0, 0.0, 1.5), &z));
    }

    #[test]
    fn angular_limits_are_relative_to_start() {
        let limits = Limits {
            shift: ShiftLimit::sphere(5.0),
            angular: AngularLimit {
                view: 0.2,
                angle: 0.1,
            },
        };
        let start = Pose::new(Vector3::zeros(), Orientation::new(Vector3::z(), 3.1));
        let near = Pose::new(Vector3::zeros(), Orientation::new(Vector3::new(0.1, 0.0, 1.0), -3.13));
        assert!(limits.allows(&start, &near));
        let tilted = Pose::new(Vector3::zeros(), Orientation::new(Vector3::new(1.0, 0.0, 1.0), 3.1));
        assert!(!limits.allows(&start, &tilted));
        let spun = Pose::new(Vector3::zeros(), Orientation::new(Vector3::z(), 2.9));
        assert!(!limits.allows(&start, &spun));
        assert!(Limits::default().validate().is_ok());
    }
}
