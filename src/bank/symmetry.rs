//! Point-group symmetry queries used by sampling and selection.
//!
//! A template with symmetry operator `S` satisfies `t(S x) = t(x)`, so the
//! orientations `R` and `S * R` describe the same copy.

use crate::bank::orientation::Orientation;
use crate::util::VolMatchError;
use nalgebra::{UnitQuaternion, Vector3};
use std::f64::consts::{PI, TAU};
use std::fmt;
use std::str::FromStr;

/// Symmetry catalogue interface.
pub trait Symmetry: Send + Sync {
    /// Short label, e.g. `C1` or `D7`.
    fn label(&self) -> String;

    /// All operators of the group, identity included.
    fn operators(&self) -> Vec<UnitQuaternion<f64>>;

    /// Returns whether the orientation's view lies in the asymmetric unit.
    fn in_asymmetric_unit(&self, orientation: &Orientation) -> bool;

    /// Smallest rotation angle between `a` and any symmetry mate of `b`.
    fn min_angle_between(&self, a: &Orientation, b: &Orientation) -> f64 {
        let ra = a.rotation();
        let rb = b.rotation();
        self.operators()
            .iter()
            .map(|op| ra.angle_to(&(op * rb)))
            .fold(f64::INFINITY, f64::min)
    }
}

/// Cyclic and dihedral point groups with the principal axis along z.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointGroup {
    /// No symmetry.
    C1,
    /// n-fold axis along z.
    Cyclic(u32),
    /// n-fold axis along z plus n two-fold axes in the xy plane (one along x).
    Dihedral(u32),
}

impl PointGroup {
    /// Order of the rotation axis about z.
    pub fn fold(&self) -> u32 {
        match *self {
            PointGroup::C1 => 1,
            PointGroup::Cyclic(n) | PointGroup::Dihedral(n) => n.max(1),
        }
    }

    /// Number of operators in the group.
    pub fn order(&self) -> usize {
        match *self {
            PointGroup::Dihedral(_) => 2 * self.fold() as usize,
            _ => self.fold() as usize,
        }
    }
}

impl fmt::Display for PointGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PointGroup::C1 => write!(f, "C1"),
            PointGroup::Cyclic(n) => write!(f, "C{n}"),
            PointGroup::Dihedral(n) => write!(f, "D{n}"),
        }
    }
}

impl FromStr for PointGroup {
    type Err = VolMatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = VolMatchError::InvalidParameter {
            name: "symmetry",
            reason: "expected C<n> or D<n> with n >= 1",
        };
        let mut chars = s.chars();
        let kind = chars.next().ok_or_else(|| invalid.clone())?;
        let n: u32 = chars.as_str().parse().map_err(|_| invalid.clone())?;
        if n == 0 {
            return Err(invalid);
        }
        match (kind.to_ascii_uppercase(), n) {
            ('C', 1) => Ok(PointGroup::C1),
            ('C', n) => Ok(PointGroup::Cyclic(n)),
            ('D', n) => Ok(PointGroup::Dihedral(n)),
            _ => Err(invalid),
        }
    }
}

impl Symmetry for PointGroup {
    fn label(&self) -> String {
        self.to_string()
    }

    fn operators(&self) -> Vec<UnitQuaternion<f64>> {
        let n = self.fold();
        let mut ops: Vec<UnitQuaternion<f64>> = (0..n)
            .map(|k| UnitQuaternion::from_axis_angle(&Vector3::z_axis(), TAU * k as f64 / n as f64))
            .collect();
        if let PointGroup::Dihedral(_) = self {
            let flip = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI);
            let flipped: Vec<_> = ops.iter().map(|op| op * flip).collect();
            ops.extend(flipped);
        }
        ops
    }

    fn in_asymmetric_unit(&self, orientation: &Orientation) -> bool {
        let eps = 1e-9;
        let dir = orientation.direction();
        if let PointGroup::Dihedral(_) = self {
            if dir.z < -eps {
                return false;
            }
        }
        let n = self.fold();
        if n == 1 {
            return true;
        }
        if dir.x * dir.x + dir.y * dir.y < 1e-18 {
            return true;
        }
        let half = PI / n as f64;
        let azimuth = dir.y.atan2(dir.x);
        azimuth >= -half - eps && azimuth < half - eps
    }
}

/// Quantized key identifying a symmetry equivalence class.
///
/// Equivalent orientations map to the same key (up to quantization at the
/// grid boundaries), so the key can drive deduplication.
pub(crate) fn canonical_key(ops: &[UnitQuaternion<f64>], orientation: &Orientation) -> [i64; 4] {
    let q = orientation.rotation();
    let scale = 1e6;
    ops.iter()
        .map(|op| {
            let r = op * q;
            let c = r.coords;
            // q and -q are the same rotation.
            let sign = if c.w < 0.0
                || (c.w == 0.0 && (c.x, c.y, c.z) < (0.0, 0.0, 0.0))
            {
                -1.0
            } else {
                1.0
            };
            [
                (sign * c.w * scale).round() as i64,
                (sign * c.x * scale).round() as i64,
                (sign * c.y * scale).round() as i64,
                (sign * c.z * scale).round() as i64,
            ]
        })
        .min()
        .unwrap_or([0; 4])
}

#[cfg(test)]
mod tests {
    use super::{canonical_key, PointGroup, Symmetry};
    use crate::bank::orientation::Orientation;
    use nalgebra::Vector3;
    use std::f64::consts::PI;

    #[test]
    fn parses_labels() {
        assert_eq!("C1".parse::<PointGroup>().unwrap(), PointGroup::C1);
        assert_eq!("c4".parse::<PointGroup>().unwrap(), PointGroup::Cyclic(4));
        assert_eq!("D7".parse::<PointGroup>().unwrap(), PointGroup::Dihedral(7));
        assert!("X2".parse::<PointGroup>().is_err());
        assert!("C0".parse::<PointGroup>().is_err());
        assert!("".parse::<PointGroup>().is_err());
        assert_eq!(PointGroup::Dihedral(3).label(), "D3");
    }

    #[test]
    fn operator_counts() {
        assert_eq!(PointGroup::C1.operators().len(), 1);
        assert_eq!(PointGroup::Cyclic(5).operators().len(), 5);
        assert_eq!(PointGroup::Dihedral(3).operators().len(), 6);
        assert_eq!(PointGroup::Dihedral(3).order(), 6);
    }

    #[test]
    fn cyclic_asymmetric_unit_limits_azimuth() {
        let c4 = PointGroup::Cyclic(4);
        let inside = Orientation::new(Vector3::new(1.0, 0.2, 0.3), 0.0);
        let outside = Orientation::new(Vector3::new(-1.0, 0.2, 0.3), 0.0);
        assert!(c4.in_asymmetric_unit(&inside));
        assert!(!c4.in_asymmetric_unit(&outside));
        assert!(c4.in_asymmetric_unit(&Orientation::identity()));
    }

    #[test]
    fn dihedral_requires_upper_hemisphere() {
        let d2 = PointGroup::Dihedral(2);
        let lower = Orientation::new(Vector3::new(1.0, 0.0, -0.5), 0.0);
        assert!(!d2.in_asymmetric_unit(&lower));
        let upper = Orientation::new(Vector3::new(1.0, 0.0, 0.5), 0.0);
        assert!(d2.in_asymmetric_unit(&upper));
    }

    #[test]
    fn symmetry_mates_share_key_and_zero_angle() {
        let c3 = PointGroup::Cyclic(3);
        let ops = c3.operators();
        let o = Orientation::new(Vector3::new(0.4, 0.1, 0.9), 0.5);
        let mate = Orientation::from_rotation(&(ops[1] * o.rotation()));
        assert_eq!(canonical_key(&ops, &o), canonical_key(&ops, &mate));
        assert!(c3.min_angle_between(&o, &mate) < 1e-9);
        assert!((PointGroup::C1.min_angle_between(&o, &mate) - 2.0 * PI / 3.0).abs() < 1e-6);
    }
}
