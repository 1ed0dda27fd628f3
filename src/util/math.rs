//! Angle helpers shared by sampling and refinement.

use std::f64::consts::{PI, TAU};

/// Wraps an angle in radians to the range [-pi, pi).
pub(crate) fn wrap_rad(angle: f64) -> f64 {
    let mut wrapped = angle % TAU;
    if wrapped < -PI {
        wrapped += TAU;
    }
    if wrapped >= PI {
        wrapped -= TAU;
    }
    wrapped
}

/// Number of whole steps of size `step` that fit within `limit`.
pub(crate) fn steps_within(limit: f64, step: f64) -> i64 {
    if step <= 0.0 || limit <= 0.0 {
        return 0;
    }
    // Small tolerance so a limit that is an exact multiple keeps its last step.
    (limit / step + 1e-9).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::{steps_within, wrap_rad};
    use std::f64::consts::PI;

    #[test]
    fn wrap_rad_maps_to_expected_range() {
        assert!((wrap_rad(PI + 0.1) - (-PI + 0.1)).abs() < 1e-12);
        assert!((wrap_rad(-PI - 0.1) - (PI - 0.1)).abs() < 1e-12);
        assert!((wrap_rad(3.0 * PI) + PI).abs() < 1e-12);
    }

    #[test]
    fn steps_within_counts_exact_multiples() {
        assert_eq!(steps_within(0.3, 0.1), 3);
        assert_eq!(steps_within(0.25, 0.1), 2);
        assert_eq!(steps_within(0.0, 0.1), 0);
        assert_eq!(steps_within(1.0, 0.0), 0);
    }
}
