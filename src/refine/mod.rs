//! Local pose refinement.
//!
//! Both strategies only ever move to strictly better poses, so the returned
//! score is never below the starting score. Proposals outside the [`Limits`]
//! are discarded without being scored.

use crate::bank::Orientation;
use crate::kernel::PoseScorer;
use crate::trace::trace_debug;
use crate::util::VolMatchResult;
use nalgebra::Vector3;

pub mod grid;
pub mod hillclimb;
pub mod limits;
pub(crate) mod quad1d;
pub(crate) mod quad3d;

pub use grid::GridConfig;
pub use hillclimb::HillClimbConfig;
pub use limits::{AngularLimit, Limits, ShiftLimit};

/// Location (voxels), orientation and relative scale of a template copy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub location: Vector3<f64>,
    pub orientation: Orientation,
    pub scale: f64,
}

impl Pose {
    /// Pose at unit scale.
    pub fn new(location: Vector3<f64>, orientation: Orientation) -> Self {
        Self {
            location,
            orientation,
            scale: 1.0,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }
}

/// Outcome of a refinement run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefineStatus {
    /// No iteration ran.
    Unrefined,
    /// Steps fell below their floors, or patience ran out.
    Converged,
    /// The iteration budget was used up.
    BudgetExhausted,
}

/// Refined pose and bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Refinement {
    pub pose: Pose,
    pub score: f32,
    pub start_score: f32,
    pub status: RefineStatus,
    pub iterations: usize,
    pub evaluations: usize,
}

impl Refinement {
    fn unrefined(pose: Pose, score: f32) -> Self {
        Self {
            pose,
            score,
            start_score: score,
            status: RefineStatus::Unrefined,
            iterations: 0,
            evaluations: 0,
        }
    }

    /// Whether the score strictly improved.
    pub fn improved(&self) -> bool {
        self.score > self.start_score
    }
}

/// Local optimization strategy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RefineStrategy {
    /// Deterministic shrinking grid.
    Grid(GridConfig),
    /// Seeded randomized hill climb.
    HillClimb(HillClimbConfig),
}

impl Default for RefineStrategy {
    fn default() -> Self {
        RefineStrategy::Grid(GridConfig::default())
    }
}

/// Refinement settings.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RefineConfig {
    pub strategy: RefineStrategy,
    pub limits: Limits,
    /// Fit a sub-voxel location around the refined pose.
    pub interpolate: bool,
}

/// Refines `start` against `scorer`.
///
/// A non-finite `start_score` is replaced by the score of `start`.
pub fn refine_pose<S>(
    scorer: &S,
    start: &Pose,
    start_score: f32,
    cfg: &RefineConfig,
) -> VolMatchResult<Refinement>
where
    S: PoseScorer + ?Sized,
{
    cfg.limits.validate()?;
    let start_score = if start_score.is_finite() {
        start_score
    } else {
        scorer.score_pose(start)
    };
    let mut result = match &cfg.strategy {
        RefineStrategy::Grid(grid) => grid::refine_grid(scorer, start, start_score, &cfg.limits, grid)?,
        RefineStrategy::HillClimb(hc) => {
            hillclimb::refine_hill_climb(scorer, start, start_score, &cfg.limits, hc)?
        }
    };
    if cfg.interpolate {
        interpolate_location(scorer, start, &cfg.limits, &mut result);
    }
    trace_debug!(
        "refined",
        start_score = result.start_score,
        score = result.score,
        iterations = result.iterations,
        evaluations = result.evaluations
    );
    Ok(result)
}

/// Separable quadratic fit over the six axis neighbors of the refined
/// location; kept only if the re-scored pose is not worse.
fn interpolate_location<S>(scorer: &S, start: &Pose, limits: &Limits, result: &mut Refinement)
where
    S: PoseScorer + ?Sized,
{
    let center = result.pose;
    let mut s = [[f32::NAN; 3]; 3];
    for (axis, row) in s.iter_mut().enumerate() {
        row[1] = result.score;
        for (slot, step) in [(0usize, -1.0f64), (2, 1.0)] {
            let mut neighbor = center;
            neighbor.location[axis] += step;
            if limits.allows(start, &neighbor) {
                row[slot] = scorer.score_pose(&neighbor);
                result.evaluations += 1;
            }
        }
    }
    let offset = quad3d::vertex_offsets(s);
    if offset.norm() == 0.0 {
        return;
    }
    let candidate = Pose {
        location: center.location + offset,
        ..center
    };
    if !limits.allows(start, &candidate) {
        return;
    }
    let score = scorer.score_pose(&candidate);
    result.evaluations += 1;
    if score >= result.score {
        result.pose = candidate;
        result.score = score;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Pose;
    use nalgebra::Vector3;

    /// Smooth objective peaking at `peak` with the given in-plane angle.
    pub(crate) fn bowl(peak: Vector3<f64>, angle: f64) -> impl Fn(&Pose) -> f32 + Sync {
        move |pose: &Pose| {
            let d2 = (pose.location - peak).norm_squared();
            let da = crate::util::math::wrap_rad(pose.orientation.angle() - angle);
            let tilt = pose.orientation.direction_angle(&crate::bank::Orientation::identity());
            (1.0 - 0.02 * d2 - 2.0 * da * da - 2.0 * tilt * tilt) as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::bowl;
    use super::{refine_pose, Pose, RefineConfig, RefineStatus};
    use crate::bank::Orientation;
    use nalgebra::Vector3;

    #[test]
    fn interpolation_never_lowers_score() {
        let scorer = bowl(Vector3::new(10.3, 9.8, 10.0), 0.0);
        let start = Pose::new(Vector3::new(10.0, 10.0, 10.0), Orientation::identity());
        let cfg = RefineConfig {
            interpolate: true,
            ..RefineConfig::default()
        };
        let out = refine_pose(&scorer, &start, f32::NAN, &cfg).unwrap();
        assert!(out.score >= out.start_score);
        assert!((out.pose.location.x - 10.3).abs() < 0.05, "{:?}", out.pose.location);
        assert!((out.pose.location.y - 9.8).abs() < 0.05);
        assert_ne!(out.status, RefineStatus::Unrefined);
    }
}
