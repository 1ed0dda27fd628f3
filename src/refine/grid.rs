//! Shrinking grid refinement.

use crate::bank::LocalGrid;
use crate::kernel::PoseScorer;
use crate::refine::limits::Limits;
use crate::refine::{Pose, RefineStatus, Refinement};
use crate::util::{VolMatchError, VolMatchResult};
use nalgebra::Vector3;

/// Shrinking grid settings. Angles in radians, shifts in voxels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridConfig {
    /// Initial orientation grid around the current best pose.
    pub local: LocalGrid,
    /// Initial spacing of the 3x3x3 shift grid.
    pub shift_step: f64,
    /// Angular step floor.
    pub min_angle_step: f64,
    /// Shift step floor.
    pub min_shift_step: f64,
    /// Maximum number of iterations.
    pub max_iterations: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            local: LocalGrid::default(),
            shift_step: 1.0,
            min_angle_step: 0.25f64.to_radians(),
            min_shift_step: 0.1,
            max_iterations: 8,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> VolMatchResult<()> {
        self.local.validate()?;
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.shift_step) {
            return Err(VolMatchError::InvalidParameter {
                name: "shift_step",
                reason: "must be finite and > 0",
            });
        }
        if !(positive(self.min_angle_step) && positive(self.min_shift_step)) {
            return Err(VolMatchError::InvalidParameter {
                name: "min_step",
                reason: "step floors must be finite and > 0",
            });
        }
        Ok(())
    }
}

/// Each iteration scores every combination of the local orientation grid
/// around the current best and a 3x3x3 shift grid, moves to the best
/// strictly-improving combination, then halves all steps and limits.
pub(crate) fn refine_grid<S>(
    scorer: &S,
    start: &Pose,
    start_score: f32,
    limits: &Limits,
    cfg: &GridConfig,
) -> VolMatchResult<Refinement>
where
    S: PoseScorer + ?Sized,
{
    cfg.validate()?;
    let mut result = Refinement::unrefined(*start, start_score);
    let mut grid = cfg.local;
    let mut shift = cfg.shift_step;

    for _ in 0..cfg.max_iterations {
        let views = grid.around(&result.pose.orientation)?;
        let mut best: Option<(Pose, f32)> = None;
        for (vi, orientation) in views.iter().enumerate() {
            for dz in -1i32..=1 {
                for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        if vi == 0 && dx == 0 && dy == 0 && dz == 0 {
                            continue;
                        }
                        let offset = Vector3::new(dx as f64, dy as f64, dz as f64) * shift;
                        let pose = Pose {
                            location: result.pose.location + offset,
                            orientation: *orientation,
                            scale: result.pose.scale,
                        };
                        if !limits.allows(start, &pose) {
                            continue;
                        }
                        let score = scorer.score_pose(&pose);
                        result.evaluations += 1;
                        if best.map_or(true, |(_, s)| score > s) {
                            best = Some((pose, score));
                        }
                    }
                }
            }
        }
        if let Some((pose, score)) = best {
            if score > result.score {
                result.pose = pose;
                result.score = score;
            }
        }
        result.iterations += 1;
        grid = grid.halved();
        shift *= 0.5;
        let angle_step = grid.view_step.max(grid.angle_step);
        if angle_step < cfg.min_angle_step && shift < cfg.min_shift_step {
            result.status = RefineStatus::Converged;
            return Ok(result);
        }
    }
    if result.iterations > 0 {
        result.status = RefineStatus::BudgetExhausted;
    }
    Ok(result)
}
