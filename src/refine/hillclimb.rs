//! Randomized hill climbing with a seeded generator.

use crate::bank::{Perturbation, PerturbationConfig};
use crate::kernel::PoseScorer;
use crate::refine::limits::Limits;
use crate::refine::{Pose, RefineStatus, Refinement};
use crate::util::VolMatchResult;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Hill-climb settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HillClimbConfig {
    pub perturbation: PerturbationConfig,
    /// Maximum number of proposals.
    pub max_iterations: usize,
    /// Consecutive rejections that end the run as converged; `0` disables.
    pub patience: usize,
    /// Generator seed; runs with equal seeds are identical.
    pub seed: u64,
}

impl Default for HillClimbConfig {
    fn default() -> Self {
        Self {
            perturbation: PerturbationConfig::default(),
            max_iterations: 500,
            patience: 100,
            seed: 0,
        }
    }
}

impl HillClimbConfig {
    /// Same settings with the seed offset by `stream`, for per-particle runs.
    pub fn for_stream(&self, stream: u64) -> Self {
        Self {
            seed: self.seed.wrapping_add(stream),
            ..*self
        }
    }
}

pub(crate) fn refine_hill_climb<S>(
    scorer: &S,
    start: &Pose,
    start_score: f32,
    limits: &Limits,
    cfg: &HillClimbConfig,
) -> VolMatchResult<Refinement>
where
    S: PoseScorer + ?Sized,
{
    let model = Perturbation::new(cfg.perturbation)?;
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut result = Refinement::unrefined(*start, start_score);
    let mut rejections = 0usize;

    for _ in 0..cfg.max_iterations {
        result.iterations += 1;
        let proposal = model.sample(&result.pose, &mut rng);
        let accepted = limits.allows(start, &proposal) && {
            let score = scorer.score_pose(&proposal);
            result.evaluations += 1;
            if score > result.score {
                result.pose = proposal;
                result.score = score;
                true
            } else {
                false
            }
        };
        if accepted {
            rejections = 0;
        } else {
            rejections += 1;
            if cfg.patience > 0 && rejections >= cfg.patience {
                result.status = RefineStatus::Converged;
                return Ok(result);
            }
        }
    }
    if result.iterations > 0 {
        result.status = RefineStatus::BudgetExhausted;
    }
    Ok(result)
}
