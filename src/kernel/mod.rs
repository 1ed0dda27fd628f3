//! Correlation kernels.
//!
//! The FFT engine scores every template center for one orientation at a
//! time; the real-space scorer evaluates single sub-voxel poses.

use crate::refine::Pose;

pub mod fourier;
pub mod realspace;
pub mod score;

pub use fourier::{CorrelationEngine, EngineConfig};
pub use realspace::RealSpaceScorer;
pub use score::{GlobalZncc, LocalZncc, Moments, Normalization, ScoreNormalizer};

/// Objective evaluated by the local refiners.
pub trait PoseScorer: Sync {
    /// Score of the template at `pose`; higher is better.
    fn score_pose(&self, pose: &Pose) -> f32;
}

impl<F> PoseScorer for F
where
    F: Fn(&Pose) -> f32 + Sync,
{
    fn score_pose(&self, pose: &Pose) -> f32 {
        self(pose)
    }
}
