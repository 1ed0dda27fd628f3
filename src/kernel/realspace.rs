//! Real-space correlation at arbitrary sub-voxel poses.

use crate::kernel::score::{Moments, ScoreNormalizer};
use crate::kernel::PoseScorer;
use crate::refine::Pose;
use crate::template::TemplatePlan;
use crate::volume::Volume;
use nalgebra::Vector3;

/// Scores a template pose by sampling the filtered target around it.
///
/// Each masked template voxel at offset `u - c` from the box center is paired
/// with the target sampled (periodic, trilinear) at
/// `location + scale * R^T (u - c)`. The frequency mask is not applied here.
pub struct RealSpaceScorer<'a> {
    target: &'a Volume,
    plan: &'a TemplatePlan,
    normalizer: &'a dyn ScoreNormalizer,
    global_var: f64,
}

impl<'a> RealSpaceScorer<'a> {
    pub fn new(
        target: &'a Volume,
        plan: &'a TemplatePlan,
        normalizer: &'a dyn ScoreNormalizer,
        global_var: f64,
    ) -> Self {
        Self {
            target,
            plan,
            normalizer,
            global_var,
        }
    }

    /// Correlation score of the template at `pose`.
    pub fn score_at(&self, pose: &Pose) -> f32 {
        if !(pose.scale.is_finite() && pose.scale > 0.0) {
            return 0.0;
        }
        let base = self.plan.base();
        let inverse = pose.orientation.rotation().to_rotation_matrix().transpose();
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut numerator = 0.0f64;
        for (o, &t) in base.offsets().iter().zip(base.values()) {
            let w = Vector3::new(o[0] as f64, o[1] as f64, o[2] as f64);
            let p = pose.location + inverse * w * pose.scale;
            let g = self.target.sample_periodic(p) as f64;
            sum += g;
            sum_sq += g * g;
            numerator += t as f64 * g;
        }
        let moments = Moments {
            count: base.len() as f64,
            sum,
            sum_sq,
            global_var: self.global_var,
        };
        self.normalizer.score(numerator, base.norm_sq(), &moments)
    }
}

impl PoseScorer for RealSpaceScorer<'_> {
    fn score_pose(&self, pose: &Pose) -> f32 {
        self.score_at(pose)
    }
}
