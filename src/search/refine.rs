//! Per-particle refinement after search or on a loaded particle list.

use crate::kernel::PoseScorer;
use crate::particle::ParticleList;
use crate::refine::{refine_pose, Pose, RefineConfig, RefineStatus, RefineStrategy, Refinement};
use crate::trace::{trace_event, trace_span};
use crate::util::par::try_map;
use crate::util::VolMatchResult;

/// Counts reported by a refinement pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefineSummary {
    /// Selected particles that were refined.
    pub refined: usize,
    /// Particles whose FOM strictly improved.
    pub improved: usize,
    pub converged: usize,
    pub budget_exhausted: usize,
}

/// Refines every selected particle of `particles` against `scorer`.
///
/// Refinements run independently (in parallel when `parallel` is set); the
/// list is updated afterwards, in order. A particle's FOM never decreases.
/// Hill-climb runs use the configured seed offset by the particle's index, so
/// results do not depend on scheduling.
pub fn refine_particles<S>(
    scorer: &S,
    particles: &mut ParticleList,
    cfg: &RefineConfig,
    parallel: bool,
) -> VolMatchResult<RefineSummary>
where
    S: PoseScorer + ?Sized,
{
    cfg.limits.validate()?;
    if let RefineStrategy::Grid(grid) = &cfg.strategy {
        grid.validate()?;
    }
    let jobs: Vec<(usize, Pose, f32)> = particles
        .iter()
        .enumerate()
        .filter(|(_, p)| p.selected)
        .map(|(idx, p)| (idx, p.pose(), p.score()))
        .collect();
    let _span = trace_span!("refine_particles", particles = jobs.len()).entered();

    let results: Vec<(usize, Refinement)> = try_map(&jobs, parallel, |_, &(idx, pose, score)| {
        let mut local = *cfg;
        if let RefineStrategy::HillClimb(hc) = &cfg.strategy {
            local.strategy = RefineStrategy::HillClimb(hc.for_stream(idx as u64));
        }
        Ok((idx, refine_pose(scorer, &pose, score, &local)?))
    })?;

    let mut summary = RefineSummary::default();
    let slice = particles.as_mut_slice();
    for (idx, r) in results {
        summary.refined += 1;
        match r.status {
            RefineStatus::Converged => summary.converged += 1,
            RefineStatus::BudgetExhausted => summary.budget_exhausted += 1,
            RefineStatus::Unrefined => {}
        }
        let particle = &mut slice[idx];
        if r.improved() || !particle.score().is_finite() {
            particle.set_pose(&r.pose);
            particle.set_score(r.score);
        }
        if r.improved() {
            summary.improved += 1;
        }
    }
    trace_event!(
        "refined",
        refined = summary.refined,
        improved = summary.improved,
        converged = summary.converged
    );
    Ok(summary)
}
