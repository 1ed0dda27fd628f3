//! Orientation scan: correlate every orientation and keep the best score
//! per location.

use crate::bank::Orientation;
use crate::candidate::BestScoreMap;
use crate::kernel::CorrelationEngine;
use crate::trace::{trace_debug, trace_event, trace_span};
use crate::util::par::try_fold_reduce;
use crate::util::VolMatchResult;

/// Correlates `orientations` against the engine's target and reduces the
/// score volumes into one [`BestScoreMap`].
///
/// Each worker folds its orientations into a private map; partial maps are
/// merged pairwise. The result does not depend on `parallel`.
pub fn scan_orientations(
    engine: &CorrelationEngine,
    orientations: &[Orientation],
    parallel: bool,
) -> VolMatchResult<BestScoreMap> {
    let dims = engine.dims();
    let _span = trace_span!("scan", orientations = orientations.len()).entered();
    let map = try_fold_reduce(
        orientations,
        parallel,
        || BestScoreMap::new(dims),
        |mut acc, idx, orientation| {
            let scores = engine.correlate(orientation)?;
            trace_debug!("orientation_scored", index = idx);
            acc.absorb(idx, &scores)?;
            Ok(acc)
        },
        BestScoreMap::merge,
    )?;
    let best = map
        .scores()
        .iter()
        .copied()
        .filter(|s| s.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    trace_event!("scan_done", orientations = orientations.len(), best = best);
    Ok(map)
}
