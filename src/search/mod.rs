//! High-level search and refinement entry points.
//!
//! A [`Finder`] owns a template and a [`SearchConfig`]. [`Finder::search`]
//! scans the asymmetric unit of orientations, extracts separated peaks and
//! optionally refines them; [`Finder::refine`] refines an existing particle
//! list against a target.

use crate::bank::{SamplingConfig, Symmetry};
use crate::candidate::{extract_peaks, BestScoreMap, ExtractConfig};
use crate::kernel::{CorrelationEngine, EngineConfig};
use crate::particle::{Particle, ParticleList, Region};
use crate::refine::RefineConfig;
use crate::template::Template;
use crate::trace::{trace_event, trace_span};
use crate::util::{VolMatchError, VolMatchResult};
use crate::volume::Volume;

pub mod refine;
pub mod scan;

pub use refine::{refine_particles, RefineSummary};
pub use scan::scan_orientations;

/// Search configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchConfig {
    pub sampling: SamplingConfig,
    pub engine: EngineConfig,
    pub extract: ExtractConfig,
    /// Refine every extracted peak at full resolution; `None` skips refinement.
    pub refine: Option<RefineConfig>,
    /// Integer binning applied to target and template before the scan.
    pub bin: usize,
    /// Only peaks inside this sphere (unbinned voxels) are extracted.
    pub region: Option<Region>,
    /// Fan out over orientations and particles (requires the `rayon` feature).
    pub parallel: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            engine: EngineConfig::default(),
            extract: ExtractConfig::default(),
            refine: None,
            bin: 1,
            region: None,
            parallel: true,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> VolMatchResult<()> {
        self.sampling.validate()?;
        self.extract.validate()?;
        if self.bin == 0 {
            return Err(VolMatchError::InvalidParameter {
                name: "bin",
                reason: "binning factor must be at least 1",
            });
        }
        if let Some(refine) = &self.refine {
            refine.limits.validate()?;
        }
        if let Some(region) = &self.region {
            if !(region.radius.is_finite() && region.radius > 0.0)
                || !region.center.iter().all(|c| c.is_finite())
            {
                return Err(VolMatchError::InvalidParameter {
                    name: "region",
                    reason: "radius must be positive and the center finite",
                });
            }
        }
        Ok(())
    }
}

/// Result of [`Finder::search`].
#[derive(Clone, Debug)]
pub struct SearchOutcome {
    pub particles: ParticleList,
    /// Best score per location (binned extents when binning).
    pub scores: BestScoreMap,
    pub orientations: usize,
    /// Peaks extracted from the score map.
    pub found: usize,
    /// Refined particles dropped for ending up within the minimum distance
    /// of a better one.
    pub collapsed: usize,
    /// Separation enforced between particles (unbinned voxels).
    pub min_distance: f64,
    /// Threshold actually used for extraction.
    pub threshold: f32,
    /// Whether the threshold was lowered automatically.
    pub threshold_lowered: bool,
    /// Refinement counts, when refinement ran.
    pub refinement: Option<RefineSummary>,
}

/// Template search driver.
#[derive(Clone, Debug)]
pub struct Finder {
    template: Template,
    config: SearchConfig,
}

impl Finder {
    pub fn new(template: Template) -> Self {
        Self {
            template,
            config: SearchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Locates copies of the template in `target`.
    ///
    /// Particle locations are in unbinned target voxels; particles are
    /// numbered from 1 in descending score order. A non-positive
    /// `extract.min_distance` becomes the smallest template extent. After
    /// refinement, particles that moved within that distance of a better
    /// one are dropped.
    pub fn search(&self, target: &Volume, symmetry: &dyn Symmetry) -> VolMatchResult<SearchOutcome> {
        let cfg = &self.config;
        cfg.validate()?;
        let _span = trace_span!("search", volume = target.label(), symmetry = %symmetry.label()).entered();

        let orientations = cfg.sampling.asymmetric_unit(symmetry)?;
        if orientations.is_empty() {
            return Err(VolMatchError::InvalidAngularStep {
                reason: "no orientation falls in the asymmetric unit",
            });
        }
        let (binned_target, binned_template) = if cfg.bin > 1 {
            (target.binned(cfg.bin)?, self.template.binned(cfg.bin)?)
        } else {
            (target.clone(), self.template.clone())
        };
        let engine = CorrelationEngine::new(&binned_target, &binned_template, &cfg.engine)?;
        let mut scores = scan_orientations(&engine, &orientations, cfg.parallel)?;
        let bin = cfg.bin as f64;
        if let Some(region) = &cfg.region {
            let cleared = scores.clear_outside(&(region.center / bin), region.radius / bin);
            trace_event!("region", cleared = cleared, radius = region.radius);
        }

        let min_distance = if cfg.extract.min_distance > 0.0 {
            cfg.extract.min_distance
        } else {
            self.template.dims().into_iter().min().unwrap_or(0) as f64
        };
        let mut extract = cfg.extract;
        extract.min_distance = min_distance / bin;
        let extraction = extract_peaks(&scores, engine.template_dims(), &extract)?;
        trace_event!(
            "peaks",
            found = extraction.peaks.len(),
            threshold = extraction.threshold,
            lowered = extraction.lowered
        );

        let box_origin = self.template.center();
        let mut particles = ParticleList::new(target.label());
        for (i, hit) in extraction.peaks.iter().enumerate() {
            let orientation = orientations
                .get(hit.peak.orientation_idx)
                .copied()
                .ok_or(VolMatchError::IndexOutOfBounds {
                    index: hit.peak.orientation_idx,
                    len: orientations.len(),
                    context: "orientation_idx",
                })?;
            let location = hit.location * cfg.bin as f64;
            particles.push(
                Particle::new(i + 1, location, orientation, hit.peak.score).with_box_origin(box_origin),
            );
        }

        let refinement = match &cfg.refine {
            Some(refine_cfg) if !particles.is_empty() => {
                let full = if cfg.bin > 1 {
                    CorrelationEngine::new(target, &self.template, &cfg.engine)?
                } else {
                    engine
                };
                let scorer = full.real_space();
                for p in particles.iter_mut() {
                    p.set_score(f32::NAN);
                }
                Some(refine_particles(&scorer, &mut particles, refine_cfg, cfg.parallel)?)
            }
            _ => None,
        };

        let found = particles.len();
        let mut collapsed = 0;
        if refinement.is_some() {
            collapsed = particles.deselect_overlapping(min_distance);
            particles.compact();
            particles = rank_by_score(particles);
            trace_event!("collapsed", removed = collapsed, kept = particles.len());
        }

        Ok(SearchOutcome {
            found,
            collapsed,
            min_distance,
            particles,
            scores,
            orientations: orientations.len(),
            threshold: extraction.threshold,
            threshold_lowered: extraction.lowered,
            refinement,
        })
    }

    /// Refines the selected particles of `particles` against `target`.
    ///
    /// A particle keeps its pose and FOM unless refinement beats that FOM;
    /// particles without a finite FOM are scored at their pose first.
    pub fn refine(
        &self,
        target: &Volume,
        particles: &mut ParticleList,
        cfg: &RefineConfig,
    ) -> VolMatchResult<RefineSummary> {
        let engine = CorrelationEngine::new(target, &self.template, &self.config.engine)?;
        let scorer = engine.real_space();
        refine_particles(&scorer, particles, cfg, self.config.parallel)
    }
}

/// Reorders by descending score (unscored last) and renumbers from 1.
fn rank_by_score(list: ParticleList) -> ParticleList {
    let volume_id = list.volume_id().to_string();
    let mut particles = list.into_particles();
    particles.sort_by(|a, b| {
        let (sa, sb) = (a.score(), b.score());
        sa.is_nan().cmp(&sb.is_nan()).then_with(|| sb.total_cmp(&sa))
    });
    let mut ranked = ParticleList::from_particles(volume_id, particles);
    ranked.renumber();
    ranked
}
