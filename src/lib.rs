//! VolMatch locates copies of a reference density inside a 3D volume.
//!
//! The pipeline samples orientations over a symmetry's asymmetric unit,
//! correlates each rotated template with the target through the FFT, keeps
//! the best score per location, extracts separated peaks and refines each
//! candidate with a shrinking grid or a seeded hill climb. Particles can then
//! be pruned with composable selection filters. Parallelism is optional via
//! the `rayon` feature; structured diagnostics via the `tracing` feature.
//!
//! ```no_run
//! use volmatch::{Finder, PointGroup, SearchConfig, Template, Volume};
//!
//! # fn main() -> volmatch::VolMatchResult<()> {
//! let target = Volume::zeros([64, 64, 64])?.with_label("tomo");
//! let template = Template::new(Volume::zeros([16, 16, 16])?)?;
//! let outcome = Finder::new(template)
//!     .with_config(SearchConfig::default())
//!     .search(&target, &PointGroup::C1)?;
//! println!("found {}", outcome.found);
//! # Ok(())
//! # }
//! ```

pub mod bank;
pub mod candidate;
pub mod kernel;
pub mod particle;
pub mod refine;
pub mod search;
pub mod template;
mod trace;
pub mod util;
pub mod volume;

pub use bank::{
    LocalGrid, Orientation, Perturbation, PerturbationConfig, PointGroup, SamplingConfig, Symmetry,
};
pub use candidate::{extract_peaks, BestScoreMap, ExtractConfig, Extraction, Peak};
pub use kernel::{
    CorrelationEngine, EngineConfig, GlobalZncc, LocalZncc, Normalization, PoseScorer,
    RealSpaceScorer, ScoreNormalizer,
};
pub use particle::{Particle, ParticleList, Region, SelectionFilters, SelectionReport, Shell};
pub use refine::{
    refine_pose, AngularLimit, GridConfig, HillClimbConfig, Limits, Pose, RefineConfig,
    RefineStatus, RefineStrategy, Refinement, ShiftLimit,
};
pub use search::{Finder, RefineSummary, SearchConfig, SearchOutcome};
pub use template::Template;
pub use util::{VolMatchError, VolMatchResult};
pub use volume::filter::{Band, FrequencyMask};
pub use volume::{Volume, VolumeStats};
