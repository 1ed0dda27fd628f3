//! Candidate collection and selection.
//!
//! Per-orientation score volumes are reduced into a [`BestScoreMap`], from
//! which [`extract_peaks`] greedily picks separated maxima.

pub mod aggregate;
pub mod extract;
pub mod peak;

pub use aggregate::BestScoreMap;
pub use extract::{extract_peaks, ExtractConfig, ExtractedPeak, Extraction};
pub use peak::Peak;
