//! Orientation space: views, point-group symmetry and sampling.
//!
//! Search mode enumerates one orientation per symmetry equivalence class
//! over the asymmetric unit. Local grids and random perturbations feed the
//! refiners.

mod orientation;
mod sampler;
mod symmetry;

pub use orientation::Orientation;
pub use sampler::{LocalGrid, Perturbation, PerturbationConfig, SamplingConfig};
pub use symmetry::{PointGroup, Symmetry};
