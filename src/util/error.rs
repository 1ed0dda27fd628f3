//! Error types for volmatch.

use thiserror::Error;

/// Result alias for volmatch operations.
pub type VolMatchResult<T> = std::result::Result<T, VolMatchError>;

/// Errors that can occur when searching or refining.
///
/// Configuration and data errors are raised before any search work begins;
/// numeric degeneracies and non-improving refinements are not errors.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum VolMatchError {
    /// Volume extents are zero or overflow.
    #[error("invalid dimensions: {nx}x{ny}x{nz}")]
    InvalidDimensions { nx: usize, ny: usize, nz: usize },
    /// The provided sample buffer does not match the extents.
    #[error("buffer length mismatch: needed {needed}, got {got}")]
    BufferMismatch { needed: usize, got: usize },
    /// Template and target cannot be correlated with each other.
    #[error("incompatible volumes: {reason}")]
    IncompatibleVolumes { reason: String },
    /// A mask does not match the volume it applies to, or masks out everything.
    #[error("invalid mask: {reason}")]
    InvalidMask { reason: &'static str },
    /// Angular sampling parameters are invalid.
    #[error("invalid angular step: {reason}")]
    InvalidAngularStep { reason: &'static str },
    /// A numeric parameter is out of its valid range.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },
    /// Input volume data is unusable (non-finite samples, no contrast).
    #[error("bad volume data in `{volume}`: {reason}")]
    BadVolumeData {
        volume: String,
        reason: &'static str,
    },
    /// An index exceeded its valid range.
    #[error("index out of bounds: {context} index {index} (len {len})")]
    IndexOutOfBounds {
        index: usize,
        len: usize,
        context: &'static str,
    },
    /// Too few particles for an operation that needs a minimum count.
    #[error("not enough particles: need {needed}, have {got}")]
    NotEnoughParticles { needed: usize, got: usize },
}

impl VolMatchError {
    /// Returns true for errors caused by the configuration rather than the data.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, VolMatchError::BadVolumeData { .. })
    }
}
