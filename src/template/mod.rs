//! Reference template storage and per-orientation preparation.

use crate::util::{VolMatchError, VolMatchResult};
use crate::volume::filter::FrequencyMask;
use crate::volume::Volume;
use nalgebra::Vector3;

mod plan;
pub mod rotate;

pub use plan::{MaskedTemplate, TemplatePlan};

/// Reference density with its real-space and optional frequency-space masks.
#[derive(Clone, Debug)]
pub struct Template {
    density: Volume,
    mask: Volume,
    isotropic_mask: bool,
    frequency_mask: Option<FrequencyMask>,
}

impl Template {
    /// Wraps a density with the default spherical mask of radius half the
    /// smallest box edge.
    pub fn new(density: Volume) -> VolMatchResult<Self> {
        density.check_finite()?;
        let dims = density.dims();
        let radius = *dims.iter().min().unwrap_or(&0) as f64 / 2.0;
        let mask = spherical_mask(dims, radius)?;
        Ok(Self {
            density,
            mask,
            isotropic_mask: true,
            frequency_mask: None,
        })
    }

    /// Replaces the real-space mask. Values above 0.5 count as inside.
    pub fn with_mask(mut self, mask: Volume) -> VolMatchResult<Self> {
        if mask.dims() != self.density.dims() {
            return Err(VolMatchError::InvalidMask {
                reason: "mask extents differ from the template",
            });
        }
        mask.check_finite()?;
        if !mask.data().iter().any(|&v| v > 0.5) {
            return Err(VolMatchError::InvalidMask {
                reason: "mask selects no voxels",
            });
        }
        self.mask = mask;
        self.isotropic_mask = false;
        Ok(self)
    }

    /// Replaces the mask with a sphere about the box center.
    pub fn with_spherical_mask(mut self, radius: f64) -> VolMatchResult<Self> {
        if !radius.is_finite() || radius < 0.5 {
            return Err(VolMatchError::InvalidMask {
                reason: "sphere radius must be at least half a voxel",
            });
        }
        self.mask = spherical_mask(self.density.dims(), radius)?;
        self.isotropic_mask = true;
        Ok(self)
    }

    /// Sets the missing-region mask applied to every oriented template.
    pub fn with_frequency_mask(mut self, mask: FrequencyMask) -> VolMatchResult<Self> {
        mask.validate()?;
        self.frequency_mask = Some(mask);
        Ok(self)
    }

    pub fn density(&self) -> &Volume {
        &self.density
    }

    pub fn mask(&self) -> &Volume {
        &self.mask
    }

    /// True when the mask is unchanged by rotation about the box center.
    pub fn has_isotropic_mask(&self) -> bool {
        self.isotropic_mask
    }

    pub fn frequency_mask(&self) -> Option<&FrequencyMask> {
        self.frequency_mask.as_ref()
    }

    pub fn dims(&self) -> [usize; 3] {
        self.density.dims()
    }

    /// Box center, `floor(n / 2)` per axis.
    pub fn center(&self) -> Vector3<f64> {
        crate::volume::box_center(self.dims())
    }

    /// Template binned by `factor`; the binned mask keeps voxels that were
    /// mostly inside.
    pub fn binned(&self, factor: usize) -> VolMatchResult<Self> {
        let density = self.density.binned(factor)?;
        let mut mask = self.mask.binned(factor)?;
        for v in mask.data_mut() {
            *v = if *v > 0.5 { 1.0 } else { 0.0 };
        }
        if !mask.data().iter().any(|&v| v > 0.5) {
            return Err(VolMatchError::InvalidMask {
                reason: "mask selects no voxels after binning",
            });
        }
        Ok(Self {
            density,
            mask,
            isotropic_mask: self.isotropic_mask,
            frequency_mask: self.frequency_mask,
        })
    }
}

/// Binary sphere of the given radius about `floor(n / 2)`.
pub fn spherical_mask(dims: [usize; 3], radius: f64) -> VolMatchResult<Volume> {
    let center = crate::volume::box_center(dims);
    let r2 = radius * radius;
    Volume::from_fn(dims, |x, y, z| {
        let dx = x as f64 - center.x;
        let dy = y as f64 - center.y;
        let dz = z as f64 - center.z;
        if dx * dx + dy * dy + dz * dz <= r2 {
            1.0
        } else {
            0.0
        }
    })
    .map(|m| m.with_label("mask"))
}
