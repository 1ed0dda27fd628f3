//! Normalized template plans and sparse masked templates.

use crate::template::rotate::rotate_trilinear;
use crate::template::Template;
use crate::util::{VolMatchError, VolMatchResult};
use crate::volume::Volume;
use nalgebra::{UnitQuaternion, Vector3};

/// Masked template voxels as offsets from the box center.
///
/// `values` are zero-mean over the masked voxels so a dot product with any
/// window yields the covariance numerator directly.
#[derive(Clone, Debug)]
pub struct MaskedTemplate {
    offsets: Vec<[i64; 3]>,
    values: Vec<f32>,
    norm_sq: f64,
}

impl MaskedTemplate {
    /// Builds a masked template, removing the mean of the selected values.
    pub(crate) fn new(offsets: Vec<[i64; 3]>, values: Vec<f32>) -> VolMatchResult<Self> {
        if offsets.len() != values.len() {
            return Err(VolMatchError::BufferMismatch {
                needed: offsets.len(),
                got: values.len(),
            });
        }
        if offsets.is_empty() {
            return Err(VolMatchError::InvalidMask {
                reason: "mask selects no voxels",
            });
        }
        let mut out = Self {
            offsets,
            values,
            norm_sq: 0.0,
        };
        out.recenter();
        Ok(out)
    }

    /// Removes the mean and refreshes the squared norm.
    pub(crate) fn recenter(&mut self) {
        let n = self.values.len().max(1) as f64;
        let mean = self.values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let mut norm_sq = 0.0f64;
        for v in self.values.iter_mut() {
            *v = (*v as f64 - mean) as f32;
            norm_sq += (*v as f64) * (*v as f64);
        }
        self.norm_sq = norm_sq;
    }

    pub fn offsets(&self) -> &[[i64; 3]] {
        &self.offsets
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Sum of squared zero-mean values.
    pub fn norm_sq(&self) -> f64 {
        self.norm_sq
    }

    /// Number of masked voxels.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Largest absolute offset along each axis.
    pub fn extent(&self) -> [i64; 3] {
        let mut ext = [0i64; 3];
        for o in &self.offsets {
            for axis in 0..3 {
                ext[axis] = ext[axis].max(o[axis].abs());
            }
        }
        ext
    }
}

/// Normalized template ready for orientation.
#[derive(Clone, Debug)]
pub struct TemplatePlan {
    density: Volume,
    mask: Volume,
    isotropic_mask: bool,
    base: MaskedTemplate,
}

impl TemplatePlan {
    /// Normalizes the density to zero mean and unit deviation under the mask.
    pub fn new(template: &Template) -> VolMatchResult<Self> {
        let density = template.density();
        let mask = binarize(template.mask());
        let inside: Vec<f64> = density
            .data()
            .iter()
            .zip(mask.data())
            .filter(|&(_, &m)| m > 0.5)
            .map(|(&v, _)| v as f64)
            .collect();
        if inside.is_empty() {
            return Err(VolMatchError::InvalidMask {
                reason: "mask selects no voxels",
            });
        }
        let n = inside.len() as f64;
        let mean = inside.iter().sum::<f64>() / n;
        let var = inside.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        if var <= 1e-12 {
            return Err(VolMatchError::BadVolumeData {
                volume: density.label().to_string(),
                reason: "template is constant under its mask",
            });
        }
        let inv_std = 1.0 / var.sqrt();
        let mut normalized = density.clone();
        for v in normalized.data_mut() {
            *v = ((*v as f64 - mean) * inv_std) as f32;
        }
        let base = collect_masked(&normalized, &mask)?;
        Ok(Self {
            density: normalized,
            mask,
            isotropic_mask: template.has_isotropic_mask(),
            base,
        })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.density.dims()
    }

    pub fn center(&self) -> Vector3<f64> {
        self.density.center()
    }

    /// The unrotated masked template.
    pub fn base(&self) -> &MaskedTemplate {
        &self.base
    }

    pub fn has_isotropic_mask(&self) -> bool {
        self.isotropic_mask
    }

    /// Masked template resampled into the given rotation.
    ///
    /// An isotropic mask is used as is; any other mask is rotated with the
    /// density and binarized again.
    pub fn oriented(&self, rotation: &UnitQuaternion<f64>) -> VolMatchResult<MaskedTemplate> {
        let density = rotate_trilinear(&self.density, rotation, 0.0);
        if self.isotropic_mask {
            collect_masked(&density, &self.mask)
        } else {
            let mask = binarize(&rotate_trilinear(&self.mask, rotation, 0.0));
            collect_masked(&density, &mask)
        }
    }
}

fn binarize(mask: &Volume) -> Volume {
    let mut out = mask.clone();
    for v in out.data_mut() {
        *v = if *v > 0.5 { 1.0 } else { 0.0 };
    }
    out
}

fn offsets_of(mask: &Volume) -> Vec<[i64; 3]> {
    let c = mask.center();
    let (cx, cy, cz) = (c.x as i64, c.y as i64, c.z as i64);
    mask.data()
        .iter()
        .enumerate()
        .filter(|&(_, &m)| m > 0.5)
        .map(|(idx, _)| {
            let [x, y, z] = mask.coords(idx);
            [x as i64 - cx, y as i64 - cy, z as i64 - cz]
        })
        .collect()
}

fn collect_masked(density: &Volume, mask: &Volume) -> VolMatchResult<MaskedTemplate> {
    let offsets = offsets_of(mask);
    let values = mask
        .data()
        .iter()
        .zip(density.data())
        .filter(|&(&m, _)| m > 0.5)
        .map(|(_, &v)| v)
        .collect();
    MaskedTemplate::new(offsets, values)
}
