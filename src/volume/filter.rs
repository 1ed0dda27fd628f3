//! Frequency-space resolution bands and missing-region masks.
//!
//! Frequencies are expressed per axis as `k / n` cycles per voxel, with `k`
//! the signed bin index, matching the unshifted layout produced by `Fft3`.

use crate::util::{VolMatchError, VolMatchResult};
use crate::volume::fft::signed_freq;
use nalgebra::Vector3;
use rustfft::num_complex::Complex32;
use std::f64::consts::FRAC_PI_2;

/// Resolution band in angstrom. A limit of `0` disables that side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Band {
    /// High-resolution limit (smallest kept detail).
    pub hi_res: f64,
    /// Low-resolution limit (largest kept detail).
    pub lo_res: f64,
}

impl Default for Band {
    fn default() -> Self {
        Self {
            hi_res: 0.0,
            lo_res: 0.0,
        }
    }
}

impl Band {
    pub fn new(hi_res: f64, lo_res: f64) -> Self {
        Self { hi_res, lo_res }
    }

    /// Checks that limits are finite, non-negative and ordered.
    pub fn validate(&self) -> VolMatchResult<()> {
        if !self.hi_res.is_finite() || !self.lo_res.is_finite() {
            return Err(VolMatchError::InvalidParameter {
                name: "band",
                reason: "resolution limits must be finite",
            });
        }
        if self.hi_res < 0.0 || self.lo_res < 0.0 {
            return Err(VolMatchError::InvalidParameter {
                name: "band",
                reason: "resolution limits must be non-negative",
            });
        }
        if self.hi_res > 0.0 && self.lo_res > 0.0 && self.hi_res >= self.lo_res {
            return Err(VolMatchError::InvalidParameter {
                name: "band",
                reason: "high-resolution limit must be below the low-resolution limit",
            });
        }
        Ok(())
    }

    /// Returns whether a frequency (cycles per voxel) lies in the band.
    pub fn passes(&self, freq: Vector3<f64>, sampling: Vector3<f64>) -> bool {
        let s = Vector3::new(
            freq.x / sampling.x,
            freq.y / sampling.y,
            freq.z / sampling.z,
        )
        .norm();
        if self.hi_res > 0.0 && s > 1.0 / self.hi_res {
            return false;
        }
        if self.lo_res > 0.0 && s < 1.0 / self.lo_res {
            return false;
        }
        true
    }
}

/// Region of frequency space actually measured by the acquisition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrequencyMask {
    /// Single-axis tilt series. `tilt_axis` is the in-plane angle of the
    /// tilt axis from x (radians); tilts span `[-tilt_neg, tilt_pos]`.
    MissingWedge {
        tilt_axis: f64,
        tilt_neg: f64,
        tilt_pos: f64,
    },
    /// Conical tilt: a cone of half-angle `90deg - max_tilt` around z is missing.
    MissingCone { max_tilt: f64 },
}

impl FrequencyMask {
    /// Wedge for a tilt axis along y spanning `[min_tilt, max_tilt]` (radians).
    pub fn wedge_about_y(min_tilt: f64, max_tilt: f64) -> Self {
        FrequencyMask::MissingWedge {
            tilt_axis: FRAC_PI_2,
            tilt_neg: min_tilt.abs(),
            tilt_pos: max_tilt.abs(),
        }
    }

    pub fn validate(&self) -> VolMatchResult<()> {
        let ok = match *self {
            FrequencyMask::MissingWedge {
                tilt_axis,
                tilt_neg,
                tilt_pos,
            } => {
                tilt_axis.is_finite()
                    && (0.0..=FRAC_PI_2).contains(&tilt_neg.abs())
                    && (0.0..=FRAC_PI_2).contains(&tilt_pos.abs())
            }
            FrequencyMask::MissingCone { max_tilt } => (0.0..=FRAC_PI_2).contains(&max_tilt),
        };
        if ok {
            Ok(())
        } else {
            Err(VolMatchError::InvalidMask {
                reason: "tilt angles must lie within [0, pi/2]",
            })
        }
    }

    /// Returns whether a frequency (cycles per voxel) was measured.
    ///
    /// The central `fz = 0` plane is always sampled, which keeps the DC term.
    pub fn samples(&self, freq: Vector3<f64>) -> bool {
        let dz = freq.z;
        if dz == 0.0 {
            return true;
        }
        match *self {
            FrequencyMask::MissingWedge {
                tilt_axis,
                tilt_neg,
                tilt_pos,
            } => {
                let d = freq.x * tilt_axis.sin() - freq.y * tilt_axis.cos();
                let mut lo = dz * (tilt_neg.abs() - FRAC_PI_2).tan();
                let mut hi = dz * (FRAC_PI_2 - tilt_pos.abs()).tan();
                if dz < 0.0 {
                    std::mem::swap(&mut lo, &mut hi);
                }
                d < lo || d > hi
            }
            FrequencyMask::MissingCone { max_tilt } => {
                let r = dz.abs() * (FRAC_PI_2 - max_tilt).tan();
                freq.x * freq.x + freq.y * freq.y > r * r
            }
        }
    }
}

/// Per-bin weights (0 or 1) for a transform of the given extents.
pub fn frequency_weights(
    dims: [usize; 3],
    sampling: Vector3<f64>,
    band: Option<&Band>,
    mask: Option<&FrequencyMask>,
) -> Vec<f32> {
    let [nx, ny, nz] = dims;
    let mut weights = Vec::with_capacity(nx * ny * nz);
    for z in 0..nz {
        let fz = signed_freq(z, nz) as f64 / nz as f64;
        for y in 0..ny {
            let fy = signed_freq(y, ny) as f64 / ny as f64;
            for x in 0..nx {
                let fx = signed_freq(x, nx) as f64 / nx as f64;
                let freq = Vector3::new(fx, fy, fz);
                let keep = band.map_or(true, |b| b.passes(freq, sampling))
                    && mask.map_or(true, |m| m.samples(freq));
                weights.push(if keep { 1.0 } else { 0.0 });
            }
        }
    }
    weights
}

/// Multiplies a spectrum by per-bin weights.
pub(crate) fn apply_weights(spectrum: &mut [Complex32], weights: &[f32]) {
    for (c, &w) in spectrum.iter_mut().zip(weights) {
        *c *= w;
    }
}
