//! Dense 3D volumes, statistics and sampling.
//!
//! `Volume` owns a contiguous `f32` buffer laid out with x varying fastest:
//! the sample at `(x, y, z)` lives at `(z * ny + y) * nx + x`. Every
//! transform in the crate produces a new `Volume` by value, so replacing a
//! volume is a plain move.

use crate::util::{VolMatchError, VolMatchResult};
use nalgebra::Vector3;

pub mod fft;
pub mod filter;

/// Summary statistics of a volume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeStats {
    pub mean: f64,
    pub std: f64,
    pub min: f32,
    pub max: f32,
}

/// Owned dense 3D sample grid with voxel spacing and origin.
#[derive(Clone, Debug)]
pub struct Volume {
    data: Vec<f32>,
    dims: [usize; 3],
    sampling: Vector3<f64>,
    origin: Vector3<f64>,
    label: String,
}

impl Volume {
    /// Creates a volume from a contiguous buffer in x-fastest order.
    pub fn new(data: Vec<f32>, dims: [usize; 3]) -> VolMatchResult<Self> {
        let needed = voxel_count(dims)?;
        if data.len() != needed {
            return Err(VolMatchError::BufferMismatch {
                needed,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            dims,
            sampling: Vector3::new(1.0, 1.0, 1.0),
            origin: Vector3::zeros(),
            label: String::from("volume"),
        })
    }

    /// Creates a zero-filled volume.
    pub fn zeros(dims: [usize; 3]) -> VolMatchResult<Self> {
        let count = voxel_count(dims)?;
        Self::new(vec![0.0; count], dims)
    }

    /// Creates a volume by evaluating `f(x, y, z)` at every voxel.
    pub fn from_fn<F>(dims: [usize; 3], mut f: F) -> VolMatchResult<Self>
    where
        F: FnMut(usize, usize, usize) -> f32,
    {
        let count = voxel_count(dims)?;
        let mut data = Vec::with_capacity(count);
        for z in 0..dims[2] {
            for y in 0..dims[1] {
                for x in 0..dims[0] {
                    data.push(f(x, y, z));
                }
            }
        }
        Self::new(data, dims)
    }

    /// Sets an isotropic voxel spacing (angstrom per voxel).
    pub fn with_sampling(mut self, sampling: f64) -> Self {
        self.sampling = Vector3::new(sampling, sampling, sampling);
        self
    }

    /// Sets a per-axis voxel spacing.
    pub fn with_sampling_xyz(mut self, sampling: Vector3<f64>) -> Self {
        self.sampling = sampling;
        self
    }

    /// Sets the coordinate origin in voxels.
    pub fn with_origin(mut self, origin: Vector3<f64>) -> Self {
        self.origin = origin;
        self
    }

    /// Sets the identity label reported in data errors.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sampling(&self) -> Vector3<f64> {
        self.sampling
    }

    pub fn origin(&self) -> Vector3<f64> {
        self.origin
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Linear index of `(x, y, z)`; the caller guarantees bounds.
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < self.dims[0] && y < self.dims[1] && z < self.dims[2]);
        (z * self.dims[1] + y) * self.dims[0] + x
    }

    /// Voxel coordinates of a linear index.
    #[inline]
    pub fn coords(&self, idx: usize) -> [usize; 3] {
        let [nx, ny, _] = self.dims;
        [idx % nx, (idx / nx) % ny, idx / (nx * ny)]
    }

    /// Returns the sample at `(x, y, z)` if it is within bounds.
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<f32> {
        if x >= self.dims[0] || y >= self.dims[1] || z >= self.dims[2] {
            return None;
        }
        self.data.get(self.index(x, y, z)).copied()
    }

    /// Writes the sample at `(x, y, z)`; out-of-bounds writes are ignored.
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f32) {
        if x < self.dims[0] && y < self.dims[1] && z < self.dims[2] {
            let idx = self.index(x, y, z);
            self.data[idx] = value;
        }
    }

    /// Rotation center of the box, `floor(n / 2)` along each axis.
    pub fn center(&self) -> Vector3<f64> {
        box_center(self.dims)
    }

    /// Trilinear sample at a fractional voxel position; `fill` outside the box.
    pub fn sample_trilinear(&self, p: Vector3<f64>, fill: f32) -> f32 {
        let [nx, ny, nz] = self.dims;
        let eps = 1e-9;
        if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite())
            || p.x < -eps
            || p.y < -eps
            || p.z < -eps
            || p.x > (nx - 1) as f64 + eps
            || p.y > (ny - 1) as f64 + eps
            || p.z > (nz - 1) as f64 + eps
        {
            return fill;
        }
        let px = p.x.clamp(0.0, (nx - 1) as f64);
        let py = p.y.clamp(0.0, (ny - 1) as f64);
        let pz = p.z.clamp(0.0, (nz - 1) as f64);
        let x0 = px.floor() as usize;
        let y0 = py.floor() as usize;
        let z0 = pz.floor() as usize;
        let x1 = (x0 + 1).min(nx - 1);
        let y1 = (y0 + 1).min(ny - 1);
        let z1 = (z0 + 1).min(nz - 1);
        self.blend(
            [x0, x1],
            [y0, y1],
            [z0, z1],
            (px - x0 as f64) as f32,
            (py - y0 as f64) as f32,
            (pz - z0 as f64) as f32,
        )
    }

    /// Trilinear sample with periodic boundary conditions.
    pub fn sample_periodic(&self, p: Vector3<f64>) -> f32 {
        let [nx, ny, nz] = self.dims;
        if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
            return 0.0;
        }
        let fx = p.x.floor();
        let fy = p.y.floor();
        let fz = p.z.floor();
        let x0 = wrap_index(fx as i64, nx);
        let y0 = wrap_index(fy as i64, ny);
        let z0 = wrap_index(fz as i64, nz);
        self.blend(
            [x0, (x0 + 1) % nx],
            [y0, (y0 + 1) % ny],
            [z0, (z0 + 1) % nz],
            (p.x - fx) as f32,
            (p.y - fy) as f32,
            (p.z - fz) as f32,
        )
    }

    #[inline]
    fn blend(&self, xs: [usize; 2], ys: [usize; 2], zs: [usize; 2], fx: f32, fy: f32, fz: f32) -> f32 {
        let c000 = self.data[self.index(xs[0], ys[0], zs[0])];
        let c100 = self.data[self.index(xs[1], ys[0], zs[0])];
        let c010 = self.data[self.index(xs[0], ys[1], zs[0])];
        let c110 = self.data[self.index(xs[1], ys[1], zs[0])];
        let c001 = self.data[self.index(xs[0], ys[0], zs[1])];
        let c101 = self.data[self.index(xs[1], ys[0], zs[1])];
        let c011 = self.data[self.index(xs[0], ys[1], zs[1])];
        let c111 = self.data[self.index(xs[1], ys[1], zs[1])];
        let c00 = c000 + (c100 - c000) * fx;
        let c10 = c010 + (c110 - c010) * fx;
        let c01 = c001 + (c101 - c001) * fx;
        let c11 = c011 + (c111 - c011) * fx;
        let c0 = c00 + (c10 - c00) * fy;
        let c1 = c01 + (c11 - c01) * fy;
        c0 + (c1 - c0) * fz
    }

    /// Mean, standard deviation and range over all samples.
    pub fn stats(&self) -> VolumeStats {
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &v in &self.data {
            let vf = v as f64;
            sum += vf;
            sum_sq += vf * vf;
            min = min.min(v);
            max = max.max(v);
        }
        let n = self.data.len().max(1) as f64;
        let mean = sum / n;
        let var = (sum_sq / n - mean * mean).max(0.0);
        VolumeStats {
            mean,
            std: var.sqrt(),
            min,
            max,
        }
    }

    /// Fails with a data error naming this volume if any sample is not finite.
    pub fn check_finite(&self) -> VolMatchResult<()> {
        if self.data.iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(VolMatchError::BadVolumeData {
                volume: self.label.clone(),
                reason: "non-finite samples",
            })
        }
    }

    /// Returns a copy rescaled to zero mean and unit standard deviation.
    pub fn normalized(&self) -> VolMatchResult<Volume> {
        self.check_finite()?;
        let stats = self.stats();
        if stats.std <= 1e-12 {
            return Err(VolMatchError::BadVolumeData {
                volume: self.label.clone(),
                reason: "constant volume has no contrast",
            });
        }
        let mean = stats.mean as f32;
        let inv_std = (1.0 / stats.std) as f32;
        let mut out = self.clone();
        for v in out.data.iter_mut() {
            *v = (*v - mean) * inv_std;
        }
        Ok(out)
    }

    /// Averages non-overlapping `factor`^3 blocks; trailing partial blocks are dropped.
    pub fn binned(&self, factor: usize) -> VolMatchResult<Volume> {
        if factor == 0 {
            return Err(VolMatchError::InvalidParameter {
                name: "bin",
                reason: "binning factor must be at least 1",
            });
        }
        if factor == 1 {
            return Ok(self.clone());
        }
        let dims = [
            self.dims[0] / factor,
            self.dims[1] / factor,
            self.dims[2] / factor,
        ];
        let inv = 1.0 / (factor * factor * factor) as f32;
        let mut out = Volume::from_fn(dims, |x, y, z| {
            let mut sum = 0.0f32;
            for dz in 0..factor {
                for dy in 0..factor {
                    for dx in 0..factor {
                        sum += self.data[self.index(
                            x * factor + dx,
                            y * factor + dy,
                            z * factor + dz,
                        )];
                    }
                }
            }
            sum * inv
        })?;
        out.sampling = self.sampling * factor as f64;
        out.origin = self.origin / factor as f64;
        out.label = self.label.clone();
        Ok(out)
    }

    /// Linear index and value of the global maximum (first in scan order on ties).
    pub fn argmax(&self) -> (usize, f32) {
        let mut best_idx = 0usize;
        let mut best = f32::NEG_INFINITY;
        for (idx, &v) in self.data.iter().enumerate() {
            if v > best {
                best = v;
                best_idx = idx;
            }
        }
        (best_idx, best)
    }
}

/// Rotation center for a box of the given extents.
pub(crate) fn box_center(dims: [usize; 3]) -> Vector3<f64> {
    Vector3::new(
        (dims[0] / 2) as f64,
        (dims[1] / 2) as f64,
        (dims[2] / 2) as f64,
    )
}

/// Maps a possibly negative coordinate onto `[0, n)`.
#[inline]
pub(crate) fn wrap_index(i: i64, n: usize) -> usize {
    i.rem_euclid(n as i64) as usize
}

fn voxel_count(dims: [usize; 3]) -> VolMatchResult<usize> {
    let [nx, ny, nz] = dims;
    if nx == 0 || ny == 0 || nz == 0 {
        return Err(VolMatchError::InvalidDimensions { nx, ny, nz });
    }
    nx.checked_mul(ny)
        .and_then(|v| v.checked_mul(nz))
        .ok_or(VolMatchError::InvalidDimensions { nx, ny, nz })
}
