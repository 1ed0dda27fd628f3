//! Separable 3D complex FFT over x-fastest volumes.

use crate::util::{VolMatchError, VolMatchResult};
use crate::volume::Volume;
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Forward and inverse plans for one volume extent.
///
/// Plans are immutable once built and can be shared across threads; every
/// transform allocates its own line and scratch buffers.
pub struct Fft3 {
    dims: [usize; 3],
    forward: [Arc<dyn Fft<f32>>; 3],
    inverse: [Arc<dyn Fft<f32>>; 3],
}

impl std::fmt::Debug for Fft3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft3").field("dims", &self.dims).finish()
    }
}

impl Fft3 {
    /// Plans transforms for volumes of the given extents.
    pub fn new(dims: [usize; 3]) -> VolMatchResult<Self> {
        let [nx, ny, nz] = dims;
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(VolMatchError::InvalidDimensions { nx, ny, nz });
        }
        let mut planner = FftPlanner::<f32>::new();
        let forward = [
            planner.plan_fft_forward(nx),
            planner.plan_fft_forward(ny),
            planner.plan_fft_forward(nz),
        ];
        let inverse = [
            planner.plan_fft_inverse(nx),
            planner.plan_fft_inverse(ny),
            planner.plan_fft_inverse(nz),
        ];
        Ok(Self {
            dims,
            forward,
            inverse,
        })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Total number of samples per transform.
    pub fn len(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unnormalized forward transform in place.
    pub fn forward(&self, buf: &mut [Complex32]) -> VolMatchResult<()> {
        self.check_len(buf.len())?;
        self.run(&self.forward, buf);
        Ok(())
    }

    /// Inverse transform in place, scaled by `1 / N` so it undoes `forward`.
    pub fn inverse(&self, buf: &mut [Complex32]) -> VolMatchResult<()> {
        self.check_len(buf.len())?;
        self.run(&self.inverse, buf);
        let scale = 1.0 / self.len() as f32;
        for v in buf.iter_mut() {
            *v *= scale;
        }
        Ok(())
    }

    /// Transforms a real volume of matching extents.
    pub fn forward_real(&self, volume: &Volume) -> VolMatchResult<Vec<Complex32>> {
        if volume.dims() != self.dims {
            return Err(VolMatchError::IncompatibleVolumes {
                reason: format!(
                    "volume {} has extents {:?}, transform planned for {:?}",
                    volume.label(),
                    volume.dims(),
                    self.dims
                ),
            });
        }
        let mut buf: Vec<Complex32> = volume
            .data()
            .iter()
            .map(|&v| Complex32::new(v, 0.0))
            .collect();
        self.forward(&mut buf)?;
        Ok(buf)
    }

    /// Inverse transform keeping only the real part.
    pub fn inverse_real(&self, mut buf: Vec<Complex32>) -> VolMatchResult<Vec<f32>> {
        self.inverse(&mut buf)?;
        Ok(buf.into_iter().map(|c| c.re).collect())
    }

    fn check_len(&self, got: usize) -> VolMatchResult<()> {
        let needed = self.len();
        if got != needed {
            return Err(VolMatchError::BufferMismatch { needed, got });
        }
        Ok(())
    }

    fn run(&self, plans: &[Arc<dyn Fft<f32>>; 3], buf: &mut [Complex32]) {
        let [nx, ny, nz] = self.dims;

        // x lines are contiguous; rustfft processes consecutive chunks.
        let mut scratch = vec![Complex32::default(); plans[0].get_inplace_scratch_len()];
        plans[0].process_with_scratch(buf, &mut scratch);

        if ny > 1 {
            let mut lines = vec![Complex32::default(); buf.len()];
            // Gather: line (z, x) holds buf[(z, y, x)] for y in 0..ny.
            for z in 0..nz {
                for y in 0..ny {
                    let row = (z * ny + y) * nx;
                    for x in 0..nx {
                        lines[(z * nx + x) * ny + y] = buf[row + x];
                    }
                }
            }
            let mut scratch = vec![Complex32::default(); plans[1].get_inplace_scratch_len()];
            plans[1].process_with_scratch(&mut lines, &mut scratch);
            for z in 0..nz {
                for y in 0..ny {
                    let row = (z * ny + y) * nx;
                    for x in 0..nx {
                        buf[row + x] = lines[(z * nx + x) * ny + y];
                    }
                }
            }
        }

        if nz > 1 {
            let plane = nx * ny;
            let mut lines = vec![Complex32::default(); buf.len()];
            for z in 0..nz {
                for p in 0..plane {
                    lines[p * nz + z] = buf[z * plane + p];
                }
            }
            let mut scratch = vec![Complex32::default(); plans[2].get_inplace_scratch_len()];
            plans[2].process_with_scratch(&mut lines, &mut scratch);
            for z in 0..nz {
                for p in 0..plane {
                    buf[z * plane + p] = lines[p * nz + z];
                }
            }
        }
    }
}

/// Signed frequency index of bin `i` in a transform of length `n`.
#[inline]
pub(crate) fn signed_freq(i: usize, n: usize) -> i64 {
    if i <= n / 2 {
        i as i64
    } else {
        i as i64 - n as i64
    }
}
