//! Separable sub-voxel peak fit.

use crate::refine::quad1d::parabola_vertex;
use nalgebra::Vector3;

/// Sub-voxel location from scores along the three axes.
///
/// `s[axis]` holds the scores at offsets `-1, 0, +1` along x, y and z (the
/// middle entry is the center score). Axes whose fit fails, for example
/// because a neighbor is missing (`NaN`), keep the integer coordinate.
pub fn refine_subvoxel_3d(center: [usize; 3], s: [[f32; 3]; 3]) -> Vector3<f64> {
    let mut out = Vector3::new(center[0] as f64, center[1] as f64, center[2] as f64);
    for (axis, row) in s.iter().enumerate() {
        if let Some(dx) = parabola_vertex(row[0] as f64, row[1] as f64, row[2] as f64) {
            out[axis] += dx;
        }
    }
    out
}

/// Offsets along each axis for scores sampled around a fractional location.
pub(crate) fn vertex_offsets(s: [[f32; 3]; 3]) -> Vector3<f64> {
    refine_subvoxel_3d([0, 0, 0], s)
}
