//! Volume rotation about the box center.

use crate::volume::Volume;
use nalgebra::{UnitQuaternion, Vector3};

/// Resamples `src` so that `out(x) = src(R (x - c) + c)`.
///
/// `c` is the box center `floor(n / 2)`. Samples falling outside the source
/// box are set to `fill`; interior samples use trilinear interpolation. The
/// output keeps the extents, spacing and label of the input.
pub fn rotate_trilinear(src: &Volume, rotation: &UnitQuaternion<f64>, fill: f32) -> Volume {
    let dims = src.dims();
    let center = src.center();
    let matrix = rotation.to_rotation_matrix();
    let mut out = src.clone();
    {
        let data = out.data_mut();
        let mut idx = 0usize;
        for z in 0..dims[2] {
            for y in 0..dims[1] {
                for x in 0..dims[0] {
                    let d = Vector3::new(x as f64, y as f64, z as f64) - center;
                    let p = matrix * d + center;
                    data[idx] = src.sample_trilinear(p, fill);
                    idx += 1;
                }
            }
        }
    }
    out
}
