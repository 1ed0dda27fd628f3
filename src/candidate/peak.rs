//! Peak candidates and their deterministic ordering.

use std::cmp::Ordering;

/// Peak candidate in voxel space for a specific orientation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Peak {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    /// Correlation score at the peak.
    pub score: f32,
    /// Index into the searched orientation list.
    pub orientation_idx: usize,
}

impl Peak {
    /// Squared Euclidean distance to another peak, optionally with periodic
    /// wrapping over `dims`.
    pub fn distance_sq(&self, other: &Peak, dims: [usize; 3], wrap: bool) -> f64 {
        let axis = |a: usize, b: usize, n: usize| {
            let d = a.abs_diff(b);
            let d = if wrap { d.min(n - d) } else { d };
            (d * d) as f64
        };
        axis(self.x, other.x, dims[0]) + axis(self.y, other.y, dims[1]) + axis(self.z, other.z, dims[2])
    }
}

/// Descending score; ties broken by scan order (z, y, x), then orientation.
pub(crate) fn peak_cmp_desc(a: &Peak, b: &Peak) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.z.cmp(&b.z))
        .then_with(|| a.y.cmp(&b.y))
        .then_with(|| a.x.cmp(&b.x))
        .then_with(|| a.orientation_idx.cmp(&b.orientation_idx))
}

/// Sorts peaks by descending score with deterministic tie-breaking.
pub(crate) fn sort_peaks_desc(peaks: &mut [Peak]) {
    peaks.sort_by(peak_cmp_desc);
}

#[cfg(test)]
mod tests {
    use super::{sort_peaks_desc, Peak};

    fn peak(x: usize, y: usize, z: usize, score: f32) -> Peak {
        Peak {
            x,
            y,
            z,
            score,
            orientation_idx: 0,
        }
    }

    #[test]
    fn ties_follow_scan_order() {
        let mut peaks = vec![
            peak(1, 0, 1, 0.5),
            peak(3, 2, 0, 0.5),
            peak(0, 0, 0, 0.9),
            peak(0, 2, 0, 0.5),
        ];
        sort_peaks_desc(&mut peaks);
        assert_eq!(peaks[0], peak(0, 0, 0, 0.9));
        assert_eq!(peaks[1], peak(0, 2, 0, 0.5));
        assert_eq!(peaks[2], peak(3, 2, 0, 0.5));
        assert_eq!(peaks[3], peak(1, 0, 1, 0.5));
    }

    #[test]
    fn periodic_distance_uses_minimum_image() {
        let a = peak(0, 0, 0, 1.0);
        let b = peak(9, 0, 0, 1.0);
        assert_eq!(a.distance_sq(&b, [10, 10, 10], false), 81.0);
        assert_eq!(a.distance_sq(&b, [10, 10, 10], true), 1.0);
    }
}
