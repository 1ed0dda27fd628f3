//! Best-score-per-location reduction over orientations.

use crate::util::{VolMatchError, VolMatchResult};
use crate::volume::Volume;
use nalgebra::Vector3;

const NO_ORIENTATION: u32 = u32::MAX;

/// Element-wise maximum of correlation volumes with orientation provenance.
///
/// Equal scores keep the lower orientation index, so absorbing volumes in
/// any order and merging partial maps in any grouping give the same result.
#[derive(Clone, Debug, PartialEq)]
pub struct BestScoreMap {
    dims: [usize; 3],
    scores: Vec<f32>,
    provenance: Vec<u32>,
}

impl BestScoreMap {
    /// Creates an empty map; every voxel starts at negative infinity.
    pub fn new(dims: [usize; 3]) -> Self {
        let len = dims[0] * dims[1] * dims[2];
        Self {
            dims,
            scores: vec![f32::NEG_INFINITY; len],
            provenance: vec![NO_ORIENTATION; len],
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    /// Orientation index behind each score, `None` where nothing was absorbed.
    pub fn orientation_at(&self, idx: usize) -> Option<usize> {
        match self.provenance.get(idx) {
            Some(&p) if p != NO_ORIENTATION => Some(p as usize),
            _ => None,
        }
    }

    /// Folds one orientation's score volume into the map.
    pub fn absorb(&mut self, orientation_idx: usize, scores: &[f32]) -> VolMatchResult<()> {
        if scores.len() != self.scores.len() {
            return Err(VolMatchError::BufferMismatch {
                needed: self.scores.len(),
                got: scores.len(),
            });
        }
        let idx = u32::try_from(orientation_idx)
            .ok()
            .filter(|&v| v != NO_ORIENTATION)
            .ok_or(VolMatchError::IndexOutOfBounds {
                index: orientation_idx,
                len: NO_ORIENTATION as usize,
                context: "orientation_idx",
            })?;
        for ((best, prov), &s) in self
            .scores
            .iter_mut()
            .zip(self.provenance.iter_mut())
            .zip(scores)
        {
            if wins(s, idx, *best, *prov) {
                *best = s;
                *prov = idx;
            }
        }
        Ok(())
    }

    /// Combines two partial maps over the same extents.
    pub fn merge(mut self, other: BestScoreMap) -> BestScoreMap {
        debug_assert_eq!(self.dims, other.dims);
        for ((best, prov), (&s, &p)) in self
            .scores
            .iter_mut()
            .zip(self.provenance.iter_mut())
            .zip(other.scores.iter().zip(&other.provenance))
        {
            if p != NO_ORIENTATION && wins(s, p, *best, *prov) {
                *best = s;
                *prov = p;
            }
        }
        self
    }

    /// Clears every voxel farther than `radius` from `center`; cleared
    /// voxels read as unvisited. Returns how many were cleared.
    pub fn clear_outside(&mut self, center: &Vector3<f64>, radius: f64) -> usize {
        let [nx, ny, _] = self.dims;
        let r2 = radius * radius;
        let mut cleared = 0;
        for (idx, (best, prov)) in self.scores.iter_mut().zip(self.provenance.iter_mut()).enumerate() {
            let p = Vector3::new((idx % nx) as f64, ((idx / nx) % ny) as f64, (idx / (nx * ny)) as f64);
            if (p - center).norm_squared() > r2 {
                if *prov != NO_ORIENTATION {
                    cleared += 1;
                }
                *best = f32::NEG_INFINITY;
                *prov = NO_ORIENTATION;
            }
        }
        cleared
    }

    /// The score map as a volume; unvisited voxels become 0.
    pub fn to_volume(&self) -> VolMatchResult<Volume> {
        let data = self
            .scores
            .iter()
            .map(|&s| if s.is_finite() { s } else { 0.0 })
            .collect();
        Ok(Volume::new(data, self.dims)?.with_label("scores"))
    }
}

#[inline]
fn wins(score: f32, idx: u32, best: f32, best_idx: u32) -> bool {
    if !score.is_finite() {
        return false;
    }
    score > best || (score == best && idx < best_idx)
}

#[cfg(test)]
mod tests {
    use super::BestScoreMap;
    use nalgebra::Vector3;

    #[test]
    fn keeps_maximum_with_provenance() {
        let mut map = BestScoreMap::new([2, 1, 1]);
        map.absorb(3, &[0.2, 0.9]).unwrap();
        map.absorb(5, &[0.4, 0.1]).unwrap();
        assert_eq!(map.scores(), &[0.4, 0.9]);
        assert_eq!(map.orientation_at(0), Some(5));
        assert_eq!(map.orientation_at(1), Some(3));
    }

    #[test]
    fn ties_keep_lower_index_in_any_order() {
        let mut a = BestScoreMap::new([1, 1, 1]);
        a.absorb(7, &[0.5]).unwrap();
        a.absorb(2, &[0.5]).unwrap();
        let mut b = BestScoreMap::new([1, 1, 1]);
        b.absorb(2, &[0.5]).unwrap();
        b.absorb(7, &[0.5]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.orientation_at(0), Some(2));
    }

    #[test]
    fn merge_is_order_independent() {
        let volumes = [[0.1f32, 0.7, 0.3], [0.6, 0.7, 0.2], [0.6, 0.1, 0.9]];
        let mut whole = BestScoreMap::new([3, 1, 1]);
        for (i, v) in volumes.iter().enumerate() {
            whole.absorb(i, v).unwrap();
        }
        let mut left = BestScoreMap::new([3, 1, 1]);
        left.absorb(2, &volumes[2]).unwrap();
        let mut right = BestScoreMap::new([3, 1, 1]);
        right.absorb(1, &volumes[1]).unwrap();
        right.absorb(0, &volumes[0]).unwrap();
        assert_eq!(left.clone().merge(right.clone()), whole);
        assert_eq!(right.merge(left), whole);
        assert_eq!(whole.orientation_at(0), Some(1));
        assert_eq!(whole.orientation_at(1), Some(0));
    }

    #[test]
    fn clearing_outside_a_sphere_forgets_provenance() {
        let mut map = BestScoreMap::new([5, 1, 1]);
        map.absorb(1, &[0.9, 0.8, 0.7, 0.6, 0.5]).unwrap();
        let cleared = map.clear_outside(&Vector3::new(3.0, 0.0, 0.0), 1.0);
        assert_eq!(cleared, 2);
        assert_eq!(map.orientation_at(0), None);
        assert_eq!(map.orientation_at(1), None);
        assert_eq!(map.orientation_at(2), Some(1));
        assert_eq!(map.scores()[4], 0.5);
        assert_eq!(map.to_volume().unwrap().get(0, 0, 0), Some(0.0));
    }

    #[test]
    fn rejects_wrong_length_and_skips_non_finite() {
        let mut map = BestScoreMap::new([2, 2, 1]);
        assert!(map.absorb(0, &[0.0; 3]).is_err());
        map.absorb(0, &[f32::NAN, 0.1, 0.2, 0.3]).unwrap();
        assert_eq!(map.orientation_at(0), None);
        assert_eq!(map.to_volume().unwrap().get(0, 0, 0), Some(0.0));
    }
}
