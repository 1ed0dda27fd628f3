//! Greedy peak extraction with a minimum separation.

use crate::candidate::aggregate::BestScoreMap;
use crate::candidate::peak::{sort_peaks_desc, Peak};
use crate::refine::quad3d::refine_subvoxel_3d;
use crate::util::{VolMatchError, VolMatchResult};
use crate::volume::wrap_index;
use nalgebra::Vector3;

/// Peak extraction settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExtractConfig {
    /// Minimum score. Non-positive values, or a threshold that no voxel
    /// reaches, fall back to `auto_fraction * max`.
    pub threshold: f32,
    /// Fraction of the maximum score used when the threshold is lowered.
    pub auto_fraction: f32,
    /// Minimum Euclidean distance between accepted peaks (voxels). `0`
    /// accepts every candidate; [`Finder::search`](crate::search::Finder::search)
    /// replaces a non-positive value with the template diameter.
    pub min_distance: f64,
    /// Maximum number of accepted peaks; `0` means no cap.
    pub max_hits: usize,
    /// Treat the volume as periodic: boxes may wrap and distances use the
    /// minimum image.
    pub wrap: bool,
    /// Fit sub-voxel locations from the six axis neighbors.
    pub interpolate: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            auto_fraction: 0.5,
            min_distance: 0.0,
            max_hits: 100,
            wrap: false,
            interpolate: false,
        }
    }
}

impl ExtractConfig {
    pub fn validate(&self) -> VolMatchResult<()> {
        if !self.threshold.is_finite() {
            return Err(VolMatchError::InvalidParameter {
                name: "threshold",
                reason: "must be finite",
            });
        }
        if !(self.auto_fraction.is_finite() && self.auto_fraction > 0.0 && self.auto_fraction <= 1.0) {
            return Err(VolMatchError::InvalidParameter {
                name: "auto_fraction",
                reason: "must be in (0, 1]",
            });
        }
        if !self.min_distance.is_finite() || self.min_distance < 0.0 {
            return Err(VolMatchError::InvalidParameter {
                name: "min_distance",
                reason: "must be finite and >= 0",
            });
        }
        Ok(())
    }
}

/// Accepted peak with its (optionally interpolated) location.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExtractedPeak {
    pub peak: Peak,
    pub location: Vector3<f64>,
}

/// Result of one extraction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    /// Accepted peaks in descending score order.
    pub peaks: Vec<ExtractedPeak>,
    /// Threshold actually applied.
    pub threshold: f32,
    /// Whether the configured threshold was replaced.
    pub lowered: bool,
    /// Voxels at or above the threshold with a valid box.
    pub candidates: usize,
}

/// Extracts peaks from an aggregated map.
///
/// Candidates are sorted by descending score (ties in scan order) and
/// accepted greedily unless closer than `min_distance` to an accepted peak.
/// Candidates whose `template_dims` box would leave the volume are skipped
/// unless wrapping is enabled.
pub fn extract_peaks(
    map: &BestScoreMap,
    template_dims: [usize; 3],
    cfg: &ExtractConfig,
) -> VolMatchResult<Extraction> {
    cfg.validate()?;
    let dims = map.dims();
    let mut eligible = Vec::new();
    for (idx, &score) in map.scores().iter().enumerate() {
        if !score.is_finite() {
            continue;
        }
        let [x, y, z] = coords(idx, dims);
        if !cfg.wrap && !box_inside([x, y, z], template_dims, dims) {
            continue;
        }
        let Some(orientation_idx) = map.orientation_at(idx) else {
            continue;
        };
        eligible.push(Peak {
            x,
            y,
            z,
            score,
            orientation_idx,
        });
    }
    let max = eligible
        .iter()
        .map(|p| p.score)
        .fold(f32::NEG_INFINITY, f32::max);
    if !(max.is_finite() && max > 0.0) {
        return Ok(Extraction {
            threshold: cfg.threshold,
            ..Extraction::default()
        });
    }

    // Lowering looks only at voxels whose box can be accepted.
    let mut threshold = cfg.threshold;
    let mut lowered = false;
    if threshold <= 0.0 || max < threshold {
        threshold = cfg.auto_fraction * max;
        lowered = true;
    }

    let mut candidates = eligible;
    candidates.retain(|p| p.score >= threshold);
    sort_peaks_desc(&mut candidates);

    let min_sq = cfg.min_distance * cfg.min_distance;
    let mut kept: Vec<Peak> = Vec::new();
    'outer: for peak in candidates.iter().copied() {
        if cfg.max_hits > 0 && kept.len() >= cfg.max_hits {
            break;
        }
        for accepted in &kept {
            if peak.distance_sq(accepted, dims, cfg.wrap) < min_sq {
                continue 'outer;
            }
        }
        kept.push(peak);
    }

    let peaks = kept
        .into_iter()
        .map(|peak| {
            let location = if cfg.interpolate {
                interpolate(map, &peak, cfg.wrap)
            } else {
                Vector3::new(peak.x as f64, peak.y as f64, peak.z as f64)
            };
            ExtractedPeak { peak, location }
        })
        .collect();

    Ok(Extraction {
        peaks,
        threshold,
        lowered,
        candidates: candidates.len(),
    })
}

fn coords(idx: usize, dims: [usize; 3]) -> [usize; 3] {
    [idx % dims[0], (idx / dims[0]) % dims[1], idx / (dims[0] * dims[1])]
}

fn box_inside(at: [usize; 3], template: [usize; 3], dims: [usize; 3]) -> bool {
    (0..3).all(|axis| {
        let half = template[axis] / 2;
        at[axis] >= half && at[axis] - half + template[axis] <= dims[axis]
    })
}

/// Score at a neighbor of `peak` along one axis, if it exists.
fn neighbor(map: &BestScoreMap, peak: &Peak, axis: usize, step: i64, wrap: bool) -> Option<f32> {
    let dims = map.dims();
    let mut at = [peak.x as i64, peak.y as i64, peak.z as i64];
    at[axis] += step;
    if wrap {
        at[axis] = wrap_index(at[axis], dims[axis]) as i64;
    } else if at[axis] < 0 || at[axis] >= dims[axis] as i64 {
        return None;
    }
    let idx = (at[2] as usize * dims[1] + at[1] as usize) * dims[0] + at[0] as usize;
    map.scores().get(idx).copied().filter(|s| s.is_finite())
}

fn interpolate(map: &BestScoreMap, peak: &Peak, wrap: bool) -> Vector3<f64> {
    let mut s = [[f32::NAN; 3]; 3];
    for (axis, row) in s.iter_mut().enumerate() {
        row[0] = neighbor(map, peak, axis, -1, wrap).unwrap_or(f32::NAN);
        row[1] = peak.score;
        row[2] = neighbor(map, peak, axis, 1, wrap).unwrap_or(f32::NAN);
    }
    refine_subvoxel_3d([peak.x, peak.y, peak.z], s)
}

#[cfg(test)]
mod tests {
    use super::{extract_peaks, ExtractConfig};
    use crate::candidate::aggregate::BestScoreMap;

    fn map_from(dims: [usize; 3], f: impl Fn(usize, usize, usize) -> f32) -> BestScoreMap {
        let mut scores = Vec::new();
        for z in 0..dims[2] {
            for y in 0..dims[1] {
                for x in 0..dims[0] {
                    scores.push(f(x, y, z));
                }
            }
        }
        let mut map = BestScoreMap::new(dims);
        map.absorb(0, &scores).unwrap();
        map
    }

    fn bump(x: usize, y: usize, z: usize, at: [f32; 3], height: f32) -> f32 {
        let d2 = (x as f32 - at[0]).powi(2) + (y as f32 - at[1]).powi(2) + (z as f32 - at[2]).powi(2);
        height * (-d2 / 4.0).exp()
    }

    #[test]
    fn accepted_peaks_respect_min_distance() {
        let map = map_from([30, 30, 30], |x, y, z| {
            bump(x, y, z, [10.0, 10.0, 10.0], 0.9)
                .max(bump(x, y, z, [14.0, 10.0, 10.0], 0.8))
                .max(bump(x, y, z, [22.0, 20.0, 15.0], 0.7))
        });
        let cfg = ExtractConfig {
            threshold: 0.5,
            min_distance: 6.0,
            max_hits: 10,
            ..ExtractConfig::default()
        };
        let out = extract_peaks(&map, [5, 5, 5], &cfg).unwrap();
        assert!(!out.lowered);
        let peaks: Vec<_> = out.peaks.iter().map(|p| p.peak).collect();
        assert_eq!(peaks.len(), 2);
        assert_eq!((peaks[0].x, peaks[0].y, peaks[0].z), (10, 10, 10));
        assert_eq!((peaks[1].x, peaks[1].y, peaks[1].z), (22, 20, 15));
        for (i, a) in peaks.iter().enumerate() {
            for b in &peaks[i + 1..] {
                assert!(a.distance_sq(b, map.dims(), false) >= 36.0);
            }
        }
    }

    #[test]
    fn lowers_threshold_when_nothing_qualifies() {
        let map = map_from([12, 12, 12], |x, y, z| bump(x, y, z, [6.0, 6.0, 6.0], 0.3));
        let cfg = ExtractConfig {
            threshold: 0.8,
            min_distance: 10.0,
            ..ExtractConfig::default()
        };
        let out = extract_peaks(&map, [3, 3, 3], &cfg).unwrap();
        assert!(out.lowered);
        assert!((out.threshold - 0.15).abs() < 1e-6);
        assert_eq!(out.peaks.len(), 1);
    }

    #[test]
    fn rejects_boxes_leaving_volume_unless_wrapped() {
        let map = map_from([16, 16, 16], |x, y, z| bump(x, y, z, [1.0, 8.0, 8.0], 1.0));
        let cfg = ExtractConfig {
            threshold: 0.9,
            min_distance: 4.0,
            ..ExtractConfig::default()
        };
        let out = extract_peaks(&map, [6, 6, 6], &cfg).unwrap();
        assert!(out.peaks.iter().all(|p| p.peak.x >= 3));
        let wrapped = extract_peaks(&map, [6, 6, 6], &ExtractConfig { wrap: true, ..cfg }).unwrap();
        assert_eq!(wrapped.peaks[0].peak.x, 1);
    }

    #[test]
    fn hit_cap_and_interpolation() {
        let map = map_from([20, 20, 20], |x, y, z| {
            bump(x, y, z, [5.3, 10.0, 10.0], 1.0).max(bump(x, y, z, [15.0, 9.8, 10.0], 0.9))
        });
        let cfg = ExtractConfig {
            threshold: 0.5,
            min_distance: 5.0,
            max_hits: 1,
            interpolate: true,
            ..ExtractConfig::default()
        };
        let out = extract_peaks(&map, [3, 3, 3], &cfg).unwrap();
        assert_eq!(out.peaks.len(), 1);
        let loc = out.peaks[0].location;
        assert!((loc.x - 5.3).abs() < 0.1, "{loc:?}");
        assert!((loc.y - 10.0).abs() < 1e-3);
    }

    #[test]
    fn empty_map_yields_nothing() {
        let map = BestScoreMap::new([4, 4, 4]);
        let out = extract_peaks(&map, [2, 2, 2], &ExtractConfig::default()).unwrap();
        assert!(out.peaks.is_empty());
    }
}
