//! FFT cross-correlation of oriented templates against a target volume.

use crate::bank::Orientation;
use crate::kernel::realspace::RealSpaceScorer;
use crate::kernel::score::{Moments, Normalization, ScoreNormalizer};
use crate::template::{MaskedTemplate, Template, TemplatePlan};
use crate::trace::trace_event;
use crate::util::{VolMatchError, VolMatchResult};
use crate::volume::fft::Fft3;
use crate::volume::filter::{apply_weights, frequency_weights, Band};
use crate::volume::{wrap_index, Volume};
use rustfft::num_complex::Complex32;

/// Correlation settings shared by search and refinement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    /// Resolution band applied to the target.
    pub band: Band,
    /// Score normalization.
    pub normalization: Normalization,
    /// Local variance floor as a fraction of the global variance.
    pub min_var_fraction: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            band: Band::default(),
            normalization: Normalization::Local,
            min_var_fraction: 1e-3,
        }
    }
}

struct LocalMoments {
    count: f64,
    sum: Vec<f32>,
    sum_sq: Vec<f32>,
}

/// Correlation engine for one target and one template.
///
/// The target is normalized, transformed and band-limited once; FFT plans are
/// built once for its extents and shared read-only by every orientation.
pub struct CorrelationEngine {
    fft: Fft3,
    dims: [usize; 3],
    spectrum: Vec<Complex32>,
    spectrum_sq: Option<Vec<Complex32>>,
    filtered: Volume,
    global_var: f64,
    plan: TemplatePlan,
    wedge: Option<Vec<f32>>,
    normalizer: Box<dyn ScoreNormalizer>,
    cached_moments: Option<LocalMoments>,
}

impl CorrelationEngine {
    /// Prepares a target for correlation with `template`.
    pub fn new(target: &Volume, template: &Template, cfg: &EngineConfig) -> VolMatchResult<Self> {
        Self::with_normalizer(
            target,
            template,
            cfg,
            cfg.normalization.normalizer(cfg.min_var_fraction),
        )
    }

    /// Like [`CorrelationEngine::new`] with a caller-supplied normalizer.
    pub fn with_normalizer(
        target: &Volume,
        template: &Template,
        cfg: &EngineConfig,
        normalizer: Box<dyn ScoreNormalizer>,
    ) -> VolMatchResult<Self> {
        check_compatible(target, template.density())?;
        cfg.band.validate()?;
        if !cfg.min_var_fraction.is_finite() || cfg.min_var_fraction < 0.0 {
            return Err(VolMatchError::InvalidParameter {
                name: "min_var_fraction",
                reason: "must be finite and >= 0",
            });
        }

        let dims = target.dims();
        let sampling = target.sampling();
        let normalized = target.normalized()?;
        let fft = Fft3::new(dims)?;
        let mut spectrum = fft.forward_real(&normalized)?;
        let band = frequency_weights(dims, sampling, Some(&cfg.band), None);
        apply_weights(&mut spectrum, &band);
        let filtered_data = fft.inverse_real(spectrum.clone())?;
        let filtered = Volume::new(filtered_data, dims)?
            .with_sampling_xyz(sampling)
            .with_origin(target.origin())
            .with_label(target.label());
        let stats = filtered.stats();
        let global_var = stats.std * stats.std;
        if global_var <= 1e-12 {
            return Err(VolMatchError::BadVolumeData {
                volume: target.label().to_string(),
                reason: "no signal left in the resolution band",
            });
        }

        let spectrum_sq = if normalizer.uses_local_moments() {
            let squared: Vec<f32> = filtered.data().iter().map(|v| v * v).collect();
            let squared = Volume::new(squared, dims)?;
            Some(fft.forward_real(&squared)?)
        } else {
            None
        };

        let plan = TemplatePlan::new(template)?;
        let wedge = template
            .frequency_mask()
            .map(|mask| frequency_weights(dims, sampling, None, Some(mask)));

        let mut engine = Self {
            fft,
            dims,
            spectrum,
            spectrum_sq,
            filtered,
            global_var,
            plan,
            wedge,
            normalizer,
            cached_moments: None,
        };
        if engine.plan.has_isotropic_mask() && engine.spectrum_sq.is_some() {
            let offsets = engine.plan.base().offsets().to_vec();
            engine.cached_moments = Some(engine.local_moments(&offsets)?);
        }
        trace_event!(
            "engine_ready",
            nx = dims[0],
            ny = dims[1],
            nz = dims[2],
            mask_voxels = engine.plan.base().len(),
            normalizer = engine.normalizer.name()
        );
        Ok(engine)
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn template_dims(&self) -> [usize; 3] {
        self.plan.dims()
    }

    /// The normalized, band-limited target.
    pub fn filtered_target(&self) -> &Volume {
        &self.filtered
    }

    pub fn plan(&self) -> &TemplatePlan {
        &self.plan
    }

    pub fn normalizer(&self) -> &dyn ScoreNormalizer {
        self.normalizer.as_ref()
    }

    /// Per-voxel variance of the filtered target.
    pub fn global_var(&self) -> f64 {
        self.global_var
    }

    /// Real-space scorer over the same filtered target and template.
    pub fn real_space(&self) -> RealSpaceScorer<'_> {
        RealSpaceScorer::new(&self.filtered, &self.plan, self.normalizer.as_ref(), self.global_var)
    }

    /// Correlation score for every template center in the target.
    ///
    /// The result has the target's extents in x-fastest order; the value at
    /// voxel `L` scores the template centered at `L` (periodic boundaries).
    pub fn correlate(&self, orientation: &Orientation) -> VolMatchResult<Vec<f32>> {
        let rotation = orientation.rotation();
        let mut oriented = self.plan.oriented(&rotation)?;
        if let Some(weights) = &self.wedge {
            self.apply_frequency_mask(&mut oriented, weights)?;
        }
        let n = self.fft.len();
        let template_norm_sq = oriented.norm_sq();
        if template_norm_sq <= 1e-12 {
            return Ok(vec![0.0; n]);
        }

        let mut buf = self.pad(oriented.offsets(), Some(oriented.values()));
        self.fft.forward(&mut buf)?;
        for (t, g) in buf.iter_mut().zip(&self.spectrum) {
            *t = g * t.conj();
        }
        let numerator = self.fft.inverse_real(buf)?;

        let computed;
        let local = if self.spectrum_sq.is_some() {
            match &self.cached_moments {
                Some(cached) => Some(cached),
                None => {
                    computed = self.local_moments(oriented.offsets())?;
                    Some(&computed)
                }
            }
        } else {
            None
        };

        let count = oriented.len() as f64;
        let scores = numerator
            .iter()
            .enumerate()
            .map(|(idx, &num)| {
                let moments = match local {
                    Some(lm) => Moments {
                        count: lm.count,
                        sum: lm.sum[idx] as f64,
                        sum_sq: lm.sum_sq[idx] as f64,
                        global_var: self.global_var,
                    },
                    None => Moments {
                        count,
                        global_var: self.global_var,
                        ..Moments::default()
                    },
                };
                self.normalizer.score(num as f64, template_norm_sq, &moments)
            })
            .collect();
        Ok(scores)
    }

    /// Places values (or ones) at wrapped center offsets in a target-sized buffer.
    fn pad(&self, offsets: &[[i64; 3]], values: Option<&[f32]>) -> Vec<Complex32> {
        let [nx, ny, nz] = self.dims;
        let mut buf = vec![Complex32::default(); self.fft.len()];
        for (i, o) in offsets.iter().enumerate() {
            let x = wrap_index(o[0], nx);
            let y = wrap_index(o[1], ny);
            let z = wrap_index(o[2], nz);
            let v = values.map_or(1.0, |vals| vals[i]);
            buf[(z * ny + y) * nx + x] = Complex32::new(v, 0.0);
        }
        buf
    }

    fn apply_frequency_mask(
        &self,
        oriented: &mut MaskedTemplate,
        weights: &[f32],
    ) -> VolMatchResult<()> {
        let [nx, ny, nz] = self.dims;
        let mut buf = self.pad(oriented.offsets(), Some(oriented.values()));
        self.fft.forward(&mut buf)?;
        apply_weights(&mut buf, weights);
        self.fft.inverse(&mut buf)?;
        let offsets = oriented.offsets().to_vec();
        for (v, o) in oriented.values_mut().iter_mut().zip(&offsets) {
            let idx = (wrap_index(o[2], nz) * ny + wrap_index(o[1], ny)) * nx + wrap_index(o[0], nx);
            *v = buf[idx].re;
        }
        oriented.recenter();
        Ok(())
    }

    fn local_moments(&self, offsets: &[[i64; 3]]) -> VolMatchResult<LocalMoments> {
        let Some(spectrum_sq) = &self.spectrum_sq else {
            return Err(VolMatchError::InvalidParameter {
                name: "normalization",
                reason: "local moments requested without a squared spectrum",
            });
        };
        let mut mask = self.pad(offsets, None);
        self.fft.forward(&mut mask)?;
        let mut s1: Vec<Complex32> = self
            .spectrum
            .iter()
            .zip(&mask)
            .map(|(g, m)| g * m.conj())
            .collect();
        let mut s2: Vec<Complex32> = spectrum_sq
            .iter()
            .zip(&mask)
            .map(|(g, m)| g * m.conj())
            .collect();
        self.fft.inverse(&mut s1)?;
        self.fft.inverse(&mut s2)?;
        Ok(LocalMoments {
            count: offsets.len() as f64,
            sum: s1.into_iter().map(|c| c.re).collect(),
            sum_sq: s2.into_iter().map(|c| c.re).collect(),
        })
    }
}

fn check_compatible(target: &Volume, template: &Volume) -> VolMatchResult<()> {
    target.check_finite()?;
    template.check_finite()?;
    let ts = target.sampling();
    let ps = template.sampling();
    let same = (0..3).all(|i| (ts[i] - ps[i]).abs() <= 1e-6 * ts[i].abs().max(1.0));
    if !same {
        return Err(VolMatchError::IncompatibleVolumes {
            reason: format!(
                "voxel size of {} ({:.4}, {:.4}, {:.4}) differs from {} ({:.4}, {:.4}, {:.4})",
                target.label(),
                ts.x,
                ts.y,
                ts.z,
                template.label(),
                ps.x,
                ps.y,
                ps.z
            ),
        });
    }
    let td = target.dims();
    let pd = template.dims();
    if (0..3).any(|i| pd[i] > td[i]) {
        return Err(VolMatchError::IncompatibleVolumes {
            reason: format!(
                "template {} {:?} is larger than target {} {:?}",
                template.label(),
                pd,
                target.label(),
                td
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{CorrelationEngine, EngineConfig};
    use crate::bank::Orientation;
    use crate::kernel::score::Normalization;
    use crate::kernel::PoseScorer;
    use crate::refine::Pose;
    use crate::template::Template;
    use crate::util::VolMatchError;
    use crate::volume::filter::FrequencyMask;
    use crate::volume::Volume;
    use nalgebra::Vector3;

    fn blob_density() -> Volume {
        Volume::from_fn([9, 9, 9], |x, y, z| {
            let a = (x as f32 - 5.0).powi(2) + (y as f32 - 4.0).powi(2) + (z as f32 - 3.0).powi(2);
            let b = (x as f32 - 3.0).powi(2) + (y as f32 - 5.0).powi(2) * 0.5 + (z as f32 - 5.0).powi(2);
            (-a / 2.0).exp() + 0.6 * (-b / 3.0).exp()
        })
        .unwrap()
        .with_label("template")
    }

    fn target_with_copy(at: [usize; 3]) -> Volume {
        let tpl = blob_density();
        let mut target = Volume::from_fn([24, 24, 24], |x, y, z| {
            (((x * 13 + y * 7 + z * 3) % 11) as f32 - 5.0) * 0.002
        })
        .unwrap()
        .with_label("target");
        for z in 0..9 {
            for y in 0..9 {
                for x in 0..9 {
                    let v = tpl.get(x, y, z).unwrap();
                    let (tx, ty, tz) = (at[0] + x - 4, at[1] + y - 4, at[2] + z - 4);
                    let cur = target.get(tx, ty, tz).unwrap();
                    target.set(tx, ty, tz, cur + v);
                }
            }
        }
        target
    }

    #[test]
    fn finds_copy_at_identity() {
        let target = target_with_copy([12, 10, 11]);
        let tpl = Template::new(blob_density()).unwrap();
        let engine = CorrelationEngine::new(&target, &tpl, &EngineConfig::default()).unwrap();
        let scores = engine.correlate(&Orientation::identity()).unwrap();
        let (best, &score) = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        let [x, y, z] = engine.filtered_target().coords(best);
        assert_eq!([x, y, z], [12, 10, 11]);
        assert!(score > 0.95, "score {score}");
        assert!(scores.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn fft_and_real_space_agree_at_identity() {
        let target = target_with_copy([12, 10, 11]);
        let tpl = Template::new(blob_density()).unwrap();
        let engine = CorrelationEngine::new(&target, &tpl, &EngineConfig::default()).unwrap();
        let scores = engine.correlate(&Orientation::identity()).unwrap();
        let scorer = engine.real_space();
        for loc in [[12usize, 10, 11], [10, 10, 10], [3, 20, 7]] {
            let idx = engine.filtered_target().index(loc[0], loc[1], loc[2]);
            let pose = Pose::new(
                Vector3::new(loc[0] as f64, loc[1] as f64, loc[2] as f64),
                Orientation::identity(),
            );
            let rs = scorer.score_pose(&pose);
            assert!((rs - scores[idx]).abs() < 2e-3, "{loc:?}: {rs} vs {}", scores[idx]);
        }
    }

    #[test]
    fn global_normalization_is_bounded() {
        let target = target_with_copy([12, 12, 12]);
        let tpl = Template::new(blob_density()).unwrap();
        let cfg = EngineConfig {
            normalization: Normalization::Global,
            ..EngineConfig::default()
        };
        let engine = CorrelationEngine::new(&target, &tpl, &cfg).unwrap();
        let scores = engine.correlate(&Orientation::identity()).unwrap();
        assert!(scores.iter().all(|s| (-1.0..=1.0).contains(s)));
        let idx = engine.filtered_target().index(12, 12, 12);
        let (best, _) = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        assert_eq!(best, idx);
    }

    #[test]
    fn wedge_keeps_scores_bounded() {
        let target = target_with_copy([12, 12, 12]);
        let tpl = Template::new(blob_density())
            .unwrap()
            .with_frequency_mask(FrequencyMask::wedge_about_y(-1.0, 1.0))
            .unwrap();
        let engine = CorrelationEngine::new(&target, &tpl, &EngineConfig::default()).unwrap();
        let scores = engine.correlate(&Orientation::identity()).unwrap();
        assert!(scores.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn rejects_incompatible_volumes() {
        let target = target_with_copy([12, 12, 12]);
        let tpl = Template::new(blob_density().with_sampling(2.0)).unwrap();
        let err = CorrelationEngine::new(&target, &tpl, &EngineConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, VolMatchError::IncompatibleVolumes { .. }));

        let small = Volume::from_fn([8, 24, 24], |x, _, _| x as f32).unwrap();
        let tpl = Template::new(blob_density()).unwrap();
        let err = CorrelationEngine::new(&small, &tpl, &EngineConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, VolMatchError::IncompatibleVolumes { .. }));
    }

    #[test]
    fn non_finite_target_names_volume() {
        let mut target = target_with_copy([12, 12, 12]).with_label("tomo_3");
        target.set(0, 0, 0, f32::INFINITY);
        let tpl = Template::new(blob_density()).unwrap();
        match CorrelationEngine::new(&target, &tpl, &EngineConfig::default()).err() {
            Some(VolMatchError::BadVolumeData { volume, .. }) => assert_eq!(volume, "tomo_3"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
