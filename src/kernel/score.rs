//! Score normalization strategies.

/// Window moments of the target under the template mask.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Moments {
    /// Number of masked voxels.
    pub count: f64,
    /// Sum of target samples in the window.
    pub sum: f64,
    /// Sum of squared target samples in the window.
    pub sum_sq: f64,
    /// Per-voxel variance of the whole filtered target.
    pub global_var: f64,
}

/// Converts a covariance numerator into a correlation score.
///
/// `numerator` is the dot product of the zero-mean masked template with the
/// target window; `template_norm_sq` is the template's squared norm.
pub trait ScoreNormalizer: Send + Sync {
    /// Short identifier used in logs and reports.
    fn name(&self) -> &'static str;

    /// Whether `score` reads `Moments::sum` and `Moments::sum_sq`.
    fn uses_local_moments(&self) -> bool;

    /// Returns a score in `[-1, 1]`; degenerate windows score 0.
    fn score(&self, numerator: f64, template_norm_sq: f64, moments: &Moments) -> f32;
}

fn finish(numerator: f64, template_norm_sq: f64, window_var: f64) -> f32 {
    let denom = (template_norm_sq * window_var).sqrt();
    if !(denom.is_finite() && denom > 0.0) {
        return 0.0;
    }
    let s = numerator / denom;
    if s.is_finite() {
        s.clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

/// Zero-normalized cross-correlation with the local window variance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalZncc {
    /// Windows whose variance falls below this fraction of the global
    /// variance score 0.
    pub min_var_fraction: f64,
}

impl Default for LocalZncc {
    fn default() -> Self {
        Self {
            min_var_fraction: 1e-3,
        }
    }
}

impl ScoreNormalizer for LocalZncc {
    fn name(&self) -> &'static str {
        "local_zncc"
    }

    fn uses_local_moments(&self) -> bool {
        true
    }

    fn score(&self, numerator: f64, template_norm_sq: f64, m: &Moments) -> f32 {
        if m.count <= 0.0 {
            return 0.0;
        }
        let var = m.sum_sq - m.sum * m.sum / m.count;
        let floor = self.min_var_fraction * m.global_var * m.count;
        if var <= floor || var <= 0.0 {
            return 0.0;
        }
        finish(numerator, template_norm_sq, var)
    }
}

/// Cross-correlation normalized by the variance of the whole target.
///
/// Cheaper than [`LocalZncc`] but only approximately bounded; scores are
/// clamped to `[-1, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GlobalZncc;

impl ScoreNormalizer for GlobalZncc {
    fn name(&self) -> &'static str {
        "global_zncc"
    }

    fn uses_local_moments(&self) -> bool {
        false
    }

    fn score(&self, numerator: f64, template_norm_sq: f64, m: &Moments) -> f32 {
        finish(numerator, template_norm_sq, m.global_var * m.count)
    }
}

/// Normalizer selection for configuration structs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Normalization {
    /// Local mean and variance under the mask.
    #[default]
    Local,
    /// Global target variance.
    Global,
}

impl Normalization {
    /// Builds the normalizer; `min_var_fraction` applies to `Local` only.
    pub fn normalizer(self, min_var_fraction: f64) -> Box<dyn ScoreNormalizer> {
        match self {
            Normalization::Local => Box::new(LocalZncc { min_var_fraction }),
            Normalization::Global => Box::new(GlobalZncc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{GlobalZncc, LocalZncc, Moments, Normalization, ScoreNormalizer};

    fn moments_of(window: &[f64]) -> Moments {
        Moments {
            count: window.len() as f64,
            sum: window.iter().sum(),
            sum_sq: window.iter().map(|v| v * v).sum(),
            global_var: 1.0,
        }
    }

    #[test]
    fn perfect_match_scores_one() {
        let tpl = [-1.0, 0.0, 1.0, 2.0, -2.0];
        let window: Vec<f64> = tpl.iter().map(|v| 3.0 * v + 5.0).collect();
        let num: f64 = tpl.iter().zip(&window).map(|(t, w)| t * w).sum();
        let tn: f64 = tpl.iter().map(|t| t * t).sum();
        let s = LocalZncc::default().score(num, tn, &moments_of(&window));
        assert!((s - 1.0).abs() < 1e-6);
    }

    #[test]
    fn flat_window_scores_zero() {
        let window = [4.0; 5];
        let s = LocalZncc::default().score(1.0, 10.0, &moments_of(&window));
        assert_eq!(s, 0.0);
    }

    #[test]
    fn global_score_is_clamped() {
        let m = Moments {
            count: 4.0,
            sum: 0.0,
            sum_sq: 0.0,
            global_var: 0.01,
        };
        assert_eq!(GlobalZncc.score(100.0, 1.0, &m), 1.0);
        assert_eq!(GlobalZncc.score(-100.0, 1.0, &m), -1.0);
    }

    #[test]
    fn selection_builds_matching_normalizer() {
        assert_eq!(Normalization::Local.normalizer(1e-3).name(), "local_zncc");
        assert!(!Normalization::Global.normalizer(1e-3).uses_local_moments());
    }
}
