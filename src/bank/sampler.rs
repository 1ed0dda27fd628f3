//! Orientation sampling: asymmetric-unit grids, local grids and perturbations.

use crate::bank::orientation::Orientation;
use crate::bank::symmetry::{canonical_key, Symmetry};
use crate::refine::{AngularLimit, Pose};
use crate::util::math::steps_within;
use crate::util::{VolMatchError, VolMatchResult};
use nalgebra::{Unit, Vector3};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::collections::HashSet;
use std::f64::consts::{PI, TAU};

fn check_step(step: f64, reason: &'static str) -> VolMatchResult<()> {
    if !step.is_finite() || step <= 0.0 {
        return Err(VolMatchError::InvalidAngularStep { reason });
    }
    Ok(())
}

/// Global angular sampling for a search (radians).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingConfig {
    /// Spacing between view directions.
    pub view_step: f64,
    /// Spacing of in-plane rotations.
    pub angle_step: f64,
    /// Restricts the search to orientations near this one instead of the
    /// whole asymmetric unit.
    pub reference: Option<Orientation>,
    /// Window around `reference`; unused without one.
    pub limits: AngularLimit,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            view_step: 10f64.to_radians(),
            angle_step: 10f64.to_radians(),
            reference: None,
            limits: AngularLimit::default(),
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> VolMatchResult<()> {
        check_step(self.view_step, "view_step must be finite and > 0")?;
        check_step(self.angle_step, "angle_step must be finite and > 0")?;
        if self.reference.is_some() {
            self.limits.validate()?;
        }
        Ok(())
    }

    fn admits(&self, symmetry: &dyn Symmetry, orientation: &Orientation) -> bool {
        match &self.reference {
            Some(reference) => self.limits.allows(reference, orientation),
            None => symmetry.in_asymmetric_unit(orientation),
        }
    }

    /// View directions covering the sphere uniformly in solid angle.
    ///
    /// Rings of constant polar angle are spaced by `view_step`; each ring
    /// holds `round(2 pi sin(theta) / view_step)` azimuths, at least one.
    pub fn directions(&self) -> VolMatchResult<Vec<Vector3<f64>>> {
        self.validate()?;
        let rings = ((PI / self.view_step).round() as usize).max(1);
        let mut out = Vec::new();
        for i in 0..=rings {
            let theta = PI * i as f64 / rings as f64;
            let (sin_t, cos_t) = theta.sin_cos();
            let count = ((TAU * sin_t / self.view_step).round() as usize).max(1);
            for j in 0..count {
                let phi = TAU * j as f64 / count as f64;
                out.push(Vector3::new(sin_t * phi.cos(), sin_t * phi.sin(), cos_t));
            }
        }
        Ok(out)
    }

    /// In-plane angles over `[-pi, pi)`.
    pub fn in_plane_angles(&self) -> VolMatchResult<Vec<f64>> {
        self.validate()?;
        let count = ((TAU / self.angle_step).round() as usize).max(1);
        Ok((0..count)
            .map(|k| -PI + TAU * k as f64 / count as f64)
            .collect())
    }

    /// All orientations of the asymmetric unit, one per equivalence class.
    ///
    /// With a `reference`, the grid is instead limited to the window around
    /// it; symmetry mates are still emitted only once.
    pub fn asymmetric_unit(&self, symmetry: &dyn Symmetry) -> VolMatchResult<Vec<Orientation>> {
        let directions = self.directions()?;
        let angles = self.in_plane_angles()?;
        let ops = symmetry.operators();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for dir in &directions {
            for &angle in &angles {
                let o = Orientation::new(*dir, angle);
                if !self.admits(symmetry, &o) {
                    continue;
                }
                if seen.insert(canonical_key(&ops, &o)) {
                    out.push(o);
                }
            }
        }
        Ok(out)
    }
}

/// Grid of orientations around a reference (radians).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalGrid {
    pub view_step: f64,
    /// Largest tilt of the view direction about either axis.
    pub view_limit: f64,
    pub angle_step: f64,
    /// Largest change of the in-plane angle.
    pub angle_limit: f64,
}

impl Default for LocalGrid {
    fn default() -> Self {
        Self {
            view_step: 2f64.to_radians(),
            view_limit: 4f64.to_radians(),
            angle_step: 2f64.to_radians(),
            angle_limit: 4f64.to_radians(),
        }
    }
}

impl LocalGrid {
    pub fn validate(&self) -> VolMatchResult<()> {
        check_step(self.view_step, "view_step must be finite and > 0")?;
        check_step(self.angle_step, "angle_step must be finite and > 0")?;
        if !(self.view_limit.is_finite() && self.angle_limit.is_finite())
            || self.view_limit < 0.0
            || self.angle_limit < 0.0
        {
            return Err(VolMatchError::InvalidParameter {
                name: "local_grid",
                reason: "angular limits must be finite and >= 0",
            });
        }
        Ok(())
    }

    /// Same grid with every step and limit halved.
    pub fn halved(&self) -> Self {
        Self {
            view_step: self.view_step * 0.5,
            view_limit: self.view_limit * 0.5,
            angle_step: self.angle_step * 0.5,
            angle_limit: self.angle_limit * 0.5,
        }
    }

    /// Orientations around `reference`, the reference itself first.
    ///
    /// The view direction is tilted about two axes orthogonal to it by
    /// multiples of `view_step` up to `view_limit`, and the in-plane angle is
    /// offset by multiples of `angle_step` up to `angle_limit`.
    pub fn around(&self, reference: &Orientation) -> VolMatchResult<Vec<Orientation>> {
        self.validate()?;
        let v = reference.direction();
        let mut axis1 = v.cross(&Vector3::z());
        if axis1.norm() < 1e-3 {
            axis1 = Vector3::x();
        }
        let axis1 = Unit::new_normalize(axis1);
        let mut axis2 = v.cross(&axis1);
        if axis2.norm() < 1e-3 {
            axis2 = Vector3::y();
        }
        let axis2 = Unit::new_normalize(axis2);

        let nv = steps_within(self.view_limit, self.view_step);
        let na = steps_within(self.angle_limit, self.angle_step);
        let mut out = vec![*reference];
        for i in -nv..=nv {
            let first = reference.tilted(&axis1, i as f64 * self.view_step);
            for j in -nv..=nv {
                let tilted = first.tilted(&axis2, j as f64 * self.view_step);
                for k in -na..=na {
                    if i == 0 && j == 0 && k == 0 {
                        continue;
                    }
                    out.push(Orientation::new(
                        tilted.direction(),
                        reference.angle() + k as f64 * self.angle_step,
                    ));
                }
            }
        }
        Ok(out)
    }
}

/// Random pose perturbation parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerturbationConfig {
    /// Standard deviation of the Gaussian shift per axis (voxels).
    pub shift_std: f64,
    /// Standard deviation of the Gaussian jitter of each direction component.
    pub view_std: f64,
    /// Bound of the uniform in-plane rotation change (radians).
    pub max_angle: f64,
    /// Bound of the relative uniform scale change; `0` keeps the scale.
    pub max_scale: f64,
}

impl Default for PerturbationConfig {
    fn default() -> Self {
        Self {
            shift_std: 0.5,
            view_std: 0.02,
            max_angle: 2f64.to_radians(),
            max_scale: 0.0,
        }
    }
}

/// Sampling distribution built from a [`PerturbationConfig`].
#[derive(Clone, Debug)]
pub struct Perturbation {
    cfg: PerturbationConfig,
    shift: Normal<f64>,
    view: Normal<f64>,
}

impl Perturbation {
    pub fn new(cfg: PerturbationConfig) -> VolMatchResult<Self> {
        let bad = |name| VolMatchError::InvalidParameter {
            name,
            reason: "must be finite and >= 0",
        };
        let shift = Normal::new(0.0, cfg.shift_std).map_err(|_| bad("shift_std"))?;
        let view = Normal::new(0.0, cfg.view_std).map_err(|_| bad("view_std"))?;
        if !cfg.max_angle.is_finite() || cfg.max_angle < 0.0 {
            return Err(bad("max_angle"));
        }
        if !cfg.max_scale.is_finite() || !(0.0..1.0).contains(&cfg.max_scale) {
            return Err(VolMatchError::InvalidParameter {
                name: "max_scale",
                reason: "must be in [0, 1)",
            });
        }
        Ok(Self { cfg, shift, view })
    }

    pub fn config(&self) -> &PerturbationConfig {
        &self.cfg
    }

    /// Draws a perturbed copy of `pose`.
    pub fn sample<R: Rng + ?Sized>(&self, pose: &Pose, rng: &mut R) -> Pose {
        let mut location = pose.location;
        if self.cfg.shift_std > 0.0 {
            for c in location.iter_mut() {
                *c += self.shift.sample(rng);
            }
        }
        let mut direction = pose.orientation.direction();
        if self.cfg.view_std > 0.0 {
            for c in direction.iter_mut() {
                *c += self.view.sample(rng);
            }
        }
        let mut angle = pose.orientation.angle();
        if self.cfg.max_angle > 0.0 {
            angle += self.cfg.max_angle * rng.random_range(-1.0..=1.0);
        }
        let mut scale = pose.scale;
        if self.cfg.max_scale > 0.0 {
            scale *= 1.0 + self.cfg.max_scale * rng.random_range(-1.0..=1.0);
        }
        Pose {
            location,
            orientation: Orientation::new(direction, angle),
            scale,
        }
    }
}
