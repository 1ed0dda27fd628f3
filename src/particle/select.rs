//! Selection filters over a particle list.
//!
//! Each filter only clears `selected` flags and returns how many particles
//! it deselected. Already deselected particles are never reselected, except
//! by [`ParticleList::reset_selection`] and [`ParticleList::invert_selection`].

use crate::bank::Symmetry;
use crate::particle::shell::Shell;
use crate::particle::{Particle, ParticleList};
use crate::trace::{trace_event, trace_span};
use crate::util::{VolMatchError, VolMatchResult};
use nalgebra::Vector3;

/// Spherical region of interest in voxel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Region {
    pub center: Vector3<f64>,
    pub radius: f64,
}

impl ParticleList {
    /// Indices of selected particles, best score first; particles without a
    /// score come last and ties keep list order.
    fn ranked_selection(&self) -> Vec<usize> {
        let slice = self.as_slice();
        let mut order: Vec<usize> = (0..slice.len()).filter(|&i| slice[i].selected).collect();
        order.sort_by(|&a, &b| {
            let (sa, sb) = (slice[a].score(), slice[b].score());
            sa.is_nan()
                .cmp(&sb.is_nan())
                .then_with(|| sb.total_cmp(&sa))
                .then(a.cmp(&b))
        });
        order
    }

    fn deselect_where<F>(&mut self, mut reject: F) -> usize
    where
        F: FnMut(&Particle) -> bool,
    {
        let mut count = 0;
        for p in self.iter_mut().filter(|p| p.selected) {
            if reject(p) {
                p.selected = false;
                count += 1;
            }
        }
        count
    }

    /// Greedy pass in score order: a particle is kept unless `conflicts`
    /// holds against one already kept.
    fn deselect_conflicting<F>(&mut self, conflicts: F) -> usize
    where
        F: Fn(&Particle, &Particle) -> bool,
    {
        let order = self.ranked_selection();
        let mut kept: Vec<usize> = Vec::with_capacity(order.len());
        let mut rejected = Vec::new();
        {
            let slice = self.as_slice();
            for idx in order {
                if kept.iter().any(|&k| conflicts(&slice[k], &slice[idx])) {
                    rejected.push(idx);
                } else {
                    kept.push(idx);
                }
            }
        }
        let slice = self.as_mut_slice();
        for &idx in &rejected {
            slice[idx].selected = false;
        }
        rejected.len()
    }

    /// Deselects particles whose primary FOM is below `min_fom`.
    pub fn deselect_below_fom(&mut self, min_fom: f32) -> usize {
        self.deselect_where(|p| p.score().is_nan() || p.score() < min_fom)
    }

    /// Deselects particles below `mean + factor * std` of the selected FOMs.
    ///
    /// Particles without a finite FOM are deselected and do not enter the
    /// statistics.
    pub fn deselect_below_fom_mean_std(&mut self, factor: f64) -> usize {
        let foms: Vec<f64> = self
            .selected()
            .map(|p| p.score() as f64)
            .filter(|v| v.is_finite())
            .collect();
        if foms.is_empty() {
            return 0;
        }
        let n = foms.len() as f64;
        let mean = foms.iter().sum::<f64>() / n;
        let std = if foms.len() > 1 {
            (foms.iter().map(|v| v * v).sum::<f64>() / n - mean * mean).max(0.0).sqrt()
        } else {
            0.0
        };
        let cutoff = mean + factor * std;
        self.deselect_where(|p| !p.score().is_finite() || (p.score() as f64) < cutoff)
    }

    /// Deselects any particle closer than `min_distance` to a better one.
    ///
    /// Idempotent: the survivors are pairwise at least `min_distance` apart.
    pub fn deselect_overlapping(&mut self, min_distance: f64) -> usize {
        let d2 = min_distance * min_distance;
        self.deselect_conflicting(|kept, p| (kept.location - p.location).norm_squared() < d2)
    }

    /// Deselects any particle whose orientation is within `min_angle`
    /// (radians) of a better one; symmetry-equivalent orientations count as
    /// equal when `symmetry` is given.
    pub fn deselect_similar_orientations(
        &mut self,
        min_angle: f64,
        symmetry: Option<&dyn Symmetry>,
    ) -> usize {
        self.deselect_conflicting(|kept, p| {
            let angle = match symmetry {
                Some(sym) => sym.min_angle_between(&kept.orientation, &p.orientation),
                None => kept.orientation.angle_to(&p.orientation),
            };
            angle < min_angle
        })
    }

    /// Fits a [`Shell`] to all particle locations and deselects particles
    /// farther than `max_distance` from its surface.
    pub fn deselect_off_shell(&mut self, max_distance: f64) -> VolMatchResult<(Shell, usize)> {
        let points: Vec<Vector3<f64>> = self.iter().map(|p| p.location).collect();
        let shell = Shell::fit(&points)?;
        let removed = self.deselect_where(|p| shell.signed_distance(&p.location).abs() > max_distance);
        Ok((shell, removed))
    }

    /// Keeps only the `n` best selected particles.
    pub fn select_top(&mut self, n: usize) -> usize {
        let order = self.ranked_selection();
        let slice = self.as_mut_slice();
        let mut count = 0;
        for &idx in order.iter().skip(n) {
            slice[idx].selected = false;
            count += 1;
        }
        count
    }

    /// Keeps the best `percent` (0 to 100) of the selected particles,
    /// rounding the kept count down.
    pub fn select_top_percent(&mut self, percent: f64) -> usize {
        let percent = percent.clamp(0.0, 100.0);
        let keep = (self.selected_count() as f64 * percent / 100.0).floor() as usize;
        self.select_top(keep)
    }

    /// Deselects particles outside `region`.
    pub fn deselect_outside(&mut self, region: &Region) -> usize {
        self.deselect_where(|p| (p.location - region.center).norm() > region.radius)
    }

    /// Selects every particle; returns how many were reselected.
    pub fn reset_selection(&mut self) -> usize {
        let mut count = 0;
        for p in self.iter_mut().filter(|p| !p.selected) {
            p.selected = true;
            count += 1;
        }
        count
    }

    /// Flips every selection flag; returns the new selected count.
    pub fn invert_selection(&mut self) -> usize {
        for p in self.iter_mut() {
            p.selected = !p.selected;
        }
        self.selected_count()
    }
}

/// Independently toggleable filters; `None` disables a filter.
///
/// [`SelectionFilters::apply`] runs the enabled filters in field order.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SelectionFilters {
    pub min_fom: Option<f32>,
    /// Keep only `fom >= mean + factor * std`.
    pub fom_std_factor: Option<f64>,
    pub region: Option<Region>,
    /// Maximum distance from the fitted shell surface (voxels).
    pub shell_distance: Option<f64>,
    /// Minimum distance between particles (voxels).
    pub min_distance: Option<f64>,
    /// Minimum angle between orientations (radians).
    pub min_angle: Option<f64>,
    pub top_n: Option<usize>,
    pub top_percent: Option<f64>,
}

/// Number of particles one filter deselected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterCount {
    pub filter: &'static str,
    pub removed: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectionReport {
    pub removed: Vec<FilterCount>,
    /// Shell fitted by the shell filter, when enabled.
    pub shell: Option<Shell>,
    pub selected: usize,
}

impl SelectionReport {
    pub fn total_removed(&self) -> usize {
        self.removed.iter().map(|c| c.removed).sum()
    }
}

impl SelectionFilters {
    pub fn validate(&self) -> VolMatchResult<()> {
        let non_negative = |name: &'static str, v: Option<f64>| match v {
            Some(v) if !(v.is_finite() && v >= 0.0) => Err(VolMatchError::InvalidParameter {
                name,
                reason: "must be finite and >= 0",
            }),
            _ => Ok(()),
        };
        if self.min_fom.is_some_and(|v| !v.is_finite()) {
            return Err(VolMatchError::InvalidParameter {
                name: "min_fom",
                reason: "must be finite",
            });
        }
        if self.fom_std_factor.is_some_and(|v| !v.is_finite()) {
            return Err(VolMatchError::InvalidParameter {
                name: "fom_std_factor",
                reason: "must be finite",
            });
        }
        non_negative("region.radius", self.region.map(|r| r.radius))?;
        non_negative("shell_distance", self.shell_distance)?;
        non_negative("min_distance", self.min_distance)?;
        non_negative("min_angle", self.min_angle)?;
        if self.top_percent.is_some_and(|v| !(0.0..=100.0).contains(&v)) {
            return Err(VolMatchError::InvalidParameter {
                name: "top_percent",
                reason: "must be within [0, 100]",
            });
        }
        Ok(())
    }

    /// Applies the enabled filters to `list`.
    pub fn apply(
        &self,
        list: &mut ParticleList,
        symmetry: Option<&dyn Symmetry>,
    ) -> VolMatchResult<SelectionReport> {
        self.validate()?;
        let _span = trace_span!("select", particles = list.len()).entered();
        let mut report = SelectionReport::default();
        let mut record = |filter: &'static str, removed: usize| {
            trace_event!("filter", filter = filter, removed = removed);
            report.removed.push(FilterCount { filter, removed });
        };

        if let Some(v) = self.min_fom {
            record("min_fom", list.deselect_below_fom(v));
        }
        if let Some(v) = self.fom_std_factor {
            record("fom_std", list.deselect_below_fom_mean_std(v));
        }
        if let Some(region) = &self.region {
            record("region", list.deselect_outside(region));
        }
        let mut shell = None;
        if let Some(v) = self.shell_distance {
            let (fitted, removed) = list.deselect_off_shell(v)?;
            shell = Some(fitted);
            record("shell", removed);
        }
        if let Some(v) = self.min_distance {
            record("overlap", list.deselect_overlapping(v));
        }
        if let Some(v) = self.min_angle {
            record("angle", list.deselect_similar_orientations(v, symmetry));
        }
        if let Some(n) = self.top_n {
            record("top_n", list.select_top(n));
        }
        if let Some(p) = self.top_percent {
            record("top_percent", list.select_top_percent(p));
        }
        report.shell = shell;
        report.selected = list.selected_count();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::{Region, SelectionFilters};
    use crate::bank::{Orientation, PointGroup};
    use crate::particle::{Particle, ParticleList};
    use nalgebra::Vector3;
    use std::f64::consts::PI;

    fn list(entries: &[(f64, f64, f64, f32)]) -> ParticleList {
        let mut list = ParticleList::new("v");
        for (i, &(x, y, z, fom)) in entries.iter().enumerate() {
            list.push(Particle::new(i + 1, Vector3::new(x, y, z), Orientation::identity(), fom));
        }
        list
    }

    fn selected_ids(list: &ParticleList) -> Vec<usize> {
        list.selected().map(|p| p.id).collect()
    }

    #[test]
    fn fom_threshold_counts_only_newly_deselected() {
        let mut l = list(&[(0.0, 0.0, 0.0, 0.2), (1.0, 0.0, 0.0, 0.6), (2.0, 0.0, 0.0, f32::NAN)]);
        assert_eq!(l.deselect_below_fom(0.5), 2);
        assert_eq!(l.deselect_below_fom(0.5), 0);
        assert_eq!(selected_ids(&l), vec![2]);
    }

    #[test]
    fn overlap_keeps_higher_fom() {
        let mut l = list(&[
            (0.0, 0.0, 0.0, 0.5),
            (3.0, 0.0, 0.0, 0.9),
            (6.0, 0.0, 0.0, 0.4),
            (20.0, 0.0, 0.0, 0.1),
        ]);
        assert_eq!(l.deselect_overlapping(5.0), 2);
        assert_eq!(selected_ids(&l), vec![2, 4]);
    }

    #[test]
    fn angular_filter_respects_symmetry() {
        let mut l = ParticleList::new("v");
        l.push(Particle::new(1, Vector3::zeros(), Orientation::new(Vector3::z(), 0.0), 0.9));
        l.push(Particle::new(2, Vector3::x() * 50.0, Orientation::new(Vector3::z(), PI / 2.0), 0.8));
        let mut plain = l.clone();
        assert_eq!(plain.deselect_similar_orientations(0.1, None), 0);
        let c4 = PointGroup::Cyclic(4);
        assert_eq!(l.deselect_similar_orientations(0.1, Some(&c4)), 1);
        assert_eq!(selected_ids(&l), vec![1]);
    }

    #[test]
    fn top_n_and_percent() {
        let entries: Vec<_> = (0..10).map(|i| (i as f64 * 10.0, 0.0, 0.0, i as f32 * 0.1)).collect();
        let mut l = list(&entries);
        assert_eq!(l.select_top(4), 6);
        assert_eq!(selected_ids(&l), vec![7, 8, 9, 10]);
        assert_eq!(l.select_top_percent(50.0), 2);
        assert_eq!(selected_ids(&l), vec![9, 10]);
    }

    #[test]
    fn mean_std_cutoff_and_region() {
        let mut l = list(&[
            (0.0, 0.0, 0.0, 0.1),
            (1.0, 0.0, 0.0, 0.2),
            (2.0, 0.0, 0.0, 0.3),
            (30.0, 0.0, 0.0, 0.9),
        ]);
        assert_eq!(l.deselect_below_fom_mean_std(0.0), 3);
        assert_eq!(l.reset_selection(), 3);
        let region = Region {
            center: Vector3::zeros(),
            radius: 1.5,
        };
        assert_eq!(l.deselect_outside(&region), 2);
        assert_eq!(l.invert_selection(), 2);
        assert_eq!(selected_ids(&l), vec![3, 4]);
    }

    #[test]
    fn shell_filter_removes_outliers() {
        let mut l = ParticleList::new("v");
        let center = Vector3::new(32.0, 32.0, 32.0);
        let dirs = [
            Vector3::x(),
            -Vector3::x(),
            Vector3::y(),
            -Vector3::y(),
            Vector3::z(),
            -Vector3::z(),
            Vector3::new(1.0, 1.0, 1.0).normalize(),
            Vector3::new(-1.0, 1.0, -1.0).normalize(),
        ];
        for (i, d) in dirs.iter().enumerate() {
            l.push(Particle::new(i + 1, center + d * 20.0, Orientation::identity(), 0.5));
        }
        l.push(Particle::new(99, center + Vector3::new(3.0, 0.0, 0.0), Orientation::identity(), 0.5));
        let (shell, removed) = l.deselect_off_shell(6.0).unwrap();
        assert_eq!(removed, 1);
        assert!(!l.as_slice()[8].selected);
        assert!((shell.radius - 20.0).abs() < 3.0);
    }

    #[test]
    fn apply_reports_each_enabled_filter() {
        let mut l = list(&[
            (0.0, 0.0, 0.0, 0.9),
            (2.0, 0.0, 0.0, 0.8),
            (50.0, 0.0, 0.0, 0.3),
            (90.0, 0.0, 0.0, 0.7),
        ]);
        let filters = SelectionFilters {
            min_fom: Some(0.5),
            min_distance: Some(5.0),
            ..SelectionFilters::default()
        };
        let report = filters.apply(&mut l, None).unwrap();
        let counts: Vec<_> = report.removed.iter().map(|c| (c.filter, c.removed)).collect();
        assert_eq!(counts, vec![("min_fom", 1), ("overlap", 1)]);
        assert_eq!(report.selected, 2);
        assert_eq!(report.total_removed(), 2);

        let bad = SelectionFilters {
            top_percent: Some(150.0),
            ..SelectionFilters::default()
        };
        assert!(bad.apply(&mut l, None).is_err());
    }
}
