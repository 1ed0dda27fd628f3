//! Particle registry and selection.
//!
//! A [`ParticleList`] owns the candidates found in (or loaded for) one
//! volume. Selection filters only clear the `selected` flag; deselected
//! particles stay in the list until [`ParticleList::compact`] removes them.

use crate::bank::Orientation;
use crate::refine::Pose;
use nalgebra::Vector3;

pub mod select;
pub mod shell;

pub use select::{FilterCount, Region, SelectionFilters, SelectionReport};
pub use shell::Shell;

/// A located copy of the template.
#[derive(Clone, Debug, PartialEq)]
pub struct Particle {
    pub id: usize,
    /// Template center in target voxel coordinates.
    pub location: Vector3<f64>,
    /// Origin of the template box in the template's own voxel coordinates.
    pub box_origin: Vector3<f64>,
    pub orientation: Orientation,
    /// Relative magnification.
    pub scale: f64,
    /// Figures of merit; `fom[0]` is the primary score.
    pub fom: Vec<f32>,
    pub selected: bool,
    /// Label of the volume the particle belongs to.
    pub volume_id: String,
}

impl Particle {
    /// Selected particle at unit scale with a single FOM.
    pub fn new(id: usize, location: Vector3<f64>, orientation: Orientation, fom: f32) -> Self {
        Self {
            id,
            location,
            box_origin: Vector3::zeros(),
            orientation,
            scale: 1.0,
            fom: vec![fom],
            selected: true,
            volume_id: String::new(),
        }
    }

    pub fn with_box_origin(mut self, origin: Vector3<f64>) -> Self {
        self.box_origin = origin;
        self
    }

    pub fn with_volume_id(mut self, volume_id: impl Into<String>) -> Self {
        self.volume_id = volume_id.into();
        self
    }

    /// Primary figure of merit (`NaN` if none was recorded).
    pub fn score(&self) -> f32 {
        self.fom.first().copied().unwrap_or(f32::NAN)
    }

    pub fn set_score(&mut self, score: f32) {
        match self.fom.first_mut() {
            Some(first) => *first = score,
            None => self.fom.push(score),
        }
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.location, self.orientation).with_scale(self.scale)
    }

    pub fn set_pose(&mut self, pose: &Pose) {
        self.location = pose.location;
        self.orientation = pose.orientation;
        self.scale = pose.scale;
    }
}

/// Ordered particles of one volume.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParticleList {
    volume_id: String,
    particles: Vec<Particle>,
}

impl ParticleList {
    pub fn new(volume_id: impl Into<String>) -> Self {
        Self {
            volume_id: volume_id.into(),
            particles: Vec::new(),
        }
    }

    /// Wraps existing particles, e.g. loaded from a previous run.
    pub fn from_particles(volume_id: impl Into<String>, particles: Vec<Particle>) -> Self {
        Self {
            volume_id: volume_id.into(),
            particles,
        }
    }

    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }

    /// Appends a particle, stamping it with this list's volume label.
    pub fn push(&mut self, mut particle: Particle) {
        particle.volume_id.clone_from(&self.volume_id);
        self.particles.push(particle);
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn as_slice(&self) -> &[Particle] {
        &self.particles
    }

    pub fn as_mut_slice(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn get(&self, idx: usize) -> Option<&Particle> {
        self.particles.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Particle> {
        self.particles.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Particle> {
        self.particles.iter_mut()
    }

    pub fn selected(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter().filter(|p| p.selected)
    }

    pub fn selected_count(&self) -> usize {
        self.selected().count()
    }

    /// Removes deselected particles, keeping the order of the rest.
    ///
    /// Returns the number removed.
    pub fn compact(&mut self) -> usize {
        let before = self.particles.len();
        self.particles.retain(|p| p.selected);
        before - self.particles.len()
    }

    /// Renumbers particles sequentially from 1 in list order.
    pub fn renumber(&mut self) {
        for (idx, p) in self.particles.iter_mut().enumerate() {
            p.id = idx + 1;
        }
    }

    pub fn into_particles(self) -> Vec<Particle> {
        self.particles
    }
}

impl<'a> IntoIterator for &'a ParticleList {
    type Item = &'a Particle;
    type IntoIter = std::slice::Iter<'a, Particle>;

    fn into_iter(self) -> Self::IntoIter {
        self.particles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{Particle, ParticleList};
    use crate::bank::Orientation;
    use nalgebra::Vector3;

    fn particle(id: usize, fom: f32) -> Particle {
        Particle::new(id, Vector3::new(id as f64, 0.0, 0.0), Orientation::identity(), fom)
    }

    #[test]
    fn push_stamps_volume_label() {
        let mut list = ParticleList::new("tomo_01");
        list.push(particle(1, 0.5).with_volume_id("other"));
        assert_eq!(list.as_slice()[0].volume_id, "tomo_01");
    }

    #[test]
    fn compact_is_stable_and_renumber_is_sequential() {
        let mut list = ParticleList::new("v");
        for id in 1..=5 {
            list.push(particle(id, id as f32 * 0.1));
        }
        list.as_mut_slice()[1].selected = false;
        list.as_mut_slice()[3].selected = false;
        assert_eq!(list.selected_count(), 3);
        assert_eq!(list.compact(), 2);
        let ids: Vec<usize> = list.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
        list.renumber();
        let ids: Vec<usize> = list.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn score_tracks_primary_fom() {
        let mut p = particle(1, 0.3);
        p.fom.push(0.9);
        assert_eq!(p.score(), 0.3);
        p.set_score(0.7);
        assert_eq!(p.fom, vec![0.7, 0.9]);
        p.fom.clear();
        assert!(p.score().is_nan());
        p.set_score(0.2);
        assert_eq!(p.fom, vec![0.2]);
    }
}
