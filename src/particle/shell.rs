//! Sphere fit to particle locations.

use crate::util::{VolMatchError, VolMatchResult};
use nalgebra::{Matrix4, Vector3, Vector4};

const MAX_ITERATIONS: usize = 100;
const STEP_TOLERANCE: f64 = 1e-9;

/// Sphere through a set of locations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Shell {
    pub center: Vector3<f64>,
    pub radius: f64,
}

impl Shell {
    /// Least-squares sphere through `points`.
    ///
    /// An algebraic fit gives the starting sphere, which Gauss-Newton then
    /// refines against the geometric residual `|p - c| - r`. At least four
    /// points are required, and they must not all lie on one plane.
    pub fn fit(points: &[Vector3<f64>]) -> VolMatchResult<Self> {
        if points.len() < 4 {
            return Err(VolMatchError::NotEnoughParticles {
                needed: 4,
                got: points.len(),
            });
        }
        let mut shell = algebraic_fit(points)?;
        for _ in 0..MAX_ITERATIONS {
            let mut jtj = Matrix4::<f64>::zeros();
            let mut jtr = Vector4::<f64>::zeros();
            for p in points {
                let d = p - shell.center;
                let dist = d.norm();
                if dist < 1e-12 {
                    continue;
                }
                let u = d / dist;
                let j = Vector4::new(-u.x, -u.y, -u.z, -1.0);
                let r = dist - shell.radius;
                jtj += j * j.transpose();
                jtr += j * r;
            }
            let Some(chol) = jtj.cholesky() else {
                break;
            };
            let delta = chol.solve(&(-jtr));
            shell.center += Vector3::new(delta[0], delta[1], delta[2]);
            shell.radius += delta[3];
            if delta.norm() < STEP_TOLERANCE {
                break;
            }
        }
        shell.radius = shell.radius.abs();
        Ok(shell)
    }

    /// Signed distance from the surface; positive outside.
    pub fn signed_distance(&self, point: &Vector3<f64>) -> f64 {
        (point - self.center).norm() - self.radius
    }

    /// Root-mean-square distance of `points` from the surface.
    pub fn rmsd(&self, points: &[Vector3<f64>]) -> f64 {
        if points.is_empty() {
            return 0.0;
        }
        let sum: f64 = points.iter().map(|p| self.signed_distance(p).powi(2)).sum();
        (sum / points.len() as f64).sqrt()
    }
}

/// Linear fit of `|p|^2 = 2 c.p + k` on centroid-shifted points.
fn algebraic_fit(points: &[Vector3<f64>]) -> VolMatchResult<Shell> {
    let n = points.len() as f64;
    let centroid = points.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;
    let mut ata = Matrix4::<f64>::zeros();
    let mut atb = Vector4::<f64>::zeros();
    for p in points {
        let q = p - centroid;
        let row = Vector4::new(2.0 * q.x, 2.0 * q.y, 2.0 * q.z, 1.0);
        ata += row * row.transpose();
        atb += row * q.norm_squared();
    }
    let solution = ata
        .lu()
        .solve(&atb)
        .filter(|s| s.iter().all(|v| v.is_finite()))
        .ok_or(VolMatchError::InvalidParameter {
            name: "locations",
            reason: "points are coplanar; no sphere fits them",
        })?;
    let c = Vector3::new(solution[0], solution[1], solution[2]);
    let r2 = solution[3] + c.norm_squared();
    if r2.is_nan() || r2 <= 0.0 {
        return Err(VolMatchError::InvalidParameter {
            name: "locations",
            reason: "points are coplanar; no sphere fits them",
        });
    }
    Ok(Shell {
        center: centroid + c,
        radius: r2.sqrt(),
    })
}
