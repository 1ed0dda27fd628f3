//! Three-point parabola vertex.

/// Offset of the vertex of the parabola through `(-1, fm)`, `(0, f0)`, `(1, fp)`.
///
/// Returns `None` unless the parabola opens downward and the vertex lies
/// within one sample of the center; the fit then adds nothing over the
/// integer sample.
pub fn parabola_vertex(fm: f64, f0: f64, fp: f64) -> Option<f64> {
    if !(fm.is_finite() && f0.is_finite() && fp.is_finite()) {
        return None;
    }
    let curvature = fm - 2.0 * f0 + fp;
    if curvature > -1e-9 {
        return None;
    }
    let offset = 0.5 * (fm - fp) / curvature;
    (offset.is_finite() && offset.abs() <= 1.0).then_some(offset)
}
