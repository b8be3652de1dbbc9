//! 2D geometry operations on the XZ plane
//!
//! Navigation polygons are convex and lie (roughly) on the XZ plane with Y up,
//! so most queries reduce to 2D tests followed by a height lookup.

use glam::Vec3;

/// Calculate twice the signed area of a 2D triangle on the XZ plane.
///
/// The sign indicates the winding order:
/// - Positive: clockwise (when looking down Y axis)
/// - Negative: counter-clockwise (when looking down Y axis)
/// - Zero: degenerate (collinear points)
#[inline]
pub fn tri_area_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let abx = b.x - a.x;
    let abz = b.z - a.z;
    let acx = c.x - a.x;
    let acz = c.z - a.z;
    acx * abz - abx * acz
}

/// Calculate squared distance between two points on the XZ plane.
#[inline]
pub fn dist_sqr_2d(a: Vec3, b: Vec3) -> f32 {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    dx * dx + dz * dz
}

/// Calculate distance between two points on the XZ plane.
#[inline]
pub fn dist_2d(a: Vec3, b: Vec3) -> f32 {
    dist_sqr_2d(a, b).sqrt()
}

/// Squared XZ distance from `p` to segment `a..b`, together with the segment
/// parameter of the closest point.
pub fn dist_point_segment_sqr_2d(p: Vec3, a: Vec3, b: Vec3) -> (f32, f32) {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    let d = dx * dx + dz * dz;

    let t = if d < f32::EPSILON {
        0.0
    } else {
        (((p.x - a.x) * dx + (p.z - a.z) * dz) / d).clamp(0.0, 1.0)
    };

    let qx = a.x + t * dx - p.x;
    let qz = a.z + t * dz - p.z;
    (qx * qx + qz * qz, t)
}

/// Find the closest point on segment `a..b` to `p`, interpolating height too.
pub fn closest_point_on_segment_2d(p: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    let (_, t) = dist_point_segment_sqr_2d(p, a, b);
    a.lerp(b, t)
}

/// Tests whether `p` lies inside the convex or concave polygon `verts` on the XZ plane.
///
/// Points exactly on an edge may report either result.
pub fn point_in_polygon_2d(p: Vec3, verts: &[Vec3]) -> bool {
    let mut inside = false;
    let n = verts.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        if ((vi.z > p.z) != (vj.z > p.z))
            && (p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Height of triangle `a, b, c` at the XZ location of `p`, if `p` projects inside it.
pub fn closest_height_point_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    const EPS: f32 = 1e-6;

    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    // Barycentric coordinates on the XZ plane
    let denom = v0.x * v1.z - v0.z * v1.x;
    if denom.abs() < EPS {
        return None;
    }

    let mut u = v1.z * v2.x - v1.x * v2.z;
    let mut v = v0.x * v2.z - v0.z * v2.x;
    if denom < 0.0 {
        u = -u;
        v = -v;
    }
    let denom = denom.abs();

    // Allow a little slack so shared edges never fall between triangles
    let tol = -EPS * denom;
    if u >= tol && v >= tol && (u + v) <= denom - tol {
        Some(a.y + (v0.y * u + v1.y * v) / denom)
    } else {
        None
    }
}

/// Polygon-vs-point closest point on the XZ plane: either the point itself
/// (when inside) or the nearest point on the polygon boundary.
pub fn closest_point_on_polygon_2d(p: Vec3, verts: &[Vec3]) -> Vec3 {
    if point_in_polygon_2d(p, verts) {
        return p;
    }

    let mut best = verts.first().copied().unwrap_or(p);
    let mut best_dist = f32::MAX;
    for i in 0..verts.len() {
        let a = verts[i];
        let b = verts[(i + 1) % verts.len()];
        let (d, t) = dist_point_segment_sqr_2d(p, a, b);
        if d < best_dist {
            best_dist = d;
            best = a.lerp(b, t);
        }
    }
    best
}

/// Intersection of two XZ intervals, returned as `(min, max)` when non-empty.
#[inline]
pub fn overlap_range(amin: f32, amax: f32, bmin: f32, bmax: f32) -> Option<(f32, f32)> {
    let lo = amin.max(bmin);
    let hi = amax.min(bmax);
    (lo <= hi).then_some((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Vec3> {
        vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 2.0),
            Vec3::new(2.0, 0.0, 2.0),
            Vec3::new(2.0, 0.0, 0.0),
        ]
    }

    #[test]
    fn test_tri_area_winding() {
        let a = Vec3::ZERO;
        let b = Vec3::new(0.0, 0.0, 1.0);
        let c = Vec3::new(1.0, 0.0, 0.0);
        assert!(tri_area_2d(a, b, c) > 0.0);
        assert!(tri_area_2d(a, c, b) < 0.0);
        assert_eq!(tri_area_2d(a, a, c), 0.0);
    }

    #[test]
    fn test_point_in_polygon() {
        let poly = square();
        assert!(point_in_polygon_2d(Vec3::new(1.0, 5.0, 1.0), &poly));
        assert!(!point_in_polygon_2d(Vec3::new(3.0, 0.0, 1.0), &poly));
    }

    #[test]
    fn test_closest_point_on_polygon_outside() {
        let poly = square();
        let p = closest_point_on_polygon_2d(Vec3::new(3.0, 0.0, 1.0), &poly);
        assert!((p.x - 2.0).abs() < 1e-5);
        assert!((p.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_height_on_sloped_triangle() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(0.0, 0.0, 2.0);
        let c = Vec3::new(2.0, 2.0, 0.0);
        let h = closest_height_point_triangle(Vec3::new(1.0, 10.0, 0.5), a, b, c).unwrap();
        assert!((h - 1.0).abs() < 1e-4);
        assert!(closest_height_point_triangle(Vec3::new(5.0, 0.0, 5.0), a, b, c).is_none());
    }

    #[test]
    fn test_segment_distance() {
        let (d, t) = dist_point_segment_sqr_2d(
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
        );
        assert!((d - 1.0).abs() < 1e-6);
        assert!((t - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_overlap_range() {
        assert_eq!(overlap_range(0.0, 2.0, 1.0, 3.0), Some((1.0, 2.0)));
        assert_eq!(overlap_range(0.0, 1.0, 2.0, 3.0), None);
    }
}
