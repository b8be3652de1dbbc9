//! Integer polygon predicates on the voxel grid
//!
//! Points are contour vertices `[x, y, z, flags]`; only x and z take part.
//! "Left" follows the grid orientation used by contours, where outlines turn
//! left at every convex corner.

pub(crate) type GridVert = [i32; 4];

#[inline]
pub(crate) fn area2(a: &GridVert, b: &GridVert, c: &GridVert) -> i32 {
    (b[0] - a[0]) * (c[2] - a[2]) - (c[0] - a[0]) * (b[2] - a[2])
}

#[inline]
pub(crate) fn left(a: &GridVert, b: &GridVert, c: &GridVert) -> bool {
    area2(a, b, c) < 0
}

#[inline]
pub(crate) fn left_on(a: &GridVert, b: &GridVert, c: &GridVert) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
fn collinear(a: &GridVert, b: &GridVert, c: &GridVert) -> bool {
    area2(a, b, c) == 0
}

#[inline]
pub(crate) fn same_xz(a: &GridVert, b: &GridVert) -> bool {
    a[0] == b[0] && a[2] == b[2]
}

/// Proper intersection: the segments share a point interior to both
pub(crate) fn intersect_prop(a: &GridVert, b: &GridVert, c: &GridVert, d: &GridVert) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// Whether `c` lies on the closed segment `ab`
fn between(a: &GridVert, b: &GridVert, c: &GridVert) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[2] <= c[2] && c[2] <= b[2]) || (a[2] >= c[2] && c[2] >= b[2])
    }
}

/// Whether segments `ab` and `cd` intersect, touching included
pub(crate) fn intersect(a: &GridVert, b: &GridVert, c: &GridVert, d: &GridVert) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

/// Whether `p` lies in the cone formed at corner `b` by `a -> b -> c`
pub(crate) fn in_cone(a: &GridVert, b: &GridVert, c: &GridVert, p: &GridVert) -> bool {
    // Convex corner
    if left_on(a, b, c) {
        return left(b, p, a) && left(p, b, c);
    }
    // Reflex corner
    !(left_on(b, p, c) && left_on(p, b, a))
}

/// Looser cone test that accepts diagonals along the cone edges
pub(crate) fn in_cone_loose(a: &GridVert, b: &GridVert, c: &GridVert, p: &GridVert) -> bool {
    if left_on(a, b, c) {
        return left_on(b, p, a) && left_on(p, b, c);
    }
    !(left_on(b, p, c) && left_on(p, b, a))
}

/// Signed doubled area of a closed grid polygon; positive for outlines
pub(crate) fn signed_area2(verts: &[GridVert]) -> i32 {
    let n = verts.len();
    let mut area = 0;
    for i in 0..n {
        let vi = &verts[i];
        let vj = &verts[(i + n - 1) % n];
        area += vi[0] * vj[2] - vj[0] * vi[2];
    }
    area
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: i32, z: i32) -> GridVert {
        [x, 0, z, 0]
    }

    #[test]
    fn test_crossing_segments() {
        assert!(intersect(&v(0, 0), &v(2, 2), &v(0, 2), &v(2, 0)));
        assert!(intersect_prop(&v(0, 0), &v(2, 2), &v(0, 2), &v(2, 0)));
        assert!(!intersect(&v(0, 0), &v(1, 0), &v(0, 1), &v(1, 1)));
    }

    #[test]
    fn test_touching_is_not_proper() {
        assert!(intersect(&v(0, 0), &v(2, 0), &v(1, 0), &v(1, 2)));
        assert!(!intersect_prop(&v(0, 0), &v(2, 0), &v(1, 0), &v(1, 2)));
    }

    #[test]
    fn test_outline_orientation() {
        // Order produced by the contour walker for a 2x2 block
        let outline = [v(0, 0), v(0, 2), v(2, 2), v(2, 0)];
        assert!(signed_area2(&outline) > 0);
        assert!(left_on(&outline[3], &outline[0], &outline[1]));

        let mut hole = outline;
        hole.reverse();
        assert!(signed_area2(&hole) < 0);
    }
}
