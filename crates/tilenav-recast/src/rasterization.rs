//! Triangle rasterization
//!
//! Triangles are clipped against the heightfield grid row by row and column by
//! column; every clipped piece becomes one span in the cell it covers.

use glam::Vec3;
use log::debug;

use crate::heightfield::{Heightfield, SPAN_MAX_HEIGHT};
use crate::{NULL_AREA, WALKABLE_AREA};

/// Triangles whose doubled area falls below this are treated as degenerate
const DEGENERATE_EPSILON: f32 = 1e-8;

#[derive(Debug, Clone, Copy)]
enum Axis {
    X = 0,
    Z = 2,
}

/// Slope of a triangle against the world up axis, in degrees.
///
/// Returns `None` for degenerate triangles. Winding is ignored so geometry
/// authored with either convention produces the same walkable surface.
pub fn triangle_slope_degrees(v0: Vec3, v1: Vec3, v2: Vec3) -> Option<f32> {
    let normal = (v1 - v0).cross(v2 - v0);
    let len = normal.length();
    if len < DEGENERATE_EPSILON {
        return None;
    }
    Some((normal.y.abs() / len).clamp(0.0, 1.0).acos().to_degrees())
}

/// Assigns an area id to every triangle: walkable when its slope is at most
/// `walkable_slope_angle`, null otherwise (degenerate triangles included).
pub fn mark_walkable_triangles(
    walkable_slope_angle: f32,
    verts: &[Vec3],
    tris: &[[u32; 3]],
) -> Vec<u8> {
    tris.iter()
        .map(|tri| {
            let [a, b, c] = tri.map(|i| verts[i as usize]);
            match triangle_slope_degrees(a, b, c) {
                Some(slope) if slope <= walkable_slope_angle => WALKABLE_AREA,
                _ => NULL_AREA,
            }
        })
        .collect()
}

/// Splits a convex polygon by an axis-aligned line into the part below and the
/// part above `offset`.
fn divide_poly(input: &[Vec3], below: &mut Vec<Vec3>, above: &mut Vec<Vec3>, offset: f32, axis: Axis) {
    below.clear();
    above.clear();

    let n = input.len();
    if n == 0 {
        return;
    }

    let coord = |v: &Vec3| match axis {
        Axis::X => v.x,
        Axis::Z => v.z,
    };
    let deltas: Vec<f32> = input.iter().map(|v| offset - coord(v)).collect();

    let mut j = n - 1;
    for i in 0..n {
        let a_below = deltas[j] >= 0.0;
        let b_below = deltas[i] >= 0.0;

        if a_below != b_below {
            let s = deltas[j] / (deltas[j] - deltas[i]);
            let p = input[j] + (input[i] - input[j]) * s;
            below.push(p);
            above.push(p);
            // Points on the line belong to the side they came from
            if deltas[i] > 0.0 {
                below.push(input[i]);
            } else if deltas[i] < 0.0 {
                above.push(input[i]);
            }
        } else {
            if deltas[i] >= 0.0 {
                below.push(input[i]);
                if deltas[i] != 0.0 {
                    j = i;
                    continue;
                }
            }
            above.push(input[i]);
        }
        j = i;
    }
}

/// Rasterizes a single triangle into the heightfield
pub fn rasterize_triangle(
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    area_id: u8,
    heightfield: &mut Heightfield,
    flag_merge_threshold: i32,
) {
    let bmin = heightfield.bmin;
    let bmax = heightfield.bmax;
    let by = bmax.y - bmin.y;
    let ics = 1.0 / heightfield.cs;
    let ich = 1.0 / heightfield.ch;
    let w = heightfield.width;
    let h = heightfield.height;

    let tmin = v0.min(v1).min(v2);
    let tmax = v0.max(v1).max(v2);
    if tmin.x > bmax.x || tmax.x < bmin.x || tmin.y > bmax.y || tmax.y < bmin.y || tmin.z > bmax.z || tmax.z < bmin.z {
        return;
    }

    // Rows and columns touched by the triangle; -1 keeps the cut at the field start exact
    let z0 = (((tmin.z - bmin.z) * ics).floor() as i32).clamp(-1, h - 1);
    let z1 = (((tmax.z - bmin.z) * ics).floor() as i32).clamp(0, h - 1);

    let mut remaining = vec![v0, v1, v2];
    let mut row = Vec::with_capacity(7);
    let mut rest = Vec::with_capacity(7);
    let mut cell = Vec::with_capacity(7);
    let mut row_rest = Vec::with_capacity(7);

    for z in z0..=z1 {
        let cz = bmin.z + (z + 1) as f32 * heightfield.cs;
        divide_poly(&remaining, &mut row, &mut rest, cz, Axis::Z);
        std::mem::swap(&mut remaining, &mut rest);
        if row.len() < 3 || z < 0 {
            continue;
        }

        let (row_min_x, row_max_x) = row
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.x), hi.max(v.x)));
        let x0 = (((row_min_x - bmin.x) * ics).floor() as i32).clamp(-1, w - 1);
        let x1 = (((row_max_x - bmin.x) * ics).floor() as i32).clamp(0, w - 1);

        let mut row_poly = std::mem::take(&mut row);
        for x in x0..=x1 {
            let cx = bmin.x + (x + 1) as f32 * heightfield.cs;
            divide_poly(&row_poly, &mut cell, &mut row_rest, cx, Axis::X);
            std::mem::swap(&mut row_poly, &mut row_rest);
            if cell.len() < 3 || x < 0 {
                continue;
            }

            let (min_y, max_y) = cell
                .iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.y), hi.max(v.y)));
            let span_min = min_y - bmin.y;
            let span_max = max_y - bmin.y;
            if span_max < 0.0 || span_min > by {
                continue;
            }

            let max_h = SPAN_MAX_HEIGHT as i32;
            let smin = ((span_min.max(0.0) * ich).floor() as i32).clamp(0, max_h);
            let smax = ((span_max.min(by) * ich).ceil() as i32).clamp(smin + 1, max_h);
            heightfield.add_span(x, z, smin as u16, smax as u16, area_id, flag_merge_threshold);
        }
        row = row_poly;
    }
}

/// Rasterizes indexed triangles into the heightfield, skipping degenerate ones
pub fn rasterize_triangles(
    heightfield: &mut Heightfield,
    verts: &[Vec3],
    tris: &[[u32; 3]],
    areas: &[u8],
    flag_merge_threshold: i32,
) {
    let mut skipped = 0usize;
    for (tri, &area) in tris.iter().zip(areas) {
        let [a, b, c] = tri.map(|i| verts[i as usize]);
        if (b - a).cross(c - a).length() < DEGENERATE_EPSILON {
            skipped += 1;
            continue;
        }
        rasterize_triangle(a, b, c, area, heightfield, flag_merge_threshold);
    }
    if skipped > 0 {
        debug!("Skipped {} degenerate triangles during rasterization", skipped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slope_threshold_is_inclusive() {
        // 45 degree ramp
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(0.0, 0.0, 1.0);
        let c = Vec3::new(1.0, 1.0, 0.0);
        let slope = triangle_slope_degrees(a, b, c).unwrap();
        assert!((slope - 45.0).abs() < 1e-3);

        let verts = [a, b, c];
        let areas = mark_walkable_triangles(slope, &verts, &[[0, 1, 2]]);
        assert_eq!(areas, vec![WALKABLE_AREA]);
        let areas = mark_walkable_triangles(slope - 0.5, &verts, &[[0, 1, 2]]);
        assert_eq!(areas, vec![NULL_AREA]);
    }

    #[test]
    fn test_winding_does_not_matter() {
        let verts = [Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0)];
        let areas = mark_walkable_triangles(10.0, &verts, &[[0, 1, 2], [0, 2, 1]]);
        assert_eq!(areas, vec![WALKABLE_AREA, WALKABLE_AREA]);
    }

    #[test]
    fn test_degenerate_triangle_is_skipped() {
        let verts = [Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0)];
        assert!(triangle_slope_degrees(verts[0], verts[1], verts[2]).is_none());

        let mut hf = Heightfield::new(4, 4, Vec3::ZERO, Vec3::new(4.0, 4.0, 4.0), 1.0, 0.5).unwrap();
        rasterize_triangles(&mut hf, &verts, &[[0, 1, 2]], &[WALKABLE_AREA], 1);
        assert_eq!(hf.span_count(), 0);
    }

    #[test]
    fn test_rasterize_quad_covers_every_cell() {
        let verts = [
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 4.0),
            Vec3::new(4.0, 1.0, 4.0),
            Vec3::new(4.0, 1.0, 0.0),
        ];
        let tris = [[0, 1, 2], [0, 2, 3]];
        let mut hf = Heightfield::new(4, 4, Vec3::ZERO, Vec3::new(4.0, 4.0, 4.0), 1.0, 0.5).unwrap();
        rasterize_triangles(&mut hf, &verts, &tris, &[WALKABLE_AREA; 2], 1);

        for z in 0..4 {
            for x in 0..4 {
                let col = hf.column(x, z);
                assert_eq!(col.len(), 1, "cell ({x}, {z})");
                assert_eq!(col[0].smin, 2);
                assert_eq!(col[0].smax, 3);
                assert_eq!(col[0].area, WALKABLE_AREA);
            }
        }
    }

    #[test]
    fn test_triangle_outside_field_is_ignored() {
        let mut hf = Heightfield::new(4, 4, Vec3::ZERO, Vec3::new(4.0, 4.0, 4.0), 1.0, 0.5).unwrap();
        rasterize_triangle(
            Vec3::new(10.0, 0.0, 10.0),
            Vec3::new(10.0, 0.0, 11.0),
            Vec3::new(11.0, 0.0, 10.0),
            WALKABLE_AREA,
            &mut hf,
            1,
        );
        assert_eq!(hf.span_count(), 0);
    }
}
