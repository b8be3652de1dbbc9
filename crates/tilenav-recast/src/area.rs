//! Area modification for compact heightfields
//!
//! Erosion by the agent radius and box marking used for dynamic obstacles.

use tilenav_common::Aabb;

use crate::compact_heightfield::CompactHeightfield;
use crate::NULL_AREA;

/// Shrinks the walkable area by `radius` cells away from every boundary
/// (unwalkable spans, missing neighbours and heightfield edges).
pub fn erode_walkable_area(chf: &mut CompactHeightfield, radius: i32) {
    let w = chf.width;
    let h = chf.height;
    let mut dist = vec![0xffu8; chf.span_count()];

    // Mark boundary cells
    for z in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] == NULL_AREA {
                    dist[i] = 0;
                    continue;
                }
                let walkable_neighbours = (0..4)
                    .filter_map(|dir| chf.neighbour(i, x, z, dir))
                    .filter(|&(ni, _, _)| chf.areas[ni] != NULL_AREA)
                    .count();
                if walkable_neighbours != 4 {
                    dist[i] = 0;
                }
            }
        }
    }

    chamfer_pass(chf, &mut dist, |d| d.saturating_add(2), |d| d.saturating_add(3));

    let threshold = (radius * 2).min(u8::MAX as i32) as u8;
    for (i, d) in dist.iter().enumerate() {
        if *d < threshold {
            chf.areas[i] = NULL_AREA;
        }
    }
}

/// Two-pass chamfer distance transform shared by erosion and the distance field.
///
/// `straight` and `diagonal` add the cost of an orthogonal and a diagonal step.
pub(crate) fn chamfer_pass<T: Copy + Ord>(
    chf: &CompactHeightfield,
    dist: &mut [T],
    straight: impl Fn(T) -> T,
    diagonal: impl Fn(T) -> T,
) {
    let w = chf.width;
    let h = chf.height;

    // Pass 1: (-1,0), (-1,-1), (0,-1), (1,-1)
    for z in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, z) {
                if let Some((ai, ax, az)) = chf.neighbour(i, x, z, 0) {
                    dist[i] = dist[i].min(straight(dist[ai]));
                    if let Some((aai, _, _)) = chf.neighbour(ai, ax, az, 3) {
                        dist[i] = dist[i].min(diagonal(dist[aai]));
                    }
                }
                if let Some((ai, ax, az)) = chf.neighbour(i, x, z, 3) {
                    dist[i] = dist[i].min(straight(dist[ai]));
                    if let Some((aai, _, _)) = chf.neighbour(ai, ax, az, 2) {
                        dist[i] = dist[i].min(diagonal(dist[aai]));
                    }
                }
            }
        }
    }

    // Pass 2: (1,0), (1,1), (0,1), (-1,1)
    for z in (0..h).rev() {
        for x in (0..w).rev() {
            for i in chf.cell_spans(x, z) {
                if let Some((ai, ax, az)) = chf.neighbour(i, x, z, 2) {
                    dist[i] = dist[i].min(straight(dist[ai]));
                    if let Some((aai, _, _)) = chf.neighbour(ai, ax, az, 1) {
                        dist[i] = dist[i].min(diagonal(dist[aai]));
                    }
                }
                if let Some((ai, ax, az)) = chf.neighbour(i, x, z, 1) {
                    dist[i] = dist[i].min(straight(dist[ai]));
                    if let Some((aai, _, _)) = chf.neighbour(ai, ax, az, 0) {
                        dist[i] = dist[i].min(diagonal(dist[aai]));
                    }
                }
            }
        }
    }
}

/// Marks every walkable span whose floor lies inside `bounds` with `area_id`.
///
/// Returns the number of spans changed.
pub fn mark_box_area(chf: &mut CompactHeightfield, bounds: &Aabb, area_id: u8) -> usize {
    let w = chf.width;
    let h = chf.height;

    let min_x = ((bounds.min.x - chf.bmin.x) / chf.cs).floor() as i32;
    let min_y = ((bounds.min.y - chf.bmin.y) / chf.ch).floor() as i32;
    let min_z = ((bounds.min.z - chf.bmin.z) / chf.cs).floor() as i32;
    let max_x = ((bounds.max.x - chf.bmin.x) / chf.cs).floor() as i32;
    let max_y = ((bounds.max.y - chf.bmin.y) / chf.ch).ceil() as i32;
    let max_z = ((bounds.max.z - chf.bmin.z) / chf.cs).floor() as i32;

    if max_x < 0 || min_x >= w || max_z < 0 || min_z >= h {
        return 0;
    }

    let mut marked = 0;
    for z in min_z.max(0)..=max_z.min(h - 1) {
        for x in min_x.max(0)..=max_x.min(w - 1) {
            for i in chf.cell_spans(x, z) {
                let y = chf.spans[i].y as i32;
                if y < min_y || y > max_y || chf.areas[i] == NULL_AREA {
                    continue;
                }
                chf.areas[i] = area_id;
                marked += 1;
            }
        }
    }
    marked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::WALKABLE_AREA;
    use glam::Vec3;

    fn flat_chf(size: i32) -> CompactHeightfield {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::ZERO,
            Vec3::new(size as f32, 5.0, size as f32),
            1.0,
            0.5,
        )
        .unwrap();
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1);
            }
        }
        CompactHeightfield::build(4, 2, &hf)
    }

    fn walkable(chf: &CompactHeightfield, x: i32, z: i32) -> bool {
        chf.areas[chf.cell(x, z).index as usize] != NULL_AREA
    }

    #[test]
    fn test_erosion_shrinks_from_edges() {
        let mut chf = flat_chf(10);
        erode_walkable_area(&mut chf, 2);
        assert!(!walkable(&chf, 0, 5));
        assert!(!walkable(&chf, 1, 5));
        assert!(walkable(&chf, 2, 5));
        assert!(walkable(&chf, 5, 5));
        assert!(!walkable(&chf, 9, 9));
    }

    #[test]
    fn test_zero_radius_keeps_everything() {
        let mut chf = flat_chf(4);
        erode_walkable_area(&mut chf, 0);
        assert!(chf.areas.iter().all(|&a| a == WALKABLE_AREA));
    }

    #[test]
    fn test_mark_box_area() {
        let mut chf = flat_chf(10);
        let bounds = Aabb::new(Vec3::new(2.0, 0.0, 2.0), Vec3::new(4.5, 2.0, 4.5));
        let marked = mark_box_area(&mut chf, &bounds, NULL_AREA);
        assert_eq!(marked, 9);
        assert!(!walkable(&chf, 3, 3));
        assert!(walkable(&chf, 5, 5));
    }

    #[test]
    fn test_mark_box_area_respects_height() {
        let mut chf = flat_chf(4);
        let bounds = Aabb::new(Vec3::new(0.0, 3.0, 0.0), Vec3::new(4.0, 5.0, 4.0));
        assert_eq!(mark_box_area(&mut chf, &bounds, NULL_AREA), 0);

        let outside = Aabb::new(Vec3::new(10.0, 0.0, 10.0), Vec3::new(12.0, 5.0, 12.0));
        assert_eq!(mark_box_area(&mut chf, &outside, NULL_AREA), 0);
    }
}
