//! Watershed region partitioning
//!
//! Regions are seeded at the maxima of the distance field and grown level by
//! level towards the area boundaries. Afterwards, isolated groups of tiny
//! regions are removed and small regions are merged into the neighbour they
//! share the longest border with.

use std::collections::BTreeMap;

use log::debug;
use tilenav_common::{Error, Result};

use crate::compact_heightfield::{CompactHeightfield, BORDER_REG};
use crate::NULL_AREA;

/// Expansion rounds per distance level before new seeds are flooded
const EXPAND_ITERS: usize = 8;

/// A span waiting for a region: (x, z, span index)
type Entry = (i32, i32, usize);

#[derive(Debug, Default, Clone)]
struct Region {
    span_count: usize,
    area: u8,
    connects_to_border: bool,
    /// Neighbouring region id -> number of shared span edges
    neighbours: BTreeMap<u16, usize>,
}

/// Partitions the walkable spans of `chf` into regions.
///
/// Requires the distance field. `border_size` cells around the field are
/// painted as border regions so tiles split cleanly at their edges.
pub fn build_regions(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let n = chf.span_count();

    let mut src_reg = vec![0u16; n];
    let mut src_dist = vec![0u16; n];
    let mut region_id: u16 = 1;

    if border_size > 0 {
        let bw = border_size.min(w);
        let bh = border_size.min(h);
        for (x0, x1, z0, z1) in [(0, bw, 0, h), (w - bw, w, 0, h), (0, w, 0, bh), (0, w, h - bh, h)] {
            paint_rect_region(chf, x0, x1, z0, z1, region_id | BORDER_REG, &mut src_reg);
            region_id += 1;
        }
    }
    chf.border_size = border_size;

    let mut level = (chf.max_distance.saturating_add(1)) & !1;
    while level > 0 {
        level = level.saturating_sub(2);

        let mut stack = collect_unassigned(chf, &src_reg, level);
        expand_regions(chf, EXPAND_ITERS, level, &mut src_reg, &mut src_dist, &mut stack);

        for &(x, z, i) in &stack {
            if src_reg[i] != 0 {
                continue;
            }
            if flood_region(chf, x, z, i, level, region_id, &mut src_reg, &mut src_dist) {
                region_id = region_id
                    .checked_add(1)
                    .filter(|id| id & BORDER_REG == 0)
                    .ok_or_else(|| Error::NavMeshGeneration("Region id overflow".to_string()))?;
            }
        }
    }

    // Spans cut off from every seed still get the closest region
    let mut stack = collect_unassigned(chf, &src_reg, 0);
    expand_regions(chf, EXPAND_ITERS, 0, &mut src_reg, &mut src_dist, &mut stack);

    let max_regions = merge_and_filter_regions(
        chf,
        min_region_area.max(0) as usize,
        merge_region_area.max(0) as usize,
        region_id,
        &mut src_reg,
    );

    for (span, reg) in chf.spans.iter_mut().zip(&src_reg) {
        span.reg = *reg;
    }
    chf.max_regions = max_regions;

    debug!("Watershed produced {} regions", max_regions.saturating_sub(1));
    Ok(())
}

fn paint_rect_region(
    chf: &CompactHeightfield,
    x0: i32,
    x1: i32,
    z0: i32,
    z1: i32,
    reg: u16,
    src_reg: &mut [u16],
) {
    for z in z0..z1 {
        for x in x0..x1 {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] != NULL_AREA {
                    src_reg[i] = reg;
                }
            }
        }
    }
}

fn collect_unassigned(chf: &CompactHeightfield, src_reg: &[u16], level: u16) -> Vec<Entry> {
    let mut stack = Vec::new();
    for z in 0..chf.height {
        for x in 0..chf.width {
            for i in chf.cell_spans(x, z) {
                if chf.areas[i] != NULL_AREA && src_reg[i] == 0 && chf.dist[i] >= level {
                    stack.push((x, z, i));
                }
            }
        }
    }
    stack
}

/// Grows existing regions into the spans of `stack`. A span joins the
/// neighbouring region it is closest to; equal distances go to the lower id.
fn expand_regions(
    chf: &CompactHeightfield,
    max_iter: usize,
    level: u16,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    stack: &mut Vec<Entry>,
) {
    stack.retain(|&(_, _, i)| src_reg[i] == 0);

    let mut iter = 0;
    loop {
        let mut dirty = Vec::new();
        for &(x, z, i) in stack.iter() {
            let area = chf.areas[i];
            let mut r = 0u16;
            let mut d2 = u16::MAX;
            for dir in 0..4 {
                let Some((ai, _, _)) = chf.neighbour(i, x, z, dir) else {
                    continue;
                };
                if chf.areas[ai] != area {
                    continue;
                }
                let nr = src_reg[ai];
                if nr == 0 || nr & BORDER_REG != 0 {
                    continue;
                }
                let nd = src_dist[ai].saturating_add(2);
                if nd < d2 || (nd == d2 && nr < r) {
                    r = nr;
                    d2 = nd;
                }
            }
            if r != 0 {
                dirty.push((i, r, d2));
            }
        }

        if dirty.is_empty() {
            break;
        }
        for (i, r, d) in dirty {
            src_reg[i] = r;
            src_dist[i] = d;
        }
        stack.retain(|&(_, _, i)| src_reg[i] == 0);

        if level > 0 {
            iter += 1;
            if iter >= max_iter {
                break;
            }
        }
    }
}

/// Flood fills a new region from span `i` over spans at or above `level - 2`.
/// Stops at spans that touch another region. Returns whether anything was claimed.
#[allow(clippy::too_many_arguments)]
fn flood_region(
    chf: &CompactHeightfield,
    x: i32,
    z: i32,
    i: usize,
    level: u16,
    r: u16,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
) -> bool {
    let area = chf.areas[i];
    let lev = level.saturating_sub(2);
    let mut stack = vec![(x, z, i)];
    src_reg[i] = r;
    src_dist[i] = 0;
    let mut count = 0usize;

    while let Some((cx, cz, ci)) = stack.pop() {
        // Check if any 8-neighbour already belongs to another region
        let mut ar = 0u16;
        for dir in 0..4 {
            let Some((ai, ax, az)) = chf.neighbour(ci, cx, cz, dir) else {
                continue;
            };
            if chf.areas[ai] != area {
                continue;
            }
            let nr = src_reg[ai];
            if nr & BORDER_REG != 0 {
                continue;
            }
            if nr != 0 && nr != r {
                ar = nr;
                break;
            }

            let dir2 = (dir + 1) & 0x3;
            if let Some((a2, _, _)) = chf.neighbour(ai, ax, az, dir2) {
                if chf.areas[a2] != area {
                    continue;
                }
                let nr2 = src_reg[a2];
                if nr2 != 0 && nr2 != r {
                    ar = nr2;
                    break;
                }
            }
        }
        if ar != 0 {
            src_reg[ci] = 0;
            continue;
        }
        count += 1;

        for dir in 0..4 {
            let Some((ai, ax, az)) = chf.neighbour(ci, cx, cz, dir) else {
                continue;
            };
            if chf.areas[ai] != area {
                continue;
            }
            if chf.dist[ai] >= lev && src_reg[ai] == 0 {
                src_reg[ai] = r;
                src_dist[ai] = 0;
                stack.push((ax, az, ai));
            }
        }
    }

    count > 0
}

/// Removes small isolated region groups, merges small regions into their
/// best neighbour and compacts the ids. Returns one past the highest id.
///
/// Regions touching the border region are never removed for being small:
/// they may continue in the neighbouring tile, where the rest of their area
/// lives.
fn merge_and_filter_regions(
    chf: &CompactHeightfield,
    min_region_area: usize,
    merge_region_area: usize,
    region_id_end: u16,
    src_reg: &mut [u16],
) -> u16 {
    let nreg = region_id_end as usize;
    let mut regions = vec![Region::default(); nreg];

    for z in 0..chf.height {
        for x in 0..chf.width {
            for i in chf.cell_spans(x, z) {
                let r = src_reg[i];
                if r == 0 || r & BORDER_REG != 0 || r as usize >= nreg {
                    continue;
                }
                regions[r as usize].span_count += 1;
                regions[r as usize].area = chf.areas[i];
                for dir in 0..4 {
                    let Some((ai, _, _)) = chf.neighbour(i, x, z, dir) else {
                        continue;
                    };
                    let nr = src_reg[ai];
                    if nr & BORDER_REG != 0 {
                        regions[r as usize].connects_to_border = true;
                    } else if nr != 0 && nr != r {
                        *regions[r as usize].neighbours.entry(nr).or_insert(0) += 1;
                    }
                }
            }
        }
    }

    // Remove connected groups of regions that are too small in total
    let mut visited = vec![false; nreg];
    let mut removed = 0usize;
    for id in 1..nreg {
        if visited[id] || regions[id].span_count == 0 {
            continue;
        }
        visited[id] = true;
        let mut component = Vec::new();
        let mut stack = vec![id];
        let mut total = 0usize;
        let mut touches_border = false;
        while let Some(r) = stack.pop() {
            component.push(r);
            total += regions[r].span_count;
            touches_border |= regions[r].connects_to_border;
            for &nb in regions[r].neighbours.keys() {
                let nb = nb as usize;
                if nb < nreg && !visited[nb] {
                    visited[nb] = true;
                    stack.push(nb);
                }
            }
        }
        if total < min_region_area && !touches_border {
            for r in component {
                remove_region(&mut regions, r);
                removed += 1;
            }
        }
    }

    // Merge small regions into the neighbour with the longest shared border
    let mut redirect: Vec<u16> = (0..nreg as u16).collect();
    loop {
        let mut changed = false;
        for id in 1..nreg {
            let reg = &regions[id];
            if reg.span_count == 0 || reg.span_count >= merge_region_area {
                continue;
            }

            let best = reg
                .neighbours
                .iter()
                .filter(|(&nb, _)| {
                    let nb = nb as usize;
                    nb < nreg && regions[nb].span_count > 0 && regions[nb].area == reg.area
                })
                .max_by(|(a_id, a_len), (b_id, b_len)| a_len.cmp(b_len).then(b_id.cmp(a_id)))
                .map(|(&nb, _)| nb as usize);

            let connects_to_border = reg.connects_to_border;

            match best {
                Some(target) => {
                    merge_regions(&mut regions, id, target);
                    redirect[id] = target as u16;
                    changed = true;
                }
                None if !connects_to_border => {
                    remove_region(&mut regions, id);
                    redirect[id] = 0;
                    removed += 1;
                    changed = true;
                }
                None => {}
            }
        }
        if !changed {
            break;
        }
    }

    // Compact ids, following merge chains
    let mut remap = vec![0u16; nreg];
    let mut next_id: u16 = 1;
    for (id, reg) in regions.iter().enumerate().skip(1) {
        if reg.span_count > 0 {
            remap[id] = next_id;
            next_id += 1;
        }
    }
    let resolve = |mut id: usize| {
        while id != 0 && redirect[id] as usize != id {
            id = redirect[id] as usize;
        }
        remap[id]
    };

    for r in src_reg.iter_mut() {
        if *r == 0 || *r & BORDER_REG != 0 || *r as usize >= nreg {
            continue;
        }
        *r = resolve(*r as usize);
    }

    if removed > 0 {
        debug!("Removed {} undersized regions", removed);
    }
    next_id
}

fn remove_region(regions: &mut [Region], id: usize) {
    let neighbours: Vec<u16> = regions[id].neighbours.keys().copied().collect();
    for nb in neighbours {
        if let Some(other) = regions.get_mut(nb as usize) {
            other.neighbours.remove(&(id as u16));
        }
    }
    regions[id] = Region::default();
}

fn merge_regions(regions: &mut [Region], from: usize, into: usize) {
    let source = std::mem::take(&mut regions[from]);
    for (&nb, &len) in &source.neighbours {
        let nb = nb as usize;
        if nb == into {
            continue;
        }
        *regions[into].neighbours.entry(nb as u16).or_insert(0) += len;
        if let Some(other) = regions.get_mut(nb) {
            if let Some(l) = other.neighbours.remove(&(from as u16)) {
                *other.neighbours.entry(into as u16).or_insert(0) += l;
            }
        }
    }
    let target = &mut regions[into];
    target.neighbours.remove(&(from as u16));
    target.span_count += source.span_count;
    target.connects_to_border |= source.connects_to_border;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance_field::build_distance_field;
    use crate::heightfield::Heightfield;
    use crate::WALKABLE_AREA;
    use glam::Vec3;

    /// Builds a field from a character map: '#' walkable, '.' empty
    fn chf_from_map(rows: &[&str]) -> CompactHeightfield {
        let h = rows.len() as i32;
        let w = rows[0].len() as i32;
        let mut hf = Heightfield::new(w, h, Vec3::ZERO, Vec3::new(w as f32, 5.0, h as f32), 1.0, 0.5).unwrap();
        for (z, row) in rows.iter().enumerate() {
            for (x, c) in row.chars().enumerate() {
                if c == '#' {
                    hf.add_span(x as i32, z as i32, 0, 2, WALKABLE_AREA, 1);
                }
            }
        }
        let mut chf = CompactHeightfield::build(4, 2, &hf);
        build_distance_field(&mut chf);
        chf
    }

    fn region_at(chf: &CompactHeightfield, x: i32, z: i32) -> u16 {
        let cell = chf.cell(x, z);
        if cell.count == 0 {
            return 0;
        }
        chf.spans[cell.index as usize].reg
    }

    #[test]
    fn test_square_is_one_region() {
        let rows = vec!["##########"; 10];
        let mut chf = chf_from_map(&rows);
        build_regions(&mut chf, 0, 4, 20).unwrap();
        assert_eq!(chf.max_regions, 2);
        assert!(chf.spans.iter().all(|s| s.reg == 1));
    }

    #[test]
    fn test_disconnected_areas_get_distinct_regions() {
        let rows = vec!["######....######"; 8];
        let mut chf = chf_from_map(&rows);
        build_regions(&mut chf, 0, 4, 0).unwrap();
        let left = region_at(&chf, 0, 0);
        let right = region_at(&chf, 15, 0);
        assert_ne!(left, 0);
        assert_ne!(right, 0);
        assert_ne!(left, right);
    }

    #[test]
    fn test_tiny_island_is_removed() {
        let rows = vec![
            "########....",
            "########....",
            "########....",
            "########..#.",
            "########....",
        ];
        let mut chf = chf_from_map(&rows);
        build_regions(&mut chf, 0, 4, 0).unwrap();
        assert_eq!(region_at(&chf, 10, 3), 0);
        assert_ne!(region_at(&chf, 2, 2), 0);
    }

    #[test]
    fn test_small_region_without_neighbours_is_dropped() {
        let rows = vec![
            "##########......",
            "##########..###.",
            "##########..###.",
            "##########......",
        ];
        let mut chf = chf_from_map(&rows);
        build_regions(&mut chf, 0, 4, 8).unwrap();
        // Six cells pass the island filter but cannot merge anywhere
        assert_eq!(region_at(&chf, 13, 1), 0);
        assert_ne!(region_at(&chf, 3, 1), 0);
    }

    #[test]
    fn test_small_region_at_tile_edge_survives() {
        let rows = vec![
            "................",
            "................",
            "###.............",
            "###.....##......",
            "###.....##......",
            "###.....##......",
            "................",
            "................",
        ];
        let mut chf = chf_from_map(&rows);
        build_regions(&mut chf, 2, 8, 20).unwrap();

        // Four cells inside the tile, continuing into the border
        for z in 2..6 {
            let reg = region_at(&chf, 2, z);
            assert_ne!(reg, 0);
            assert_eq!(reg & BORDER_REG, 0);
        }
        // Six interior cells with no way out of the tile
        for z in 3..6 {
            assert_eq!(region_at(&chf, 8, z), 0);
            assert_eq!(region_at(&chf, 9, z), 0);
        }
    }

    #[test]
    fn test_border_regions_are_flagged() {
        let rows = vec!["############"; 12];
        let mut chf = chf_from_map(&rows);
        build_regions(&mut chf, 2, 4, 20).unwrap();
        assert_eq!(chf.border_size, 2);
        assert_ne!(region_at(&chf, 0, 5) & BORDER_REG, 0);
        assert_ne!(region_at(&chf, 11, 5) & BORDER_REG, 0);
        let inner = region_at(&chf, 5, 5);
        assert_ne!(inner, 0);
        assert_eq!(inner & BORDER_REG, 0);
    }

    #[test]
    fn test_partition_is_deterministic() {
        let rows = vec![
            "################",
            "################",
            "####....########",
            "####....########",
            "################",
            "################",
            "##########....##",
            "################",
        ];
        let mut a = chf_from_map(&rows);
        let mut b = chf_from_map(&rows);
        build_regions(&mut a, 0, 2, 6).unwrap();
        build_regions(&mut b, 0, 2, 6).unwrap();
        let regs_a: Vec<u16> = a.spans.iter().map(|s| s.reg).collect();
        let regs_b: Vec<u16> = b.spans.iter().map(|s| s.reg).collect();
        assert_eq!(regs_a, regs_b);
        assert!(regs_a.iter().all(|&r| r != 0));
    }
}
