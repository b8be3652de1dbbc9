//! Contour generation
//!
//! Traces the boundary of every region in the compact heightfield and
//! simplifies it into a polygon outline. Holes (regions surrounding an
//! obstacle) are stitched into the outline of their region so that every
//! region ends up with exactly one simple polygon.

use glam::Vec3;
use log::{debug, warn};
use tilenav_common::Result;

use crate::compact_heightfield::{CompactHeightfield, BORDER_REG};
use crate::polygon::{in_cone, intersect, same_xz, signed_area2, GridVert};

/// Mask extracting the neighbour region from a contour vertex flag word
pub const CONTOUR_REG_MASK: i32 = 0xffff;

/// Set on contour vertices whose following edge separates two areas
pub const AREA_BORDER: i32 = 0x20000;

/// Upper bound on walk steps for a single contour
const MAX_WALK_STEPS: usize = 40_000;

/// Simplified outline of one region
#[derive(Debug, Clone)]
pub struct Contour {
    /// Simplified vertices `[x, y, z, flags]` in tile cell units
    pub verts: Vec<[i32; 4]>,
    /// Every boundary corner traced before simplification
    pub raw_verts: Vec<[i32; 4]>,
    pub reg: u16,
    pub area: u8,
}

/// All region contours of one tile
#[derive(Debug, Clone)]
pub struct ContourSet {
    pub contours: Vec<Contour>,
    /// Bounds with the border removed
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    /// Tile size in cells, border excluded
    pub width: i32,
    pub height: i32,
    pub border_size: i32,
    pub max_error: f32,
}

impl ContourSet {
    /// Traces and simplifies the contour of every region in `chf`.
    ///
    /// `max_error` is the maximum distance (in cells) a simplified edge may
    /// deviate from the traced boundary; wall edges longer than
    /// `max_edge_len` cells are split (0 disables splitting).
    pub fn build(chf: &CompactHeightfield, max_error: f32, max_edge_len: i32) -> Result<Self> {
        let w = chf.width;
        let h = chf.height;
        let border = chf.border_size;

        let mut bmin = chf.bmin;
        let mut bmax = chf.bmax;
        if border > 0 {
            let pad = border as f32 * chf.cs;
            bmin.x += pad;
            bmin.z += pad;
            bmax.x -= pad;
            bmax.z -= pad;
        }

        // One bit per direction whose edge lies on a region boundary
        let mut flags = vec![0u8; chf.span_count()];
        for z in 0..h {
            for x in 0..w {
                for i in chf.cell_spans(x, z) {
                    let reg = chf.spans[i].reg;
                    if reg == 0 || reg & BORDER_REG != 0 {
                        continue;
                    }
                    let mut same = 0u8;
                    for dir in 0..4 {
                        let r = chf.neighbour(i, x, z, dir).map_or(0, |(ni, _, _)| chf.spans[ni].reg);
                        if r == reg {
                            same |= 1 << dir;
                        }
                    }
                    flags[i] = same ^ 0xf;
                }
            }
        }

        let mut contours = Vec::new();
        for z in 0..h {
            for x in 0..w {
                for i in chf.cell_spans(x, z) {
                    if flags[i] == 0 || flags[i] == 0xf {
                        flags[i] = 0;
                        continue;
                    }
                    let reg = chf.spans[i].reg;
                    if reg == 0 || reg & BORDER_REG != 0 {
                        continue;
                    }

                    let mut raw = walk_contour(x, z, i, chf, &mut flags);
                    let mut verts = simplify_contour(&raw, max_error, max_edge_len);
                    remove_degenerate_segments(&mut verts);

                    if verts.len() < 3 {
                        continue;
                    }
                    if border > 0 {
                        for v in verts.iter_mut().chain(raw.iter_mut()) {
                            v[0] -= border;
                            v[2] -= border;
                        }
                    }
                    contours.push(Contour {
                        verts,
                        raw_verts: raw,
                        reg,
                        area: chf.areas[i],
                    });
                }
            }
        }

        merge_holes(&mut contours);
        debug!("Built {} contours", contours.len());

        Ok(Self {
            contours,
            bmin,
            bmax,
            cs: chf.cs,
            ch: chf.ch,
            width: w - border * 2,
            height: h - border * 2,
            border_size: border,
            max_error,
        })
    }
}

/// Height of the corner between span `i` and its neighbours in `dir` and
/// `dir + 1`: the highest floor among the spans sharing it.
fn corner_height(x: i32, z: i32, i: usize, dir: usize, chf: &CompactHeightfield) -> i32 {
    let dirp = (dir + 1) & 0x3;
    let mut ch = chf.spans[i].y as i32;

    if let Some((ai, ax, az)) = chf.neighbour(i, x, z, dir) {
        ch = ch.max(chf.spans[ai].y as i32);
        if let Some((ai2, _, _)) = chf.neighbour(ai, ax, az, dirp) {
            ch = ch.max(chf.spans[ai2].y as i32);
        }
    }
    if let Some((ai, ax, az)) = chf.neighbour(i, x, z, dirp) {
        ch = ch.max(chf.spans[ai].y as i32);
        if let Some((ai2, _, _)) = chf.neighbour(ai, ax, az, dir) {
            ch = ch.max(chf.spans[ai2].y as i32);
        }
    }
    ch
}

/// Follows the region boundary starting at span `i`, clockwise around the
/// region interior, and records one vertex per boundary edge.
fn walk_contour(
    mut x: i32,
    mut z: i32,
    mut i: usize,
    chf: &CompactHeightfield,
    flags: &mut [u8],
) -> Vec<[i32; 4]> {
    let mut points = Vec::new();

    let mut dir = 0usize;
    while flags[i] & (1 << dir) == 0 {
        dir += 1;
    }
    let start_dir = dir;
    let start_i = i;
    let area = chf.areas[i];

    for _ in 0..MAX_WALK_STEPS {
        if flags[i] & (1 << dir) != 0 {
            let y = corner_height(x, z, i, dir, chf);
            let (px, pz) = match dir {
                0 => (x, z + 1),
                1 => (x + 1, z + 1),
                2 => (x + 1, z),
                _ => (x, z),
            };
            let mut r = 0i32;
            if let Some((ai, _, _)) = chf.neighbour(i, x, z, dir) {
                r = chf.spans[ai].reg as i32;
                if chf.areas[ai] != area {
                    r |= AREA_BORDER;
                }
            }
            points.push([px, y, pz, r]);

            flags[i] &= !(1 << dir);
            dir = (dir + 1) & 0x3;
        } else {
            let Some((ni, nx, nz)) = chf.neighbour(i, x, z, dir) else {
                // Boundary bits say the neighbour is in this region
                warn!("Contour walk lost its neighbour at ({}, {})", x, z);
                return points;
            };
            x = nx;
            z = nz;
            i = ni;
            dir = (dir + 3) & 0x3;
        }

        if i == start_i && dir == start_dir {
            break;
        }
    }
    points
}

/// Squared distance from (x, z) to segment (px, pz)-(qx, qz)
fn distance_pt_seg(x: i32, z: i32, px: i32, pz: i32, qx: i32, qz: i32) -> f32 {
    let pqx = (qx - px) as f32;
    let pqz = (qz - pz) as f32;
    let dx = (x - px) as f32;
    let dz = (z - pz) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = px as f32 + t * pqx - x as f32;
    let dz = pz as f32 + t * pqz - z as f32;
    dx * dx + dz * dz
}

/// Reduces the raw boundary to the vertices needed to stay within
/// `max_error` of it. Portal vertices (where the neighbouring region or
/// area changes) are always kept.
fn simplify_contour(points: &[[i32; 4]], max_error: f32, max_edge_len: i32) -> Vec<[i32; 4]> {
    let pn = points.len();
    if pn == 0 {
        return Vec::new();
    }
    // Working vertices carry the raw point index in slot 3
    let mut simplified: Vec<[i32; 4]> = Vec::new();

    let has_connections = points.iter().any(|p| p[3] & CONTOUR_REG_MASK != 0);
    if has_connections {
        for i in 0..pn {
            let ii = (i + 1) % pn;
            let different_regs = points[i][3] & CONTOUR_REG_MASK != points[ii][3] & CONTOUR_REG_MASK;
            let area_borders = points[i][3] & AREA_BORDER != points[ii][3] & AREA_BORDER;
            if different_regs || area_borders {
                simplified.push([points[i][0], points[i][1], points[i][2], i as i32]);
            }
        }
    }

    if simplified.is_empty() {
        // Seed with the lower-left and upper-right corners
        let mut ll = 0;
        let mut ur = 0;
        for (i, p) in points.iter().enumerate() {
            let (x, z) = (p[0], p[2]);
            if x < points[ll][0] || (x == points[ll][0] && z < points[ll][2]) {
                ll = i;
            }
            if x > points[ur][0] || (x == points[ur][0] && z > points[ur][2]) {
                ur = i;
            }
        }
        simplified.push([points[ll][0], points[ll][1], points[ll][2], ll as i32]);
        simplified.push([points[ur][0], points[ur][1], points[ur][2], ur as i32]);
    }

    // Insert the farthest raw point until every segment is within tolerance
    let max_error_sqr = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();
        let (mut ax, mut az, ai) = (simplified[i][0], simplified[i][2], simplified[i][3] as usize);
        let (mut bx, mut bz, bi) = (simplified[ii][0], simplified[ii][2], simplified[ii][3] as usize);

        // Walk in lexicographic order so shared edges simplify identically from both sides
        let (mut ci, cinc, endi) = if bx > ax || (bx == ax && bz > az) {
            ((ai + 1) % pn, 1, bi)
        } else {
            std::mem::swap(&mut ax, &mut bx);
            std::mem::swap(&mut az, &mut bz);
            ((bi + pn - 1) % pn, pn - 1, ai)
        };

        let mut max_d = 0.0;
        let mut max_i = None;
        // Only wall edges and area borders are tessellated
        if points[ci][3] & CONTOUR_REG_MASK == 0 || points[ci][3] & AREA_BORDER != 0 {
            while ci != endi {
                let d = distance_pt_seg(points[ci][0], points[ci][2], ax, az, bx, bz);
                if d > max_d {
                    max_d = d;
                    max_i = Some(ci);
                }
                ci = (ci + cinc) % pn;
            }
        }

        match max_i {
            Some(mi) if max_d > max_error_sqr => {
                simplified.insert(i + 1, [points[mi][0], points[mi][1], points[mi][2], mi as i32]);
            }
            _ => i += 1,
        }
    }

    // Split long wall edges
    if max_edge_len > 0 {
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();
            let (ax, az, ai) = (simplified[i][0], simplified[i][2], simplified[i][3] as usize);
            let (bx, bz, bi) = (simplified[ii][0], simplified[ii][2], simplified[ii][3] as usize);

            let ci = (ai + 1) % pn;
            let mut split = None;
            if points[ci][3] & CONTOUR_REG_MASK == 0 {
                let dx = bx - ax;
                let dz = bz - az;
                if dx * dx + dz * dz > max_edge_len * max_edge_len {
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        split = Some(if bx > ax || (bx == ax && bz > az) {
                            (ai + n / 2) % pn
                        } else {
                            (ai + (n + 1) / 2) % pn
                        });
                    }
                }
            }

            match split {
                Some(mi) => {
                    simplified.insert(i + 1, [points[mi][0], points[mi][1], points[mi][2], mi as i32]);
                }
                None => i += 1,
            }
        }
    }

    // Flags of a vertex describe the edge leaving it: take them from the next raw point
    for v in simplified.iter_mut() {
        let next = (v[3] as usize + 1) % pn;
        v[3] = points[next][3] & (CONTOUR_REG_MASK | AREA_BORDER);
    }
    simplified
}

/// Drops zero-length segments left behind by simplification
fn remove_degenerate_segments(verts: &mut Vec<[i32; 4]>) {
    let mut i = 0;
    while i < verts.len() && verts.len() > 1 {
        let ni = (i + 1) % verts.len();
        if same_xz(&verts[i], &verts[ni]) {
            verts.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Whether segment `d0`-`d1` crosses any edge of `verts` other than the
/// edges incident to vertex `skip`
fn intersect_seg_contour(d0: &GridVert, d1: &GridVert, skip: Option<usize>, verts: &[GridVert]) -> bool {
    let n = verts.len();
    for k in 0..n {
        let k1 = (k + 1) % n;
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p0 = &verts[k];
        let p1 = &verts[k1];
        if same_xz(d0, p0) || same_xz(d1, p0) || same_xz(d0, p1) || same_xz(d1, p1) {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

fn leftmost_vertex(verts: &[GridVert]) -> (i32, i32, usize) {
    let mut best = (verts[0][0], verts[0][2], 0);
    for (i, v) in verts.iter().enumerate().skip(1) {
        if v[0] < best.0 || (v[0] == best.0 && v[2] < best.1) {
            best = (v[0], v[2], i);
        }
    }
    best
}

/// Splices every hole contour into the outline of its region through the
/// shortest diagonal that crosses nothing.
fn merge_holes(contours: &mut Vec<Contour>) {
    let mut outlines: std::collections::BTreeMap<u16, usize> = Default::default();
    let mut holes: std::collections::BTreeMap<u16, Vec<usize>> = Default::default();
    for (ci, c) in contours.iter().enumerate() {
        if signed_area2(&c.verts) < 0 {
            holes.entry(c.reg).or_default().push(ci);
        } else if outlines.insert(c.reg, ci).is_some() {
            warn!("Region {} has more than one outline", c.reg);
        }
    }
    if holes.is_empty() {
        return;
    }

    let mut merged = vec![false; contours.len()];
    for (reg, mut hole_ids) in holes {
        let Some(&outline_id) = outlines.get(&reg) else {
            warn!("Region {} has holes but no outline", reg);
            continue;
        };

        // Left to right
        hole_ids.sort_by_key(|&h| {
            let (x, z, _) = leftmost_vertex(&contours[h].verts);
            (x, z)
        });

        for (hi, &hole_id) in hole_ids.iter().enumerate() {
            let hole = contours[hole_id].verts.clone();
            let outline = &contours[outline_id].verts;
            let mut corner_index = leftmost_vertex(&hole).2;
            let mut found = None;

            for _ in 0..hole.len() {
                let corner = hole[corner_index];
                let n = outline.len();
                let mut diags: Vec<(usize, i32)> = (0..n)
                    .filter(|&j| in_cone(&outline[(j + n - 1) % n], &outline[j], &outline[(j + 1) % n], &corner))
                    .map(|j| {
                        let dx = outline[j][0] - corner[0];
                        let dz = outline[j][2] - corner[2];
                        (j, dx * dx + dz * dz)
                    })
                    .collect();
                diags.sort_by_key(|&(j, d)| (d, j));

                for &(j, _) in &diags {
                    let pt = outline[j];
                    let mut crosses = intersect_seg_contour(&pt, &corner, Some(j), outline);
                    for &other in &hole_ids[hi..] {
                        if crosses {
                            break;
                        }
                        crosses |= intersect_seg_contour(&pt, &corner, None, &contours[other].verts);
                    }
                    if !crosses {
                        found = Some(j);
                        break;
                    }
                }
                if found.is_some() {
                    break;
                }
                corner_index = (corner_index + 1) % hole.len();
            }

            let Some(outline_index) = found else {
                warn!("Failed to find a merge point for a hole in region {}", reg);
                continue;
            };

            let outline = &contours[outline_id].verts;
            let na = outline.len();
            let nb = hole.len();
            let mut spliced = Vec::with_capacity(na + nb + 2);
            for k in 0..=na {
                spliced.push(outline[(outline_index + k) % na]);
            }
            for k in 0..=nb {
                spliced.push(hole[(corner_index + k) % nb]);
            }
            contours[outline_id].verts = spliced;
            merged[hole_id] = true;
        }
    }

    let mut idx = 0;
    contours.retain(|_| {
        let keep = !merged[idx];
        idx += 1;
        keep
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance_field::build_distance_field;
    use crate::heightfield::Heightfield;
    use crate::watershed::build_regions;
    use crate::WALKABLE_AREA;

    fn partitioned(map: &[&str]) -> CompactHeightfield {
        let h = map.len() as i32;
        let w = map[0].len() as i32;
        let mut hf = Heightfield::new(w, h, Vec3::ZERO, Vec3::new(w as f32, 5.0, h as f32), 1.0, 0.5).unwrap();
        for (z, row) in map.iter().enumerate() {
            for (x, c) in row.bytes().enumerate() {
                if c == b'#' {
                    hf.add_span(x as i32, z as i32, 0, 2, WALKABLE_AREA, 1);
                }
            }
        }
        let mut chf = CompactHeightfield::build(4, 2, &hf);
        build_distance_field(&mut chf);
        build_regions(&mut chf, 0, 0, 0).unwrap();
        chf
    }

    #[test]
    fn test_square_contour_is_simplified_to_corners() {
        let chf = partitioned(&["####", "####", "####", "####"]);
        let cset = ContourSet::build(&chf, 1.3, 0).unwrap();
        assert_eq!(cset.contours.len(), 1);

        let c = &cset.contours[0];
        assert_eq!(c.raw_verts.len(), 16);
        let mut corners: Vec<(i32, i32)> = c.verts.iter().map(|v| (v[0], v[2])).collect();
        corners.sort();
        assert_eq!(corners, vec![(0, 0), (0, 4), (4, 0), (4, 4)]);
        assert!(signed_area2(&c.verts) > 0);
        assert!(c.verts.iter().all(|v| v[1] == 2));
    }

    #[test]
    fn test_long_edges_are_split() {
        let chf = partitioned(&["##########"; 4]);
        let cset = ContourSet::build(&chf, 1.3, 4).unwrap();
        let c = &cset.contours[0];
        for k in 0..c.verts.len() {
            let a = c.verts[k];
            let b = c.verts[(k + 1) % c.verts.len()];
            let dx = b[0] - a[0];
            let dz = b[2] - a[2];
            assert!(dx * dx + dz * dz <= 16, "edge {:?} -> {:?}", a, b);
        }
    }

    #[test]
    fn test_hole_is_merged_into_outline() {
        let chf = partitioned(&[
            "#######",
            "#######",
            "##...##",
            "##...##",
            "##...##",
            "#######",
            "#######",
        ]);
        let cset = ContourSet::build(&chf, 1.3, 0).unwrap();
        // Every region ends up with a single contour
        let mut regs: Vec<u16> = cset.contours.iter().map(|c| c.reg).collect();
        regs.dedup();
        assert_eq!(regs.len(), cset.contours.len());
        assert!(cset.contours.iter().all(|c| signed_area2(&c.verts) > 0));
    }

    #[test]
    fn test_border_is_subtracted() {
        let map = ["########"; 8];
        let h = map.len() as i32;
        let w = map[0].len() as i32;
        let mut hf = Heightfield::new(w, h, Vec3::ZERO, Vec3::new(w as f32, 5.0, h as f32), 1.0, 0.5).unwrap();
        for z in 0..h {
            for x in 0..w {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1);
            }
        }
        let mut chf = CompactHeightfield::build(4, 2, &hf);
        build_distance_field(&mut chf);
        build_regions(&mut chf, 2, 0, 0).unwrap();

        let cset = ContourSet::build(&chf, 1.3, 0).unwrap();
        assert_eq!(cset.width, 4);
        assert_eq!(cset.bmin.x, 2.0);
        for c in &cset.contours {
            for v in &c.verts {
                assert!((0..=4).contains(&v[0]) && (0..=4).contains(&v[2]));
            }
        }
    }
}
