//! Compact heightfield representation
//!
//! The compact heightfield keeps only the open space above walkable spans and
//! stores, for every span, which span it connects to in each of the four
//! cardinal neighbour cells.

use glam::Vec3;
use log::warn;

use crate::heightfield::{Heightfield, DIR_OFFSET_X, DIR_OFFSET_Z, SPAN_MAX_HEIGHT};
use crate::NULL_AREA;

/// Marker for a missing neighbour connection
pub const NOT_CONNECTED: u8 = 0x3f;

/// Region flag for spans inside the tile border
pub const BORDER_REG: u16 = 0x8000;

/// A compact cell in the heightfield
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCell {
    /// Index of the first span in the cell
    pub index: u32,
    /// Number of spans in the cell
    pub count: u32,
}

/// Open space above a walkable surface
#[derive(Debug, Clone, Copy)]
pub struct CompactSpan {
    /// Floor height in cell-height units
    pub y: u16,
    /// Clearance above the floor
    pub h: u16,
    /// Region ID (0 = not in region)
    pub reg: u16,
    /// Neighbour offsets within the neighbour cell, one per direction
    con: [u8; 4],
}

impl CompactSpan {
    #[inline]
    pub fn con(&self, dir: usize) -> Option<usize> {
        let c = self.con[dir];
        (c != NOT_CONNECTED).then_some(c as usize)
    }
}

/// Compact heightfield with per-span connectivity, area and region data
#[derive(Debug, Clone)]
pub struct CompactHeightfield {
    pub width: i32,
    pub height: i32,
    pub border_size: i32,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub cells: Vec<CompactCell>,
    pub spans: Vec<CompactSpan>,
    /// Area id per span
    pub areas: Vec<u8>,
    /// Distance to the nearest boundary per span, filled by the distance field pass
    pub dist: Vec<u16>,
    pub max_distance: u16,
    /// One past the highest region id in use
    pub max_regions: u16,
}

impl CompactHeightfield {
    /// Builds a compact heightfield from the walkable spans of `hf`
    pub fn build(walkable_height: i32, walkable_climb: i32, hf: &Heightfield) -> Self {
        let w = hf.width;
        let h = hf.height;
        let mut cells = vec![CompactCell::default(); (w * h).max(0) as usize];
        let mut spans = Vec::with_capacity(hf.walkable_span_count());
        let mut areas = Vec::with_capacity(spans.capacity());

        let mut bmax = hf.bmax;
        bmax.y += walkable_height as f32 * hf.ch;

        for z in 0..h {
            for x in 0..w {
                let column = hf.column(x, z);
                let cell = &mut cells[(x + z * w) as usize];
                cell.index = spans.len() as u32;
                for (si, s) in column.iter().enumerate() {
                    if s.area == NULL_AREA {
                        continue;
                    }
                    let bot = s.smax;
                    let top = column.get(si + 1).map_or(SPAN_MAX_HEIGHT, |n| n.smin);
                    spans.push(CompactSpan {
                        y: bot,
                        h: top.saturating_sub(bot),
                        reg: 0,
                        con: [NOT_CONNECTED; 4],
                    });
                    areas.push(s.area);
                }
                cell.count = spans.len() as u32 - cell.index;
            }
        }

        let mut chf = Self {
            width: w,
            height: h,
            border_size: 0,
            walkable_height,
            walkable_climb,
            bmin: hf.bmin,
            bmax,
            cs: hf.cs,
            ch: hf.ch,
            cells,
            dist: vec![0; spans.len()],
            spans,
            areas,
            max_distance: 0,
            max_regions: 0,
        };
        chf.connect_neighbours();
        chf
    }

    fn connect_neighbours(&mut self) {
        let mut too_far = 0usize;
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index as usize..(cell.index + cell.count) as usize {
                    let s = self.spans[i];
                    for dir in 0..4 {
                        let nx = x + DIR_OFFSET_X[dir];
                        let nz = z + DIR_OFFSET_Z[dir];
                        if nx < 0 || nz < 0 || nx >= self.width || nz >= self.height {
                            continue;
                        }
                        let nc = self.cells[(nx + nz * self.width) as usize];
                        for k in nc.index..nc.index + nc.count {
                            let ns = self.spans[k as usize];
                            let bot = s.y.max(ns.y) as i32;
                            let top = (s.y as i32 + s.h as i32).min(ns.y as i32 + ns.h as i32);
                            if top - bot >= self.walkable_height
                                && (ns.y as i32 - s.y as i32).abs() <= self.walkable_climb
                            {
                                let offset = k - nc.index;
                                if offset >= NOT_CONNECTED as u32 {
                                    too_far += 1;
                                    continue;
                                }
                                self.spans[i].con[dir] = offset as u8;
                                break;
                            }
                        }
                    }
                }
            }
        }
        if too_far > 0 {
            warn!(
                "Compact heightfield has {} connections past the layer limit ({})",
                too_far, NOT_CONNECTED
            );
        }
    }

    #[inline]
    pub fn cell(&self, x: i32, z: i32) -> CompactCell {
        self.cells[(x + z * self.width) as usize]
    }

    /// Index range of the spans in cell (x, z)
    #[inline]
    pub fn cell_spans(&self, x: i32, z: i32) -> std::ops::Range<usize> {
        let c = self.cell(x, z);
        c.index as usize..(c.index + c.count) as usize
    }

    /// Neighbour of span `i` at cell (x, z) in direction `dir`, as
    /// `(span index, neighbour x, neighbour z)`
    #[inline]
    pub fn neighbour(&self, i: usize, x: i32, z: i32, dir: usize) -> Option<(usize, i32, i32)> {
        let offset = self.spans[i].con(dir)?;
        let nx = x + DIR_OFFSET_X[dir];
        let nz = z + DIR_OFFSET_Z[dir];
        Some((self.cell(nx, nz).index as usize + offset, nx, nz))
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Finds the span in cell (x, z) whose floor is closest to `y` (cell-height units)
    pub fn span_near_height(&self, x: i32, z: i32, y: i32) -> Option<usize> {
        if x < 0 || z < 0 || x >= self.width || z >= self.height {
            return None;
        }
        self.cell_spans(x, z)
            .filter(|&i| self.areas[i] != NULL_AREA)
            .min_by_key(|&i| (self.spans[i].y as i32 - y).abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WALKABLE_AREA;

    fn flat_field(w: i32, h: i32) -> Heightfield {
        let mut hf = Heightfield::new(w, h, Vec3::ZERO, Vec3::new(w as f32, 5.0, h as f32), 1.0, 0.5).unwrap();
        for z in 0..h {
            for x in 0..w {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1);
            }
        }
        hf
    }

    #[test]
    fn test_compact_heightfield_creation() {
        let hf = flat_field(4, 3);
        let chf = CompactHeightfield::build(4, 2, &hf);
        assert_eq!(chf.span_count(), 12);
        assert_eq!(chf.cell(3, 2).count, 1);
        assert_eq!(chf.spans[0].y, 2);
    }

    #[test]
    fn test_unwalkable_spans_are_dropped() {
        let mut hf = flat_field(2, 2);
        hf.add_span(0, 0, 10, 12, NULL_AREA, 1);
        let chf = CompactHeightfield::build(4, 2, &hf);
        assert_eq!(chf.cell(0, 0).count, 1);
        // Clearance stops at the unwalkable span above
        assert_eq!(chf.spans[chf.cell(0, 0).index as usize].h, 8);
    }

    #[test]
    fn test_get_neighbor() {
        let hf = flat_field(3, 3);
        let chf = CompactHeightfield::build(4, 2, &hf);
        let center = chf.cell(1, 1).index as usize;
        for dir in 0..4 {
            let (ni, nx, nz) = chf.neighbour(center, 1, 1, dir).unwrap();
            assert_eq!(nx, 1 + DIR_OFFSET_X[dir]);
            assert_eq!(nz, 1 + DIR_OFFSET_Z[dir]);
            assert_eq!(ni, chf.cell(nx, nz).index as usize);
        }
        let corner = chf.cell(0, 0).index as usize;
        assert!(chf.neighbour(corner, 0, 0, 0).is_none());
        assert!(chf.neighbour(corner, 0, 0, 3).is_none());
    }

    #[test]
    fn test_step_too_high_is_not_connected() {
        let mut hf = flat_field(2, 1);
        hf.add_span(1, 0, 0, 10, WALKABLE_AREA, 0);
        let chf = CompactHeightfield::build(4, 2, &hf);
        assert!(chf.neighbour(0, 0, 0, 2).is_none());
    }
}
