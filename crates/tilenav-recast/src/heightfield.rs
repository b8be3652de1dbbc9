//! Heightfield representation
//!
//! The heightfield is the first data structure in the pipeline. It is a 2D grid
//! of columns, each holding the solid spans produced by rasterizing the input
//! triangles, sorted bottom to top.

use glam::Vec3;
use tilenav_common::Result;

use crate::config::field_cell_count;
use crate::NULL_AREA;

/// Largest representable span height
pub const SPAN_MAX_HEIGHT: u16 = 0xffff;

/// Neighbour offsets along x for the four cardinal directions
pub const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
/// Neighbour offsets along z for the four cardinal directions
pub const DIR_OFFSET_Z: [i32; 4] = [0, 1, 0, -1];

/// A solid span in a heightfield column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Bottom of the span in cell-height units
    pub smin: u16,
    /// Top of the span (the floor surface) in cell-height units
    pub smax: u16,
    /// Area ID (0 = not walkable)
    pub area: u8,
}

/// Heightfield structure holding a grid of span columns
#[derive(Debug, Clone)]
pub struct Heightfield {
    /// Width of the heightfield along the x-axis
    pub width: i32,
    /// Height (depth) of the heightfield along the z-axis
    pub height: i32,

    /// The minimum bounds of the heightfield's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the heightfield's AABB
    pub bmax: Vec3,

    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,

    columns: Vec<Vec<Span>>,
}

impl Heightfield {
    /// Creates a new empty heightfield. Fails when the grid is empty or too large.
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Result<Self> {
        let cells = field_cell_count(width, height)?;
        Ok(Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns: vec![Vec::new(); cells],
        })
    }

    #[inline]
    fn column_index(&self, x: i32, z: i32) -> Option<usize> {
        if x < 0 || z < 0 || x >= self.width || z >= self.height {
            None
        } else {
            Some((x + z * self.width) as usize)
        }
    }

    /// Spans of the column at (x, z), bottom to top. Out of bounds yields nothing.
    pub fn column(&self, x: i32, z: i32) -> &[Span] {
        match self.column_index(x, z) {
            Some(idx) => &self.columns[idx],
            None => &[],
        }
    }

    /// Total number of spans in the field
    pub fn span_count(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    /// Number of spans with a walkable area
    pub fn walkable_span_count(&self) -> usize {
        self.columns
            .iter()
            .flatten()
            .filter(|s| s.area != NULL_AREA)
            .count()
    }

    /// Adds a span, merging it with every span it overlaps.
    ///
    /// When the merged top lies within `flag_merge_threshold` of an existing
    /// top, the higher area id wins so walkable surfaces are not lost to a
    /// slightly taller unwalkable triangle.
    pub fn add_span(
        &mut self,
        x: i32,
        z: i32,
        smin: u16,
        smax: u16,
        area: u8,
        flag_merge_threshold: i32,
    ) {
        let Some(idx) = self.column_index(x, z) else {
            return;
        };
        let column = &mut self.columns[idx];

        let mut merged = Span { smin, smax, area };
        let mut insert_at = column.len();
        let mut i = 0;
        while i < column.len() {
            let cur = column[i];
            if cur.smin > merged.smax {
                insert_at = i;
                break;
            }
            if cur.smax < merged.smin {
                i += 1;
                continue;
            }

            merged.smin = merged.smin.min(cur.smin);
            merged.smax = merged.smax.max(cur.smax);
            if (merged.smax as i32 - cur.smax as i32).abs() <= flag_merge_threshold {
                merged.area = merged.area.max(cur.area);
            }
            column.remove(i);
        }
        if insert_at > column.len() {
            insert_at = column.len();
        }
        column.insert(insert_at, merged);
    }

    /// Marks non-walkable spans as walkable if their top is within
    /// `walkable_climb` of the walkable span directly below, so curbs and
    /// stair steps can be stepped over.
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: i32) {
        for column in &mut self.columns {
            let mut previous: Option<Span> = None;
            let mut previous_walkable = false;
            for span in column.iter_mut() {
                let walkable = span.area != NULL_AREA;
                if let Some(prev) = previous {
                    if !walkable
                        && previous_walkable
                        && (span.smax as i32 - prev.smax as i32).abs() <= walkable_climb
                    {
                        span.area = prev.area;
                    }
                }
                previous_walkable = walkable;
                previous = Some(*span);
            }
        }
    }

    /// Removes walkable spans that sit on a ledge: a drop to a neighbour of
    /// more than `walkable_climb`, or neighbours that are too steep among
    /// themselves to be traversable.
    pub fn filter_ledge_spans(&mut self, walkable_height: i32, walkable_climb: i32) {
        let max_height = SPAN_MAX_HEIGHT as i32;
        let mut to_clear = Vec::new();

        for z in 0..self.height {
            for x in 0..self.width {
                let column = self.column(x, z);
                for (si, span) in column.iter().enumerate() {
                    if span.area == NULL_AREA {
                        continue;
                    }

                    let bot = span.smax as i32;
                    let top = column
                        .get(si + 1)
                        .map_or(max_height, |next| next.smin as i32);

                    let mut min_neighbor_height = max_height;
                    let mut accessible_min = bot;
                    let mut accessible_max = bot;

                    for dir in 0..4 {
                        let nx = x + DIR_OFFSET_X[dir];
                        let nz = z + DIR_OFFSET_Z[dir];
                        if self.column_index(nx, nz).is_none() {
                            min_neighbor_height = min_neighbor_height.min(-walkable_climb - bot);
                            continue;
                        }

                        let neighbor = self.column(nx, nz);

                        // From minus infinity to the first span
                        let nbot = -walkable_climb;
                        let ntop = neighbor.first().map_or(max_height, |s| s.smin as i32);
                        if top.min(ntop) - bot.max(nbot) > walkable_height {
                            min_neighbor_height = min_neighbor_height.min(nbot - bot);
                        }

                        for (ni, ns) in neighbor.iter().enumerate() {
                            let nbot = ns.smax as i32;
                            let ntop = neighbor
                                .get(ni + 1)
                                .map_or(max_height, |next| next.smin as i32);
                            if top.min(ntop) - bot.max(nbot) > walkable_height {
                                min_neighbor_height = min_neighbor_height.min(nbot - bot);
                                if (nbot - bot).abs() <= walkable_climb {
                                    accessible_min = accessible_min.min(nbot);
                                    accessible_max = accessible_max.max(nbot);
                                }
                            }
                        }
                    }

                    if min_neighbor_height < -walkable_climb
                        || accessible_max - accessible_min > walkable_climb
                    {
                        to_clear.push((x, z, si));
                    }
                }
            }
        }

        for (x, z, si) in to_clear {
            if let Some(idx) = self.column_index(x, z) {
                self.columns[idx][si].area = NULL_AREA;
            }
        }
    }

    /// Removes walkable spans without enough clearance above them
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: i32) {
        for column in &mut self.columns {
            for si in 0..column.len() {
                let bot = column[si].smax as i32;
                let top = column
                    .get(si + 1)
                    .map_or(SPAN_MAX_HEIGHT as i32, |next| next.smin as i32);
                if top - bot < walkable_height {
                    column[si].area = NULL_AREA;
                }
            }
        }
    }
}
