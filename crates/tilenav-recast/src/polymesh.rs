//! Polygon mesh generation
//!
//! Every contour is triangulated by ear clipping and the triangles are then
//! greedily merged into convex polygons of up to `nvp` vertices. Vertices
//! are shared across contours, polygon adjacency is computed and edges on
//! the tile boundary are marked as portals.

use std::collections::HashMap;

use glam::Vec3;
use log::{debug, warn};
use tilenav_common::{Error, Result};

use crate::contour::ContourSet;
use crate::polygon::{in_cone, in_cone_loose, intersect, intersect_prop, same_xz, GridVert};

/// Unused vertex or neighbour slot
pub const MESH_NULL_IDX: u16 = 0xffff;

/// Neighbour slot flag for an edge on the tile boundary; the low bits hold the side
pub const PORTAL_FLAG: u16 = 0x8000;

/// Tile sides as stored in portal neighbour slots
pub const SIDE_POS_X: u16 = 0;
pub const SIDE_POS_Z: u16 = 1;
pub const SIDE_NEG_X: u16 = 2;
pub const SIDE_NEG_Z: u16 = 3;

/// Vertices merge when they share x and z and differ by at most this much in y
const VERTEX_MERGE_HEIGHT: i32 = 2;

/// Convex polygon mesh of one tile
#[derive(Debug, Clone)]
pub struct PolyMesh {
    /// Vertices in tile cell units, border excluded
    pub verts: Vec<[u16; 3]>,
    /// `nvp` vertex indices followed by `nvp` neighbour slots per polygon
    pub polys: Vec<u16>,
    pub regs: Vec<u16>,
    pub areas: Vec<u8>,
    pub npolys: usize,
    /// Maximum vertices per polygon
    pub nvp: usize,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub border_size: i32,
    pub max_edge_error: f32,
}

impl PolyMesh {
    /// Builds the polygon mesh for all contours in `cset`
    pub fn build(cset: &ContourSet, nvp: usize) -> Result<Self> {
        if nvp < 3 {
            return Err(Error::InvalidParameters(format!(
                "At least 3 vertices per polygon are required, got {}",
                nvp
            )));
        }

        let mut mesh = Self {
            verts: Vec::new(),
            polys: Vec::new(),
            regs: Vec::new(),
            areas: Vec::new(),
            npolys: 0,
            nvp,
            bmin: cset.bmin,
            bmax: cset.bmax,
            cs: cset.cs,
            ch: cset.ch,
            border_size: cset.border_size,
            max_edge_error: cset.max_error,
        };

        let max_vertices: usize = cset.contours.iter().map(|c| c.verts.len()).sum();
        if max_vertices >= MESH_NULL_IDX as usize - 1 {
            return Err(Error::NavMeshGeneration(format!(
                "Too many vertices in tile: {}",
                max_vertices
            )));
        }

        let mut vertex_lookup: HashMap<(u16, u16), Vec<u16>> = HashMap::new();

        for (ci, contour) in cset.contours.iter().enumerate() {
            if contour.verts.len() < 3 {
                continue;
            }

            let (tris, complete) = triangulate(&contour.verts);
            if !complete {
                warn!("Bad triangulation for contour {} of region {}", ci, contour.reg);
            }

            let indices: Vec<u16> = contour
                .verts
                .iter()
                .map(|v| mesh.add_vertex(v[0], v[1], v[2], &mut vertex_lookup))
                .collect();

            let mut polys: Vec<Vec<u16>> = tris
                .iter()
                .map(|&t| t.map(|k| indices[k]))
                .filter(|t| t[0] != t[1] && t[0] != t[2] && t[1] != t[2])
                .map(|t| t.to_vec())
                .collect();
            if polys.is_empty() {
                continue;
            }

            if nvp > 3 {
                merge_polys(&mut polys, &mesh.verts, nvp);
            }

            for p in polys {
                let base = mesh.polys.len();
                mesh.polys.resize(base + nvp * 2, MESH_NULL_IDX);
                mesh.polys[base..base + p.len()].copy_from_slice(&p);
                mesh.regs.push(contour.reg);
                mesh.areas.push(contour.area);
                mesh.npolys += 1;
            }
        }

        mesh.build_adjacency();
        mesh.mark_portal_edges(cset.width, cset.height);

        debug!(
            "Built polygon mesh with {} vertices and {} polygons",
            mesh.verts.len(),
            mesh.npolys
        );
        Ok(mesh)
    }

    /// Returns the index of the vertex at (x, y, z), reusing a vertex with
    /// the same x/z whose height is within a couple of cells.
    fn add_vertex(&mut self, x: i32, y: i32, z: i32, lookup: &mut HashMap<(u16, u16), Vec<u16>>) -> u16 {
        let key = (x as u16, z as u16);
        let bucket = lookup.entry(key).or_default();
        if let Some(&existing) = bucket
            .iter()
            .find(|&&vi| (self.verts[vi as usize][1] as i32 - y).abs() <= VERTEX_MERGE_HEIGHT)
        {
            return existing;
        }
        let index = self.verts.len() as u16;
        self.verts.push([x as u16, y as u16, z as u16]);
        bucket.push(index);
        index
    }

    /// Vertex indices of polygon `i`
    pub fn poly(&self, i: usize) -> &[u16] {
        let base = i * self.nvp * 2;
        let p = &self.polys[base..base + self.nvp];
        let n = count_poly_verts(p);
        &p[..n]
    }

    /// Neighbour slots of polygon `i`, one per edge
    pub fn neighbours(&self, i: usize) -> &[u16] {
        let n = self.poly(i).len();
        let base = i * self.nvp * 2 + self.nvp;
        &self.polys[base..base + n]
    }

    fn build_adjacency(&mut self) {
        let nvp = self.nvp;
        // (low vertex, high vertex) -> (poly, edge) of the first polygon that used it
        let mut open: HashMap<(u16, u16), (usize, usize)> = HashMap::new();
        let mut links = Vec::new();

        for i in 0..self.npolys {
            let p = self.poly(i).to_vec();
            for j in 0..p.len() {
                let v0 = p[j];
                let v1 = p[(j + 1) % p.len()];
                let key = (v0.min(v1), v0.max(v1));
                match open.remove(&key) {
                    Some((pi, ej)) if pi != i => links.push((pi, ej, i, j)),
                    Some(prev) => {
                        open.insert(key, prev);
                    }
                    None => {
                        open.insert(key, (i, j));
                    }
                }
            }
        }

        for (pa, ea, pb, eb) in links {
            self.polys[pa * nvp * 2 + nvp + ea] = pb as u16;
            self.polys[pb * nvp * 2 + nvp + eb] = pa as u16;
        }
    }

    /// Marks unconnected edges that lie on the tile boundary with the side
    /// they face.
    fn mark_portal_edges(&mut self, width: i32, height: i32) {
        if self.border_size <= 0 {
            return;
        }
        let nvp = self.nvp;
        let w = width as u16;
        let h = height as u16;
        for i in 0..self.npolys {
            let n = self.poly(i).len();
            for j in 0..n {
                let slot = i * nvp * 2 + nvp + j;
                if self.polys[slot] != MESH_NULL_IDX {
                    continue;
                }
                let va = self.verts[self.polys[i * nvp * 2 + j] as usize];
                let vb = self.verts[self.polys[i * nvp * 2 + (j + 1) % n] as usize];
                let side = if va[0] == w && vb[0] == w {
                    SIDE_POS_X
                } else if va[2] == h && vb[2] == h {
                    SIDE_POS_Z
                } else if va[0] == 0 && vb[0] == 0 {
                    SIDE_NEG_X
                } else if va[2] == 0 && vb[2] == 0 {
                    SIDE_NEG_Z
                } else {
                    continue;
                };
                self.polys[slot] = PORTAL_FLAG | side;
            }
        }
    }
}

fn count_poly_verts(p: &[u16]) -> usize {
    p.iter().position(|&v| v == MESH_NULL_IDX).unwrap_or(p.len())
}

#[inline]
fn prev(i: usize, n: usize) -> usize {
    if i == 0 {
        n - 1
    } else {
        i - 1
    }
}

#[inline]
fn next(i: usize, n: usize) -> usize {
    if i + 1 >= n {
        0
    } else {
        i + 1
    }
}

/// Ear-clipping state: contour vertex index plus whether the vertex can be clipped
type EarIndex = (usize, bool);

fn diagonalie(i: usize, j: usize, verts: &[GridVert], indices: &[EarIndex], loose: bool) -> bool {
    let n = indices.len();
    let d0 = &verts[indices[i].0];
    let d1 = &verts[indices[j].0];
    for k in 0..n {
        let k1 = next(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = &verts[indices[k].0];
        let p1 = &verts[indices[k1].0];
        if same_xz(d0, p0) || same_xz(d1, p0) || same_xz(d0, p1) || same_xz(d1, p1) {
            continue;
        }
        let hit = if loose {
            intersect_prop(d0, d1, p0, p1)
        } else {
            intersect(d0, d1, p0, p1)
        };
        if hit {
            return false;
        }
    }
    true
}

fn diagonal(i: usize, j: usize, verts: &[GridVert], indices: &[EarIndex], loose: bool) -> bool {
    let n = indices.len();
    let a = &verts[indices[prev(i, n)].0];
    let b = &verts[indices[i].0];
    let c = &verts[indices[next(i, n)].0];
    let p = &verts[indices[j].0];
    let cone = if loose {
        in_cone_loose(a, b, c, p)
    } else {
        in_cone(a, b, c, p)
    };
    cone && diagonalie(i, j, verts, indices, loose)
}

/// Ear-clips a simple polygon, always cutting the shortest available ear.
///
/// Returns triangles as indices into `verts` and whether the polygon was
/// fully triangulated.
fn triangulate(verts: &[GridVert]) -> (Vec<[usize; 3]>, bool) {
    let mut indices: Vec<EarIndex> = (0..verts.len()).map(|i| (i, false)).collect();
    let mut tris = Vec::with_capacity(verts.len().saturating_sub(2));

    let n = indices.len();
    for i in 0..n {
        let i2 = next(next(i, n), n);
        if diagonal(i, i2, verts, &indices, false) {
            indices[next(i, n)].1 = true;
        }
    }

    let shortest_ear = |indices: &[EarIndex], loose: bool| -> Option<usize> {
        let n = indices.len();
        let mut best: Option<(i32, usize)> = None;
        for i in 0..n {
            let i1 = next(i, n);
            let i2 = next(i1, n);
            let candidate = if loose {
                diagonal(i, i2, verts, indices, true)
            } else {
                indices[i1].1
            };
            if !candidate {
                continue;
            }
            let p0 = &verts[indices[i].0];
            let p2 = &verts[indices[i2].0];
            let dx = p2[0] - p0[0];
            let dz = p2[2] - p0[2];
            let len = dx * dx + dz * dz;
            if best.map_or(true, |(l, _)| len < l) {
                best = Some((len, i));
            }
        }
        best.map(|(_, i)| i)
    };

    while indices.len() > 3 {
        // Overlapping contour segments can hide every strict ear; retry loosely
        let Some(i) = shortest_ear(&indices, false).or_else(|| shortest_ear(&indices, true)) else {
            return (tris, false);
        };

        let n = indices.len();
        let i1 = next(i, n);
        let i2 = next(i1, n);
        tris.push([indices[i].0, indices[i1].0, indices[i2].0]);

        indices.remove(i1);
        let n = indices.len();
        let i1 = if i1 >= n { 0 } else { i1 };
        let i = prev(i1, n);

        indices[i].1 = diagonal(prev(i, n), i1, verts, &indices, false);
        indices[i1].1 = diagonal(i, next(i1, n), verts, &indices, false);
    }

    tris.push([indices[0].0, indices[1].0, indices[2].0]);
    (tris, true)
}

#[inline]
fn uleft(a: &[u16; 3], b: &[u16; 3], c: &[u16; 3]) -> bool {
    let (ax, az) = (a[0] as i32, a[2] as i32);
    let (bx, bz) = (b[0] as i32, b[2] as i32);
    let (cx, cz) = (c[0] as i32, c[2] as i32);
    (bx - ax) * (cz - az) - (cx - ax) * (bz - az) < 0
}

/// Squared length of the edge `pa` and `pb` share if merging them keeps the
/// result convex and within `nvp` vertices, as `(value, edge in pa, edge in pb)`.
fn poly_merge_value(pa: &[u16], pb: &[u16], verts: &[[u16; 3]], nvp: usize) -> Option<(i32, usize, usize)> {
    let na = pa.len();
    let nb = pb.len();
    if na + nb - 2 > nvp {
        return None;
    }

    let mut shared = None;
    'outer: for i in 0..na {
        let (a0, a1) = (pa[i], pa[(i + 1) % na]);
        let key = (a0.min(a1), a0.max(a1));
        for j in 0..nb {
            let (b0, b1) = (pb[j], pb[(j + 1) % nb]);
            if key == (b0.min(b1), b0.max(b1)) {
                shared = Some((i, j));
                break 'outer;
            }
        }
    }
    let (ea, eb) = shared?;

    let v = |i: u16| &verts[i as usize];
    if !uleft(v(pa[(ea + na - 1) % na]), v(pa[ea]), v(pb[(eb + 2) % nb])) {
        return None;
    }
    if !uleft(v(pb[(eb + nb - 1) % nb]), v(pb[eb]), v(pa[(ea + 2) % na])) {
        return None;
    }

    let a = v(pa[ea]);
    let b = v(pa[(ea + 1) % na]);
    let dx = a[0] as i32 - b[0] as i32;
    let dz = a[2] as i32 - b[2] as i32;
    Some((dx * dx + dz * dz, ea, eb))
}

/// Repeatedly merges the pair of polygons sharing the longest edge
fn merge_polys(polys: &mut Vec<Vec<u16>>, verts: &[[u16; 3]], nvp: usize) {
    loop {
        let mut best: Option<(i32, usize, usize, usize, usize)> = None;
        for j in 0..polys.len() {
            for k in j + 1..polys.len() {
                if let Some((value, ea, eb)) = poly_merge_value(&polys[j], &polys[k], verts, nvp) {
                    if best.map_or(true, |b| value > b.0) {
                        best = Some((value, j, k, ea, eb));
                    }
                }
            }
        }

        let Some((_, pa, pb, ea, eb)) = best else {
            break;
        };
        let a = &polys[pa];
        let b = &polys[pb];
        let mut merged = Vec::with_capacity(a.len() + b.len() - 2);
        for i in 0..a.len() - 1 {
            merged.push(a[(ea + 1 + i) % a.len()]);
        }
        for i in 0..b.len() - 1 {
            merged.push(b[(eb + 1 + i) % b.len()]);
        }
        polys[pa] = merged;
        polys.swap_remove(pb);
    }
}
