//! Detail mesh generation
//!
//! Polygons only store heights at their corners. The detail mesh
//! triangulates every polygon and refines triangles whose centre strays too
//! far from the voxelized surface, so height queries follow the ground more
//! closely.

use glam::Vec3;
use log::debug;
use tilenav_common::{Error, Result};

use crate::compact_heightfield::CompactHeightfield;
use crate::polymesh::PolyMesh;

/// Triangle edge flag: the edge lies on the polygon boundary
pub const DETAIL_EDGE_BOUNDARY: u8 = 0x1;

/// Local vertex indices are stored in a byte
const MAX_DETAIL_VERTS: usize = 255;

const MAX_SUBDIVISION_DEPTH: u32 = 3;

/// Detail triangulation of every polygon in a [`PolyMesh`]
#[derive(Debug, Clone, Default)]
pub struct PolyMeshDetail {
    /// Per polygon: `[vert base, vert count, tri base, tri count]`
    pub meshes: Vec<[u32; 4]>,
    /// World-space vertices; each sub-mesh starts with its polygon's corners
    pub verts: Vec<Vec3>,
    /// Local vertex indices plus edge flags (2 bits per edge)
    pub tris: Vec<[u8; 4]>,
}

impl PolyMeshDetail {
    /// Builds the detail mesh for `mesh` using heights sampled from `chf`.
    ///
    /// `sample_dist` is in cells: triangles with no edge longer than
    /// `sample_dist` cells are not refined, and a non-positive value disables
    /// refinement. `sample_max_error` is the allowed height deviation in
    /// world units.
    pub fn build(
        mesh: &PolyMesh,
        chf: &CompactHeightfield,
        sample_dist: f32,
        sample_max_error: f32,
    ) -> Result<Self> {
        let mut detail = Self::default();
        let min_edge = sample_dist * mesh.cs;

        for p in 0..mesh.npolys {
            let poly = mesh.poly(p);
            let corners: Vec<Vec3> = poly
                .iter()
                .map(|&vi| {
                    let v = mesh.verts[vi as usize];
                    Vec3::new(
                        mesh.bmin.x + v[0] as f32 * mesh.cs,
                        mesh.bmin.y + v[1] as f32 * mesh.ch,
                        mesh.bmin.z + v[2] as f32 * mesh.cs,
                    )
                })
                .collect();
            let n = corners.len();
            if n < 3 {
                return Err(Error::NavMeshGeneration(format!(
                    "Polygon {} has only {} vertices",
                    p, n
                )));
            }

            let mut verts = corners;
            let mut stack: Vec<([usize; 3], u32)> = (1..n - 1).map(|i| ([0, i, i + 1], 0)).rev().collect();
            let mut tris = Vec::new();

            while let Some((t, depth)) = stack.pop() {
                if sample_dist > 0.0
                    && depth < MAX_SUBDIVISION_DEPTH
                    && verts.len() < MAX_DETAIL_VERTS
                {
                    let [a, b, c] = t.map(|i| verts[i]);
                    let longest = longest_edge_2d(a, b, c);
                    if longest > min_edge {
                        let centre = (a + b + c) / 3.0;
                        if let Some(h) = sample_height(chf, centre) {
                            if (h - centre.y).abs() > sample_max_error {
                                let ci = verts.len();
                                verts.push(Vec3::new(centre.x, h, centre.z));
                                stack.push(([t[2], t[0], ci], depth + 1));
                                stack.push(([t[1], t[2], ci], depth + 1));
                                stack.push(([t[0], t[1], ci], depth + 1));
                                continue;
                            }
                        }
                    }
                }
                tris.push(t);
            }

            let vbase = detail.verts.len() as u32;
            let tbase = detail.tris.len() as u32;
            detail.meshes.push([vbase, verts.len() as u32, tbase, tris.len() as u32]);
            detail.verts.extend_from_slice(&verts);
            detail.tris.extend(tris.iter().map(|t| {
                let flags = edge_flag(t[0], t[1], n)
                    | (edge_flag(t[1], t[2], n) << 2)
                    | (edge_flag(t[2], t[0], n) << 4);
                [t[0] as u8, t[1] as u8, t[2] as u8, flags]
            }));
        }

        debug!(
            "Built detail mesh with {} vertices and {} triangles",
            detail.verts.len(),
            detail.tris.len()
        );
        Ok(detail)
    }

    /// Vertices and triangles of the sub-mesh for polygon `p`
    pub fn sub_mesh(&self, p: usize) -> (&[Vec3], &[[u8; 4]]) {
        let [vb, vn, tb, tn] = self.meshes[p].map(|v| v as usize);
        (&self.verts[vb..vb + vn], &self.tris[tb..tb + tn])
    }
}

fn longest_edge_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let d = |p: Vec3, q: Vec3| (q.x - p.x).hypot(q.z - p.z);
    d(a, b).max(d(b, c)).max(d(c, a))
}

/// Boundary flag for the edge between local vertices `a` and `b`
fn edge_flag(a: usize, b: usize, corners: usize) -> u8 {
    if a < corners && b < corners && (b == (a + 1) % corners || a == (b + 1) % corners) {
        DETAIL_EDGE_BOUNDARY
    } else {
        0
    }
}

/// Floor height of the walkable span under `p` closest to `p.y`
fn sample_height(chf: &CompactHeightfield, p: Vec3) -> Option<f32> {
    let x = ((p.x - chf.bmin.x) / chf.cs).floor() as i32;
    let z = ((p.z - chf.bmin.z) / chf.cs).floor() as i32;
    let y = ((p.y - chf.bmin.y) / chf.ch).round() as i32;
    let i = chf.span_near_height(x, z, y)?;
    Some(chf.bmin.y + chf.spans[i].y as f32 * chf.ch)
}
