//! Multi-tile navigation mesh
//!
//! Tiles live in a fixed number of slots. Every polygon is addressed by a
//! [`PolyRef`] that packs its index, the slot and the slot's salt; the salt is
//! bumped whenever a tile leaves its slot so stale references stop resolving.
//! Polygons are connected through per-tile link lists that are rebuilt for a
//! tile and its four neighbours whenever a tile is added or removed.

use std::collections::HashMap;

use glam::Vec3;
use log::{debug, trace};
use tilenav_common::{
    closest_height_point_triangle, closest_point_on_polygon_2d, dist_point_segment_sqr_2d,
    point_in_polygon_2d, Aabb, Error, Result,
};
use tilenav_recast::{SIDE_NEG_X, SIDE_NEG_Z, SIDE_POS_X, SIDE_POS_Z};

use crate::{NavMeshParams, PolyRef, Status, EXT_LINK, LINK_INTERNAL, MAX_VERTS_PER_POLY};

/// Number of bits for polygon id
const DT_POLY_BITS: u32 = 16;
/// Number of bits for tile id
const DT_TILE_BITS: u32 = 10;
/// Number of bits for salt
const DT_SALT_BITS: u32 = 6;

const DT_POLY_MASK: u32 = (1 << DT_POLY_BITS) - 1;
const DT_TILE_MASK: u32 = (1 << DT_TILE_BITS) - 1;
const DT_SALT_MASK: u32 = (1 << DT_SALT_BITS) - 1;

/// Portal end points closer than this along the border axis are considered
/// to lie on the same border plane
const PORTAL_PLANE_EPS: f32 = 0.01;

/// Creates a PolyRef from salt, 1-based tile id and polygon id
#[inline]
pub fn encode_poly_ref_with_salt(salt: u32, tile_id: u32, poly_id: u32) -> PolyRef {
    PolyRef::new(
        ((salt & DT_SALT_MASK) << (DT_POLY_BITS + DT_TILE_BITS))
            | ((tile_id & DT_TILE_MASK) << DT_POLY_BITS)
            | (poly_id & DT_POLY_MASK),
    )
}

/// Decodes a PolyRef into salt, 1-based tile id and polygon id
#[inline]
pub fn decode_poly_ref_full(reference: PolyRef) -> (u32, u32, u32) {
    let id = reference.id();
    (
        (id >> (DT_POLY_BITS + DT_TILE_BITS)) & DT_SALT_MASK,
        (id >> DT_POLY_BITS) & DT_TILE_MASK,
        id & DT_POLY_MASK,
    )
}

/// Connection from one polygon edge to a neighbouring polygon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    /// Polygon on the other side of the edge
    pub reference: PolyRef,
    /// Index of the next link of the same polygon
    pub next: Option<u32>,
    /// Edge of the owning polygon
    pub edge: u8,
    /// Tile side for links across tiles, [`LINK_INTERNAL`] otherwise
    pub side: u8,
    /// Start of the shared portal along the edge, 0..=255
    pub bmin: u8,
    /// End of the shared portal along the edge, 0..=255
    pub bmax: u8,
}

/// Convex navigation polygon
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Poly {
    /// Head of the polygon's link list
    pub first_link: Option<u32>,
    /// Indices into the tile vertices
    pub verts: [u16; MAX_VERTS_PER_POLY],
    /// Per edge: 0 for a wall, `index + 1` for a polygon of the same tile, or
    /// `EXT_LINK | side` for an edge on the tile border
    pub neis: [u16; MAX_VERTS_PER_POLY],
    /// Traversal flags, see [`POLY_FLAG_WALK`](crate::POLY_FLAG_WALK)
    pub flags: u16,
    /// Region the polygon was generated from
    pub region: u16,
    pub vert_count: u8,
    pub area: u8,
}

impl Poly {
    pub fn vert_indices(&self) -> &[u16] {
        &self.verts[..self.vert_count as usize]
    }
}

/// Location of a polygon's detail triangles
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PolyDetail {
    /// First detail vertex owned by the polygon
    pub vert_base: u32,
    /// First detail triangle of the polygon
    pub tri_base: u32,
    /// Number of detail vertices beyond the polygon corners
    pub vert_count: u8,
    pub tri_count: u8,
}

/// Tile placement and agent settings the tile was built with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileHeader {
    pub x: i32,
    pub y: i32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub bmin: Vec3,
    pub bmax: Vec3,
}

/// Polygons of one tile in world space
#[derive(Debug, Clone, PartialEq)]
pub struct MeshTile {
    pub header: TileHeader,
    pub verts: Vec<Vec3>,
    pub polys: Vec<Poly>,
    pub detail_meshes: Vec<PolyDetail>,
    /// Detail vertices not shared with the polygon corners
    pub detail_verts: Vec<Vec3>,
    /// Local vertex indices plus edge flags
    pub detail_tris: Vec<[u8; 4]>,
    /// Runtime connectivity, rebuilt when the tile is attached
    pub links: Vec<Link>,
    /// Salt of the slot the tile occupies
    pub salt: u32,
}

impl MeshTile {
    /// World-space corners of polygon `index`
    pub fn poly_verts(&self, index: usize) -> Vec<Vec3> {
        self.polys[index]
            .vert_indices()
            .iter()
            .map(|&v| self.verts[v as usize])
            .collect()
    }

    /// Detail triangles of polygon `index` as world-space corner triples
    pub fn detail_triangles(&self, index: usize) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        let poly = &self.polys[index];
        let detail = &self.detail_meshes[index];
        let tb = detail.tri_base as usize;
        self.detail_tris[tb..tb + detail.tri_count as usize]
            .iter()
            .map(move |t| [t[0], t[1], t[2]].map(|k| self.detail_vertex(poly, detail, k)))
    }

    fn detail_vertex(&self, poly: &Poly, detail: &PolyDetail, k: u8) -> Vec3 {
        if k < poly.vert_count {
            self.verts[poly.verts[k as usize] as usize]
        } else {
            self.detail_verts[(detail.vert_base + (k - poly.vert_count) as u32) as usize]
        }
    }

    /// Links of polygon `index`, in edge order
    pub fn links_of(&self, index: usize) -> impl Iterator<Item = &Link> + '_ {
        let mut next = self.polys[index].first_link;
        std::iter::from_fn(move || {
            let link = &self.links[next? as usize];
            next = link.next;
            Some(link)
        })
    }

    /// Bounds of polygon `index` including its detail vertices
    pub fn poly_bounds(&self, index: usize) -> Aabb {
        let corners = self.poly_verts(index);
        let detail = &self.detail_meshes[index];
        let vb = detail.vert_base as usize;
        let extra = self.detail_verts[vb..vb + detail.vert_count as usize].iter().copied();
        Aabb::from_points(corners.into_iter().chain(extra))
            .unwrap_or(Aabb::new(self.header.bmin, self.header.bmin))
    }

    /// Surface height of polygon `index` at the xz location of `pos`
    pub fn poly_height(&self, index: usize, pos: Vec3) -> Option<f32> {
        let verts = self.poly_verts(index);
        if !point_in_polygon_2d(pos, &verts) {
            return None;
        }
        self.detail_triangles(index)
            .find_map(|[a, b, c]| closest_height_point_triangle(pos, a, b, c))
            .or_else(|| Some(self.closest_detail_edge_point(index, pos).y))
    }

    /// Point on the detail triangle edges of polygon `index` nearest to `pos`
    /// in xz, at the surface height there. Polygons without detail triangles
    /// use their boundary edges.
    pub fn closest_detail_edge_point(&self, index: usize, pos: Vec3) -> Vec3 {
        let mut edges: Vec<(Vec3, Vec3)> = self
            .detail_triangles(index)
            .flat_map(|[a, b, c]| [(a, b), (b, c), (c, a)])
            .collect();
        if edges.is_empty() {
            let verts = self.poly_verts(index);
            edges = (0..verts.len())
                .map(|i| (verts[i], verts[(i + 1) % verts.len()]))
                .collect();
        }
        edges
            .into_iter()
            .map(|(a, b)| {
                let (d, t) = dist_point_segment_sqr_2d(pos, a, b);
                (d, a.lerp(b, t))
            })
            .min_by(|x, y| x.0.total_cmp(&y.0))
            .map_or(pos, |(_, p)| p)
    }
}

/// Tile grid offset of the neighbour on `side`
fn side_offset(side: u8) -> (i32, i32) {
    match side as u16 {
        SIDE_POS_X => (1, 0),
        SIDE_POS_Z => (0, 1),
        SIDE_NEG_X => (-1, 0),
        SIDE_NEG_Z => (0, -1),
        _ => (0, 0),
    }
}

#[inline]
fn opposite_side(side: u8) -> u8 {
    (side + 2) & 0x3
}

#[inline]
fn is_x_side(side: u8) -> bool {
    side as u16 == SIDE_POS_X || side as u16 == SIDE_NEG_X
}

/// Coordinate of a border vertex across the border plane
fn slab_coord(v: Vec3, side: u8) -> f32 {
    if is_x_side(side) {
        v.x
    } else {
        v.z
    }
}

/// End points of a border edge as `(along, height)` pairs ordered along the border
fn slab_end_points(va: Vec3, vb: Vec3, side: u8) -> ([f32; 2], [f32; 2]) {
    let (a, b) = if is_x_side(side) {
        ([va.z, va.y], [vb.z, vb.y])
    } else {
        ([va.x, va.y], [vb.x, vb.y])
    };
    if a[0] < b[0] {
        (a, b)
    } else {
        (b, a)
    }
}

/// Whether two border edges share a stretch of the border at a climbable height
fn overlap_slabs(amin: [f32; 2], amax: [f32; 2], bmin: [f32; 2], bmax: [f32; 2], px: f32, py: f32) -> bool {
    // Edges that only touch at an end point are not connected
    let minx = (amin[0] + px).max(bmin[0] + px);
    let maxx = (amax[0] - px).min(bmax[0] - px);
    if minx > maxx {
        return false;
    }

    let ad = (amax[1] - amin[1]) / (amax[0] - amin[0]);
    let ak = amin[1] - ad * amin[0];
    let bd = (bmax[1] - bmin[1]) / (bmax[0] - bmin[0]);
    let bk = bmin[1] - bd * bmin[0];
    let dmin = (bd * minx + bk) - (ad * minx + ak);
    let dmax = (bd * maxx + bk) - (ad * maxx + ak);

    // Crossing edges always overlap
    if dmin * dmax < 0.0 {
        return true;
    }
    let thr = (py * 2.0) * (py * 2.0);
    dmin * dmin <= thr || dmax * dmax <= thr
}

/// Navigation mesh made of independently replaceable tiles
#[derive(Debug)]
pub struct NavMesh {
    params: NavMeshParams,
    tiles: Vec<Option<MeshTile>>,
    salts: Vec<u32>,
    positions: HashMap<(i32, i32), usize>,
}

impl NavMesh {
    pub fn new(params: NavMeshParams) -> Result<Self> {
        if !(params.tile_width > 0.0 && params.tile_height > 0.0)
            || !params.tile_width.is_finite()
            || !params.tile_height.is_finite()
            || !params.origin.is_finite()
        {
            return Err(Error::Detour(format!(
                "{}: tile size must be positive",
                Status::InvalidParam
            )));
        }
        if params.max_tiles == 0 || params.max_tiles > DT_TILE_MASK {
            return Err(Error::Detour(format!(
                "{}: max_tiles must be in 1..={}",
                Status::InvalidParam,
                DT_TILE_MASK
            )));
        }
        if params.max_polys == 0 || params.max_polys > DT_POLY_MASK + 1 {
            return Err(Error::Detour(format!(
                "{}: max_polys must be in 1..={}",
                Status::InvalidParam,
                DT_POLY_MASK + 1
            )));
        }

        let n = params.max_tiles as usize;
        Ok(Self {
            params,
            tiles: vec![None; n],
            salts: vec![1; n],
            positions: HashMap::new(),
        })
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    /// Tile grid location containing `pos`
    pub fn calc_tile_loc(&self, pos: Vec3) -> (i32, i32) {
        (
            ((pos.x - self.params.origin.x) / self.params.tile_width).floor() as i32,
            ((pos.z - self.params.origin.z) / self.params.tile_height).floor() as i32,
        )
    }

    /// Attaches a tile and links it with its neighbours.
    ///
    /// Returns the reference of the tile's first polygon.
    pub fn add_tile(&mut self, mut tile: MeshTile) -> Result<PolyRef> {
        let key = (tile.header.x, tile.header.y);
        if tile.polys.len() > self.params.max_polys as usize {
            return Err(Error::Detour(format!(
                "{}: tile has {} polygons, limit is {}",
                Status::InvalidParam,
                tile.polys.len(),
                self.params.max_polys
            )));
        }
        if self.positions.contains_key(&key) {
            return Err(Status::AlreadyExists.into());
        }
        let slot = self
            .tiles
            .iter()
            .position(Option::is_none)
            .ok_or(Error::from(Status::OutOfMemory))?;

        tile.salt = self.salts[slot];
        tile.links.clear();
        for poly in &mut tile.polys {
            poly.first_link = None;
        }
        self.tiles[slot] = Some(tile);
        self.positions.insert(key, slot);

        self.relink_around(key);
        debug!("Added tile ({}, {}) in slot {}", key.0, key.1, slot);
        Ok(self.poly_ref(slot, 0))
    }

    /// Detaches the tile at `(x, y)` and returns it without links.
    pub fn remove_tile(&mut self, x: i32, y: i32) -> Result<MeshTile> {
        let slot = self
            .positions
            .remove(&(x, y))
            .ok_or(Error::from(Status::NotFound))?;
        let mut tile = self.tiles[slot].take().ok_or(Error::from(Status::NavMeshInvalid))?;

        let salt = (self.salts[slot] + 1) & DT_SALT_MASK;
        self.salts[slot] = if salt == 0 { 1 } else { salt };

        tile.links.clear();
        for poly in &mut tile.polys {
            poly.first_link = None;
        }
        self.relink_around((x, y));
        debug!("Removed tile ({}, {}) from slot {}", x, y, slot);
        Ok(tile)
    }

    fn relink_around(&mut self, (x, y): (i32, i32)) {
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (-1, 0), (0, -1)] {
            if let Some(&slot) = self.positions.get(&(x + dx, y + dy)) {
                self.rebuild_links(slot);
            }
        }
    }

    /// Recomputes every link of the tile in `slot`
    fn rebuild_links(&mut self, slot: usize) {
        let Some(tile) = self.tiles[slot].as_ref() else {
            return;
        };

        let mut links = Vec::new();
        let mut heads = vec![None; tile.polys.len()];
        for (pi, poly) in tile.polys.iter().enumerate() {
            let start = links.len();
            let n = poly.vert_count as usize;
            for e in 0..n {
                let nei = poly.neis[e];
                if nei == 0 {
                    continue;
                }
                if nei & EXT_LINK == 0 {
                    links.push(Link {
                        reference: self.poly_ref(slot, (nei - 1) as usize),
                        next: None,
                        edge: e as u8,
                        side: LINK_INTERNAL,
                        bmin: 0,
                        bmax: 255,
                    });
                    continue;
                }

                let side = (nei & 0xff) as u8;
                let (dx, dy) = side_offset(side);
                let Some(&nslot) = self.positions.get(&(tile.header.x + dx, tile.header.y + dy)) else {
                    continue;
                };
                let va = tile.verts[poly.verts[e] as usize];
                let vb = tile.verts[poly.verts[(e + 1) % n] as usize];
                for (reference, tmin, tmax) in self.find_connecting_polys(va, vb, nslot, opposite_side(side)) {
                    let (ea, eb) = if is_x_side(side) { (va.z, vb.z) } else { (va.x, vb.x) };
                    let mut t0 = (tmin - ea) / (eb - ea);
                    let mut t1 = (tmax - ea) / (eb - ea);
                    if t0 > t1 {
                        std::mem::swap(&mut t0, &mut t1);
                    }
                    links.push(Link {
                        reference,
                        next: None,
                        edge: e as u8,
                        side,
                        bmin: (t0.clamp(0.0, 1.0) * 255.0).round() as u8,
                        bmax: (t1.clamp(0.0, 1.0) * 255.0).round() as u8,
                    });
                }
            }

            let end = links.len();
            if end > start {
                for i in start..end - 1 {
                    links[i].next = Some((i + 1) as u32);
                }
                heads[pi] = Some(start as u32);
            }
        }

        trace!("Rebuilt {} links for tile slot {}", links.len(), slot);
        if let Some(tile) = self.tiles[slot].as_mut() {
            for (poly, head) in tile.polys.iter_mut().zip(heads) {
                poly.first_link = head;
            }
            tile.links = links;
        }
    }

    /// Polygons of the tile in `slot` with a border edge on `side` that
    /// overlaps the edge `va..vb`, with the overlap interval along the border
    fn find_connecting_polys(&self, va: Vec3, vb: Vec3, slot: usize, side: u8) -> Vec<(PolyRef, f32, f32)> {
        let Some(tile) = self.tiles[slot].as_ref() else {
            return Vec::new();
        };
        let (amin, amax) = slab_end_points(va, vb, side);
        let apos = slab_coord(va, side);
        let wanted = EXT_LINK | side as u16;

        let mut result = Vec::new();
        for (pi, poly) in tile.polys.iter().enumerate() {
            let n = poly.vert_count as usize;
            for e in 0..n {
                if poly.neis[e] != wanted {
                    continue;
                }
                let vc = tile.verts[poly.verts[e] as usize];
                let vd = tile.verts[poly.verts[(e + 1) % n] as usize];
                if (apos - slab_coord(vc, side)).abs() > PORTAL_PLANE_EPS {
                    continue;
                }
                let (bmin, bmax) = slab_end_points(vc, vd, side);
                if !overlap_slabs(amin, amax, bmin, bmax, PORTAL_PLANE_EPS, tile.header.walkable_climb) {
                    continue;
                }
                result.push((self.poly_ref(slot, pi), amin[0].max(bmin[0]), amax[0].min(bmax[0])));
                break;
            }
        }
        result
    }

    #[inline]
    fn poly_ref(&self, slot: usize, poly: usize) -> PolyRef {
        encode_poly_ref_with_salt(self.salts[slot], slot as u32 + 1, poly as u32)
    }

    /// Resolves a reference to its tile and polygon index
    pub fn tile_and_poly(&self, reference: PolyRef) -> Result<(&MeshTile, usize)> {
        let (salt, tile_id, poly) = decode_poly_ref_full(reference);
        if tile_id == 0 {
            return Err(Status::InvalidParam.into());
        }
        let tile = self
            .tiles
            .get(tile_id as usize - 1)
            .and_then(Option::as_ref)
            .ok_or(Error::from(Status::NotFound))?;
        if tile.salt != salt || poly as usize >= tile.polys.len() {
            return Err(Status::InvalidParam.into());
        }
        Ok((tile, poly as usize))
    }

    pub fn is_valid_poly_ref(&self, reference: PolyRef) -> bool {
        self.tile_and_poly(reference).is_ok()
    }

    /// Tile at grid location `(x, y)`
    pub fn tile_at(&self, x: i32, y: i32) -> Option<&MeshTile> {
        let slot = *self.positions.get(&(x, y))?;
        self.tiles[slot].as_ref()
    }

    /// Reference of the first polygon of the tile at `(x, y)`
    pub fn tile_ref_base(&self, x: i32, y: i32) -> Option<PolyRef> {
        let slot = *self.positions.get(&(x, y))?;
        Some(self.poly_ref(slot, 0))
    }

    /// Attached tiles in slot order
    pub fn tiles(&self) -> impl Iterator<Item = &MeshTile> + '_ {
        self.tiles.iter().flatten()
    }

    pub fn tile_count(&self) -> usize {
        self.positions.len()
    }

    pub fn poly_count(&self) -> usize {
        self.tiles().map(|t| t.polys.len()).sum()
    }

    /// References of all polygons whose bounds overlap `bounds`, ordered by
    /// tile location and polygon index
    pub fn query_polygons(&self, bounds: &Aabb) -> Vec<PolyRef> {
        let (minx, miny) = self.calc_tile_loc(bounds.min);
        let (maxx, maxy) = self.calc_tile_loc(bounds.max);

        let mut result = Vec::new();
        for y in miny..=maxy {
            for x in minx..=maxx {
                let Some(&slot) = self.positions.get(&(x, y)) else {
                    continue;
                };
                let Some(tile) = self.tiles[slot].as_ref() else {
                    continue;
                };
                if !Aabb::new(tile.header.bmin, tile.header.bmax).intersects(bounds) {
                    continue;
                }
                for pi in 0..tile.polys.len() {
                    if tile.poly_bounds(pi).intersects(bounds) {
                        result.push(self.poly_ref(slot, pi));
                    }
                }
            }
        }
        result
    }

    /// Closest point on polygon `reference` to `pos`, and whether `pos`
    /// projects onto the polygon's interior
    pub fn closest_point_on_poly(&self, reference: PolyRef, pos: Vec3) -> Result<(Vec3, bool)> {
        let (tile, pi) = self.tile_and_poly(reference)?;
        if let Some(h) = tile.poly_height(pi, pos) {
            return Ok((Vec3::new(pos.x, h, pos.z), true));
        }
        Ok((closest_point_on_polygon_2d(pos, &tile.poly_verts(pi)), false))
    }

    /// Height of polygon `reference` at the xz location of `pos`, or `None`
    /// when `pos` lies outside it
    pub fn poly_height(&self, reference: PolyRef, pos: Vec3) -> Result<Option<f32>> {
        let (tile, pi) = self.tile_and_poly(reference)?;
        Ok(tile.poly_height(pi, pos))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const SIZE: f32 = 10.0;

    fn header(x: i32, y: i32) -> TileHeader {
        TileHeader {
            x,
            y,
            walkable_height: 2.0,
            walkable_radius: 0.5,
            walkable_climb: 0.5,
            bmin: Vec3::new(x as f32 * SIZE, -1.0, y as f32 * SIZE),
            bmax: Vec3::new((x + 1) as f32 * SIZE, 1.0, (y + 1) as f32 * SIZE),
        }
    }

    /// Builds a tile out of axis aligned rectangles given as `(x0, z0, x1, z1)`
    /// with explicit neighbour slots per edge
    pub(crate) fn tile_from_rects(x: i32, y: i32, rects: &[([f32; 4], [u16; 4])]) -> MeshTile {
        let mut tile = MeshTile {
            header: header(x, y),
            verts: Vec::new(),
            polys: Vec::new(),
            detail_meshes: Vec::new(),
            detail_verts: Vec::new(),
            detail_tris: Vec::new(),
            links: Vec::new(),
            salt: 0,
        };
        for (i, ([x0, z0, x1, z1], neis)) in rects.iter().enumerate() {
            let base = tile.verts.len() as u16;
            tile.verts.extend([
                Vec3::new(*x0, 0.0, *z0),
                Vec3::new(*x0, 0.0, *z1),
                Vec3::new(*x1, 0.0, *z1),
                Vec3::new(*x1, 0.0, *z0),
            ]);
            let mut poly = Poly {
                vert_count: 4,
                area: 63,
                ..Default::default()
            };
            for k in 0..4 {
                poly.verts[k] = base + k as u16;
                poly.neis[k] = neis[k];
            }
            tile.polys.push(poly);
            tile.detail_meshes.push(PolyDetail {
                vert_base: 0,
                tri_base: (i * 2) as u32,
                vert_count: 0,
                tri_count: 2,
            });
            tile.detail_tris.extend([[0, 1, 2, 0], [0, 2, 3, 0]]);
        }
        tile
    }

    /// Single square polygon covering the whole tile, open on every side
    pub(crate) fn square_tile(x: i32, y: i32) -> MeshTile {
        let x0 = x as f32 * SIZE;
        let z0 = y as f32 * SIZE;
        tile_from_rects(
            x,
            y,
            &[(
                [x0, z0, x0 + SIZE, z0 + SIZE],
                [
                    EXT_LINK | SIDE_NEG_X,
                    EXT_LINK | SIDE_POS_Z,
                    EXT_LINK | SIDE_POS_X,
                    EXT_LINK | SIDE_NEG_Z,
                ],
            )],
        )
    }

    pub(crate) fn params(max_tiles: u32) -> NavMeshParams {
        NavMeshParams {
            origin: Vec3::ZERO,
            tile_width: SIZE,
            tile_height: SIZE,
            max_tiles,
            max_polys: 64,
        }
    }

    #[test]
    fn test_poly_ref_packing() {
        let r = encode_poly_ref_with_salt(5, 17, 300);
        assert_eq!(decode_poly_ref_full(r), (5, 17, 300));
        assert!(r.is_valid());
        assert!(!PolyRef::default().is_valid());
    }

    #[test]
    fn test_adjacent_tiles_are_linked() {
        let mut mesh = NavMesh::new(params(4)).unwrap();
        let a = mesh.add_tile(square_tile(0, 0)).unwrap();
        let b = mesh.add_tile(square_tile(1, 0)).unwrap();

        let (tile_a, _) = mesh.tile_and_poly(a).unwrap();
        let links: Vec<_> = tile_a.links_of(0).collect();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].reference, b);
        assert_eq!(links[0].side, SIDE_POS_X as u8);
        assert_eq!((links[0].bmin, links[0].bmax), (0, 255));

        let (tile_b, _) = mesh.tile_and_poly(b).unwrap();
        assert_eq!(tile_b.links_of(0).next().map(|l| l.reference), Some(a));
    }

    #[test]
    fn test_partial_portals_are_quantized() {
        let mut mesh = NavMesh::new(params(4)).unwrap();
        let a = mesh.add_tile(square_tile(0, 0)).unwrap();
        mesh.add_tile(tile_from_rects(
            1,
            0,
            &[
                ([10.0, 0.0, 20.0, 5.0], [EXT_LINK | SIDE_NEG_X, 2, 0, 0]),
                ([10.0, 5.0, 20.0, 10.0], [EXT_LINK | SIDE_NEG_X, 0, 0, 1]),
            ],
        ))
        .unwrap();

        let (tile_a, _) = mesh.tile_and_poly(a).unwrap();
        let mut ranges: Vec<_> = tile_a.links_of(0).map(|l| (l.bmin, l.bmax)).collect();
        ranges.sort();
        // Edge runs from z = 10 down to z = 0
        assert_eq!(ranges, vec![(0, 128), (128, 255)]);
    }

    #[test]
    fn test_remove_tile_invalidates_refs_and_links() {
        let mut mesh = NavMesh::new(params(4)).unwrap();
        let a = mesh.add_tile(square_tile(0, 0)).unwrap();
        let b = mesh.add_tile(square_tile(1, 0)).unwrap();

        mesh.remove_tile(1, 0).unwrap();
        assert!(!mesh.is_valid_poly_ref(b));
        let (tile_a, _) = mesh.tile_and_poly(a).unwrap();
        assert_eq!(tile_a.links_of(0).count(), 0);

        let b2 = mesh.add_tile(square_tile(1, 0)).unwrap();
        assert_ne!(b, b2);
        assert!(mesh.is_valid_poly_ref(b2));
        assert!(!mesh.is_valid_poly_ref(b));
    }

    #[test]
    fn test_slots_and_locations_are_exclusive() {
        let mut mesh = NavMesh::new(params(1)).unwrap();
        mesh.add_tile(square_tile(0, 0)).unwrap();
        assert!(mesh.add_tile(square_tile(0, 0)).is_err());
        assert!(mesh.add_tile(square_tile(1, 0)).is_err());
        assert!(mesh.remove_tile(3, 3).is_err());
        assert!(NavMesh::new(params(2000)).is_err());
    }

    #[test]
    fn test_query_and_closest_point() {
        let mut mesh = NavMesh::new(params(4)).unwrap();
        mesh.add_tile(square_tile(0, 0)).unwrap();
        let b = mesh.add_tile(square_tile(1, 0)).unwrap();

        let probe = Aabb::from_center_half_extents(Vec3::new(15.0, 0.0, 5.0), Vec3::splat(1.0));
        assert_eq!(mesh.query_polygons(&probe), vec![b]);

        let (p, over) = mesh.closest_point_on_poly(b, Vec3::new(15.0, 3.0, 5.0)).unwrap();
        assert!(over);
        assert!(p.y.abs() < 1e-5);

        let (p, over) = mesh.closest_point_on_poly(b, Vec3::new(25.0, 0.0, 5.0)).unwrap();
        assert!(!over);
        assert!((p.x - 20.0).abs() < 1e-5);
        assert_eq!(mesh.poly_height(b, Vec3::new(25.0, 0.0, 5.0)).unwrap(), None);
    }

    #[test]
    fn test_height_off_detail_triangles_comes_from_surface() {
        let mut tile = tile_from_rects(0, 0, &[([0.0, 0.0, SIZE, SIZE], [0; 4])]);
        for v in &mut tile.verts {
            v.y = 2.0;
        }

        // Only the triangle above the diagonal is left, so (8, 2) misses every detail triangle
        tile.detail_meshes[0].tri_count = 1;
        let h = tile.poly_height(0, Vec3::new(8.0, 50.0, 2.0)).unwrap();
        assert!((h - 2.0).abs() < 1e-5);
        let p = tile.closest_detail_edge_point(0, Vec3::new(8.0, 50.0, 2.0));
        assert!((p.x - 5.0).abs() < 1e-5 && (p.z - 5.0).abs() < 1e-5);

        // Without detail triangles the polygon boundary gives the height
        tile.detail_meshes[0].tri_count = 0;
        let h = tile.poly_height(0, Vec3::new(5.0, -30.0, 5.0)).unwrap();
        assert!((h - 2.0).abs() < 1e-5);

        // On the shared diagonal of the full detail mesh
        tile.detail_meshes[0].tri_count = 2;
        let h = tile.poly_height(0, Vec3::new(4.0, 50.0, 4.0)).unwrap();
        assert!((h - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_tile_location() {
        let mesh = NavMesh::new(params(4)).unwrap();
        assert_eq!(mesh.calc_tile_loc(Vec3::new(10.0, 0.0, 9.99)), (1, 0));
        assert_eq!(mesh.calc_tile_loc(Vec3::new(-0.1, 0.0, 0.0)), (-1, 0));
    }
}
