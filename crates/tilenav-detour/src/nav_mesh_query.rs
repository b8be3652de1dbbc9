//! Queries over a [`NavMesh`]
//!
//! Nearest polygon lookup, A* corridor search across polygon links and
//! funnel string pulling of the resulting corridor.

use glam::Vec3;
use log::{debug, trace};
use tilenav_common::{closest_point_on_polygon_2d, dist_point_segment_sqr_2d, tri_area_2d, Aabb, Error, Result};

use crate::nav_mesh::{Link, MeshTile, NavMesh};
use crate::node_pool::{NodeFlags, NodePool, NodeQueue, DT_NULL_IDX};
use crate::{PolyRef, Status, LINK_INTERNAL};

/// Heuristic scale slightly below one keeps the search admissible
const H_SCALE: f32 = 0.999;

/// Squared distance under which two waypoints are the same point
const VEQUAL_EPS_SQR: f32 = (1.0 / 16384.0) * (1.0 / 16384.0);

/// Start points this close to the first portal skip it
const PORTAL_SKIP_EPS_SQR: f32 = 0.001 * 0.001;

#[inline]
fn vequal(a: Vec3, b: Vec3) -> bool {
    a.distance_squared(b) < VEQUAL_EPS_SQR
}

/// Portal segment of `link`, narrowed to the shared part of a tile border edge
fn link_portal(tile: &MeshTile, poly: usize, link: &Link) -> (Vec3, Vec3) {
    let p = &tile.polys[poly];
    let e = link.edge as usize;
    let v0 = tile.verts[p.verts[e] as usize];
    let v1 = tile.verts[p.verts[(e + 1) % p.vert_count as usize] as usize];
    if link.side != LINK_INTERNAL && (link.bmin != 0 || link.bmax != 255) {
        let s = 1.0 / 255.0;
        (v0.lerp(v1, link.bmin as f32 * s), v0.lerp(v1, link.bmax as f32 * s))
    } else {
        (v0, v1)
    }
}

/// Search state for one navmesh
#[derive(Debug)]
pub struct NavMeshQuery<'a> {
    nav_mesh: &'a NavMesh,
    node_pool: NodePool,
    open_list: NodeQueue,
}

impl<'a> NavMeshQuery<'a> {
    /// Creates a query that explores at most `max_nodes` polygons per search
    pub fn new(nav_mesh: &'a NavMesh, max_nodes: usize) -> Self {
        Self {
            nav_mesh,
            node_pool: NodePool::new(max_nodes.max(1)),
            open_list: NodeQueue::new(),
        }
    }

    pub fn nav_mesh(&self) -> &NavMesh {
        self.nav_mesh
    }

    /// Polygon nearest to `center` among those overlapping the box
    /// `center ± half_extents`, with the closest point on it.
    ///
    /// Points above or below a polygon within climb height count as lying on it.
    pub fn find_nearest_poly(&self, center: Vec3, half_extents: Vec3) -> Result<Option<(PolyRef, Vec3)>> {
        let bounds = Aabb::from_center_half_extents(center, half_extents);
        let mut best: Option<(PolyRef, Vec3)> = None;
        let mut best_dist = f32::MAX;

        for reference in self.nav_mesh.query_polygons(&bounds) {
            let (closest, over_poly) = self.nav_mesh.closest_point_on_poly(reference, center)?;
            let diff = center - closest;
            let d = if over_poly {
                let (tile, _) = self.nav_mesh.tile_and_poly(reference)?;
                let d = diff.y.abs() - tile.header.walkable_climb;
                if d > 0.0 {
                    d * d
                } else {
                    0.0
                }
            } else {
                diff.length_squared()
            };
            if d < best_dist {
                best_dist = d;
                best = Some((reference, closest));
            }
        }
        Ok(best)
    }

    /// Portal shared by two linked polygons, as `(left, right)` seen from `from`
    pub fn portal_points(&self, from: PolyRef, to: PolyRef) -> Result<(Vec3, Vec3)> {
        let (tile, poly) = self.nav_mesh.tile_and_poly(from)?;
        let link = tile
            .links_of(poly)
            .find(|l| l.reference == to)
            .ok_or(Error::Detour(format!("{}: {} is not linked to {}", Status::InvalidParam, from, to)))?;
        Ok(link_portal(tile, poly, link))
    }

    /// Polygon corridor from `start_ref` to `end_ref`.
    ///
    /// Returns an empty corridor when the goal is unreachable or the search
    /// runs out of nodes.
    pub fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
    ) -> Result<Vec<PolyRef>> {
        if !self.nav_mesh.is_valid_poly_ref(start_ref) || !self.nav_mesh.is_valid_poly_ref(end_ref) {
            return Err(Status::InvalidParam.into());
        }
        if start_ref == end_ref {
            return Ok(vec![start_ref]);
        }

        let nav_mesh = self.nav_mesh;
        self.node_pool.clear();
        self.open_list.clear();

        let start_idx = self
            .node_pool
            .get_node(start_ref)
            .ok_or(Error::from(Status::OutOfMemory))?;
        {
            let start = self.node_pool.node_mut(start_idx);
            start.pos = start_pos;
            start.cost = 0.0;
            start.total = start_pos.distance(end_pos) * H_SCALE;
            start.flags.insert(NodeFlags::OPEN);
        }
        self.open_list.push(start_idx, self.node_pool.node(start_idx).total);

        while let Some(best_idx) = self.open_list.pop() {
            let (best_ref, best_pos, best_cost, parent_ref) = {
                let best = self.node_pool.node_mut(best_idx);
                best.flags.remove(NodeFlags::OPEN);
                best.flags.insert(NodeFlags::CLOSED);
                (best.id, best.pos, best.cost, best.pidx)
            };
            if best_ref == end_ref {
                let path = self.reconstruct(best_idx);
                trace!("Found corridor of {} polygons", path.len());
                return Ok(path);
            }
            let parent_ref = (parent_ref != DT_NULL_IDX).then(|| self.node_pool.node(parent_ref).id);

            let (tile, poly) = nav_mesh.tile_and_poly(best_ref)?;
            for link in tile.links_of(poly) {
                let neighbour_ref = link.reference;
                if !neighbour_ref.is_valid() || Some(neighbour_ref) == parent_ref {
                    continue;
                }
                let Some(neighbour_idx) = self.node_pool.get_node(neighbour_ref) else {
                    debug!(
                        "Path search stopped after {} nodes",
                        self.node_pool.node_count()
                    );
                    return Ok(Vec::new());
                };

                let neighbour = self.node_pool.node(neighbour_idx);
                let flags = neighbour.flags;
                let pos = if flags == NodeFlags::default() {
                    let (left, right) = link_portal(tile, poly, link);
                    (left + right) * 0.5
                } else {
                    neighbour.pos
                };

                let (cost, heuristic) = if neighbour_ref == end_ref {
                    (best_cost + best_pos.distance(pos) + pos.distance(end_pos), 0.0)
                } else {
                    (best_cost + best_pos.distance(pos), pos.distance(end_pos) * H_SCALE)
                };
                let total = cost + heuristic;

                if (flags.contains(NodeFlags::OPEN) || flags.contains(NodeFlags::CLOSED))
                    && total >= neighbour.total
                {
                    continue;
                }

                let node = self.node_pool.node_mut(neighbour_idx);
                node.pos = pos;
                node.pidx = best_idx;
                node.cost = cost;
                node.total = total;
                node.flags.remove(NodeFlags::CLOSED);
                if flags.contains(NodeFlags::OPEN) {
                    self.open_list.modify(neighbour_idx, total);
                } else {
                    node.flags.insert(NodeFlags::OPEN);
                    self.open_list.push(neighbour_idx, total);
                }
            }
        }

        trace!("No corridor from {} to {}", start_ref, end_ref);
        Ok(Vec::new())
    }

    fn reconstruct(&self, mut idx: u16) -> Vec<PolyRef> {
        let mut path = Vec::new();
        while idx != DT_NULL_IDX {
            let node = self.node_pool.node(idx);
            path.push(node.id);
            idx = node.pidx;
        }
        path.reverse();
        path
    }

    /// `pos` when it projects inside the polygon, otherwise the nearest point
    /// on its boundary
    fn closest_point_on_poly_boundary(&self, reference: PolyRef, pos: Vec3) -> Result<Vec3> {
        let (tile, poly) = self.nav_mesh.tile_and_poly(reference)?;
        Ok(closest_point_on_polygon_2d(pos, &tile.poly_verts(poly)))
    }

    /// Waypoints along the corridor `path`, pulled taut around its corners.
    ///
    /// Consecutive duplicates are dropped, so a corridor whose start and end
    /// coincide yields a single waypoint.
    pub fn find_straight_path(&self, start_pos: Vec3, end_pos: Vec3, path: &[PolyRef]) -> Result<Vec<Vec3>> {
        let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
            return Err(Status::InvalidParam.into());
        };

        let mut points: Vec<Vec3> = Vec::new();
        let append = |points: &mut Vec<Vec3>, p: Vec3| {
            if points.last().map_or(true, |&q| !vequal(q, p)) {
                points.push(p);
            }
        };

        let start = self.closest_point_on_poly_boundary(first, start_pos)?;
        let end = self.closest_point_on_poly_boundary(last, end_pos)?;
        append(&mut points, start);

        if path.len() > 1 {
            let mut apex = start;
            let mut portal_left = start;
            let mut portal_right = start;
            let mut apex_index = 0;
            let mut left_index = 0;
            let mut right_index = 0;

            let mut i = 0;
            while i < path.len() {
                let (left, right) = if i + 1 < path.len() {
                    match self.portal_points(path[i], path[i + 1]) {
                        Ok(portal) => portal,
                        Err(_) => {
                            // The rest of the corridor is unusable; stop at the last good polygon
                            let end = self.closest_point_on_poly_boundary(path[i], end_pos)?;
                            append(&mut points, end);
                            return Ok(points);
                        }
                    }
                } else {
                    (end, end)
                };

                if i == 0 && i + 1 < path.len() {
                    let (d, _) = dist_point_segment_sqr_2d(apex, left, right);
                    if d < PORTAL_SKIP_EPS_SQR {
                        i += 1;
                        continue;
                    }
                }

                if tri_area_2d(apex, portal_right, right) <= 0.0 {
                    if vequal(apex, portal_right) || tri_area_2d(apex, portal_left, right) > 0.0 {
                        portal_right = right;
                        right_index = i;
                    } else {
                        apex = portal_left;
                        apex_index = left_index;
                        append(&mut points, apex);
                        portal_left = apex;
                        portal_right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                if tri_area_2d(apex, portal_left, left) >= 0.0 {
                    if vequal(apex, portal_left) || tri_area_2d(apex, portal_right, left) < 0.0 {
                        portal_left = left;
                        left_index = i;
                    } else {
                        apex = portal_right;
                        apex_index = right_index;
                        append(&mut points, apex);
                        portal_left = apex;
                        portal_right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                i += 1;
            }
        }

        append(&mut points, end);
        Ok(points)
    }
}
