//! Navigation mesh generation for a single tile
//!
//! Turns a triangle soup into a convex polygon mesh plus a detail height
//! mesh: the geometry is voxelized, filtered for the agent, partitioned into
//! regions, traced into contours and finally triangulated and merged into
//! polygons. Boxes passed as blockers carve unwalkable holes into the result.

mod area;
mod compact_heightfield;
mod config;
mod contour;
mod detail_mesh;
mod distance_field;
mod heightfield;
mod polygon;
mod polymesh;
mod rasterization;
mod watershed;

use glam::Vec3;
use log::debug;
use tilenav_common::{Aabb, Error, Result};

pub use area::{erode_walkable_area, mark_box_area};
pub use compact_heightfield::{CompactCell, CompactHeightfield, CompactSpan, BORDER_REG, NOT_CONNECTED};
pub use config::{field_cell_count, RecastConfig, MAX_FIELD_CELLS};
pub use contour::{Contour, ContourSet};
pub use detail_mesh::{PolyMeshDetail, DETAIL_EDGE_BOUNDARY};
pub use distance_field::build_distance_field;
pub use heightfield::{Heightfield, Span};
pub use polymesh::{
    PolyMesh, MESH_NULL_IDX, PORTAL_FLAG, SIDE_NEG_X, SIDE_NEG_Z, SIDE_POS_X, SIDE_POS_Z,
};
pub use rasterization::{mark_walkable_triangles, rasterize_triangle, rasterize_triangles, triangle_slope_degrees};
pub use watershed::build_regions;

/// Area id of unwalkable spans
pub const NULL_AREA: u8 = 0;

/// Area id of walkable spans
pub const WALKABLE_AREA: u8 = 63;

/// Output of a tile build
#[derive(Debug, Clone)]
pub struct TileMeshes {
    pub poly_mesh: PolyMesh,
    pub detail_mesh: PolyMeshDetail,
}

/// Runs the full generation pipeline for one tile
#[derive(Debug, Clone)]
pub struct RecastBuilder {
    config: RecastConfig,
}

impl RecastBuilder {
    pub fn new(config: RecastConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecastConfig {
        &self.config
    }

    /// Builds the polygon and detail meshes of the tile described by the
    /// configuration.
    ///
    /// `blockers` are world-space boxes whose footprint becomes unwalkable.
    /// A box also blocks surfaces up to one climb height below its bottom.
    pub fn build(&self, verts: &[Vec3], tris: &[[u32; 3]], blockers: &[Aabb]) -> Result<TileMeshes> {
        let cfg = &self.config;
        cfg.validate()?;

        if let Some(bad) = tris.iter().flatten().find(|&&i| i as usize >= verts.len()) {
            return Err(Error::InvalidMesh(format!(
                "Triangle index {} out of range for {} vertices",
                bad,
                verts.len()
            )));
        }

        let mut hf = Heightfield::new(cfg.width, cfg.height, cfg.bmin, cfg.bmax, cfg.cs, cfg.ch)?;
        let areas = mark_walkable_triangles(cfg.walkable_slope_angle, verts, tris);
        rasterize_triangles(&mut hf, verts, tris, &areas, cfg.walkable_climb);

        hf.filter_low_hanging_walkable_obstacles(cfg.walkable_climb);
        hf.filter_ledge_spans(cfg.walkable_height, cfg.walkable_climb);
        hf.filter_walkable_low_height_spans(cfg.walkable_height);

        let mut chf = CompactHeightfield::build(cfg.walkable_height, cfg.walkable_climb, &hf);
        drop(hf);

        let mut blocked = 0;
        for b in blockers {
            let mut bounds = *b;
            bounds.min.y -= cfg.walkable_climb as f32 * cfg.ch;
            blocked += mark_box_area(&mut chf, &bounds, NULL_AREA);
        }
        if blocked > 0 {
            debug!("{} blockers removed {} spans", blockers.len(), blocked);
        }

        erode_walkable_area(&mut chf, cfg.walkable_radius);
        build_distance_field(&mut chf);
        build_regions(&mut chf, cfg.border_size, cfg.min_region_area, cfg.merge_region_area)?;

        let cset = ContourSet::build(&chf, cfg.max_simplification_error, cfg.max_edge_len)?;
        let poly_mesh = PolyMesh::build(&cset, cfg.max_vertices_per_polygon as usize)?;
        if poly_mesh.npolys > cfg.max_polys_per_tile {
            return Err(Error::NavMeshGeneration(format!(
                "Tile has {} polygons, limit is {}",
                poly_mesh.npolys, cfg.max_polys_per_tile
            )));
        }

        let detail_mesh = PolyMeshDetail::build(
            &poly_mesh,
            &chf,
            cfg.detail_sample_dist,
            cfg.detail_sample_max_error,
        )?;

        Ok(TileMeshes {
            poly_mesh,
            detail_mesh,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(size: f32) -> (Vec<Vec3>, Vec<[u32; 3]>) {
        let verts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, size),
            Vec3::new(size, 0.0, size),
            Vec3::new(size, 0.0, 0.0),
        ];
        (verts, vec![[0, 1, 2], [0, 2, 3]])
    }

    fn config(size: f32, border: i32) -> RecastConfig {
        let mut cfg = RecastConfig {
            cs: 0.5,
            ch: 0.25,
            walkable_height: 4,
            walkable_climb: 2,
            walkable_radius: 1,
            border_size: border,
            ..Default::default()
        };
        let pad = border as f32 * cfg.cs;
        cfg.calculate_grid_size(Vec3::new(-pad, -1.0, -pad), Vec3::new(size + pad, 2.0, size + pad));
        cfg
    }

    #[test]
    fn test_plane_builds_walkable_polygons() {
        let (verts, tris) = plane(16.0);
        let meshes = RecastBuilder::new(config(16.0, 0)).build(&verts, &tris, &[]).unwrap();
        assert!(meshes.poly_mesh.npolys > 0);
        assert_eq!(meshes.detail_mesh.meshes.len(), meshes.poly_mesh.npolys);
        assert!(meshes.poly_mesh.areas.iter().all(|&a| a == WALKABLE_AREA));
    }

    #[test]
    fn test_tile_border_produces_portals() {
        let (verts, tris) = plane(16.0);
        let meshes = RecastBuilder::new(config(8.0, 3)).build(&verts, &tris, &[]).unwrap();
        let mesh = &meshes.poly_mesh;
        let portals = (0..mesh.npolys)
            .flat_map(|p| mesh.neighbours(p).to_vec())
            .filter(|&n| n != MESH_NULL_IDX && n & PORTAL_FLAG != 0)
            .count();
        assert!(portals >= 4);
    }

    #[test]
    fn test_blocker_removes_area() {
        let (verts, tris) = plane(16.0);
        let builder = RecastBuilder::new(config(16.0, 0));
        let open = builder.build(&verts, &tris, &[]).unwrap();
        let blocker = Aabb::new(Vec3::new(6.0, -0.5, 6.0), Vec3::new(10.0, 2.0, 10.0));
        let blocked = builder.build(&verts, &tris, &[blocker]).unwrap();

        let inside = |m: &TileMeshes| {
            let d = &m.detail_mesh;
            (0..d.meshes.len()).any(|p| {
                let (v, _) = d.sub_mesh(p);
                tilenav_common::point_in_polygon_2d(Vec3::new(8.0, 0.0, 8.0), &v[..m.poly_mesh.poly(p).len()])
            })
        };
        assert!(inside(&open));
        assert!(!inside(&blocked));
    }

    #[test]
    fn test_polygon_limit_is_enforced() {
        let (verts, tris) = plane(16.0);
        let mut cfg = config(16.0, 0);
        cfg.max_polys_per_tile = 0;
        let err = RecastBuilder::new(cfg).build(&verts, &tris, &[]).unwrap_err();
        assert!(matches!(err, Error::NavMeshGeneration(_)));
    }

    #[test]
    fn test_bad_index_is_rejected() {
        let (verts, _) = plane(4.0);
        let err = RecastBuilder::new(config(4.0, 0))
            .build(&verts, &[[0, 1, 7]], &[])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMesh(_)));
    }
}
