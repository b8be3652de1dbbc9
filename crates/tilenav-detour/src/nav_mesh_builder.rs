//! Conversion of generated polygon meshes into navmesh tiles
//!
//! Grid coordinates are turned into world positions, neighbour slots are
//! renumbered to the tile convention and detail meshes are stored without the
//! polygon corners they share with the tile vertices.

use glam::Vec3;
use log::debug;
use tilenav_common::{Error, Result};
use tilenav_recast::{PolyMesh, PolyMeshDetail, MESH_NULL_IDX, NULL_AREA, PORTAL_FLAG};

use crate::nav_mesh::{MeshTile, Poly, PolyDetail, TileHeader};
use crate::{EXT_LINK, MAX_VERTS_PER_POLY, POLY_FLAG_WALK};

/// Placement and agent settings stamped into a tile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBuildParams {
    pub tile_x: i32,
    pub tile_y: i32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
}

/// Builds a world-space tile from a polygon mesh and its detail mesh.
pub fn create_tile(mesh: &PolyMesh, detail: &PolyMeshDetail, params: &TileBuildParams) -> Result<MeshTile> {
    if detail.meshes.len() != mesh.npolys {
        return Err(Error::NavMeshGeneration(format!(
            "Detail mesh has {} entries for {} polygons",
            detail.meshes.len(),
            mesh.npolys
        )));
    }

    let verts: Vec<Vec3> = mesh
        .verts
        .iter()
        .map(|v| {
            Vec3::new(
                mesh.bmin.x + v[0] as f32 * mesh.cs,
                mesh.bmin.y + v[1] as f32 * mesh.ch,
                mesh.bmin.z + v[2] as f32 * mesh.cs,
            )
        })
        .collect();

    let mut polys = Vec::with_capacity(mesh.npolys);
    let mut detail_meshes = Vec::with_capacity(mesh.npolys);
    let mut detail_verts = Vec::new();
    let mut detail_tris = Vec::new();

    for p in 0..mesh.npolys {
        let indices = mesh.poly(p);
        if indices.len() > MAX_VERTS_PER_POLY {
            return Err(Error::NavMeshGeneration(format!(
                "Polygon {} has {} vertices, at most {} are supported",
                p,
                indices.len(),
                MAX_VERTS_PER_POLY
            )));
        }

        let area = mesh.areas[p];
        let mut poly = Poly {
            flags: if area == NULL_AREA { 0 } else { POLY_FLAG_WALK },
            region: mesh.regs[p],
            vert_count: indices.len() as u8,
            area,
            ..Default::default()
        };
        for (k, (&v, &nei)) in indices.iter().zip(mesh.neighbours(p)).enumerate() {
            poly.verts[k] = v;
            poly.neis[k] = if nei == MESH_NULL_IDX {
                0
            } else if nei & PORTAL_FLAG != 0 {
                EXT_LINK | (nei & 0xf)
            } else {
                nei + 1
            };
        }
        polys.push(poly);

        let (sub_verts, sub_tris) = detail.sub_mesh(p);
        let extra = sub_verts.get(indices.len()..).unwrap_or(&[]);
        if extra.len() > u8::MAX as usize || sub_tris.len() > u8::MAX as usize {
            return Err(Error::NavMeshGeneration(format!(
                "Detail mesh of polygon {} has {} vertices and {} triangles, at most 255 of each are supported",
                p,
                extra.len(),
                sub_tris.len()
            )));
        }
        detail_meshes.push(PolyDetail {
            vert_base: detail_verts.len() as u32,
            tri_base: detail_tris.len() as u32,
            vert_count: extra.len() as u8,
            tri_count: sub_tris.len() as u8,
        });
        detail_verts.extend_from_slice(extra);
        detail_tris.extend_from_slice(sub_tris);
    }

    debug!(
        "Created tile ({}, {}) with {} polygons and {} detail triangles",
        params.tile_x,
        params.tile_y,
        polys.len(),
        detail_tris.len()
    );

    Ok(MeshTile {
        header: TileHeader {
            x: params.tile_x,
            y: params.tile_y,
            walkable_height: params.walkable_height,
            walkable_radius: params.walkable_radius,
            walkable_climb: params.walkable_climb,
            bmin: mesh.bmin,
            bmax: mesh.bmax,
        },
        verts,
        polys,
        detail_meshes,
        detail_verts,
        detail_tris,
        links: Vec::new(),
        salt: 0,
    })
}
