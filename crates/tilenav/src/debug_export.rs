//! Triangle buffers for drawing navmesh tiles

use std::collections::HashMap;

use tilenav_common::debug::{Color, DebugColors, DebugMesh};
use tilenav_detour::MeshTile;

use crate::tile_store::TileCoord;

/// Opacity of exported polygon colours
const POLY_ALPHA: f32 = 0.75;

/// Flat triangle list of a tile's detail mesh, coloured by region
pub fn tile_debug_mesh(tile: &MeshTile) -> DebugMesh {
    let mut mesh = DebugMesh::new();
    for (i, poly) in tile.polys.iter().enumerate() {
        let color = region_color(poly.region);
        for [a, b, c] in tile.detail_triangles(i) {
            mesh.triangle(a.to_array(), b.to_array(), c.to_array(), color);
        }
    }
    mesh
}

/// Lazily built debug meshes, one per tile
#[derive(Debug, Default)]
pub struct DebugExporter {
    cache: HashMap<TileCoord, DebugMesh>,
}

impl DebugExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Debug mesh of `tile`, built on first request and cached until
    /// [`invalidate`](Self::invalidate) is called for `coord`
    pub fn mesh_for(&mut self, coord: TileCoord, tile: &MeshTile) -> &DebugMesh {
        self.cache.entry(coord).or_insert_with(|| tile_debug_mesh(tile))
    }

    /// Drops the cached mesh of one tile
    pub fn invalidate(&mut self, coord: TileCoord) {
        self.cache.remove(&coord);
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn is_cached(&self, coord: TileCoord) -> bool {
        self.cache.contains_key(&coord)
    }
}

/// Colour used for polygons of `region`; region 0 gets the plain walkable colour
pub fn region_color(region: u16) -> Color {
    DebugColors::region_color(region, POLY_ALPHA)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{TriangleSoup, WorldGeometry};
    use crate::params::BuildParameters;
    use crate::tile_store::{build_tile_data, TileGrid};

    fn tile() -> MeshTile {
        let geometry = WorldGeometry::from_source(&TriangleSoup::plane([0.0, 0.0], [10.0, 10.0], 0.0)).unwrap();
        let params = BuildParameters::default()
            .with_cell_size(0.5, 0.2)
            .with_tile_size(10.0);
        let grid = TileGrid::new(*geometry.bounds(), &params);
        build_tile_data(&geometry, &grid, &params, TileCoord::new(0, 0), &[])
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_mesh_has_detail_triangles() {
        let tile = tile();
        let mesh = tile_debug_mesh(&tile);
        let expected: usize = (0..tile.polys.len()).map(|i| tile.detail_triangles(i).count()).sum();
        assert_eq!(mesh.triangle_count(), expected);
        assert_eq!(mesh.indices.len(), expected * 3);
        assert_eq!(mesh.colors.len(), mesh.positions.len());
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.positions.len()));
        assert!(mesh.colors.contains(&region_color(tile.polys[0].region)));
    }

    #[test]
    fn test_cache_invalidation() {
        let tile = tile();
        let coord = TileCoord::new(0, 0);
        let mut exporter = DebugExporter::new();
        assert!(!exporter.is_cached(coord));
        let count = exporter.mesh_for(coord, &tile).triangle_count();
        assert!(count > 0);
        assert!(exporter.is_cached(coord));

        exporter.invalidate(TileCoord::new(1, 0));
        assert!(exporter.is_cached(coord));
        exporter.invalidate(coord);
        assert!(!exporter.is_cached(coord));
    }
}
