//! Tile grid layout, per-tile builds and the live tile set

use std::collections::HashMap;
use std::fmt;

use glam::Vec3;
use log::debug;
use tilenav_common::{Aabb, Result};
use tilenav_detour::{create_tile, MeshTile, NavMesh, NavMeshParams, TileBuildParams};
use tilenav_recast::RecastBuilder;

use crate::geometry::WorldGeometry;
use crate::params::BuildParameters;

/// Position of a tile in the grid; `y` runs along world z
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Build state of one grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileState {
    /// No tile registered
    #[default]
    Absent,
    /// A tile is registered and linked
    Ready,
    /// The last build attempt failed; nothing is registered
    BuildFailed,
}

/// Uniform tile layout over the geometry bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    bounds: Aabb,
    tile_width: f32,
    border: f32,
    y_min: f32,
    y_max: f32,
    width: i32,
    height: i32,
}

impl TileGrid {
    /// Lays out tiles from the corner `bounds.min` with the snapped tile size
    pub fn new(bounds: Aabb, params: &BuildParameters) -> Self {
        let tile_width = params.tile_world_size();
        let size = bounds.size();
        let width = ((size.x / tile_width).ceil() as i32).max(1);
        let height = ((size.z / tile_width).ceil() as i32).max(1);
        Self {
            bounds,
            tile_width,
            border: params.border_world_size(),
            y_min: bounds.min.y - params.cell_height,
            y_max: bounds.max.y + params.agent_height,
            width,
            height,
        }
    }

    /// World position of the corner of tile (0, 0)
    pub fn origin(&self) -> Vec3 {
        self.bounds.min
    }

    /// Geometry bounds the grid was laid out over
    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    pub fn tile_width(&self) -> f32 {
        self.tile_width
    }

    /// Number of tiles along x
    pub fn width(&self) -> i32 {
        self.width
    }

    /// Number of tiles along z
    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn tile_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Tile containing `pos`.
    ///
    /// A point on the edge shared by two tiles belongs to the one with the
    /// larger coordinate. Points outside the grid map to coordinates outside
    /// `0..width` and `0..height`.
    pub fn tile_coord_at(&self, pos: Vec3) -> TileCoord {
        let origin = self.origin();
        TileCoord::new(
            ((pos.x - origin.x) / self.tile_width).floor() as i32,
            ((pos.z - origin.z) / self.tile_width).floor() as i32,
        )
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        (0..self.width).contains(&coord.x) && (0..self.height).contains(&coord.y)
    }

    /// All grid coordinates, row by row
    pub fn coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| TileCoord::new(x, y)))
    }

    /// Area owned by a tile, spanning the full height range
    pub fn tile_bounds(&self, coord: TileCoord) -> Aabb {
        let origin = self.origin();
        let min = Vec3::new(
            origin.x + coord.x as f32 * self.tile_width,
            self.y_min,
            origin.z + coord.y as f32 * self.tile_width,
        );
        let max = Vec3::new(min.x + self.tile_width, self.y_max, min.z + self.tile_width);
        Aabb::new(min, max)
    }

    /// Area voxelized for a tile: its bounds plus the border on x and z
    pub fn voxel_bounds(&self, coord: TileCoord) -> Aabb {
        self.tile_bounds(coord)
            .expanded(Vec3::new(self.border, 0.0, self.border))
    }

    /// Grid tiles whose voxelized area overlaps `area` on the xz plane,
    /// row by row
    pub fn tiles_overlapping(&self, area: &Aabb) -> Vec<TileCoord> {
        if !area.is_finite() {
            return Vec::new();
        }
        let grown = area.expanded(Vec3::new(self.border, 0.0, self.border));
        let lo = self.tile_coord_at(grown.min);
        let hi = self.tile_coord_at(grown.max);

        let mut coords = Vec::new();
        for y in lo.y.max(0)..=hi.y.min(self.height - 1) {
            for x in lo.x.max(0)..=hi.x.min(self.width - 1) {
                let coord = TileCoord::new(x, y);
                if self.voxel_bounds(coord).intersects_xz(area) {
                    coords.push(coord);
                }
            }
        }
        coords
    }
}

/// Runs the generation pipeline for one tile.
///
/// Returns `None` when the tile has no walkable surface. Does not touch any
/// shared state, so tiles can be built on worker threads.
pub fn build_tile_data(
    geometry: &WorldGeometry,
    grid: &TileGrid,
    params: &BuildParameters,
    coord: TileCoord,
    blockers: &[Aabb],
) -> Result<Option<MeshTile>> {
    let bounds = grid.tile_bounds(coord);
    let config = params.to_recast_config(&bounds);
    let voxel_area = Aabb::new(config.bmin, config.bmax);
    let tris = geometry.triangles_in(&voxel_area);
    if tris.is_empty() {
        debug!("Tile {} has no geometry", coord);
        return Ok(None);
    }

    let meshes = RecastBuilder::new(config).build(geometry.vertices(), &tris, blockers)?;
    if meshes.poly_mesh.npolys == 0 {
        debug!("Tile {} has no walkable polygons", coord);
        return Ok(None);
    }

    let tile = create_tile(
        &meshes.poly_mesh,
        &meshes.detail_mesh,
        &TileBuildParams {
            tile_x: coord.x,
            tile_y: coord.y,
            walkable_height: params.agent_height,
            walkable_radius: params.agent_radius,
            walkable_climb: params.agent_max_climb,
        },
    )?;
    debug!(
        "Tile {} built from {} triangles and {} blockers: {} polygons",
        coord,
        tris.len(),
        blockers.len(),
        tile.polys.len()
    );
    Ok(Some(tile))
}

/// Counts over the live tile set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavMeshStatistics {
    /// Registered tiles
    pub tile_count: usize,
    /// Polygons across all registered tiles
    pub poly_count: usize,
    /// Grid cells whose last build failed
    pub failed_tiles: usize,
    /// Live obstacles
    pub obstacle_count: usize,
}

/// Registered tiles keyed by coordinate, linked into one [`NavMesh`]
#[derive(Debug)]
pub struct TileStore {
    nav_mesh: NavMesh,
    states: HashMap<TileCoord, TileState>,
}

impl TileStore {
    pub fn new(grid: &TileGrid, params: &BuildParameters) -> Result<Self> {
        let nav_mesh = NavMesh::new(NavMeshParams {
            origin: grid.origin(),
            tile_width: grid.tile_width(),
            tile_height: grid.tile_width(),
            max_tiles: params.max_tiles,
            max_polys: params.max_polys_per_tile,
        })?;
        Ok(Self {
            nav_mesh,
            states: HashMap::new(),
        })
    }

    pub fn nav_mesh(&self) -> &NavMesh {
        &self.nav_mesh
    }

    pub fn state(&self, coord: TileCoord) -> TileState {
        self.states.get(&coord).copied().unwrap_or_default()
    }

    pub fn tile(&self, coord: TileCoord) -> Option<&MeshTile> {
        self.nav_mesh.tile_at(coord.x, coord.y)
    }

    /// Registers `tile`, replacing any tile at the same coordinate
    pub fn insert(&mut self, tile: MeshTile) -> Result<()> {
        let coord = TileCoord::new(tile.header.x, tile.header.y);
        self.remove(coord);
        match self.nav_mesh.add_tile(tile) {
            Ok(_) => {
                self.states.insert(coord, TileState::Ready);
                Ok(())
            }
            Err(e) => {
                self.states.insert(coord, TileState::BuildFailed);
                Err(e)
            }
        }
    }

    /// Unregisters the tile at `coord`; returns whether one existed
    pub fn remove(&mut self, coord: TileCoord) -> bool {
        self.states.remove(&coord);
        self.nav_mesh.remove_tile(coord.x, coord.y).is_ok()
    }

    /// Records a failed build; any tile at `coord` is removed
    pub fn mark_failed(&mut self, coord: TileCoord) {
        self.remove(coord);
        self.states.insert(coord, TileState::BuildFailed);
    }

    /// Registered tiles ordered by coordinate
    pub fn tiles(&self) -> Vec<(TileCoord, &MeshTile)> {
        let mut tiles: Vec<_> = self
            .nav_mesh
            .tiles()
            .map(|t| (TileCoord::new(t.header.x, t.header.y), t))
            .collect();
        tiles.sort_by_key(|(coord, _)| (coord.y, coord.x));
        tiles
    }

    /// Tile and polygon counts, recomputed from the live tiles
    pub fn statistics(&self) -> NavMeshStatistics {
        NavMeshStatistics {
            tile_count: self.nav_mesh.tile_count(),
            poly_count: self.nav_mesh.poly_count(),
            failed_tiles: self
                .states
                .values()
                .filter(|s| **s == TileState::BuildFailed)
                .count(),
            obstacle_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TriangleSoup;

    fn plane_setup(size: f32) -> (WorldGeometry, BuildParameters, TileGrid) {
        let geometry = WorldGeometry::from_source(&TriangleSoup::plane([0.0, 0.0], [size, size], 0.0)).unwrap();
        let params = BuildParameters::default()
            .with_cell_size(0.5, 0.2)
            .with_tile_size(32.0);
        let grid = TileGrid::new(*geometry.bounds(), &params);
        (geometry, params, grid)
    }

    #[test]
    fn test_grid_dimensions() {
        let (_, _, grid) = plane_setup(64.0);
        assert_eq!((grid.width(), grid.height()), (2, 2));
        assert_eq!(grid.tile_count(), 4);

        let (_, _, grid) = plane_setup(65.0);
        assert_eq!((grid.width(), grid.height()), (3, 3));
    }

    #[test]
    fn test_boundary_maps_to_higher_tile() {
        let (_, _, grid) = plane_setup(64.0);
        assert_eq!(grid.tile_coord_at(Vec3::new(31.999, 0.0, 0.0)), TileCoord::new(0, 0));
        assert_eq!(grid.tile_coord_at(Vec3::new(32.0, 0.0, 0.0)), TileCoord::new(1, 0));
        assert_eq!(grid.tile_coord_at(Vec3::new(0.0, 0.0, 32.0)), TileCoord::new(0, 1));
        assert_eq!(grid.tile_coord_at(Vec3::new(-0.5, 0.0, 0.0)), TileCoord::new(-1, 0));
    }

    #[test]
    fn test_overlapping_tiles_include_border() {
        let (_, params, grid) = plane_setup(64.0);
        let inside = Aabb::new(Vec3::new(4.0, 0.0, 4.0), Vec3::new(6.0, 2.0, 6.0));
        assert_eq!(grid.tiles_overlapping(&inside), vec![TileCoord::new(0, 0)]);

        // Just past the edge of tile (0, 0) but within its border
        let x = 32.0 + params.border_world_size() * 0.5;
        let near_edge = Aabb::new(Vec3::new(x, 0.0, 4.0), Vec3::new(x + 0.1, 2.0, 5.0));
        assert_eq!(
            grid.tiles_overlapping(&near_edge),
            vec![TileCoord::new(0, 0), TileCoord::new(1, 0)]
        );

        let outside = Aabb::new(Vec3::new(100.0, 0.0, 100.0), Vec3::new(101.0, 1.0, 101.0));
        assert!(grid.tiles_overlapping(&outside).is_empty());
    }

    #[test]
    fn test_build_and_register_tile() {
        let (geometry, params, grid) = plane_setup(64.0);
        let coord = TileCoord::new(1, 0);
        let tile = build_tile_data(&geometry, &grid, &params, coord, &[]).unwrap().unwrap();
        assert!(!tile.polys.is_empty());

        let bounds = grid.tile_bounds(coord);
        for v in &tile.verts {
            assert!(v.x >= bounds.min.x - 1e-3 && v.x <= bounds.max.x + 1e-3);
            assert!(v.z >= bounds.min.z - 1e-3 && v.z <= bounds.max.z + 1e-3);
        }

        let mut store = TileStore::new(&grid, &params).unwrap();
        store.insert(tile).unwrap();
        assert_eq!(store.state(coord), TileState::Ready);
        let stats = store.statistics();
        assert_eq!(stats.tile_count, 1);
        assert!(stats.poly_count > 0);

        assert!(store.remove(coord));
        assert!(!store.remove(coord));
        assert_eq!(store.state(coord), TileState::Absent);
        assert_eq!(store.statistics(), NavMeshStatistics::default());
    }

    #[test]
    fn test_tile_without_geometry_is_empty() {
        let (geometry, params, grid) = plane_setup(64.0);
        let result = build_tile_data(&geometry, &grid, &params, TileCoord::new(5, 5), &[]).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_blocker_covering_tile_leaves_it_empty() {
        let (geometry, params, grid) = plane_setup(64.0);
        let coord = TileCoord::new(0, 0);
        let blocker = grid.voxel_bounds(coord);
        let result = build_tile_data(&geometry, &grid, &params, coord, &[blocker]).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_failed_build_is_tracked() {
        let (geometry, params, grid) = plane_setup(64.0);
        let mut store = TileStore::new(&grid, &params).unwrap();
        let coord = TileCoord::new(0, 0);
        let tile = build_tile_data(&geometry, &grid, &params, coord, &[]).unwrap().unwrap();
        store.insert(tile).unwrap();

        store.mark_failed(coord);
        assert_eq!(store.state(coord), TileState::BuildFailed);
        assert!(store.tile(coord).is_none());
        assert_eq!(store.statistics().failed_tiles, 1);
    }
}
