//! Tiled navigation mesh with obstacles, caching and path queries

use std::collections::BTreeSet;
use std::path::Path;

use glam::Vec3;
use log::{debug, info, warn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tilenav_common::debug::DebugMesh;
use tilenav_common::{Aabb, Error, Result};
use tilenav_detour::tile_data::encode_tile;
use tilenav_detour::{MeshTile, NavMesh, NavMeshQuery};

use crate::debug_export::DebugExporter;
use crate::geometry::{GeometrySource, WorldGeometry};
use crate::obstacle::{Obstacle, ObstacleManager};
use crate::params::BuildParameters;
use crate::persistence::{load_cache, save_cache};
use crate::tile_store::{build_tile_data, NavMeshStatistics, TileCoord, TileGrid, TileState, TileStore};

/// Navigation mesh split into independently rebuildable tiles
///
/// Mutations take `&mut self` and run to completion before returning, so a
/// query never observes a half-rebuilt tile.
#[derive(Debug)]
pub struct TiledNavMesh {
    geometry: WorldGeometry,
    params: BuildParameters,
    grid: TileGrid,
    store: TileStore,
    obstacles: ObstacleManager,
    debug: DebugExporter,
}

fn layout(geometry: &WorldGeometry, params: &BuildParameters) -> Result<(TileGrid, TileStore)> {
    params.validate()?;
    let grid = TileGrid::new(*geometry.bounds(), params);
    if grid.tile_count() > params.max_tiles as usize {
        return Err(Error::InvalidParameters(format!(
            "{}x{} tiles exceed max_tiles {}",
            grid.width(),
            grid.height(),
            params.max_tiles
        )));
    }
    let store = TileStore::new(&grid, params)?;
    Ok((grid, store))
}

impl TiledNavMesh {
    /// Takes ownership of the transformed geometry and lays out the tile grid.
    ///
    /// No tiles are built until [`build_all_tiles`](Self::build_all_tiles) or
    /// [`build_tile`](Self::build_tile) is called.
    pub fn new<S: GeometrySource + ?Sized>(source: &S, params: BuildParameters) -> Result<Self> {
        let geometry = WorldGeometry::from_source(source)?;
        let (grid, store) = layout(&geometry, &params)?;
        info!(
            "Created tiled navmesh over {} triangles: {}x{} tiles of {:.2} units",
            geometry.triangles().len(),
            grid.width(),
            grid.height(),
            grid.tile_width()
        );
        Ok(Self {
            geometry,
            params,
            grid,
            store,
            obstacles: ObstacleManager::new(),
            debug: DebugExporter::new(),
        })
    }

    pub fn params(&self) -> &BuildParameters {
        &self.params
    }

    /// Replaces the build parameters.
    ///
    /// The grid is laid out again and every tile is discarded; obstacles are
    /// kept. On error nothing changes.
    pub fn set_params(&mut self, params: BuildParameters) -> Result<()> {
        let (grid, store) = layout(&self.geometry, &params)?;
        self.params = params;
        self.grid = grid;
        self.store = store;
        self.debug.clear();
        info!(
            "Build parameters changed, tiles discarded; grid is now {}x{}",
            grid.width(),
            grid.height()
        );
        Ok(())
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn nav_mesh(&self) -> &NavMesh {
        self.store.nav_mesh()
    }

    pub fn tile(&self, coord: TileCoord) -> Option<&MeshTile> {
        self.store.tile(coord)
    }

    /// Native encoding of the tile at `coord`
    pub fn encoded_tile(&self, coord: TileCoord) -> Option<Vec<u8>> {
        encode_tile(self.store.tile(coord)?).ok()
    }

    pub fn tile_state(&self, coord: TileCoord) -> TileState {
        self.store.state(coord)
    }

    /// Tile containing `pos`; see [`TileGrid::tile_coord_at`]
    pub fn tile_coord_at(&self, pos: Vec3) -> TileCoord {
        self.grid.tile_coord_at(pos)
    }

    /// Tile, polygon, failure and obstacle counts
    pub fn statistics(&self) -> NavMeshStatistics {
        NavMeshStatistics {
            obstacle_count: self.obstacles.len(),
            ..self.store.statistics()
        }
    }

    /// Builds every grid tile.
    ///
    /// Tiles are generated in parallel when the `parallel` feature is enabled
    /// and registered in coordinate order. Returns whether every tile built.
    pub fn build_all_tiles(&mut self) -> bool {
        let coords: Vec<TileCoord> = self.grid.coords().collect();
        let ok = self.build_tiles(&coords);
        let stats = self.statistics();
        info!(
            "Built {} tiles with {} polygons, {} failed",
            stats.tile_count, stats.poly_count, stats.failed_tiles
        );
        ok
    }

    /// Builds the tile at `coord`, replacing any tile there.
    ///
    /// On failure the old tile is removed and the coordinate is marked
    /// [`TileState::BuildFailed`]. A tile without walkable surface counts as
    /// built but registers nothing.
    pub fn build_tile(&mut self, coord: TileCoord) -> bool {
        if !self.grid.contains(coord) {
            warn!("Tile {} lies outside the {}x{} grid", coord, self.grid.width(), self.grid.height());
            return false;
        }
        let blockers = self.obstacles.overlapping(&self.grid.voxel_bounds(coord));
        let result = build_tile_data(&self.geometry, &self.grid, &self.params, coord, &blockers);
        self.apply_build(coord, result)
    }

    /// Rebuilds the tile at `coord` from the stored geometry and obstacles
    pub fn rebuild_tile(&mut self, coord: TileCoord) -> bool {
        debug!("Rebuilding tile {}", coord);
        self.build_tile(coord)
    }

    /// Unregisters the tile at `coord`; returns whether one existed
    pub fn remove_tile(&mut self, coord: TileCoord) -> bool {
        self.debug.invalidate(coord);
        let removed = self.store.remove(coord);
        if removed {
            info!("Removed tile {}", coord);
        }
        removed
    }

    fn build_tiles(&mut self, coords: &[TileCoord]) -> bool {
        let jobs: Vec<(TileCoord, Vec<Aabb>)> = coords
            .iter()
            .filter(|c| self.grid.contains(**c))
            .map(|&c| (c, self.obstacles.overlapping(&self.grid.voxel_bounds(c))))
            .collect();

        let (geometry, grid, params) = (&self.geometry, &self.grid, &self.params);
        let build = |(coord, blockers): &(TileCoord, Vec<Aabb>)| {
            (*coord, build_tile_data(geometry, grid, params, *coord, blockers))
        };
        #[cfg(feature = "parallel")]
        let results: Vec<_> = jobs.par_iter().map(build).collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = jobs.iter().map(build).collect();

        let mut ok = jobs.len() == coords.len();
        for (coord, result) in results {
            ok &= self.apply_build(coord, result);
        }
        ok
    }

    fn apply_build(&mut self, coord: TileCoord, result: Result<Option<MeshTile>>) -> bool {
        self.debug.invalidate(coord);
        match result {
            Ok(Some(tile)) => {
                let polys = tile.polys.len();
                match self.store.insert(tile) {
                    Ok(()) => {
                        info!("Built tile {} with {} polygons", coord, polys);
                        true
                    }
                    Err(e) => {
                        warn!("Failed to register tile {}: {}", coord, e);
                        false
                    }
                }
            }
            Ok(None) => {
                self.store.remove(coord);
                debug!("Tile {} has no walkable surface", coord);
                true
            }
            Err(e) => {
                warn!("Failed to build tile {}: {}", coord, e);
                self.store.mark_failed(coord);
                false
            }
        }
    }

    /// Adds a blocking box and rebuilds every tile it touches.
    ///
    /// Returns the new obstacle id, or `None` for a box with non-finite
    /// coordinates.
    pub fn add_obstacle(&mut self, bounds: Aabb) -> Option<u32> {
        if !bounds.is_finite() {
            warn!("Ignoring obstacle with non-finite bounds");
            return None;
        }
        let id = self.obstacles.add(bounds);
        let affected = self.grid.tiles_overlapping(&bounds);
        info!("Added obstacle {} affecting {} tiles", id, affected.len());
        self.build_tiles(&affected);
        Some(id)
    }

    /// Adds several boxes and rebuilds the union of affected tiles once.
    ///
    /// Nothing is added when any box has non-finite coordinates.
    pub fn add_obstacles(&mut self, bounds: &[Aabb]) -> Option<Vec<u32>> {
        if bounds.iter().any(|b| !b.is_finite()) {
            warn!("Ignoring obstacle batch with non-finite bounds");
            return None;
        }
        let mut affected = BTreeSet::new();
        let ids: Vec<u32> = bounds
            .iter()
            .map(|b| {
                affected.extend(self.grid.tiles_overlapping(b));
                self.obstacles.add(*b)
            })
            .collect();
        let affected: Vec<TileCoord> = affected.into_iter().collect();
        info!("Added {} obstacles affecting {} tiles", ids.len(), affected.len());
        self.build_tiles(&affected);
        Some(ids)
    }

    /// Removes an obstacle and rebuilds the tiles it touched.
    ///
    /// Returns `false` without side effects for an unknown id.
    pub fn remove_obstacle(&mut self, id: u32) -> bool {
        let Some(obstacle) = self.obstacles.remove(id) else {
            debug!("No obstacle with id {}", id);
            return false;
        };
        let affected = self.grid.tiles_overlapping(&obstacle.bounds);
        info!("Removed obstacle {} affecting {} tiles", id, affected.len());
        self.build_tiles(&affected);
        true
    }

    pub fn obstacle(&self, id: u32) -> Option<&Obstacle> {
        self.obstacles.get(id)
    }

    /// Live obstacles in id order
    pub fn obstacles(&self) -> impl Iterator<Item = &Obstacle> + '_ {
        self.obstacles.iter()
    }

    /// Waypoints from `start` to `end`.
    ///
    /// Both points are first snapped to the nearest polygon within the query
    /// extents. The result is empty when either point is off the mesh or no
    /// route exists within the search node cap.
    pub fn find_path(&self, start: Vec3, end: Vec3) -> Vec<Vec3> {
        match self.try_find_path(start, end) {
            Ok(path) => path,
            Err(e) => {
                warn!("Path query from {} to {} failed: {}", start, end, e);
                Vec::new()
            }
        }
    }

    fn try_find_path(&self, start: Vec3, end: Vec3) -> Result<Vec<Vec3>> {
        let mut query = NavMeshQuery::new(self.store.nav_mesh(), self.params.max_search_nodes as usize);
        let extents = self.params.query_extents;

        let Some((start_ref, start_pos)) = query.find_nearest_poly(start, extents)? else {
            debug!("No polygon near path start {}", start);
            return Ok(Vec::new());
        };
        let Some((end_ref, end_pos)) = query.find_nearest_poly(end, extents)? else {
            debug!("No polygon near path end {}", end);
            return Ok(Vec::new());
        };

        let corridor = query.find_path(start_ref, end_ref, start_pos, end_pos)?;
        if corridor.is_empty() {
            debug!("No corridor between {} and {}", start_ref, end_ref);
            return Ok(Vec::new());
        }
        query.find_straight_path(start_pos, end_pos, &corridor)
    }

    /// Closest point on the mesh to `point` within the query extents
    pub fn project_point(&self, point: Vec3) -> Option<Vec3> {
        let query = NavMeshQuery::new(self.store.nav_mesh(), 1);
        match query.find_nearest_poly(point, self.params.query_extents) {
            Ok(nearest) => nearest.map(|(_, pos)| pos),
            Err(e) => {
                warn!("Projecting {} failed: {}", point, e);
                None
            }
        }
    }

    /// Writes parameters, tiles and obstacles to a cache file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> bool {
        let path = path.as_ref();
        let tiles = self.store.tiles();
        match save_cache(path, &self.params, self.grid.bounds(), &tiles, &self.obstacles) {
            Ok(()) => {
                info!(
                    "Saved {} tiles and {} obstacles to {}",
                    tiles.len(),
                    self.obstacles.len(),
                    path.display()
                );
                true
            }
            Err(e) => {
                warn!("Failed to save navmesh cache {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Replaces parameters, tiles and obstacles with those of a cache file.
    ///
    /// The file is fully validated first. On any failure the current state is
    /// left untouched and `false` is returned.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> bool {
        let path = path.as_ref();
        match self.try_load(path) {
            Ok(()) => {
                let stats = self.statistics();
                info!(
                    "Loaded {} tiles and {} obstacles from {}",
                    stats.tile_count,
                    stats.obstacle_count,
                    path.display()
                );
                true
            }
            Err(e) => {
                warn!("Rejected navmesh cache {}: {}", path.display(), e);
                false
            }
        }
    }

    fn try_load(&mut self, path: &Path) -> Result<()> {
        let contents = load_cache(path)?;
        if contents.bounds != *self.geometry.bounds() {
            return Err(Error::InvalidParameters(
                "cache was built over different geometry bounds".to_string(),
            ));
        }
        let (grid, mut store) = layout(&self.geometry, &contents.params)?;
        for tile in contents.tiles {
            store.insert(tile)?;
        }

        self.params = contents.params;
        self.grid = grid;
        self.store = store;
        self.obstacles = contents.obstacles;
        self.debug.clear();
        Ok(())
    }

    /// Renderable triangles of the tile at `coord`, cached until the tile
    /// changes
    pub fn debug_mesh(&mut self, coord: TileCoord) -> Option<&DebugMesh> {
        let tile = self.store.tile(coord)?;
        Some(self.debug.mesh_for(coord, tile))
    }

    /// Whether the debug mesh of `coord` is currently cached
    pub fn has_cached_debug_mesh(&self, coord: TileCoord) -> bool {
        self.debug.is_cached(coord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TriangleSoup;

    fn navmesh(size: f32) -> TiledNavMesh {
        let soup = TriangleSoup::plane([0.0, 0.0], [size, size], 0.0);
        let params = BuildParameters::default()
            .with_cell_size(0.5, 0.2)
            .with_tile_size(16.0);
        TiledNavMesh::new(&soup, params).unwrap()
    }

    #[test]
    fn test_build_all_tiles() {
        let mut mesh = navmesh(32.0);
        assert!(mesh.build_all_tiles());
        let stats = mesh.statistics();
        assert_eq!(stats.tile_count, 4);
        assert!(stats.poly_count >= 4);
        assert_eq!(stats.failed_tiles, 0);
        for coord in mesh.grid().coords().collect::<Vec<_>>() {
            assert_eq!(mesh.tile_state(coord), TileState::Ready);
        }
    }

    #[test]
    fn test_build_outside_grid_fails() {
        let mut mesh = navmesh(32.0);
        assert!(!mesh.build_tile(TileCoord::new(2, 0)));
        assert!(!mesh.build_tile(TileCoord::new(-1, 0)));
        assert_eq!(mesh.statistics().tile_count, 0);
    }

    #[test]
    fn test_remove_and_rebuild_tile() {
        let mut mesh = navmesh(32.0);
        mesh.build_all_tiles();
        let coord = TileCoord::new(1, 1);
        let polys = mesh.statistics().poly_count;
        let before = mesh.encoded_tile(coord).unwrap();

        assert!(mesh.remove_tile(coord));
        assert!(!mesh.remove_tile(coord));
        assert_eq!(mesh.tile_state(coord), TileState::Absent);
        assert_eq!(mesh.statistics().tile_count, 3);
        assert!(mesh.statistics().poly_count < polys);

        assert!(mesh.rebuild_tile(coord));
        assert_eq!(mesh.statistics().poly_count, polys);
        assert_eq!(mesh.encoded_tile(coord).unwrap(), before);
    }

    #[test]
    fn test_failed_build_removes_old_tile() {
        let mut mesh = navmesh(32.0);
        mesh.build_all_tiles();
        let coord = TileCoord::new(0, 0);
        assert!(mesh.tile(coord).is_some());

        // Short contour edges force many polygons past the limit of one
        let params = mesh.params().with_max_polys_per_tile(1).with_max_edge_len(1.0);
        mesh.set_params(params).unwrap();
        assert_eq!(mesh.statistics().tile_count, 0);

        assert!(!mesh.build_tile(coord));
        assert_eq!(mesh.tile_state(coord), TileState::BuildFailed);
        assert!(mesh.tile(coord).is_none());
        assert_eq!(mesh.statistics().failed_tiles, 1);
    }

    #[test]
    fn test_invalid_params_keep_state() {
        let mut mesh = navmesh(32.0);
        mesh.build_all_tiles();
        let params = *mesh.params();
        assert!(mesh.set_params(params.with_max_verts_per_poly(9)).is_err());
        assert_eq!(mesh.params(), &params);
        assert_eq!(mesh.statistics().tile_count, 4);
    }

    #[test]
    fn test_oversized_tile_grid_is_rejected_up_front() {
        let soup = TriangleSoup::plane([0.0, 0.0], [100.0, 100.0], 0.0);
        let params = BuildParameters::default()
            .with_cell_size(0.001, 0.2)
            .with_tile_size(100.0);
        assert!(matches!(TiledNavMesh::new(&soup, params), Err(Error::InvalidParameters(_))));

        let mut mesh = navmesh(32.0);
        mesh.build_all_tiles();
        assert!(mesh.set_params(params).is_err());
        assert_eq!(mesh.statistics().tile_count, 4);
        assert!(mesh.build_all_tiles());
    }

    #[test]
    fn test_project_point() {
        let mut mesh = navmesh(32.0);
        mesh.build_all_tiles();
        let projected = mesh.project_point(Vec3::new(10.0, 1.0, 10.0)).unwrap();
        assert!((projected.x - 10.0).abs() < 1e-3);
        assert!((projected.z - 10.0).abs() < 1e-3);
        assert!(projected.y.abs() < 0.5);

        assert!(mesh.project_point(Vec3::new(10.0, 50.0, 10.0)).is_none());
        assert!(mesh.project_point(Vec3::new(100.0, 0.0, 100.0)).is_none());
    }

    #[test]
    fn test_debug_mesh_cache_follows_tile_changes() {
        let mut mesh = navmesh(32.0);
        mesh.build_all_tiles();
        let a = TileCoord::new(0, 0);
        let b = TileCoord::new(1, 0);
        assert!(mesh.debug_mesh(a).is_some_and(|m| !m.is_empty()));
        assert!(mesh.debug_mesh(b).is_some());
        assert!(mesh.has_cached_debug_mesh(a));

        mesh.rebuild_tile(a);
        assert!(!mesh.has_cached_debug_mesh(a));
        assert!(mesh.has_cached_debug_mesh(b));

        mesh.remove_tile(b);
        assert!(mesh.debug_mesh(b).is_none());
    }

    #[test]
    fn test_obstacle_bookkeeping() {
        let mut mesh = navmesh(32.0);
        mesh.build_all_tiles();
        let bounds = Aabb::new(Vec3::new(4.0, -1.0, 4.0), Vec3::new(6.0, 3.0, 6.0));
        let id = mesh.add_obstacle(bounds).unwrap();
        assert_eq!(mesh.obstacle(id).map(|o| o.bounds), Some(bounds));
        assert_eq!(mesh.statistics().obstacle_count, 1);

        let nan = Aabb::new(Vec3::splat(f32::NAN), Vec3::ONE);
        assert!(mesh.add_obstacle(nan).is_none());
        assert!(mesh.add_obstacles(&[bounds, nan]).is_none());
        assert_eq!(mesh.obstacles().count(), 1);

        assert!(mesh.remove_obstacle(id));
        assert!(!mesh.remove_obstacle(id));
        assert!(mesh.obstacle(id).is_none());
    }

    #[test]
    fn test_obstacle_blocks_projection() {
        let mut mesh = navmesh(32.0);
        mesh.build_all_tiles();
        let center = Vec3::new(8.0, 0.0, 8.0);
        let bounds = Aabb::new(Vec3::new(5.0, -1.0, 5.0), Vec3::new(11.0, 3.0, 11.0));
        let id = mesh.add_obstacle(bounds).unwrap();

        if let Some(p) = mesh.project_point(center) {
            assert!(p.x <= 5.5 || p.x >= 10.5 || p.z <= 5.5 || p.z >= 10.5, "{}", p);
        }

        mesh.remove_obstacle(id);
        let projected = mesh.project_point(center).unwrap();
        assert!((projected.x - 8.0).abs() < 1e-3 && (projected.z - 8.0).abs() < 1e-3);
    }
}
