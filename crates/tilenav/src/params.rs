//! Build parameters for tiled navigation meshes
//!
//! All distances are in world units unless noted otherwise. Voxel-space values
//! are derived from these on every build, so a changed parameter set never
//! leaves stale grid dimensions behind.

use glam::Vec3;
use tilenav_common::{Aabb, Error, Result};
use tilenav_recast::{RecastConfig, MAX_FIELD_CELLS};

/// Highest tile count a navmesh can address
pub const MAX_TILES_LIMIT: u32 = 1023;

/// Highest polygon count a single tile can address
pub const MAX_POLYS_LIMIT: u32 = 1 << 16;

/// Highest node cap for one path search
pub const MAX_SEARCH_NODES_LIMIT: u32 = u16::MAX as u32 - 1;

/// Parameters controlling voxelization, region filtering, tiling and queries
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct BuildParameters {
    /// Horizontal voxel size
    pub cell_size: f32,
    /// Vertical voxel size
    pub cell_height: f32,
    pub agent_radius: f32,
    pub agent_height: f32,
    /// Highest ledge an agent can step up
    pub agent_max_climb: f32,
    /// Steepest walkable slope in degrees
    pub agent_max_slope: f32,
    /// Regions with fewer cells are removed
    pub min_region_area: u32,
    /// Regions with fewer cells are merged into a neighbour when possible
    pub merge_region_area: u32,
    /// Largest distance a simplified contour may deviate from the raw one, in cells
    pub max_simplification_error: f32,
    /// Tile edge length, snapped to a whole number of cells
    pub tile_size: f32,
    pub max_tiles: u32,
    pub max_polys_per_tile: u32,
    /// Longest contour edge along the walkable border, 0 disables splitting
    pub max_edge_len: f32,
    pub max_verts_per_poly: u32,
    /// Detail sampling distance in cells
    pub detail_sample_dist: f32,
    /// Largest height deviation of the detail mesh, in cell heights
    pub detail_sample_max_error: f32,
    /// Half extents of the box searched when snapping query points to the mesh
    pub query_extents: Vec3,
    /// Cap on polygons explored by one path search
    pub max_search_nodes: u32,
}

impl Default for BuildParameters {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_radius: 0.6,
            agent_height: 2.0,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0,
            min_region_area: 8,
            merge_region_area: 20,
            max_simplification_error: 1.3,
            tile_size: 32.0,
            max_tiles: 256,
            max_polys_per_tile: 4096,
            max_edge_len: 12.0,
            max_verts_per_poly: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            query_extents: Vec3::new(2.0, 4.0, 2.0),
            max_search_nodes: 2048,
        }
    }
}

impl BuildParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cell_size(mut self, cell_size: f32, cell_height: f32) -> Self {
        self.cell_size = cell_size;
        self.cell_height = cell_height;
        self
    }

    pub fn with_agent(mut self, radius: f32, height: f32, max_climb: f32) -> Self {
        self.agent_radius = radius;
        self.agent_height = height;
        self.agent_max_climb = max_climb;
        self
    }

    pub fn with_agent_max_slope(mut self, degrees: f32) -> Self {
        self.agent_max_slope = degrees;
        self
    }

    pub fn with_region_areas(mut self, min_region_area: u32, merge_region_area: u32) -> Self {
        self.min_region_area = min_region_area;
        self.merge_region_area = merge_region_area;
        self
    }

    pub fn with_max_simplification_error(mut self, error: f32) -> Self {
        self.max_simplification_error = error;
        self
    }

    pub fn with_tile_size(mut self, tile_size: f32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_max_tiles(mut self, max_tiles: u32) -> Self {
        self.max_tiles = max_tiles;
        self
    }

    pub fn with_max_polys_per_tile(mut self, max_polys: u32) -> Self {
        self.max_polys_per_tile = max_polys;
        self
    }

    pub fn with_max_edge_len(mut self, max_edge_len: f32) -> Self {
        self.max_edge_len = max_edge_len;
        self
    }

    pub fn with_max_verts_per_poly(mut self, max_verts: u32) -> Self {
        self.max_verts_per_poly = max_verts;
        self
    }

    pub fn with_detail_sampling(mut self, sample_dist: f32, max_error: f32) -> Self {
        self.detail_sample_dist = sample_dist;
        self.detail_sample_max_error = max_error;
        self
    }

    pub fn with_query_extents(mut self, extents: Vec3) -> Self {
        self.query_extents = extents;
        self
    }

    pub fn with_max_search_nodes(mut self, max_nodes: u32) -> Self {
        self.max_search_nodes = max_nodes;
        self
    }

    /// Checks that every value is in range
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("cell_size", self.cell_size),
            ("cell_height", self.cell_height),
            ("agent_height", self.agent_height),
            ("tile_size", self.tile_size),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::InvalidParameters(format!("{} must be positive, got {}", name, value)));
            }
        }

        let non_negative = [
            ("agent_radius", self.agent_radius),
            ("agent_max_climb", self.agent_max_climb),
            ("max_simplification_error", self.max_simplification_error),
            ("max_edge_len", self.max_edge_len),
            ("detail_sample_dist", self.detail_sample_dist),
            ("detail_sample_max_error", self.detail_sample_max_error),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::InvalidParameters(format!("{} must not be negative, got {}", name, value)));
            }
        }

        if !(0.0..=90.0).contains(&self.agent_max_slope) {
            return Err(Error::InvalidParameters(format!(
                "agent_max_slope must be within 0..=90 degrees, got {}",
                self.agent_max_slope
            )));
        }
        if self.tile_size < self.cell_size {
            return Err(Error::InvalidParameters(format!(
                "tile_size {} is smaller than cell_size {}",
                self.tile_size, self.cell_size
            )));
        }
        let side = (f64::from(self.tile_size) / f64::from(self.cell_size)).round()
            + 2.0 * ((f64::from(self.agent_radius) / f64::from(self.cell_size)).ceil() + 3.0);
        if side * side > MAX_FIELD_CELLS as f64 {
            return Err(Error::InvalidParameters(format!(
                "tile of {} cells per side with border exceeds {} cells, raise cell_size or lower tile_size",
                side, MAX_FIELD_CELLS
            )));
        }
        if !(1..=MAX_TILES_LIMIT).contains(&self.max_tiles) {
            return Err(Error::InvalidParameters(format!(
                "max_tiles must be within 1..={}, got {}",
                MAX_TILES_LIMIT, self.max_tiles
            )));
        }
        if !(1..=MAX_POLYS_LIMIT).contains(&self.max_polys_per_tile) {
            return Err(Error::InvalidParameters(format!(
                "max_polys_per_tile must be within 1..={}, got {}",
                MAX_POLYS_LIMIT, self.max_polys_per_tile
            )));
        }
        if !(3..=6).contains(&self.max_verts_per_poly) {
            return Err(Error::InvalidParameters(format!(
                "max_verts_per_poly must be within 3..=6, got {}",
                self.max_verts_per_poly
            )));
        }
        if !(1..=MAX_SEARCH_NODES_LIMIT).contains(&self.max_search_nodes) {
            return Err(Error::InvalidParameters(format!(
                "max_search_nodes must be within 1..={}, got {}",
                MAX_SEARCH_NODES_LIMIT, self.max_search_nodes
            )));
        }
        if !(self.query_extents.is_finite() && self.query_extents.cmpgt(Vec3::ZERO).all()) {
            return Err(Error::InvalidParameters(format!(
                "query_extents must be positive, got {}",
                self.query_extents
            )));
        }
        Ok(())
    }

    /// Agent height in cell heights, rounded up
    pub fn walkable_height_voxels(&self) -> i32 {
        (self.agent_height / self.cell_height).ceil() as i32
    }

    /// Agent climb in cell heights, rounded down
    pub fn walkable_climb_voxels(&self) -> i32 {
        (self.agent_max_climb / self.cell_height).floor() as i32
    }

    /// Agent radius in cells, rounded up
    pub fn walkable_radius_voxels(&self) -> i32 {
        (self.agent_radius / self.cell_size).ceil() as i32
    }

    /// Cells of padding voxelized around each tile
    pub fn border_size_voxels(&self) -> i32 {
        self.walkable_radius_voxels() + 3
    }

    /// Cells along one tile edge
    pub fn tile_cells(&self) -> i32 {
        ((self.tile_size / self.cell_size).round() as i32).max(1)
    }

    /// Tile edge length after snapping to whole cells
    pub fn tile_world_size(&self) -> f32 {
        self.tile_cells() as f32 * self.cell_size
    }

    /// World-space padding around each tile
    pub fn border_world_size(&self) -> f32 {
        self.border_size_voxels() as f32 * self.cell_size
    }

    /// Voxel configuration for the tile occupying `tile_bounds`.
    ///
    /// The voxelized area is the tile plus the border on all four sides.
    pub fn to_recast_config(&self, tile_bounds: &Aabb) -> RecastConfig {
        let border = self.border_world_size();
        let pad = Vec3::new(border, 0.0, border);

        let mut config = RecastConfig {
            cs: self.cell_size,
            ch: self.cell_height,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: self.walkable_height_voxels(),
            walkable_climb: self.walkable_climb_voxels(),
            walkable_radius: self.walkable_radius_voxels(),
            max_edge_len: (self.max_edge_len / self.cell_size) as i32,
            max_simplification_error: self.max_simplification_error,
            min_region_area: self.min_region_area as i32,
            merge_region_area: self.merge_region_area as i32,
            max_vertices_per_polygon: self.max_verts_per_poly as i32,
            max_polys_per_tile: self.max_polys_per_tile as usize,
            detail_sample_dist: self.detail_sample_dist,
            detail_sample_max_error: self.detail_sample_max_error * self.cell_height,
            border_size: self.border_size_voxels(),
            ..Default::default()
        };
        config.calculate_grid_size(tile_bounds.min - pad, tile_bounds.max + pad);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(BuildParameters::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let base = BuildParameters::default();
        assert!(base.with_cell_size(0.0, 0.2).validate().is_err());
        assert!(base.with_agent_max_slope(91.0).validate().is_err());
        assert!(base.with_max_tiles(0).validate().is_err());
        assert!(base.with_max_tiles(MAX_TILES_LIMIT + 1).validate().is_err());
        assert!(base.with_max_verts_per_poly(7).validate().is_err());
        assert!(base.with_tile_size(0.1).validate().is_err());
        assert!(base.with_agent(-1.0, 2.0, 0.9).validate().is_err());
        assert!(base.with_query_extents(Vec3::new(1.0, 0.0, 1.0)).validate().is_err());
        assert!(base.with_max_search_nodes(0).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_tile_field() {
        let params = BuildParameters::default()
            .with_cell_size(0.001, 0.2)
            .with_tile_size(100.0);
        assert!(matches!(params.validate(), Err(Error::InvalidParameters(_))));

        // A huge radius grows the border past the cap as well
        let wide = BuildParameters::default().with_agent(1000.0, 2.0, 0.9);
        assert!(wide.validate().is_err());

        // 2000 cells plus a 5 cell border on each side still fits
        let largest = BuildParameters::default()
            .with_cell_size(0.1, 0.1)
            .with_agent(0.2, 2.0, 0.5)
            .with_tile_size(200.0);
        assert!(largest.validate().is_ok());
        let config = largest.to_recast_config(&Aabb::new(Vec3::ZERO, Vec3::new(200.0, 1.0, 200.0)));
        assert!(config.validate().is_ok());
    }

    #[cfg(feature = "serialization")]
    #[test]
    fn test_parameters_from_json() {
        let params = BuildParameters::default()
            .with_cell_size(0.25, 0.1)
            .with_query_extents(Vec3::new(1.0, 3.0, 1.0));
        let json = serde_json::to_string_pretty(&params).unwrap();
        assert!(json.contains("\"cell_size\": 0.25"));
        let back: BuildParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
        assert!(back.validate().is_ok());

        // Missing fields are an error, not a silent default
        assert!(serde_json::from_str::<BuildParameters>(r#"{"cell_size": 0.3}"#).is_err());
    }

    #[test]
    fn test_voxel_values() {
        let params = BuildParameters::default()
            .with_cell_size(0.5, 0.25)
            .with_agent(0.6, 2.0, 0.9);
        assert_eq!(params.walkable_height_voxels(), 8);
        assert_eq!(params.walkable_climb_voxels(), 3);
        assert_eq!(params.walkable_radius_voxels(), 2);
        assert_eq!(params.border_size_voxels(), 5);
    }

    #[test]
    fn test_tile_size_snaps_to_cells() {
        let params = BuildParameters::default().with_cell_size(0.3, 0.2).with_tile_size(10.0);
        assert_eq!(params.tile_cells(), 33);
        assert!((params.tile_world_size() - 9.9).abs() < 1e-4);
    }

    #[test]
    fn test_recast_config_covers_tile_and_border() {
        let params = BuildParameters::default()
            .with_cell_size(0.5, 0.2)
            .with_tile_size(32.0);
        let bounds = Aabb::new(Vec3::new(0.0, -1.0, 32.0), Vec3::new(32.0, 3.0, 64.0));
        let config = params.to_recast_config(&bounds);

        let border = params.border_size_voxels();
        assert_eq!(config.border_size, border);
        assert_eq!(config.tile_width(), 64);
        assert_eq!(config.tile_height(), 64);
        assert_eq!(config.width, 64 + 2 * border);
        assert!((config.bmin.x + border as f32 * 0.5).abs() < 1e-4);
        assert!((config.detail_sample_max_error - 0.2).abs() < 1e-6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_changed_parameters_change_derived_values() {
        let params = BuildParameters::default();
        let finer = params.with_cell_size(0.15, 0.1);
        assert!(finer.tile_cells() > params.tile_cells());
        assert!(finer.walkable_radius_voxels() > params.walkable_radius_voxels());
    }
}
