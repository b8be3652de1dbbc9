//! Configuration for building a single navigation mesh tile
//!
//! All distances here are in voxel units unless noted otherwise. The world-space
//! build parameters are converted into this form once per tile build.

use glam::Vec3;
use tilenav_common::{Error, Result};

/// Upper bound on the cells of one voxel field, border included
pub const MAX_FIELD_CELLS: i64 = 1 << 22;

/// Cell count of a `width` by `height` field, or an error when the field is
/// empty or larger than [`MAX_FIELD_CELLS`]
pub fn field_cell_count(width: i32, height: i32) -> Result<usize> {
    let cells = i64::from(width) * i64::from(height);
    if width <= 0 || height <= 0 || cells > MAX_FIELD_CELLS {
        return Err(Error::InvalidParameters(format!(
            "Invalid grid size: {}x{}, at most {} cells are supported",
            width, height, MAX_FIELD_CELLS
        )));
    }
    Ok(cells as usize)
}

/// Configuration parameters for Recast navigation mesh generation
#[derive(Debug, Clone)]
pub struct RecastConfig {
    /// The width of the field along the x-axis, border included
    pub width: i32,
    /// The height of the field along the z-axis, border included
    pub height: i32,

    /// The width/depth resolution of the field (cell size)
    pub cs: f32,
    /// The height resolution of the field (cell height)
    pub ch: f32,

    /// The minimum bounds of the field's AABB, border included
    pub bmin: Vec3,
    /// The maximum bounds of the field's AABB, border included
    pub bmax: Vec3,

    /// The maximum slope in degrees that is considered walkable
    pub walkable_slope_angle: f32,
    /// Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable
    pub walkable_height: i32,
    /// The maximum ledge height that is still considered traversable
    pub walkable_climb: i32,
    /// The distance to erode/shrink the walkable area from obstacles
    pub walkable_radius: i32,

    /// The maximum allowed length for contour edges along the border of the mesh
    pub max_edge_len: i32,
    /// The maximum distance a simplified contour's border edges should deviate from the original raw contour
    pub max_simplification_error: f32,
    /// The minimum number of cells allowed to form isolated island areas
    pub min_region_area: i32,
    /// Any regions with an area smaller than this value will be merged with larger regions if possible
    pub merge_region_area: i32,

    /// The maximum number of vertices allowed for polygons generated during the contour to polygon conversion process
    pub max_vertices_per_polygon: i32,
    /// Upper bound on the polygon count of the finished tile
    pub max_polys_per_tile: usize,

    /// Sets the sampling distance to use when generating the detail mesh
    pub detail_sample_dist: f32,
    /// The maximum distance the detail mesh surface should deviate from the heightfield data
    pub detail_sample_max_error: f32,

    /// The size of the non-navigable border around the heightfield
    pub border_size: i32,
}

impl Default for RecastConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            cs: 0.3,
            ch: 0.2,
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            walkable_slope_angle: 45.0,
            walkable_height: 10,
            walkable_climb: 4,
            walkable_radius: 2,
            max_edge_len: 40,
            max_simplification_error: 1.3,
            min_region_area: 8,
            merge_region_area: 20,
            max_vertices_per_polygon: 6,
            max_polys_per_tile: 4096,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            border_size: 0,
        }
    }
}

impl RecastConfig {
    /// Creates a new RecastConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculates and sets the grid size based on the provided AABB
    pub fn calculate_grid_size(&mut self, bmin: Vec3, bmax: Vec3) {
        self.bmin = bmin;
        self.bmax = bmax;
        self.width = ((bmax.x - bmin.x) / self.cs).round() as i32;
        self.height = ((bmax.z - bmin.z) / self.cs).round() as i32;
    }

    /// Width of the tile interior in cells, without the border
    pub fn tile_width(&self) -> i32 {
        self.width - self.border_size * 2
    }

    /// Depth of the tile interior in cells, without the border
    pub fn tile_height(&self) -> i32 {
        self.height - self.border_size * 2
    }

    /// Validates the configuration parameters
    pub fn validate(&self) -> Result<()> {
        field_cell_count(self.width, self.height)?;

        if self.cs <= 0.0 || self.ch <= 0.0 || !self.cs.is_finite() || !self.ch.is_finite() {
            return Err(Error::InvalidParameters(
                "Invalid cell size or height".to_string(),
            ));
        }

        if !(0.0..=90.0).contains(&self.walkable_slope_angle) {
            return Err(Error::InvalidParameters(
                "Invalid walkable slope angle".to_string(),
            ));
        }

        if self.walkable_height < 1 || self.walkable_climb < 0 || self.walkable_radius < 0 {
            return Err(Error::InvalidParameters(
                "Invalid agent dimensions".to_string(),
            ));
        }

        if !(3..=6).contains(&self.max_vertices_per_polygon) {
            return Err(Error::InvalidParameters(format!(
                "Vertices per polygon must be within 3..=6, got {}",
                self.max_vertices_per_polygon
            )));
        }

        if self.border_size < 0 || self.tile_width() <= 0 || self.tile_height() <= 0 {
            return Err(Error::InvalidParameters(
                "Border leaves no tile interior".to_string(),
            ));
        }

        if self.max_simplification_error < 0.0 || self.min_region_area < 0 || self.merge_region_area < 0 {
            return Err(Error::InvalidParameters(
                "Negative region or simplification limits".to_string(),
            ));
        }

        Ok(())
    }
}
