//! Multi-tile navigation mesh and path queries
//!
//! Tiles produced by `tilenav-recast` are converted to world-space
//! [`MeshTile`]s, stitched together across tile borders in a [`NavMesh`] and
//! queried with [`NavMeshQuery`]. Tiles can be encoded to a compact binary
//! form with [`tile_data`].

mod nav_mesh;
mod nav_mesh_builder;
mod nav_mesh_query;
mod node_pool;
mod status;
pub mod tile_data;

pub use nav_mesh::{
    decode_poly_ref_full, encode_poly_ref_with_salt, Link, MeshTile, NavMesh, Poly, PolyDetail,
    TileHeader,
};
pub use nav_mesh_builder::{create_tile, TileBuildParams};
pub use nav_mesh_query::NavMeshQuery;
pub use status::Status;

use glam::Vec3;

/// Maximum number of vertices per navigation polygon
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Neighbour flag marking an edge that continues in another tile
pub const EXT_LINK: u16 = 0x8000;

/// Polygon flag: agents may walk on the polygon
pub const POLY_FLAG_WALK: u16 = 0x01;

/// Link side value for connections inside one tile
pub const LINK_INTERNAL: u8 = 0xff;

/// Default cap on nodes explored by a single path search
pub const DEFAULT_MAX_SEARCH_NODES: usize = 4096;

/// Reference to a polygon in a [`NavMesh`]
///
/// Packs the polygon index, the 1-based tile slot and the slot's salt so that
/// references to removed tiles are detected. The zero reference is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PolyRef(u32);

impl PolyRef {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for PolyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Layout of the tile grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavMeshParams {
    /// World position of the corner of tile (0, 0)
    pub origin: Vec3,
    /// Tile extent along x
    pub tile_width: f32,
    /// Tile extent along z
    pub tile_height: f32,
    /// Number of tile slots
    pub max_tiles: u32,
    /// Maximum polygons in one tile
    pub max_polys: u32,
}
