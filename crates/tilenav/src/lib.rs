//! Tiled Navigation Meshes
//!
//! This crate builds navigation meshes tile by tile from triangle soups, keeps
//! them up to date as axis-aligned obstacles come and go, caches them to disk
//! and answers path and projection queries.
//!
//! # Features
//!
//! - **Tiled Generation**: Each tile is voxelized, partitioned and polygonized on its own
//! - **Parallel Builds**: Whole-grid builds run on rayon (`parallel` feature, on by default)
//! - **Dynamic Obstacles**: Adding or removing a box rebuilds only the tiles it touches
//! - **Binary Cache**: Save and load parameters, tiles and obstacles in one file
//! - **Path Queries**: A* over polygon links followed by string pulling
//! - **Debug Output**: Per-tile triangle buffers coloured by region
//! - **Serialization**: serde support for parameters, bounds and obstacles (`serialization` feature, on by default)
//!
//! # Example
//!
//! ```rust,no_run
//! use glam::Vec3;
//! use tilenav::{Aabb, BuildParameters, TiledNavMesh, TriangleSoup};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ground = TriangleSoup::plane([0.0, 0.0], [64.0, 64.0], 0.0);
//! let params = BuildParameters::default()
//!     .with_cell_size(0.5, 0.2)
//!     .with_tile_size(32.0);
//!
//! let mut navmesh = TiledNavMesh::new(&ground, params)?;
//! navmesh.build_all_tiles();
//!
//! // Carve out a crate and walk around it
//! let id = navmesh.add_obstacle(Aabb::new(Vec3::new(30.0, 0.0, 30.0), Vec3::new(34.0, 2.0, 34.0)));
//! let path = navmesh.find_path(Vec3::new(2.0, 0.0, 2.0), Vec3::new(62.0, 0.0, 62.0));
//! println!("{} waypoints", path.len());
//!
//! if !navmesh.save_to_file("navmesh.bin") {
//!     println!("Cache not written");
//! }
//! if let Some(id) = id {
//!     navmesh.remove_obstacle(id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod debug_export;
pub mod geometry;
pub mod navmesh;
pub mod obstacle;
pub mod params;
pub mod persistence;
pub mod tile_store;

pub use debug_export::DebugExporter;
pub use geometry::{GeometrySource, TriangleSoup, WorldGeometry};
pub use navmesh::TiledNavMesh;
pub use obstacle::{Obstacle, ObstacleManager};
pub use params::BuildParameters;
pub use persistence::{CACHE_MAGIC, CACHE_VERSION};
pub use tile_store::{NavMeshStatistics, TileCoord, TileGrid, TileState};

// Re-export shared types used in the public API
pub use tilenav_common::debug::{Color, DebugMesh};
pub use tilenav_common::{Aabb, Error, Result};
