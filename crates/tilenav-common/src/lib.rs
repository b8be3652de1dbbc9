//! Common utilities and data structures shared by the tilenav generation and query crates

pub mod debug;
mod bounds;
mod geometry;

pub use bounds::*;
pub use geometry::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input mesh: {0}")]
    InvalidMesh(String),

    #[error("invalid build parameters: {0}")]
    InvalidParameters(String),

    #[error("navigation mesh generation failed: {0}")]
    NavMeshGeneration(String),

    #[error("pathfinding failed: {0}")]
    Pathfinding(String),

    #[error("recast error: {0}")]
    Recast(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("detour error: {0}")]
    Detour(String),

    #[error("corrupt data: {0}")]
    CorruptData(String),
}

/// Result type for tilenav operations
pub type Result<T> = std::result::Result<T, Error>;
