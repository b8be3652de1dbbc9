//! Binary navmesh cache
//!
//! A cache file holds the build parameters, the grid bounds, every registered
//! tile in the native tile encoding and the live obstacles. All values are
//! little endian:
//!
//! ```text
//! magic "TNAV" | version | parameters | origin | world max
//! tile count | { x | y | byte length | tile bytes }*
//! obstacle count | next obstacle id | { id | min | max }*
//! ```
//!
//! Reading validates the whole file before anything is handed back, so a
//! failed load never exposes partial state.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use log::debug;
use tilenav_common::{Aabb, Error, Result};
use tilenav_detour::tile_data::{decode_tile, encode_tile};
use tilenav_detour::MeshTile;

use crate::obstacle::{Obstacle, ObstacleManager};
use crate::params::BuildParameters;
use crate::tile_store::{TileCoord, TileGrid};

/// Magic number of cache files ('TNAV')
pub const CACHE_MAGIC: u32 = u32::from_le_bytes(*b"TNAV");

/// Current cache file version
pub const CACHE_VERSION: u32 = 1;

/// Upper bound on one encoded tile
const MAX_TILE_BYTES: u32 = 64 * 1024 * 1024;

/// Validated contents of a cache file
#[derive(Debug)]
pub struct CacheContents {
    pub params: BuildParameters,
    /// Geometry bounds the tile grid was laid out over
    pub bounds: Aabb,
    /// Tiles ordered as stored
    pub tiles: Vec<MeshTile>,
    pub obstacles: ObstacleManager,
}

fn write_vec3<W: Write>(writer: &mut W, v: Vec3) -> io::Result<()> {
    writer.write_f32::<LittleEndian>(v.x)?;
    writer.write_f32::<LittleEndian>(v.y)?;
    writer.write_f32::<LittleEndian>(v.z)
}

fn read_vec3<R: Read>(reader: &mut R) -> io::Result<Vec3> {
    Ok(Vec3::new(
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    ))
}

fn write_params<W: Write>(writer: &mut W, params: &BuildParameters) -> io::Result<()> {
    writer.write_f32::<LittleEndian>(params.cell_size)?;
    writer.write_f32::<LittleEndian>(params.cell_height)?;
    writer.write_f32::<LittleEndian>(params.agent_radius)?;
    writer.write_f32::<LittleEndian>(params.agent_height)?;
    writer.write_f32::<LittleEndian>(params.agent_max_climb)?;
    writer.write_f32::<LittleEndian>(params.agent_max_slope)?;
    writer.write_u32::<LittleEndian>(params.min_region_area)?;
    writer.write_u32::<LittleEndian>(params.merge_region_area)?;
    writer.write_f32::<LittleEndian>(params.max_simplification_error)?;
    writer.write_f32::<LittleEndian>(params.tile_size)?;
    writer.write_u32::<LittleEndian>(params.max_tiles)?;
    writer.write_u32::<LittleEndian>(params.max_polys_per_tile)?;
    writer.write_f32::<LittleEndian>(params.max_edge_len)?;
    writer.write_u32::<LittleEndian>(params.max_verts_per_poly)?;
    writer.write_f32::<LittleEndian>(params.detail_sample_dist)?;
    writer.write_f32::<LittleEndian>(params.detail_sample_max_error)?;
    write_vec3(writer, params.query_extents)?;
    writer.write_u32::<LittleEndian>(params.max_search_nodes)
}

fn read_params<R: Read>(reader: &mut R) -> io::Result<BuildParameters> {
    Ok(BuildParameters {
        cell_size: reader.read_f32::<LittleEndian>()?,
        cell_height: reader.read_f32::<LittleEndian>()?,
        agent_radius: reader.read_f32::<LittleEndian>()?,
        agent_height: reader.read_f32::<LittleEndian>()?,
        agent_max_climb: reader.read_f32::<LittleEndian>()?,
        agent_max_slope: reader.read_f32::<LittleEndian>()?,
        min_region_area: reader.read_u32::<LittleEndian>()?,
        merge_region_area: reader.read_u32::<LittleEndian>()?,
        max_simplification_error: reader.read_f32::<LittleEndian>()?,
        tile_size: reader.read_f32::<LittleEndian>()?,
        max_tiles: reader.read_u32::<LittleEndian>()?,
        max_polys_per_tile: reader.read_u32::<LittleEndian>()?,
        max_edge_len: reader.read_f32::<LittleEndian>()?,
        max_verts_per_poly: reader.read_u32::<LittleEndian>()?,
        detail_sample_dist: reader.read_f32::<LittleEndian>()?,
        detail_sample_max_error: reader.read_f32::<LittleEndian>()?,
        query_extents: read_vec3(reader)?,
        max_search_nodes: reader.read_u32::<LittleEndian>()?,
    })
}

/// Writes a cache to `writer`
pub fn write_cache<W: Write>(
    writer: &mut W,
    params: &BuildParameters,
    bounds: &Aabb,
    tiles: &[(TileCoord, &MeshTile)],
    obstacles: &ObstacleManager,
) -> Result<()> {
    writer.write_u32::<LittleEndian>(CACHE_MAGIC)?;
    writer.write_u32::<LittleEndian>(CACHE_VERSION)?;
    write_params(writer, params)?;
    write_vec3(writer, bounds.min)?;
    write_vec3(writer, bounds.max)?;

    writer.write_u32::<LittleEndian>(tiles.len() as u32)?;
    for (coord, tile) in tiles {
        let data = encode_tile(tile)?;
        writer.write_i32::<LittleEndian>(coord.x)?;
        writer.write_i32::<LittleEndian>(coord.y)?;
        writer.write_u32::<LittleEndian>(data.len() as u32)?;
        writer.write_all(&data)?;
    }

    writer.write_u32::<LittleEndian>(obstacles.len() as u32)?;
    writer.write_u32::<LittleEndian>(obstacles.next_id())?;
    for obstacle in obstacles.iter() {
        writer.write_u32::<LittleEndian>(obstacle.id)?;
        write_vec3(writer, obstacle.bounds.min)?;
        write_vec3(writer, obstacle.bounds.max)?;
    }
    Ok(())
}

fn corrupt(message: impl Into<String>) -> Error {
    Error::CorruptData(message.into())
}

/// Reads and validates a cache from `reader`.
///
/// Truncated input is reported as [`Error::CorruptData`].
pub fn read_cache<R: Read>(reader: &mut R) -> Result<CacheContents> {
    read_contents(reader).map_err(|e| match e {
        Error::Io(io) if io.kind() == io::ErrorKind::UnexpectedEof => corrupt("truncated cache file"),
        other => other,
    })
}

fn read_contents<R: Read>(reader: &mut R) -> Result<CacheContents> {
    let magic = reader.read_u32::<LittleEndian>()?;
    if magic != CACHE_MAGIC {
        return Err(corrupt(format!("wrong magic {:#010x}", magic)));
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version != CACHE_VERSION {
        return Err(corrupt(format!(
            "unsupported cache version {}, expected {}",
            version, CACHE_VERSION
        )));
    }

    let params = read_params(reader)?;
    params
        .validate()
        .map_err(|e| corrupt(format!("stored parameters rejected: {}", e)))?;

    let min = read_vec3(reader)?;
    let max = read_vec3(reader)?;
    if !(min.is_finite() && max.is_finite() && min.cmple(max).all()) {
        return Err(corrupt("invalid grid bounds"));
    }
    let bounds = Aabb { min, max };
    let grid = TileGrid::new(bounds, &params);

    let tile_count = reader.read_u32::<LittleEndian>()?;
    if tile_count > params.max_tiles || tile_count as usize > grid.tile_count() {
        return Err(corrupt(format!(
            "tile count {} exceeds the limit of {}",
            tile_count,
            (params.max_tiles as usize).min(grid.tile_count())
        )));
    }

    let mut seen = HashSet::new();
    let mut tiles = Vec::with_capacity(tile_count as usize);
    for _ in 0..tile_count {
        let coord = TileCoord::new(reader.read_i32::<LittleEndian>()?, reader.read_i32::<LittleEndian>()?);
        if !grid.contains(coord) {
            return Err(corrupt(format!("tile {} lies outside the grid", coord)));
        }
        if !seen.insert(coord) {
            return Err(corrupt(format!("tile {} is stored twice", coord)));
        }

        let len = reader.read_u32::<LittleEndian>()?;
        if len > MAX_TILE_BYTES {
            return Err(corrupt(format!("tile {} claims {} bytes", coord, len)));
        }
        let mut data = Vec::with_capacity(len as usize);
        reader.by_ref().take(len as u64).read_to_end(&mut data)?;
        if data.len() != len as usize {
            return Err(corrupt("truncated tile data"));
        }

        let tile = decode_tile(&data)?;
        if (tile.header.x, tile.header.y) != (coord.x, coord.y) {
            return Err(corrupt(format!(
                "tile record {} holds tile ({}, {})",
                coord, tile.header.x, tile.header.y
            )));
        }
        if tile.polys.len() > params.max_polys_per_tile as usize {
            return Err(corrupt(format!("tile {} has too many polygons", coord)));
        }
        tiles.push(tile);
    }

    let obstacle_count = reader.read_u32::<LittleEndian>()?;
    let next_id = reader.read_u32::<LittleEndian>()?;
    let mut obstacles = Vec::with_capacity((obstacle_count as usize).min(1024));
    for _ in 0..obstacle_count {
        let id = reader.read_u32::<LittleEndian>()?;
        let min = read_vec3(reader)?;
        let max = read_vec3(reader)?;
        if !(min.is_finite() && max.is_finite() && min.cmple(max).all()) {
            return Err(corrupt(format!("obstacle {} has invalid bounds", id)));
        }
        obstacles.push(Obstacle {
            id,
            bounds: Aabb { min, max },
        });
    }
    let obstacles =
        ObstacleManager::from_parts(obstacles, next_id).ok_or_else(|| corrupt("inconsistent obstacle ids"))?;

    let mut probe = [0u8; 1];
    if reader.read(&mut probe)? != 0 {
        return Err(corrupt("trailing bytes after cache data"));
    }

    debug!(
        "Read cache with {} tiles and {} obstacles",
        tiles.len(),
        obstacles.len()
    );
    Ok(CacheContents {
        params,
        bounds,
        tiles,
        obstacles,
    })
}

/// Writes a cache file, replacing any existing file at `path`
pub fn save_cache(
    path: &Path,
    params: &BuildParameters,
    bounds: &Aabb,
    tiles: &[(TileCoord, &MeshTile)],
    obstacles: &ObstacleManager,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_cache(&mut writer, params, bounds, tiles, obstacles)?;
    writer.flush()?;
    Ok(())
}

/// Reads and validates a cache file
pub fn load_cache(path: &Path) -> Result<CacheContents> {
    let mut reader = BufReader::new(File::open(path)?);
    read_cache(&mut reader)
}
