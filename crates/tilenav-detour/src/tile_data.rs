//! Native binary encoding of a single navmesh tile
//!
//! All values are little endian. Runtime state (links and salt) is not
//! stored; it is rebuilt when the tile is added to a [`NavMesh`](crate::NavMesh).

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use tilenav_common::{Error, Result};

use crate::nav_mesh::{MeshTile, Poly, PolyDetail, TileHeader};
use crate::{Status, EXT_LINK, MAX_VERTS_PER_POLY};

/// Magic number for tile data ('TNTL')
pub const TILE_MAGIC: u32 = u32::from_le_bytes(*b"TNTL");

/// Current tile data version
pub const TILE_VERSION: u32 = 1;

const VERT_SIZE: usize = 12;
const POLY_SIZE: usize = MAX_VERTS_PER_POLY * 4 + 6;
const DETAIL_MESH_SIZE: usize = 10;
const DETAIL_TRI_SIZE: usize = 4;

/// Fixed-size leading block of an encoded tile
#[derive(Debug, Clone)]
struct TileDataHeader {
    magic: u32,
    version: u32,
    header: TileHeader,
    vert_count: u32,
    poly_count: u32,
    detail_vert_count: u32,
    detail_tri_count: u32,
}

impl TileDataHeader {
    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_i32::<LittleEndian>(self.header.x)?;
        writer.write_i32::<LittleEndian>(self.header.y)?;
        writer.write_f32::<LittleEndian>(self.header.walkable_height)?;
        writer.write_f32::<LittleEndian>(self.header.walkable_radius)?;
        writer.write_f32::<LittleEndian>(self.header.walkable_climb)?;
        write_vec3(writer, self.header.bmin)?;
        write_vec3(writer, self.header.bmax)?;
        writer.write_u32::<LittleEndian>(self.vert_count)?;
        writer.write_u32::<LittleEndian>(self.poly_count)?;
        writer.write_u32::<LittleEndian>(self.detail_vert_count)?;
        writer.write_u32::<LittleEndian>(self.detail_tri_count)?;
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != TILE_MAGIC {
            return Err(Status::WrongMagic.into());
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != TILE_VERSION {
            return Err(Status::WrongVersion.into());
        }
        Ok(Self {
            magic,
            version,
            header: TileHeader {
                x: reader.read_i32::<LittleEndian>()?,
                y: reader.read_i32::<LittleEndian>()?,
                walkable_height: reader.read_f32::<LittleEndian>()?,
                walkable_radius: reader.read_f32::<LittleEndian>()?,
                walkable_climb: reader.read_f32::<LittleEndian>()?,
                bmin: read_vec3(reader)?,
                bmax: read_vec3(reader)?,
            },
            vert_count: reader.read_u32::<LittleEndian>()?,
            poly_count: reader.read_u32::<LittleEndian>()?,
            detail_vert_count: reader.read_u32::<LittleEndian>()?,
            detail_tri_count: reader.read_u32::<LittleEndian>()?,
        })
    }

    /// Bytes the payload following the header must occupy
    fn payload_size(&self) -> Option<usize> {
        let verts = (self.vert_count as usize).checked_mul(VERT_SIZE)?;
        let polys = (self.poly_count as usize).checked_mul(POLY_SIZE + DETAIL_MESH_SIZE)?;
        let dverts = (self.detail_vert_count as usize).checked_mul(VERT_SIZE)?;
        let dtris = (self.detail_tri_count as usize).checked_mul(DETAIL_TRI_SIZE)?;
        verts.checked_add(polys)?.checked_add(dverts)?.checked_add(dtris)
    }
}

pub(crate) fn write_vec3<W: Write>(writer: &mut W, v: Vec3) -> Result<()> {
    writer.write_f32::<LittleEndian>(v.x)?;
    writer.write_f32::<LittleEndian>(v.y)?;
    writer.write_f32::<LittleEndian>(v.z)?;
    Ok(())
}

pub(crate) fn read_vec3<R: Read>(reader: &mut R) -> Result<Vec3> {
    Ok(Vec3::new(
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    ))
}

fn corrupt(what: &str) -> Error {
    Error::CorruptData(format!("{}: {}", Status::DataCorrupted, what))
}

/// Encodes a tile's mesh data
pub fn encode_tile(tile: &MeshTile) -> Result<Vec<u8>> {
    let header = TileDataHeader {
        magic: TILE_MAGIC,
        version: TILE_VERSION,
        header: tile.header,
        vert_count: tile.verts.len() as u32,
        poly_count: tile.polys.len() as u32,
        detail_vert_count: tile.detail_verts.len() as u32,
        detail_tri_count: tile.detail_tris.len() as u32,
    };

    let mut out = Vec::new();
    header.write_to(&mut out)?;
    for v in &tile.verts {
        write_vec3(&mut out, *v)?;
    }
    for poly in &tile.polys {
        for &v in &poly.verts {
            out.write_u16::<LittleEndian>(v)?;
        }
        for &n in &poly.neis {
            out.write_u16::<LittleEndian>(n)?;
        }
        out.write_u16::<LittleEndian>(poly.flags)?;
        out.write_u16::<LittleEndian>(poly.region)?;
        out.write_u8(poly.vert_count)?;
        out.write_u8(poly.area)?;
    }
    for d in &tile.detail_meshes {
        out.write_u32::<LittleEndian>(d.vert_base)?;
        out.write_u32::<LittleEndian>(d.tri_base)?;
        out.write_u8(d.vert_count)?;
        out.write_u8(d.tri_count)?;
    }
    for v in &tile.detail_verts {
        write_vec3(&mut out, *v)?;
    }
    for t in &tile.detail_tris {
        out.write_all(t)?;
    }
    Ok(out)
}

/// Decodes and validates tile data produced by [`encode_tile`].
///
/// Truncated input, trailing bytes and out-of-range indices are reported as
/// [`Error::CorruptData`].
pub fn decode_tile(data: &[u8]) -> Result<MeshTile> {
    let mut cursor = Cursor::new(data);
    let tile = read_tile(&mut cursor).map_err(|e| match e {
        Error::Io(_) => corrupt("truncated tile data"),
        other => other,
    })?;
    if cursor.position() as usize != data.len() {
        return Err(corrupt("trailing bytes after tile data"));
    }
    validate(&tile)?;
    Ok(tile)
}

fn read_tile(cursor: &mut Cursor<&[u8]>) -> Result<MeshTile> {
    let header = TileDataHeader::read_from(cursor)?;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if header.payload_size() != Some(remaining) {
        return Err(corrupt("element counts do not match data size"));
    }

    let mut verts = Vec::with_capacity(header.vert_count as usize);
    for _ in 0..header.vert_count {
        verts.push(read_vec3(cursor)?);
    }

    let mut polys = Vec::with_capacity(header.poly_count as usize);
    for _ in 0..header.poly_count {
        let mut poly = Poly::default();
        for v in &mut poly.verts {
            *v = cursor.read_u16::<LittleEndian>()?;
        }
        for n in &mut poly.neis {
            *n = cursor.read_u16::<LittleEndian>()?;
        }
        poly.flags = cursor.read_u16::<LittleEndian>()?;
        poly.region = cursor.read_u16::<LittleEndian>()?;
        poly.vert_count = cursor.read_u8()?;
        poly.area = cursor.read_u8()?;
        polys.push(poly);
    }

    let mut detail_meshes = Vec::with_capacity(header.poly_count as usize);
    for _ in 0..header.poly_count {
        detail_meshes.push(PolyDetail {
            vert_base: cursor.read_u32::<LittleEndian>()?,
            tri_base: cursor.read_u32::<LittleEndian>()?,
            vert_count: cursor.read_u8()?,
            tri_count: cursor.read_u8()?,
        });
    }

    let mut detail_verts = Vec::with_capacity(header.detail_vert_count as usize);
    for _ in 0..header.detail_vert_count {
        detail_verts.push(read_vec3(cursor)?);
    }

    let mut detail_tris = Vec::with_capacity(header.detail_tri_count as usize);
    for _ in 0..header.detail_tri_count {
        let mut t = [0u8; 4];
        cursor.read_exact(&mut t)?;
        detail_tris.push(t);
    }

    Ok(MeshTile {
        header: header.header,
        verts,
        polys,
        detail_meshes,
        detail_verts,
        detail_tris,
        links: Vec::new(),
        salt: 0,
    })
}

/// Checks every index in the tile against the element counts
fn validate(tile: &MeshTile) -> Result<()> {
    if !tile.header.bmin.is_finite() || !tile.header.bmax.is_finite() {
        return Err(corrupt("non-finite tile bounds"));
    }
    if tile.verts.iter().chain(&tile.detail_verts).any(|v| !v.is_finite()) {
        return Err(corrupt("non-finite vertex"));
    }

    let npolys = tile.polys.len();
    for (poly, detail) in tile.polys.iter().zip(&tile.detail_meshes) {
        let nv = poly.vert_count as usize;
        if !(3..=MAX_VERTS_PER_POLY).contains(&nv) {
            return Err(corrupt("polygon vertex count out of range"));
        }
        if poly.vert_indices().iter().any(|&v| v as usize >= tile.verts.len()) {
            return Err(corrupt("polygon vertex index out of range"));
        }
        for &n in &poly.neis[..nv] {
            let bad = if n & EXT_LINK != 0 {
                n & !EXT_LINK > 3
            } else {
                n as usize > npolys
            };
            if bad {
                return Err(corrupt("polygon neighbour out of range"));
            }
        }

        let vb = detail.vert_base as usize;
        let tb = detail.tri_base as usize;
        if vb + detail.vert_count as usize > tile.detail_verts.len()
            || tb + detail.tri_count as usize > tile.detail_tris.len()
        {
            return Err(corrupt("detail mesh range out of bounds"));
        }
        let local = nv + detail.vert_count as usize;
        let tris = &tile.detail_tris[tb..tb + detail.tri_count as usize];
        if tris.iter().any(|t| t[..3].iter().any(|&k| k as usize >= local)) {
            return Err(corrupt("detail triangle index out of range"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nav_mesh::tests::square_tile;

    #[test]
    fn test_tile_round_trip() {
        let mut tile = square_tile(2, -1);
        tile.detail_verts.push(Vec3::new(25.0, 0.5, -5.0));
        tile.detail_meshes[0].vert_count = 1;
        tile.detail_tris = vec![[0, 1, 4, 1], [1, 2, 4, 1], [2, 3, 4, 1], [3, 0, 4, 1]];
        tile.detail_meshes[0].tri_count = 4;

        let bytes = encode_tile(&tile).unwrap();
        let decoded = decode_tile(&bytes).unwrap();
        assert_eq!(decoded, tile);
        assert_eq!(encode_tile(&decoded).unwrap(), bytes);
    }

    #[test]
    fn test_truncated_data_is_corrupt() {
        let bytes = encode_tile(&square_tile(0, 0)).unwrap();
        for len in [0, 3, 20, bytes.len() - 1] {
            let err = decode_tile(&bytes[..len]).unwrap_err();
            assert!(matches!(err, Error::CorruptData(_)), "len {}", len);
        }
        let mut long = bytes.clone();
        long.push(0);
        assert!(matches!(decode_tile(&long), Err(Error::CorruptData(_))));
    }

    #[test]
    fn test_header_mismatch_is_detected() {
        let mut bytes = encode_tile(&square_tile(0, 0)).unwrap();
        bytes[4] = 99;
        let err = decode_tile(&bytes).unwrap_err();
        assert!(err.to_string().contains("Wrong version"));
        bytes[0] = b'X';
        let err = decode_tile(&bytes).unwrap_err();
        assert!(err.to_string().contains("Wrong magic"));
    }

    #[test]
    fn test_bad_index_is_rejected() {
        let mut tile = square_tile(0, 0);
        tile.polys[0].verts[2] = 40;
        let bytes = encode_tile(&tile).unwrap();
        assert!(matches!(decode_tile(&bytes), Err(Error::CorruptData(_))));
    }
}
