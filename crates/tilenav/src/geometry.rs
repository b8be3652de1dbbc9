//! Input geometry
//!
//! Callers hand over untransformed triangle soups together with their world
//! transform. The transform is applied once here and the result is shared by
//! every tile build.

use glam::{Mat4, Vec3};
use tilenav_common::{Aabb, Error, Result};

/// Triangle soup supplied by the application
pub trait GeometrySource {
    /// Vertex positions in model space
    fn positions(&self) -> &[Vec3];

    /// Triangle vertex indices, three per triangle
    fn indices(&self) -> &[u32];

    /// Model-to-world transform
    fn transform(&self) -> Mat4 {
        Mat4::IDENTITY
    }
}

/// Owned triangle soup with an optional transform
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleSoup {
    positions: Vec<Vec3>,
    indices: Vec<u32>,
    transform: Mat4,
}

impl TriangleSoup {
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            indices,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    /// Axis-aligned rectangle at height `y` covering `min..max` on x and z,
    /// wound to face up
    pub fn plane(min: [f32; 2], max: [f32; 2], y: f32) -> Self {
        Self::new(
            vec![
                Vec3::new(min[0], y, min[1]),
                Vec3::new(min[0], y, max[1]),
                Vec3::new(max[0], y, max[1]),
                Vec3::new(max[0], y, min[1]),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    /// Appends another soup, keeping this soup's transform
    pub fn merge(mut self, other: &TriangleSoup) -> Self {
        let base = self.positions.len() as u32;
        self.positions.extend(other.positions.iter().map(|&p| other.transform.transform_point3(p)));
        self.indices.extend(other.indices.iter().map(|&i| i + base));
        self
    }
}

impl GeometrySource for TriangleSoup {
    fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    fn indices(&self) -> &[u32] {
        &self.indices
    }

    fn transform(&self) -> Mat4 {
        self.transform
    }
}

/// World-space triangles ready for voxelization
#[derive(Debug, Clone)]
pub struct WorldGeometry {
    verts: Vec<Vec3>,
    tris: Vec<[u32; 3]>,
    tri_bounds: Vec<Aabb>,
    bounds: Aabb,
}

impl WorldGeometry {
    /// Applies the source transform and validates the triangle list
    pub fn from_source<S: GeometrySource + ?Sized>(source: &S) -> Result<Self> {
        let positions = source.positions();
        let indices = source.indices();
        let transform = source.transform();

        if !transform.is_finite() {
            return Err(Error::InvalidMesh("Transform is not finite".to_string()));
        }
        if indices.len() % 3 != 0 {
            return Err(Error::InvalidMesh(format!(
                "Index count {} is not a multiple of 3",
                indices.len()
            )));
        }
        if indices.is_empty() {
            return Err(Error::InvalidMesh("Geometry has no triangles".to_string()));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= positions.len()) {
            return Err(Error::InvalidMesh(format!(
                "Index {} out of range for {} vertices",
                bad,
                positions.len()
            )));
        }

        let verts: Vec<Vec3> = positions.iter().map(|&p| transform.transform_point3(p)).collect();
        if let Some(i) = verts.iter().position(|v| !v.is_finite()) {
            return Err(Error::InvalidMesh(format!("Vertex {} is not finite", i)));
        }

        let tris: Vec<[u32; 3]> = indices
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();
        let tri_bounds: Vec<Aabb> = tris
            .iter()
            .filter_map(|t| Aabb::from_points(t.iter().map(|&i| verts[i as usize])))
            .collect();
        let bounds = tri_bounds
            .iter()
            .copied()
            .reduce(|a, b| a.union(&b))
            .ok_or_else(|| Error::InvalidMesh("Geometry has no triangles".to_string()))?;

        Ok(Self {
            verts,
            tris,
            tri_bounds,
            bounds,
        })
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.verts
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.tris
    }

    /// Bounds of all referenced vertices
    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    /// Triangles whose footprint overlaps `area` on the xz plane
    pub fn triangles_in(&self, area: &Aabb) -> Vec<[u32; 3]> {
        self.tris
            .iter()
            .zip(&self.tri_bounds)
            .filter(|(_, b)| b.intersects_xz(area))
            .map(|(t, _)| *t)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_is_applied() {
        let soup = TriangleSoup::plane([0.0, 0.0], [4.0, 4.0], 0.0)
            .with_transform(Mat4::from_translation(Vec3::new(10.0, 1.0, -2.0)));
        let geometry = WorldGeometry::from_source(&soup).unwrap();
        assert_eq!(geometry.bounds().min, Vec3::new(10.0, 1.0, -2.0));
        assert_eq!(geometry.bounds().max, Vec3::new(14.0, 1.0, 2.0));
        assert_eq!(geometry.triangles().len(), 2);
    }

    #[test]
    fn test_invalid_indices_are_rejected() {
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Z];
        let partial = TriangleSoup::new(positions.clone(), vec![0, 1]);
        assert!(matches!(WorldGeometry::from_source(&partial), Err(Error::InvalidMesh(_))));

        let out_of_range = TriangleSoup::new(positions.clone(), vec![0, 1, 3]);
        assert!(matches!(WorldGeometry::from_source(&out_of_range), Err(Error::InvalidMesh(_))));

        let empty = TriangleSoup::new(positions, Vec::new());
        assert!(matches!(WorldGeometry::from_source(&empty), Err(Error::InvalidMesh(_))));
    }

    #[test]
    fn test_unreferenced_vertices_do_not_extend_bounds() {
        let soup = TriangleSoup::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Z, Vec3::splat(100.0)],
            vec![0, 2, 1],
        );
        let geometry = WorldGeometry::from_source(&soup).unwrap();
        assert_eq!(geometry.bounds().max, Vec3::new(1.0, 0.0, 1.0));
    }

    #[test]
    fn test_triangles_in_area() {
        let soup = TriangleSoup::plane([0.0, 0.0], [4.0, 4.0], 0.0)
            .merge(&TriangleSoup::plane([10.0, 0.0], [14.0, 4.0], 0.0));
        let geometry = WorldGeometry::from_source(&soup).unwrap();
        let area = Aabb::new(Vec3::new(9.0, -1.0, 0.0), Vec3::new(20.0, 1.0, 4.0));
        let tris = geometry.triangles_in(&area);
        assert_eq!(tris.len(), 2);
        assert!(tris.iter().flatten().all(|&i| i >= 4));
    }
}
