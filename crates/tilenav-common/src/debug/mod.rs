//! Debug visualization data
//!
//! Renderer-agnostic buffers for drawing navigation meshes. Nothing here
//! depends on a graphics API; a renderer uploads the arrays as they are.

/// Color representation for debug visualization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    /// Creates a new color
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Creates a color from RGB values (alpha = 1.0)
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }

    /// Returns the same color with a different alpha
    pub const fn with_alpha(self, a: f32) -> Self {
        Self::new(self.r, self.g, self.b, a)
    }

    /// Packs the color into RGBA bytes
    pub fn to_rgba8(self) -> [u8; 4] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }
}

/// Color helpers for navigation mesh visualization
pub struct DebugColors;

impl DebugColors {
    /// Walkable surface with no region information
    pub const WALKABLE: Color = Color::new(0.0, 0.75, 1.0, 0.5);

    /// Deterministic, well-spread color for an integer id (region, tile, ...)
    pub fn unique_color(id: usize) -> Color {
        let r = ((id * 137) % 255) as f32 / 255.0;
        let g = ((id * 211) % 255) as f32 / 255.0;
        let b = ((id * 97) % 255) as f32 / 255.0;
        Color::rgb(r, g, b)
    }

    /// Region coloring; region 0 means "no region" and uses the plain walkable color
    pub fn region_color(region: u16, alpha: f32) -> Color {
        if region == 0 {
            Self::WALKABLE
        } else {
            Self::unique_color(region as usize).with_alpha(alpha)
        }
    }
}

/// Flat triangle list ready for handoff to a renderer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugMesh {
    /// Vertex positions, three floats per vertex
    pub positions: Vec<[f32; 3]>,
    /// One color per vertex
    pub colors: Vec<Color>,
    /// Triangle indices into `positions`
    pub indices: Vec<u32>,
}

impl DebugMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one triangle with a uniform color
    pub fn triangle(&mut self, a: [f32; 3], b: [f32; 3], c: [f32; 3], color: Color) {
        let base = self.positions.len() as u32;
        self.positions.extend_from_slice(&[a, b, c]);
        self.colors.extend_from_slice(&[color, color, color]);
        self.indices.extend_from_slice(&[base, base + 1, base + 2]);
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color::rgb(1.0, 0.0, 0.0);

    #[test]
    fn test_unique_color_is_stable() {
        assert_eq!(DebugColors::unique_color(7), DebugColors::unique_color(7));
        assert_ne!(DebugColors::unique_color(1), DebugColors::unique_color(2));
    }

    #[test]
    fn test_debug_mesh_triangle() {
        let mut mesh = DebugMesh::new();
        mesh.triangle([0.0; 3], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0], RED);
        mesh.triangle([0.0; 3], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0], Color::rgb(0.0, 1.0, 0.0));
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.indices[3..], [3, 4, 5]);
        assert_eq!(mesh.colors.len(), 6);
    }

    #[test]
    fn test_to_rgba8() {
        assert_eq!(RED.to_rgba8(), [255, 0, 0, 255]);
        assert_eq!(DebugColors::region_color(0, 0.75), DebugColors::WALKABLE);
        assert_eq!(DebugColors::region_color(3, 0.75).a, 0.75);
        assert_eq!(Color::rgb(0.5, 0.5, 0.5).with_alpha(0.0).to_rgba8(), [128, 128, 128, 0]);
    }
}
