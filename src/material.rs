//! Surface materials for scene meshes.
//!
//! Scripts describe materials with a small map (`color`, `opacity`, `side`,
//! `wireframe`, ...). The shading model itself is fixed by the renderer;
//! scripts can only pick parameters, never shaders.

use std::fmt;

use crate::params::hex_to_rgb;

/// Which triangle faces are drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Side {
    #[default]
    Front,
    Back,
    Double,
}

impl Side {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "front" => Some(Side::Front),
            "back" => Some(Side::Back),
            "double" | "both" => Some(Side::Double),
            _ => None,
        }
    }

    /// Face culled by the rasterizer, if any.
    pub fn to_cull_mode(self) -> Option<wgpu::Face> {
        match self {
            Side::Front => Some(wgpu::Face::Back),
            Side::Back => Some(wgpu::Face::Front),
            Side::Double => None,
        }
    }
}

/// Primitive topology for materials.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MaterialTopology {
    /// Triangle list (standard solid rendering).
    #[default]
    Triangles,
    /// Line list (wireframe rendering using edge indices).
    Lines,
}

impl MaterialTopology {
    pub fn to_wgpu(self) -> wgpu::PrimitiveTopology {
        match self {
            MaterialTopology::Triangles => wgpu::PrimitiveTopology::TriangleList,
            MaterialTopology::Lines => wgpu::PrimitiveTopology::LineList,
        }
    }

    pub fn uses_edge_indices(self) -> bool {
        matches!(self, MaterialTopology::Lines)
    }
}

/// Blend modes for materials.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// No blending, fully opaque.
    #[default]
    Opaque,
    /// Standard alpha blending.
    AlphaBlend,
}

impl BlendMode {
    pub fn to_blend_state(self) -> wgpu::BlendState {
        match self {
            BlendMode::Opaque => wgpu::BlendState::REPLACE,
            BlendMode::AlphaBlend => wgpu::BlendState::ALPHA_BLENDING,
        }
    }
}

/// A lit surface description.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    /// Linear RGB base colour, components in `0..=1`.
    pub color: [f32; 3],
    pub emissive: [f32; 3],
    pub opacity: f32,
    pub roughness: f32,
    pub metalness: f32,
    pub side: Side,
    pub wireframe: bool,
    pub flat_shading: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0],
            emissive: [0.0, 0.0, 0.0],
            opacity: 1.0,
            roughness: 1.0,
            metalness: 0.0,
            side: Side::Front,
            wireframe: false,
            flat_shading: false,
        }
    }
}

impl Material {
    /// Material given to bare geometry returned by `createGeometry`.
    pub fn default_shaded() -> Self {
        Self {
            color: [0.8, 0.8, 0.8],
            roughness: 0.5,
            metalness: 0.1,
            side: Side::Double,
            ..Self::default()
        }
    }

    pub fn with_color(mut self, color: [f32; 3]) -> Self {
        self.color = color.map(|c| c.clamp(0.0, 1.0));
        self
    }

    /// Set the colour from a `#rgb`/`#rrggbb` string. Returns false when the
    /// string is not a hex colour and leaves the material unchanged.
    pub fn set_hex_color(&mut self, hex: &str) -> bool {
        match hex_to_rgb(hex) {
            Some(rgb) => {
                self.color = rgb;
                true
            }
            None => false,
        }
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    pub fn with_wireframe(mut self, wireframe: bool) -> Self {
        self.wireframe = wireframe;
        self
    }

    pub fn blend_mode(&self) -> BlendMode {
        if self.opacity < 1.0 {
            BlendMode::AlphaBlend
        } else {
            BlendMode::Opaque
        }
    }

    pub fn topology(&self) -> MaterialTopology {
        if self.wireframe {
            MaterialTopology::Lines
        } else {
            MaterialTopology::Triangles
        }
    }

    /// Colour and opacity packed for a uniform buffer.
    pub fn color_rgba(&self) -> [f32; 4] {
        [self.color[0], self.color[1], self.color[2], self.opacity]
    }

    pub fn emissive_rgba(&self) -> [f32; 4] {
        [self.emissive[0], self.emissive[1], self.emissive[2], 0.0]
    }
}

/// One material, or one per geometry group.
#[derive(Clone, Debug, PartialEq)]
pub enum MaterialSlot {
    Single(Material),
    Array(Vec<Material>),
}

impl MaterialSlot {
    pub fn len(&self) -> usize {
        match self {
            MaterialSlot::Single(_) => 1,
            MaterialSlot::Array(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Material> {
        match self {
            MaterialSlot::Single(material) => std::slice::from_ref(material).iter(),
            MaterialSlot::Array(items) => items.iter(),
        }
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Material> {
        match self {
            MaterialSlot::Single(material) => std::slice::from_mut(material).iter_mut(),
            MaterialSlot::Array(items) => items.iter_mut(),
        }
    }

    /// Material used to draw the whole mesh.
    pub fn primary(&self) -> Option<&Material> {
        self.iter().next()
    }
}

impl Default for MaterialSlot {
    fn default() -> Self {
        MaterialSlot::Single(Material::default())
    }
}

impl fmt::Display for MaterialSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterialSlot::Single(_) => f.write_str("material"),
            MaterialSlot::Array(items) => write!(f, "material[{}]", items.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shaded_is_double_sided() {
        let m = Material::default_shaded();
        assert_eq!(m.side, Side::Double);
        assert_eq!(m.side.to_cull_mode(), None);
        assert_eq!(m.blend_mode(), BlendMode::Opaque);
    }

    #[test]
    fn hex_colors() {
        let mut m = Material::default();
        assert!(m.set_hex_color("#ff0000"));
        assert_eq!(m.color, [1.0, 0.0, 0.0]);
        assert!(!m.set_hex_color("red"));
        assert_eq!(m.color, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn opacity_selects_blending_and_wireframe_selects_lines() {
        let m = Material::default().with_opacity(0.5).with_wireframe(true);
        assert_eq!(m.blend_mode(), BlendMode::AlphaBlend);
        assert!(m.topology().uses_edge_indices());
        assert_eq!(Material::default().with_opacity(7.0).opacity, 1.0);
    }

    #[test]
    fn slot_iteration() {
        let slot = MaterialSlot::Array(vec![Material::default(); 3]);
        assert_eq!(slot.len(), 3);
        assert_eq!(slot.iter().count(), 3);
        assert_eq!(MaterialSlot::default().len(), 1);
        assert!(MaterialSlot::Array(Vec::new()).primary().is_none());
    }
}
