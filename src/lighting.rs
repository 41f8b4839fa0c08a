//! Fixed light rig: one ambient term plus three directional lights
//! (key, fill and back), installed once per mount.
//!
//! "Lighting is a depth cue, not a physical simulation." Scripts cannot add or
//! move lights; every preview is lit the same way so geometry reads
//! consistently.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AmbientLight {
    pub color: Vec3,
    pub intensity: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels, normalized. Points FROM the source.
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl DirectionalLight {
    /// Light shining from `source` towards the origin.
    fn from_position(source: Vec3, intensity: f32) -> Self {
        Self {
            direction: (-source).try_normalize().unwrap_or(Vec3::NEG_Y),
            color: Vec3::ONE,
            intensity,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LightRig {
    pub ambient: AmbientLight,
    pub directional: [DirectionalLight; 3],
}

impl Default for LightRig {
    fn default() -> Self {
        Self {
            ambient: AmbientLight {
                color: Vec3::ONE,
                intensity: 0.5,
            },
            directional: [
                DirectionalLight::from_position(Vec3::new(5.0, 10.0, 7.5), 0.8),
                DirectionalLight::from_position(Vec3::new(-5.0, 5.0, -5.0), 0.4),
                DirectionalLight::from_position(Vec3::new(0.0, -5.0, -10.0), 0.3),
            ],
        }
    }
}

impl LightRig {
    pub fn light_count(&self) -> usize {
        1 + self.directional.len()
    }

    pub fn uniforms(&self) -> LightingUniforms {
        let mut uniforms = LightingUniforms {
            ambient: (self.ambient.color * self.ambient.intensity)
                .extend(0.0)
                .to_array(),
            ..LightingUniforms::zeroed()
        };
        for (i, light) in self.directional.iter().enumerate() {
            uniforms.directions[i] = light.direction.extend(0.0).to_array();
            uniforms.colors[i] = (light.color * light.intensity).extend(0.0).to_array();
        }
        uniforms
    }
}

/// GPU-ready lighting uniforms. Total size: 112 bytes (16-byte aligned).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct LightingUniforms {
    /// Ambient colour premultiplied by intensity (rgb), w unused.
    pub ambient: [f32; 4],
    pub directions: [[f32; 4]; 3],
    /// Light colours premultiplied by intensity.
    pub colors: [[f32; 4]; 3],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rig_has_one_ambient_and_three_directional() {
        let rig = LightRig::default();
        assert_eq!(rig.light_count(), 4);
        for light in &rig.directional {
            assert!((light.direction.length() - 1.0).abs() < 1e-5);
        }
        // Key light comes from above.
        assert!(rig.directional[0].direction.y < 0.0);
    }

    #[test]
    fn uniforms_premultiply_intensity() {
        let uniforms = LightRig::default().uniforms();
        assert!((uniforms.ambient[0] - 0.5).abs() < 1e-6);
        assert!((uniforms.colors[1][2] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn uniforms_size() {
        assert_eq!(std::mem::size_of::<LightingUniforms>(), 112);
    }
}
