//! Perspective camera.
//!
//! The viewpoint (`position` + `target`) is the only camera state that
//! survives script and parameter updates; it resets only on remount. Lens
//! settings come from configuration and the aspect ratio from the viewport.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::config::CameraSettings;

/// The persisted viewpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraState {
    pub position: Vec3,
    pub target: Vec3,
}

impl CameraState {
    pub fn distance(&self) -> f32 {
        self.position.distance(self.target)
    }
}

#[derive(Debug, Clone)]
pub struct PerspectiveCamera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub aspect: f32,
}

impl PerspectiveCamera {
    /// Camera from settings, keeping `persisted` when a previous mount left one.
    pub fn new(settings: &CameraSettings, persisted: Option<CameraState>) -> Self {
        let state = persisted.unwrap_or(CameraState {
            position: settings.position,
            target: settings.target,
        });
        Self {
            position: state.position,
            target: state.target,
            up: Vec3::Y,
            fov: settings.fov_degrees,
            near: settings.near,
            far: settings.far,
            aspect: 1.0,
        }
    }

    pub fn state(&self) -> CameraState {
        CameraState {
            position: self.position,
            target: self.target,
        }
    }

    pub fn set_state(&mut self, state: CameraState) {
        self.position = state.position;
        self.target = state.target;
    }

    /// Update the aspect ratio from a viewport size. Zero-sized viewports are
    /// ignored.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov.to_radians(), self.aspect, self.near, self.far)
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    pub fn uniforms(&self) -> CameraUniforms {
        CameraUniforms {
            view_proj: self.view_projection_matrix().to_cols_array_2d(),
            position: self.position.extend(1.0).to_array(),
        }
    }
}

/// Evaluated camera parameters ready for GPU.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CameraUniforms {
    pub view_proj: [[f32; 4]; 4],
    /// Camera position in world space (vec4, w unused).
    pub position: [f32; 4],
}
