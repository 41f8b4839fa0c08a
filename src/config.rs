//! Preview configuration.
//!
//! Every section has defaults, so an empty TOML document (or no file at all)
//! yields a working configuration:
//!
//! ```toml
//! [sandbox]
//! max_operations = 2000000
//!
//! [controls]
//! damping_factor = 0.05
//!
//! [scheduler]
//! frames_per_second = 60.0
//! ```

use std::path::Path;
use std::time::Duration;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub sandbox: SandboxLimits,
    pub camera: CameraSettings,
    pub controls: ControlSettings,
    pub scheduler: SchedulerSettings,
    pub viewport: ViewportSettings,
}

impl PreviewConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded preview config from {}", path.display());
        Ok(config)
    }
}

/// Resource limits applied to the Rhai engine that runs user scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    /// Upper bound on Rhai operations per call; stops runaway loops.
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_function_expr_depth: usize,
    pub max_string_size: usize,
    /// Large enough for flat position arrays passed to `lib.geometry`.
    pub max_array_size: usize,
    pub max_map_size: usize,
    /// Maximum nesting of groups in a returned object.
    pub max_object_depth: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_operations: 2_000_000,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_function_expr_depth: 64,
            max_string_size: 10_000,
            max_array_size: 300_000,
            max_map_size: 500,
            max_object_depth: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    /// Viewpoint used on a fresh mount.
    pub position: Vec3,
    pub target: Vec3,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            fov_degrees: 50.0,
            near: 0.1,
            far: 1000.0,
            position: Vec3::new(5.0, 5.0, 5.0),
            target: Vec3::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    /// Fraction of the remaining orbit velocity applied per update.
    pub damping_factor: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub pan_speed: f32,
    pub min_distance: f32,
    pub max_distance: f32,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            damping_factor: 0.05,
            rotate_speed: 1.0,
            zoom_speed: 1.0,
            pan_speed: 1.0,
            min_distance: 0.1,
            max_distance: 500.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub frames_per_second: f32,
}

impl SchedulerSettings {
    pub fn frame_interval(&self) -> Duration {
        let fps = if self.frames_per_second.is_finite() && self.frames_per_second > 0.0 {
            self.frames_per_second
        } else {
            60.0
        };
        Duration::from_secs_f32(1.0 / fps)
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            frames_per_second: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportSettings {
    pub width: u32,
    pub height: u32,
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = PreviewConfig::from_toml_str("").unwrap();
        assert_eq!(config, PreviewConfig::default());
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let config = PreviewConfig::from_toml_str(
            r#"
            [controls]
            damping_factor = 0.1

            [scheduler]
            frames_per_second = 30.0
            "#,
        )
        .unwrap();
        assert!((config.controls.damping_factor - 0.1).abs() < 1e-6);
        assert!((config.controls.rotate_speed - 1.0).abs() < 1e-6);
        assert_eq!(config.scheduler.frame_interval(), Duration::from_secs_f32(1.0 / 30.0));
        assert_eq!(config.sandbox, SandboxLimits::default());
    }

    #[test]
    fn invalid_fps_falls_back_to_sixty() {
        let settings = SchedulerSettings { frames_per_second: 0.0 };
        assert_eq!(settings.frame_interval(), Duration::from_secs_f32(1.0 / 60.0));
    }

    #[test]
    fn malformed_toml_is_reported() {
        assert!(matches!(
            PreviewConfig::from_toml_str("[sandbox\nmax_operations = 1"),
            Err(ConfigError::Parse(_))
        ));
    }
}
