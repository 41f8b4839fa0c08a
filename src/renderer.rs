//! Renderer seam.
//!
//! The scene manager drives rendering and resource release through
//! [`Renderer`]; resources are identified by the graph's ids so a backend can
//! cache whatever it uploads and free it when told. [`HeadlessRenderer`]
//! draws nothing and records every call, which is what tests and dry runs use.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::camera::PerspectiveCamera;
use crate::config::PreviewConfig;
use crate::error::{RenderError, SetupError};
use crate::lighting::LightRig;
use crate::scene_graph::{GeometryId, MaterialId, SceneGraph};

/// Everything needed to draw one frame.
pub struct RenderFrame<'a> {
    pub graph: &'a SceneGraph,
    pub camera: &'a PerspectiveCamera,
    pub lights: &'a LightRig,
}

pub trait Renderer {
    /// Resize the output surface.
    fn set_size(&mut self, width: u32, height: u32) -> Result<(), RenderError>;

    fn render(&mut self, frame: &RenderFrame<'_>) -> Result<(), RenderError>;

    /// Release everything uploaded for a geometry.
    fn dispose_geometry(&mut self, id: GeometryId) -> Result<(), RenderError>;

    fn dispose_material(&mut self, id: MaterialId) -> Result<(), RenderError>;

    /// Release the device/surface. Later calls fail with [`RenderError::Disposed`].
    fn dispose(&mut self) -> Result<(), RenderError>;

    /// Pixels of the last rendered frame, when the backend keeps them.
    fn snapshot(&mut self) -> Result<Option<image::RgbaImage>, RenderError> {
        Ok(None)
    }
}

/// Reject surface sizes a device whose textures are limited to
/// `max_dimension` texels per side cannot allocate.
pub fn check_size(width: u32, height: u32, max_dimension: u32) -> Result<(), RenderError> {
    if width == 0 || height == 0 || width > max_dimension || height > max_dimension {
        return Err(RenderError::Backend(format!(
            "cannot resize to {width}x{height} (texture limit {max_dimension})"
        )));
    }
    Ok(())
}

/// Builds the renderer inside the thread that will own it.
pub type RendererFactory =
    Box<dyn FnOnce(&PreviewConfig) -> Result<Box<dyn Renderer>, SetupError> + Send>;

/// Counters recorded by [`HeadlessRenderer`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderStats {
    pub renders: u64,
    /// Meshes drawn by the most recent render.
    pub last_draw_count: usize,
    pub size: (u32, u32),
    pub disposed_geometries: Vec<GeometryId>,
    pub disposed_materials: Vec<MaterialId>,
    pub renderer_disposed: bool,
    /// Calls of any kind made after `dispose`.
    pub calls_after_dispose: u64,
}

impl RenderStats {
    /// Number of resources released more than once.
    pub fn double_frees(&self) -> usize {
        let geometries: HashSet<_> = self.disposed_geometries.iter().collect();
        let materials: HashSet<_> = self.disposed_materials.iter().collect();
        (self.disposed_geometries.len() - geometries.len())
            + (self.disposed_materials.len() - materials.len())
    }
}

/// Shared view of a [`HeadlessRenderer`]'s counters, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct RenderStatsHandle(Arc<Mutex<RenderStats>>);

impl RenderStatsHandle {
    pub fn snapshot(&self) -> RenderStats {
        self.0.lock().clone()
    }

    pub fn renders(&self) -> u64 {
        self.0.lock().renders
    }
}

#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    stats: RenderStatsHandle,
    disposed: bool,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> RenderStatsHandle {
        self.stats.clone()
    }

    /// Factory that builds a headless renderer reporting into `stats`.
    pub fn factory(stats: RenderStatsHandle) -> RendererFactory {
        Box::new(move |config: &PreviewConfig| {
            let mut renderer = HeadlessRenderer {
                stats,
                disposed: false,
            };
            renderer
                .set_size(config.viewport.width, config.viewport.height)
                .map_err(|e| SetupError::NoSurface(e.to_string()))?;
            Ok(Box::new(renderer) as Box<dyn Renderer>)
        })
    }

    fn guard(&self) -> Result<(), RenderError> {
        if self.disposed {
            self.stats.0.lock().calls_after_dispose += 1;
            return Err(RenderError::Disposed);
        }
        Ok(())
    }
}

impl Renderer for HeadlessRenderer {
    fn set_size(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        self.guard()?;
        check_size(width, height, wgpu::Limits::default().max_texture_dimension_2d)?;
        self.stats.0.lock().size = (width, height);
        Ok(())
    }

    fn render(&mut self, frame: &RenderFrame<'_>) -> Result<(), RenderError> {
        self.guard()?;
        let draw_count = frame.graph.draw_list().len();
        let mut stats = self.stats.0.lock();
        stats.renders += 1;
        stats.last_draw_count = draw_count;
        Ok(())
    }

    fn dispose_geometry(&mut self, id: GeometryId) -> Result<(), RenderError> {
        self.guard()?;
        self.stats.0.lock().disposed_geometries.push(id);
        Ok(())
    }

    fn dispose_material(&mut self, id: MaterialId) -> Result<(), RenderError> {
        self.guard()?;
        self.stats.0.lock().disposed_materials.push(id);
        Ok(())
    }

    fn dispose(&mut self) -> Result<(), RenderError> {
        self.guard()?;
        self.disposed = true;
        self.stats.0.lock().renderer_disposed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraSettings;

    #[test]
    fn records_calls_and_rejects_use_after_dispose() {
        let mut renderer = HeadlessRenderer::new();
        let stats = renderer.stats();
        let graph = SceneGraph::new();
        let camera = PerspectiveCamera::new(&CameraSettings::default(), None);
        let lights = LightRig::default();
        let frame = RenderFrame {
            graph: &graph,
            camera: &camera,
            lights: &lights,
        };

        renderer.render(&frame).unwrap();
        renderer.dispose_geometry(GeometryId(1)).unwrap();
        renderer.dispose().unwrap();
        assert!(matches!(renderer.render(&frame), Err(RenderError::Disposed)));

        let s = stats.snapshot();
        assert_eq!(s.renders, 1);
        assert!(s.renderer_disposed);
        assert_eq!(s.calls_after_dispose, 1);
        assert_eq!(s.double_frees(), 0);
    }

    #[test]
    fn factory_applies_viewport() {
        let stats = RenderStatsHandle::default();
        let factory = HeadlessRenderer::factory(stats.clone());
        let _renderer = factory(&PreviewConfig::default()).unwrap();
        assert_eq!(stats.snapshot().size, (800, 600));
    }

    #[test]
    fn oversized_surfaces_are_rejected() {
        let mut renderer = HeadlessRenderer::new();
        let stats = renderer.stats();
        renderer.set_size(640, 480).unwrap();
        assert!(matches!(
            renderer.set_size(16384, 16384),
            Err(RenderError::Backend(_))
        ));
        assert!(check_size(0, 10, 8192).is_err());
        assert!(check_size(8192, 8192, 8192).is_ok());
        assert_eq!(stats.snapshot().size, (640, 480));
    }
}
