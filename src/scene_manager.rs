//! Scene lifecycle manager.
//!
//! Owns the scene graph, camera, lights, orbit controls, render scheduler and
//! renderer of one mount. State transitions:
//!
//! ```text
//! Uninitialized -> Initializing -> Ready <-> Updating
//!                                   |
//!                                   v
//!                                Disposed
//! ```
//!
//! Disposal never fails: each resource release is attempted on its own, and a
//! failure is logged before moving on to the next.

use serde::Serialize;

use crate::camera::{CameraState, PerspectiveCamera};
use crate::config::PreviewConfig;
use crate::controls::{Interaction, OrbitControls, PointerEvent};
use crate::error::{DisposalError, RenderError, SetupError};
use crate::lighting::LightRig;
use crate::renderer::{RenderFrame, Renderer, RendererFactory};
use crate::scene_graph::{Detached, EntityId, NodeState, SceneGraph, SceneObject};
use crate::scheduler::{ModeSwitch, RenderMode, RenderScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneState {
    Uninitialized,
    Initializing,
    Ready,
    Updating,
    Disposed,
}

impl SceneState {
    fn name(self) -> &'static str {
        match self {
            SceneState::Uninitialized => "uninitialized",
            SceneState::Initializing => "initializing",
            SceneState::Ready => "ready",
            SceneState::Updating => "updating",
            SceneState::Disposed => "disposed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SceneStats {
    pub renders: u64,
    pub installs: u64,
    pub disposed_geometries: u64,
    pub disposed_materials: u64,
    pub disposal_failures: u64,
}

pub struct SceneManager {
    state: SceneState,
    config: PreviewConfig,
    renderer: Option<Box<dyn Renderer>>,
    graph: SceneGraph,
    camera: PerspectiveCamera,
    lights: LightRig,
    controls: OrbitControls,
    scheduler: RenderScheduler,
    active: Option<EntityId>,
    size: (u32, u32),
    stats: SceneStats,
}

impl SceneManager {
    pub fn new(config: PreviewConfig) -> Self {
        let size = (config.viewport.width, config.viewport.height);
        Self {
            state: SceneState::Uninitialized,
            camera: PerspectiveCamera::new(&config.camera, None),
            controls: OrbitControls::new(config.controls.clone()),
            scheduler: RenderScheduler::new(config.scheduler.frame_interval()),
            lights: LightRig::default(),
            graph: SceneGraph::new(),
            renderer: None,
            active: None,
            size,
            stats: SceneStats::default(),
            config,
        }
    }

    pub fn state(&self) -> SceneState {
        self.state
    }

    /// Set up the renderer, camera, lights and controls, then render once.
    ///
    /// Runs at most once. A failed setup leaves the manager in
    /// `Initializing`, from which only [`dispose`](Self::dispose) proceeds.
    pub fn initialize(
        &mut self,
        factory: RendererFactory,
        persisted: Option<CameraState>,
    ) -> Result<(), SetupError> {
        match self.state {
            SceneState::Uninitialized => {}
            SceneState::Disposed => return Err(SetupError::Disposed),
            _ => return Err(SetupError::AlreadyInitialized),
        }
        self.state = SceneState::Initializing;

        let (width, height) = self.size;
        if width == 0 || height == 0 {
            return Err(SetupError::EmptyViewport { width, height });
        }

        self.renderer = Some(factory(&self.config)?);

        self.camera = PerspectiveCamera::new(&self.config.camera, persisted);
        self.camera.set_viewport(width, height);
        self.controls.set_viewport_height(height);

        self.state = SceneState::Ready;
        log::info!(
            "Scene initialized ({}x{}, {} lights, damping {})",
            width,
            height,
            self.lights.light_count(),
            self.controls.damping_factor()
        );

        self.render();
        Ok(())
    }

    /// Replace the active object with `object`.
    ///
    /// The previous object's geometry and materials are released before the
    /// new object is inserted. The render mode follows `animated`.
    pub fn install(&mut self, object: SceneObject, animated: bool) -> Result<EntityId, SetupError> {
        match self.state {
            SceneState::Ready => {}
            SceneState::Disposed => return Err(SetupError::Disposed),
            other => return Err(SetupError::NotReady(other.name())),
        }
        self.state = SceneState::Updating;

        if let Some(previous) = self.active.take() {
            let detached = self.graph.remove(previous);
            self.release(detached);
        }
        let id = self.graph.insert(object);
        self.active = Some(id);
        self.stats.installs += 1;

        let mode = if animated {
            RenderMode::Continuous
        } else {
            RenderMode::OnDemand
        };
        let switch = self.scheduler.set_mode(mode);
        log::debug!(
            "Installed {:?} ({} nodes, mode {:?}, {:?})",
            id,
            self.graph.node_count(),
            mode,
            switch
        );

        self.state = SceneState::Ready;
        match switch {
            ModeSwitch::StartLoop => {}
            ModeSwitch::RenderOnce => self.render(),
            ModeSwitch::Unchanged if mode == RenderMode::OnDemand => self.render(),
            ModeSwitch::Unchanged => {}
        }
        Ok(id)
    }

    /// Copy per-frame animation state into the active object.
    pub fn apply_states(&mut self, states: &[NodeState]) {
        if let Some(root) = self.active {
            self.graph.apply_states(root, states);
        }
    }

    /// Advance one frame: step the controls and render when needed.
    /// Returns whether a render happened.
    pub fn frame(&mut self) -> bool {
        if self.state != SceneState::Ready {
            return false;
        }
        let camera_moved = self.controls.update(&mut self.camera);
        let rendered = if self.scheduler.mode() == RenderMode::Continuous
            || camera_moved
            || self.scheduler.is_interacting()
        {
            self.render();
            true
        } else {
            false
        };
        self.scheduler.set_settling(self.controls.is_settling());
        self.scheduler.record_frame();
        rendered
    }

    /// Resize the viewport. A size the renderer rejects leaves the previous
    /// size in place.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if !matches!(self.state, SceneState::Ready | SceneState::Uninitialized) {
            return Ok(());
        }
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {}x{}", width, height);
            return Ok(());
        }
        if let Some(renderer) = self.renderer.as_mut() {
            if let Err(e) = renderer.set_size(width, height) {
                log::warn!("Failed to resize renderer to {}x{}: {}", width, height, e);
                return Err(e);
            }
        }

        self.size = (width, height);
        self.camera.set_viewport(width, height);
        self.controls.set_viewport_height(height);
        if self.renderer.is_some() && self.scheduler.mode() == RenderMode::OnDemand {
            self.render();
        }
        Ok(())
    }

    pub fn pointer(&mut self, event: PointerEvent) {
        if self.state != SceneState::Ready {
            return;
        }
        match self.controls.handle_pointer(event, &self.camera) {
            Interaction::Started => self.scheduler.begin_interaction(),
            Interaction::Ended => self.scheduler.end_interaction(),
            Interaction::Changed | Interaction::Ignored => {}
        }
        self.scheduler.set_settling(self.controls.is_settling());
    }

    /// Draw the current scene. Failures are logged.
    pub fn render(&mut self) {
        if self.state != SceneState::Ready {
            return;
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        let frame = RenderFrame {
            graph: &self.graph,
            camera: &self.camera,
            lights: &self.lights,
        };
        match renderer.render(&frame) {
            Ok(()) => self.stats.renders += 1,
            Err(e) => log::warn!("Render failed: {}", e),
        }
    }

    /// Pixels of the last rendered frame, if the renderer keeps them.
    pub fn snapshot(&mut self) -> Result<Option<image::RgbaImage>, RenderError> {
        match self.renderer.as_mut() {
            Some(renderer) => renderer.snapshot(),
            None => Ok(None),
        }
    }

    fn release(&mut self, detached: Detached) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        for id in detached.geometries {
            match renderer.dispose_geometry(id) {
                Ok(()) => self.stats.disposed_geometries += 1,
                Err(e) => {
                    self.stats.disposal_failures += 1;
                    log::warn!("{}", DisposalError::new(format!("geometry {}", id.0), e.to_string()));
                }
            }
        }
        for id in detached.materials {
            match renderer.dispose_material(id) {
                Ok(()) => self.stats.disposed_materials += 1,
                Err(e) => {
                    self.stats.disposal_failures += 1;
                    log::warn!("{}", DisposalError::new(format!("material {}", id.0), e.to_string()));
                }
            }
        }
    }

    /// Cancel frame scheduling without releasing anything yet.
    pub fn stop(&mut self) {
        self.scheduler.cancel();
    }

    /// Tear everything down. Idempotent, and safe after a failed setup.
    pub fn dispose(&mut self) {
        if self.state == SceneState::Disposed {
            return;
        }
        self.scheduler.cancel();
        self.controls.dispose();

        let detached = self.graph.drain();
        let swept = detached.nodes.len();
        self.release(detached);

        if let Some(mut renderer) = self.renderer.take() {
            if let Err(e) = renderer.dispose() {
                self.stats.disposal_failures += 1;
                log::warn!("{}", DisposalError::new("renderer", e.to_string()));
            }
        }
        self.active = None;
        self.state = SceneState::Disposed;
        log::info!(
            "Scene disposed ({} nodes swept, {} renders)",
            swept,
            self.stats.renders
        );
    }

    pub fn camera_state(&self) -> CameraState {
        self.camera.state()
    }

    pub fn render_mode(&self) -> RenderMode {
        self.scheduler.mode()
    }

    pub fn scheduler(&self) -> &RenderScheduler {
        &self.scheduler
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn active(&self) -> Option<EntityId> {
        self.active
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn stats(&self) -> SceneStats {
        self.stats
    }
}

impl Drop for SceneManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::PointerButton;
    use crate::geometry::Geometry;
    use crate::material::{Material, MaterialSlot};
    use crate::renderer::{HeadlessRenderer, RenderStatsHandle};

    fn ready() -> (SceneManager, RenderStatsHandle) {
        let stats = RenderStatsHandle::default();
        let mut scene = SceneManager::new(PreviewConfig::default());
        scene
            .initialize(HeadlessRenderer::factory(stats.clone()), None)
            .unwrap();
        (scene, stats)
    }

    fn cube() -> SceneObject {
        SceneObject::mesh(Geometry::cuboid(1.0, 1.0, 1.0), MaterialSlot::default())
    }

    #[test]
    fn initialize_renders_once_and_rejects_reentry() {
        let (mut scene, stats) = ready();
        assert_eq!(scene.state(), SceneState::Ready);
        assert_eq!(stats.renders(), 1);
        assert_eq!(scene.render_mode(), RenderMode::OnDemand);

        let again = scene.initialize(HeadlessRenderer::factory(stats.clone()), None);
        assert!(matches!(again, Err(SetupError::AlreadyInitialized)));
    }

    #[test]
    fn replacing_releases_previous_resources_once() {
        let (mut scene, stats) = ready();
        scene.install(cube(), false).unwrap();
        assert_eq!(stats.snapshot().disposed_geometries.len(), 0);

        scene.install(cube(), false).unwrap();
        let s = stats.snapshot();
        assert_eq!(s.disposed_geometries.len(), 1);
        assert_eq!(s.disposed_materials.len(), 1);
        assert_eq!(scene.graph().mesh_count(), 1);
    }

    #[test]
    fn material_arrays_release_every_element() {
        let (mut scene, stats) = ready();
        let multi = SceneObject::mesh(
            Geometry::cuboid(1.0, 1.0, 1.0),
            MaterialSlot::Array(vec![Material::default(); 3]),
        );
        scene.install(multi, false).unwrap();
        scene.install(cube(), false).unwrap();
        assert_eq!(stats.snapshot().disposed_materials.len(), 3);
    }

    #[test]
    fn mode_follows_animation_and_renders_on_switch_back() {
        let (mut scene, stats) = ready();
        scene.install(cube(), true).unwrap();
        assert_eq!(scene.render_mode(), RenderMode::Continuous);
        assert!(scene.scheduler().next_frame_delay().is_some());

        let before = stats.renders();
        scene.install(cube(), false).unwrap();
        assert_eq!(scene.render_mode(), RenderMode::OnDemand);
        assert_eq!(stats.renders(), before + 1);
    }

    #[test]
    fn camera_survives_reinstall() {
        let (mut scene, _stats) = ready();
        scene.pointer(PointerEvent::Down { x: 0.0, y: 0.0, button: PointerButton::Primary });
        scene.pointer(PointerEvent::Move { x: 40.0, y: 10.0 });
        scene.pointer(PointerEvent::Up);
        for _ in 0..10 {
            scene.frame();
        }
        let moved = scene.camera_state();

        scene.install(cube(), false).unwrap();
        scene.install(cube(), false).unwrap();
        assert_eq!(scene.camera_state(), moved);
    }

    #[test]
    fn resize_renders_in_on_demand_mode() {
        let (mut scene, stats) = ready();
        scene.resize(320, 240).unwrap();
        assert_eq!(stats.snapshot().size, (320, 240));
        assert_eq!(stats.renders(), 2);
    }

    #[test]
    fn rejected_resize_keeps_the_previous_size() {
        let (mut scene, stats) = ready();
        scene.resize(320, 240).unwrap();
        assert!(matches!(
            scene.resize(16384, 16384),
            Err(RenderError::Backend(_))
        ));
        assert_eq!(stats.snapshot().size, (320, 240));
        assert_eq!(stats.renders(), 2);
        assert_eq!(scene.state(), SceneState::Ready);
    }

    #[test]
    fn dispose_sweeps_everything_and_is_idempotent() {
        let (mut scene, stats) = ready();
        scene.install(cube(), true).unwrap();
        scene.dispose();
        scene.dispose();

        let s = stats.snapshot();
        assert!(s.renderer_disposed);
        assert_eq!(s.disposed_geometries.len(), 1);
        assert_eq!(s.calls_after_dispose, 0);
        assert_eq!(s.double_frees(), 0);
        assert!(scene.scheduler().is_cancelled());
        assert!(scene.graph().is_empty());

        scene.render();
        assert!(scene.resize(10, 10).is_ok());
        assert!(matches!(scene.install(cube(), false), Err(SetupError::Disposed)));
        assert_eq!(stats.snapshot().calls_after_dispose, 0);
    }

    #[test]
    fn dispose_after_failed_setup() {
        let mut scene = SceneManager::new(PreviewConfig::default());
        let failing: RendererFactory = Box::new(|_| Err(SetupError::NoSurface("no adapter".into())));
        assert!(scene.initialize(failing, None).is_err());
        assert_eq!(scene.state(), SceneState::Initializing);
        scene.dispose();
        assert_eq!(scene.state(), SceneState::Disposed);
    }

    #[test]
    fn persisted_camera_is_used() {
        let stats = RenderStatsHandle::default();
        let mut scene = SceneManager::new(PreviewConfig::default());
        let persisted = CameraState {
            position: glam::Vec3::new(0.0, 2.0, 9.0),
            target: glam::Vec3::new(0.0, 1.0, 0.0),
        };
        scene
            .initialize(HeadlessRenderer::factory(stats), Some(persisted))
            .unwrap();
        assert_eq!(scene.camera_state(), persisted);
    }
}
