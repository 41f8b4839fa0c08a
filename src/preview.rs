//! One mounted preview: script runtime plus scene, driven message by message.
//!
//! [`Preview`] is what a sandbox worker owns. It can also be driven directly
//! (the CLI does, to render frames without a worker thread). Every entry
//! point contains its own failures: user-code errors and panics become
//! [`SandboxMessage::Error`] events collected for the host, and the previous
//! scene stays on screen.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crate::camera::CameraState;
use crate::config::PreviewConfig;
use crate::controls::PointerEvent;
use crate::error::{EvaluationError, PreviewError, SetupError};
use crate::param_extract::extract_schema;
use crate::params::ParameterSnapshot;
use crate::protocol::{HostMessage, SandboxMessage};
use crate::renderer::RendererFactory;
use crate::scene_manager::{SceneManager, SceneState, SceneStats};
use crate::scheduler::RenderMode;
use crate::scripting::{ScriptRuntime, UserScript};
use crate::script_log::ScriptLogger;

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, EvaluationError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| EvaluationError::Panicked(panic_message(payload)))
}

/// Point-in-time view of a mount, for tests and the CLI.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PreviewSnapshot {
    pub state: SceneState,
    pub mode: RenderMode,
    pub camera: CameraState,
    pub nodes: usize,
    pub meshes: usize,
    pub stats: SceneStats,
}

pub struct Preview {
    runtime: ScriptRuntime,
    scene: SceneManager,
    events: Vec<SandboxMessage>,
}

impl Preview {
    /// Initialize the scene and render once. A setup failure is terminal for
    /// the mount; whatever was created is disposed before returning.
    pub fn mount(
        config: PreviewConfig,
        renderer: RendererFactory,
        persisted: Option<CameraState>,
    ) -> Result<Self, SetupError> {
        let runtime = ScriptRuntime::new(&config.sandbox, ScriptLogger::default());
        let mut scene = SceneManager::new(config);
        scene.initialize(renderer, persisted)?;
        Ok(Self {
            runtime,
            scene,
            events: Vec::new(),
        })
    }

    pub fn handle(&mut self, message: HostMessage) {
        match message {
            HostMessage::LoadScript { code, filename } => self.load(&UserScript { code, filename }),
            HostMessage::UpdateParams { params } => self.update(&params),
        }
    }

    /// Load a script, publish its schema, and install the scene built from
    /// its defaults.
    pub fn load(&mut self, script: &UserScript) {
        self.runtime.logger().end_repeats();
        match guarded(|| self.load_script(script)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.report(e),
            Err(e) => self.report(e),
        }
    }

    fn load_script(&mut self, script: &UserScript) -> Result<(), PreviewError> {
        let extraction = match extract_schema(&script.code) {
            Ok(extraction) => extraction,
            Err(e) => {
                log::warn!("Parameter extraction failed: {}", e);
                self.events.push(SandboxMessage::error(&e));
                None
            }
        };
        let descriptors = extraction
            .as_ref()
            .map(|x| x.descriptors.clone())
            .unwrap_or_default();

        self.runtime.load(script, descriptors.clone())?;

        if let Some(extraction) = &extraction {
            log::debug!(
                "Publishing {} parameters ({:?}, {} parser)",
                descriptors.len(),
                extraction.source,
                extraction.parser
            );
            self.events.push(SandboxMessage::Parameters {
                parameters: descriptors,
            });
        }

        self.evaluate(&ParameterSnapshot::new())
    }

    /// Re-run the active factory with `params`.
    pub fn update(&mut self, params: &ParameterSnapshot) {
        if !self.runtime.is_loaded() {
            log::debug!("Ignoring parameter update: no script loaded");
            return;
        }
        match guarded(|| self.evaluate(params)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.report(e),
            Err(e) => self.report(e),
        }
    }

    fn evaluate(&mut self, params: &ParameterSnapshot) -> Result<(), PreviewError> {
        let evaluation = self.runtime.evaluate(params)?;
        self.scene.install(evaluation.object, evaluation.animated)?;
        Ok(())
    }

    fn report(&mut self, error: impl std::fmt::Display) {
        let message = error.to_string();
        log::warn!("Script error: {}", message);
        self.events.push(SandboxMessage::Error { error: message });
    }

    /// Run one frame at `elapsed` seconds since mount. Returns whether a
    /// render happened.
    pub fn frame(&mut self, elapsed: f32) -> bool {
        let logger = self.runtime.logger().clone();
        logger.reset_frame();

        if self.scene.render_mode() == RenderMode::Continuous {
            match guarded(|| self.runtime.animate(elapsed)) {
                Ok(Ok(Some(states))) => {
                    logger.end_repeats();
                    self.scene.apply_states(&states);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    logger.repeated_error(&e.diagnostic.to_string(), &e.to_string());
                }
                Err(e) => {
                    let message = e.to_string();
                    logger.repeated_error(&message, &message);
                }
            }
        }
        match guarded(|| self.scene.frame()) {
            Ok(rendered) => rendered,
            Err(e) => {
                self.report(e);
                false
            }
        }
    }

    /// Delay until the next frame should run, or `None` when idle.
    pub fn next_frame_delay(&self) -> Option<Duration> {
        self.scene.scheduler().next_frame_delay()
    }

    /// Resize the viewport. A rejected or panicking resize is reported and
    /// the previous size stays.
    pub fn resize(&mut self, width: u32, height: u32) {
        match guarded(|| self.scene.resize(width, height)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.report(e),
            Err(e) => self.report(e),
        }
    }

    pub fn pointer(&mut self, event: PointerEvent) {
        if let Err(e) = guarded(|| self.scene.pointer(event)) {
            self.report(e);
        }
    }

    /// Messages produced since the last call.
    pub fn take_events(&mut self) -> Vec<SandboxMessage> {
        std::mem::take(&mut self.events)
    }

    pub fn scene(&self) -> &SceneManager {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut SceneManager {
        &mut self.scene
    }

    pub fn snapshot(&self) -> PreviewSnapshot {
        PreviewSnapshot {
            state: self.scene.state(),
            mode: self.scene.render_mode(),
            camera: self.scene.camera_state(),
            nodes: self.scene.graph().node_count(),
            meshes: self.scene.graph().mesh_count(),
            stats: self.scene.stats(),
        }
    }

    /// Stop the frame loop and release every scene resource.
    pub fn unmount(&mut self) {
        self.runtime.clear_animation();
        self.scene.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::renderer::{HeadlessRenderer, RenderFrame, RenderStatsHandle, Renderer};
    use crate::scene_graph::{GeometryId, MaterialId};

    fn mount() -> (Preview, RenderStatsHandle) {
        let stats = RenderStatsHandle::default();
        let preview = Preview::mount(
            PreviewConfig::default(),
            HeadlessRenderer::factory(stats.clone()),
            None,
        )
        .unwrap();
        (preview, stats)
    }

    const STATIC: &str = r#"
        let parameters = #{ radius: #{ default: 5 } };
        fn createGeometry(lib, params) { lib.sphere(params.radius, 8, 4) }
    "#;

    #[test]
    fn load_publishes_schema_then_installs() {
        let (mut preview, _) = mount();
        preview.load(&UserScript::new(STATIC));
        let events = preview.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SandboxMessage::Parameters { parameters } if parameters.len() == 1));
        assert_eq!(preview.snapshot().meshes, 1);
    }

    #[test]
    fn update_without_script_is_ignored() {
        let (mut preview, stats) = mount();
        preview.update(&ParameterSnapshot::new().with("radius", 1.0));
        assert!(preview.take_events().is_empty());
        assert_eq!(stats.renders(), 1);
    }

    #[test]
    fn factory_errors_become_error_events() {
        let (mut preview, _) = mount();
        preview.load(&UserScript::new(
            r#"fn createGeometry(lib, params) { if params.fail == true { throw "nope"; } lib.cuboid(1) }"#,
        ));
        assert!(preview.take_events().is_empty());

        preview.update(&ParameterSnapshot::new().with("fail", true));
        let events = preview.take_events();
        assert!(matches!(&events[..], [SandboxMessage::Error { error }] if error.contains("nope")));
        assert_eq!(preview.snapshot().meshes, 1);
    }

    #[test]
    fn malformed_block_reports_and_continues() {
        let (mut preview, _) = mount();
        preview.load(&UserScript::new(
            "let parameters = #{ radius: #{ default: 5 };\nfn createGeometry(lib, params) { lib.cuboid(1) }",
        ));
        let events = preview.take_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SandboxMessage::Error { .. })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, SandboxMessage::Parameters { .. })));
    }

    #[test]
    fn animation_drives_continuous_frames() {
        let (mut preview, stats) = mount();
        preview.load(&UserScript::new(
            r#"
            fn createAnimatedScene(lib, params) {
                let m = lib.mesh(lib.cuboid(1));
                #{ object: m, animate: |t| { m.rotation.y = t; } }
            }
            "#,
        ));
        assert_eq!(preview.snapshot().mode, RenderMode::Continuous);
        assert!(preview.next_frame_delay().is_some());

        let before = stats.renders();
        assert!(preview.frame(0.5));
        assert!(preview.frame(1.0));
        assert_eq!(stats.renders(), before + 2);

        preview.unmount();
        assert_eq!(preview.next_frame_delay(), None);
        assert!(!preview.frame(1.5));
        assert_eq!(stats.snapshot().calls_after_dispose, 0);
    }

    /// Renders normally until it is resized past `limit`, then panics the
    /// way a backend validation failure does.
    struct FragileRenderer {
        limit: u32,
        broken: bool,
    }

    impl Renderer for FragileRenderer {
        fn set_size(&mut self, width: u32, _height: u32) -> Result<(), RenderError> {
            if width > self.limit {
                self.broken = true;
                panic!("texture width {width} exceeds {}", self.limit);
            }
            Ok(())
        }

        fn render(&mut self, _frame: &RenderFrame<'_>) -> Result<(), RenderError> {
            if self.broken {
                panic!("render with invalid targets");
            }
            Ok(())
        }

        fn dispose_geometry(&mut self, _id: GeometryId) -> Result<(), RenderError> {
            Ok(())
        }

        fn dispose_material(&mut self, _id: MaterialId) -> Result<(), RenderError> {
            Ok(())
        }

        fn dispose(&mut self) -> Result<(), RenderError> {
            Ok(())
        }
    }

    fn fragile() -> RendererFactory {
        Box::new(|_| {
            Ok(Box::new(FragileRenderer {
                limit: 8192,
                broken: false,
            }) as Box<dyn Renderer>)
        })
    }

    #[test]
    fn viewport_panics_become_error_events() {
        let mut preview = Preview::mount(PreviewConfig::default(), fragile(), None).unwrap();
        preview.load(&UserScript::new(STATIC));
        preview.take_events();

        preview.resize(16384, 16384);
        let events = preview.take_events();
        assert!(matches!(&events[..], [SandboxMessage::Error { error }] if error.contains("16384")));

        preview.pointer(PointerEvent::Wheel { delta: -1.0 });
        assert!(!preview.frame(0.1));
        let events = preview.take_events();
        assert!(matches!(&events[..], [SandboxMessage::Error { error }] if error.contains("invalid targets")));
        assert_eq!(preview.snapshot().meshes, 1);
    }

    #[test]
    fn rejected_resize_is_reported() {
        let (mut preview, stats) = mount();
        preview.resize(16384, 16384);
        let events = preview.take_events();
        assert!(matches!(&events[..], [SandboxMessage::Error { error }] if error.contains("texture limit")));
        assert_eq!(stats.snapshot().size, (800, 600));
    }

    #[test]
    fn failing_animation_is_logged_once_per_distinct_error() {
        let (mut preview, stats) = mount();
        preview.load(&UserScript::new(
            r#"
            fn createAnimatedScene(lib, params) {
                let m = lib.mesh(lib.cuboid(1));
                #{ object: m, animate: |t| { throw "stuck"; } }
            }
            "#,
        ));
        let before = stats.renders();
        for i in 1..=60 {
            assert!(preview.frame(i as f32 / 60.0));
        }
        assert_eq!(stats.renders(), before + 60);
        assert_eq!(preview.runtime.logger().suppressed(), 59);
        assert!(preview.take_events().is_empty());
    }

    #[test]
    fn on_demand_frames_render_only_while_moving() {
        let (mut preview, stats) = mount();
        preview.load(&UserScript::new(STATIC));
        let before = stats.renders();
        assert!(!preview.frame(0.1));
        assert_eq!(stats.renders(), before);

        preview.pointer(PointerEvent::Wheel { delta: -1.0 });
        assert!(preview.next_frame_delay().is_some());
        assert!(preview.frame(0.2));
    }
}
