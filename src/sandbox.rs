//! Script execution sandbox.
//!
//! Each mount runs on its own worker thread, which owns the Rhai engine, the
//! scene and the renderer. The host keeps only channel endpoints: script
//! messages in, [`SandboxMessage`]s out, and a separate viewport channel for
//! resize and pointer input.
//!
//! The worker blocks on its channels while nothing animates and wakes at
//! frame boundaries while the scheduler wants frames. Unmounting stops the
//! frame loop, drops the channels, then disposes the scene, in that order.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, unbounded, Receiver, RecvError, Sender};

use crate::camera::CameraState;
use crate::config::PreviewConfig;
use crate::controls::PointerEvent;
use crate::error::SandboxError;
use crate::params::ParameterSnapshot;
use crate::preview::{Preview, PreviewSnapshot};
use crate::protocol::{HostMessage, SandboxMessage, ViewportCommand};
use crate::renderer::RendererFactory;
use crate::scripting::UserScript;

/// Host side of a mounted sandbox.
pub struct Sandbox {
    scripts: Option<Sender<HostMessage>>,
    viewport: Option<Sender<ViewportCommand>>,
    events: Receiver<SandboxMessage>,
    worker: Option<JoinHandle<Option<PreviewSnapshot>>>,
    last_snapshot: Option<PreviewSnapshot>,
}

impl Sandbox {
    /// Spawn the worker and initialize its scene.
    ///
    /// A setup failure arrives as a single `ERROR` event, after which the
    /// worker exits.
    pub fn mount(
        config: PreviewConfig,
        renderer: RendererFactory,
        persisted: Option<CameraState>,
    ) -> Result<Self, SandboxError> {
        let (script_tx, script_rx) = unbounded();
        let (viewport_tx, viewport_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();

        let worker = thread::Builder::new()
            .name("paramview-sandbox".into())
            .spawn(move || {
                Worker {
                    scripts: script_rx,
                    viewport: viewport_rx,
                    events: event_tx,
                }
                .run(config, renderer, persisted)
            })?;

        Ok(Self {
            scripts: Some(script_tx),
            viewport: Some(viewport_tx),
            events: event_rx,
            worker: Some(worker),
            last_snapshot: None,
        })
    }

    pub fn send(&self, message: HostMessage) -> Result<(), SandboxError> {
        self.scripts
            .as_ref()
            .ok_or(SandboxError::Disconnected)?
            .send(message)
            .map_err(|_| SandboxError::Disconnected)
    }

    pub fn load(&self, script: UserScript) -> Result<(), SandboxError> {
        self.send(HostMessage::load(script))
    }

    pub fn update(&self, params: ParameterSnapshot) -> Result<(), SandboxError> {
        self.send(HostMessage::update(params))
    }

    fn command(&self, command: ViewportCommand) -> Result<(), SandboxError> {
        self.viewport
            .as_ref()
            .ok_or(SandboxError::Disconnected)?
            .send(command)
            .map_err(|_| SandboxError::Disconnected)
    }

    pub fn resize(&self, width: u32, height: u32) -> Result<(), SandboxError> {
        self.command(ViewportCommand::Resize { width, height })
    }

    pub fn pointer(&self, event: PointerEvent) -> Result<(), SandboxError> {
        self.command(ViewportCommand::Pointer(event))
    }

    /// Outgoing messages, in the order the worker produced them.
    pub fn events(&self) -> &Receiver<SandboxMessage> {
        &self.events
    }

    /// Wait up to `timeout` for the next message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SandboxMessage> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Messages already delivered, without waiting.
    pub fn drain_events(&self) -> Vec<SandboxMessage> {
        self.events.try_iter().collect()
    }

    pub fn is_mounted(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop the worker and wait for it to dispose its scene. Idempotent.
    ///
    /// Returns the mount's final state, when the worker got as far as
    /// creating a scene.
    pub fn unmount(&mut self) -> Option<PreviewSnapshot> {
        if let Some(viewport) = self.viewport.take() {
            let _ = viewport.send(ViewportCommand::Unmount);
        }
        self.scripts.take();

        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(snapshot) => self.last_snapshot = snapshot,
                Err(_) => log::error!("Sandbox worker panicked during teardown"),
            }
        }
        self.last_snapshot.clone()
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.unmount();
    }
}

enum Step {
    Script(Result<HostMessage, RecvError>),
    Viewport(Result<ViewportCommand, RecvError>),
    Frame,
}

struct Worker {
    scripts: Receiver<HostMessage>,
    viewport: Receiver<ViewportCommand>,
    events: Sender<SandboxMessage>,
}

impl Worker {
    fn run(
        self,
        config: PreviewConfig,
        renderer: RendererFactory,
        persisted: Option<CameraState>,
    ) -> Option<PreviewSnapshot> {
        let mut preview = match Preview::mount(config, renderer, persisted) {
            Ok(preview) => preview,
            Err(e) => {
                log::error!("Sandbox setup failed: {}", e);
                let _ = self.events.send(SandboxMessage::error(format!("setup failed: {e}")));
                return None;
            }
        };

        let mounted_at = Instant::now();
        let mut next_frame: Option<Instant> = None;

        loop {
            let timeout = match preview.next_frame_delay() {
                Some(interval) => {
                    let at = *next_frame.get_or_insert_with(|| Instant::now() + interval);
                    Some(at.saturating_duration_since(Instant::now()))
                }
                None => {
                    next_frame = None;
                    None
                }
            };

            let step = match timeout {
                Some(timeout) => select! {
                    recv(self.scripts) -> msg => Step::Script(msg),
                    recv(self.viewport) -> cmd => Step::Viewport(cmd),
                    default(timeout) => Step::Frame,
                },
                None => select! {
                    recv(self.scripts) -> msg => Step::Script(msg),
                    recv(self.viewport) -> cmd => Step::Viewport(cmd),
                },
            };

            match step {
                Step::Script(Ok(message)) => preview.handle(message),
                Step::Viewport(Ok(ViewportCommand::Resize { width, height })) => {
                    preview.resize(width, height)
                }
                Step::Viewport(Ok(ViewportCommand::Pointer(event))) => preview.pointer(event),
                Step::Frame => {
                    next_frame = None;
                    preview.frame(mounted_at.elapsed().as_secs_f32());
                }
                Step::Viewport(Ok(ViewportCommand::Unmount))
                | Step::Script(Err(_))
                | Step::Viewport(Err(_)) => break,
            }

            for event in preview.take_events() {
                if self.events.send(event).is_err() {
                    log::debug!("Host stopped listening; dropping sandbox events");
                    break;
                }
            }
        }

        preview.scene_mut().stop();
        drop(self);
        preview.unmount();

        let snapshot = preview.snapshot();
        log::info!(
            "Sandbox unmounted after {} renders ({} frames)",
            snapshot.stats.renders,
            preview.scene().scheduler().frames()
        );
        Some(snapshot)
    }
}
