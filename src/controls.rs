//! Damped orbit controls.
//!
//! Pointer input accumulates rotation, zoom and pan deltas; `update` applies a
//! `damping_factor` fraction of what remains each frame, so motion eases out
//! over several frames after the pointer is released. The camera orbits its
//! target on a sphere (`theta` around Y, `phi` from the pole).

use std::f32::consts::{PI, TAU};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::camera::PerspectiveCamera;
use crate::config::ControlSettings;

/// Motion below this is treated as settled.
const EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerButton {
    /// Rotate.
    Primary,
    /// Pan.
    Secondary,
}

/// Viewport pointer input, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PointerEvent {
    Down { x: f32, y: f32, button: PointerButton },
    Move { x: f32, y: f32 },
    Up,
    /// Positive `delta` zooms out.
    Wheel { delta: f32 },
}

/// Effect of a pointer event on the interaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Started,
    Ended,
    /// The event changed the pending camera motion without starting or
    /// ending a drag (wheel, move).
    Changed,
    Ignored,
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    button: PointerButton,
    last: (f32, f32),
}

#[derive(Debug)]
pub struct OrbitControls {
    settings: ControlSettings,
    delta_theta: f32,
    delta_phi: f32,
    zoom_scale: f32,
    pan_offset: Vec3,
    drag: Option<Drag>,
    viewport_height: f32,
    disposed: bool,
}

impl OrbitControls {
    pub fn new(settings: ControlSettings) -> Self {
        Self {
            settings,
            delta_theta: 0.0,
            delta_phi: 0.0,
            zoom_scale: 1.0,
            pan_offset: Vec3::ZERO,
            drag: None,
            viewport_height: 1.0,
            disposed: false,
        }
    }

    pub fn damping_factor(&self) -> f32 {
        self.settings.damping_factor
    }

    pub fn set_viewport_height(&mut self, height: u32) {
        if height > 0 {
            self.viewport_height = height as f32;
        }
    }

    pub fn is_interacting(&self) -> bool {
        self.drag.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Whether un-applied motion remains.
    pub fn is_settling(&self) -> bool {
        self.delta_theta.abs() > EPSILON
            || self.delta_phi.abs() > EPSILON
            || (self.zoom_scale - 1.0).abs() > EPSILON
            || self.pan_offset.length_squared() > EPSILON * EPSILON
    }

    pub fn handle_pointer(&mut self, event: PointerEvent, camera: &PerspectiveCamera) -> Interaction {
        if self.disposed {
            return Interaction::Ignored;
        }

        match event {
            PointerEvent::Down { x, y, button } => {
                let started = self.drag.is_none();
                self.drag = Some(Drag { button, last: (x, y) });
                if started {
                    Interaction::Started
                } else {
                    Interaction::Changed
                }
            }
            PointerEvent::Move { x, y } => {
                let Some(drag) = self.drag.as_mut() else {
                    return Interaction::Ignored;
                };
                let (dx, dy) = (x - drag.last.0, y - drag.last.1);
                drag.last = (x, y);

                match drag.button {
                    PointerButton::Primary => self.rotate(dx, dy),
                    PointerButton::Secondary => self.pan(dx, dy, camera),
                }
                Interaction::Changed
            }
            PointerEvent::Up => {
                if self.drag.take().is_some() {
                    Interaction::Ended
                } else {
                    Interaction::Ignored
                }
            }
            PointerEvent::Wheel { delta } => {
                if delta == 0.0 || !delta.is_finite() {
                    return Interaction::Ignored;
                }
                let step = 0.95f32.powf(self.settings.zoom_speed);
                if delta > 0.0 {
                    self.zoom_scale /= step;
                } else {
                    self.zoom_scale *= step;
                }
                Interaction::Changed
            }
        }
    }

    fn rotate(&mut self, dx: f32, dy: f32) {
        let speed = self.settings.rotate_speed;
        self.delta_theta -= TAU * dx / self.viewport_height * speed;
        self.delta_phi -= TAU * dy / self.viewport_height * speed;
    }

    fn pan(&mut self, dx: f32, dy: f32, camera: &PerspectiveCamera) {
        let distance = camera.position.distance(camera.target);
        let world_per_pixel =
            2.0 * distance * (camera.fov.to_radians() * 0.5).tan() / self.viewport_height;
        let forward = camera.forward();
        let right = forward.cross(camera.up).normalize_or_zero();
        let up = right.cross(forward);
        self.pan_offset +=
            (-right * dx + up * dy) * world_per_pixel * self.settings.pan_speed;
    }

    /// Apply one damped step to `camera`. Returns true when the camera moved.
    pub fn update(&mut self, camera: &mut PerspectiveCamera) -> bool {
        if self.disposed {
            return false;
        }

        let damping = self.settings.damping_factor.clamp(0.0, 1.0);
        let before = camera.state();

        let offset = camera.position - camera.target;
        let radius = offset.length();
        let mut theta = offset.x.atan2(offset.z);
        let mut phi = if radius > EPSILON {
            (offset.y / radius).clamp(-1.0, 1.0).acos()
        } else {
            PI * 0.5
        };

        theta += self.delta_theta * damping;
        phi = (phi + self.delta_phi * damping).clamp(EPSILON, PI - EPSILON);
        let radius = (radius * self.zoom_scale)
            .clamp(self.settings.min_distance, self.settings.max_distance);

        camera.target += self.pan_offset * damping;
        camera.position = camera.target
            + Vec3::new(
                radius * phi.sin() * theta.sin(),
                radius * phi.cos(),
                radius * phi.sin() * theta.cos(),
            );

        self.delta_theta *= 1.0 - damping;
        self.delta_phi *= 1.0 - damping;
        self.pan_offset *= 1.0 - damping;
        self.zoom_scale = 1.0;
        if !self.is_settling() {
            self.delta_theta = 0.0;
            self.delta_phi = 0.0;
            self.pan_offset = Vec3::ZERO;
        }

        before.position.distance_squared(camera.position) > EPSILON
            || before.target.distance_squared(camera.target) > EPSILON
    }

    /// Release input state. Later events and updates are ignored.
    pub fn dispose(&mut self) {
        self.drag = None;
        self.delta_theta = 0.0;
        self.delta_phi = 0.0;
        self.zoom_scale = 1.0;
        self.pan_offset = Vec3::ZERO;
        self.disposed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraSettings;

    fn setup() -> (OrbitControls, PerspectiveCamera) {
        let mut controls = OrbitControls::new(ControlSettings::default());
        controls.set_viewport_height(600);
        (controls, PerspectiveCamera::new(&CameraSettings::default(), None))
    }

    #[test]
    fn idle_update_does_not_move_camera() {
        let (mut controls, mut camera) = setup();
        let before = camera.state();
        assert!(!controls.update(&mut camera));
        assert!(camera.position.abs_diff_eq(before.position, 1e-4));
    }

    #[test]
    fn drag_rotates_with_damping_and_keeps_distance() {
        let (mut controls, mut camera) = setup();
        let distance = camera.state().distance();

        assert_eq!(
            controls.handle_pointer(PointerEvent::Down { x: 100.0, y: 100.0, button: PointerButton::Primary }, &camera),
            Interaction::Started
        );
        controls.handle_pointer(PointerEvent::Move { x: 160.0, y: 100.0 }, &camera);
        assert!(controls.is_interacting());

        let start = camera.position;
        assert!(controls.update(&mut camera));
        let first_step = start.distance(camera.position);
        let mid = camera.position;
        assert!(controls.update(&mut camera));
        let second_step = mid.distance(camera.position);

        assert!(second_step < first_step, "motion should ease out");
        assert!((camera.state().distance() - distance).abs() < 1e-3);

        assert_eq!(controls.handle_pointer(PointerEvent::Up, &camera), Interaction::Ended);
        assert!(!controls.is_interacting());
    }

    #[test]
    fn wheel_zooms_within_limits() {
        let (mut controls, mut camera) = setup();
        let distance = camera.state().distance();
        controls.handle_pointer(PointerEvent::Wheel { delta: -1.0 }, &camera);
        controls.update(&mut camera);
        assert!(camera.state().distance() < distance);

        for _ in 0..500 {
            controls.handle_pointer(PointerEvent::Wheel { delta: 1.0 }, &camera);
            controls.update(&mut camera);
        }
        assert!(camera.state().distance() <= ControlSettings::default().max_distance + 1e-3);
    }

    #[test]
    fn disposed_controls_ignore_input() {
        let (mut controls, mut camera) = setup();
        controls.dispose();
        assert_eq!(
            controls.handle_pointer(PointerEvent::Wheel { delta: 1.0 }, &camera),
            Interaction::Ignored
        );
        assert!(!controls.update(&mut camera));
    }

    #[test]
    fn pointer_events_round_trip_json() {
        let event: PointerEvent =
            serde_json::from_str(r#"{"kind":"down","x":1,"y":2,"button":"primary"}"#).unwrap();
        assert_eq!(
            event,
            PointerEvent::Down { x: 1.0, y: 2.0, button: PointerButton::Primary }
        );
    }
}
