//! Render scheduling.
//!
//! [`RenderScheduler`] does no timing itself. The loop that owns it asks
//! [`RenderScheduler::next_frame_delay`] whether to wake at the next frame
//! boundary or to sleep until input arrives, and acts on the [`ModeSwitch`]
//! returned when the mode changes.

use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Re-render every frame (animated scenes).
    Continuous,
    /// Render only on camera change, resize or active interaction.
    OnDemand,
}

/// Side effect required by a mode change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSwitch {
    Unchanged,
    /// OnDemand → Continuous: the loop starts at the next frame boundary.
    StartLoop,
    /// Continuous → OnDemand: render once now so the view does not go stale.
    RenderOnce,
}

#[derive(Debug, Clone)]
pub struct RenderScheduler {
    mode: RenderMode,
    frame_interval: Duration,
    interacting: bool,
    settling: bool,
    cancelled: bool,
    frames: u64,
}

impl RenderScheduler {
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            mode: RenderMode::OnDemand,
            frame_interval,
            interacting: false,
            settling: false,
            cancelled: false,
            frames: 0,
        }
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    pub fn set_mode(&mut self, mode: RenderMode) -> ModeSwitch {
        if self.cancelled || mode == self.mode {
            return ModeSwitch::Unchanged;
        }
        let previous = std::mem::replace(&mut self.mode, mode);
        log::debug!("Render mode {:?} -> {:?}", previous, mode);
        match mode {
            RenderMode::Continuous => ModeSwitch::StartLoop,
            RenderMode::OnDemand => ModeSwitch::RenderOnce,
        }
    }

    /// Pointer interaction started: run a temporary per-frame loop.
    pub fn begin_interaction(&mut self) {
        self.interacting = true;
    }

    pub fn end_interaction(&mut self) {
        self.interacting = false;
    }

    pub fn is_interacting(&self) -> bool {
        self.interacting
    }

    /// Damped controls still moving after the pointer was released.
    pub fn set_settling(&mut self, settling: bool) {
        self.settling = settling;
    }

    /// Whether frames should be scheduled at all.
    pub fn wants_frames(&self) -> bool {
        !self.cancelled
            && (self.mode == RenderMode::Continuous || self.interacting || self.settling)
    }

    /// Delay until the next frame, or `None` to wait for input indefinitely.
    pub fn next_frame_delay(&self) -> Option<Duration> {
        self.wants_frames().then_some(self.frame_interval)
    }

    /// Stop scheduling permanently.
    pub fn cancel(&mut self) {
        if !self.cancelled {
            log::debug!("Render loop cancelled after {} frames", self.frames);
        }
        self.cancelled = true;
        self.interacting = false;
        self.settling = false;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn record_frame(&mut self) {
        self.frames += 1;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> RenderScheduler {
        RenderScheduler::new(Duration::from_millis(16))
    }

    #[test]
    fn starts_on_demand_and_idle() {
        let s = scheduler();
        assert_eq!(s.mode(), RenderMode::OnDemand);
        assert_eq!(s.next_frame_delay(), None);
    }

    #[test]
    fn mode_switch_side_effects() {
        let mut s = scheduler();
        assert_eq!(s.set_mode(RenderMode::OnDemand), ModeSwitch::Unchanged);
        assert_eq!(s.set_mode(RenderMode::Continuous), ModeSwitch::StartLoop);
        assert_eq!(s.next_frame_delay(), Some(Duration::from_millis(16)));
        assert_eq!(s.set_mode(RenderMode::OnDemand), ModeSwitch::RenderOnce);
        assert_eq!(s.next_frame_delay(), None);
    }

    #[test]
    fn interaction_runs_temporary_loop() {
        let mut s = scheduler();
        s.begin_interaction();
        assert!(s.wants_frames());
        s.end_interaction();
        assert!(!s.wants_frames());

        s.set_settling(true);
        assert!(s.wants_frames());
    }

    #[test]
    fn cancel_is_permanent() {
        let mut s = scheduler();
        s.set_mode(RenderMode::Continuous);
        s.cancel();
        assert_eq!(s.next_frame_delay(), None);
        assert_eq!(s.set_mode(RenderMode::OnDemand), ModeSwitch::Unchanged);
        s.begin_interaction();
        assert!(!s.wants_frames());
    }
}
