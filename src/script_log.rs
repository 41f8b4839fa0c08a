//! Rate-limited logging for user scripts.
//!
//! Script `print`/`debug` output and per-frame animation failures go through
//! a [`ScriptLogger`], which forwards to the `log` facade under the `script`
//! target. Each logger caps how many messages pass per frame so an animation
//! callback that logs (or fails) every frame cannot flood the host. Errors
//! that repeat the previous one are counted instead of logged again.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Default maximum number of script messages per frame.
pub const MAX_LOGS_PER_FRAME: u32 = 100;

/// Log level for script messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_log(self) -> log::Level {
        match self {
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

#[derive(Debug)]
struct FrameBudget {
    max_per_frame: u32,
    count: AtomicU32,
    warned: AtomicBool,
    dropped: AtomicU32,
    repeats: Mutex<Repeats>,
}

#[derive(Debug, Default)]
struct Repeats {
    key: Option<String>,
    count: u32,
}

/// Per-mount script logger. Clones share one budget.
#[derive(Debug, Clone)]
pub struct ScriptLogger {
    budget: Arc<FrameBudget>,
}

impl ScriptLogger {
    pub fn new(max_per_frame: u32) -> Self {
        Self {
            budget: Arc::new(FrameBudget {
                max_per_frame,
                count: AtomicU32::new(0),
                warned: AtomicBool::new(false),
                dropped: AtomicU32::new(0),
                repeats: Mutex::new(Repeats::default()),
            }),
        }
    }

    /// Reset the per-frame counter. Call this at the start of each frame.
    pub fn reset_frame(&self) {
        self.budget.count.store(0, Ordering::Relaxed);
        self.budget.warned.store(false, Ordering::Relaxed);
    }

    /// Messages dropped since this logger was created.
    pub fn dropped(&self) -> u32 {
        self.budget.dropped.load(Ordering::Relaxed)
    }

    fn can_log(&self) -> bool {
        let count = self.budget.count.fetch_add(1, Ordering::Relaxed);
        if count < self.budget.max_per_frame {
            return true;
        }

        self.budget.dropped.fetch_add(1, Ordering::Relaxed);
        // Only warn once per frame about exceeding the limit.
        if !self.budget.warned.swap(true, Ordering::Relaxed) {
            log::warn!(
                target: "script",
                "Script log limit exceeded ({} messages/frame). Further logs dropped.",
                self.budget.max_per_frame
            );
        }
        false
    }

    /// Log a message, respecting the per-frame limit. Returns whether it was
    /// emitted.
    pub fn log(&self, level: LogLevel, message: &str) -> bool {
        if !self.can_log() {
            return false;
        }
        log::log!(target: "script", level.to_log(), "{}", message);
        true
    }

    pub fn info(&self, message: &str) -> bool {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: &str) -> bool {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: &str) -> bool {
        self.log(LogLevel::Error, message)
    }

    /// Log an error unless `key` matches the previous repeated error, in which
    /// case it is only counted. Returns whether it was emitted.
    pub fn repeated_error(&self, key: &str, message: &str) -> bool {
        let previous = {
            let mut repeats = self.budget.repeats.lock();
            if repeats.key.as_deref() == Some(key) {
                repeats.count += 1;
                return false;
            }
            std::mem::replace(
                &mut *repeats,
                Repeats {
                    key: Some(key.to_string()),
                    count: 0,
                },
            )
        };
        self.summarize(previous);
        self.error(message)
    }

    /// Close the current run of repeated errors, logging how many were
    /// suppressed.
    pub fn end_repeats(&self) {
        let previous = std::mem::take(&mut *self.budget.repeats.lock());
        self.summarize(previous);
    }

    /// Repeats of the current error not logged so far.
    pub fn suppressed(&self) -> u32 {
        self.budget.repeats.lock().count
    }

    fn summarize(&self, previous: Repeats) {
        if previous.count > 0 {
            log::warn!(
                target: "script",
                "Previous script error repeated {} more time(s)",
                previous.count
            );
        }
    }
}

impl Default for ScriptLogger {
    fn default() -> Self {
        Self::new(MAX_LOGS_PER_FRAME)
    }
}
