//! Error taxonomy for the preview core.
//!
//! Only [`SetupError`] is fatal to a mount. Everything else is contained: user
//! code failures become `ERROR` messages, animation failures are logged, and
//! disposal failures are logged and skipped.

use std::path::PathBuf;

use thiserror::Error;

use crate::script_diagnostics::ScriptDiagnostic;

/// Malformed parameter block. Non-fatal: the load continues with no schema.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("parameter block `{name}` is not terminated: {detail}")]
    Unterminated { name: String, detail: String },

    #[error("parameter block could not be parsed: {0}")]
    Unparseable(String),

    #[error("parameter `{key}` is invalid: {reason}")]
    InvalidEntry { key: String, reason: String },
}

/// Failure while evaluating user code. The previous scene stays in place.
#[derive(Debug, Clone, Error)]
pub enum EvaluationError {
    #[error("no script is loaded")]
    NoScript,

    #[error("script defines neither `createAnimatedScene` nor `createGeometry`")]
    MissingFactory,

    #[error("{0}")]
    Script(ScriptDiagnostic),

    #[error("`{factory}` returned {found}, expected {expected}")]
    UnexpectedReturn {
        factory: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("object hierarchy is nested deeper than {0} levels or contains a cycle")]
    HierarchyTooDeep(usize),

    #[error("script panicked: {0}")]
    Panicked(String),
}

/// Failure inside a per-frame `animate` callback. Logged; the loop continues.
#[derive(Debug, Clone, Error)]
#[error("animation frame at {elapsed:.3}s failed: {diagnostic}")]
pub struct AnimationFrameError {
    pub elapsed: f32,
    pub diagnostic: ScriptDiagnostic,
}

/// Fatal failure while a scene manager is `Initializing`.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no renderable surface available: {0}")]
    NoSurface(String),

    #[error("scene is already initialized or initializing")]
    AlreadyInitialized,

    #[error("scene has been disposed")]
    Disposed,

    #[error("scene is not ready (currently {0})")]
    NotReady(&'static str),

    #[error("viewport has zero area ({width}x{height})")]
    EmptyViewport { width: u32, height: u32 },
}

/// A resource release that failed. Never propagated past the scene manager.
#[derive(Debug, Clone, Error)]
#[error("failed to dispose {resource}: {reason}")]
pub struct DisposalError {
    pub resource: String,
    pub reason: String,
}

impl DisposalError {
    pub fn new(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("renderer has been disposed")]
    Disposed,

    #[error("render backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to start sandbox worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("sandbox worker is no longer running")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failure while handling one host message inside a mount.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Setup(#[from] SetupError),
}
