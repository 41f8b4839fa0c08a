pub mod camera;
pub mod config;
pub mod controls;
pub mod error;
pub mod geometry;
pub mod gpu;
pub mod lighting;
pub mod material;
pub mod renderer;
pub mod scene_graph;
pub mod scene_manager;
pub mod scheduler;

// Scripting
pub mod param_extract;
pub mod params;
pub mod script_api;
pub mod script_diagnostics;
pub mod script_log;
pub mod scripting;

// Host boundary
pub mod preview;
pub mod protocol;
pub mod sandbox;

pub mod cli;

pub use config::PreviewConfig;
pub use preview::{Preview, PreviewSnapshot};
pub use protocol::{HostMessage, SandboxMessage};
pub use sandbox::Sandbox;
pub use scripting::UserScript;
