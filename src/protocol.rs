//! Boundary protocol between the host and a sandbox.
//!
//! Script traffic is JSON tagged by `type`:
//!
//! ```json
//! {"type":"LOAD_SCRIPT","code":"fn createGeometry(lib, params) { lib.cuboid(1) }"}
//! {"type":"UPDATE_PARAMS","params":{"radius":8}}
//! {"type":"PARAMETERS","parameters":[{"key":"radius","type":"number",...}]}
//! {"type":"ERROR","error":"cube.rhai:3:7: evaluate error: ..."}
//! ```
//!
//! Viewport input travels on its own channel and never reaches user code.

use serde::{Deserialize, Serialize};

use crate::controls::PointerEvent;
use crate::params::{ParameterDescriptor, ParameterSnapshot};
use crate::scripting::UserScript;

/// host → sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    /// Evaluate once; supersedes any prior load.
    LoadScript {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    /// Re-run the active factory. Ignored when no script is loaded.
    UpdateParams { params: ParameterSnapshot },
}

impl HostMessage {
    pub fn load(script: UserScript) -> Self {
        HostMessage::LoadScript {
            code: script.code,
            filename: script.filename,
        }
    }

    pub fn update(params: ParameterSnapshot) -> Self {
        HostMessage::UpdateParams { params }
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// sandbox → host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxMessage {
    /// Emitted once per successful load of a script that exports a schema.
    Parameters { parameters: Vec<ParameterDescriptor> },
    Error { error: String },
}

impl SandboxMessage {
    pub fn error(error: impl ToString) -> Self {
        SandboxMessage::Error {
            error: error.to_string(),
        }
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// host → mount viewport input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewportCommand {
    Resize { width: u32, height: u32 },
    Pointer(PointerEvent),
    Unmount,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::PointerButton;
    use crate::params::ParamType;

    #[test]
    fn host_messages_use_screaming_tags() {
        let load = HostMessage::load(UserScript::new("fn createGeometry(lib, p) { lib.cuboid(1) }"));
        let json = load.to_json().unwrap();
        assert!(json.starts_with(r#"{"type":"LOAD_SCRIPT","code":"#));
        assert!(!json.contains("filename"));

        let update = HostMessage::from_json(r##"{"type":"UPDATE_PARAMS","params":{"radius":8,"tint":"#ff0000"}}"##).unwrap();
        let HostMessage::UpdateParams { params } = update else {
            panic!("expected UPDATE_PARAMS");
        };
        assert_eq!(params.get("radius").and_then(|v| v.as_number()), Some(8.0));
    }

    #[test]
    fn sandbox_messages_wire_shape() {
        let parameters = SandboxMessage::Parameters {
            parameters: vec![ParameterDescriptor::new("radius", ParamType::Number, 5.0.into())],
        };
        let value: serde_json::Value = serde_json::from_str(&parameters.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "PARAMETERS");
        assert_eq!(value["parameters"][0]["key"], "radius");

        let error = SandboxMessage::error("boom");
        assert_eq!(error.to_json().unwrap(), r#"{"type":"ERROR","error":"boom"}"#);
        assert_eq!(SandboxMessage::from_json(r#"{"type":"ERROR","error":"boom"}"#).unwrap(), error);
    }

    #[test]
    fn unknown_message_types_are_rejected() {
        assert!(HostMessage::from_json(r#"{"type":"EVAL","code":"1"}"#).is_err());
    }

    #[test]
    fn viewport_commands_carry_pointer_events() {
        let json = serde_json::to_string(&ViewportCommand::Pointer(PointerEvent::Down {
            x: 1.0,
            y: 2.0,
            button: PointerButton::Primary,
        }))
        .unwrap();
        let back: ViewportCommand = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ViewportCommand::Pointer(PointerEvent::Down { .. })));
    }
}
