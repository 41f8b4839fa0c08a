//! Structured script diagnostics.
//!
//! Rhai provides rich error types (parse + runtime) with positions. The preview
//! wraps those into a stable, JSON-serializable diagnostic whose display form is
//! the text carried by the `ERROR` message, so the host can show it without
//! access to Rust logs.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDiagnosticKind {
    /// Syntax/parse errors (compile time).
    ParseError,
    /// Runtime errors in user code.
    RuntimeError,
    /// Script used the engine handle incorrectly (missing members, wrong types, etc).
    HostApiMisuse,
    /// Script exceeded a sandbox limit (operations, call depth, sizes).
    LimitExceeded,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPhase {
    /// Compiling the source text.
    Compile,
    /// Running the module body once after load.
    Load,
    /// Invoking `createGeometry` / `createAnimatedScene`.
    Evaluate,
    /// Invoking the per-frame `animate` callback.
    Animate,
}

impl fmt::Display for ScriptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScriptPhase::Compile => "compile",
            ScriptPhase::Load => "load",
            ScriptPhase::Evaluate => "evaluate",
            ScriptPhase::Animate => "animate",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptLocation {
    /// 1-based line number in the user script.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptDiagnostic {
    pub kind: ScriptDiagnosticKind,
    pub phase: ScriptPhase,
    pub message: String,
    pub location: Option<ScriptLocation>,
    /// Name of the script file, when the host supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl ScriptDiagnostic {
    /// Diagnostic that did not originate from a Rhai error value.
    pub fn runtime(phase: ScriptPhase, message: impl Into<String>) -> Self {
        Self {
            kind: ScriptDiagnosticKind::RuntimeError,
            phase,
            message: message.into(),
            location: None,
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: Option<&str>) -> Self {
        self.filename = filename.filter(|f| !f.is_empty()).map(str::to_string);
        self
    }
}

impl fmt::Display for ScriptDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.filename {
            write!(f, "{name}:")?;
        }
        if let Some(loc) = &self.location {
            write!(f, "{}:{}: ", loc.line, loc.column)?;
        } else if self.filename.is_some() {
            f.write_str(" ")?;
        }
        write!(f, "{} error: {}", self.phase, self.message)
    }
}

fn classify_message(message: &str) -> ScriptDiagnosticKind {
    // Rhai error strings are fairly stable; this provides a pragmatic
    // classification without depending on Rhai's internal enum variants.
    let lower = message.to_ascii_lowercase();

    if lower.contains("too many operations")
        || lower.contains("stack overflow")
        || lower.contains("too large")
        || lower.contains("exceeds maximum")
        || lower.contains("too deeply nested")
    {
        return ScriptDiagnosticKind::LimitExceeded;
    }

    if lower.contains("property not found")
        || lower.contains("variable not found")
        || lower.contains("function not found")
        || lower.contains("mismatched types")
        || lower.contains("map key")
        || lower.contains("index")
    {
        return ScriptDiagnosticKind::HostApiMisuse;
    }

    ScriptDiagnosticKind::RuntimeError
}

fn to_location(pos: rhai::Position) -> Option<ScriptLocation> {
    let line = pos.line()? as u32;
    if line == 0 {
        return None;
    }
    Some(ScriptLocation {
        line,
        column: (pos.position().unwrap_or(0) as u32).max(1),
    })
}

pub fn from_parse_error(err: &rhai::ParseError) -> ScriptDiagnostic {
    // ParseError's Display appends the position; the message alone reads better
    // next to the structured location.
    ScriptDiagnostic {
        kind: ScriptDiagnosticKind::ParseError,
        phase: ScriptPhase::Compile,
        message: err.err_type().to_string(),
        location: to_location(err.position()),
        filename: None,
    }
}

pub fn from_eval_error(phase: ScriptPhase, err: &rhai::EvalAltResult) -> ScriptDiagnostic {
    let raw = err.to_string();
    let kind = match err {
        rhai::EvalAltResult::ErrorParsing(..) => ScriptDiagnosticKind::ParseError,
        _ => classify_message(&raw),
    };

    ScriptDiagnostic {
        kind,
        phase,
        message: raw,
        location: to_location(err.position()),
        filename: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_keeps_user_line() {
        let engine = rhai::Engine::new();
        let err = engine.compile("let a = 1;\nlet b = ;\n").unwrap_err();
        let diag = from_parse_error(&err);
        assert_eq!(diag.kind, ScriptDiagnosticKind::ParseError);
        assert_eq!(diag.phase, ScriptPhase::Compile);
        assert_eq!(diag.location.as_ref().map(|l| l.line), Some(2));
    }

    #[test]
    fn operation_limit_is_classified() {
        let mut engine = rhai::Engine::new();
        engine.set_max_operations(50);
        let err = engine.run("let x = 0; loop { x += 1; }").unwrap_err();
        let diag = from_eval_error(ScriptPhase::Load, &err);
        assert_eq!(diag.kind, ScriptDiagnosticKind::LimitExceeded);
    }

    #[test]
    fn display_includes_file_and_position() {
        let diag = ScriptDiagnostic {
            kind: ScriptDiagnosticKind::RuntimeError,
            phase: ScriptPhase::Evaluate,
            message: "boom".into(),
            location: Some(ScriptLocation { line: 3, column: 7 }),
            filename: Some("cube.rhai".into()),
        };
        assert_eq!(diag.to_string(), "cube.rhai:3:7: evaluate error: boom");

        let bare = ScriptDiagnostic::runtime(ScriptPhase::Animate, "bad frame");
        assert_eq!(bare.to_string(), "animate error: bad frame");
    }
}
