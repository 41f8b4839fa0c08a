//! Parameter extraction against whole scripts, and the schema round-trip.

use paramview::config::SandboxLimits;
use paramview::error::ExtractError;
use paramview::param_extract::extract;
use paramview::params::{ParamType, ParamValue, ParameterSnapshot};
use paramview::script_log::ScriptLogger;
use paramview::scripting::{ScriptRuntime, UserScript};

const SCRIPTS: &[&str] = &[
    r##"
let parameters = #{
    width: #{ default: 2, min: 0.5, max: 10 },
    tint: #{ default: "#3366ff", label: "Tint" },
    solid: #{ default: true },
};
fn createGeometry(lib, params) {
    let m = lib.mesh(lib.box(params.width, 1, 1), #{ color: params.tint, wireframe: !params.solid });
    m
}
"##,
    r#"
// Loosely written block: unquoted keys, single quotes, trailing commas.
let defaultParameters = #{
    count: #{ value: 6, step: 1, },
    color: '#ffaa00',
};
fn createAnimatedScene(lib, params) {
    let root = lib.group();
    for i in 0..params.count.to_int() {
        let m = lib.mesh(lib.sphere(0.2), #{ color: params.color });
        m.position = lib.vec3(i, 0, 0);
        root.add(m);
    }
    #{ object: root, animate: |t| { root.rotation.y = t; } }
}
"#,
    r#"
fn createGeometry(lib, params) {
    let size = #{ radius: 1.5, tube: 0.4 };
    lib.torus(params.radius, params.tube, 12, 24)
}
"#,
];

fn runtime() -> ScriptRuntime {
    ScriptRuntime::new(&SandboxLimits::default(), ScriptLogger::default())
}

#[test]
fn defaults_round_trip_through_the_factory() {
    for code in SCRIPTS {
        let descriptors = extract(code).unwrap();
        assert!(!descriptors.is_empty(), "no schema for:\n{code}");

        let defaults = ParameterSnapshot::from_defaults(&descriptors);
        let json = serde_json::to_string(&defaults).unwrap();
        let reparsed: ParameterSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(reparsed, defaults);

        let mut runtime = runtime();
        runtime.load(&UserScript::new(*code), descriptors).unwrap();
        if let Err(e) = runtime.evaluate(&reparsed) {
            panic!("defaults rejected: {e}\n{code}");
        }
    }
}

#[test]
fn types_are_inferred_from_defaults() {
    let descriptors = extract(SCRIPTS[0]).unwrap();
    let types: Vec<_> = descriptors.iter().map(|d| d.param_type).collect();
    assert_eq!(types, [ParamType::Number, ParamType::Color, ParamType::Boolean]);
    assert_eq!(descriptors[1].label, "Tint");
    assert_eq!(descriptors[0].max, Some(10.0));
}

#[test]
fn permissive_block_keeps_source_order() {
    let descriptors = extract(SCRIPTS[1]).unwrap();
    let keys: Vec<_> = descriptors.iter().map(|d| d.key.as_str()).collect();
    assert_eq!(keys, ["count", "color"]);
    assert_eq!(descriptors[0].default, ParamValue::Number(6.0));
    assert_eq!(descriptors[1].param_type, ParamType::Color);
}

#[test]
fn factory_literals_get_the_default_range() {
    let descriptors = extract(SCRIPTS[2]).unwrap();
    assert_eq!(descriptors.len(), 2);
    assert!(descriptors
        .iter()
        .all(|d| d.min == Some(0.0) && d.max == Some(100.0)));
}

#[test]
fn unbalanced_block_is_an_extract_error() {
    let code = r#"
let parameters = #{
    radius: #{ default: 5 },
    height: #{ default: 2
fn createGeometry(lib, params) { lib.box(1) }
"#;
    assert!(matches!(extract(code), Err(ExtractError::Unterminated { .. })));
}

#[test]
fn scripts_without_parameters_yield_an_empty_schema() {
    assert!(extract("fn createGeometry(lib) { lib.box(1) }").unwrap().is_empty());
    assert!(extract("let parameters = #{};\nfn createGeometry() { 1 }")
        .unwrap()
        .is_empty());
}
