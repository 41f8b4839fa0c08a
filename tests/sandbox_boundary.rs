//! The threaded sandbox, driven only through its message boundary.

use std::thread;
use std::time::{Duration, Instant};

use paramview::config::PreviewConfig;
use paramview::params::ParameterSnapshot;
use paramview::renderer::{HeadlessRenderer, RenderStats, RenderStatsHandle};
use paramview::scene_manager::SceneState;
use paramview::scheduler::RenderMode;
use paramview::{HostMessage, Sandbox, SandboxMessage, UserScript};

const WAIT: Duration = Duration::from_secs(5);

const SPINNER: &str = r#"
fn createAnimatedScene(lib, params) {
    let cube = lib.mesh(lib.box(1));
    #{ object: cube, animate: |t| { cube.rotation.y = t; } }
}
"#;

const SPHERE: &str = r#"
let parameters = #{ radius: #{ default: 5 } };
fn createGeometry(lib, params) { lib.sphere(params.radius, 16, 8) }
"#;

fn mount() -> (Sandbox, RenderStatsHandle) {
    let stats = RenderStatsHandle::default();
    let sandbox = Sandbox::mount(
        PreviewConfig::default(),
        HeadlessRenderer::factory(stats.clone()),
        None,
    )
    .unwrap();
    (sandbox, stats)
}

fn wait_for(stats: &RenderStatsHandle, what: &str, done: impl Fn(&RenderStats) -> bool) {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if done(&stats.snapshot()) {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {what}: {:?}", stats.snapshot());
}

#[test]
fn static_script_publishes_schema_and_rerenders_on_update() {
    let (mut sandbox, stats) = mount();
    sandbox.load(UserScript::new(SPHERE)).unwrap();

    match sandbox.recv_timeout(WAIT) {
        Some(SandboxMessage::Parameters { parameters }) => {
            assert_eq!(parameters.len(), 1);
            assert_eq!(parameters[0].key, "radius");
        }
        other => panic!("expected PARAMETERS, got {other:?}"),
    }
    // Initial render plus the installed defaults.
    wait_for(&stats, "default scene", |s| s.renders == 2);

    sandbox
        .update(ParameterSnapshot::new().with("radius", 8.0))
        .unwrap();
    wait_for(&stats, "updated scene", |s| s.renders == 3);
    assert_eq!(stats.snapshot().disposed_geometries.len(), 1);
    assert_eq!(stats.snapshot().disposed_materials.len(), 1);

    // On-demand scenes stay idle between updates.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(stats.renders(), 3);

    let snapshot = sandbox.unmount().unwrap();
    assert_eq!(snapshot.mode, RenderMode::OnDemand);
    assert_eq!(snapshot.state, SceneState::Disposed);
    assert!(sandbox.drain_events().is_empty());
}

#[test]
fn animated_scene_renders_until_unmount() {
    let (mut sandbox, stats) = mount();
    sandbox.load(UserScript::new(SPINNER)).unwrap();
    wait_for(&stats, "animation frames", |s| s.renders >= 10);

    let snapshot = sandbox.unmount().unwrap();
    assert_eq!(snapshot.mode, RenderMode::Continuous);
    assert_eq!(snapshot.state, SceneState::Disposed);

    let after_unmount = stats.snapshot();
    assert!(after_unmount.renderer_disposed);
    assert_eq!(after_unmount.calls_after_dispose, 0);
    assert_eq!(after_unmount.double_frees(), 0);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(stats.renders(), after_unmount.renders);
    assert!(!sandbox.is_mounted());
}

#[test]
fn errors_are_reported_without_killing_the_worker() {
    let (mut sandbox, stats) = mount();
    sandbox
        .load(UserScript::new(r#"fn createGeometry(lib, params) { throw "broken"; }"#))
        .unwrap();
    match sandbox.recv_timeout(WAIT) {
        Some(SandboxMessage::Error { error }) => assert!(error.contains("broken")),
        other => panic!("expected ERROR, got {other:?}"),
    }

    sandbox.load(UserScript::new(SPHERE)).unwrap();
    assert!(matches!(
        sandbox.recv_timeout(WAIT),
        Some(SandboxMessage::Parameters { .. })
    ));
    wait_for(&stats, "recovered scene", |s| s.renders == 2);
    assert!(sandbox.is_mounted());
    sandbox.unmount();
}

#[test]
fn json_messages_cross_the_boundary() {
    let (mut sandbox, _) = mount();
    let load = HostMessage::from_json(&format!(
        r#"{{"type":"LOAD_SCRIPT","code":{},"filename":"sphere.rhai"}}"#,
        serde_json::to_string(SPHERE).unwrap()
    ))
    .unwrap();
    sandbox.send(load).unwrap();

    let reply = sandbox.recv_timeout(WAIT).expect("no reply");
    let json: serde_json::Value = serde_json::from_str(&reply.to_json().unwrap()).unwrap();
    assert_eq!(json["type"], "PARAMETERS");
    assert_eq!(json["parameters"][0]["key"], "radius");
    assert_eq!(json["parameters"][0]["type"], "number");

    sandbox
        .send(HostMessage::from_json(r#"{"type":"UPDATE_PARAMS","params":{"radius":2}}"#).unwrap())
        .unwrap();
    sandbox.unmount();
}

#[test]
fn dropping_the_host_tears_down_the_worker() {
    let (sandbox, stats) = mount();
    sandbox.load(UserScript::new(SPINNER)).unwrap();
    wait_for(&stats, "animation frames", |s| s.renders >= 3);
    drop(sandbox);

    let s = stats.snapshot();
    assert!(s.renderer_disposed);
    assert_eq!(s.calls_after_dispose, 0);
}
