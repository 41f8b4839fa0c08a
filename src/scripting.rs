//! Script runtime: compiles user scripts and invokes their factories.
//!
//! A script defines `createAnimatedScene(lib, params)` or
//! `createGeometry(lib, params)` at module scope. The runtime owns the Rhai
//! engine, the active script and the active animation. Loading and evaluating
//! are separate steps so a failing update leaves the previous scene (and its
//! animation) untouched.

use glam::Vec3;
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, FnPtr, Map, Scope, AST, FLOAT};

use crate::config::SandboxLimits;
use crate::error::{AnimationFrameError, EvaluationError};
use crate::material::{Material, MaterialSlot};
use crate::param_extract::strip_declared_block;
use crate::params::{ParameterDescriptor, ParameterSet, ParameterSnapshot};
use crate::scene_graph::{NodeState, SceneObject};
use crate::script_api::{
    params_to_map, register_script_api, EngineHandle, GeometryHandle, ObjectHandle,
};
use crate::script_diagnostics::{from_eval_error, from_parse_error, ScriptDiagnostic, ScriptPhase};
use crate::script_log::ScriptLogger;

/// Script source as sent with `LOAD_SCRIPT`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UserScript {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl UserScript {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Which factory a script exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Factory {
    AnimatedScene,
    Geometry,
}

impl Factory {
    pub fn function_name(self) -> &'static str {
        match self {
            Factory::AnimatedScene => "createAnimatedScene",
            Factory::Geometry => "createGeometry",
        }
    }

    /// `createAnimatedScene` wins when both are defined.
    fn detect(ast: &AST) -> Option<(Self, usize)> {
        let mut found: Option<(Self, usize)> = None;
        for f in ast.iter_functions() {
            let factory = match f.name {
                "createAnimatedScene" => Factory::AnimatedScene,
                "createGeometry" => Factory::Geometry,
                _ => continue,
            };
            if f.params.len() > 2 {
                continue;
            }
            match found {
                Some((Factory::AnimatedScene, _)) => {}
                _ => found = Some((factory, f.params.len())),
            }
        }
        found
    }
}

struct LoadedScript {
    ast: AST,
    scope: Scope<'static>,
    factory: Factory,
    arity: usize,
    filename: Option<String>,
    parameters: ParameterSet,
}

struct ActiveAnimation {
    /// Closures resolve against the AST that created them, which may outlive
    /// the script once a new one is loaded.
    ast: AST,
    callback: FnPtr,
    root: ObjectHandle,
    filename: Option<String>,
}

/// Result of a successful factory call.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub object: SceneObject,
    /// Whether the factory returned an `animate` callback.
    pub animated: bool,
}

pub struct ScriptRuntime {
    engine: Engine,
    limits: SandboxLimits,
    logger: ScriptLogger,
    script: Option<LoadedScript>,
    animation: Option<ActiveAnimation>,
}

impl ScriptRuntime {
    /// Create a runtime with sandboxed settings.
    pub fn new(limits: &SandboxLimits, logger: ScriptLogger) -> Self {
        let mut engine = Engine::new();

        engine.set_max_operations(limits.max_operations);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);

        let print_logger = logger.clone();
        engine.on_print(move |text| {
            print_logger.info(text);
        });
        let debug_logger = logger.clone();
        engine.on_debug(move |text, source, pos| {
            let message = match (source, pos.line()) {
                (Some(source), Some(line)) => format!("[{source}:{line}] {text}"),
                (None, Some(line)) => format!("[line {line}] {text}"),
                _ => text.to_string(),
            };
            debug_logger.info(&message);
        });

        register_script_api(&mut engine);

        Self {
            engine,
            limits: limits.clone(),
            logger,
            script: None,
            animation: None,
        }
    }

    pub fn logger(&self) -> &ScriptLogger {
        &self.logger
    }

    pub fn is_loaded(&self) -> bool {
        self.script.is_some()
    }

    pub fn factory(&self) -> Option<Factory> {
        self.script.as_ref().map(|s| s.factory)
    }

    pub fn has_animation(&self) -> bool {
        self.animation.is_some()
    }

    fn diagnostic(&self, diagnostic: ScriptDiagnostic, filename: Option<&str>) -> EvaluationError {
        EvaluationError::Script(diagnostic.with_filename(filename))
    }

    /// Compile `script` and run its top level once.
    ///
    /// `descriptors` is the schema extracted from the same source. On error
    /// the previously loaded script stays active.
    pub fn load(
        &mut self,
        script: &UserScript,
        descriptors: Vec<ParameterDescriptor>,
    ) -> Result<(), EvaluationError> {
        let filename = script.filename.as_deref();
        let source = strip_declared_block(&script.code);

        let ast = self
            .engine
            .compile(source.as_ref())
            .map_err(|e| self.diagnostic(from_parse_error(&e), filename))?;

        let (factory, arity) = Factory::detect(&ast).ok_or(EvaluationError::MissingFactory)?;

        let mut scope = Scope::new();
        self.engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| self.diagnostic(from_eval_error(ScriptPhase::Load, &e), filename))?;

        log::info!(
            "Loaded script{} with {} ({} parameters)",
            filename.map(|f| format!(" '{f}'")).unwrap_or_default(),
            factory.function_name(),
            descriptors.len()
        );

        self.script = Some(LoadedScript {
            ast,
            scope,
            factory,
            arity,
            filename: script.filename.clone(),
            parameters: ParameterSet::new(descriptors),
        });
        Ok(())
    }

    /// Resolve `incoming` against the active schema and run the factory.
    ///
    /// The animation callback is replaced only when the factory succeeds.
    pub fn evaluate(&mut self, incoming: &ParameterSnapshot) -> Result<Evaluation, EvaluationError> {
        let max_depth = self.limits.max_object_depth;
        let script = self.script.as_mut().ok_or(EvaluationError::NoScript)?;
        let params = script.parameters.resolve(incoming);
        let filename = script.filename.clone();

        let name = script.factory.function_name();
        let lib = Dynamic::from(EngineHandle);
        let params = Dynamic::from(params_to_map(&params));
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);

        let result: Result<Dynamic, Box<EvalAltResult>> = match script.arity {
            2 => self
                .engine
                .call_fn_with_options(options, &mut script.scope, &script.ast, name, (lib, params)),
            1 => self
                .engine
                .call_fn_with_options(options, &mut script.scope, &script.ast, name, (lib,)),
            _ => self
                .engine
                .call_fn_with_options(options, &mut script.scope, &script.ast, name, ()),
        };

        let value = result.map_err(|e| {
            EvaluationError::Script(
                from_eval_error(ScriptPhase::Evaluate, &e).with_filename(filename.as_deref()),
            )
        })?;

        let (root, callback) = match script.factory {
            Factory::AnimatedScene => unpack_animated(value)?,
            Factory::Geometry => (unpack_geometry(value)?, None),
        };

        let object = root.to_scene_object(max_depth)?;
        let animated = callback.is_some();
        self.animation = callback.map(|callback| ActiveAnimation {
            ast: script.ast.clone(),
            callback,
            root,
            filename,
        });

        Ok(Evaluation { object, animated })
    }

    /// Run the animation callback for `elapsed` seconds since the preview was
    /// mounted and return the updated node states in preorder.
    pub fn animate(&mut self, elapsed: f32) -> Result<Option<Vec<NodeState>>, AnimationFrameError> {
        let Some(animation) = &self.animation else {
            return Ok(None);
        };

        let frame_error = |diagnostic: ScriptDiagnostic| AnimationFrameError {
            elapsed,
            diagnostic: diagnostic.with_filename(animation.filename.as_deref()),
        };

        animation
            .callback
            .call::<Dynamic>(&self.engine, &animation.ast, (elapsed as FLOAT,))
            .map_err(|e| frame_error(from_eval_error(ScriptPhase::Animate, &e)))?;

        animation
            .root
            .node_states(self.limits.max_object_depth)
            .map(Some)
            .map_err(|e| frame_error(ScriptDiagnostic::runtime(ScriptPhase::Animate, e.to_string())))
    }

    /// Drop the animation and every script object it keeps alive.
    pub fn clear_animation(&mut self) {
        self.animation = None;
    }
}

fn found_type(value: &Dynamic) -> String {
    value.type_name().to_string()
}

/// `createGeometry` returns a geometry; objects are accepted as they are.
fn unpack_geometry(value: Dynamic) -> Result<ObjectHandle, EvaluationError> {
    if value.is::<GeometryHandle>() {
        let geometry = value.cast::<GeometryHandle>();
        return Ok(wrap_geometry(geometry));
    }
    if value.is::<ObjectHandle>() {
        return Ok(value.cast::<ObjectHandle>());
    }
    Err(EvaluationError::UnexpectedReturn {
        factory: Factory::Geometry.function_name(),
        expected: "a geometry",
        found: found_type(&value),
    })
}

/// Default-shaded double-sided mesh, lifted so its lower bound sits at y = 0.
fn wrap_geometry(geometry: GeometryHandle) -> ObjectHandle {
    let min_y = geometry.snapshot().bounds().min.y;
    let mesh = ObjectHandle::mesh(geometry, MaterialSlot::Single(Material::default_shaded()));
    mesh.set_position(Vec3::new(0.0, -min_y, 0.0));
    mesh
}

/// `createAnimatedScene` returns `#{ object, animate? }`; a bare object is
/// treated as a static scene.
fn unpack_animated(value: Dynamic) -> Result<(ObjectHandle, Option<FnPtr>), EvaluationError> {
    let unexpected = |found: String| EvaluationError::UnexpectedReturn {
        factory: Factory::AnimatedScene.function_name(),
        expected: "#{ object, animate }",
        found,
    };

    if value.is::<ObjectHandle>() {
        return Ok((value.cast::<ObjectHandle>(), None));
    }
    let Some(mut map) = value.clone().try_cast::<Map>() else {
        return Err(unexpected(found_type(&value)));
    };

    let object = map
        .remove("object")
        .ok_or_else(|| unexpected("a map without `object`".into()))?;
    let root = if object.is::<ObjectHandle>() {
        object.cast::<ObjectHandle>()
    } else if object.is::<GeometryHandle>() {
        wrap_geometry(object.cast::<GeometryHandle>())
    } else {
        return Err(unexpected(format!("`object` of type {}", object.type_name())));
    };

    let callback = match map.remove("animate") {
        None => None,
        Some(animate) if animate.is_unit() => None,
        Some(animate) => match animate.try_cast::<FnPtr>() {
            Some(callback) => Some(callback),
            None => return Err(unexpected("`animate` that is not a function".into())),
        },
    };

    Ok((root, callback))
}
