//! Script-facing API: the engine handle passed to factory functions.
//!
//! ```rhai
//! fn createAnimatedScene(lib, params) {
//!     let body = lib.mesh(lib.sphere(params.radius, 32, 16), #{ color: params.tint });
//!     let root = lib.group();
//!     root.add(body);
//!     #{ object: root, animate: |t| { root.rotation.y = t * 0.5; } }
//! }
//! ```
//!
//! Geometry builders:
//! - `lib.box(w, h, d)` / `lib.cuboid(...)`, `lib.box(size)`
//! - `lib.sphere(r)`, `lib.sphere(r, width_segments, height_segments)`
//! - `lib.cylinder(r_top, r_bottom, h[, segments])`, `lib.cone(r, h[, segments])`
//! - `lib.torus(r, tube[, radial, tubular])`, `lib.plane(w, d)`
//! - `lib.geometry(positions[, indices])`, `lib.from_obj(text)`
//!
//! Objects:
//! - `lib.mesh(geometry[, material | [materials]])`, `lib.group()`
//! - properties `position`, `rotation`, `scale`, `visible`, `name`, `children`
//! - methods `set_position`, `set_rotation`, `set_scale`, `rotate_x/y/z`,
//!   `add`, `remove`, `set_color`
//!
//! Geometry methods: `translate`, `scale`, `rotate_x/y/z`, `merge`, `center`,
//! `copy`, `bounds`, `vertex_count`, `triangle_count`.
//!
//! Helpers: `lib.vec3(x, y, z)`, `lib.color("#rrggbb")`, `lib.color(r, g, b)`.
//!
//! Geometries and objects are shared handles: a geometry used by two meshes
//! is one geometry, and an object captured by an `animate` closure is the
//! object that was returned.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use glam::{Quat, Vec3};
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, FLOAT, INT};

use crate::error::EvaluationError;
use crate::geometry::Geometry;
use crate::material::{Material, MaterialSlot, Side};
use crate::params::{hex_to_rgb, ParamValue, ParameterSnapshot};
use crate::scene_graph::{NodeState, ObjectKind, SceneObject, Transform};

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

/// Largest geometry (in vertices) a script may build.
pub const MAX_GEOMETRY_VERTICES: usize = 1 << 21;

/// The `lib` argument of factory functions.
#[derive(Debug, Clone, Default)]
pub struct EngineHandle;

#[derive(Debug, Clone)]
pub struct GeometryHandle(Rc<RefCell<Geometry>>);

impl GeometryHandle {
    pub fn new(geometry: Geometry) -> Self {
        Self(Rc::new(RefCell::new(geometry)))
    }

    /// Copy of the current geometry data.
    pub fn snapshot(&self) -> Geometry {
        self.0.borrow().clone()
    }

    fn checked(geometry: Geometry) -> RhaiResult<Self> {
        check_size(geometry.vertex_count())?;
        Ok(Self::new(geometry))
    }
}

#[derive(Debug)]
enum ObjectBody {
    Mesh {
        geometry: GeometryHandle,
        materials: Vec<Material>,
        /// Whether the script passed a material array.
        array: bool,
    },
    Group,
}

struct ObjectNode {
    name: String,
    transform: Transform,
    visible: bool,
    body: ObjectBody,
    children: Vec<ObjectHandle>,
}

/// A mesh or group created by a script.
#[derive(Clone)]
pub struct ObjectHandle(Rc<RefCell<ObjectNode>>);

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(node) => f
                .debug_struct("ObjectHandle")
                .field("name", &node.name)
                .field("mesh", &matches!(node.body, ObjectBody::Mesh { .. }))
                .field("children", &node.children.len())
                .finish(),
            Err(_) => f.write_str("ObjectHandle(<borrowed>)"),
        }
    }
}

impl ObjectHandle {
    fn new(body: ObjectBody) -> Self {
        Self(Rc::new(RefCell::new(ObjectNode {
            name: String::new(),
            transform: Transform::default(),
            visible: true,
            body,
            children: Vec::new(),
        })))
    }

    pub fn mesh(geometry: GeometryHandle, materials: MaterialSlot) -> Self {
        let (materials, array) = match materials {
            MaterialSlot::Single(material) => (vec![material], false),
            MaterialSlot::Array(items) => (items, true),
        };
        Self::new(ObjectBody::Mesh {
            geometry,
            materials,
            array,
        })
    }

    pub fn group() -> Self {
        Self::new(ObjectBody::Group)
    }

    pub fn set_position(&self, position: Vec3) {
        self.0.borrow_mut().transform.position = position;
    }

    pub fn is_mesh(&self) -> bool {
        matches!(self.0.borrow().body, ObjectBody::Mesh { .. })
    }

    /// Whether `target` is this object or one of its descendants.
    ///
    /// Walks the whole subtree, however deep, visiting shared nodes once.
    fn contains(&self, target: &ObjectHandle) -> bool {
        let mut visited: HashSet<*const RefCell<ObjectNode>> = HashSet::new();
        let mut pending = vec![self.clone()];
        while let Some(handle) = pending.pop() {
            if Rc::ptr_eq(&handle.0, &target.0) {
                return true;
            }
            if visited.insert(Rc::as_ptr(&handle.0)) {
                pending.extend(handle.0.borrow().children.iter().cloned());
            }
        }
        false
    }

    /// Owned copy of the whole tree.
    pub fn to_scene_object(&self, max_depth: usize) -> Result<SceneObject, EvaluationError> {
        self.build(0, max_depth)
    }

    fn build(&self, depth: usize, max_depth: usize) -> Result<SceneObject, EvaluationError> {
        if depth > max_depth {
            return Err(EvaluationError::HierarchyTooDeep(max_depth));
        }
        let node = self.0.borrow();

        let kind = match &node.body {
            ObjectBody::Mesh {
                geometry,
                materials,
                array,
            } => ObjectKind::Mesh {
                geometry: geometry.snapshot(),
                materials: if *array {
                    MaterialSlot::Array(materials.clone())
                } else {
                    MaterialSlot::Single(materials.first().cloned().unwrap_or_default())
                },
            },
            ObjectBody::Group => ObjectKind::Group,
        };

        let children = node
            .children
            .iter()
            .map(|child| child.build(depth + 1, max_depth))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SceneObject {
            name: node.name.clone(),
            transform: node.transform,
            visible: node.visible,
            kind,
            children,
        })
    }

    /// Mutable per-frame state of the tree in preorder.
    pub fn node_states(&self, max_depth: usize) -> Result<Vec<NodeState>, EvaluationError> {
        let mut states = Vec::new();
        self.collect_states(&mut states, 0, max_depth)?;
        Ok(states)
    }

    fn collect_states(
        &self,
        out: &mut Vec<NodeState>,
        depth: usize,
        max_depth: usize,
    ) -> Result<(), EvaluationError> {
        if depth > max_depth {
            return Err(EvaluationError::HierarchyTooDeep(max_depth));
        }
        let node = self.0.borrow();
        out.push(NodeState {
            transform: node.transform,
            visible: node.visible,
            colors: match &node.body {
                ObjectBody::Mesh { materials, .. } => materials.iter().map(|m| m.color).collect(),
                ObjectBody::Group => Vec::new(),
            },
        });
        for child in &node.children {
            child.collect_states(out, depth + 1, max_depth)?;
        }
        Ok(())
    }
}

/// Parameter snapshot as the map handed to factories.
pub fn params_to_map(snapshot: &ParameterSnapshot) -> Map {
    snapshot
        .iter()
        .map(|(key, value)| {
            let value = match value {
                ParamValue::Number(n) => Dynamic::from(*n as FLOAT),
                ParamValue::Boolean(b) => Dynamic::from(*b),
                ParamValue::Color(s) => Dynamic::from(s.clone()),
            };
            (key.as_str().into(), value)
        })
        .collect()
}

// ============================================================================
// Conversions
// ============================================================================

fn check_size(vertices: usize) -> RhaiResult<()> {
    if vertices > MAX_GEOMETRY_VERTICES {
        return Err(format!(
            "geometry has {vertices} vertices, more than the {MAX_GEOMETRY_VERTICES} allowed"
        )
        .into());
    }
    Ok(())
}

/// Accepts both integer and float arguments.
fn number(value: &Dynamic, what: &str) -> RhaiResult<f32> {
    if let Ok(f) = value.as_float() {
        if f.is_finite() {
            return Ok(f as f32);
        }
        return Err(format!("{what} must be finite").into());
    }
    if let Ok(i) = value.as_int() {
        return Ok(i as f32);
    }
    Err(format!("{what} must be a number, found {}", value.type_name()).into())
}

fn segments(value: &Dynamic, what: &str) -> RhaiResult<u32> {
    let n = number(value, what)?;
    Ok(n.round().clamp(0.0, u32::MAX as f32) as u32)
}

fn vec3_to_map(v: Vec3) -> Map {
    let mut map = Map::new();
    map.insert("x".into(), Dynamic::from(v.x as FLOAT));
    map.insert("y".into(), Dynamic::from(v.y as FLOAT));
    map.insert("z".into(), Dynamic::from(v.z as FLOAT));
    map
}

/// Missing components keep their value from `current`.
fn vec3_from_map(map: &Map, current: Vec3) -> RhaiResult<Vec3> {
    let component = |key: &str, fallback: f32| -> RhaiResult<f32> {
        match map.get(key) {
            Some(v) => number(v, key),
            None => Ok(fallback),
        }
    };
    Ok(Vec3::new(
        component("x", current.x)?,
        component("y", current.y)?,
        component("z", current.z)?,
    ))
}

fn rgb_to_map(rgb: [f32; 3]) -> Map {
    let mut map = Map::new();
    map.insert("r".into(), Dynamic::from(rgb[0] as FLOAT));
    map.insert("g".into(), Dynamic::from(rgb[1] as FLOAT));
    map.insert("b".into(), Dynamic::from(rgb[2] as FLOAT));
    map
}

/// `"#rrggbb"`, `0xrrggbb`, or `#{ r, g, b }` with components in `0..=1`.
fn color_value(value: &Dynamic) -> RhaiResult<[f32; 3]> {
    if let Some(text) = value.read_lock::<ImmutableString>() {
        return hex_to_rgb(text.as_str())
            .ok_or_else(|| format!("'{}' is not a hex colour", text.as_str()).into());
    }
    if let Ok(packed) = value.as_int() {
        if !(0..=0xFF_FF_FF).contains(&packed) {
            return Err(format!("colour {packed:#x} is out of range").into());
        }
        return Ok([
            ((packed >> 16) & 0xFF) as f32 / 255.0,
            ((packed >> 8) & 0xFF) as f32 / 255.0,
            (packed & 0xFF) as f32 / 255.0,
        ]);
    }
    if let Some(map) = value.read_lock::<Map>() {
        let channel = |key: &str| -> RhaiResult<f32> {
            map.get(key)
                .map(|v| number(v, key))
                .unwrap_or(Ok(0.0))
                .map(|c| c.clamp(0.0, 1.0))
        };
        return Ok([channel("r")?, channel("g")?, channel("b")?]);
    }
    Err(format!("expected a colour, found {}", value.type_name()).into())
}

fn flag(value: &Dynamic, what: &str) -> RhaiResult<bool> {
    value
        .as_bool()
        .map_err(|found| format!("{what} must be a boolean, found {found}").into())
}

fn material_from_map(map: &Map) -> RhaiResult<Material> {
    let mut material = Material::default();
    for (key, value) in map {
        match key.as_str() {
            "color" => material.color = color_value(value)?,
            "emissive" => material.emissive = color_value(value)?,
            "opacity" => material = material.with_opacity(number(value, "opacity")?),
            "roughness" => material.roughness = number(value, "roughness")?.clamp(0.0, 1.0),
            "metalness" => material.metalness = number(value, "metalness")?.clamp(0.0, 1.0),
            "wireframe" => material.wireframe = flag(value, "wireframe")?,
            "flat_shading" | "flatShading" => material.flat_shading = flag(value, "flat_shading")?,
            "side" => {
                material.side = match value.as_int() {
                    Ok(0) => Side::Front,
                    Ok(1) => Side::Back,
                    Ok(2) => Side::Double,
                    _ => value
                        .read_lock::<ImmutableString>()
                        .and_then(|s| Side::parse(s.as_str()))
                        .ok_or_else(|| -> Box<EvalAltResult> {
                            "side must be \"front\", \"back\" or \"double\"".into()
                        })?,
                }
            }
            other => log::debug!("Ignoring unknown material property '{other}'"),
        }
    }
    Ok(material)
}

fn materials_from_array(items: &Array) -> RhaiResult<Vec<Material>> {
    items
        .iter()
        .map(|item| match item.read_lock::<Map>() {
            Some(map) => material_from_map(&map),
            None => Err(format!("material array entries must be maps, found {}", item.type_name()).into()),
        })
        .collect()
}

fn float_buffer(items: &Array, what: &str) -> RhaiResult<Vec<f32>> {
    items.iter().map(|v| number(v, what)).collect()
}

fn index_buffer(items: &Array) -> RhaiResult<Vec<u32>> {
    items
        .iter()
        .map(|v| {
            let i = v
                .as_int()
                .map_err(|found| format!("indices must be integers, found {found}"))?;
            u32::try_from(i).map_err(|_| format!("index {i} is out of range").into())
        })
        .collect()
}

// ============================================================================
// Registration
// ============================================================================

/// Register the engine handle, geometry and object types with a Rhai engine.
pub fn register_script_api(engine: &mut Engine) {
    engine.register_type_with_name::<EngineHandle>("Engine");
    engine.register_type_with_name::<GeometryHandle>("Geometry");
    engine.register_type_with_name::<ObjectHandle>("Object3D");

    register_builders(engine);
    register_geometry_methods(engine);
    register_object_api(engine);
}

fn register_builders(engine: &mut Engine) {
    for name in ["box", "cuboid"] {
        engine.register_fn(
            name,
            |_: &mut EngineHandle, w: Dynamic, h: Dynamic, d: Dynamic| -> RhaiResult<GeometryHandle> {
                GeometryHandle::checked(Geometry::cuboid(
                    number(&w, "width")?,
                    number(&h, "height")?,
                    number(&d, "depth")?,
                ))
            },
        );
        engine.register_fn(name, |_: &mut EngineHandle, size: Dynamic| -> RhaiResult<GeometryHandle> {
            let s = number(&size, "size")?;
            GeometryHandle::checked(Geometry::cuboid(s, s, s))
        });
    }

    engine.register_fn("sphere", |_: &mut EngineHandle, r: Dynamic| -> RhaiResult<GeometryHandle> {
        GeometryHandle::checked(Geometry::sphere(number(&r, "radius")?, 32, 16))
    });
    engine.register_fn(
        "sphere",
        |_: &mut EngineHandle, r: Dynamic, ws: Dynamic, hs: Dynamic| -> RhaiResult<GeometryHandle> {
            GeometryHandle::checked(Geometry::sphere(
                number(&r, "radius")?,
                segments(&ws, "width_segments")?,
                segments(&hs, "height_segments")?,
            ))
        },
    );

    engine.register_fn(
        "cylinder",
        |_: &mut EngineHandle, top: Dynamic, bottom: Dynamic, h: Dynamic| -> RhaiResult<GeometryHandle> {
            GeometryHandle::checked(Geometry::cylinder(
                number(&top, "radius_top")?,
                number(&bottom, "radius_bottom")?,
                number(&h, "height")?,
                32,
            ))
        },
    );
    engine.register_fn(
        "cylinder",
        |_: &mut EngineHandle, top: Dynamic, bottom: Dynamic, h: Dynamic, seg: Dynamic| -> RhaiResult<GeometryHandle> {
            GeometryHandle::checked(Geometry::cylinder(
                number(&top, "radius_top")?,
                number(&bottom, "radius_bottom")?,
                number(&h, "height")?,
                segments(&seg, "radial_segments")?,
            ))
        },
    );

    engine.register_fn("cone", |_: &mut EngineHandle, r: Dynamic, h: Dynamic| -> RhaiResult<GeometryHandle> {
        GeometryHandle::checked(Geometry::cone(number(&r, "radius")?, number(&h, "height")?, 32))
    });
    engine.register_fn(
        "cone",
        |_: &mut EngineHandle, r: Dynamic, h: Dynamic, seg: Dynamic| -> RhaiResult<GeometryHandle> {
            GeometryHandle::checked(Geometry::cone(
                number(&r, "radius")?,
                number(&h, "height")?,
                segments(&seg, "radial_segments")?,
            ))
        },
    );

    engine.register_fn("torus", |_: &mut EngineHandle, r: Dynamic, tube: Dynamic| -> RhaiResult<GeometryHandle> {
        GeometryHandle::checked(Geometry::torus(number(&r, "radius")?, number(&tube, "tube")?, 16, 48))
    });
    engine.register_fn(
        "torus",
        |_: &mut EngineHandle, r: Dynamic, tube: Dynamic, radial: Dynamic, tubular: Dynamic| -> RhaiResult<GeometryHandle> {
            GeometryHandle::checked(Geometry::torus(
                number(&r, "radius")?,
                number(&tube, "tube")?,
                segments(&radial, "radial_segments")?,
                segments(&tubular, "tubular_segments")?,
            ))
        },
    );

    engine.register_fn("plane", |_: &mut EngineHandle, w: Dynamic, d: Dynamic| -> RhaiResult<GeometryHandle> {
        GeometryHandle::checked(Geometry::plane(number(&w, "width")?, number(&d, "depth")?))
    });

    engine.register_fn("geometry", |_: &mut EngineHandle, positions: Array| -> RhaiResult<GeometryHandle> {
        let positions = float_buffer(&positions, "positions")?;
        GeometryHandle::checked(Geometry::from_buffers(&positions, &[])?)
    });
    engine.register_fn(
        "geometry",
        |_: &mut EngineHandle, positions: Array, indices: Array| -> RhaiResult<GeometryHandle> {
            let positions = float_buffer(&positions, "positions")?;
            let indices = index_buffer(&indices)?;
            GeometryHandle::checked(Geometry::from_buffers(&positions, &indices)?)
        },
    );

    engine.register_fn("from_obj", |_: &mut EngineHandle, text: ImmutableString| -> RhaiResult<GeometryHandle> {
        GeometryHandle::checked(Geometry::from_obj(text.as_str())?)
    });

    engine.register_fn("mesh", |_: &mut EngineHandle, geometry: GeometryHandle| {
        ObjectHandle::mesh(geometry, MaterialSlot::default())
    });
    engine.register_fn(
        "mesh",
        |_: &mut EngineHandle, geometry: GeometryHandle, material: Map| -> RhaiResult<ObjectHandle> {
            Ok(ObjectHandle::mesh(
                geometry,
                MaterialSlot::Single(material_from_map(&material)?),
            ))
        },
    );
    engine.register_fn(
        "mesh",
        |_: &mut EngineHandle, geometry: GeometryHandle, materials: Array| -> RhaiResult<ObjectHandle> {
            Ok(ObjectHandle::mesh(
                geometry,
                MaterialSlot::Array(materials_from_array(&materials)?),
            ))
        },
    );
    engine.register_fn("group", |_: &mut EngineHandle| ObjectHandle::group());

    engine.register_fn(
        "vec3",
        |_: &mut EngineHandle, x: Dynamic, y: Dynamic, z: Dynamic| -> RhaiResult<Map> {
            Ok(vec3_to_map(Vec3::new(
                number(&x, "x")?,
                number(&y, "y")?,
                number(&z, "z")?,
            )))
        },
    );
    engine.register_fn("color", |_: &mut EngineHandle, value: Dynamic| -> RhaiResult<Map> {
        Ok(rgb_to_map(color_value(&value)?))
    });
    engine.register_fn(
        "color",
        |_: &mut EngineHandle, r: Dynamic, g: Dynamic, b: Dynamic| -> RhaiResult<Map> {
            Ok(rgb_to_map([
                number(&r, "r")?.clamp(0.0, 1.0),
                number(&g, "g")?.clamp(0.0, 1.0),
                number(&b, "b")?.clamp(0.0, 1.0),
            ]))
        },
    );
}

fn register_geometry_methods(engine: &mut Engine) {
    engine.register_fn(
        "translate",
        |g: &mut GeometryHandle, x: Dynamic, y: Dynamic, z: Dynamic| -> RhaiResult<GeometryHandle> {
            let offset = Vec3::new(number(&x, "x")?, number(&y, "y")?, number(&z, "z")?);
            g.0.borrow_mut().translate(offset);
            Ok(g.clone())
        },
    );
    engine.register_fn("scale", |g: &mut GeometryHandle, s: Dynamic| -> RhaiResult<GeometryHandle> {
        g.0.borrow_mut().scale(Vec3::splat(number(&s, "scale")?));
        Ok(g.clone())
    });
    engine.register_fn(
        "scale",
        |g: &mut GeometryHandle, x: Dynamic, y: Dynamic, z: Dynamic| -> RhaiResult<GeometryHandle> {
            let factors = Vec3::new(number(&x, "x")?, number(&y, "y")?, number(&z, "z")?);
            g.0.borrow_mut().scale(factors);
            Ok(g.clone())
        },
    );
    let axes: [(&str, fn(f32) -> Quat); 3] = [
        ("rotate_x", Quat::from_rotation_x),
        ("rotate_y", Quat::from_rotation_y),
        ("rotate_z", Quat::from_rotation_z),
    ];
    for (name, rotation) in axes {
        engine.register_fn(name, move |g: &mut GeometryHandle, angle: Dynamic| -> RhaiResult<GeometryHandle> {
            g.0.borrow_mut().rotate(rotation(number(&angle, "angle")?));
            Ok(g.clone())
        });
    }
    engine.register_fn("merge", |g: &mut GeometryHandle, other: GeometryHandle| -> RhaiResult<GeometryHandle> {
        let other = other.snapshot();
        check_size(g.0.borrow().vertex_count() + other.vertex_count())?;
        g.0.borrow_mut().merge(&other);
        Ok(g.clone())
    });
    engine.register_fn("center", |g: &mut GeometryHandle| -> GeometryHandle {
        let center = g.0.borrow().bounds().center();
        g.0.borrow_mut().translate(-center);
        g.clone()
    });
    engine.register_fn("copy", |g: &mut GeometryHandle| GeometryHandle::new(g.snapshot()));
    engine.register_fn("bounds", |g: &mut GeometryHandle| -> Map {
        let bounds = g.0.borrow().bounds();
        let mut map = Map::new();
        map.insert("min".into(), Dynamic::from(vec3_to_map(bounds.min)));
        map.insert("max".into(), Dynamic::from(vec3_to_map(bounds.max)));
        map
    });
    engine.register_fn("vertex_count", |g: &mut GeometryHandle| g.0.borrow().vertex_count() as INT);
    engine.register_fn("triangle_count", |g: &mut GeometryHandle| g.0.borrow().triangle_count() as INT);
}

fn register_object_api(engine: &mut Engine) {
    engine.register_get("position", |h: &mut ObjectHandle| vec3_to_map(h.0.borrow().transform.position));
    engine.register_set("position", |h: &mut ObjectHandle, value: Map| -> RhaiResult<()> {
        let current = h.0.borrow().transform.position;
        h.0.borrow_mut().transform.position = vec3_from_map(&value, current)?;
        Ok(())
    });

    engine.register_get("rotation", |h: &mut ObjectHandle| vec3_to_map(h.0.borrow().transform.rotation));
    engine.register_set("rotation", |h: &mut ObjectHandle, value: Map| -> RhaiResult<()> {
        let current = h.0.borrow().transform.rotation;
        h.0.borrow_mut().transform.rotation = vec3_from_map(&value, current)?;
        Ok(())
    });

    engine.register_get("scale", |h: &mut ObjectHandle| vec3_to_map(h.0.borrow().transform.scale));
    engine.register_set("scale", |h: &mut ObjectHandle, value: Dynamic| -> RhaiResult<()> {
        let current = h.0.borrow().transform.scale;
        let scale = match value.read_lock::<Map>() {
            Some(map) => vec3_from_map(&map, current)?,
            None => Vec3::splat(number(&value, "scale")?),
        };
        h.0.borrow_mut().transform.scale = scale;
        Ok(())
    });

    engine.register_get("visible", |h: &mut ObjectHandle| h.0.borrow().visible);
    engine.register_set("visible", |h: &mut ObjectHandle, visible: bool| {
        h.0.borrow_mut().visible = visible;
    });

    engine.register_get("name", |h: &mut ObjectHandle| h.0.borrow().name.clone());
    engine.register_set("name", |h: &mut ObjectHandle, name: ImmutableString| {
        h.0.borrow_mut().name = name.to_string();
    });

    engine.register_get("children", |h: &mut ObjectHandle| -> Array {
        h.0.borrow().children.iter().cloned().map(Dynamic::from).collect()
    });
    engine.register_get("is_mesh", |h: &mut ObjectHandle| h.is_mesh());

    engine.register_fn(
        "set_position",
        |h: &mut ObjectHandle, x: Dynamic, y: Dynamic, z: Dynamic| -> RhaiResult<()> {
            h.0.borrow_mut().transform.position =
                Vec3::new(number(&x, "x")?, number(&y, "y")?, number(&z, "z")?);
            Ok(())
        },
    );
    engine.register_fn(
        "set_rotation",
        |h: &mut ObjectHandle, x: Dynamic, y: Dynamic, z: Dynamic| -> RhaiResult<()> {
            h.0.borrow_mut().transform.rotation =
                Vec3::new(number(&x, "x")?, number(&y, "y")?, number(&z, "z")?);
            Ok(())
        },
    );
    engine.register_fn("set_scale", |h: &mut ObjectHandle, s: Dynamic| -> RhaiResult<()> {
        h.0.borrow_mut().transform.scale = Vec3::splat(number(&s, "scale")?);
        Ok(())
    });
    engine.register_fn(
        "set_scale",
        |h: &mut ObjectHandle, x: Dynamic, y: Dynamic, z: Dynamic| -> RhaiResult<()> {
            h.0.borrow_mut().transform.scale =
                Vec3::new(number(&x, "x")?, number(&y, "y")?, number(&z, "z")?);
            Ok(())
        },
    );

    for (name, axis) in [("rotate_x", Vec3::X), ("rotate_y", Vec3::Y), ("rotate_z", Vec3::Z)] {
        engine.register_fn(name, move |h: &mut ObjectHandle, angle: Dynamic| -> RhaiResult<()> {
            h.0.borrow_mut().transform.rotation += axis * number(&angle, "angle")?;
            Ok(())
        });
    }

    engine.register_fn("add", |h: &mut ObjectHandle, child: ObjectHandle| -> RhaiResult<()> {
        if child.contains(h) {
            return Err("cannot add an object to itself or to one of its descendants".into());
        }
        let mut node = h.0.borrow_mut();
        if !node.children.iter().any(|c| Rc::ptr_eq(&c.0, &child.0)) {
            node.children.push(child);
        }
        Ok(())
    });
    engine.register_fn("remove", |h: &mut ObjectHandle, child: ObjectHandle| -> bool {
        let mut node = h.0.borrow_mut();
        let before = node.children.len();
        node.children.retain(|c| !Rc::ptr_eq(&c.0, &child.0));
        node.children.len() != before
    });

    engine.register_fn("set_color", |h: &mut ObjectHandle, value: Dynamic| -> RhaiResult<()> {
        let rgb = color_value(&value)?;
        match &mut h.0.borrow_mut().body {
            ObjectBody::Mesh { materials, .. } => {
                for material in materials.iter_mut() {
                    material.color = rgb;
                }
                Ok(())
            }
            ObjectBody::Group => Err("set_color is only available on meshes".into()),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        let mut engine = Engine::new();
        register_script_api(&mut engine);
        engine
    }

    fn eval_object(script: &str) -> ObjectHandle {
        let engine = engine();
        let mut scope = rhai::Scope::new();
        scope.push("lib", EngineHandle);
        engine
            .eval_with_scope::<ObjectHandle>(&mut scope, script)
            .unwrap()
    }

    #[test]
    fn mesh_with_material_map() {
        let obj = eval_object(
            r##"
            let m = lib.mesh(lib.sphere(2, 8, 4), #{ color: "#ff0000", opacity: 0.5, side: "double" });
            m.position.y = 3;
            m.name = "ball";
            m
            "##,
        );
        let scene = obj.to_scene_object(8).unwrap();
        assert_eq!(scene.name, "ball");
        assert_eq!(scene.transform.position, Vec3::new(0.0, 3.0, 0.0));
        let ObjectKind::Mesh { materials, .. } = &scene.kind else {
            panic!("expected mesh");
        };
        let material = materials.primary().unwrap();
        assert_eq!(material.color, [1.0, 0.0, 0.0]);
        assert_eq!(material.side, Side::Double);
        assert!((material.opacity - 0.5).abs() < 1e-6);
    }

    #[test]
    fn material_array_is_preserved() {
        let obj = eval_object(
            r#"lib.mesh(lib.cuboid(1, 2, 3), [#{ color: 0x00ff00 }, #{ wireframe: true }])"#,
        );
        let scene = obj.to_scene_object(8).unwrap();
        let ObjectKind::Mesh { materials, .. } = &scene.kind else {
            panic!("expected mesh");
        };
        assert!(matches!(materials, MaterialSlot::Array(items) if items.len() == 2));
    }

    #[test]
    fn groups_and_transforms() {
        let obj = eval_object(
            r#"
            let root = lib.group();
            let a = lib.mesh(lib.cuboid(1));
            a.set_position(1, 0, 0);
            a.rotate_y(0.5);
            a.scale = 2;
            root.add(a);
            root.add(lib.mesh(lib.torus(1, 0.25)));
            root
            "#,
        );
        let scene = obj.to_scene_object(8).unwrap();
        assert_eq!(scene.object_count(), 3);
        let a = &scene.children[0];
        assert_eq!(a.transform.position, Vec3::X);
        assert!((a.transform.rotation.y - 0.5).abs() < 1e-6);
        assert_eq!(a.transform.scale, Vec3::splat(2.0));
    }

    #[test]
    fn cycles_are_rejected() {
        let engine = engine();
        let mut scope = rhai::Scope::new();
        scope.push("lib", EngineHandle);
        let err = engine
            .run_with_scope(
                &mut scope,
                "let a = lib.group(); let b = lib.group(); a.add(b); b.add(a);",
            )
            .unwrap_err();
        assert!(err.to_string().contains("descendants"));
    }

    #[test]
    fn cycles_are_rejected_at_any_depth() {
        let engine = engine();
        let mut scope = rhai::Scope::new();
        scope.push("lib", EngineHandle);
        let err = engine
            .run_with_scope(
                &mut scope,
                r#"
                let root = lib.group();
                let current = root;
                for i in 0..200 {
                    let next = lib.group();
                    current.add(next);
                    current = next;
                }
                current.add(root);
                "#,
            )
            .unwrap_err();
        assert!(err.to_string().contains("descendants"));
    }

    #[test]
    fn depth_limit_applies_to_conversion() {
        let obj = eval_object(
            r#"
            let root = lib.group();
            let current = root;
            for i in 0..5 {
                let next = lib.group();
                current.add(next);
                current = next;
            }
            root
            "#,
        );
        assert!(obj.to_scene_object(10).is_ok());
        assert!(matches!(
            obj.to_scene_object(3),
            Err(EvaluationError::HierarchyTooDeep(3))
        ));
    }

    #[test]
    fn geometry_methods_chain_and_share() {
        let engine = engine();
        let mut scope = rhai::Scope::new();
        scope.push("lib", EngineHandle);
        let count: INT = engine
            .eval_with_scope(
                &mut scope,
                r#"
                let g = lib.cuboid(1, 1, 1);
                g.merge(g);
                g.translate(0, 1, 0).rotate_x(0.1);
                g.vertex_count()
                "#,
            )
            .unwrap();
        assert_eq!(count, 48);
    }

    #[test]
    fn raw_geometry_validation_reaches_script() {
        let engine = engine();
        let mut scope = rhai::Scope::new();
        scope.push("lib", EngineHandle);
        let err = engine
            .run_with_scope(&mut scope, "lib.geometry([0, 0, 0, 1, 0, 0, 0, 1, 0], [0, 1, 5]);")
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn node_states_follow_mutation() {
        let obj = eval_object(
            r##"
            let root = lib.group();
            let m = lib.mesh(lib.plane(1, 1));
            root.add(m);
            m.visible = false;
            m.set_color("#0000ff");
            root
            "##,
        );
        let states = obj.node_states(8).unwrap();
        assert_eq!(states.len(), 2);
        assert!(!states[1].visible);
        assert_eq!(states[1].colors, vec![[0.0, 0.0, 1.0]]);
    }

    #[test]
    fn params_map_uses_script_types() {
        let snapshot = ParameterSnapshot::new()
            .with("radius", 5.0)
            .with("spin", true)
            .with("tint", "#ffffff");
        let map = params_to_map(&snapshot);
        assert_eq!(map["radius"].as_float().unwrap(), 5.0);
        assert!(map["spin"].as_bool().unwrap());
        assert_eq!(map["tint"].clone().into_string().unwrap(), "#ffffff");
    }
}
