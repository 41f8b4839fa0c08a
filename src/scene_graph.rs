//! Scene graph owned by the scene lifecycle manager.
//!
//! Factories hand over a [`SceneObject`] tree; inserting it flattens the tree
//! into nodes and registers each geometry and material under its own id so the
//! renderer can cache GPU resources per id and release them individually.

use std::collections::HashMap;

use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::geometry::Geometry;
use crate::material::{Material, MaterialSlot};

/// Unique identifier for scene entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u64);

/// Transform component for scene entities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    /// Euler angles in radians, applied X then Y then Z.
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn quat(&self) -> Quat {
        Quat::from_euler(EulerRot::XYZ, self.rotation.x, self.rotation.y, self.rotation.z)
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.quat(), self.position)
    }
}

/// What a scene object draws.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    Mesh {
        geometry: Geometry,
        materials: MaterialSlot,
    },
    Group,
}

/// Owned object tree produced by a factory call.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub name: String,
    pub transform: Transform,
    pub visible: bool,
    pub kind: ObjectKind,
    pub children: Vec<SceneObject>,
}

impl SceneObject {
    pub fn mesh(geometry: Geometry, materials: MaterialSlot) -> Self {
        Self {
            name: String::new(),
            transform: Transform::default(),
            visible: true,
            kind: ObjectKind::Mesh {
                geometry,
                materials,
            },
            children: Vec::new(),
        }
    }

    pub fn group() -> Self {
        Self {
            name: String::new(),
            transform: Transform::default(),
            visible: true,
            kind: ObjectKind::Group,
            children: Vec::new(),
        }
    }

    /// Number of objects in this tree, including itself.
    pub fn object_count(&self) -> usize {
        1 + self.children.iter().map(SceneObject::object_count).sum::<usize>()
    }
}

/// Per-frame mutable state of one node, in preorder.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
    pub transform: Transform,
    pub visible: bool,
    /// Base colour of each material, in slot order.
    pub colors: Vec<[f32; 3]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Mesh {
        geometry: GeometryId,
        materials: Vec<MaterialId>,
    },
    Group,
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub transform: Transform,
    pub visible: bool,
    pub kind: NodeKind,
    pub parent: Option<EntityId>,
    pub children: Vec<EntityId>,
}

/// Resources detached from the graph that the renderer must release.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Detached {
    pub nodes: Vec<EntityId>,
    pub geometries: Vec<GeometryId>,
    pub materials: Vec<MaterialId>,
}

impl Detached {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.geometries.is_empty() && self.materials.is_empty()
    }
}

/// A visible mesh ready to draw.
#[derive(Debug, Clone, Copy)]
pub struct DrawItem {
    pub entity: EntityId,
    pub world: Mat4,
    pub geometry: GeometryId,
    pub material: MaterialId,
}

#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: HashMap<EntityId, SceneNode>,
    roots: Vec<EntityId>,
    geometries: HashMap<GeometryId, Geometry>,
    materials: HashMap<MaterialId, Material>,
    next_id: u64,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Insert an object tree as a new root and return the root's id.
    pub fn insert(&mut self, object: SceneObject) -> EntityId {
        let id = self.insert_node(object, None);
        self.roots.push(id);
        id
    }

    fn insert_node(&mut self, object: SceneObject, parent: Option<EntityId>) -> EntityId {
        let id = EntityId(self.new_id());

        let kind = match object.kind {
            ObjectKind::Mesh {
                geometry,
                materials,
            } => {
                let geometry_id = GeometryId(self.new_id());
                self.geometries.insert(geometry_id, geometry);

                let material_list: Vec<Material> = match materials {
                    MaterialSlot::Single(material) => vec![material],
                    MaterialSlot::Array(items) => items,
                };
                let material_ids = material_list
                    .into_iter()
                    .map(|material| {
                        let material_id = MaterialId(self.new_id());
                        self.materials.insert(material_id, material);
                        material_id
                    })
                    .collect();

                NodeKind::Mesh {
                    geometry: geometry_id,
                    materials: material_ids,
                }
            }
            ObjectKind::Group => NodeKind::Group,
        };

        let children = object
            .children
            .into_iter()
            .map(|child| self.insert_node(child, Some(id)))
            .collect();

        self.nodes.insert(
            id,
            SceneNode {
                name: object.name,
                transform: object.transform,
                visible: object.visible,
                kind,
                parent,
                children,
            },
        );
        id
    }

    /// Remove a subtree and hand back everything it owned.
    pub fn remove(&mut self, id: EntityId) -> Detached {
        let mut detached = Detached::default();
        if !self.nodes.contains_key(&id) {
            return detached;
        }

        self.roots.retain(|&root| root != id);
        if let Some(parent) = self.nodes.get(&id).and_then(|n| n.parent) {
            if let Some(parent) = self.nodes.get_mut(&parent) {
                parent.children.retain(|&child| child != id);
            }
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.remove(&current) else {
                continue;
            };
            detached.nodes.push(current);
            if let NodeKind::Mesh {
                geometry,
                materials,
            } = node.kind
            {
                if self.geometries.remove(&geometry).is_some() {
                    detached.geometries.push(geometry);
                }
                for material in materials {
                    if self.materials.remove(&material).is_some() {
                        detached.materials.push(material);
                    }
                }
            }
            stack.extend(node.children);
        }
        detached
    }

    /// Remove every node and resource, reachable or not.
    pub fn drain(&mut self) -> Detached {
        let mut detached = Detached::default();
        for root in std::mem::take(&mut self.roots) {
            let part = self.remove(root);
            detached.nodes.extend(part.nodes);
            detached.geometries.extend(part.geometries);
            detached.materials.extend(part.materials);
        }

        detached.nodes.extend(self.nodes.drain().map(|(id, _)| id));
        detached.geometries.extend(self.geometries.drain().map(|(id, _)| id));
        detached.materials.extend(self.materials.drain().map(|(id, _)| id));
        detached
    }

    pub fn get(&self, id: EntityId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(&id)
    }

    pub fn geometry(&self, id: GeometryId) -> Option<&Geometry> {
        self.geometries.get(&id)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(&id)
    }

    pub fn roots(&self) -> &[EntityId] {
        &self.roots
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn mesh_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::Mesh { .. }))
            .count()
    }

    pub fn geometry_count(&self) -> usize {
        self.geometries.len()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.geometries.is_empty() && self.materials.is_empty()
    }

    /// Ids of a subtree in preorder (node, then children in order).
    pub fn preorder(&self, root: EntityId) -> Vec<EntityId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            order.push(id);
            stack.extend(node.children.iter().rev());
        }
        order
    }

    /// Overwrite transforms, visibility and colours of a subtree from
    /// preorder states. Extra or missing states are ignored.
    pub fn apply_states(&mut self, root: EntityId, states: &[NodeState]) {
        for (id, state) in self.preorder(root).into_iter().zip(states) {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            node.transform = state.transform;
            node.visible = state.visible;

            if let NodeKind::Mesh { materials, .. } = &node.kind {
                for (material_id, color) in materials.iter().zip(&state.colors) {
                    if let Some(material) = self.materials.get_mut(material_id) {
                        material.color = *color;
                    }
                }
            }
        }
    }

    /// Visible meshes with world matrices. Hidden groups hide their subtree.
    pub fn draw_list(&self) -> Vec<DrawItem> {
        let mut items = Vec::new();
        let mut stack: Vec<(EntityId, Mat4)> =
            self.roots.iter().rev().map(|&id| (id, Mat4::IDENTITY)).collect();

        while let Some((id, parent_world)) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if !node.visible {
                continue;
            }
            let world = parent_world * node.transform.matrix();

            if let NodeKind::Mesh {
                geometry,
                materials,
            } = &node.kind
            {
                if let Some(&material) = materials.first() {
                    items.push(DrawItem {
                        entity: id,
                        world,
                        geometry: *geometry,
                        material,
                    });
                }
            }
            stack.extend(node.children.iter().rev().map(|&child| (child, world)));
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh() -> SceneObject {
        SceneObject::mesh(Geometry::cuboid(1.0, 1.0, 1.0), MaterialSlot::default())
    }

    fn group_of(children: Vec<SceneObject>) -> SceneObject {
        SceneObject {
            children,
            ..SceneObject::group()
        }
    }

    #[test]
    fn insert_registers_resources() {
        let mut graph = SceneGraph::new();
        let multi = SceneObject::mesh(
            Geometry::plane(1.0, 1.0),
            MaterialSlot::Array(vec![Material::default(); 3]),
        );
        let root = graph.insert(group_of(vec![mesh(), multi]));

        assert_eq!(graph.roots(), &[root]);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.mesh_count(), 2);
        assert_eq!(graph.geometry_count(), 2);
        assert_eq!(graph.material_count(), 4);
    }

    #[test]
    fn remove_detaches_every_array_material() {
        let mut graph = SceneGraph::new();
        let root = graph.insert(SceneObject::mesh(
            Geometry::plane(1.0, 1.0),
            MaterialSlot::Array(vec![Material::default(); 2]),
        ));

        let detached = graph.remove(root);
        assert_eq!(detached.nodes, vec![root]);
        assert_eq!(detached.geometries.len(), 1);
        assert_eq!(detached.materials.len(), 2);
        assert!(graph.is_empty());

        // Removing again detaches nothing.
        assert!(graph.remove(root).is_empty());
    }

    #[test]
    fn drain_sweeps_everything() {
        let mut graph = SceneGraph::new();
        graph.insert(mesh());
        graph.insert(group_of(vec![mesh(), group_of(vec![mesh()])]));

        let detached = graph.drain();
        assert_eq!(detached.nodes.len(), 5);
        assert_eq!(detached.geometries.len(), 3);
        assert_eq!(detached.materials.len(), 3);
        assert!(graph.is_empty());
        assert!(graph.roots().is_empty());
    }

    #[test]
    fn draw_list_composes_transforms_and_skips_hidden() {
        let mut child = mesh();
        child.transform.position = Vec3::new(1.0, 0.0, 0.0);
        let mut hidden = mesh();
        hidden.visible = false;

        let mut parent = group_of(vec![child, hidden]);
        parent.transform.position = Vec3::new(0.0, 2.0, 0.0);

        let mut graph = SceneGraph::new();
        graph.insert(parent);

        let items = graph.draw_list();
        assert_eq!(items.len(), 1);
        let origin = items[0].world.transform_point3(Vec3::ZERO);
        assert!(origin.abs_diff_eq(Vec3::new(1.0, 2.0, 0.0), 1e-6));
    }

    #[test]
    fn apply_states_follows_preorder() {
        let mut graph = SceneGraph::new();
        let root = graph.insert(group_of(vec![mesh(), mesh()]));
        let order = graph.preorder(root);
        assert_eq!(order.len(), 3);

        let moved = Transform {
            position: Vec3::new(0.0, 5.0, 0.0),
            ..Transform::default()
        };
        let states = vec![
            NodeState {
                transform: Transform::default(),
                visible: true,
                colors: vec![],
            },
            NodeState {
                transform: moved,
                visible: false,
                colors: vec![[1.0, 0.0, 0.0]],
            },
        ];
        graph.apply_states(root, &states);

        let first_child = graph.get(order[1]).unwrap();
        assert_eq!(first_child.transform, moved);
        assert!(!first_child.visible);
        let NodeKind::Mesh { materials, .. } = &first_child.kind else {
            panic!("expected mesh");
        };
        assert_eq!(graph.material(materials[0]).unwrap().color, [1.0, 0.0, 0.0]);

        // Third node had no state and is untouched.
        assert!(graph.get(order[2]).unwrap().visible);
    }
}
