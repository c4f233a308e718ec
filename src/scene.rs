use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use glam::{EulerRot, Mat4, Quat, Vec3};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique node identifier as written by the authoring tools (a uuid string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One object of the scene graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub uuid: NodeId,
    pub name: String,
    pub kind: String,
    pub parent: Option<NodeId>,
    pub position: Vec3,
    pub quaternion: Quat,
    pub scale: Vec3,
    pub visible: bool,
    #[serde(default)]
    pub user_data: Value,
}

impl Node {
    pub fn new(uuid: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            uuid: NodeId::new(uuid),
            name: String::new(),
            kind: kind.into(),
            parent: None,
            position: Vec3::ZERO,
            quaternion: Quat::IDENTITY,
            scale: Vec3::ONE,
            visible: true,
            user_data: Value::Null,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_parent(mut self, parent: &NodeId) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    /// Euler angles (XYZ order, radians) derived from the stored quaternion.
    pub fn rotation(&self) -> Vec3 {
        let (x, y, z) = self.quaternion.to_euler(EulerRot::XYZ);
        Vec3::new(x, y, z)
    }
}

#[derive(Debug)]
struct GraphInner {
    root: NodeId,
    nodes: Vec<Node>,
}

/// Shared handle over the live scene graph. Clones observe the same nodes.
#[derive(Debug, Clone)]
pub struct SceneGraph {
    inner: Arc<RwLock<GraphInner>>,
}

impl SceneGraph {
    /// Creates a graph holding only its root node.
    pub fn new(root: Node) -> Self {
        Self {
            inner: Arc::new(RwLock::new(GraphInner {
                root: root.uuid.clone(),
                nodes: vec![root],
            })),
        }
    }

    /// Creates a graph from nodes in depth-first order; the first node is the root.
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self> {
        let root = nodes
            .first()
            .map(|node| node.uuid.clone())
            .ok_or_else(|| anyhow!("scene graph needs at least a root node"))?;
        Ok(Self {
            inner: Arc::new(RwLock::new(GraphInner { root, nodes })),
        })
    }

    pub fn root_id(&self) -> NodeId {
        self.inner.read().root.clone()
    }

    pub fn root(&self) -> Node {
        let inner = self.inner.read();
        inner
            .nodes
            .iter()
            .find(|node| node.uuid == inner.root)
            .cloned()
            .unwrap_or_else(|| Node::new(inner.root.as_str(), "Scene"))
    }

    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.inner
            .read()
            .nodes
            .iter()
            .any(|node| node.uuid.as_str() == uuid)
    }

    pub fn get(&self, uuid: &str) -> Option<Node> {
        self.inner
            .read()
            .nodes
            .iter()
            .find(|node| node.uuid.as_str() == uuid)
            .cloned()
    }

    /// Resolves a uuid first and a node name second.
    pub fn resolve(&self, reference: &str) -> Option<NodeId> {
        let inner = self.inner.read();
        inner
            .nodes
            .iter()
            .find(|node| node.uuid.as_str() == reference)
            .or_else(|| inner.nodes.iter().find(|node| node.name == reference))
            .map(|node| node.uuid.clone())
    }

    pub fn children(&self, uuid: &str) -> Vec<Node> {
        self.inner
            .read()
            .nodes
            .iter()
            .filter(|node| node.parent.as_ref().is_some_and(|p| p.as_str() == uuid))
            .cloned()
            .collect()
    }

    /// Snapshot of every node in depth-first order.
    pub fn all_nodes(&self) -> Vec<Node> {
        self.inner.read().nodes.clone()
    }

    /// Applies a mutation to the requested node.
    pub fn update<F, R>(&self, uuid: &str, updater: F) -> Option<R>
    where
        F: FnOnce(&mut Node) -> R,
    {
        let mut guard = self.inner.write();
        let node = guard
            .nodes
            .iter_mut()
            .find(|node| node.uuid.as_str() == uuid)?;
        Some(updater(node))
    }

    pub fn set_position(&self, uuid: &str, position: Vec3) -> bool {
        self.update(uuid, |node| node.position = position).is_some()
    }

    pub fn set_quaternion(&self, uuid: &str, quaternion: Quat) -> bool {
        self.update(uuid, |node| node.quaternion = quaternion).is_some()
    }

    pub fn set_rotation(&self, uuid: &str, euler: Vec3) -> bool {
        let quaternion = Quat::from_euler(EulerRot::XYZ, euler.x, euler.y, euler.z);
        self.set_quaternion(uuid, quaternion)
    }

    pub fn set_scale(&self, uuid: &str, scale: Vec3) -> bool {
        self.update(uuid, |node| node.scale = scale).is_some()
    }

    pub fn set_visible(&self, uuid: &str, visible: bool) -> bool {
        self.update(uuid, |node| node.visible = visible).is_some()
    }
}

/// Camera state behind a shared handle.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraState {
    pub uuid: NodeId,
    pub name: String,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
    pub quaternion: Quat,
    pub projection: Mat4,
}

impl CameraState {
    pub fn perspective(uuid: impl Into<String>, fov: f32, near: f32, far: f32) -> Self {
        let mut state = Self {
            uuid: NodeId::new(uuid),
            name: String::new(),
            fov,
            aspect: 1.0,
            near,
            far,
            position: Vec3::ZERO,
            quaternion: Quat::IDENTITY,
            projection: Mat4::IDENTITY,
        };
        state.update_projection_matrix();
        state
    }

    pub fn update_projection_matrix(&mut self) {
        self.projection = Mat4::perspective_rh_gl(
            self.fov.to_radians(),
            self.aspect.max(0.01),
            self.near,
            self.far,
        );
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.quaternion, self.position).inverse()
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view_matrix()
    }
}

/// Shared handle over the active camera.
#[derive(Debug, Clone)]
pub struct Camera {
    state: Arc<RwLock<CameraState>>,
}

impl Camera {
    pub fn new(state: CameraState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn snapshot(&self) -> CameraState {
        self.state.read().clone()
    }

    pub fn uuid(&self) -> NodeId {
        self.state.read().uuid.clone()
    }

    pub fn fov(&self) -> f32 {
        self.state.read().fov
    }

    pub fn aspect(&self) -> f32 {
        self.state.read().aspect
    }

    pub fn position(&self) -> Vec3 {
        self.state.read().position
    }

    pub fn quaternion(&self) -> Quat {
        self.state.read().quaternion
    }

    pub fn set_fov(&self, fov: f32) {
        let mut state = self.state.write();
        state.fov = fov;
        state.update_projection_matrix();
    }

    pub fn set_aspect(&self, aspect: f32) {
        let mut state = self.state.write();
        state.aspect = aspect;
        state.update_projection_matrix();
    }

    pub fn set_position(&self, position: Vec3) {
        self.state.write().position = position;
    }

    pub fn set_quaternion(&self, quaternion: Quat) {
        self.state.write().quaternion = quaternion;
    }

    pub fn look_at(&self, target: Vec3) {
        let mut state = self.state.write();
        let view = Mat4::look_at_rh(state.position, target, Vec3::Y);
        let (_, rotation, _) = view.inverse().to_scale_rotation_translation();
        state.quaternion = rotation;
    }

    pub fn view_projection(&self) -> Mat4 {
        self.state.read().view_projection()
    }
}

/// Turns serialized scene and camera payloads into live objects.
pub trait SceneLoader {
    fn parse_scene(&self, payload: &Value) -> Result<SceneGraph>;
    fn parse_camera(&self, payload: &Value) -> Result<Camera>;
}

/// Loader for the JSON object format written by the authoring tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSceneLoader;

impl SceneLoader for JsonSceneLoader {
    fn parse_scene(&self, payload: &Value) -> Result<SceneGraph> {
        let raw = RawObject::deserialize(object_payload(payload))
            .context("invalid scene object")?;
        let mut nodes = Vec::new();
        flatten(raw, None, &mut nodes)?;
        SceneGraph::from_nodes(nodes)
    }

    fn parse_camera(&self, payload: &Value) -> Result<Camera> {
        let raw = RawObject::deserialize(object_payload(payload))
            .context("invalid camera object")?;
        if !raw.kind.is_empty() && raw.kind != "PerspectiveCamera" {
            log::debug!(
                "camera type {} is treated as a perspective camera",
                raw.kind
            );
        }
        let node = raw.to_node(None)?;
        let mut state = CameraState::perspective(
            node.uuid.as_str(),
            raw.fov.unwrap_or(50.0),
            raw.near.unwrap_or(0.1),
            raw.far.unwrap_or(2000.0),
        );
        state.name = node.name;
        state.aspect = raw.aspect.unwrap_or(1.0);
        state.position = node.position;
        state.quaternion = node.quaternion;
        state.update_projection_matrix();
        Ok(Camera::new(state))
    }
}

fn object_payload(payload: &Value) -> &Value {
    payload.get("object").unwrap_or(payload)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawObject {
    uuid: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    name: String,
    position: Option<[f32; 3]>,
    rotation: Option<Vec<Value>>,
    quaternion: Option<[f32; 4]>,
    scale: Option<[f32; 3]>,
    matrix: Option<Vec<f32>>,
    visible: Option<bool>,
    #[serde(default)]
    user_data: Value,
    fov: Option<f32>,
    aspect: Option<f32>,
    near: Option<f32>,
    far: Option<f32>,
    #[serde(default)]
    children: Vec<RawObject>,
}

impl RawObject {
    fn to_node(&self, parent: Option<&NodeId>) -> Result<Node> {
        let mut node = Node::new(self.uuid.as_str(), self.kind.as_str()).with_name(&self.name);
        node.parent = parent.cloned();
        node.visible = self.visible.unwrap_or(true);
        node.user_data = self.user_data.clone();

        if let Some(matrix) = &self.matrix {
            let columns: [f32; 16] = matrix
                .as_slice()
                .try_into()
                .map_err(|_| anyhow!("node {} matrix needs 16 elements", self.uuid))?;
            let (scale, rotation, translation) =
                Mat4::from_cols_array(&columns).to_scale_rotation_translation();
            node.scale = scale;
            node.quaternion = rotation;
            node.position = translation;
        }
        if let Some(position) = self.position {
            node.position = Vec3::from_array(position);
        }
        if let Some(rotation) = &self.rotation {
            node.quaternion = euler_from_values(rotation)
                .with_context(|| format!("node {} has an invalid rotation", self.uuid))?;
        }
        if let Some(quaternion) = self.quaternion {
            node.quaternion = Quat::from_array(quaternion).normalize();
        }
        if let Some(scale) = self.scale {
            node.scale = Vec3::from_array(scale);
        }
        Ok(node)
    }
}

fn euler_from_values(values: &[Value]) -> Result<Quat> {
    let angles: Vec<f32> = values
        .iter()
        .filter_map(Value::as_f64)
        .map(|value| value as f32)
        .collect();
    let &[x, y, z] = angles.as_slice() else {
        bail!("expected three euler angles, found {}", angles.len());
    };
    Ok(Quat::from_euler(EulerRot::XYZ, x, y, z))
}

fn flatten(raw: RawObject, parent: Option<&NodeId>, out: &mut Vec<Node>) -> Result<()> {
    let node = raw.to_node(parent)?;
    let id = node.uuid.clone();
    out.push(node);
    for child in raw.children {
        flatten(child, Some(&id), out)?;
    }
    Ok(())
}
