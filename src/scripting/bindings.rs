use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use glam::Vec3;
use log::info;
use mlua::{
    FromLua, Function, Lua, LuaSerdeExt, MetaMethod, MultiValue, RegistryKey,
    Result as LuaResult, SerializeOptions, Table, UserData, UserDataFields, UserDataMethods,
    Value, Variadic,
};
use serde_json::Value as JsonValue;

use crate::animation::{LoopMode, PlayOptions};
use crate::channels::{ListenerId, ListenerOptions};
use crate::error::ScriptError;
use crate::events::{EventKind, EventPayload};
use crate::player::RuntimeHandle;
use crate::render::Viewport;
use crate::scene::{Camera, Node, NodeId, SceneGraph};

use super::ScriptContext;

pub(super) fn register_globals(lua: &Rc<Lua>, context: &ScriptContext) -> LuaResult<()> {
    register_print(lua)?;
    register_datatypes(lua)?;
    register_events(lua)?;

    let globals = lua.globals();
    globals.set(
        "scene",
        NodeHandle::new(context.scene.clone(), context.scene.root_id()),
    )?;
    globals.set("camera", CameraHandle(context.camera.clone()))?;
    globals.set("renderer", RendererHandle(Arc::clone(&context.viewport)))?;
    globals.set(
        "runtime",
        LuaRuntime {
            handle: context.runtime.clone(),
            lua: Rc::downgrade(lua),
        },
    )?;
    Ok(())
}

fn register_print(lua: &Lua) -> LuaResult<()> {
    let print = lua.create_function(|lua, values: Variadic<Value>| {
        let tostring: Function = lua.globals().get("tostring")?;
        let mut out = Vec::with_capacity(values.len());
        for value in values.iter() {
            out.push(tostring.call::<_, String>(value.clone())?);
        }
        info!(target: "script", "{}", out.join("\t"));
        Ok(())
    })?;
    lua.globals().set("print", print)
}

fn register_datatypes(lua: &Lua) -> LuaResult<()> {
    let vector3 = lua.create_table()?;
    vector3.set(
        "new",
        lua.create_function(|_, (x, y, z): (Option<f32>, Option<f32>, Option<f32>)| {
            Ok(LuaVector3(Vec3::new(
                x.unwrap_or(0.0),
                y.unwrap_or(0.0),
                z.unwrap_or(0.0),
            )))
        })?,
    )?;
    lua.globals().set("Vector3", vector3)
}

/// `events.update == "update"` and so on for the fixed vocabulary.
fn register_events(lua: &Lua) -> LuaResult<()> {
    let events = lua.create_table()?;
    for kind in EventKind::ALL {
        events.set(kind.as_str(), kind.as_str())?;
    }
    lua.globals().set("events", events)
}

fn serialize_options() -> SerializeOptions {
    SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false)
}

pub(super) fn json_to_lua<'lua>(lua: &'lua Lua, value: &JsonValue) -> LuaResult<Value<'lua>> {
    lua.to_value_with(value, serialize_options())
}

fn json_args(lua: &Lua, values: &Variadic<Value>) -> LuaResult<Vec<JsonValue>> {
    values
        .iter()
        .map(|value| lua.from_value(value.clone()))
        .collect()
}

/// Arguments following the receiver: call arguments are spread, every other
/// payload is passed as a single event table.
pub(super) fn payload_values<'lua>(
    lua: &'lua Lua,
    payload: &EventPayload,
) -> LuaResult<Vec<Value<'lua>>> {
    match payload {
        EventPayload::Args(args) => args.iter().map(|arg| json_to_lua(lua, arg)).collect(),
        EventPayload::Empty => Ok(Vec::new()),
        other => Ok(vec![lua.to_value_with(other, serialize_options())?]),
    }
}

fn call_listener(lua: &Lua, key: &RegistryKey, args: &[JsonValue]) -> Result<(), ScriptError> {
    let function: Function = lua.registry_value(key)?;
    let values = args
        .iter()
        .map(|arg| json_to_lua(lua, arg))
        .collect::<LuaResult<Vec<_>>>()?;
    function.call::<_, ()>(MultiValue::from_vec(values))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct LuaVector3(pub Vec3);

impl UserData for LuaVector3 {
    fn add_fields<'lua, F: UserDataFields<'lua, Self>>(fields: &mut F) {
        fields.add_field_method_get("x", |_, this| Ok(this.0.x));
        fields.add_field_method_get("y", |_, this| Ok(this.0.y));
        fields.add_field_method_get("z", |_, this| Ok(this.0.z));
        fields.add_field_method_set("x", |_, this, value: f32| {
            this.0.x = value;
            Ok(())
        });
        fields.add_field_method_set("y", |_, this, value: f32| {
            this.0.y = value;
            Ok(())
        });
        fields.add_field_method_set("z", |_, this, value: f32| {
            this.0.z = value;
            Ok(())
        });
    }

    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("length", |_, this, ()| Ok(this.0.length()));
        methods.add_method("clone", |_, this, ()| Ok(*this));
        methods.add_meta_method(MetaMethod::Add, |_, this, other: LuaVector3| {
            Ok(LuaVector3(this.0 + other.0))
        });
        methods.add_meta_method(MetaMethod::Sub, |_, this, other: LuaVector3| {
            Ok(LuaVector3(this.0 - other.0))
        });
        methods.add_meta_method(MetaMethod::Mul, |_, this, scalar: f32| {
            Ok(LuaVector3(this.0 * scalar))
        });
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: LuaVector3| {
            Ok(this.0 == other.0)
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("Vector3({}, {}, {})", this.0.x, this.0.y, this.0.z))
        });
    }
}

impl<'lua> FromLua<'lua> for LuaVector3 {
    fn from_lua(value: Value<'lua>, _: &'lua Lua) -> LuaResult<Self> {
        match value {
            Value::Table(table) => Ok(Self(table_to_vec3(&table)?)),
            Value::UserData(ud) => ud.borrow::<LuaVector3>().map(|vec| *vec),
            _ => Err(mlua::Error::FromLuaConversionError {
                from: value.type_name(),
                to: "Vector3",
                message: Some("expected Vector3 userdata or table".into()),
            }),
        }
    }
}

fn table_to_vec3(table: &Table) -> LuaResult<Vec3> {
    Ok(Vec3::new(
        table_component(table, "x", 1)?,
        table_component(table, "y", 2)?,
        table_component(table, "z", 3)?,
    ))
}

fn table_component(table: &Table, key: &str, index: i32) -> LuaResult<f32> {
    if let Ok(value) = table.get::<_, f32>(key) {
        return Ok(value);
    }
    table.get::<_, f32>(index)
}

/// Script view of one scene node. Reads and writes go straight to the graph.
#[derive(Debug, Clone)]
pub(super) struct NodeHandle {
    scene: SceneGraph,
    id: NodeId,
}

impl NodeHandle {
    pub(super) fn new(scene: SceneGraph, id: NodeId) -> Self {
        Self { scene, id }
    }

    fn node(&self) -> Option<Node> {
        self.scene.get(self.id.as_str())
    }

    fn with_id(&self, id: NodeId) -> Self {
        Self::new(self.scene.clone(), id)
    }

    /// Breadth-first search over this node and its descendants.
    fn find(&self, predicate: impl Fn(&Node) -> bool) -> Option<NodeHandle> {
        let mut queue = VecDeque::from(self.node().into_iter().collect::<Vec<_>>());
        while let Some(node) = queue.pop_front() {
            if predicate(&node) {
                return Some(self.with_id(node.uuid));
            }
            queue.extend(self.scene.children(node.uuid.as_str()));
        }
        None
    }
}

impl UserData for NodeHandle {
    fn add_fields<'lua, F: UserDataFields<'lua, Self>>(fields: &mut F) {
        fields.add_field_method_get("uuid", |_, this| Ok(this.id.to_string()));
        fields.add_field_method_get("name", |_, this| Ok(this.node().map(|node| node.name)));
        fields.add_field_method_get("type", |_, this| Ok(this.node().map(|node| node.kind)));
        fields.add_field_method_get("position", |_, this| {
            Ok(this.node().map(|node| LuaVector3(node.position)))
        });
        fields.add_field_method_get("rotation", |_, this| {
            Ok(this.node().map(|node| LuaVector3(node.rotation())))
        });
        fields.add_field_method_get("scale", |_, this| {
            Ok(this.node().map(|node| LuaVector3(node.scale)))
        });
        fields.add_field_method_get("visible", |_, this| {
            Ok(this.node().map(|node| node.visible))
        });
        fields.add_field_method_get("userData", |lua, this| match this.node() {
            Some(node) => json_to_lua(lua, &node.user_data),
            None => Ok(Value::Nil),
        });
        fields.add_field_method_get("parent", |_, this| {
            Ok(this
                .node()
                .and_then(|node| node.parent)
                .map(|parent| this.with_id(parent)))
        });

        fields.add_field_method_set("position", |_, this, value: LuaVector3| {
            this.scene.set_position(this.id.as_str(), value.0);
            Ok(())
        });
        fields.add_field_method_set("rotation", |_, this, value: LuaVector3| {
            this.scene.set_rotation(this.id.as_str(), value.0);
            Ok(())
        });
        fields.add_field_method_set("scale", |_, this, value: LuaVector3| {
            this.scene.set_scale(this.id.as_str(), value.0);
            Ok(())
        });
        fields.add_field_method_set("visible", |_, this, value: bool| {
            this.scene.set_visible(this.id.as_str(), value);
            Ok(())
        });
    }

    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("getObjectByName", |_, this, name: String| {
            Ok(this.find(|node| node.name == name))
        });
        methods.add_method("getObjectById", |_, this, uuid: String| {
            Ok(this.find(|node| node.uuid.as_str() == uuid))
        });
        methods.add_method("getChildren", |_, this, ()| {
            Ok(this
                .scene
                .children(this.id.as_str())
                .into_iter()
                .map(|node| this.with_id(node.uuid))
                .collect::<Vec<_>>())
        });
        methods.add_method("translate", |_, this, offset: LuaVector3| {
            let moved = this.scene.update(this.id.as_str(), |node| {
                node.position += offset.0;
            });
            Ok(moved.is_some())
        });
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: mlua::AnyUserData| {
            Ok(other
                .borrow::<NodeHandle>()
                .map(|other| other.id == this.id)
                .unwrap_or(false))
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("Node({})", this.id))
        });
    }
}

struct CameraHandle(Camera);

impl UserData for CameraHandle {
    fn add_fields<'lua, F: UserDataFields<'lua, Self>>(fields: &mut F) {
        fields.add_field_method_get("uuid", |_, this| Ok(this.0.uuid().to_string()));
        fields.add_field_method_get("fov", |_, this| Ok(this.0.fov()));
        fields.add_field_method_get("aspect", |_, this| Ok(this.0.aspect()));
        fields.add_field_method_get("position", |_, this| Ok(LuaVector3(this.0.position())));
        fields.add_field_method_set("fov", |_, this, fov: f32| {
            this.0.set_fov(fov);
            Ok(())
        });
        fields.add_field_method_set("position", |_, this, value: LuaVector3| {
            this.0.set_position(value.0);
            Ok(())
        });
    }

    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("lookAt", |_, this, target: LuaVector3| {
            this.0.look_at(target.0);
            Ok(())
        });
    }
}

struct RendererHandle(Arc<Viewport>);

impl UserData for RendererHandle {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("getSize", |lua, this, ()| size_table(lua, this.0.size()));
        methods.add_method("getPixelRatio", |_, this, ()| Ok(this.0.pixel_ratio()));
    }
}

fn size_table(lua: &Lua, (width, height): (u32, u32)) -> LuaResult<Table<'_>> {
    let table = lua.create_table()?;
    table.set("width", width)?;
    table.set("height", height)?;
    Ok(table)
}

/// The `runtime` global. Holds the player weakly; calls after the player is
/// gone do nothing.
struct LuaRuntime {
    handle: RuntimeHandle,
    lua: Weak<Lua>,
}

impl UserData for LuaRuntime {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method(
            "invoke",
            |lua, this, (name, args): (String, Variadic<Value>)| {
                let args = json_args(lua, &args)?;
                Ok(this.handle.invoke(&name, &args))
            },
        );
        methods.add_method(
            "addEventListener",
            |lua, this, (name, callback, options): (String, Function, Option<Table>)| {
                let once = match options {
                    Some(options) => options.get::<_, Option<bool>>("once")?.unwrap_or(false),
                    None => false,
                };
                let owner = this
                    .lua
                    .upgrade()
                    .ok_or_else(|| mlua::Error::RuntimeError("script state released".into()))?;
                let key = lua.create_registry_value(callback)?;
                let id = this.handle.add_event_listener(
                    &name,
                    move |args| call_listener(&owner, &key, args),
                    ListenerOptions { once },
                );
                Ok(id.map(ListenerId::raw))
            },
        );
        methods.add_method(
            "removeEventListener",
            |_, this, (name, id): (String, u64)| {
                Ok(this
                    .handle
                    .remove_event_listener(&name, ListenerId::from_raw(id)))
            },
        );
        methods.add_method(
            "callMethod",
            |lua, this, (name, args): (String, Variadic<Value>)| {
                let args = json_args(lua, &args)?;
                Ok(this.handle.call_method(&name, &args))
            },
        );

        methods.add_method(
            "playAnimation",
            |_, this, (name, options): (String, Option<Table>)| {
                let options = play_options(options)?;
                Ok(this.handle.play_animation(&name, options))
            },
        );
        methods.add_method("stopAnimation", |_, this, name: String| {
            Ok(this.handle.stop_animation(&name))
        });
        methods.add_method("pauseAnimation", |_, this, name: String| {
            Ok(this.handle.pause_animation(&name))
        });
        methods.add_method("resumeAnimation", |_, this, name: String| {
            Ok(this.handle.resume_animation(&name))
        });
        methods.add_method("stopAllAnimations", |_, this, ()| {
            this.handle.stop_all_animations();
            Ok(())
        });
        methods.add_method(
            "setAnimationTime",
            |_, this, (name, time): (String, f32)| Ok(this.handle.set_animation_time(&name, time)),
        );
        methods.add_method("getAnimationTime", |_, this, name: String| {
            Ok(this.handle.animation_time(&name))
        });
        methods.add_method("isAnimationPlaying", |_, this, name: String| {
            Ok(this.handle.is_animation_playing(&name))
        });
        methods.add_method("getAnimations", |_, this, ()| Ok(this.handle.animations()));

        methods.add_method("isKeyDown", |_, this, name: String| {
            Ok(this.handle.is_key_down(&name))
        });
        methods.add_method("getPointer", |lua, this, ()| {
            let pointer = this.handle.pointer_position();
            let table = lua.create_table()?;
            table.set("x", pointer.x)?;
            table.set("y", pointer.y)?;
            Ok(table)
        });
        methods.add_method("getSize", |lua, this, ()| size_table(lua, this.handle.size()));
    }
}

fn play_options(options: Option<Table>) -> LuaResult<PlayOptions> {
    let Some(options) = options else {
        return Ok(PlayOptions::default());
    };
    let loop_mode = match options.get::<_, Value>("loop")? {
        Value::Nil => None,
        Value::Integer(code) => Some(loop_from_code(code)?),
        Value::Number(code) => Some(loop_from_code(code as i64)?),
        Value::String(name) => {
            let name = name.to_str()?;
            Some(LoopMode::from_name(name).ok_or_else(|| {
                mlua::Error::RuntimeError(format!("unknown loop mode {name}"))
            })?)
        }
        other => {
            return Err(mlua::Error::FromLuaConversionError {
                from: other.type_name(),
                to: "LoopMode",
                message: Some("expected a loop code or name".into()),
            })
        }
    };
    Ok(PlayOptions {
        stop_others: options.get("stopOthers")?,
        loop_mode,
        time_scale: options.get("timeScale")?,
        weight: options.get("weight")?,
        clamp_when_finished: options.get("clampWhenFinished")?,
    })
}

fn loop_from_code(code: i64) -> LuaResult<LoopMode> {
    u32::try_from(code)
        .ok()
        .and_then(LoopMode::from_code)
        .ok_or_else(|| mlua::Error::RuntimeError(format!("unknown loop mode {code}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::CameraState;

    fn context() -> ScriptContext {
        let root = NodeId::new("root");
        let scene = SceneGraph::from_nodes(vec![
            Node::new("root", "Scene"),
            Node::new("cube", "Mesh").with_name("Cube").with_parent(&root),
            Node::new("light", "PointLight")
                .with_name("Lamp")
                .with_parent(&NodeId::new("cube")),
        ])
        .unwrap();
        ScriptContext {
            scene,
            camera: Camera::new(CameraState::perspective("cam", 50.0, 0.1, 100.0)),
            runtime: RuntimeHandle::detached(),
            viewport: Arc::new(Viewport::new(640, 480, 2.0)),
        }
    }

    #[test]
    fn node_handles_read_and_write_the_graph() {
        let lua = Rc::new(Lua::new());
        let context = context();
        register_globals(&lua, &context).unwrap();

        let (name, parent, x): (String, String, f32) = lua
            .load(
                r#"
                local lamp = scene:getObjectByName("Lamp")
                assert(lamp ~= nil, "lamp should be found below the root")
                lamp.position = Vector3.new(1, 2, 3)
                lamp:translate(Vector3.new(1, 0, 0))
                lamp.visible = false
                return lamp.name, lamp.parent.uuid, lamp.position.x
            "#,
            )
            .eval()
            .unwrap();

        assert_eq!(name, "Lamp");
        assert_eq!(parent, "cube");
        assert_eq!(x, 2.0);
        let lamp = context.scene.get("light").unwrap();
        assert_eq!(lamp.position, Vec3::new(2.0, 2.0, 3.0));
        assert!(!lamp.visible);
    }

    #[test]
    fn renderer_camera_and_events_globals_are_available() {
        let lua = Rc::new(Lua::new());
        let context = context();
        register_globals(&lua, &context).unwrap();

        let (width, ratio, fov, update): (u32, f32, f32, String) = lua
            .load(
                r#"
                camera.fov = 75
                local size = renderer:getSize()
                return size.width, renderer:getPixelRatio(), camera.fov, events.update
            "#,
            )
            .eval()
            .unwrap();

        assert_eq!(width, 640);
        assert_eq!(ratio, 2.0);
        assert_eq!(fov, 75.0);
        assert_eq!(update, "update");
        assert_eq!(context.camera.fov(), 75.0);
    }

    #[test]
    fn detached_runtime_calls_are_harmless() {
        let lua = Rc::new(Lua::new());
        register_globals(&lua, &context()).unwrap();

        let (called, id, playing): (usize, Option<u64>, bool) = lua
            .load(
                r#"
                print("detached", 1, nil)
                local id = runtime:addEventListener("x", function() end, { once = true })
                return runtime:invoke("x", 1, "two"), id, runtime:playAnimation("Walk", { loop = "once" })
            "#,
            )
            .eval()
            .unwrap();

        assert_eq!(called, 0);
        assert_eq!(id, None);
        assert!(!playing);
    }

    #[test]
    fn play_options_accept_codes_and_names() {
        let lua = Lua::new();
        let table = lua
            .load(r#"{ loop = 2202, timeScale = 2, stopOthers = false }"#)
            .eval::<Table>()
            .unwrap();
        let options = play_options(Some(table)).unwrap();
        assert_eq!(options.loop_mode, Some(LoopMode::PingPong));
        assert_eq!(options.time_scale, Some(2.0));
        assert_eq!(options.stop_others, Some(false));
        assert_eq!(options.weight, None);

        let bad = lua.load(r#"{ loop = 9 }"#).eval::<Table>().unwrap();
        assert!(play_options(Some(bad)).is_err());
    }

    #[test]
    fn payloads_become_lua_arguments() {
        let lua = Lua::new();
        let frame = EventPayload::Frame(crate::events::FrameTime {
            time: 32.0,
            delta: 16.0,
        });
        let values = payload_values(&lua, &frame).unwrap();
        let Value::Table(table) = &values[0] else {
            panic!("frame payload should be a table");
        };
        assert_eq!(table.get::<_, f64>("delta").unwrap(), 16.0);

        let args = EventPayload::Args(vec![serde_json::json!("hi"), serde_json::json!(2)]);
        assert_eq!(payload_values(&lua, &args).unwrap().len(), 2);
        assert!(payload_values(&lua, &EventPayload::Empty).unwrap().is_empty());
    }
}
