use std::rc::Rc;

use log::debug;
use mlua::{AnyUserData, Function, Lua, MultiValue, Table, Value};

use crate::error::ScriptError;
use crate::events::{EventKind, Handler};

use super::bindings::{self, NodeHandle};
use super::{CompiledHandlerSet, ScriptContext, ScriptEngine, ScriptEntry, ScriptTarget};

/// Compiles behavior scripts written in Lua 5.4.
///
/// Every script runs in its own environment whose lookups fall back to the
/// shared globals, with `self` bound to its target. A script either returns a
/// table of handler functions or defines them at top level.
pub struct LuaEngine {
    lua: Rc<Lua>,
    context: Option<ScriptContext>,
}

impl LuaEngine {
    pub fn new() -> Self {
        Self {
            lua: Rc::new(Lua::new()),
            context: None,
        }
    }
}

impl Default for LuaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for LuaEngine {
    fn reset(&mut self, ctx: &ScriptContext) -> Result<(), ScriptError> {
        // handlers from the previous load keep their own state alive
        let lua = Rc::new(Lua::new());
        bindings::register_globals(&lua, ctx)?;
        self.lua = lua;
        self.context = Some(ctx.clone());
        Ok(())
    }

    fn compile(
        &mut self,
        entry: &ScriptEntry,
        target: &ScriptTarget,
    ) -> Result<CompiledHandlerSet, ScriptError> {
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| ScriptError::callback("Lua engine used before reset"))?;
        let lua = &*self.lua;

        let receiver = lua.create_userdata(NodeHandle::new(
            context.scene.clone(),
            target.node_id().clone(),
        ))?;
        let env = script_environment(lua, receiver.clone())?;
        let returned: Value = lua
            .load(entry.source.as_str())
            .set_name(entry.label())
            .set_environment(env.clone())
            .eval()?;

        let functions = match returned {
            Value::Table(table) => table_functions(table)?,
            Value::Nil => environment_functions(&env, target.is_root())?,
            other => return Err(ScriptError::InvalidHandlers(other.type_name().to_string())),
        };

        let receiver_key = Rc::new(lua.create_registry_value(receiver)?);
        let mut set = CompiledHandlerSet::new(target.clone());
        for (name, function) in functions {
            let function_key = lua.create_registry_value(function)?;
            let state = Rc::clone(&self.lua);
            let receiver_key = Rc::clone(&receiver_key);
            let handler = Handler::new(target.clone(), move |_, payload| {
                let function: Function = state.registry_value(&function_key)?;
                let receiver: AnyUserData = state.registry_value(&receiver_key)?;
                let mut args = vec![Value::UserData(receiver)];
                args.extend(bindings::payload_values(&state, payload)?);
                function.call::<_, ()>(MultiValue::from_vec(args))?;
                Ok(())
            });
            set.handlers.push((name, handler));
        }

        debug!(
            "compiled {} for {target}: [{}]",
            entry.label(),
            set.names().collect::<Vec<_>>().join(", ")
        );
        Ok(set)
    }
}

fn script_environment<'lua>(lua: &'lua Lua, receiver: AnyUserData<'lua>) -> mlua::Result<Table<'lua>> {
    let env = lua.create_table()?;
    let metatable = lua.create_table()?;
    metatable.set("__index", lua.globals())?;
    env.set_metatable(Some(metatable));
    env.set("self", receiver)?;
    Ok(env)
}

fn table_functions(table: Table) -> mlua::Result<Vec<(String, Function)>> {
    let mut found = Vec::new();
    for pair in table.pairs::<Value, Value>() {
        if let (Value::String(name), Value::Function(function)) = pair? {
            found.push((name.to_str()?.to_string(), function));
        }
    }
    found.sort_by(|(a, _), (b, _)| vocabulary_rank(a).cmp(&vocabulary_rank(b)).then_with(|| a.cmp(b)));
    Ok(found)
}

/// Functions a chunk defined at top level. Node scripts only expose the
/// fixed vocabulary; root scripts expose everything.
fn environment_functions<'lua>(
    env: &Table<'lua>,
    is_root: bool,
) -> mlua::Result<Vec<(String, Function<'lua>)>> {
    if is_root {
        return table_functions(env.clone());
    }
    let mut found = Vec::new();
    for kind in EventKind::ALL {
        if let Value::Function(function) = env.raw_get::<_, Value>(kind.as_str())? {
            found.push((kind.as_str().to_string(), function));
        }
    }
    Ok(found)
}

fn vocabulary_rank(name: &str) -> usize {
    EventKind::ALL
        .iter()
        .position(|kind| kind.as_str() == name)
        .unwrap_or(EventKind::ALL.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventPayload, FrameTime};
    use crate::player::RuntimeHandle;
    use crate::render::Viewport;
    use crate::scene::{Camera, CameraState, Node, NodeId, SceneGraph};
    use crate::scripting::ScriptKey;
    use glam::Vec3;
    use serde_json::json;
    use std::sync::Arc;

    fn context() -> ScriptContext {
        let scene = SceneGraph::from_nodes(vec![
            Node::new("root", "Scene").with_name("World"),
            Node::new("cube", "Mesh")
                .with_name("Cube")
                .with_parent(&NodeId::new("root")),
        ])
        .unwrap();
        ScriptContext {
            scene,
            camera: Camera::new(CameraState::perspective("cam", 50.0, 0.1, 100.0)),
            runtime: RuntimeHandle::detached(),
            viewport: Arc::new(Viewport::new(500, 500, 1.0)),
        }
    }

    fn engine(ctx: &ScriptContext) -> LuaEngine {
        let mut engine = LuaEngine::new();
        engine.reset(ctx).unwrap();
        engine
    }

    fn node_entry(source: &str) -> ScriptEntry {
        ScriptEntry::new(ScriptKey::Node(NodeId::new("cube")), source)
    }

    fn cube() -> ScriptTarget {
        ScriptTarget::Node(NodeId::new("cube"))
    }

    #[test]
    fn returned_table_handlers_receive_their_node() {
        let ctx = context();
        let mut engine = engine(&ctx);
        let set = engine
            .compile(
                &node_entry(
                    r#"
                    return {
                        update = function(self, event)
                            self.position = Vector3.new(event.delta, event.time, 0)
                        end,
                    }
                "#,
                ),
                &cube(),
            )
            .unwrap();

        assert_eq!(set.names().collect::<Vec<_>>(), ["update"]);
        let payload = EventPayload::Frame(FrameTime {
            time: 32.0,
            delta: 16.0,
        });
        set.handlers[0].1.call(&payload).unwrap();
        assert_eq!(
            ctx.scene.get("cube").unwrap().position,
            Vec3::new(16.0, 32.0, 0.0)
        );
    }

    #[test]
    fn node_scripts_expose_only_vocabulary_functions_in_order() {
        let ctx = context();
        let mut engine = engine(&ctx);
        let set = engine
            .compile(
                &node_entry(
                    r#"
                    function update(self, event) end
                    function helper() end
                    function keydown(self, event) end
                "#,
                ),
                &cube(),
            )
            .unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), ["keydown", "update"]);
    }

    #[test]
    fn returned_tables_keep_unknown_names_for_the_registry_to_reject() {
        let ctx = context();
        let mut engine = engine(&ctx);
        let set = engine
            .compile(
                &node_entry("return { jump = function() end, init = function() end }"),
                &cube(),
            )
            .unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), ["init", "jump"]);
    }

    #[test]
    fn root_scripts_expose_every_function_with_the_root_as_self() {
        let ctx = context();
        let mut engine = engine(&ctx);
        let root = ScriptTarget::Root(NodeId::new("root"));
        let entry = ScriptEntry::new(
            ScriptKey::Root,
            r#"
                function greet(self, who)
                    assert(self.name == "World")
                    assert(self == scene)
                    self.position = Vector3.new(#who, 0, 0)
                end
                function reset(self) self.position = Vector3.new() end
            "#,
        );
        let set = engine.compile(&entry, &root).unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), ["greet", "reset"]);

        set.handlers[0]
            .1
            .call(&EventPayload::Args(vec![json!("hi")]))
            .unwrap();
        assert_eq!(ctx.scene.root().position, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn scripts_do_not_leak_globals_into_each_other() {
        let ctx = context();
        let mut engine = engine(&ctx);
        engine
            .compile(&node_entry("counter = 41"), &cube())
            .unwrap();
        let set = engine
            .compile(
                &node_entry("function init(self) assert(counter == nil) end"),
                &cube(),
            )
            .unwrap();
        set.handlers[0].1.call(&EventPayload::Empty).unwrap();
    }

    #[test]
    fn syntax_errors_and_bad_returns_are_reported() {
        let ctx = context();
        let mut engine = engine(&ctx);
        assert!(matches!(
            engine.compile(&node_entry("function update("), &cube()),
            Err(ScriptError::Lua(_))
        ));
        assert!(matches!(
            engine.compile(&node_entry("return 42"), &cube()),
            Err(ScriptError::InvalidHandlers(_))
        ));
    }

    #[test]
    fn runtime_errors_surface_from_the_handler() {
        let ctx = context();
        let mut engine = engine(&ctx);
        let set = engine
            .compile(
                &node_entry("function start(self) error('broken') end"),
                &cube(),
            )
            .unwrap();
        let err = set.handlers[0].1.call(&EventPayload::Empty).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn compile_before_reset_fails() {
        let mut engine = LuaEngine::new();
        assert!(engine.compile(&node_entry("return {}"), &cube()).is_err());
    }
}
