//! Turning behavior scripts into handlers bound to their targets.
//!
//! A [`ScriptEngine`] is reset once per load with the live scene, camera and
//! runtime handle, then compiles each [`ScriptEntry`] into a
//! [`CompiledHandlerSet`] the event registry can file away.

use std::fmt;
use std::sync::Arc;

use crate::error::ScriptError;
use crate::events::Handler;
use crate::player::RuntimeHandle;
use crate::render::Viewport;
use crate::scene::{Camera, NodeId, SceneGraph};

mod bindings;
mod lua;
mod native;

pub use crate::description::{ScriptEntry, ScriptKey};
pub use lua::LuaEngine;
pub use native::{NativeEngine, NativeHandlers};

/// Receiver a handler runs against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScriptTarget {
    /// The scene root, for scripts filed under the root key.
    Root(NodeId),
    Node(NodeId),
}

impl ScriptTarget {
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root(_))
    }

    pub fn node_id(&self) -> &NodeId {
        match self {
            Self::Root(id) | Self::Node(id) => id,
        }
    }
}

impl fmt::Display for ScriptTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node_id())
    }
}

/// Handlers produced by compiling one script, in the order they were found.
#[derive(Debug, Clone)]
pub struct CompiledHandlerSet {
    pub target: ScriptTarget,
    pub handlers: Vec<(String, Handler)>,
}

impl CompiledHandlerSet {
    pub fn new(target: ScriptTarget) -> Self {
        Self {
            target,
            handlers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(|(name, _)| name.as_str())
    }
}

/// Live objects a freshly loaded scene exposes to its scripts.
#[derive(Clone)]
pub struct ScriptContext {
    pub scene: SceneGraph,
    pub camera: Camera,
    pub runtime: RuntimeHandle,
    pub viewport: Arc<Viewport>,
}

pub trait ScriptEngine {
    /// Drops every state left by the previous load and prepares for `ctx`.
    fn reset(&mut self, ctx: &ScriptContext) -> Result<(), ScriptError>;

    fn compile(
        &mut self,
        entry: &ScriptEntry,
        target: &ScriptTarget,
    ) -> Result<CompiledHandlerSet, ScriptError>;
}
