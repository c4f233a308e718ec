//! Playback runtime for authored interactive 3D scenes.
//!
//! A [`Player`] loads a serialized scene description, compiles the behavior
//! scripts attached to its nodes into event handlers, and drives them against
//! a frame clock, input events and keyframe animation playback. Drawing,
//! windowing and input capture stay behind the [`RenderBackend`] and
//! [`PlayerHost`] traits so the runtime can run headless.

pub mod animation;
pub mod channels;
pub mod clock;
pub mod config;
pub mod description;
pub mod error;
pub mod events;
pub mod input;
pub mod player;
pub mod render;
pub mod scene;
pub mod scripting;

pub use animation::{AnimationController, LoopMode, PlayOptions};
pub use channels::{ListenerId, ListenerOptions};
pub use clock::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use config::PlayerConfig;
pub use description::{SceneDescription, ScriptEntry, ScriptKey};
pub use error::{PlayerError, ScriptError};
pub use events::{EventKind, EventPayload, FrameTime};
pub use input::{InputEvent, InputState, KeyboardEvent, PointerEvent};
pub use player::{LoadReport, NullHost, Player, PlayerHost, PlayerState, RuntimeHandle};
pub use render::{HeadlessRenderer, RenderBackend, RenderSettings, RenderStats};
pub use scene::{Camera, JsonSceneLoader, Node, NodeId, SceneGraph, SceneLoader};
pub use scripting::{LuaEngine, NativeEngine, NativeHandlers, ScriptEngine, ScriptTarget};
