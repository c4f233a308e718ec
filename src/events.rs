//! Fixed event vocabulary, bound handlers and the per-load handler registry.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use log::{debug, error, warn};
use serde::Serialize;
use serde_json::Value;

use crate::error::ScriptError;
use crate::input::{InputEvent, KeyboardEvent, PointerEvent};
use crate::scripting::{CompiledHandlerSet, ScriptTarget};

/// Events dispatched automatically by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Init,
    Start,
    Stop,
    KeyDown,
    KeyUp,
    PointerDown,
    PointerUp,
    PointerMove,
    Update,
}

const KIND_COUNT: usize = 9;

impl EventKind {
    pub const ALL: [EventKind; KIND_COUNT] = [
        EventKind::Init,
        EventKind::Start,
        EventKind::Stop,
        EventKind::KeyDown,
        EventKind::KeyUp,
        EventKind::PointerDown,
        EventKind::PointerUp,
        EventKind::PointerMove,
        EventKind::Update,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::KeyDown => "keydown",
            Self::KeyUp => "keyup",
            Self::PointerDown => "pointerdown",
            Self::PointerUp => "pointerup",
            Self::PointerMove => "pointermove",
            Self::Update => "update",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame timing handed to `update` handlers, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameTime {
    pub time: f64,
    pub delta: f64,
}

/// Argument passed to a handler alongside its target.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Empty,
    Frame(FrameTime),
    Keyboard(KeyboardEvent),
    Pointer(PointerEvent),
    Args(Vec<Value>),
}

impl From<&InputEvent> for EventPayload {
    fn from(event: &InputEvent) -> Self {
        match event {
            InputEvent::KeyDown(key) | InputEvent::KeyUp(key) => Self::Keyboard(key.clone()),
            InputEvent::PointerDown(pointer)
            | InputEvent::PointerUp(pointer)
            | InputEvent::PointerMove(pointer) => Self::Pointer(*pointer),
        }
    }
}

pub type HandlerFn = dyn Fn(&ScriptTarget, &EventPayload) -> Result<(), ScriptError>;

/// A compiled function together with the target it runs against.
#[derive(Clone)]
pub struct Handler {
    target: ScriptTarget,
    callback: Rc<HandlerFn>,
}

impl Handler {
    pub fn new<F>(target: ScriptTarget, callback: F) -> Self
    where
        F: Fn(&ScriptTarget, &EventPayload) -> Result<(), ScriptError> + 'static,
    {
        Self {
            target,
            callback: Rc::new(callback),
        }
    }

    pub fn target(&self) -> &ScriptTarget {
        &self.target
    }

    pub fn call(&self, payload: &EventPayload) -> Result<(), ScriptError> {
        (self.callback)(&self.target, payload)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Result of running one handler list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub invoked: usize,
    pub failed: usize,
}

/// Runs every handler in order. A failing handler is logged and the rest
/// still run.
pub fn dispatch(handlers: &[Handler], label: &str, payload: &EventPayload) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();
    for handler in handlers {
        outcome.invoked += 1;
        if let Err(err) = handler.call(payload) {
            outcome.failed += 1;
            error!("{label} handler on {} failed: {err}", handler.target());
        }
    }
    outcome
}

/// Handlers installed by the current scene: one ordered list per fixed event
/// kind plus the root-methods table.
#[derive(Debug, Default)]
pub struct EventRegistry {
    lists: [Vec<Handler>; KIND_COUNT],
    root_methods: HashMap<String, Vec<Handler>>,
    method_order: Vec<String>,
}

/// Counts returned by [`EventRegistry::install`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub accepted: usize,
    pub rejected: usize,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        for list in &mut self.lists {
            list.clear();
        }
        self.root_methods.clear();
        self.method_order.clear();
    }

    pub fn register(&mut self, kind: EventKind, handler: Handler) {
        self.lists[kind.index()].push(handler);
    }

    pub fn register_root_method(&mut self, name: &str, handler: Handler) {
        if !self.root_methods.contains_key(name) {
            self.method_order.push(name.to_string());
        }
        self.root_methods
            .entry(name.to_string())
            .or_default()
            .push(handler);
    }

    /// Files a compiled set: root scripts feed the root-methods table, node
    /// scripts feed the fixed lists and lose names outside the vocabulary.
    pub fn install(&mut self, set: CompiledHandlerSet) -> InstallReport {
        let mut report = InstallReport::default();
        let is_root = set.target.is_root();
        for (name, handler) in set.handlers {
            if is_root {
                self.register_root_method(&name, handler);
                report.accepted += 1;
                continue;
            }
            match EventKind::from_name(&name) {
                Some(kind) => {
                    debug!("bound {kind} handler to {}", handler.target());
                    self.register(kind, handler);
                    report.accepted += 1;
                }
                None => {
                    warn!(
                        "event type not supported ({name}) in script for {}",
                        set.target
                    );
                    report.rejected += 1;
                }
            }
        }
        report
    }

    /// Snapshot of the handlers for `kind`, safe to run while the registry changes.
    pub fn handlers(&self, kind: EventKind) -> Vec<Handler> {
        self.lists[kind.index()].clone()
    }

    pub fn len(&self, kind: EventKind) -> usize {
        self.lists[kind.index()].len()
    }

    pub fn total(&self) -> usize {
        self.lists.iter().map(Vec::len).sum::<usize>()
            + self.root_methods.values().map(Vec::len).sum::<usize>()
    }

    pub fn root_method(&self, name: &str) -> Vec<Handler> {
        self.root_methods.get(name).cloned().unwrap_or_default()
    }

    /// Root method names in first-registration order.
    pub fn root_method_names(&self) -> &[String] {
        &self.method_order
    }
}
