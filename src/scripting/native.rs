use std::collections::HashMap;
use std::rc::Rc;

use crate::error::ScriptError;
use crate::events::{EventPayload, Handler};

use super::{CompiledHandlerSet, ScriptContext, ScriptEngine, ScriptEntry, ScriptTarget};

type BehaviorFactory = dyn Fn(&ScriptContext, &mut NativeHandlers) -> Result<(), ScriptError>;

/// Collects the handlers a native behavior registers for one target.
pub struct NativeHandlers {
    target: ScriptTarget,
    handlers: Vec<(String, Handler)>,
}

impl NativeHandlers {
    pub fn target(&self) -> &ScriptTarget {
        &self.target
    }

    pub fn on<F>(&mut self, event: &str, callback: F) -> &mut Self
    where
        F: Fn(&ScriptTarget, &EventPayload) -> Result<(), ScriptError> + 'static,
    {
        self.handlers
            .push((event.to_string(), Handler::new(self.target.clone(), callback)));
        self
    }
}

/// Engine whose "scripts" are Rust behaviors registered by the host. An
/// entry's source names the behavior to instantiate.
#[derive(Default)]
pub struct NativeEngine {
    behaviors: HashMap<String, Rc<BehaviorFactory>>,
    context: Option<ScriptContext>,
}

impl NativeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&ScriptContext, &mut NativeHandlers) -> Result<(), ScriptError> + 'static,
    {
        self.behaviors.insert(name.to_string(), Rc::new(factory));
        self
    }

    pub fn with_behavior<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&ScriptContext, &mut NativeHandlers) -> Result<(), ScriptError> + 'static,
    {
        self.register(name, factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.behaviors.contains_key(name)
    }
}

impl ScriptEngine for NativeEngine {
    fn reset(&mut self, ctx: &ScriptContext) -> Result<(), ScriptError> {
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
            .ok_or_else(|| ScriptError::callback("native engine used before reset"))?;
        let name = entry.source.trim();
        let factory = self
            .behaviors
            .get(name)
            .ok_or_else(|| ScriptError::callback(format!("no native behavior named {name}")))?;

        let mut handlers = NativeHandlers {
            target: target.clone(),
            handlers: Vec::new(),
        };
        factory(context, &mut handlers)?;
        Ok(CompiledHandlerSet {
            target: handlers.target,
            handlers: handlers.handlers,
        })
    }
}
