use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::render::RenderSettings;
use crate::scene::NodeId;

/// Key under `scripts` that binds a script to the whole scene.
pub const ROOT_SCRIPT_KEY: &str = "__root__";

/// What a script entry is attached to, as written in the description.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScriptKey {
    Root,
    Node(NodeId),
}

impl ScriptKey {
    fn from_key(key: &str) -> Self {
        if key == ROOT_SCRIPT_KEY {
            Self::Root
        } else {
            Self::Node(NodeId::new(key))
        }
    }
}

impl fmt::Display for ScriptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str(ROOT_SCRIPT_KEY),
            Self::Node(id) => write!(f, "{id}"),
        }
    }
}

/// One behavior script and its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    pub name: Option<String>,
    pub source: String,
    pub target: ScriptKey,
}

impl ScriptEntry {
    pub fn new(target: ScriptKey, source: impl Into<String>) -> Self {
        Self {
            name: None,
            source: source.into(),
            target,
        }
    }

    /// Label used for chunk names and diagnostics.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{}:{name}", self.target),
            None => self.target.to_string(),
        }
    }
}

/// Everything `Player::load` consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneDescription {
    pub project: RenderSettings,
    pub scene: Value,
    pub camera: Value,
    /// Script entries in document order.
    pub scripts: Vec<ScriptEntry>,
    pub animations: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawDescription {
    #[serde(default)]
    project: RenderSettings,
    scene: Value,
    camera: Value,
    #[serde(default)]
    scripts: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawScript {
    #[serde(default)]
    name: Option<String>,
    source: String,
}

impl SceneDescription {
    pub fn new(scene: Value, camera: Value) -> Self {
        let animations = embedded_animations(&scene);
        Self {
            project: RenderSettings::default(),
            scene,
            camera,
            scripts: Vec::new(),
            animations,
        }
    }

    pub fn with_script(mut self, target: ScriptKey, source: impl Into<String>) -> Self {
        self.scripts.push(ScriptEntry::new(target, source));
        self
    }

    pub fn with_root_script(self, source: impl Into<String>) -> Self {
        self.with_script(ScriptKey::Root, source)
    }

    pub fn with_node_script(self, uuid: &str, source: impl Into<String>) -> Self {
        self.with_script(ScriptKey::Node(NodeId::new(uuid)), source)
    }

    pub fn with_animation(mut self, clip: Value) -> Self {
        self.animations.push(clip);
        self
    }

    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let raw = RawDescription::deserialize(value)?;
        let mut scripts = Vec::new();
        for (key, list) in raw.scripts {
            let target = ScriptKey::from_key(&key);
            for script in Vec::<RawScript>::deserialize(list)? {
                scripts.push(ScriptEntry {
                    name: script.name,
                    source: script.source,
                    target: target.clone(),
                });
            }
        }
        let animations = embedded_animations(&raw.scene);
        Ok(Self {
            project: raw.project,
            scene: raw.scene,
            camera: raw.camera,
            scripts,
            animations,
        })
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        Self::from_json(serde_json::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid scene description {}", path.display()))
    }
}

fn embedded_animations(scene: &Value) -> Vec<Value> {
    scene
        .get("animations")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
