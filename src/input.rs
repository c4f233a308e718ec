use std::collections::HashSet;

use glam::Vec2;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::events::EventKind;

/// Raw input delivered by the host while the player is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputEvent {
    KeyDown(KeyboardEvent),
    KeyUp(KeyboardEvent),
    PointerDown(PointerEvent),
    PointerUp(PointerEvent),
    PointerMove(PointerEvent),
}

impl InputEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::KeyDown(_) => EventKind::KeyDown,
            Self::KeyUp(_) => EventKind::KeyUp,
            Self::PointerDown(_) => EventKind::PointerDown,
            Self::PointerUp(_) => EventKind::PointerUp,
            Self::PointerMove(_) => EventKind::PointerMove,
        }
    }
}

/// Keyboard payload. `key` follows the browser naming ("a", "Enter", "ArrowLeft").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardEvent {
    pub key: String,
    #[serde(default)]
    pub repeat: bool,
}

impl KeyboardEvent {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            repeat: false,
        }
    }
}

/// Pointer payload in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub button: u8,
}

impl PointerEvent {
    pub fn new(x: f32, y: f32, button: u8) -> Self {
        Self { x, y, button }
    }
}

/// Identifier for a physical keyboard key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    Named(NamedKey),
    Character(char),
    Digit(u8),
    Function(u8),
}

impl KeyCode {
    /// Accepts both script-style names ("Space", "Left") and browser key values
    /// (" ", "ArrowLeft", "a").
    pub fn from_name(name: &str) -> Option<Self> {
        if let Some(key) = NamedKey::from_name(name) {
            return Some(Self::Named(key));
        }
        let mut chars = name.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            if ch.is_ascii_alphabetic() {
                return Some(Self::Character(ch.to_ascii_uppercase()));
            }
            if let Some(digit) = ch.to_digit(10) {
                return Some(Self::Digit(digit as u8));
            }
        }
        let index = name
            .strip_prefix('F')
            .or_else(|| name.strip_prefix('f'))?
            .parse::<u8>()
            .ok()?;
        (1..=24).contains(&index).then_some(Self::Function(index))
    }
}

/// Friendly names for the keys scripts usually poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamedKey {
    Space,
    Enter,
    Tab,
    Left,
    Right,
    Up,
    Down,
    Escape,
    Backspace,
    Shift,
    Control,
    Alt,
}

impl NamedKey {
    fn from_name(name: &str) -> Option<Self> {
        use NamedKey::*;
        Some(match name {
            "Space" | " " | "Spacebar" => Space,
            "Enter" | "Return" => Enter,
            "Tab" => Tab,
            "Left" | "ArrowLeft" => Left,
            "Right" | "ArrowRight" => Right,
            "Up" | "ArrowUp" => Up,
            "Down" | "ArrowDown" => Down,
            "Escape" | "Esc" => Escape,
            "Backspace" => Backspace,
            "Shift" => Shift,
            "Control" | "Ctrl" => Control,
            "Alt" => Alt,
            _ => return None,
        })
    }
}

/// Pressed keys, pressed pointer buttons and the last pointer position.
#[derive(Debug, Default)]
pub struct InputState {
    keys: RwLock<HashSet<KeyCode>>,
    buttons: RwLock<HashSet<u8>>,
    pointer: RwLock<Vec2>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, event: &InputEvent) {
        match event {
            InputEvent::KeyDown(key) => {
                if let Some(code) = KeyCode::from_name(&key.key) {
                    self.keys.write().insert(code);
                }
            }
            InputEvent::KeyUp(key) => {
                if let Some(code) = KeyCode::from_name(&key.key) {
                    self.keys.write().remove(&code);
                }
            }
            InputEvent::PointerDown(pointer) => {
                self.buttons.write().insert(pointer.button);
                *self.pointer.write() = Vec2::new(pointer.x, pointer.y);
            }
            InputEvent::PointerUp(pointer) => {
                self.buttons.write().remove(&pointer.button);
                *self.pointer.write() = Vec2::new(pointer.x, pointer.y);
            }
            InputEvent::PointerMove(pointer) => {
                *self.pointer.write() = Vec2::new(pointer.x, pointer.y);
            }
        }
    }

    /// Forgets every pressed key and button, used when input is detached.
    pub fn clear(&self) {
        self.keys.write().clear();
        self.buttons.write().clear();
    }

    pub fn is_key_down(&self, name: &str) -> bool {
        if let Some(button) = parse_pointer_button(name) {
            return self.buttons.read().contains(&button);
        }
        KeyCode::from_name(name).is_some_and(|code| self.keys.read().contains(&code))
    }

    pub fn pointer_position(&self) -> Vec2 {
        *self.pointer.read()
    }
}

/// "Mouse1" is the primary button (index zero).
fn parse_pointer_button(name: &str) -> Option<u8> {
    let prefix = name.get(..5)?;
    if !prefix.eq_ignore_ascii_case("mouse") {
        return None;
    }
    match &name[5..] {
        "" => Some(0),
        suffix => suffix.parse::<u8>().ok().map(|index| index.saturating_sub(1)),
    }
}
