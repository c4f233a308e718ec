use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;

/// Player settings that do not come from the scene description.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "PlayerConfig::default_width")]
    pub width: u32,
    #[serde(default = "PlayerConfig::default_height")]
    pub height: u32,
    #[serde(default = "PlayerConfig::default_pixel_ratio")]
    pub pixel_ratio: f32,
    /// Frame rate used when the host steps the clock itself.
    #[serde(default = "PlayerConfig::default_fps")]
    pub fps: f32,
}

impl PlayerConfig {
    const fn default_width() -> u32 {
        500
    }

    const fn default_height() -> u32 {
        500
    }

    const fn default_pixel_ratio() -> f32 {
        1.0
    }

    const fn default_fps() -> f32 {
        60.0
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::from_path(path) {
            Ok(config) => config,
            Err(err) => {
                warn!("config load error: {err:#}; falling back to defaults");
                Self::default()
            }
        }
    }

    /// Milliseconds between frames at the configured rate.
    pub fn frame_interval_millis(&self) -> u64 {
        if self.fps > 0.0 {
            (1000.0 / self.fps).round() as u64
        } else {
            0
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            width: Self::default_width(),
            height: Self::default_height(),
            pixel_ratio: Self::default_pixel_ratio(),
            fps: Self::default_fps(),
        }
    }
}
