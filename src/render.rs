use std::sync::Arc;

use anyhow::Result;
use glam::Mat4;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::scene::{Camera, SceneGraph};

/// Project-level render flags carried by a scene description. Absent values
/// leave the renderer's current setting untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSettings {
    pub shadows: Option<bool>,
    pub shadow_type: Option<i32>,
    pub tone_mapping: Option<i32>,
    pub tone_mapping_exposure: Option<f32>,
}

impl RenderSettings {
    /// Overwrites the fields present in `patch`.
    pub fn merge(&mut self, patch: &RenderSettings) {
        if patch.shadows.is_some() {
            self.shadows = patch.shadows;
        }
        if patch.shadow_type.is_some() {
            self.shadow_type = patch.shadow_type;
        }
        if patch.tone_mapping.is_some() {
            self.tone_mapping = patch.tone_mapping;
        }
        if patch.tone_mapping_exposure.is_some() {
            self.tone_mapping_exposure = patch.tone_mapping_exposure;
        }
    }
}

/// Drawing capability supplied by the host.
pub trait RenderBackend {
    fn configure(&mut self, settings: &RenderSettings);
    fn set_size(&mut self, width: u32, height: u32);
    fn set_pixel_ratio(&mut self, ratio: f32);
    fn render(&mut self, scene: &SceneGraph, camera: &Camera) -> Result<()>;
    fn dispose(&mut self);
}

/// Viewport dimensions shared with scripts.
#[derive(Debug)]
pub struct Viewport {
    state: RwLock<ViewportState>,
}

#[derive(Debug, Clone, Copy)]
struct ViewportState {
    width: u32,
    height: u32,
    pixel_ratio: f32,
}

impl Viewport {
    pub fn new(width: u32, height: u32, pixel_ratio: f32) -> Self {
        Self {
            state: RwLock::new(ViewportState {
                width,
                height,
                pixel_ratio,
            }),
        }
    }

    pub fn resize(&self, width: u32, height: u32) {
        let mut state = self.state.write();
        state.width = width;
        state.height = height;
    }

    pub fn set_pixel_ratio(&self, ratio: f32) {
        self.state.write().pixel_ratio = ratio;
    }

    pub fn size(&self) -> (u32, u32) {
        let state = self.state.read();
        (state.width, state.height)
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.state.read().pixel_ratio
    }

    pub fn aspect(&self) -> f32 {
        let (width, height) = self.size();
        if height == 0 {
            1.0
        } else {
            width as f32 / height as f32
        }
    }
}

/// What a [`HeadlessRenderer`] has been asked to do so far.
#[derive(Debug, Clone, Default)]
pub struct RenderStats {
    pub frames: u64,
    pub size: (u32, u32),
    pub pixel_ratio: f32,
    pub settings: RenderSettings,
    pub last_view_projection: Option<Mat4>,
    pub visible_nodes: usize,
    pub disposed: bool,
}

/// Renderer that records draw requests instead of drawing. Used for offline
/// playback and tests.
#[derive(Debug, Clone, Default)]
pub struct HeadlessRenderer {
    stats: Arc<RwLock<RenderStats>>,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that keeps observing the renderer after it has been boxed.
    pub fn stats_handle(&self) -> Arc<RwLock<RenderStats>> {
        Arc::clone(&self.stats)
    }

    pub fn stats(&self) -> RenderStats {
        self.stats.read().clone()
    }
}

impl RenderBackend for HeadlessRenderer {
    fn configure(&mut self, settings: &RenderSettings) {
        self.stats.write().settings.merge(settings);
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.stats.write().size = (width, height);
    }

    fn set_pixel_ratio(&mut self, ratio: f32) {
        self.stats.write().pixel_ratio = ratio;
    }

    fn render(&mut self, scene: &SceneGraph, camera: &Camera) -> Result<()> {
        let visible = scene.all_nodes().iter().filter(|node| node.visible).count();
        let mut stats = self.stats.write();
        stats.frames += 1;
        stats.visible_nodes = visible;
        stats.last_view_projection = Some(camera.view_projection());
        Ok(())
    }

    fn dispose(&mut self) {
        self.stats.write().disposed = true;
    }
}
