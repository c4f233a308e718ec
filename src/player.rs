//! The scene runtime: loads a description, compiles its scripts and drives
//! them against the frame clock, input and animation playback.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use glam::Vec2;
use log::{debug, error, info, warn};
use serde_json::Value;

use crate::animation::{AnimationController, PlayOptions};
use crate::channels::{ChannelRegistry, ListenerId, ListenerOptions};
use crate::clock::{Clock, SystemTimeSource, TimeSource};
use crate::config::PlayerConfig;
use crate::description::{ScriptKey, SceneDescription};
use crate::error::{PlayerError, ScriptError};
use crate::events::{self, DispatchOutcome, EventKind, EventPayload, EventRegistry, FrameTime};
use crate::input::{InputEvent, InputState};
use crate::render::{HeadlessRenderer, RenderBackend, Viewport};
use crate::scene::{Camera, JsonSceneLoader, SceneGraph, SceneLoader};
use crate::scripting::{LuaEngine, ScriptContext, ScriptEngine, ScriptTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// Nothing loaded yet.
    Idle,
    /// Loaded, or stopped after playing.
    Ready,
    Playing,
    Disposed,
}

/// Platform side of the player: input delivery and the frame loop.
pub trait PlayerHost {
    fn attach_input(&mut self);
    fn detach_input(&mut self);
    /// Starts (`true`) or halts (`false`) calls to [`Player::frame`].
    fn set_animation_loop(&mut self, active: bool);
}

/// Host for embedders that drive [`Player::frame`] and
/// [`Player::handle_input`] themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHost;

impl PlayerHost for NullHost {
    fn attach_input(&mut self) {}

    fn detach_input(&mut self) {}

    fn set_animation_loop(&mut self, _active: bool) {}
}

/// What a [`Player::load`] call produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub nodes: usize,
    pub scripts_compiled: usize,
    pub scripts_failed: usize,
    /// Scripts whose target node does not exist.
    pub scripts_skipped: usize,
    pub handlers: usize,
    /// Handler names outside the fixed vocabulary in node scripts.
    pub rejected_handlers: usize,
    pub animations: usize,
}

/// State reachable from scripts while a handler runs.
struct PlayerShared {
    registry: RefCell<EventRegistry>,
    channels: ChannelRegistry,
    animations: RefCell<Option<AnimationController>>,
    input: InputState,
    viewport: Arc<Viewport>,
}

impl PlayerShared {
    fn dispatch(&self, kind: EventKind, payload: &EventPayload) -> DispatchOutcome {
        let handlers = self.registry.borrow().handlers(kind);
        if handlers.is_empty() {
            return DispatchOutcome::default();
        }
        events::dispatch(&handlers, kind.as_str(), payload)
    }

    fn call_method(&self, name: &str, args: &[Value]) -> bool {
        let handlers = self.registry.borrow().root_method(name);
        if handlers.is_empty() {
            error!("no root script method named {name}");
            return false;
        }
        events::dispatch(&handlers, name, &EventPayload::Args(args.to_vec()));
        true
    }

    fn with_animations<R>(
        &self,
        fallback: R,
        action: impl FnOnce(&mut AnimationController) -> R,
    ) -> R {
        let Ok(mut slot) = self.animations.try_borrow_mut() else {
            warn!("animation controller is busy; request ignored");
            return fallback;
        };
        match slot.as_mut() {
            Some(controller) => action(controller),
            None => {
                warn!("no scene loaded; animation request ignored");
                fallback
            }
        }
    }

    fn read_animations<R>(&self, fallback: R, query: impl FnOnce(&AnimationController) -> R) -> R {
        match self.animations.try_borrow() {
            Ok(slot) => slot.as_ref().map_or(fallback, query),
            Err(_) => fallback,
        }
    }

    fn play_animation(&self, name: &str, options: PlayOptions) -> bool {
        self.with_animations(false, |controller| controller.play(name, options))
    }

    fn stop_animation(&self, name: &str) -> bool {
        self.with_animations(false, |controller| controller.stop(name))
    }

    fn pause_animation(&self, name: &str) -> bool {
        self.with_animations(false, |controller| controller.pause(name))
    }

    fn resume_animation(&self, name: &str) -> bool {
        self.with_animations(false, |controller| controller.resume(name))
    }

    fn stop_all_animations(&self) {
        self.with_animations((), AnimationController::stop_all)
    }

    fn set_animation_time(&self, name: &str, time: f32) -> bool {
        self.with_animations(false, |controller| controller.set_time(name, time))
    }

    fn animation_time(&self, name: &str) -> Option<f32> {
        self.read_animations(None, |controller| controller.time(name))
    }

    fn is_animation_playing(&self, name: &str) -> bool {
        self.read_animations(false, |controller| controller.is_playing(name))
    }

    fn animations(&self) -> Vec<String> {
        self.read_animations(Vec::new(), AnimationController::names)
    }
}

/// Weak view of a [`Player`] handed to scripts. Every call is a no-op once the
/// player is gone.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    shared: Weak<PlayerShared>,
}

impl RuntimeHandle {
    /// Handle that is not attached to any player.
    pub fn detached() -> Self {
        Self {
            shared: Weak::new(),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.shared.strong_count() > 0
    }

    fn with<R>(&self, fallback: R, call: impl FnOnce(&PlayerShared) -> R) -> R {
        match self.shared.upgrade() {
            Some(shared) => call(&shared),
            None => fallback,
        }
    }

    pub fn invoke(&self, name: &str, args: &[Value]) -> usize {
        self.with(0, |shared| shared.channels.invoke(name, args))
    }

    pub fn add_event_listener<F>(
        &self,
        name: &str,
        callback: F,
        options: ListenerOptions,
    ) -> Option<ListenerId>
    where
        F: Fn(&[Value]) -> Result<(), ScriptError> + 'static,
    {
        self.with(None, |shared| {
            Some(shared.channels.add(name, callback, options))
        })
    }

    pub fn remove_event_listener(&self, name: &str, id: ListenerId) -> bool {
        self.with(false, |shared| shared.channels.remove(name, id))
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.with(0, |shared| shared.channels.listener_count(name))
    }

    pub fn call_method(&self, name: &str, args: &[Value]) -> bool {
        self.with(false, |shared| shared.call_method(name, args))
    }

    pub fn play_animation(&self, name: &str, options: PlayOptions) -> bool {
        self.with(false, |shared| shared.play_animation(name, options))
    }

    pub fn stop_animation(&self, name: &str) -> bool {
        self.with(false, |shared| shared.stop_animation(name))
    }

    pub fn pause_animation(&self, name: &str) -> bool {
        self.with(false, |shared| shared.pause_animation(name))
    }

    pub fn resume_animation(&self, name: &str) -> bool {
        self.with(false, |shared| shared.resume_animation(name))
    }

    pub fn stop_all_animations(&self) {
        self.with((), PlayerShared::stop_all_animations)
    }

    pub fn set_animation_time(&self, name: &str, time: f32) -> bool {
        self.with(false, |shared| shared.set_animation_time(name, time))
    }

    pub fn animation_time(&self, name: &str) -> Option<f32> {
        self.with(None, |shared| shared.animation_time(name))
    }

    pub fn is_animation_playing(&self, name: &str) -> bool {
        self.with(false, |shared| shared.is_animation_playing(name))
    }

    pub fn animations(&self) -> Vec<String> {
        self.with(Vec::new(), PlayerShared::animations)
    }

    pub fn is_key_down(&self, name: &str) -> bool {
        self.with(false, |shared| shared.input.is_key_down(name))
    }

    pub fn pointer_position(&self) -> Vec2 {
        self.with(Vec2::ZERO, |shared| shared.input.pointer_position())
    }

    pub fn size(&self) -> (u32, u32) {
        self.with((0, 0), |shared| shared.viewport.size())
    }
}

/// Plays back one scene description at a time.
pub struct Player {
    shared: Rc<PlayerShared>,
    state: PlayerState,
    renderer: Box<dyn RenderBackend>,
    loader: Box<dyn SceneLoader>,
    engine: Box<dyn ScriptEngine>,
    host: Box<dyn PlayerHost>,
    clock: Clock,
    scene: Option<SceneGraph>,
    camera: Option<Camera>,
    input_attached: bool,
}

impl Default for Player {
    fn default() -> Self {
        Self::new(PlayerConfig::default())
    }
}

impl Player {
    /// Player with the headless renderer, the JSON loader, the Lua engine and
    /// the system clock.
    pub fn new(config: PlayerConfig) -> Self {
        let shared = Rc::new(PlayerShared {
            registry: RefCell::new(EventRegistry::new()),
            channels: ChannelRegistry::new(),
            animations: RefCell::new(None),
            input: InputState::new(),
            viewport: Arc::new(Viewport::new(config.width, config.height, config.pixel_ratio)),
        });
        let mut player = Self {
            shared,
            state: PlayerState::Idle,
            renderer: Box::new(HeadlessRenderer::new()),
            loader: Box::new(JsonSceneLoader),
            engine: Box::new(LuaEngine::new()),
            host: Box::new(NullHost),
            clock: Clock::new(Box::new(SystemTimeSource::new())),
            scene: None,
            camera: None,
            input_attached: false,
        };
        player.sync_renderer_viewport();
        player
    }

    pub fn with_renderer(mut self, renderer: impl RenderBackend + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self.sync_renderer_viewport();
        self
    }

    pub fn with_loader(mut self, loader: impl SceneLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_engine(mut self, engine: impl ScriptEngine + 'static) -> Self {
        self.engine = Box::new(engine);
        self
    }

    pub fn with_host(mut self, host: impl PlayerHost + 'static) -> Self {
        self.host = Box::new(host);
        self
    }

    pub fn with_time_source(mut self, source: impl TimeSource + 'static) -> Self {
        self.clock = Clock::new(Box::new(source));
        self
    }

    fn sync_renderer_viewport(&mut self) {
        let (width, height) = self.shared.viewport.size();
        self.renderer.set_size(width, height);
        self.renderer.set_pixel_ratio(self.shared.viewport.pixel_ratio());
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            shared: Rc::downgrade(&self.shared),
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn scene(&self) -> Option<&SceneGraph> {
        self.scene.as_ref()
    }

    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    pub fn size(&self) -> (u32, u32) {
        self.shared.viewport.size()
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.shared.viewport.pixel_ratio()
    }

    pub fn input(&self) -> &InputState {
        &self.shared.input
    }

    /// Parses `text` as a scene description and loads it.
    pub fn load_json(&mut self, text: &str) -> Result<LoadReport, PlayerError> {
        let description = SceneDescription::parse(text)?;
        self.load(description)
    }

    /// Replaces the current scene, camera, animations and handlers with those
    /// of `description`, then dispatches `init`. Custom channel subscribers
    /// are kept.
    pub fn load(&mut self, description: SceneDescription) -> Result<LoadReport, PlayerError> {
        if self.state == PlayerState::Disposed {
            return Err(PlayerError::Disposed);
        }
        let scene = self.loader.parse_scene(&description.scene)?;
        let camera = self.loader.parse_camera(&description.camera)?;
        camera.set_aspect(self.shared.viewport.aspect());

        if self.state == PlayerState::Playing {
            self.detach();
        }
        self.renderer.configure(&description.project);

        let mut controller = AnimationController::new(scene.clone());
        let animations = controller.load_clips(&description.animations);
        *self.shared.animations.borrow_mut() = Some(controller);
        self.shared.registry.borrow_mut().clear();
        self.scene = Some(scene.clone());
        self.camera = Some(camera.clone());
        self.state = PlayerState::Ready;

        let context = ScriptContext {
            scene: scene.clone(),
            camera,
            runtime: self.handle(),
            viewport: Arc::clone(&self.shared.viewport),
        };
        self.engine.reset(&context)?;

        let mut report = LoadReport {
            nodes: scene.len(),
            animations,
            ..LoadReport::default()
        };
        let root = scene.root_id();
        let mut registry = EventRegistry::new();
        for entry in &description.scripts {
            let target = match &entry.target {
                ScriptKey::Root => ScriptTarget::Root(root.clone()),
                ScriptKey::Node(id) if scene.contains(id.as_str()) => ScriptTarget::Node(id.clone()),
                ScriptKey::Node(id) => {
                    warn!("script {} targets unknown node {id}; skipped", entry.label());
                    report.scripts_skipped += 1;
                    continue;
                }
            };
            match self.engine.compile(entry, &target) {
                Ok(set) => {
                    let installed = registry.install(set);
                    report.scripts_compiled += 1;
                    report.handlers += installed.accepted;
                    report.rejected_handlers += installed.rejected;
                }
                Err(err) => {
                    error!("script {} failed to compile: {err}", entry.label());
                    report.scripts_failed += 1;
                }
            }
        }
        *self.shared.registry.borrow_mut() = registry;

        info!(
            "loaded scene {root}: {} node(s), {} script(s), {} handler(s), {} animation(s)",
            report.nodes, report.scripts_compiled, report.handlers, report.animations
        );
        self.shared.dispatch(EventKind::Init, &EventPayload::Empty);
        Ok(report)
    }

    pub fn play(&mut self) {
        match self.state {
            PlayerState::Ready => {}
            PlayerState::Playing => {
                debug!("play() while already playing");
                return;
            }
            PlayerState::Idle | PlayerState::Disposed => {
                warn!("play() needs a loaded scene (state {:?})", self.state);
                return;
            }
        }
        self.host.attach_input();
        self.input_attached = true;
        self.clock.start();
        self.state = PlayerState::Playing;
        info!("playback started");
        self.shared.dispatch(EventKind::Start, &EventPayload::Empty);
        self.host.set_animation_loop(true);
    }

    pub fn stop(&mut self) {
        if self.state != PlayerState::Playing {
            return;
        }
        self.detach();
        self.state = PlayerState::Ready;
        info!("playback stopped");
        self.shared.dispatch(EventKind::Stop, &EventPayload::Empty);
    }

    fn detach(&mut self) {
        if self.input_attached {
            self.host.detach_input();
            self.shared.input.clear();
            self.input_attached = false;
        }
        self.host.set_animation_loop(false);
    }

    /// One step of the frame loop. Returns false unless playing.
    pub fn frame(&mut self) -> bool {
        if self.state != PlayerState::Playing {
            return false;
        }
        let tick = self.clock.tick();
        let finished = self
            .shared
            .with_animations(Vec::new(), |controller| controller.update(tick.delta_seconds()));
        for name in finished {
            debug!("animation {name} finished");
        }
        let payload = EventPayload::Frame(FrameTime {
            time: tick.elapsed_millis(),
            delta: tick.delta_millis(),
        });
        self.shared.dispatch(EventKind::Update, &payload);
        self.draw();
        true
    }

    /// Dispatches `update` for `time_seconds` and draws once, without touching
    /// the clock.
    pub fn render(&mut self, time_seconds: f64) {
        if self.state == PlayerState::Disposed {
            warn!("render() on a disposed player");
            return;
        }
        let payload = EventPayload::Frame(FrameTime {
            time: time_seconds * 1000.0,
            delta: 0.0,
        });
        self.shared.dispatch(EventKind::Update, &payload);
        self.draw();
    }

    fn draw(&mut self) {
        let (Some(scene), Some(camera)) = (&self.scene, &self.camera) else {
            return;
        };
        if let Err(err) = self.renderer.render(scene, camera) {
            error!("render failed: {err:#}");
        }
    }

    /// Releases the renderer and everything the loaded scene owns. Channel
    /// subscribers survive.
    pub fn dispose(&mut self) {
        if self.state == PlayerState::Disposed {
            return;
        }
        if self.state == PlayerState::Playing {
            self.detach();
        }
        self.renderer.dispose();
        if let Some(mut controller) = self.shared.animations.borrow_mut().take() {
            controller.stop_all();
        }
        self.shared.registry.borrow_mut().clear();
        self.scene = None;
        self.camera = None;
        self.state = PlayerState::Disposed;
        info!("player disposed");
    }

    /// Delivers one input event while input is attached.
    pub fn handle_input(&mut self, event: &InputEvent) -> bool {
        if !self.input_attached {
            debug!("input ignored while detached: {event:?}");
            return false;
        }
        self.shared.input.apply(event);
        self.shared.dispatch(event.kind(), &EventPayload::from(event));
        true
    }

    /// Swaps the rendered graph. Handlers and animations stay bound to the
    /// graph they were loaded with.
    pub fn set_scene(&mut self, scene: SceneGraph) {
        self.scene = Some(scene);
    }

    pub fn set_camera(&mut self, camera: Camera) {
        camera.set_aspect(self.shared.viewport.aspect());
        self.camera = Some(camera);
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.shared.viewport.resize(width, height);
        if let Some(camera) = &self.camera {
            camera.set_aspect(self.shared.viewport.aspect());
        }
        self.renderer.set_size(width, height);
    }

    pub fn set_pixel_ratio(&mut self, ratio: f32) {
        self.shared.viewport.set_pixel_ratio(ratio);
        self.renderer.set_pixel_ratio(ratio);
    }

    /// Runs every root script handler named `name` with `args`. Lua handlers
    /// receive the arguments spread after `self`; `{...}` collects them back
    /// into a list.
    pub fn call_method(&self, name: &str, args: &[Value]) -> bool {
        self.shared.call_method(name, args)
    }

    pub fn add_event_listener<F>(&self, name: &str, callback: F, options: ListenerOptions) -> ListenerId
    where
        F: Fn(&[Value]) -> Result<(), ScriptError> + 'static,
    {
        self.shared.channels.add(name, callback, options)
    }

    pub fn remove_event_listener(&self, name: &str, id: ListenerId) -> bool {
        self.shared.channels.remove(name, id)
    }

    pub fn invoke(&self, name: &str, args: &[Value]) -> usize {
        self.shared.channels.invoke(name, args)
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.shared.channels.listener_count(name)
    }

    pub fn clear_event_listeners(&self) {
        self.shared.channels.clear();
    }

    /// Number of fixed-kind handlers currently installed for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.shared.registry.borrow().len(kind)
    }

    /// Replaces every clip with `clips` after returning driven nodes to their
    /// rest pose. Needs a loaded scene; nothing starts playing.
    pub fn load_animations(&mut self, clips: &[Value]) -> usize {
        self.shared
            .with_animations(0, |controller| controller.load_clips(clips))
    }

    pub fn play_animation(&self, name: &str, options: PlayOptions) -> bool {
        self.shared.play_animation(name, options)
    }

    pub fn stop_animation(&self, name: &str) -> bool {
        self.shared.stop_animation(name)
    }

    pub fn pause_animation(&self, name: &str) -> bool {
        self.shared.pause_animation(name)
    }

    pub fn resume_animation(&self, name: &str) -> bool {
        self.shared.resume_animation(name)
    }

    pub fn stop_all_animations(&self) {
        self.shared.stop_all_animations();
    }

    pub fn set_animation_time(&self, name: &str, time: f32) -> bool {
        self.shared.set_animation_time(name, time)
    }

    pub fn animation_time(&self, name: &str) -> Option<f32> {
        self.shared.animation_time(name)
    }

    pub fn is_animation_playing(&self, name: &str) -> bool {
        self.shared.is_animation_playing(name)
    }

    pub fn animations(&self) -> Vec<String> {
        self.shared.animations()
    }
}
