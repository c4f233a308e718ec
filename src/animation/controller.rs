use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, info, warn};
use serde_json::Value;

use crate::scene::{NodeId, SceneGraph};

use super::action::{AnimationAction, LoopMode};
use super::clip::{AnimationClip, SampledValue, TrackProperty};

/// Sparse patch applied by [`AnimationController::play`]. `None` keeps the
/// action's current value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayOptions {
    /// Anything but `Some(false)` stops every other action first.
    pub stop_others: Option<bool>,
    pub loop_mode: Option<LoopMode>,
    pub time_scale: Option<f32>,
    pub weight: Option<f32>,
    pub clamp_when_finished: Option<bool>,
}

impl PlayOptions {
    pub fn blended() -> Self {
        Self {
            stop_others: Some(false),
            ..Self::default()
        }
    }
}

/// A node property driven by at least one track, with its rest value.
#[derive(Debug, Clone)]
struct Binding {
    node: NodeId,
    property: TrackProperty,
    rest: SampledValue,
    driven: bool,
}

/// Clip library plus one action per clip, bound to a scene graph.
pub struct AnimationController {
    scene: SceneGraph,
    actions: Vec<AnimationAction>,
    by_name: HashMap<String, usize>,
    bindings: Vec<Binding>,
    /// Per action: (binding index, track index) pairs.
    action_tracks: Vec<Vec<(usize, usize)>>,
}

impl AnimationController {
    pub fn new(scene: SceneGraph) -> Self {
        Self {
            scene,
            actions: Vec::new(),
            by_name: HashMap::new(),
            bindings: Vec::new(),
            action_tracks: Vec::new(),
        }
    }

    /// Replaces every clip and action with the parsed `clips`. Nothing starts
    /// playing. Returns the number of clips loaded.
    pub fn load_clips(&mut self, clips: &[Value]) -> usize {
        self.stop_all();
        self.restore_rest_pose();
        self.actions.clear();
        self.by_name.clear();
        self.bindings.clear();
        self.action_tracks.clear();

        for data in clips {
            let clip = match AnimationClip::parse(data) {
                Ok(clip) => clip,
                Err(err) => {
                    warn!("skipping animation clip: {err:#}");
                    continue;
                }
            };
            let tracks = self.bind_tracks(&clip);
            let name = clip.name.clone();
            let action = AnimationAction::new(Rc::new(clip));
            match self.by_name.get(&name) {
                Some(&index) => {
                    warn!("animation {name} is defined twice; keeping the last one");
                    self.actions[index] = action;
                    self.action_tracks[index] = tracks;
                }
                None => {
                    self.by_name.insert(name, self.actions.len());
                    self.actions.push(action);
                    self.action_tracks.push(tracks);
                }
            }
        }
        info!("loaded {} animation clip(s)", self.actions.len());
        self.actions.len()
    }

    fn bind_tracks(&mut self, clip: &AnimationClip) -> Vec<(usize, usize)> {
        let mut bound = Vec::with_capacity(clip.tracks.len());
        for (track_index, track) in clip.tracks.iter().enumerate() {
            let node = if track.node.is_empty() {
                Some(self.scene.root_id())
            } else {
                self.scene.resolve(&track.node)
            };
            let Some(node) = node else {
                warn!(
                    "clip {}: no node named {} for {:?} track",
                    clip.name, track.node, track.property
                );
                continue;
            };
            let existing = self
                .bindings
                .iter()
                .position(|b| b.node == node && b.property == track.property);
            let binding = match existing {
                Some(index) => index,
                None => match self.rest_value(&node, track.property) {
                    Some(rest) => {
                        self.bindings.push(Binding {
                            node,
                            property: track.property,
                            rest,
                            driven: false,
                        });
                        self.bindings.len() - 1
                    }
                    None => continue,
                },
            };
            bound.push((binding, track_index));
        }
        bound
    }

    fn rest_value(&self, node: &NodeId, property: TrackProperty) -> Option<SampledValue> {
        let node = self.scene.get(node.as_str())?;
        Some(match property {
            TrackProperty::Position => SampledValue::Vector(node.position),
            TrackProperty::Scale => SampledValue::Vector(node.scale),
            TrackProperty::Quaternion => SampledValue::Quaternion(node.quaternion),
            TrackProperty::Visible => SampledValue::Bool(node.visible),
        })
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Clip names in load order.
    pub fn names(&self) -> Vec<String> {
        self.actions
            .iter()
            .map(|action| action.name().to_string())
            .collect()
    }

    pub fn action(&self, name: &str) -> Option<&AnimationAction> {
        self.by_name.get(name).map(|&index| &self.actions[index])
    }

    fn action_mut(&mut self, name: &str) -> Option<&mut AnimationAction> {
        match self.by_name.get(name) {
            Some(&index) => Some(&mut self.actions[index]),
            None => {
                warn!("animation not found: {name}");
                None
            }
        }
    }

    pub fn play(&mut self, name: &str, options: PlayOptions) -> bool {
        if !self.by_name.contains_key(name) {
            warn!("animation not found: {name}");
            return false;
        }
        let non_finite = [options.time_scale, options.weight]
            .into_iter()
            .flatten()
            .any(|value| !value.is_finite());
        if non_finite {
            warn!("animation {name}: time scale and weight must be finite");
            return false;
        }
        if options.stop_others != Some(false) {
            self.stop_all();
        }
        let Some(action) = self.action_mut(name) else {
            return false;
        };
        action.reset();
        if let Some(mode) = options.loop_mode {
            action.set_loop_mode(mode);
        }
        if let Some(scale) = options.time_scale {
            action.set_time_scale(scale);
        }
        if let Some(weight) = options.weight {
            action.set_weight(weight);
        }
        if let Some(clamp) = options.clamp_when_finished {
            action.set_clamp_when_finished(clamp);
        }
        action.play();
        debug!("playing animation {name}");
        true
    }

    pub fn stop(&mut self, name: &str) -> bool {
        self.action_mut(name).map(AnimationAction::stop).is_some()
    }

    pub fn stop_all(&mut self) {
        for action in &mut self.actions {
            action.stop();
        }
    }

    pub fn pause(&mut self, name: &str) -> bool {
        self.action_mut(name)
            .map(|action| action.set_paused(true))
            .is_some()
    }

    pub fn resume(&mut self, name: &str) -> bool {
        self.action_mut(name)
            .map(|action| action.set_paused(false))
            .is_some()
    }

    pub fn set_time(&mut self, name: &str, time: f32) -> bool {
        if !time.is_finite() {
            warn!("animation {name}: cannot seek to {time}");
            return false;
        }
        self.action_mut(name)
            .map(|action| action.set_time(time))
            .is_some()
    }

    pub fn time(&self, name: &str) -> Option<f32> {
        self.action(name).map(AnimationAction::time)
    }

    pub fn is_playing(&self, name: &str) -> bool {
        self.action(name).is_some_and(AnimationAction::is_running)
    }

    /// Advances every active action by `delta` seconds, blends the results by
    /// weight and writes them onto the bound nodes. Returns the names of the
    /// actions that finished on this step.
    pub fn update(&mut self, delta: f32) -> Vec<String> {
        let mut finished = Vec::new();
        for action in &mut self.actions {
            if action.advance(delta) {
                finished.push(action.name().to_string());
            }
        }
        self.apply();
        finished
    }

    fn apply(&mut self) {
        let mut accumulated: Vec<Option<(SampledValue, f32)>> = vec![None; self.bindings.len()];
        for (action, tracks) in self.actions.iter().zip(&self.action_tracks) {
            let weight = action.weight();
            if !action.is_active() || weight <= 0.0 {
                continue;
            }
            let time = action.time();
            for &(binding, track) in tracks {
                let value = action.clip().tracks[track].sample(time);
                accumulated[binding] = Some(match accumulated[binding] {
                    None => (value, weight),
                    Some((previous, total)) => {
                        let total = total + weight;
                        (previous.mix(value, weight / total), total)
                    }
                });
            }
        }

        for (binding, accumulated) in self.bindings.iter_mut().zip(accumulated) {
            match accumulated {
                Some((value, total)) => {
                    let value = if total < 1.0 {
                        binding.rest.mix(value, total)
                    } else {
                        value
                    };
                    write_property(&self.scene, binding, value);
                    binding.driven = true;
                }
                None if binding.driven => {
                    write_property(&self.scene, binding, binding.rest);
                    binding.driven = false;
                }
                None => {}
            }
        }
    }

    fn restore_rest_pose(&mut self) {
        for binding in &mut self.bindings {
            if binding.driven {
                write_property(&self.scene, binding, binding.rest);
                binding.driven = false;
            }
        }
    }
}

fn write_property(scene: &SceneGraph, binding: &Binding, value: SampledValue) {
    let uuid = binding.node.as_str();
    match (binding.property, value) {
        (TrackProperty::Position, SampledValue::Vector(v)) => scene.set_position(uuid, v),
        (TrackProperty::Scale, SampledValue::Vector(v)) => scene.set_scale(uuid, v),
        (TrackProperty::Quaternion, SampledValue::Quaternion(q)) => scene.set_quaternion(uuid, q),
        (TrackProperty::Visible, SampledValue::Bool(flag)) => scene.set_visible(uuid, flag),
        _ => false,
    };
}
