//! Keyframe clips, per-clip playback actions and the controller that blends
//! them onto scene nodes.

mod action;
mod clip;
mod controller;

pub use action::{AnimationAction, LoopMode};
pub use clip::{AnimationClip, Interpolation, KeyframeTrack, SampledValue, TrackProperty, TrackValues};
pub use controller::{AnimationController, PlayOptions};
