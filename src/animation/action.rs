use std::rc::Rc;

use super::clip::AnimationClip;

/// How an action behaves when it reaches either end of its clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    Once,
    #[default]
    Repeat,
    PingPong,
}

impl LoopMode {
    /// Numeric codes used by serialized scenes and scripts.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            2200 => Some(Self::Once),
            2201 => Some(Self::Repeat),
            2202 => Some(Self::PingPong),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "once" => Some(Self::Once),
            "repeat" => Some(Self::Repeat),
            "pingpong" | "ping_pong" | "ping-pong" => Some(Self::PingPong),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Once => 2200,
            Self::Repeat => 2201,
            Self::PingPong => 2202,
        }
    }
}

/// Playback state of one clip.
#[derive(Debug, Clone)]
pub struct AnimationAction {
    clip: Rc<AnimationClip>,
    playing: bool,
    paused: bool,
    enabled: bool,
    loop_mode: LoopMode,
    time_scale: f32,
    weight: f32,
    time: f32,
    clamp_when_finished: bool,
    direction: f32,
}

impl AnimationAction {
    pub fn new(clip: Rc<AnimationClip>) -> Self {
        Self {
            clip,
            playing: false,
            paused: false,
            enabled: true,
            loop_mode: LoopMode::default(),
            time_scale: 1.0,
            weight: 1.0,
            time: 0.0,
            clamp_when_finished: false,
            direction: 1.0,
        }
    }

    pub fn clip(&self) -> &AnimationClip {
        &self.clip
    }

    pub fn name(&self) -> &str {
        &self.clip.name
    }

    /// Rewinds to the start and clears pause and finished state. Loop mode,
    /// time scale and weight are kept.
    pub fn reset(&mut self) {
        self.paused = false;
        self.enabled = true;
        self.time = 0.0;
        self.direction = 1.0;
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn stop(&mut self) {
        self.playing = false;
        self.reset();
    }

    /// Scheduled and contributing to the pose (paused actions still contribute).
    pub fn is_active(&self) -> bool {
        self.playing && self.enabled
    }

    pub fn is_running(&self) -> bool {
        self.is_active() && !self.paused && self.time_scale != 0.0
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale;
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: f32) {
        self.weight = weight;
    }

    pub fn set_clamp_when_finished(&mut self, clamp: bool) {
        self.clamp_when_finished = clamp;
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn set_time(&mut self, time: f32) {
        self.time = time;
    }

    /// Moves the playhead by `delta` seconds scaled by the time scale. Returns
    /// true when a `Once` action reaches the end of its clip on this step.
    pub fn advance(&mut self, delta: f32) -> bool {
        if !self.is_active() || self.paused {
            return false;
        }
        let step = delta * self.time_scale;
        if step == 0.0 || !step.is_finite() || !self.time.is_finite() {
            return false;
        }
        let duration = self.clip.duration;
        match self.loop_mode {
            LoopMode::Once => {
                let next = self.time + step;
                if next >= duration || next <= 0.0 {
                    self.time = if next <= 0.0 { 0.0 } else { duration };
                    if self.clamp_when_finished {
                        self.paused = true;
                    } else {
                        self.enabled = false;
                    }
                    return true;
                }
                self.time = next;
            }
            LoopMode::Repeat => {
                self.time = if duration > 0.0 {
                    (self.time + step).rem_euclid(duration)
                } else {
                    0.0
                };
            }
            LoopMode::PingPong => {
                if duration <= 0.0 {
                    self.time = 0.0;
                    return false;
                }
                // unfold onto one forward-then-back period, step, fold once
                let period = 2.0 * duration;
                let unfolded = if self.direction < 0.0 {
                    period - self.time
                } else {
                    self.time
                };
                let folded = (unfolded + step).rem_euclid(period);
                if folded > duration {
                    self.time = period - folded;
                    self.direction = -1.0;
                } else {
                    self.time = folded;
                    self.direction = 1.0;
                }
            }
        }
        false
    }
}
