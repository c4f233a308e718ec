use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Monotonic time source consulted once per frame.
pub trait TimeSource {
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`Instant`], measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Time source advanced explicitly by the host. Clones share the same reading.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    now: Arc<RwLock<Duration>>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, step: Duration) {
        *self.now.write() += step;
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    pub fn set(&self, now: Duration) {
        *self.now.write() = now;
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Duration {
        *self.now.read()
    }
}

/// Frame clock: tracks the start of playback and the previous tick.
pub struct Clock {
    source: Box<dyn TimeSource>,
    start: Duration,
    previous: Option<Duration>,
}

impl Clock {
    pub fn new(source: Box<dyn TimeSource>) -> Self {
        Self {
            source,
            start: Duration::ZERO,
            previous: None,
        }
    }

    pub fn now(&self) -> Duration {
        self.source.now()
    }

    /// Restarts the clock; the next [`Clock::tick`] measures from here.
    pub fn start(&mut self) {
        let now = self.source.now();
        self.start = now;
        self.previous = Some(now);
    }

    /// Advances the clock and returns the time elapsed since the previous tick.
    /// The first tick of a clock that was never started reports zero.
    pub fn tick(&mut self) -> Tick {
        let now = self.source.now();
        let previous = self.previous.replace(now).unwrap_or(now);
        Tick {
            elapsed: now.saturating_sub(self.start),
            delta: now.saturating_sub(previous),
        }
    }
}

/// Reading produced by [`Clock::tick`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub elapsed: Duration,
    pub delta: Duration,
}

impl Tick {
    pub fn elapsed_millis(&self) -> f64 {
        duration_millis(self.elapsed)
    }

    pub fn delta_millis(&self) -> f64 {
        duration_millis(self.delta)
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }
}

// exact for whole milliseconds
fn duration_millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}
