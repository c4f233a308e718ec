use anyhow::{anyhow, bail, Context, Result};
use glam::{Quat, Vec3};
use log::warn;
use serde::Deserialize;
use serde_json::Value;

/// Keyframe interpolation, using the authoring tool's numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    Discrete,
    #[default]
    Linear,
    /// Sampled like [`Interpolation::Linear`].
    Smooth,
}

impl Interpolation {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            2300 => Some(Self::Discrete),
            2301 => Some(Self::Linear),
            2302 => Some(Self::Smooth),
            _ => None,
        }
    }
}

/// Node property a track drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackProperty {
    Position,
    Scale,
    Quaternion,
    Visible,
}

impl TrackProperty {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "position" => Some(Self::Position),
            "scale" => Some(Self::Scale),
            "quaternion" => Some(Self::Quaternion),
            "visible" => Some(Self::Visible),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackValues {
    Vector(Vec<Vec3>),
    Quaternion(Vec<Quat>),
    Bool(Vec<bool>),
}

/// Value of one track at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampledValue {
    Vector(Vec3),
    Quaternion(Quat),
    Bool(bool),
}

impl SampledValue {
    /// Moves from `self` towards `other` by `t`.
    pub fn mix(self, other: SampledValue, t: f32) -> SampledValue {
        match (self, other) {
            (Self::Vector(a), Self::Vector(b)) => Self::Vector(a.lerp(b, t)),
            (Self::Quaternion(a), Self::Quaternion(b)) => Self::Quaternion(a.slerp(b, t)),
            (Self::Bool(a), Self::Bool(b)) => Self::Bool(if t >= 0.5 { b } else { a }),
            (_, other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyframeTrack {
    /// Node reference from the track name: a uuid, a node name, or empty for the root.
    pub node: String,
    pub property: TrackProperty,
    pub times: Vec<f32>,
    pub values: TrackValues,
    pub interpolation: Interpolation,
}

impl KeyframeTrack {
    pub fn duration(&self) -> f32 {
        self.times.last().copied().unwrap_or(0.0)
    }

    pub fn sample(&self, time: f32) -> SampledValue {
        let (from, to, alpha) = segment(&self.times, time);
        let alpha = match (self.interpolation, &self.values) {
            (_, TrackValues::Bool(_)) | (Interpolation::Discrete, _) => 0.0,
            _ => alpha,
        };
        match &self.values {
            TrackValues::Vector(values) => {
                SampledValue::Vector(values[from].lerp(values[to], alpha))
            }
            TrackValues::Quaternion(values) => {
                SampledValue::Quaternion(values[from].slerp(values[to], alpha))
            }
            TrackValues::Bool(values) => SampledValue::Bool(values[from]),
        }
    }
}

/// Keyframe indices surrounding `time` and the blend factor between them.
fn segment(times: &[f32], time: f32) -> (usize, usize, f32) {
    let last = times.len() - 1;
    // also catches NaN
    if !(time > times[0]) {
        return (0, 0, 0.0);
    }
    if time >= times[last] {
        return (last, last, 0.0);
    }
    let to = times.partition_point(|&key| key <= time);
    let from = to - 1;
    let span = times[to] - times[from];
    let alpha = if span > 0.0 {
        (time - times[from]) / span
    } else {
        0.0
    };
    (from, to, alpha)
}

/// Named set of keyframe tracks, parsed once and shared by its action.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationClip {
    pub name: String,
    pub duration: f32,
    pub tracks: Vec<KeyframeTrack>,
}

#[derive(Debug, Deserialize)]
struct RawClip {
    #[serde(default)]
    name: String,
    duration: Option<f32>,
    #[serde(default)]
    tracks: Vec<RawTrack>,
}

#[derive(Debug, Deserialize)]
struct RawTrack {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    times: Vec<f32>,
    values: Vec<Value>,
    interpolation: Option<u32>,
}

impl AnimationClip {
    /// Parses serialized clip data. Tracks that cannot be played are dropped
    /// with a warning; a malformed clip is an error.
    pub fn parse(data: &Value) -> Result<Self> {
        let raw = RawClip::deserialize(data).context("invalid animation clip")?;
        let mut tracks = Vec::with_capacity(raw.tracks.len());
        for track in &raw.tracks {
            match parse_track(track) {
                Ok(track) => tracks.push(track),
                Err(err) => warn!("clip {}: skipping track {}: {err:#}", raw.name, track.name),
            }
        }
        let duration = match raw.duration {
            Some(duration) if duration >= 0.0 => duration,
            _ => tracks
                .iter()
                .map(KeyframeTrack::duration)
                .fold(0.0, f32::max),
        };
        Ok(Self {
            name: raw.name,
            duration,
            tracks,
        })
    }
}

fn parse_track(raw: &RawTrack) -> Result<KeyframeTrack> {
    let (node, property) = raw
        .name
        .rsplit_once('.')
        .ok_or_else(|| anyhow!("track name needs a `node.property` form"))?;
    let property = TrackProperty::from_name(property)
        .ok_or_else(|| anyhow!("unsupported property {property}"))?;
    if raw.times.is_empty() {
        bail!("track has no keyframes");
    }
    if raw.times.windows(2).any(|pair| pair[1] < pair[0]) {
        bail!("keyframe times are not sorted");
    }
    let interpolation = match raw.interpolation {
        Some(code) => Interpolation::from_code(code)
            .ok_or_else(|| anyhow!("unknown interpolation {code}"))?,
        None => Interpolation::default(),
    };

    let keys = raw.times.len();
    let values = match (raw.kind.as_str(), property) {
        ("vector", TrackProperty::Position | TrackProperty::Scale) => {
            let floats = numbers(&raw.values, keys * 3)?;
            TrackValues::Vector(floats.chunks_exact(3).map(Vec3::from_slice).collect())
        }
        ("quaternion", TrackProperty::Quaternion) => {
            let floats = numbers(&raw.values, keys * 4)?;
            TrackValues::Quaternion(
                floats
                    .chunks_exact(4)
                    .map(|q| Quat::from_slice(q).normalize())
                    .collect(),
            )
        }
        ("bool", TrackProperty::Visible) => {
            if raw.values.len() != keys {
                bail!("expected {keys} values, found {}", raw.values.len());
            }
            let flags = raw
                .values
                .iter()
                .map(|value| match value {
                    Value::Bool(flag) => Ok(*flag),
                    Value::Number(number) => Ok(number.as_f64().unwrap_or(0.0) != 0.0),
                    other => Err(anyhow!("expected a boolean keyframe, found {other}")),
                })
                .collect::<Result<Vec<_>>>()?;
            TrackValues::Bool(flags)
        }
        (kind, property) => bail!("track type {kind} cannot drive {property:?}"),
    };

    Ok(KeyframeTrack {
        node: node.to_string(),
        property,
        times: raw.times.clone(),
        values,
        interpolation,
    })
}

fn numbers(values: &[Value], expected: usize) -> Result<Vec<f32>> {
    if values.len() != expected {
        bail!("expected {expected} values, found {}", values.len());
    }
    values
        .iter()
        .map(|value| {
            value
                .as_f64()
                .map(|number| number as f32)
                .ok_or_else(|| anyhow!("expected a number, found {value}"))
        })
        .collect()
}
