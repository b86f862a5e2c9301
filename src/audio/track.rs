//! Playback track representation.
//!
//! A track is one independently loaded audio file (a stem, the click, or the
//! guide vocal). Tracks are muted by volume, never by pausing, so every track
//! keeps the same playhead.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a track, as supplied by the song's stem list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a track carries. Click and guide are switched by scene flags rather
/// than by the scene's active stem list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    #[default]
    Stem,
    Click,
    Guide,
}

/// What the engine needs to load a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSpec {
    pub id: TrackId,
    pub name: String,
    /// URI or path handed to the sound backend.
    pub source: String,
    #[serde(default)]
    pub kind: TrackKind,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub muted: bool,
}

fn default_volume() -> f32 {
    1.0
}

impl TrackSpec {
    pub fn new(
        id: impl Into<TrackId>,
        name: impl Into<String>,
        source: impl Into<String>,
        kind: TrackKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source: source.into(),
            kind,
            volume: 1.0,
            muted: false,
        }
    }

    pub fn stem(id: impl Into<TrackId>, source: impl Into<String>) -> Self {
        let id = id.into();
        let name = id.to_string();
        Self::new(id, name, source, TrackKind::Stem)
    }
}

/// Snapshot of a track's state inside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub source: String,
    pub kind: TrackKind,
    /// Whether the backend holds a live sound for this track.
    pub loaded: bool,
    /// Level (0.0-1.0) the track plays at while unmuted.
    pub volume: f32,
    pub muted: bool,
}

impl Track {
    pub(crate) fn from_spec(spec: &TrackSpec, loaded: bool) -> Self {
        Self {
            id: spec.id.clone(),
            name: spec.name.clone(),
            source: spec.source.clone(),
            kind: spec.kind,
            loaded,
            volume: clamp_volume(spec.volume),
            muted: spec.muted,
        }
    }

    /// What the track should currently sound at: 0 while muted.
    pub fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    pub fn is_click(&self) -> bool {
        self.kind == TrackKind::Click
    }
}

/// Clamps a volume into [0, 1]. NaN is treated as silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}
