//! Stem playback for live performance.
//!
//! This module drives N independently loaded audio files as one song:
//! - Phase-aligned play/pause/stop/seek across every track
//! - Volume-based muting and per-section scene application
//! - A position feed sampled while playing
//! - An emergency fade-and-stop
//!
//! Actual decoding and output is delegated to a [`SoundBackend`]; enable the
//! `playback` feature for the rodio implementation.

mod backend;
pub mod engine;
#[cfg(test)]
pub(crate) mod mock;
mod track;

pub use backend::{Sound, SoundBackend, SoundStatus};
#[cfg(feature = "playback")]
pub use backend::{RodioBackend, RodioSound};
pub use engine::{
    AudioEngine, EngineEvent, OpReport, PlaybackState, PositionUpdate, TrackFault,
    DEFAULT_POLL_INTERVAL,
};
pub use track::{clamp_volume, Track, TrackId, TrackKind, TrackSpec};
