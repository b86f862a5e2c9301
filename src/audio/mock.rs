//! In-memory sound backend for engine and scene tests.
//!
//! Positions advance with tokio's clock, so paused-time tests can drive the
//! poll loop deterministically.

use super::backend::{Sound, SoundBackend, SoundStatus};
use crate::error::PlaybackError;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockOp {
    Play,
    Pause,
    Stop,
    Seek(u64),
    Volume(f32),
    Unload,
}

#[derive(Default)]
struct Shared {
    log: Mutex<Vec<(String, MockOp, Instant)>>,
    refuse_load: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    latency: Mutex<Duration>,
    duration_ms: Mutex<u64>,
    sounds: Mutex<HashMap<String, Arc<Mutex<Playhead>>>>,
}

#[derive(Debug, Default)]
struct Playhead {
    volume: f32,
    base_ms: u64,
    started: Option<Instant>,
    duration_ms: u64,
}

impl Playhead {
    fn position_ms(&self) -> u64 {
        let running = self
            .started
            .map(|at| at.elapsed().as_millis() as u64)
            .unwrap_or(0);
        (self.base_ms + running).min(self.duration_ms)
    }
}

#[derive(Clone, Default)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl MockBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        backend.set_duration(180_000);
        backend
    }

    /// Makes `load` fail for this source.
    pub fn refuse_load(&self, source: &str) {
        self.shared.refuse_load.lock().insert(source.to_string());
    }

    /// Makes every command except `status` and `unload` fail for this source.
    pub fn fail_commands(&self, source: &str) {
        self.shared.failing.lock().insert(source.to_string());
    }

    /// Delay applied to every command, to observe fan-out concurrency.
    pub fn set_latency(&self, latency: Duration) {
        *self.shared.latency.lock() = latency;
    }

    /// Duration reported by sounds loaded afterwards.
    pub fn set_duration(&self, duration_ms: u64) {
        *self.shared.duration_ms.lock() = duration_ms;
    }

    pub fn ops(&self, source: &str) -> Vec<MockOp> {
        self.shared
            .log
            .lock()
            .iter()
            .filter(|(s, _, _)| s == source)
            .map(|(_, op, _)| *op)
            .collect()
    }

    /// Every command with the time it completed.
    pub fn timeline(&self) -> Vec<(String, MockOp, Instant)> {
        self.shared.log.lock().clone()
    }

    pub fn clear_log(&self) {
        self.shared.log.lock().clear();
    }

    pub fn volume(&self, source: &str) -> Option<f32> {
        let sounds = self.shared.sounds.lock();
        sounds.get(source).map(|p| p.lock().volume)
    }

    pub fn is_playing(&self, source: &str) -> bool {
        let sounds = self.shared.sounds.lock();
        sounds
            .get(source)
            .map(|p| p.lock().started.is_some())
            .unwrap_or(false)
    }

    pub fn position(&self, source: &str) -> Option<u64> {
        let sounds = self.shared.sounds.lock();
        sounds.get(source).map(|p| p.lock().position_ms())
    }
}

pub struct MockSound {
    source: String,
    shared: Arc<Shared>,
    playhead: Arc<Mutex<Playhead>>,
}

impl MockSound {
    async fn command(
        &self,
        name: &'static str,
        op: MockOp,
        apply: impl FnOnce(&mut Playhead),
    ) -> Result<(), PlaybackError> {
        let latency = *self.shared.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if op != MockOp::Unload && self.shared.failing.lock().contains(&self.source) {
            return Err(PlaybackError::command(name, "injected failure"));
        }
        apply(&mut self.playhead.lock());
        self.shared
            .log
            .lock()
            .push((self.source.clone(), op, Instant::now()));
        Ok(())
    }
}

impl SoundBackend for MockBackend {
    type Sound = MockSound;

    async fn load(&self, source: &str) -> Result<MockSound, PlaybackError> {
        if self.shared.refuse_load.lock().contains(source) {
            return Err(PlaybackError::Load {
                uri: source.to_string(),
                reason: "no such file".to_string(),
            });
        }
        let playhead = Arc::new(Mutex::new(Playhead {
            volume: 1.0,
            duration_ms: *self.shared.duration_ms.lock(),
            ..Playhead::default()
        }));
        self.shared
            .sounds
            .lock()
            .insert(source.to_string(), Arc::clone(&playhead));
        Ok(MockSound {
            source: source.to_string(),
            shared: Arc::clone(&self.shared),
            playhead,
        })
    }
}

impl Sound for MockSound {
    async fn play(&self) -> Result<(), PlaybackError> {
        self.command("play", MockOp::Play, |p| {
            if p.started.is_none() {
                p.started = Some(Instant::now());
            }
        })
        .await
    }

    async fn pause(&self) -> Result<(), PlaybackError> {
        self.command("pause", MockOp::Pause, |p| {
            p.base_ms = p.position_ms();
            p.started = None;
        })
        .await
    }

    async fn stop(&self) -> Result<(), PlaybackError> {
        self.command("stop", MockOp::Stop, |p| {
            p.base_ms = 0;
            p.started = None;
        })
        .await
    }

    async fn seek(&self, position_ms: u64) -> Result<(), PlaybackError> {
        self.command("seek", MockOp::Seek(position_ms), |p| {
            p.base_ms = position_ms.min(p.duration_ms);
            if p.started.is_some() {
                p.started = Some(Instant::now());
            }
        })
        .await
    }

    async fn set_volume(&self, volume: f32) -> Result<(), PlaybackError> {
        self.command("set_volume", MockOp::Volume(volume), |p| p.volume = volume)
            .await
    }

    async fn status(&self) -> Result<SoundStatus, PlaybackError> {
        let playhead = self.playhead.lock();
        Ok(SoundStatus {
            position_ms: playhead.position_ms(),
            duration_ms: playhead.duration_ms,
            playing: playhead.started.is_some(),
        })
    }

    async fn unload(&self) -> Result<(), PlaybackError> {
        self.command("unload", MockOp::Unload, |p| p.started = None)
            .await
    }
}
