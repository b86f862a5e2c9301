//! Phase-aligned multi-track playback.
//!
//! Every command that touches more than one track is issued to all of them
//! at once and awaited as a group (fan-out/fan-in), so stems never drift
//! apart by the latency of the tracks before them. Muting is done with
//! volume only; a muted track keeps running silently and never needs to be
//! re-synced.

use super::backend::{Sound, SoundBackend};
use super::track::{clamp_volume, Track, TrackId, TrackSpec};
use crate::bus::{EventBus, Subscription};
use crate::error::PlaybackError;
use crate::scene::{Scene, TransitionKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// How often the playhead is sampled while playing.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Playback auto-stops once the playhead is this close to the end.
pub const END_MARGIN_MS: u64 = 100;

/// Number of volume steps in a fade.
pub const FADE_STEPS: u32 = 10;

/// Represents the current playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Not playing, position reset to start.
    #[default]
    Stopped,
    /// Currently playing.
    Playing,
    /// Paused at current position.
    Paused,
}

/// One sample of the playhead, taken from the first loaded track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionUpdate {
    /// Playhead position in milliseconds.
    pub position_ms: u64,
    /// Length of the reference track in milliseconds.
    pub duration_ms: u64,
}

/// A command that one track rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackFault {
    /// Track that failed.
    pub track_id: TrackId,
    /// Operation name, e.g. `"play"` or `"panic fade"`.
    pub op: &'static str,
    /// Error reported by the backend.
    pub error: PlaybackError,
}

/// Events published on the engine's bus.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Playhead sample from the poll loop, or the target of a seek.
    Position(PositionUpdate),
    /// Emitted only when the state actually changes.
    PlaybackChanged(PlaybackState),
    /// A single track rejected a command.
    TrackFault(TrackFault),
}

/// Outcome of one fan-out. Faults never abort the other tracks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpReport {
    /// Tracks that completed the command.
    pub applied: usize,
    pub faults: Vec<TrackFault>,
}

impl OpReport {
    /// Returns true if no track reported a fault.
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }

    fn merge(&mut self, other: OpReport) {
        self.applied += other.applied;
        self.faults.extend(other.faults);
    }
}

struct Slot<S> {
    track: Track,
    sound: Option<Arc<S>>,
    /// Restored on unmute when the level was pulled to 0.
    last_nonzero: f32,
    /// Last volume sent to the sound.
    applied: f32,
}

impl<S> Slot<S> {
    fn new(spec: &TrackSpec, sound: Option<S>) -> Self {
        let track = Track::from_spec(spec, sound.is_some());
        let last_nonzero = if track.volume > 0.0 { track.volume } else { 1.0 };
        let applied = track.effective_volume();
        Self {
            track,
            sound: sound.map(Arc::new),
            last_nonzero,
            applied,
        }
    }

    fn set_muted(&mut self, muted: bool) {
        if !muted && self.track.volume == 0.0 {
            self.track.volume = self.last_nonzero;
        }
        self.track.muted = muted;
    }

    fn set_level(&mut self, volume: f32) {
        self.track.volume = volume;
        if volume > 0.0 {
            self.last_nonzero = volume;
        }
    }

    /// Records the effective volume as applied and returns the command
    /// target `(id, sound, from, to)` if the track is loaded.
    fn retarget(&mut self) -> Option<VolumeTarget<S>> {
        let sound = Arc::clone(self.sound.as_ref()?);
        let from = self.applied;
        let to = self.track.effective_volume();
        self.applied = to;
        Some((self.track.id.clone(), sound, from, to))
    }

    fn handle(&self) -> Option<(TrackId, Arc<S>)> {
        let sound = Arc::clone(self.sound.as_ref()?);
        Some((self.track.id.clone(), sound))
    }
}

type VolumeTarget<S> = (TrackId, Arc<S>, f32, f32);

/// Snapshot of the mix generation taken when a volume ramp starts.
struct MixGuard {
    counter: Arc<AtomicU64>,
    generation: u64,
}

impl MixGuard {
    fn is_current(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == self.generation
    }
}

struct EngineInner<B: SoundBackend> {
    backend: B,
    slots: Mutex<Vec<Slot<B::Sound>>>,
    state: Mutex<PlaybackState>,
    duration_ms: AtomicU64,
    poll: Mutex<Option<JoinHandle<()>>>,
    poll_generation: AtomicU64,
    poll_interval: Duration,
    /// Mute flags from before click-only mode was entered.
    saved_mutes: Mutex<Option<HashMap<TrackId, bool>>>,
    /// Bumped by every panic stop. Ramps started under an older value
    /// stop before their next step.
    mix_generation: Arc<AtomicU64>,
    panic_lock: tokio::sync::Mutex<()>,
    events: EventBus<EngineEvent>,
}

impl<B: SoundBackend> Drop for EngineInner<B> {
    fn drop(&mut self) {
        if let Some(task) = self.poll.get_mut().take() {
            task.abort();
        }
    }
}

/// Steps a sound's volume from `from` to `to` over `duration`.
///
/// Gives up without touching the volume again once `guard` is stale.
async fn ramp<S: Sound>(
    sound: Arc<S>,
    from: f32,
    to: f32,
    duration: Duration,
    guard: MixGuard,
) -> Result<(), PlaybackError> {
    let step = duration / FADE_STEPS;
    for i in 1..=FADE_STEPS {
        if !step.is_zero() {
            tokio::time::sleep(step).await;
        }
        if !guard.is_current() {
            tracing::debug!(step = i, "volume ramp superseded");
            return Ok(());
        }
        let level = from + (to - from) * (i as f32 / FADE_STEPS as f32);
        sound.set_volume(clamp_volume(level)).await?;
    }
    Ok(())
}

/// Drives every loaded track of one song.
///
/// Cloning is cheap; all clones control the same tracks.
pub struct AudioEngine<B: SoundBackend> {
    inner: Arc<EngineInner<B>>,
}

impl<B: SoundBackend> Clone for AudioEngine<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: SoundBackend> AudioEngine<B> {
    /// Creates an empty engine that samples the playhead every 100 ms.
    pub fn new(backend: B) -> Self {
        Self::with_poll_interval(backend, DEFAULT_POLL_INTERVAL)
    }

    /// Creates an empty engine with a custom playhead sampling period.
    pub fn with_poll_interval(backend: B, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                backend,
                slots: Mutex::new(Vec::new()),
                state: Mutex::new(PlaybackState::Stopped),
                duration_ms: AtomicU64::new(0),
                poll: Mutex::new(None),
                poll_generation: AtomicU64::new(0),
                poll_interval,
                saved_mutes: Mutex::new(None),
                mix_generation: Arc::new(AtomicU64::new(0)),
                panic_lock: tokio::sync::Mutex::new(()),
                events: EventBus::new(),
            }),
        }
    }

    // ==================== Events ====================

    /// Subscribes to every engine event.
    ///
    /// Handlers run on the task that caused the event and must not block.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    /// Subscribes to the `{position, duration}` feed only.
    pub fn subscribe_positions<F>(&self, handler: F) -> Subscription
    where
        F: Fn(PositionUpdate) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(move |event| {
            if let EngineEvent::Position(update) = event {
                handler(*update);
            }
        })
    }

    // ==================== Queries ====================

    /// Returns the current playback state.
    pub fn state(&self) -> PlaybackState {
        *self.inner.state.lock()
    }

    /// Returns true if currently playing.
    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// Snapshot of every track in load order, including ones that failed to load.
    pub fn tracks(&self) -> Vec<Track> {
        self.inner.slots.lock().iter().map(|s| s.track.clone()).collect()
    }

    /// Snapshot of a single track.
    pub fn track(&self, id: &TrackId) -> Option<Track> {
        let slots = self.inner.slots.lock();
        slots.iter().find(|s| s.track.id == *id).map(|s| s.track.clone())
    }

    /// Duration reported by the last position sample, 0 before the first.
    pub fn duration_ms(&self) -> u64 {
        self.inner.duration_ms.load(Ordering::Relaxed)
    }

    // ==================== Loading ====================

    /// Loads every track concurrently, replacing the current set.
    ///
    /// Tracks that fail to load stay in the table with `loaded == false`
    /// and are skipped by every later command.
    pub async fn load_tracks(&self, specs: Vec<TrackSpec>) -> OpReport {
        self.unload_all().await;

        let mut set = JoinSet::new();
        for (index, spec) in specs.iter().enumerate() {
            let inner = Arc::clone(&self.inner);
            let source = spec.source.clone();
            let volume = if spec.muted {
                0.0
            } else {
                clamp_volume(spec.volume)
            };
            set.spawn(async move {
                let result = async {
                    let sound = inner.backend.load(&source).await?;
                    sound.set_volume(volume).await?;
                    Ok::<_, PlaybackError>(sound)
                }
                .await;
                (index, result)
            });
        }

        let mut sounds: Vec<Option<B::Sound>> = specs.iter().map(|_| None).collect();
        let mut report = OpReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, Ok(sound))) => {
                    sounds[index] = Some(sound);
                    report.applied += 1;
                }
                Ok((index, Err(error))) => {
                    self.record_fault(&mut report, "load", specs[index].id.clone(), error);
                }
                Err(e) => tracing::error!(error = %e, "track load task failed"),
            }
        }

        let slots: Vec<_> = specs
            .iter()
            .zip(sounds)
            .map(|(spec, sound)| Slot::new(spec, sound))
            .collect();
        *self.inner.slots.lock() = slots;
        tracing::info!(
            loaded = report.applied,
            failed = report.faults.len(),
            "tracks loaded"
        );
        report
    }

    /// Stops the poll loop and releases every track.
    pub async fn unload_all(&self) -> OpReport {
        self.halt_poll(true);
        let slots = std::mem::take(&mut *self.inner.slots.lock());
        *self.inner.saved_mutes.lock() = None;
        let jobs: Vec<_> = slots
            .into_iter()
            .filter_map(|slot| {
                let sound = slot.sound?;
                Some((slot.track.id, async move { sound.unload().await }))
            })
            .collect();
        let report = self.fan_out("unload", jobs).await;
        self.set_state(PlaybackState::Stopped);
        report
    }

    // ==================== Transport ====================

    /// Starts every loaded track together, muted ones at volume 0.
    ///
    /// Each track's volume is re-applied first, so playing after a panic
    /// stop is audible again.
    pub async fn play(&self) -> OpReport {
        let jobs: Vec<_> = {
            let mut slots = self.inner.slots.lock();
            slots
                .iter_mut()
                .filter_map(|slot| {
                    let (id, sound, _, volume) = slot.retarget()?;
                    Some((id, async move {
                        sound.set_volume(volume).await?;
                        sound.play().await
                    }))
                })
                .collect()
        };
        if jobs.is_empty() {
            tracing::warn!("play requested with no loaded tracks");
            return OpReport::default();
        }
        let report = self.fan_out("play", jobs).await;
        self.set_state(PlaybackState::Playing);
        self.start_poll();
        report
    }

    /// Pauses every track in place and stops the position feed.
    pub async fn pause(&self) -> OpReport {
        self.halt_poll(true);
        let jobs = self.each_loaded(|sound| async move { sound.pause().await });
        let report = self.fan_out("pause", jobs).await;
        self.set_state(PlaybackState::Paused);
        report
    }

    /// Stops and rewinds every track.
    pub async fn stop(&self) -> OpReport {
        self.halt_poll(true);
        self.stop_tracks().await
    }

    /// Moves every track's playhead to `position_ms`.
    pub async fn seek(&self, position_ms: u64) -> OpReport {
        let jobs = self.each_loaded(move |sound| async move { sound.seek(position_ms).await });
        let report = self.fan_out("seek", jobs).await;
        self.inner.events.emit(&EngineEvent::Position(PositionUpdate {
            position_ms,
            duration_ms: self.duration_ms(),
        }));
        report
    }

    // ==================== Mixing ====================

    /// Mutes by volume, or restores the track's level on unmute.
    pub async fn set_track_mute(&self, id: &TrackId, muted: bool) -> OpReport {
        let target = {
            let mut slots = self.inner.slots.lock();
            match slots.iter_mut().find(|s| s.track.id == *id) {
                Some(slot) => {
                    slot.set_muted(muted);
                    slot.retarget()
                }
                None => {
                    tracing::debug!(track = %id, "mute for unknown track ignored");
                    None
                }
            }
        };
        self.apply_volumes("mute", target.into_iter().collect(), None)
            .await
    }

    /// Sets a track's level. A muted track keeps silent until unmuted.
    pub async fn set_track_volume(&self, id: &TrackId, volume: f32) -> OpReport {
        let volume = clamp_volume(volume);
        let target = {
            let mut slots = self.inner.slots.lock();
            slots
                .iter_mut()
                .find(|s| s.track.id == *id)
                .and_then(|slot| {
                    slot.set_level(volume);
                    slot.retarget()
                })
        };
        self.apply_volumes("volume", target.into_iter().collect(), None)
            .await
    }

    /// Mutes every stem outside the scene's active set and switches click
    /// and guide by the scene's flags, on all tracks at once.
    pub async fn apply_scene(&self, scene: &Scene) -> OpReport {
        let targets: Vec<_> = {
            let mut slots = self.inner.slots.lock();
            slots
                .iter_mut()
                .filter_map(|slot| {
                    let enabled = scene.enables(&slot.track);
                    slot.set_muted(!enabled);
                    slot.retarget()
                })
                .collect()
        };
        let fade = match scene.transition.kind {
            TransitionKind::Fade if scene.transition.duration_ms > 0 => {
                Some(Duration::from_millis(scene.transition.duration_ms))
            }
            _ => None,
        };
        let report = self.apply_volumes("scene", targets, fade).await;
        tracing::info!(scene = %scene.name, faults = report.faults.len(), "scene applied");
        report
    }

    /// Mutes every non-click track and forces the click on.
    pub async fn click_only_mode(&self) -> OpReport {
        let targets: Vec<_> = {
            let mut saved = self.inner.saved_mutes.lock();
            let mut slots = self.inner.slots.lock();
            if saved.is_none() {
                *saved = Some(
                    slots
                        .iter()
                        .map(|s| (s.track.id.clone(), s.track.muted))
                        .collect(),
                );
            }
            slots
                .iter_mut()
                .filter_map(|slot| {
                    let click = slot.track.is_click();
                    slot.set_muted(!click);
                    slot.retarget()
                })
                .collect()
        };
        self.apply_volumes("click only", targets, None).await
    }

    /// Leaves click-only mode, restoring the mute flags saved on entry. With
    /// nothing saved, every track is unmuted.
    pub async fn restore_all_tracks(&self) -> OpReport {
        let targets: Vec<_> = {
            let saved = self.inner.saved_mutes.lock().take();
            let mut slots = self.inner.slots.lock();
            slots
                .iter_mut()
                .filter_map(|slot| {
                    let muted = saved
                        .as_ref()
                        .and_then(|m| m.get(&slot.track.id).copied())
                        .unwrap_or(false);
                    slot.set_muted(muted);
                    slot.retarget()
                })
                .collect()
        };
        self.apply_volumes("restore", targets, None).await
    }

    // ==================== Emergency ====================

    /// Fades every track to silence in parallel, then hard-stops them all.
    ///
    /// Calls are serialized. A call that finds playback already stopped and
    /// every track silent returns without fading again. Scene fades still
    /// running are abandoned at their next step and never raise a volume
    /// after this returns.
    pub async fn panic_stop(&self, fade_ms: u64) -> OpReport {
        let _serial = self.inner.panic_lock.lock().await;
        self.halt_poll(true);
        self.inner.mix_generation.fetch_add(1, Ordering::SeqCst);

        let targets: Vec<(TrackId, Arc<B::Sound>, f32)> = {
            let mut slots = self.inner.slots.lock();
            slots
                .iter_mut()
                .filter_map(|slot| {
                    let (id, sound) = slot.handle()?;
                    let from = std::mem::replace(&mut slot.applied, 0.0);
                    Some((id, sound, from))
                })
                .collect()
        };
        let silent = targets.iter().all(|(_, _, from)| *from == 0.0);
        if silent && self.state() != PlaybackState::Playing {
            tracing::debug!("panic stop: already silent");
            return OpReport::default();
        }

        tracing::warn!(fade_ms, tracks = targets.len(), "panic stop");
        let fade = Duration::from_millis(fade_ms);
        let fades = targets
            .iter()
            .map(|(id, sound, from)| {
                let ramp = ramp(Arc::clone(sound), *from, 0.0, fade, self.mix_guard());
                (id.clone(), ramp)
            });
        let mut report = self.fan_out("panic fade", fades).await;
        let stops = targets
            .into_iter()
            .map(|(id, sound, _)| (id, async move { sound.stop().await }));
        report.merge(self.fan_out("panic stop", stops).await);
        self.set_state(PlaybackState::Stopped);
        report
    }

    // ==================== Internals ====================

    fn each_loaded<F, Fut>(&self, command: F) -> Vec<(TrackId, Fut)>
    where
        F: Fn(Arc<B::Sound>) -> Fut,
    {
        let slots = self.inner.slots.lock();
        slots
            .iter()
            .filter_map(|slot| slot.handle())
            .map(|(id, sound)| (id, command(sound)))
            .collect()
    }

    async fn apply_volumes(
        &self,
        op: &'static str,
        targets: Vec<VolumeTarget<B::Sound>>,
        fade: Option<Duration>,
    ) -> OpReport {
        match fade {
            Some(duration) => {
                let jobs = targets.into_iter().map(|(id, sound, from, to)| {
                    (id, ramp(sound, from, to, duration, self.mix_guard()))
                });
                self.fan_out(op, jobs).await
            }
            None => {
                let jobs = targets
                    .into_iter()
                    .map(|(id, sound, _, to)| (id, async move { sound.set_volume(to).await }));
                self.fan_out(op, jobs).await
            }
        }
    }

    fn mix_guard(&self) -> MixGuard {
        let counter = Arc::clone(&self.inner.mix_generation);
        let generation = counter.load(Ordering::SeqCst);
        MixGuard {
            counter,
            generation,
        }
    }

    /// Issues every job at once and waits for all of them.
    async fn fan_out<Fut>(
        &self,
        op: &'static str,
        jobs: impl IntoIterator<Item = (TrackId, Fut)>,
    ) -> OpReport
    where
        Fut: Future<Output = Result<(), PlaybackError>> + Send + 'static,
    {
        let mut set = JoinSet::new();
        for (id, job) in jobs {
            set.spawn(async move { (id, job.await) });
        }
        let mut report = OpReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.applied += 1,
                Ok((id, Err(error))) => self.record_fault(&mut report, op, id, error),
                Err(e) => tracing::error!(op, error = %e, "track task failed"),
            }
        }
        report
    }

    fn record_fault(
        &self,
        report: &mut OpReport,
        op: &'static str,
        track_id: TrackId,
        error: PlaybackError,
    ) {
        tracing::warn!(op, track = %track_id, error = %error, "track command failed");
        let fault = TrackFault {
            track_id,
            op,
            error,
        };
        self.inner
            .events
            .emit(&EngineEvent::TrackFault(fault.clone()));
        report.faults.push(fault);
    }

    fn set_state(&self, state: PlaybackState) {
        let changed = {
            let mut current = self.inner.state.lock();
            std::mem::replace(&mut *current, state) != state
        };
        if changed {
            self.inner.events.emit(&EngineEvent::PlaybackChanged(state));
        }
    }

    async fn stop_tracks(&self) -> OpReport {
        let jobs = self.each_loaded(|sound| async move { sound.stop().await });
        let report = self.fan_out("stop", jobs).await;
        self.set_state(PlaybackState::Stopped);
        report
    }

    fn start_poll(&self) {
        let generation = self.inner.poll_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let period = self.inner.poll_interval;
        let weak: Weak<EngineInner<B>> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let engine = AudioEngine { inner };
                if !engine.poll_once(generation).await {
                    break;
                }
            }
        });
        if let Some(previous) = self.inner.poll.lock().replace(task) {
            previous.abort();
        }
    }

    /// Invalidates the running poll loop. The loop itself passes
    /// `abort = false` so it is not cancelled halfway through its own stop.
    fn halt_poll(&self, abort: bool) {
        self.inner.poll_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.inner.poll.lock().take() {
            if abort {
                task.abort();
            }
        }
    }

    fn is_current_poll(&self, generation: u64) -> bool {
        self.inner.poll_generation.load(Ordering::SeqCst) == generation
    }

    /// Samples the first loaded track. Returns false when the loop should end.
    async fn poll_once(&self, generation: u64) -> bool {
        if !self.is_current_poll(generation) {
            return false;
        }
        let reference = {
            let slots = self.inner.slots.lock();
            slots.iter().find_map(|slot| slot.handle())
        };
        let Some((track_id, sound)) = reference else {
            return false;
        };
        let status = match sound.status().await {
            Ok(status) => status,
            Err(e) => {
                tracing::debug!(track = %track_id, error = %e, "position sample failed");
                return true;
            }
        };
        if !self.is_current_poll(generation) {
            return false;
        }

        self.inner
            .duration_ms
            .store(status.duration_ms, Ordering::Relaxed);
        self.inner.events.emit(&EngineEvent::Position(PositionUpdate {
            position_ms: status.position_ms,
            duration_ms: status.duration_ms,
        }));

        if status.duration_ms > 0 && status.position_ms + END_MARGIN_MS >= status.duration_ms {
            tracing::info!(
                position_ms = status.position_ms,
                duration_ms = status.duration_ms,
                "end of song reached"
            );
            self.halt_poll(false);
            self.stop_tracks().await;
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::{MockBackend, MockOp};
    use crate::audio::TrackKind;
    use crate::scene::{Scene, Transition};
    use approx::assert_relative_eq;

    fn specs() -> Vec<TrackSpec> {
        vec![
            TrackSpec::stem("drums", "drums.wav"),
            TrackSpec::stem("bass", "bass.wav"),
            TrackSpec::stem("keys", "keys.wav"),
            TrackSpec::new("click", "Click", "click.wav", TrackKind::Click),
            TrackSpec::new("guide", "Guide", "guide.wav", TrackKind::Guide),
        ]
    }

    async fn loaded_engine() -> (AudioEngine<MockBackend>, MockBackend) {
        let backend = MockBackend::new();
        let engine = AudioEngine::new(backend.clone());
        let report = engine.load_tracks(specs()).await;
        assert!(report.is_clean());
        backend.clear_log();
        (engine, backend)
    }

    fn muted(engine: &AudioEngine<MockBackend>) -> Vec<(String, bool)> {
        engine
            .tracks()
            .into_iter()
            .map(|t| (t.id.to_string(), t.muted))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_reaches_every_track_concurrently() {
        let (engine, backend) = loaded_engine().await;
        backend.set_latency(Duration::from_millis(40));
        let started = Instant::now();
        let report = engine.play().await;
        // Volume then play, 40 ms each, all tracks in parallel.
        assert_eq!(started.elapsed(), Duration::from_millis(80));
        assert_eq!(report.applied, 5);
        assert!(engine.is_playing());
        for source in ["drums.wav", "bass.wav", "keys.wav", "click.wav", "guide.wav"] {
            assert!(backend.is_playing(source));
        }
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_muted_track_plays_silently() {
        let (engine, backend) = loaded_engine().await;
        engine.set_track_mute(&"keys".into(), true).await;
        engine.play().await;
        assert!(backend.is_playing("keys.wav"));
        assert_eq!(backend.volume("keys.wav"), Some(0.0));

        engine.set_track_mute(&"keys".into(), false).await;
        assert_eq!(backend.volume("keys.wav"), Some(1.0));
        // Unmuting never touches the playhead.
        assert!(!backend
            .ops("keys.wav")
            .iter()
            .any(|op| matches!(op, MockOp::Seek(_) | MockOp::Stop)));
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmute_restores_last_nonzero_level() {
        let (engine, backend) = loaded_engine().await;
        engine.set_track_volume(&"bass".into(), 0.6).await;
        engine.set_track_volume(&"bass".into(), 0.0).await;
        engine.set_track_mute(&"bass".into(), true).await;
        engine.set_track_mute(&"bass".into(), false).await;
        assert_relative_eq!(backend.volume("bass.wav").unwrap(), 0.6);

        engine.set_track_mute(&"bass".into(), true).await;
        engine.set_track_volume(&"bass".into(), 0.3).await;
        assert_eq!(backend.volume("bass.wav"), Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_applies_to_every_track() {
        let (engine, backend) = loaded_engine().await;
        engine.seek(42_000).await;
        for source in ["drums.wav", "click.wav"] {
            assert_eq!(backend.ops(source), vec![MockOp::Seek(42_000)]);
            assert_eq!(backend.position(source), Some(42_000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_stop_with_zero_fade() {
        let (engine, backend) = loaded_engine().await;
        engine.play().await;
        let report = engine.panic_stop(0).await;
        assert!(report.is_clean());
        assert!(!engine.is_playing());
        for source in ["drums.wav", "bass.wav", "keys.wav", "click.wav", "guide.wav"] {
            assert_eq!(backend.volume(source), Some(0.0));
            assert!(!backend.is_playing(source));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_stop_fades_in_ten_steps() {
        let (engine, backend) = loaded_engine().await;
        engine.play().await;
        backend.clear_log();

        let started = Instant::now();
        engine.panic_stop(500).await;
        assert_eq!(started.elapsed(), Duration::from_millis(500));

        let volumes: Vec<f32> = backend
            .ops("drums.wav")
            .into_iter()
            .filter_map(|op| match op {
                MockOp::Volume(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(volumes.len(), 10);
        assert_relative_eq!(volumes[0], 0.9);
        assert_relative_eq!(volumes[4], 0.5);
        assert_eq!(volumes[9], 0.0);
        assert_eq!(backend.ops("drums.wav").last(), Some(&MockOp::Stop));

        // The fade ran on all tracks side by side.
        let timeline = backend.timeline();
        let first_step: Vec<_> = timeline
            .iter()
            .filter(|(_, op, _)| matches!(op, MockOp::Volume(v) if (v - 0.9).abs() < 1e-6))
            .map(|(_, _, at)| *at)
            .collect();
        assert_eq!(first_step.len(), 5);
        assert!(first_step.iter().all(|at| *at == first_step[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_panic_stops_fade_once() {
        let (engine, backend) = loaded_engine().await;
        engine.play().await;
        backend.clear_log();

        let (first, second) = tokio::join!(engine.panic_stop(200), engine.panic_stop(200));
        assert_eq!(first.applied, 10);
        assert_eq!(second, OpReport::default());
        assert_eq!(
            backend
                .ops("bass.wav")
                .iter()
                .filter(|op| **op == MockOp::Stop)
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_after_panic_is_audible() {
        let (engine, backend) = loaded_engine().await;
        engine.set_track_volume(&"drums".into(), 0.8).await;
        engine.play().await;
        engine.panic_stop(0).await;
        engine.play().await;
        assert_relative_eq!(backend.volume("drums.wav").unwrap(), 0.8);
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_scene_mutes_outside_active_set() {
        let (engine, backend) = loaded_engine().await;
        let mut scene = Scene::new("verse", "Verse", "Verse", ["drums", "bass"]);
        scene.click_enabled = true;
        scene.guide_enabled = false;

        let report = engine.apply_scene(&scene).await;
        assert_eq!(report.applied, 5);
        assert_eq!(
            muted(&engine),
            vec![
                ("drums".to_string(), false),
                ("bass".to_string(), false),
                ("keys".to_string(), true),
                ("click".to_string(), false),
                ("guide".to_string(), true),
            ]
        );
        assert_eq!(backend.volume("keys.wav"), Some(0.0));
        assert_eq!(backend.volume("guide.wav"), Some(0.0));
        assert_eq!(backend.volume("drums.wav"), Some(1.0));
    }

    fn fade_scene(duration_ms: u64) -> Scene {
        let mut scene = Scene::new("full", "Full band", "Chorus", ["drums", "bass", "keys"]);
        scene.transition = Transition {
            kind: TransitionKind::Fade,
            duration_ms,
        };
        scene
    }

    #[tokio::test(start_paused = true)]
    async fn test_fade_scene_ramps_in_ten_steps() {
        let (engine, backend) = loaded_engine().await;
        engine.set_track_mute(&"keys".into(), true).await;
        backend.clear_log();

        let started = Instant::now();
        let report = engine.apply_scene(&fade_scene(500)).await;
        assert_eq!(started.elapsed(), Duration::from_millis(500));
        assert_eq!(report.applied, 5);

        let timeline: Vec<(f32, Instant)> = backend
            .timeline()
            .into_iter()
            .filter(|(source, _, _)| source == "keys.wav")
            .filter_map(|(_, op, at)| match op {
                MockOp::Volume(v) => Some((v, at)),
                _ => None,
            })
            .collect();
        assert_eq!(timeline.len(), 10);
        assert_relative_eq!(timeline[0].0, 0.1);
        assert_relative_eq!(timeline[4].0, 0.5);
        assert_relative_eq!(timeline[9].0, 1.0);
        for (step, (_, at)) in timeline.iter().enumerate() {
            assert_eq!(*at - started, Duration::from_millis(50 * (step as u64 + 1)));
        }
        assert!(!engine.track(&"keys".into()).unwrap().muted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_stop_cancels_running_scene_fade() {
        let (engine, backend) = loaded_engine().await;
        engine.set_track_mute(&"keys".into(), true).await;
        engine.play().await;

        let fading = engine.clone();
        let scene = fade_scene(1_000);
        let fade = tokio::spawn(async move { fading.apply_scene(&scene).await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        engine.panic_stop(0).await;
        fade.await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        assert!(!engine.is_playing());
        for source in ["drums.wav", "bass.wav", "keys.wav", "click.wav", "guide.wav"] {
            assert_eq!(backend.volume(source), Some(0.0), "{source}");
            assert!(!backend.is_playing(source));
        }

        // The scene still counts as applied; the next play brings it in.
        engine.play().await;
        assert_eq!(backend.volume("keys.wav"), Some(1.0));
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_only_then_restore() {
        let (engine, backend) = loaded_engine().await;
        engine.set_track_mute(&"guide".into(), true).await;
        engine.set_track_mute(&"click".into(), true).await;
        let before = muted(&engine);

        engine.click_only_mode().await;
        for (id, is_muted) in muted(&engine) {
            assert_eq!(is_muted, id != "click");
        }
        assert_eq!(backend.volume("click.wav"), Some(1.0));

        engine.restore_all_tracks().await;
        assert_eq!(muted(&engine), before);

        engine.restore_all_tracks().await;
        assert!(muted(&engine).iter().all(|(_, m)| !m));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_track_does_not_block_others() {
        let backend = MockBackend::new();
        backend.refuse_load("keys.wav");
        let engine = AudioEngine::new(backend.clone());

        let faults = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&faults);
        let _sub = engine.subscribe(move |event| {
            if let EngineEvent::TrackFault(fault) = event {
                seen.lock().push(fault.track_id.to_string());
            }
        });

        let report = engine.load_tracks(specs()).await;
        assert_eq!(report.applied, 4);
        assert_eq!(report.faults.len(), 1);
        assert!(!engine.track(&"keys".into()).unwrap().loaded);

        backend.fail_commands("bass.wav");
        let report = engine.play().await;
        assert_eq!(report.applied, 3);
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].track_id.as_str(), "bass");
        assert_eq!(report.faults[0].op, "play");
        assert!(backend.is_playing("drums.wav"));
        assert!(!backend.is_playing("bass.wav"));
        assert!(engine.is_playing());
        assert_eq!(*faults.lock(), vec!["keys".to_string(), "bass".to_string()]);
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_reports_position_and_auto_stops() {
        let backend = MockBackend::new();
        backend.set_duration(1_000);
        let engine = AudioEngine::new(backend.clone());
        engine.load_tracks(specs()).await;

        let positions = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&positions);
        let _sub = engine.subscribe_positions(move |update| seen.lock().push(update.position_ms));

        engine.play().await;
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(*positions.lock(), vec![100, 200, 300]);

        // 900 + 100 >= 1000 stops on the ninth sample.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(!engine.is_playing());
        assert_eq!(positions.lock().last(), Some(&900));
        assert!(!backend.is_playing("drums.wav"));
        assert_eq!(engine.duration_ms(), 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_halts_position_feed() {
        let (engine, _backend) = loaded_engine().await;
        let count = Arc::new(Mutex::new(0usize));
        let seen = Arc::clone(&count);
        let _sub = engine.subscribe_positions(move |_| *seen.lock() += 1);

        engine.play().await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        engine.pause().await;
        let after_pause = *count.lock();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*count.lock(), after_pause);
        assert_eq!(engine.state(), PlaybackState::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unload_all_releases_tracks() {
        let (engine, backend) = loaded_engine().await;
        engine.play().await;
        let report = engine.unload_all().await;
        assert_eq!(report.applied, 5);
        assert!(engine.tracks().is_empty());
        assert!(!engine.is_playing());
        assert_eq!(backend.ops("drums.wav").last(), Some(&MockOp::Unload));
    }
}
