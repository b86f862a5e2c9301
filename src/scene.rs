//! Section-bound scenes and the position-driven scene state machine.
//!
//! A scene says which stems sound during a section and whether click and
//! guide are on. The [`SceneManager`] follows the playhead (or manual
//! requests), looks up the section under it, and applies the bound scene
//! through the audio engine whenever it changes.

use crate::audio::{AudioEngine, SoundBackend, Track, TrackId, TrackKind};
use crate::bus::{EventBus, Subscription};
use crate::cue::CueEvent;
use crate::song::{Section, Song};
use crate::transport::timestamp_ms;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

/// How a scene change reaches the mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    /// Volumes jump at once.
    #[default]
    Cut,
    /// Volumes ramp over `duration_ms`.
    Fade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub kind: TransitionKind,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Flags for downstream gear. `send_cues` gates the section cue; neither
/// affects the mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Routing {
    pub send_cues: bool,
    pub send_clock: bool,
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            send_cues: true,
            send_clock: true,
        }
    }
}

/// A named mix configuration tied to a song section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: String,
    pub name: String,
    /// Section label this scene is bound to, matched case-insensitively.
    pub section: String,
    pub active_tracks: HashSet<TrackId>,
    #[serde(default = "enabled")]
    pub click_enabled: bool,
    #[serde(default = "enabled")]
    pub guide_enabled: bool,
    #[serde(default)]
    pub routing: Routing,
    #[serde(default)]
    pub transition: Transition,
}

fn enabled() -> bool {
    true
}

impl Scene {
    pub fn new<I, T>(
        id: impl Into<String>,
        name: impl Into<String>,
        section: impl Into<String>,
        active_tracks: I,
    ) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TrackId>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            section: section.into(),
            active_tracks: active_tracks.into_iter().map(Into::into).collect(),
            click_enabled: true,
            guide_enabled: true,
            routing: Routing::default(),
            transition: Transition::default(),
        }
    }

    /// Whether `track` should sound under this scene.
    pub fn enables(&self, track: &Track) -> bool {
        match track.kind {
            TrackKind::Click => self.click_enabled,
            TrackKind::Guide => self.guide_enabled,
            TrackKind::Stem => self.active_tracks.contains(&track.id),
        }
    }

    pub fn is_bound_to(&self, section_name: &str) -> bool {
        self.section
            .trim()
            .eq_ignore_ascii_case(section_name.trim())
    }
}

/// Builds one scene per section with every stem active and click and guide on.
pub fn scenes_from_sections(sections: &[Section], tracks: &[Track]) -> Vec<Scene> {
    let stems: Vec<TrackId> = tracks
        .iter()
        .filter(|t| t.kind == TrackKind::Stem)
        .map(|t| t.id.clone())
        .collect();
    sections
        .iter()
        .enumerate()
        .map(|(index, section)| {
            Scene::new(
                format!("section-{}", index),
                section.name.clone(),
                section.name.clone(),
                stems.iter().cloned(),
            )
        })
        .collect()
}

/// Emitted whenever a scene becomes current.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneChange {
    /// The scene that was just applied.
    pub scene: Scene,
    pub song_title: String,
    /// Index of the section the scene is bound to, if the song has it.
    pub section_index: Option<usize>,
    pub section_name: Option<String>,
    /// Number of sections in the loaded song.
    pub total_sections: usize,
}

impl SceneChange {
    /// The cue this change should produce, if the scene routes cues and is
    /// bound to a section of the song.
    pub fn cue_event(&self) -> Option<CueEvent> {
        if !self.scene.routing.send_cues {
            return None;
        }
        Some(CueEvent {
            song_title: self.song_title.clone(),
            section_name: self.section_name.clone()?,
            section_index: self.section_index?,
            total_sections: self.total_sections,
            timestamp: timestamp_ms(),
        })
    }
}

struct Setlist {
    song: Song,
    scenes: Vec<Scene>,
}

impl Setlist {
    fn scene_for_section(&self, section_name: &str) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.is_bound_to(section_name))
    }

    fn section_index(&self, scene: &Scene) -> Option<usize> {
        self.song
            .sections
            .iter()
            .position(|s| scene.is_bound_to(&s.name))
    }
}

struct AutoTransition {
    _subscription: Subscription,
}

struct ManagerInner<B: SoundBackend> {
    engine: AudioEngine<B>,
    setlist: Mutex<Option<Arc<Setlist>>>,
    current: Mutex<Option<Scene>>,
    auto: Mutex<Option<AutoTransition>>,
    auto_generation: AtomicU64,
    apply_lock: tokio::sync::Mutex<()>,
    events: EventBus<SceneChange>,
}

/// Keeps the mix in step with the song structure.
pub struct SceneManager<B: SoundBackend> {
    inner: Arc<ManagerInner<B>>,
}

impl<B: SoundBackend> Clone for SceneManager<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: SoundBackend> SceneManager<B> {
    /// Creates a manager with no song loaded, driving `engine`.
    pub fn new(engine: AudioEngine<B>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                engine,
                setlist: Mutex::new(None),
                current: Mutex::new(None),
                auto: Mutex::new(None),
                auto_generation: AtomicU64::new(0),
                apply_lock: tokio::sync::Mutex::new(()),
                events: EventBus::new(),
            }),
        }
    }

    /// The engine scenes are applied through.
    pub fn engine(&self) -> &AudioEngine<B> {
        &self.inner.engine
    }

    /// Replaces the song and its scenes wholesale and clears the current scene.
    pub fn load_song(&self, song: Song, scenes: Vec<Scene>) {
        tracing::info!(song = %song.title, scenes = scenes.len(), "scenes loaded");
        let setlist = Arc::new(Setlist { song, scenes });
        *self.inner.setlist.lock() = Some(setlist);
        *self.inner.current.lock() = None;
    }

    /// Loads `song` with one default scene per section over the engine's
    /// current stems.
    pub fn load_song_with_default_scenes(&self, song: Song) {
        let scenes = scenes_from_sections(&song.sections, &self.inner.engine.tracks());
        self.load_song(song, scenes);
    }

    /// Snapshot of the loaded song.
    pub fn song(&self) -> Option<Song> {
        self.snapshot().map(|s| s.song.clone())
    }

    /// Snapshot of the loaded scenes, empty before the first song.
    pub fn scenes(&self) -> Vec<Scene> {
        self.snapshot()
            .map(|s| s.scenes.clone())
            .unwrap_or_default()
    }

    /// The scene last applied since the current song was loaded.
    pub fn current_scene(&self) -> Option<Scene> {
        self.inner.current.lock().clone()
    }

    /// Subscribes to scene changes. Handlers run after the engine has
    /// applied the scene.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SceneChange) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    /// Applies the scene bound to the section under `position_ms`.
    ///
    /// Returns the scene if it was applied. A position outside every
    /// section, a section with no scene, or the already-current scene all
    /// return `None` without touching the engine.
    pub async fn update_position(&self, position_ms: u64) -> Option<Scene> {
        self.follow_position(position_ms, None).await
    }

    /// Applies the scene with `id`.
    pub async fn apply_scene(&self, id: &str) -> Option<Scene> {
        let setlist = self.snapshot()?;
        let Some(scene) = setlist.scenes.iter().find(|s| s.id == id).cloned() else {
            tracing::debug!(scene = id, "no such scene");
            return None;
        };
        let section_index = setlist.section_index(&scene);
        self.activate(&setlist, scene, section_index, None).await
    }

    /// Applies the scene bound to the section called `name`.
    pub async fn apply_scene_by_section(&self, name: &str) -> Option<Scene> {
        let setlist = self.snapshot()?;
        let Some(scene) = setlist.scene_for_section(name).cloned() else {
            tracing::debug!(section = name, "no scene for section");
            return None;
        };
        let section_index = setlist.section_index(&scene);
        self.activate(&setlist, scene, section_index, None).await
    }

    /// Follows the engine's position feed until stopped.
    ///
    /// Positions are applied one at a time in the order they were emitted.
    pub fn start_auto_transition(&self) {
        self.stop_auto_transition();
        let generation = self.inner.auto_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let subscription = self.inner.engine.subscribe_positions(move |update| {
            let _ = tx.send(update.position_ms);
        });

        let weak: Weak<ManagerInner<B>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(position_ms) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                if inner.auto_generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                let manager = SceneManager { inner };
                manager.follow_position(position_ms, Some(generation)).await;
            }
        });

        *self.inner.auto.lock() = Some(AutoTransition {
            _subscription: subscription,
        });
        tracing::debug!("auto transition started");
    }

    /// Stops following the position feed. No position is applied after this
    /// returns.
    pub fn stop_auto_transition(&self) {
        self.inner.auto_generation.fetch_add(1, Ordering::SeqCst);
        // Dropping the subscription closes the feed and ends the consumer.
        if self.inner.auto.lock().take().is_some() {
            tracing::debug!("auto transition stopped");
        }
    }

    pub fn is_auto_transitioning(&self) -> bool {
        self.inner.auto.lock().is_some()
    }

    fn snapshot(&self) -> Option<Arc<Setlist>> {
        self.inner.setlist.lock().clone()
    }

    async fn follow_position(&self, position_ms: u64, auto: Option<u64>) -> Option<Scene> {
        let setlist = self.snapshot()?;
        let (index, section) = setlist.song.section_at(position_ms)?;
        let scene = setlist.scene_for_section(&section.name)?.clone();
        self.activate(&setlist, scene, Some(index), auto).await
    }

    async fn activate(
        &self,
        setlist: &Arc<Setlist>,
        scene: Scene,
        section_index: Option<usize>,
        auto: Option<u64>,
    ) -> Option<Scene> {
        let _serial = self.inner.apply_lock.lock().await;
        if let Some(generation) = auto {
            if self.inner.auto_generation.load(Ordering::SeqCst) != generation {
                return None;
            }
        }
        if !self.is_live(setlist) {
            return None;
        }
        let already_current = self
            .inner
            .current
            .lock()
            .as_ref()
            .is_some_and(|current| current.id == scene.id);
        if already_current {
            return None;
        }

        self.inner.engine.apply_scene(&scene).await;

        // A song loaded while the mix was changing wins.
        if !self.is_live(setlist) {
            return None;
        }
        *self.inner.current.lock() = Some(scene.clone());
        let section_name = section_index
            .and_then(|i| setlist.song.sections.get(i))
            .map(|s| s.name.clone());
        self.inner.events.emit(&SceneChange {
            scene: scene.clone(),
            song_title: setlist.song.title.clone(),
            section_index,
            section_name,
            total_sections: setlist.song.section_count(),
        });
        Some(scene)
    }

    fn is_live(&self, setlist: &Arc<Setlist>) -> bool {
        self.inner
            .setlist
            .lock()
            .as_ref()
            .is_some_and(|live| Arc::ptr_eq(live, setlist))
    }
}

impl<B: SoundBackend> Drop for ManagerInner<B> {
    fn drop(&mut self) {
        self.auto_generation.fetch_add(1, Ordering::SeqCst);
    }
}
