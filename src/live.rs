//! One device's live session: both transports, the reconnect watchdog, the
//! MIDI clock and the cue translator, built from a [`LiveConfig`].
//!
//! Components are handed to consumers by reference; there is no global
//! connection state.

use crate::audio::{AudioEngine, EngineEvent, PlaybackState, SoundBackend};
use crate::bus::Subscription;
use crate::config::LiveConfig;
use crate::cue::CueTranslator;
use crate::midi::{BridgeMidiSink, MidiClock, MidiSink};
use crate::scene::{Scene, SceneManager};
use crate::song::Song;
use crate::transport::{
    BridgeTransport, Connector, HostState, Identity, ReconnectSupervisor, Role, SyncMessage,
    SyncTransport, TransportEvent, TransportStatus, WsConnector,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Everything one device needs to take part in a live performance.
pub struct LiveSession<C: Connector = WsConnector> {
    config: LiveConfig,
    identity: Identity,
    sync: Arc<SyncTransport<C>>,
    bridge: Arc<BridgeTransport<C>>,
    supervisor: ReconnectSupervisor,
    clock: Arc<MidiClock>,
    cues: Arc<CueTranslator<C>>,
    host_state: Arc<Mutex<Option<HostState>>>,
    _sync_events: Subscription,
}

impl LiveSession<WsConnector> {
    /// Session that dials real WebSocket endpoints.
    pub fn websocket(config: LiveConfig, extra_sinks: Vec<Arc<dyn MidiSink>>) -> Self {
        Self::new(config, WsConnector, WsConnector, extra_sinks)
    }
}

impl<C: Connector> LiveSession<C> {
    /// Assembles a session. The clock always drives the bridge; `extra_sinks`
    /// (e.g. a native MIDI port) receive the same bytes.
    pub fn new(
        config: LiveConfig,
        sync_connector: C,
        bridge_connector: C,
        extra_sinks: Vec<Arc<dyn MidiSink>>,
    ) -> Self {
        let identity = config.identity();
        let sync = Arc::new(SyncTransport::new(sync_connector));
        let bridge = Arc::new(BridgeTransport::new(bridge_connector));

        let supervisor = ReconnectSupervisor::new(config.reconnect_interval())
            .watch(sync.clone())
            .watch(bridge.clone());

        let mut sinks: Vec<Arc<dyn MidiSink>> =
            vec![Arc::new(BridgeMidiSink::new(Arc::clone(&bridge)))];
        sinks.extend(extra_sinks);
        let clock = Arc::new(MidiClock::with_bpm(sinks, config.default_bpm));

        let cues = Arc::new(CueTranslator::new(Arc::clone(&bridge), config.cue.clone()));

        let host_state = Arc::new(Mutex::new(None));
        let sync_events = Self::watch_sync(&sync, identity.role, Arc::clone(&host_state));

        Self {
            config,
            identity,
            sync,
            bridge,
            supervisor,
            clock,
            cues,
            host_state,
            _sync_events: sync_events,
        }
    }

    /// Followers ask for the host's state on every (re)connect and keep the
    /// latest `HOST_STATE` they see.
    fn watch_sync(
        sync: &Arc<SyncTransport<C>>,
        role: Role,
        host_state: Arc<Mutex<Option<HostState>>>,
    ) -> Subscription {
        let weak: Weak<SyncTransport<C>> = Arc::downgrade(sync);
        sync.subscribe(move |event| match event {
            TransportEvent::Status(TransportStatus::Connected) if role == Role::Follower => {
                if let Some(sync) = weak.upgrade() {
                    sync.send(&SyncMessage::request_state());
                }
            }
            TransportEvent::Status(status) => {
                tracing::debug!(?status, "sync status");
            }
            TransportEvent::Message(SyncMessage::HostState(state)) => {
                *host_state.lock() = Some(state.clone());
            }
            TransportEvent::Message(_) => {}
        })
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn sync(&self) -> &Arc<SyncTransport<C>> {
        &self.sync
    }

    pub fn bridge(&self) -> &Arc<BridgeTransport<C>> {
        &self.bridge
    }

    pub fn supervisor(&self) -> &ReconnectSupervisor {
        &self.supervisor
    }

    pub fn clock(&self) -> &Arc<MidiClock> {
        &self.clock
    }

    pub fn cues(&self) -> &Arc<CueTranslator<C>> {
        &self.cues
    }

    /// Opens every configured link and starts the reconnect watchdog.
    ///
    /// Must be called inside a tokio runtime.
    pub fn connect_all(&self) {
        if let Some(url) = &self.config.sync_url {
            self.sync.connect(url.clone(), self.identity.clone());
        }
        if let Some(url) = &self.config.bridge_url {
            self.bridge.connect(url.clone(), self.identity.clone());
        }
        self.supervisor.start();
        tracing::info!(
            role = ?self.identity.role,
            room = %self.identity.room_id,
            device = %self.identity.device_id,
            "live session started"
        );
    }

    /// Stops the clock and the watchdog and closes both links.
    pub fn shutdown(&self) {
        self.supervisor.stop();
        self.clock.stop();
        self.sync.disconnect();
        self.bridge.disconnect();
        tracing::info!("live session stopped");
    }

    /// Publishes authoritative state. Only a host publishes; returns false
    /// for followers or while the sync link is down.
    pub fn publish_host_state(&self, state: HostState) -> bool {
        if self.identity.role != Role::Host {
            return false;
        }
        self.sync.send(&SyncMessage::HostState(state))
    }

    /// Asks the host to resend its current state.
    pub fn request_state(&self) -> bool {
        self.sync.send(&SyncMessage::request_state())
    }

    /// Asks the host to loop a section.
    pub fn request_loop(&self, section_id: &str) -> bool {
        self.sync.send(&SyncMessage::request_loop(section_id))
    }

    /// The most recent `HOST_STATE` received from the host.
    pub fn latest_host_state(&self) -> Option<HostState> {
        self.host_state.lock().clone()
    }

    /// Builds an audio engine that samples the playhead at the configured
    /// `pollIntervalMs`.
    pub fn audio_engine<B: SoundBackend>(&self, backend: B) -> AudioEngine<B> {
        AudioEngine::with_poll_interval(backend, self.config.poll_interval())
    }

    /// Loads `song` and its scenes into `scenes` and pre-announces the
    /// section list on the bridge. Returns whether `SONG_LOADED` went out.
    pub fn load_song<B: SoundBackend>(
        &self,
        scenes: &SceneManager<B>,
        song: Song,
        scene_list: Vec<Scene>,
    ) -> bool {
        let announced = self.cues.send_song_loaded(&song);
        if !announced {
            tracing::debug!(song = %song.title, "song not announced, bridge not connected");
        }
        scenes.load_song(song, scene_list);
        announced
    }

    /// Sends a cue to the bridge whenever the scene manager changes scene
    /// and the scene routes cues.
    pub fn route_scene_cues<B: SoundBackend>(&self, scenes: &SceneManager<B>) -> Subscription {
        let cues = Arc::clone(&self.cues);
        scenes.subscribe(move |change| {
            if let Some(event) = change.cue_event() {
                cues.send_cue(&event);
            }
        })
    }

    /// Runs the MIDI clock while the engine plays: Start on play, Stop on
    /// pause or stop.
    pub fn drive_clock_from<B: SoundBackend>(&self, engine: &AudioEngine<B>) -> Subscription {
        let clock = Arc::clone(&self.clock);
        engine.subscribe(move |event| {
            if let EngineEvent::PlaybackChanged(state) = event {
                match state {
                    PlaybackState::Playing => clock.start(),
                    PlaybackState::Paused | PlaybackState::Stopped => clock.stop(),
                }
            }
        })
    }
}
