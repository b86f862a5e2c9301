//! stagesync - live performance sync core.
//!
//! Keeps a band's devices and stage gear in lock-step during a performance:
//! reconnecting WebSocket transports to the sync server and the MIDI/OSC
//! bridge, a 24 PPQN MIDI clock, section cues for lyric software, scene
//! switching driven by the playhead, and phase-aligned stem playback.

pub mod audio;
pub mod bus;
pub mod config;
pub mod cue;
pub mod error;
pub mod live;
pub mod midi;
pub mod scene;
pub mod song;
pub mod transport;

// Re-export commonly used types
pub use audio::{AudioEngine, EngineEvent, OpReport, PlaybackState, TrackId, TrackKind, TrackSpec};
pub use bus::{EventBus, Subscription};
pub use config::LiveConfig;
pub use cue::{CueEvent, CueTarget, CueTranslator, LyricSoftware};
pub use error::{ClockError, ConfigError, PlaybackError, TransportError};
pub use live::LiveSession;
pub use midi::{MidiClock, MidiSink};
pub use scene::{Scene, SceneChange, SceneManager};
pub use song::{Section, Song};
pub use transport::{
    BridgeMessage, BridgeTransport, Identity, ReconnectSupervisor, Role, SyncMessage,
    SyncTransport, TransportEvent, TransportStatus,
};
