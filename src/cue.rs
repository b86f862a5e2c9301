//! Section-change cues for lyric and lighting software.
//!
//! Translation is a pure function of the section and the configured target;
//! delivery is a single fire-and-forget send over the bridge. A cue that
//! cannot be sent is dropped, not queued: by the time the link is back the
//! band has moved on.

use crate::song::Song;
use crate::transport::{
    timestamp_ms, BridgeMessage, BridgeTransport, Connector, CueChange, SectionRef, SongLoaded,
    WsConnector,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Presentation software the bridge drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LyricSoftware {
    #[default]
    ProPresenter,
    OpenLp,
    EasyWorship,
    /// Any OSC receiver (lighting desks, custom tools).
    Osc,
    /// A MIDI-triggered receiver.
    Midi,
}

impl LyricSoftware {
    /// Whether the bridge talks to this software over OSC.
    pub fn speaks_osc(self) -> bool {
        matches!(
            self,
            LyricSoftware::ProPresenter | LyricSoftware::OpenLp | LyricSoftware::Osc
        )
    }
}

/// Default OSC address; `{index}` is replaced with the section index.
pub const DEFAULT_OSC_PATH: &str = "/cue/{index}";

/// Default MIDI channel for MIDI-triggered receivers (1-based).
pub const DEFAULT_MIDI_CHANNEL: u8 = 1;

/// Where cues should go, as configured in the app's settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CueTarget {
    pub software: LyricSoftware,
    /// Host (or host:port) of the receiving software, as the bridge sees it.
    pub target: String,
    #[serde(default)]
    pub osc_path: Option<String>,
    #[serde(default)]
    pub midi_channel: Option<u8>,
}

impl CueTarget {
    pub fn new(software: LyricSoftware, target: impl Into<String>) -> Self {
        Self {
            software,
            target: target.into(),
            osc_path: None,
            midi_channel: None,
        }
    }

    fn resolved_osc_path(&self, section_index: usize) -> Option<String> {
        match &self.osc_path {
            Some(path) => Some(path.replace("{index}", &section_index.to_string())),
            None if self.software.speaks_osc() => {
                Some(DEFAULT_OSC_PATH.replace("{index}", &section_index.to_string()))
            }
            None => None,
        }
    }

    fn resolved_midi_channel(&self) -> Option<u8> {
        match self.midi_channel {
            Some(channel) => Some(channel.clamp(1, 16)),
            None if self.software == LyricSoftware::Midi => Some(DEFAULT_MIDI_CHANNEL),
            None => None,
        }
    }
}

/// A section change, before it is addressed to any software.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CueEvent {
    pub song_title: String,
    pub section_name: String,
    pub section_index: usize,
    pub total_sections: usize,
    pub timestamp: u64,
}

impl CueEvent {
    /// Builds the event for section `index` of `song`. `None` if out of range.
    pub fn for_section(song: &Song, index: usize) -> Option<Self> {
        let section = song.sections.get(index)?;
        Some(Self {
            song_title: song.title.clone(),
            section_name: section.name.clone(),
            section_index: index,
            total_sections: song.section_count(),
            timestamp: timestamp_ms(),
        })
    }
}

/// Maps a cue event onto the `CUE_CHANGE` envelope for `target`.
pub fn translate(event: &CueEvent, target: &CueTarget) -> BridgeMessage {
    BridgeMessage::CueChange(CueChange {
        song_title: event.song_title.clone(),
        section_name: event.section_name.clone(),
        section_index: event.section_index,
        total_sections: event.total_sections,
        software: target.software,
        target: target.target.clone(),
        osc_path: target.resolved_osc_path(event.section_index),
        midi_channel: target.resolved_midi_channel(),
        timestamp: event.timestamp,
    })
}

/// Builds the `SONG_LOADED` envelope listing every section in order.
pub fn song_loaded(song: &Song, target: &CueTarget) -> BridgeMessage {
    BridgeMessage::SongLoaded(SongLoaded {
        song_title: song.title.clone(),
        total_sections: song.section_count(),
        sections: song
            .sections
            .iter()
            .enumerate()
            .map(|(index, s)| SectionRef {
                index,
                name: s.name.clone(),
            })
            .collect(),
        software: target.software,
        target: target.target.clone(),
        timestamp: timestamp_ms(),
    })
}

/// Sends cues for the configured target over the bridge.
pub struct CueTranslator<C: Connector = WsConnector> {
    bridge: Arc<BridgeTransport<C>>,
    target: parking_lot::RwLock<CueTarget>,
}

impl<C: Connector> CueTranslator<C> {
    pub fn new(bridge: Arc<BridgeTransport<C>>, target: CueTarget) -> Self {
        Self {
            bridge,
            target: parking_lot::RwLock::new(target),
        }
    }

    pub fn target(&self) -> CueTarget {
        self.target.read().clone()
    }

    /// Replaces the target when the settings change.
    pub fn set_target(&self, target: CueTarget) {
        *self.target.write() = target;
    }

    /// Sends `CUE_CHANGE` for an event. Returns whether the send was attempted.
    pub fn send_cue(&self, event: &CueEvent) -> bool {
        let message = translate(event, &self.target.read());
        let sent = self.bridge.send(&message);
        if sent {
            tracing::debug!(section = %event.section_name, index = event.section_index, "cue sent");
        } else {
            tracing::debug!(section = %event.section_name, "cue dropped, bridge not connected");
        }
        sent
    }

    /// Sends the cue for section `index` of `song`. An unknown index sends nothing.
    pub fn send_section_cue(&self, song: &Song, index: usize) -> bool {
        match CueEvent::for_section(song, index) {
            Some(event) => self.send_cue(&event),
            None => false,
        }
    }

    /// Sends the cue for whatever section contains `position_ms`.
    pub fn send_cue_for_position(&self, song: &Song, position_ms: u64) -> bool {
        match song.section_at(position_ms) {
            Some((index, _)) => self.send_section_cue(song, index),
            None => false,
        }
    }

    /// Announces the full section list so receivers can pre-index.
    pub fn send_song_loaded(&self, song: &Song) -> bool {
        let message = song_loaded(song, &self.target.read());
        self.bridge.send(&message)
    }
}
