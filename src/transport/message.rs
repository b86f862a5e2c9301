//! Wire messages for the Sync and Bridge channels.
//!
//! Every frame is a JSON object with a `type` tag. Field names match what the
//! host app, followers and the bridge process already speak, so they are
//! renamed explicitly rather than derived from the Rust names.

use crate::cue::LyricSoftware;
use crate::song::{bars_until, Song};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, as carried in `ts`/`timestamp` fields.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A message set that can travel over a [`Transport`](super::Transport).
pub trait WireMessage:
    Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static
{
    /// Channel name used in logs.
    const CHANNEL: &'static str;

    /// Greeting sent as soon as a connection opens, if the channel has one.
    fn hello(_identity: &Identity) -> Option<Self> {
        None
    }
}

/// Sync role of a device within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Publishes authoritative playback state.
    Host,
    /// Mirrors the host.
    #[default]
    Follower,
}

/// Who this device is, announced to the sync server on every connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub role: Role,
    pub room_id: String,
    pub device_id: String,
}

impl Identity {
    pub fn new(role: Role, room_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            role,
            room_id: room_id.into(),
            device_id: device_id.into(),
        }
    }

    /// Identity with a freshly generated device id.
    pub fn generated(role: Role, room_id: impl Into<String>) -> Self {
        Self::new(role, room_id, uuid::Uuid::new_v4().to_string())
    }
}

/// Host playback status as published in `HOST_STATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Playing,
    Paused,
    #[default]
    Stopped,
}

/// Authoritative state published by the host device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostState {
    pub status: HostStatus,
    pub song_title: Option<String>,
    pub section: Option<String>,
    pub next: Option<String>,
    pub bpm: Option<f64>,
    pub position_sec: f64,
    /// Section id currently looping, if any.
    #[serde(rename = "loop")]
    pub looping: Option<String>,
    pub bars_to_next: Option<u32>,
}

impl HostState {
    /// Fills section, next and the bar countdown from the song structure.
    pub fn from_song(
        song: &Song,
        position_ms: u64,
        bpm: Option<f64>,
        status: HostStatus,
        looping: Option<String>,
    ) -> Self {
        let current = song.section_at(position_ms);
        let section = current.map(|(_, s)| s.name.clone());
        let next = current.and_then(|(i, _)| song.next_section(i));
        let bars_to_next = match (current, next, bpm.or(song.bpm)) {
            (Some((_, s)), Some(_), Some(bpm)) => Some(bars_until(position_ms, s.end_ms, bpm)),
            _ => None,
        };

        Self {
            status,
            song_title: Some(song.title.clone()),
            section,
            next: next.map(|s| s.name.clone()),
            bpm: bpm.or(song.bpm),
            position_sec: position_ms as f64 / 1000.0,
            looping,
            bars_to_next,
        }
    }
}

/// Messages on the device-to-device sync channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    #[serde(rename = "HELLO", rename_all = "camelCase")]
    Hello {
        role: Role,
        room_id: String,
        device_id: String,
        ts: u64,
    },
    #[serde(rename = "HOST_STATE")]
    HostState(HostState),
    #[serde(rename = "REQUEST_STATE")]
    RequestState { ts: u64 },
    #[serde(rename = "REQUEST_LOOP", rename_all = "camelCase")]
    RequestLoop { section_id: String, ts: u64 },
    /// Follower arm/readiness payload, passed through untouched.
    #[serde(rename = "arm/update")]
    ArmUpdate(serde_json::Map<String, serde_json::Value>),
}

impl SyncMessage {
    pub fn request_state() -> Self {
        Self::RequestState { ts: timestamp_ms() }
    }

    pub fn request_loop(section_id: impl Into<String>) -> Self {
        Self::RequestLoop {
            section_id: section_id.into(),
            ts: timestamp_ms(),
        }
    }
}

impl WireMessage for SyncMessage {
    const CHANNEL: &'static str = "sync";

    fn hello(identity: &Identity) -> Option<Self> {
        Some(Self::Hello {
            role: identity.role,
            room_id: identity.room_id.clone(),
            device_id: identity.device_id.clone(),
            ts: timestamp_ms(),
        })
    }
}

/// Section announcement inside `CUE_CHANGE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CueChange {
    pub song_title: String,
    pub section_name: String,
    pub section_index: usize,
    pub total_sections: usize,
    pub software: LyricSoftware,
    pub target: String,
    pub osc_path: Option<String>,
    pub midi_channel: Option<u8>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRef {
    pub index: usize,
    pub name: String,
}

/// Full section list sent once per song load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongLoaded {
    pub song_title: String,
    pub total_sections: usize,
    pub sections: Vec<SectionRef>,
    pub software: LyricSoftware,
    pub target: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockAction {
    Start,
    Stop,
    Continue,
}

/// Messages to and from the bridge process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeMessage {
    #[serde(rename = "CUE_CHANGE")]
    CueChange(CueChange),
    #[serde(rename = "SONG_LOADED")]
    SongLoaded(SongLoaded),
    #[serde(rename = "MIDI_CLOCK")]
    MidiClock { action: ClockAction, bpm: f64 },
    #[serde(rename = "MIDI_RAW")]
    MidiRaw { bytes: Vec<u8> },
}

impl WireMessage for BridgeMessage {
    const CHANNEL: &'static str = "bridge";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::Section;
    use serde_json::{json, Value};

    #[test]
    fn test_hello_wire_shape() {
        let identity = Identity::new(Role::Host, "room-7", "dev-1");
        let hello = SyncMessage::hello(&identity).unwrap();
        let value: Value = serde_json::to_value(&hello).unwrap();
        assert_eq!(value["type"], "HELLO");
        assert_eq!(value["role"], "host");
        assert_eq!(value["roomId"], "room-7");
        assert_eq!(value["deviceId"], "dev-1");
        assert!(value["ts"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_bridge_has_no_hello() {
        let identity = Identity::generated(Role::Follower, "room");
        assert!(BridgeMessage::hello(&identity).is_none());
        assert_eq!(identity.device_id.len(), 36);
    }

    #[test]
    fn test_host_state_parses_loop_field() {
        let raw = json!({
            "type": "HOST_STATE",
            "status": "playing",
            "songTitle": "Build My Life",
            "section": "Verse",
            "next": "Chorus",
            "bpm": 68.0,
            "positionSec": 12.5,
            "loop": "sec-3",
            "barsToNext": 4
        });
        let msg: SyncMessage = serde_json::from_value(raw).unwrap();
        match msg {
            SyncMessage::HostState(state) => {
                assert_eq!(state.status, HostStatus::Playing);
                assert_eq!(state.looping.as_deref(), Some("sec-3"));
                assert_eq!(state.bars_to_next, Some(4));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_arm_update_passes_through() {
        let raw = json!({"type": "arm/update", "armed": true, "deviceId": "x"});
        let msg: SyncMessage = serde_json::from_value(raw).unwrap();
        let SyncMessage::ArmUpdate(fields) = &msg else {
            panic!("expected arm/update");
        };
        assert_eq!(fields["armed"], json!(true));

        let back: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["type"], "arm/update");
        assert_eq!(back["deviceId"], "x");
    }

    #[test]
    fn test_request_loop_wire_shape() {
        let value = serde_json::to_value(SyncMessage::request_loop("bridge-2")).unwrap();
        assert_eq!(value["type"], "REQUEST_LOOP");
        assert_eq!(value["sectionId"], "bridge-2");
    }

    #[test]
    fn test_midi_raw_wire_shape() {
        let msg = BridgeMessage::MidiRaw { bytes: vec![0xFA] };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "MIDI_RAW", "bytes": [250]})
        );
        let clock = BridgeMessage::MidiClock {
            action: ClockAction::Continue,
            bpm: 72.0,
        };
        assert_eq!(
            serde_json::to_value(&clock).unwrap(),
            json!({"type": "MIDI_CLOCK", "action": "continue", "bpm": 72.0})
        );
    }

    #[test]
    fn test_host_state_from_song() {
        let mut song = Song::new(
            "Cornerstone",
            vec![
                Section::new("Verse", 0, 16_000),
                Section::new("Chorus", 16_000, 32_000),
            ],
        );
        song.bpm = Some(120.0);

        let state = HostState::from_song(&song, 5_000, None, HostStatus::Playing, None);
        assert_eq!(state.section.as_deref(), Some("Verse"));
        assert_eq!(state.next.as_deref(), Some("Chorus"));
        // 11 s left at 2 s per bar.
        assert_eq!(state.bars_to_next, Some(6));
        assert_eq!(state.position_sec, 5.0);

        let last = HostState::from_song(&song, 20_000, None, HostStatus::Paused, None);
        assert_eq!(last.next, None);
        assert_eq!(last.bars_to_next, None);
    }
}
