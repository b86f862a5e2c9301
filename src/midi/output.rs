//! Destinations for generated MIDI bytes.

use crate::error::ClockError;
use crate::transport::{BridgeMessage, BridgeTransport, ClockAction, Connector};
use std::sync::Arc;

/// Somewhere clock bytes can be delivered.
///
/// Implementations must not block: the clock calls them from its timer.
pub trait MidiSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn send_bytes(&self, bytes: &[u8]) -> Result<(), ClockError>;

    /// Announces a transport-control change. Byte-level sinks ignore it.
    fn send_action(&self, _action: ClockAction, _bpm: f64) -> Result<(), ClockError> {
        Ok(())
    }
}

/// Forwards clock bytes to the bridge process as `MIDI_RAW` envelopes.
pub struct BridgeMidiSink<C: Connector> {
    bridge: Arc<BridgeTransport<C>>,
}

impl<C: Connector> BridgeMidiSink<C> {
    pub fn new(bridge: Arc<BridgeTransport<C>>) -> Self {
        Self { bridge }
    }
}

impl<C: Connector> MidiSink for BridgeMidiSink<C> {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn send_bytes(&self, bytes: &[u8]) -> Result<(), ClockError> {
        let message = BridgeMessage::MidiRaw {
            bytes: bytes.to_vec(),
        };
        if self.bridge.send(&message) {
            Ok(())
        } else {
            Err(ClockError::Unavailable { sink: "bridge" })
        }
    }

    fn send_action(&self, action: ClockAction, bpm: f64) -> Result<(), ClockError> {
        if self.bridge.send(&BridgeMessage::MidiClock { action, bpm }) {
            Ok(())
        } else {
            Err(ClockError::Unavailable { sink: "bridge" })
        }
    }
}

#[cfg(feature = "native-midi")]
mod native {
    use super::MidiSink;
    use crate::error::ClockError;
    use midir::{MidiOutput, MidiOutputConnection};
    use parking_lot::Mutex;

    /// A hardware or virtual MIDI output port opened through midir.
    pub struct NativeMidiOutput {
        port_name: String,
        connection: Mutex<MidiOutputConnection>,
    }

    impl NativeMidiOutput {
        /// Opens the first output port whose name contains `port_hint`, or the
        /// first port at all when no hint is given.
        pub fn open(port_hint: Option<&str>) -> Result<Self, ClockError> {
            let output = MidiOutput::new("stagesync").map_err(|e| ClockError::Send {
                sink: "native",
                reason: e.to_string(),
            })?;
            let ports = output.ports();
            let port = ports
                .iter()
                .find(|port| match port_hint {
                    Some(hint) => output
                        .port_name(port)
                        .map(|name| name.contains(hint))
                        .unwrap_or(false),
                    None => true,
                })
                .ok_or(ClockError::Unavailable { sink: "native" })?;
            let port_name = output.port_name(port).unwrap_or_default();
            let connection =
                output
                    .connect(port, "stagesync-clock")
                    .map_err(|e| ClockError::Send {
                        sink: "native",
                        reason: e.to_string(),
                    })?;
            tracing::info!(port = %port_name, "native MIDI output opened");
            Ok(Self {
                port_name,
                connection: Mutex::new(connection),
            })
        }

        pub fn port_name(&self) -> &str {
            &self.port_name
        }
    }

    impl MidiSink for NativeMidiOutput {
        fn name(&self) -> &'static str {
            "native"
        }

        fn send_bytes(&self, bytes: &[u8]) -> Result<(), ClockError> {
            self.connection
                .lock()
                .send(bytes)
                .map_err(|e| ClockError::Send {
                    sink: "native",
                    reason: e.to_string(),
                })
        }
    }
}

#[cfg(feature = "native-midi")]
pub use native::NativeMidiOutput;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryConnector;
    use crate::transport::{Identity, Role};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_bridge_sink_wraps_raw_bytes() {
        let (connector, mut peers) = MemoryConnector::new();
        let bridge = Arc::new(BridgeTransport::new(connector));
        let sink = BridgeMidiSink::new(Arc::clone(&bridge));

        assert!(matches!(
            sink.send_bytes(&[0xF8]),
            Err(ClockError::Unavailable { sink: "bridge" })
        ));

        bridge.connect("ws://bridge:7070", Identity::new(Role::Host, "r", "d"));
        let mut peer = peers.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        sink.send_bytes(&[0xF8]).unwrap();
        sink.send_action(ClockAction::Start, 128.0).unwrap();
        let raw: BridgeMessage = peer.recv().await.unwrap();
        assert_eq!(raw, BridgeMessage::MidiRaw { bytes: vec![0xF8] });
        let action: BridgeMessage = peer.recv().await.unwrap();
        assert_eq!(
            action,
            BridgeMessage::MidiClock {
                action: ClockAction::Start,
                bpm: 128.0
            }
        );
    }
}
