//! Error types for the live sync core.
//!
//! None of these cross the public surface for expected conditions: connection
//! faults become transport status events, playback faults are collected into
//! per-track reports, and MIDI sink failures are logged. They are returned
//! directly only from setup calls (loading config, opening a backend).

use thiserror::Error;

/// Faults on a transport connection.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Dialing the remote end failed.
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    /// Reading or writing a frame failed on an open connection.
    #[error("socket fault: {0}")]
    Socket(String),
    /// A frame could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Faults reported by a sound backend for a single track.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    /// The source could not be opened or decoded.
    #[error("failed to load {uri}: {reason}")]
    Load { uri: String, reason: String },
    /// The backend rejected a command for a loaded sound.
    #[error("{command} failed: {reason}")]
    Command {
        command: &'static str,
        reason: String,
    },
}

impl PlaybackError {
    /// Builds a command failure for the named operation.
    pub fn command(command: &'static str, reason: impl Into<String>) -> Self {
        Self::Command {
            command,
            reason: reason.into(),
        }
    }
}

/// Faults delivering MIDI bytes to a sink.
#[derive(Debug, Clone, Error)]
pub enum ClockError {
    /// The sink is not currently able to accept bytes.
    #[error("{sink} unavailable")]
    Unavailable { sink: &'static str },
    /// The sink accepted the call but delivery failed.
    #[error("{sink} send failed: {reason}")]
    Send { sink: &'static str, reason: String },
    /// A realtime message could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Faults loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is present but unusable.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
