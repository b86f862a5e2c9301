//! The per-track sound primitive the engine drives.
//!
//! The platform supplies one [`Sound`] per loaded file. The engine only ever
//! talks to sounds through this trait, so the same fan-out logic runs against
//! rodio sinks, a mobile player bridge, or a test double.

use crate::error::PlaybackError;
use std::future::Future;

/// Playhead report from a single sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SoundStatus {
    pub position_ms: u64,
    pub duration_ms: u64,
    pub playing: bool,
}

/// One loaded, independently controllable sound.
pub trait Sound: Send + Sync + 'static {
    fn play(&self) -> impl Future<Output = Result<(), PlaybackError>> + Send;

    fn pause(&self) -> impl Future<Output = Result<(), PlaybackError>> + Send;

    /// Stops and rewinds to the start.
    fn stop(&self) -> impl Future<Output = Result<(), PlaybackError>> + Send;

    fn seek(&self, position_ms: u64) -> impl Future<Output = Result<(), PlaybackError>> + Send;

    /// Sets output volume in [0, 1].
    fn set_volume(&self, volume: f32) -> impl Future<Output = Result<(), PlaybackError>> + Send;

    fn status(&self) -> impl Future<Output = Result<SoundStatus, PlaybackError>> + Send;

    /// Releases the underlying resources. The sound is unusable afterwards.
    fn unload(&self) -> impl Future<Output = Result<(), PlaybackError>> + Send;
}

/// Opens sounds by URI.
pub trait SoundBackend: Send + Sync + 'static {
    type Sound: Sound;

    fn load(&self, source: &str) -> impl Future<Output = Result<Self::Sound, PlaybackError>> + Send;
}

#[cfg(feature = "playback")]
mod rodio_backend {
    use super::{Sound, SoundBackend, SoundStatus};
    use crate::error::PlaybackError;
    use rodio::{Decoder, OutputStreamHandle, Sink, Source};
    use std::fs::File;
    use std::io::BufReader;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Plays each track through its own rodio [`Sink`] on a shared output.
    ///
    /// The `OutputStream` that owns the device must be kept alive by the
    /// caller for as long as sounds are playing.
    #[derive(Clone)]
    pub struct RodioBackend {
        handle: OutputStreamHandle,
    }

    impl RodioBackend {
        pub fn new(handle: OutputStreamHandle) -> Self {
            Self { handle }
        }
    }

    pub struct RodioSound {
        sink: Sink,
        duration: Option<Duration>,
    }

    fn source_path(source: &str) -> PathBuf {
        PathBuf::from(source.strip_prefix("file://").unwrap_or(source))
    }

    fn open(handle: &OutputStreamHandle, source: &str) -> Result<RodioSound, PlaybackError> {
        let load_err = |reason: String| PlaybackError::Load {
            uri: source.to_string(),
            reason,
        };
        let file = File::open(source_path(source)).map_err(|e| load_err(e.to_string()))?;
        let decoder = Decoder::new(BufReader::new(file)).map_err(|e| load_err(e.to_string()))?;
        let duration = decoder.total_duration();
        let sink = Sink::try_new(handle).map_err(|e| load_err(e.to_string()))?;
        sink.pause();
        sink.append(decoder);
        Ok(RodioSound { sink, duration })
    }

    impl SoundBackend for RodioBackend {
        type Sound = RodioSound;

        async fn load(&self, source: &str) -> Result<RodioSound, PlaybackError> {
            let handle = self.handle.clone();
            let owned = source.to_string();
            // Decoding headers touches the filesystem.
            tokio::task::spawn_blocking(move || open(&handle, &owned))
                .await
                .map_err(|e| PlaybackError::Load {
                    uri: source.to_string(),
                    reason: e.to_string(),
                })?
        }
    }

    impl Sound for RodioSound {
        async fn play(&self) -> Result<(), PlaybackError> {
            self.sink.play();
            Ok(())
        }

        async fn pause(&self) -> Result<(), PlaybackError> {
            self.sink.pause();
            Ok(())
        }

        async fn stop(&self) -> Result<(), PlaybackError> {
            self.sink.pause();
            self.sink
                .try_seek(Duration::ZERO)
                .map_err(|e| PlaybackError::command("stop", e.to_string()))
        }

        async fn seek(&self, position_ms: u64) -> Result<(), PlaybackError> {
            self.sink
                .try_seek(Duration::from_millis(position_ms))
                .map_err(|e| PlaybackError::command("seek", e.to_string()))
        }

        async fn set_volume(&self, volume: f32) -> Result<(), PlaybackError> {
            self.sink.set_volume(volume);
            Ok(())
        }

        async fn status(&self) -> Result<SoundStatus, PlaybackError> {
            Ok(SoundStatus {
                position_ms: self.sink.get_pos().as_millis() as u64,
                duration_ms: self.duration.map(|d| d.as_millis() as u64).unwrap_or(0),
                playing: !self.sink.is_paused() && !self.sink.empty(),
            })
        }

        async fn unload(&self) -> Result<(), PlaybackError> {
            self.sink.stop();
            Ok(())
        }
    }
}

#[cfg(feature = "playback")]
pub use rodio_backend::{RodioBackend, RodioSound};
