//! MIDI clock generation and delivery.
//!
//! The clock runs at 24 pulses per quarter note, so one pulse lasts
//! `60000 / bpm / 24 = 2500 / bpm` milliseconds.

mod clock;
mod output;

pub use clock::{ClockState, MidiClock};
#[cfg(feature = "native-midi")]
pub use output::NativeMidiOutput;
pub use output::{BridgeMidiSink, MidiSink};

use crate::error::ClockError;
use midly::live::{LiveEvent, SystemRealtime};
use std::time::Duration;

/// MIDI clock resolution (pulses per quarter note).
pub const PPQN: u32 = 24;

pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 300.0;
pub const DEFAULT_BPM: f64 = 120.0;

/// Clamps a tempo into the supported range. NaN falls back to the default.
pub fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_nan() {
        DEFAULT_BPM
    } else {
        bpm.clamp(MIN_BPM, MAX_BPM)
    }
}

/// Spacing between clock pulses in milliseconds.
pub fn tick_interval_ms(bpm: f64) -> f64 {
    60_000.0 / clamp_bpm(bpm) / PPQN as f64
}

/// Spacing between clock pulses.
pub fn tick_interval(bpm: f64) -> Duration {
    Duration::from_secs_f64(tick_interval_ms(bpm) / 1000.0)
}

/// Offset of the `n`th pulse from the instant the clock started.
///
/// Offsets are truncated to whole milliseconds, the timer's resolution, so
/// a pulse is never delivered after its nominal time and pulse `n` always
/// lands inside the first `n * interval` of running time.
pub fn pulse_offset(interval: Duration, n: u64) -> Duration {
    let nanos = interval.as_nanos() * u128::from(n);
    Duration::from_millis((nanos / 1_000_000) as u64)
}

/// The system realtime messages the clock generator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockByte {
    Start,
    Clock,
    Stop,
    Continue,
}

impl ClockByte {
    /// Raw status byte.
    pub fn status(self) -> u8 {
        match self {
            ClockByte::Start => 0xFA,
            ClockByte::Clock => 0xF8,
            ClockByte::Stop => 0xFC,
            ClockByte::Continue => 0xFB,
        }
    }

    fn realtime(self) -> SystemRealtime {
        match self {
            ClockByte::Start => SystemRealtime::Start,
            ClockByte::Clock => SystemRealtime::TimingClock,
            ClockByte::Stop => SystemRealtime::Stop,
            ClockByte::Continue => SystemRealtime::Continue,
        }
    }

    /// Encodes the message as it goes on the wire.
    pub fn encode(self) -> Result<Vec<u8>, ClockError> {
        let mut buf = Vec::with_capacity(1);
        LiveEvent::Realtime(self.realtime())
            .write_std(&mut buf)
            .map_err(|e| ClockError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a single realtime message, ignoring anything else.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        match LiveEvent::parse(bytes).ok()? {
            LiveEvent::Realtime(SystemRealtime::Start) => Some(ClockByte::Start),
            LiveEvent::Realtime(SystemRealtime::TimingClock) => Some(ClockByte::Clock),
            LiveEvent::Realtime(SystemRealtime::Stop) => Some(ClockByte::Stop),
            LiveEvent::Realtime(SystemRealtime::Continue) => Some(ClockByte::Continue),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_tick_interval_is_2500_over_bpm() {
        for bpm in 20..=300 {
            let bpm = bpm as f64;
            assert_relative_eq!(tick_interval_ms(bpm), 2500.0 / bpm, epsilon = 1e-9);
        }
        assert_relative_eq!(tick_interval_ms(120.0), 20.833_333, epsilon = 1e-5);
    }

    #[test]
    fn test_bpm_clamps() {
        assert_eq!(clamp_bpm(5.0), MIN_BPM);
        assert_eq!(clamp_bpm(999.0), MAX_BPM);
        assert_eq!(clamp_bpm(f64::NAN), DEFAULT_BPM);
        assert_relative_eq!(tick_interval_ms(1000.0), 2500.0 / 300.0);
    }

    #[test]
    fn test_pulse_offsets_stay_inside_their_window() {
        let interval = tick_interval(120.0);
        assert_eq!(pulse_offset(interval, 1), Duration::from_millis(20));
        assert_eq!(pulse_offset(interval, 48), Duration::from_millis(999));
        assert!(pulse_offset(interval, 49) > Duration::from_millis(1_000));

        // Whole-millisecond spacing is kept exactly.
        let interval = tick_interval(100.0);
        assert_eq!(pulse_offset(interval, 40), Duration::from_millis(1_000));
        assert_eq!(pulse_offset(interval, 0), Duration::ZERO);
    }

    #[test]
    fn test_realtime_bytes() {
        assert_eq!(ClockByte::Start.encode().unwrap(), vec![0xFA]);
        assert_eq!(ClockByte::Clock.encode().unwrap(), vec![0xF8]);
        assert_eq!(ClockByte::Stop.encode().unwrap(), vec![0xFC]);
        assert_eq!(ClockByte::Continue.encode().unwrap(), vec![0xFB]);
        for byte in [
            ClockByte::Start,
            ClockByte::Clock,
            ClockByte::Stop,
            ClockByte::Continue,
        ] {
            assert_eq!(ClockByte::decode(&[byte.status()]), Some(byte));
        }
        assert_eq!(ClockByte::decode(&[0x90, 60, 100]), None);
    }
}
