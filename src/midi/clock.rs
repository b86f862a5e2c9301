//! Tempo-accurate MIDI clock generator.
//!
//! Every byte is emitted while holding the clock's state lock and after
//! checking the ticker generation, so once `stop` or `set_bpm` returns no
//! pulse from the previous timer can reach a sink.

use super::{clamp_bpm, pulse_offset, tick_interval, ClockByte, MidiSink, DEFAULT_BPM};
use crate::transport::ClockAction;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Snapshot of the clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockState {
    pub bpm: f64,
    pub running: bool,
    /// Pulses emitted since the last `start`.
    pub pulses: u64,
}

struct Core {
    bpm: f64,
    running: bool,
    pulses: u64,
    generation: u64,
    ticker: Option<JoinHandle<()>>,
}

struct Inner {
    core: Mutex<Core>,
    sinks: Vec<Arc<dyn MidiSink>>,
}

impl Inner {
    /// Delivers one message to every sink. A failing sink never stops the others.
    fn broadcast(&self, byte: ClockByte) {
        let bytes = match byte.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(?byte, error = %e, "clock byte encoding failed");
                return;
            }
        };
        for sink in &self.sinks {
            if let Err(e) = sink.send_bytes(&bytes) {
                if byte == ClockByte::Clock {
                    tracing::trace!(sink = sink.name(), error = %e, "clock pulse dropped");
                } else {
                    tracing::warn!(sink = sink.name(), ?byte, error = %e, "clock message dropped");
                }
            }
        }
    }

    fn announce(&self, action: ClockAction, bpm: f64) {
        for sink in &self.sinks {
            if let Err(e) = sink.send_action(action, bpm) {
                tracing::debug!(sink = sink.name(), ?action, error = %e, "clock action not announced");
            }
        }
    }

    /// Emits one pulse if `generation` is still the live ticker.
    fn pulse(&self, generation: u64) -> bool {
        let mut core = self.core.lock();
        if !core.running || core.generation != generation {
            return false;
        }
        core.pulses += 1;
        self.broadcast(ClockByte::Clock);
        true
    }
}

/// 24 PPQN clock that fans out to every registered [`MidiSink`].
pub struct MidiClock {
    inner: Arc<Inner>,
}

impl MidiClock {
    pub fn new(sinks: Vec<Arc<dyn MidiSink>>) -> Self {
        Self::with_bpm(sinks, DEFAULT_BPM)
    }

    pub fn with_bpm(sinks: Vec<Arc<dyn MidiSink>>, bpm: f64) -> Self {
        Self {
            inner: Arc::new(Inner {
                core: Mutex::new(Core {
                    bpm: clamp_bpm(bpm),
                    running: false,
                    pulses: 0,
                    generation: 0,
                    ticker: None,
                }),
                sinks,
            }),
        }
    }

    /// Emits Start and begins pulsing. No-op if already running.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut core = self.inner.core.lock();
        if core.running {
            return;
        }
        core.running = true;
        core.pulses = 0;
        self.inner.broadcast(ClockByte::Start);
        self.inner.announce(ClockAction::Start, core.bpm);
        self.spawn_ticker(&mut core);
        tracing::info!(bpm = core.bpm, "clock started");
    }

    /// Emits Stop and cancels the timer. No-op if already stopped.
    pub fn stop(&self) {
        let mut core = self.inner.core.lock();
        if !core.running {
            return;
        }
        core.running = false;
        core.generation += 1;
        if let Some(ticker) = core.ticker.take() {
            ticker.abort();
        }
        self.inner.broadcast(ClockByte::Stop);
        self.inner.announce(ClockAction::Stop, core.bpm);
        tracing::info!(pulses = core.pulses, "clock stopped");
    }

    /// Emits Continue from the stopped state. Does not start pulsing.
    pub fn continue_clock(&self) {
        let core = self.inner.core.lock();
        if core.running {
            return;
        }
        self.inner.broadcast(ClockByte::Continue);
        self.inner.announce(ClockAction::Continue, core.bpm);
    }

    /// Changes tempo. A running clock restarts its timer at the new spacing
    /// without emitting Start or Stop.
    pub fn set_bpm(&self, bpm: f64) {
        let bpm = clamp_bpm(bpm);
        let mut core = self.inner.core.lock();
        if core.bpm == bpm {
            return;
        }
        core.bpm = bpm;
        if core.running {
            self.spawn_ticker(&mut core);
        }
        tracing::debug!(bpm, "clock tempo changed");
    }

    pub fn bpm(&self) -> f64 {
        self.inner.core.lock().bpm
    }

    pub fn is_running(&self) -> bool {
        self.inner.core.lock().running
    }

    pub fn state(&self) -> ClockState {
        let core = self.inner.core.lock();
        ClockState {
            bpm: core.bpm,
            running: core.running,
            pulses: core.pulses,
        }
    }

    fn spawn_ticker(&self, core: &mut Core) {
        core.generation += 1;
        if let Some(previous) = core.ticker.take() {
            previous.abort();
        }
        let generation = core.generation;
        let period = tick_interval(core.bpm);
        let inner = Arc::clone(&self.inner);
        core.ticker = Some(tokio::spawn(async move {
            // Deadlines are computed from the start instant, so pulses do not drift.
            let origin = Instant::now();
            let mut n: u64 = 0;
            loop {
                n += 1;
                tokio::time::sleep_until(origin + pulse_offset(period, n)).await;
                if !inner.pulse(generation) {
                    break;
                }
            }
        }));
    }
}

impl Drop for MidiClock {
    fn drop(&mut self) {
        let mut core = self.inner.core.lock();
        core.generation += 1;
        if let Some(ticker) = core.ticker.take() {
            ticker.abort();
        }
    }
}
