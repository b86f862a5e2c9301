//! Watchdog that keeps the transports connected.

use super::{Connector, Transport, WireMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Check period used when none is configured.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// Something the supervisor can nudge back online.
pub trait Reconnectable: Send + Sync {
    /// Name used in logs.
    fn channel(&self) -> &'static str;

    /// Starts a reconnect if the link is down and a target is known.
    fn ensure_connected(&self) -> bool;
}

impl<M: WireMessage, C: Connector> Reconnectable for Transport<M, C> {
    fn channel(&self) -> &'static str {
        M::CHANNEL
    }

    fn ensure_connected(&self) -> bool {
        Transport::ensure_connected(self)
    }
}

/// Fixed-interval reconnect loop over a set of transports.
///
/// At most one timer is ever active: `start` replaces a running timer.
pub struct ReconnectSupervisor {
    targets: Vec<Arc<dyn Reconnectable>>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectSupervisor {
    pub fn new(interval: Duration) -> Self {
        Self {
            targets: Vec::new(),
            interval,
            task: Mutex::new(None),
        }
    }

    /// Adds a transport to watch.
    pub fn watch(mut self, target: Arc<dyn Reconnectable>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts (or restarts) the periodic check. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let targets = self.targets.clone();
        let period = self.interval;
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for target in &targets {
                    if target.ensure_connected() {
                        tracing::info!(channel = target.channel(), "reconnect attempt started");
                    }
                }
            }
        });

        let previous = self.task.lock().replace(task);
        if let Some(previous) = previous {
            previous.abort();
            tracing::debug!("reconnect supervisor restarted");
        }
    }

    /// Cancels the periodic check.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}
