//! Resilient pub/sub connections to the sync server and the bridge process.
//!
//! A [`Transport`] owns at most one live connection. `connect` returns at once
//! and the outcome arrives as [`TransportStatus`] events; `send` never waits.
//! Each connection attempt carries a generation number, and anything produced
//! by a superseded generation (a late dial result, a trailing frame, a close)
//! is dropped, so `disconnect` is final until the next explicit `connect`.

mod link;
pub mod memory;
mod message;
mod supervisor;

pub use link::{Connector, LinkReader, LinkWriter, WsConnector, WsReader, WsWriter};
pub use message::{
    timestamp_ms, BridgeMessage, ClockAction, CueChange, HostState, HostStatus, Identity, Role,
    SectionRef, SongLoaded, SyncMessage, WireMessage,
};
pub use supervisor::{Reconnectable, ReconnectSupervisor, DEFAULT_RECONNECT_INTERVAL};

use crate::bus::{EventBus, Subscription};
use crate::error::TransportError;
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Connection state of a transport. Exactly one is current at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Everything a transport subscriber can observe.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent<M> {
    Status(TransportStatus),
    Message(M),
}

/// Transport for the device-to-device sync server.
pub type SyncTransport<C = WsConnector> = Transport<SyncMessage, C>;

/// Transport for the MIDI/OSC bridge process.
pub type BridgeTransport<C = WsConnector> = Transport<BridgeMessage, C>;

struct ConnState {
    generation: u64,
    status: TransportStatus,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
    target: Option<(String, Identity)>,
}

struct Shared<M> {
    state: Mutex<ConnState>,
    // Held while a state change and its event are published, so subscribers
    // see events in the order the changes happened. Re-entrant so handlers
    // can call back into the transport.
    dispatch: ReentrantMutex<()>,
    events: EventBus<TransportEvent<M>>,
}

impl<M: WireMessage> Shared<M> {
    /// Sets the status if `generation` is still current, then publishes it.
    fn publish_status(&self, generation: u64, status: TransportStatus) -> bool {
        let _order = self.dispatch.lock();
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return false;
            }
            state.status = status;
            if status != TransportStatus::Connected {
                state.outbound = None;
            }
        }
        self.events.emit(&TransportEvent::Status(status));
        true
    }

    fn publish_message(&self, generation: u64, message: M) {
        let _order = self.dispatch.lock();
        if self.state.lock().generation != generation {
            return;
        }
        self.events.emit(&TransportEvent::Message(message));
    }
}

/// One resilient connection carrying messages of type `M`.
pub struct Transport<M: WireMessage, C: Connector = WsConnector> {
    connector: Arc<C>,
    shared: Arc<Shared<M>>,
}

impl<M: WireMessage> Transport<M, WsConnector> {
    /// Transport that dials real WebSocket URLs.
    pub fn websocket() -> Self {
        Self::new(WsConnector)
    }
}

impl<M: WireMessage, C: Connector> Transport<M, C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            shared: Arc::new(Shared {
                state: Mutex::new(ConnState {
                    generation: 0,
                    status: TransportStatus::Disconnected,
                    outbound: None,
                    task: None,
                    target: None,
                }),
                dispatch: ReentrantMutex::new(()),
                events: EventBus::new(),
            }),
        }
    }

    /// The connector this transport dials with.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Starts connecting to `url`. Any existing connection is torn down first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, url: impl Into<String>, identity: Identity) {
        let url = url.into();
        let _order = self.shared.dispatch.lock();
        let generation = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            // Dropping the sender lets the old connection task close politely.
            state.outbound = None;
            state.task = None;
            state.target = Some((url.clone(), identity.clone()));
            state.status = TransportStatus::Connecting;
            state.generation
        };
        tracing::info!(channel = M::CHANNEL, %url, generation, "connecting");
        self.shared
            .events
            .emit(&TransportEvent::Status(TransportStatus::Connecting));

        let task = tokio::spawn(run_connection(
            Arc::clone(&self.connector),
            Arc::clone(&self.shared),
            generation,
            url,
            identity,
        ));
        let mut state = self.shared.state.lock();
        if state.generation == generation {
            state.task = Some(task);
        }
    }

    /// Sends a message if the connection is open. Returns whether the send was attempted.
    pub fn send(&self, message: &M) -> bool {
        let state = self.shared.state.lock();
        if state.status != TransportStatus::Connected {
            return false;
        }
        let Some(outbound) = state.outbound.as_ref() else {
            return false;
        };
        match serde_json::to_string(message) {
            Ok(text) => outbound.send(text).is_ok(),
            Err(e) => {
                tracing::warn!(channel = M::CHANNEL, error = %TransportError::Encode(e.to_string()), "dropping outbound message");
                false
            }
        }
    }

    /// Closes the connection now and forgets the target, so the supervisor
    /// will not bring it back.
    pub fn disconnect(&self) {
        let _order = self.shared.dispatch.lock();
        {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.outbound = None;
            state.task = None;
            state.target = None;
            state.status = TransportStatus::Disconnected;
        }
        tracing::info!(channel = M::CHANNEL, "disconnected by request");
        self.shared
            .events
            .emit(&TransportEvent::Status(TransportStatus::Disconnected));
    }

    /// Registers a handler for status changes and inbound messages.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TransportEvent<M>) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(handler)
    }

    pub fn status(&self) -> TransportStatus {
        self.shared.state.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == TransportStatus::Connected
    }

    /// The `(url, identity)` of the last `connect`, unless disconnected since.
    pub fn target(&self) -> Option<(String, Identity)> {
        self.shared.state.lock().target.clone()
    }

    /// Reconnects with the last target if the link is down.
    ///
    /// Returns true if a new attempt was started. A transport that is still
    /// `Connecting` is left alone.
    pub fn ensure_connected(&self) -> bool {
        let target = {
            let state = self.shared.state.lock();
            match state.status {
                TransportStatus::Disconnected | TransportStatus::Error => state.target.clone(),
                TransportStatus::Connecting | TransportStatus::Connected => None,
            }
        };
        match target {
            Some((url, identity)) => {
                tracing::debug!(channel = M::CHANNEL, %url, "reconnecting");
                self.connect(url, identity);
                true
            }
            None => false,
        }
    }
}

impl<M: WireMessage, C: Connector> Drop for Transport<M, C> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.generation += 1;
        state.outbound = None;
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }
}

async fn run_connection<M: WireMessage, C: Connector>(
    connector: Arc<C>,
    shared: Arc<Shared<M>>,
    generation: u64,
    url: String,
    identity: Identity,
) {
    let (mut writer, mut reader) = match connector.dial(&url).await {
        Ok(link) => link,
        Err(e) => {
            tracing::warn!(channel = M::CHANNEL, error = %e, "connect failed");
            shared.publish_status(generation, TransportStatus::Error);
            return;
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    // The greeting is queued before anyone can observe `Connected`, so it is
    // always the first frame on the wire.
    if let Some(hello) = M::hello(&identity) {
        match serde_json::to_string(&hello) {
            Ok(text) => {
                let _ = outbound_tx.send(text);
            }
            Err(e) => tracing::warn!(channel = M::CHANNEL, error = %e, "could not encode greeting"),
        }
    }

    let opened = {
        let _order = shared.dispatch.lock();
        let current = {
            let mut state = shared.state.lock();
            if state.generation == generation {
                state.outbound = Some(outbound_tx);
                state.status = TransportStatus::Connected;
                true
            } else {
                false
            }
        };
        if current {
            tracing::info!(channel = M::CHANNEL, %url, "connected");
            shared
                .events
                .emit(&TransportEvent::Status(TransportStatus::Connected));
        }
        current
    };
    if !opened {
        tracing::debug!(channel = M::CHANNEL, generation, "discarding superseded link");
        writer.close().await;
        return;
    }

    let outcome: Result<(), TransportError> = loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = writer.send_text(text).await {
                        break Err(e);
                    }
                }
                // Sender dropped: disconnect() or a newer connect() took over.
                None => break Ok(()),
            },
            inbound = reader.recv_text() => match inbound {
                Some(Ok(text)) => match serde_json::from_str::<M>(&text) {
                    Ok(message) => shared.publish_message(generation, message),
                    Err(e) => tracing::warn!(channel = M::CHANNEL, error = %e, "dropping unparseable frame"),
                },
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            },
        }
    };

    writer.close().await;
    match outcome {
        Ok(()) => {
            if shared.publish_status(generation, TransportStatus::Disconnected) {
                tracing::info!(channel = M::CHANNEL, "remote closed");
            }
        }
        Err(e) => {
            if shared.publish_status(generation, TransportStatus::Error) {
                tracing::warn!(channel = M::CHANNEL, error = %e, "connection fault");
            }
        }
    }
}
