//! In-process connector for tests and offline rehearsal.
//!
//! Every successful dial produces a [`MemoryPeer`] on the accept channel; the
//! peer plays the server side of the link.

use super::link::{Connector, LinkReader, LinkWriter};
use crate::error::TransportError;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Connector whose links are tokio channels.
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicBool,
    dial_delay: Mutex<Duration>,
    dials: AtomicUsize,
}

impl MemoryConnector {
    /// Creates a connector and the receiver on which dialed peers arrive.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                refuse: AtomicBool::new(false),
                dial_delay: Mutex::new(Duration::ZERO),
                dials: AtomicUsize::new(0),
            },
            accept_rx,
        )
    }

    /// Makes subsequent dials fail as if nothing were listening.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Delays every dial by `delay` before it resolves.
    pub fn set_dial_delay(&self, delay: Duration) {
        *self.dial_delay.lock() = delay;
    }

    /// Number of dial attempts so far, successful or not.
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

pub struct MemoryWriter(mpsc::UnboundedSender<String>);

pub struct MemoryReader(mpsc::UnboundedReceiver<Result<String, TransportError>>);

impl Connector for MemoryConnector {
    type Writer = MemoryWriter;
    type Reader = MemoryReader;

    async fn dial(&self, url: &str) -> Result<(MemoryWriter, MemoryReader), TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let delay = *self.dial_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.to_string(),
            to_client,
            from_client,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::Connect {
                url: url.to_string(),
                reason: "no listener".to_string(),
            })?;
        Ok((MemoryWriter(to_server), MemoryReader(from_server)))
    }
}

impl LinkWriter for MemoryWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.0
            .send(text)
            .map_err(|_| TransportError::Socket("peer gone".to_string()))
    }

    async fn close(&mut self) {}
}

impl LinkReader for MemoryReader {
    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        self.0.recv().await
    }
}

/// Server side of an in-memory link. Dropping it closes the link.
pub struct MemoryPeer {
    pub url: String,
    to_client: mpsc::UnboundedSender<Result<String, TransportError>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Sends a raw text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Ok(text.into())).is_ok()
    }

    /// Sends a serialized message to the client.
    pub fn send<M: Serialize>(&self, message: &M) -> bool {
        match serde_json::to_string(message) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    /// Injects a socket fault on the client's reader.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.to_client
            .send(Err(TransportError::Socket(reason.into())))
            .is_ok()
    }

    /// Next raw frame from the client, or `None` once the client closed.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame from the client, decoded.
    pub async fn recv<M: DeserializeOwned>(&mut self) -> Option<M> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text).ok()
    }

    /// Drains every frame already sent by the client.
    pub fn drain_text(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            frames.push(text);
        }
        frames
    }
}
