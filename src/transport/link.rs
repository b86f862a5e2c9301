//! Connectors: how a transport opens a bidirectional text-frame link.
//!
//! A connector dials a URL and hands back a writer/reader pair. Splitting the
//! link lets the connection task wait on inbound frames and outbound payloads
//! at the same time.

use crate::error::TransportError;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Outbound half of an open link.
pub trait LinkWriter: Send + 'static {
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Closes the link politely. Errors are ignored; the link is gone either way.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Inbound half of an open link.
pub trait LinkReader: Send + 'static {
    /// Next text frame. `None` means the remote end closed the link.
    ///
    /// Must be cancel-safe: the connection task races it against outbound sends.
    fn recv_text(&mut self) -> impl Future<Output = Option<Result<String, TransportError>>> + Send;
}

/// Opens links for a transport.
pub trait Connector: Send + Sync + 'static {
    type Writer: LinkWriter;
    type Reader: LinkReader;

    fn dial(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<(Self::Writer, Self::Reader), TransportError>> + Send;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production connector speaking WebSocket text frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

pub struct WsWriter(SplitSink<WsStream, Message>);

pub struct WsReader(SplitStream<WsStream>);

impl Connector for WsConnector {
    type Writer = WsWriter;
    type Reader = WsReader;

    async fn dial(&self, url: &str) -> Result<(WsWriter, WsReader), TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let (sink, stream) = stream.split();
        Ok((WsWriter(sink), WsReader(stream)))
    }
}

impl LinkWriter for WsWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.0
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.0.close().await;
    }
}

impl LinkReader for WsReader {
    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite; binary frames are not part of the protocol.
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::Socket(e.to_string()))),
            }
        }
    }
}
