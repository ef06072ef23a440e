//! Transport seam
//!
//! The session loop only ever sees this trait: a stream of text frames in,
//! text frames out, closable once. The production implementation wraps a
//! tungstenite WebSocket; tests substitute channel-backed pairs.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::TransportError;

/// A duplex text-frame transport.
#[async_trait]
pub trait Transport: Send {
    /// Next inbound text frame, or `None` once the peer is gone.
    async fn recv(&mut self) -> Option<String>;

    /// Write one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Release the connection. Must be safe to call after a failed send.
    async fn close(&mut self);
}

/// WebSocket transport over a tungstenite stream.
///
/// OCPP-J runs on text frames only: binary payloads are dropped with a
/// warning, ping/pong stays inside tungstenite.
pub struct WsTransport<S> {
    inner: WebSocketStream<S>,
}

impl<S> WsTransport<S> {
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Option<String> {
        while let Some(msg) = self.inner.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Binary(data)) => {
                    warn!("Binary message received ({} bytes), ignoring", data.len());
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
                    // Pong is sent automatically by tungstenite
                }
                Ok(Message::Close(frame)) => {
                    debug!("Close frame received: {:?}", frame);
                    return None;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    return None;
                }
            }
        }
        None
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}
