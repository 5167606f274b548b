//! Socket transport abstraction
//!
//! The manager only sees [`SocketTransport`] and [`SocketConnection`]; the
//! production implementation speaks WebSocket with JSON frames.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// One named event and its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Opens connections to an address
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn open(&self, address: &str) -> Result<Box<dyn SocketConnection>, String>;
}

/// A live bidirectional connection.
///
/// `recv` must be cancel safe; the manager races it against outbound frames.
#[async_trait]
pub trait SocketConnection: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), String>;

    /// Next inbound frame; `None` once the peer has gone away
    async fn recv(&mut self) -> Option<Frame>;

    async fn close(&mut self);
}

#[async_trait]
impl<T: SocketTransport + ?Sized> SocketTransport for Arc<T> {
    async fn open(&self, address: &str) -> Result<Box<dyn SocketConnection>, String> {
        (**self).open(address).await
    }
}

/// WebSocket transport using `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl SocketTransport for WsTransport {
    async fn open(&self, address: &str) -> Result<Box<dyn SocketConnection>, String> {
        let (stream, _response) = tokio_tungstenite::connect_async(address)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl SocketConnection for WsConnection {
    async fn send(&mut self, frame: Frame) -> Result<(), String> {
        let text = serde_json::to_string(&frame).map_err(|e| e.to_string())?;
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| e.to_string())
    }

    async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(text.as_str()) {
                    Ok(frame) => return Some(frame),
                    Err(e) => {
                        tracing::debug!(error = %e, "Ignoring malformed frame");
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket read failed");
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }
    }
}
