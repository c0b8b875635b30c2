//! WebSocket connection to the gateway
//!
//! Wraps the split halves of a `tokio-tungstenite` stream. Writers share one
//! async mutex so heartbeats and commands never interleave mid-frame.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::protocol::GatewayMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tungstenite::Error>,
    },

    /// The socket is closed; carries the close code when the peer sent one
    #[error("connection closed (code {code:?})")]
    Closed { code: Option<u16> },

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Closed { code: None }
            }
            other => Self::WebSocket(Box::new(other)),
        }
    }
}

/// A live WebSocket connection to the gateway
pub struct Transport {
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<SplitStream<WsStream>>,
    open: AtomicBool,
}

impl Transport {
    /// Perform the WebSocket handshake
    pub async fn open(url: &str) -> Result<Self, TransportError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                source: Box::new(e),
            })?;
        let (writer, reader) = ws.split();

        tracing::debug!(url = %url, "Gateway socket opened");

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            open: AtomicBool::new(true),
        })
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Serialize and write one frame
    pub async fn send(&self, message: &GatewayMessage) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed { code: None });
        }
        let json = message.to_json()?;
        tracing::trace!(op = %message.op, "Sending frame");

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(Message::Text(json)).await {
            self.open.store(false, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }

    /// Wait for the next decodable frame.
    ///
    /// Ping/pong, binary frames and undecodable JSON are skipped. Cancelling
    /// this future never loses a frame.
    pub async fn receive(&self) -> Result<GatewayMessage, TransportError> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => match GatewayMessage::from_json(&text) {
                    Ok(message) => return Ok(message),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping undecodable frame");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    self.open.store(false, Ordering::Release);
                    let code = frame.map(|f| u16::from(f.code));
                    return Err(TransportError::Closed { code });
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::warn!(len = data.len(), "Dropping binary frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    self.open.store(false, Ordering::Release);
                    return Err(e.into());
                }
                None => {
                    self.open.store(false, Ordering::Release);
                    return Err(TransportError::Closed { code: None });
                }
            }
        }
    }

    /// Send a close frame; the socket is unusable afterwards
    pub async fn close(&self, code: u16) -> Result<(), TransportError> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let frame = CloseFrame {
            code: code.into(),
            reason: "".into(),
        };
        let mut writer = self.writer.lock().await;
        writer.send(Message::Close(Some(frame))).await?;
        let _ = writer.close().await;
        tracing::debug!(close_code = code, "Gateway socket closed");
        Ok(())
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("open", &self.is_open())
            .finish()
    }
}
