//! Test helpers for integration tests
//!
//! Provides an in-process gateway server speaking the JSON frame protocol
//! over `ws://127.0.0.1`, and a REST collaborator that never leaves the
//! process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use cord_client::{Client, ClientConfig};
use cord_core::User;
use cord_gateway::protocol::{GatewayMessage, OpCode};
use cord_http::{Http, HttpError, HttpResult, Method};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Upper bound for any single step of a test
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Mock gateway server; every accepted socket is handed to the test
pub struct MockGateway {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<MockConnection>,
    _handle: JoinHandle<()>,
}

impl MockGateway {
    /// Bind to an ephemeral port and start accepting
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, connections) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => {
                        if tx.send(MockConnection::new(ws)).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Mock gateway handshake failed"),
                }
            }
        });

        Ok(Self {
            addr,
            connections,
            _handle: handle,
        })
    }

    /// Base URL to configure the client with
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait for the client's next connection
    pub async fn next_connection(&mut self) -> Result<MockConnection> {
        tokio::time::timeout(STEP_TIMEOUT, self.connections.recv())
            .await
            .context("timed out waiting for a gateway connection")?
            .context("mock gateway stopped")
    }

    /// `None` if no connection arrives within `wait`
    pub async fn try_next_connection(&mut self, wait: Duration) -> Option<MockConnection> {
        tokio::time::timeout(wait, self.connections.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Server side of one client connection
pub struct MockConnection {
    ws: WebSocketStream<TcpStream>,
    /// Answer client heartbeats with ACKs
    pub ack_heartbeats: bool,
    /// Heartbeats seen so far
    pub heartbeats: usize,
}

impl MockConnection {
    fn new(ws: WebSocketStream<TcpStream>) -> Self {
        Self {
            ws,
            ack_heartbeats: true,
            heartbeats: 0,
        }
    }

    pub async fn send(&mut self, frame: &GatewayMessage) -> Result<()> {
        self.ws.send(Message::Text(frame.to_json()?)).await?;
        Ok(())
    }

    pub async fn hello(&mut self, heartbeat_interval_ms: u64) -> Result<()> {
        self.send(&GatewayMessage::hello(heartbeat_interval_ms)).await
    }

    pub async fn dispatch(&mut self, event_type: &str, seq: u64, data: Value) -> Result<()> {
        self.send(&GatewayMessage::dispatch(event_type, seq, data)).await
    }

    /// Close the socket with a gateway close code
    pub async fn close(&mut self, code: u16) -> Result<()> {
        self.ws
            .close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: "".into(),
            }))
            .await?;
        Ok(())
    }

    /// Next client frame that is not a heartbeat
    pub async fn recv(&mut self) -> Result<GatewayMessage> {
        loop {
            match self.next_frame().await? {
                Some(frame) if frame.op == OpCode::Heartbeat => self.on_heartbeat().await?,
                Some(frame) => return Ok(frame),
                None => bail!("client closed the connection"),
            }
        }
    }

    /// Next client frame, which must carry `op`
    pub async fn expect(&mut self, op: OpCode) -> Result<GatewayMessage> {
        let frame = self.recv().await?;
        if frame.op != op {
            bail!("expected {op}, got {}", frame.op);
        }
        Ok(frame)
    }

    /// Next client frame, which must be a heartbeat; returns its sequence
    pub async fn expect_heartbeat(&mut self) -> Result<Option<u64>> {
        match self.next_frame().await? {
            Some(frame) if frame.op == OpCode::Heartbeat => {
                self.on_heartbeat().await?;
                Ok(frame.d.and_then(|d| d.as_u64()))
            }
            Some(frame) => bail!("expected a heartbeat, got {}", frame.op),
            None => bail!("client closed the connection"),
        }
    }

    /// Read until the client closes; returns its close code
    pub async fn closed_by_client(&mut self) -> Result<Option<u16>> {
        tokio::time::timeout(STEP_TIMEOUT, async {
            while let Some(message) = self.ws.next().await {
                match message {
                    Ok(Message::Close(frame)) => return Ok(frame.map(|f| u16::from(f.code))),
                    Ok(Message::Text(text)) => {
                        if GatewayMessage::from_json(&text).is_ok_and(|f| f.op == OpCode::Heartbeat) {
                            self.heartbeats += 1;
                        }
                    }
                    Ok(_) => {}
                    Err(_) => return Ok(None),
                }
            }
            Ok(None)
        })
        .await
        .context("timed out waiting for the client to close")?
    }

    async fn next_frame(&mut self) -> Result<Option<GatewayMessage>> {
        loop {
            let message = tokio::time::timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .context("timed out waiting for a client frame")?;
            match message {
                Some(Ok(Message::Text(text))) => return Ok(Some(GatewayMessage::from_json(&text)?)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn on_heartbeat(&mut self) -> Result<()> {
        self.heartbeats += 1;
        if self.ack_heartbeats {
            self.send(&GatewayMessage {
                op: OpCode::HeartbeatAck,
                d: None,
                s: None,
                t: None,
            })
            .await?;
        }
        Ok(())
    }
}

/// REST collaborator that accepts [`TOKEN`](crate::TOKEN)
pub struct MockHttp {
    gateway_url: String,
}

impl MockHttp {
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
        }
    }
}

#[async_trait]
impl Http for MockHttp {
    async fn get_gateway_url(&self) -> HttpResult<String> {
        Ok(self.gateway_url.clone())
    }

    async fn static_login(&self, token: &str) -> HttpResult<User> {
        if token != crate::TOKEN {
            return Err(HttpError::Unauthorized);
        }
        Ok(serde_json::from_value(crate::bot_user())?)
    }

    async fn request(&self, _method: Method, _route: &str, _body: Option<Value>) -> HttpResult<Value> {
        Err(HttpError::Status {
            status: 404,
            retry_after: None,
        })
    }
}

/// Client configuration with short timeouts, pointed at `gateway`
pub fn test_config(gateway: &MockGateway) -> ClientConfig {
    ClientConfig::default()
        .with_gateway_url(gateway.url())
        .with_hello_timeout(Duration::from_secs(2))
        .with_identify_delay(Duration::from_millis(10))
        .with_guild_ready_timeout(Duration::from_secs(2))
}

/// A logged-in client for `gateway`
pub async fn logged_in_client(gateway: &MockGateway) -> Result<Client> {
    let http = Arc::new(MockHttp::new(gateway.url()));
    let client = Client::with_http(test_config(gateway), http)?;
    client.login(crate::TOKEN).await?;
    Ok(client)
}

/// Run `client.connect(reconnect)` in the background
pub fn spawn_connect(client: &Client, reconnect: bool) -> JoinHandle<cord_client::ClientResult<()>> {
    let client = client.clone();
    tokio::spawn(async move { client.connect(reconnect).await })
}

/// Enable test logs once; honors `RUST_LOG`
pub fn init_logging() {
    let _ = cord_common::try_init_tracing();
}
