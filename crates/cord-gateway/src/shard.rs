//! Gateway state machine
//!
//! A [`Shard`] owns one gateway session and drives it through
//! connect, IDENTIFY/RESUME, steady state and reconnects:
//!
//! ```text
//! Disconnected -> Connecting -> Identifying -> Ready
//!                     ^            Resuming  -> Ready
//!                     '---------- (reconnect) --'
//! ```
//!
//! `Closed` is terminal and only reached through [`GatewayHandle::close`],
//! a fatal close code, or a failure while reconnecting is disabled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cord_common::ClientConfig;
use cord_core::Intents;
use cord_http::Http;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Notify};

use crate::backoff::Backoff;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{
    gateway_query_url, CloseAction, CloseCode, GatewayMessage, HelloPayload, IdentifyPayload,
    IdentifyProperties, OpCode, PresenceUpdatePayload, RequestGuildMembersPayload, ResumePayload,
    VoiceStateUpdatePayload,
};
use crate::sink::{DispatchFrame, EventSink, ShardLifecycle};
use crate::transport::{heartbeat, HeartbeatState, Session, Transport, TransportError};

/// Observable state of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardState {
    Disconnected,
    Connecting,
    Identifying,
    Resuming,
    Ready,
    Closed,
}

impl ShardState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Ready => "ready",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ShardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outbound requests for a running shard
#[derive(Debug, Clone)]
pub enum ShardCommand {
    PresenceUpdate(PresenceUpdatePayload),
    VoiceStateUpdate(VoiceStateUpdatePayload),
    RequestGuildMembers(RequestGuildMembersPayload),
    Close,
}

/// Connection settings of one shard
#[derive(Clone)]
pub struct ShardConfig {
    pub token: String,
    pub intents: Intents,
    pub shard_id: u32,
    pub shard_count: u32,
    pub large_threshold: u8,
    /// Presence sent with IDENTIFY; kept current by presence commands
    pub presence: Option<PresenceUpdatePayload>,
    /// Skip the REST lookup and connect here
    pub gateway_url: Option<String>,
    pub hello_timeout: Duration,
    pub identify_delay: Duration,
}

impl ShardConfig {
    /// Single-shard defaults for `token`
    pub fn new(token: impl Into<String>) -> Self {
        Self::from_client_config(&ClientConfig::default(), token)
    }

    pub fn from_client_config(config: &ClientConfig, token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            intents: config.intents,
            shard_id: config.shard_id,
            shard_count: config.shard_count,
            large_threshold: config.large_threshold,
            presence: None,
            gateway_url: config.gateway_url.clone(),
            hello_timeout: config.hello_timeout,
            identify_delay: config.identify_delay,
        }
    }
}

impl std::fmt::Debug for ShardConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardConfig")
            .field("intents", &self.intents)
            .field("shard", &[self.shard_id, self.shard_count])
            .field("large_threshold", &self.large_threshold)
            .field("gateway_url", &self.gateway_url)
            .field("hello_timeout", &self.hello_timeout)
            .field("identify_delay", &self.identify_delay)
            .finish()
    }
}

/// Cloneable handle for talking to a running shard
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    shard_id: u32,
    commands: mpsc::UnboundedSender<ShardCommand>,
    state: watch::Receiver<ShardState>,
    heartbeat: Arc<HeartbeatState>,
}

impl GatewayHandle {
    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    /// Queue a command for the shard
    pub fn send(&self, command: ShardCommand) -> GatewayResult<()> {
        self.commands
            .send(command)
            .map_err(|_| GatewayError::ShardStopped)
    }

    pub fn update_presence(&self, presence: PresenceUpdatePayload) -> GatewayResult<()> {
        self.send(ShardCommand::PresenceUpdate(presence))
    }

    pub fn update_voice_state(&self, voice: VoiceStateUpdatePayload) -> GatewayResult<()> {
        self.send(ShardCommand::VoiceStateUpdate(voice))
    }

    pub fn request_guild_members(&self, request: RequestGuildMembersPayload) -> GatewayResult<()> {
        self.send(ShardCommand::RequestGuildMembers(request))
    }

    /// Ask the shard to close with code 1000 and stop
    pub fn close(&self) -> GatewayResult<()> {
        self.send(ShardCommand::Close)
    }

    pub fn state(&self) -> ShardState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<ShardState> {
        self.state.clone()
    }

    /// Time between the last heartbeat and its ACK
    pub fn latency(&self) -> Option<Duration> {
        self.heartbeat.latency()
    }
}

/// Fields of READY the state machine needs
#[derive(Debug, Deserialize)]
struct ReadySession {
    session_id: String,
    #[serde(default)]
    resume_gateway_url: Option<String>,
}

/// How a single connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Close was requested
    Shutdown,
    /// The gateway or the heartbeat asked for a new connection
    Reconnect,
    /// The socket closed underneath us
    Closed { code: Option<u16>, was_ready: bool },
}

/// One gateway connection and its reconnect loop
pub struct Shard {
    config: ShardConfig,
    http: Arc<dyn Http>,
    session: Arc<Session>,
    heartbeat: Arc<HeartbeatState>,
    backoff: Backoff,
    commands: mpsc::UnboundedReceiver<ShardCommand>,
    command_tx: mpsc::UnboundedSender<ShardCommand>,
    state: watch::Sender<ShardState>,
    /// Commands received while no session was ready
    deferred: Vec<ShardCommand>,
    /// Whether an IDENTIFY has ever been sent
    identified: bool,
}

impl Shard {
    pub fn new(config: ShardConfig, http: Arc<dyn Http>) -> Self {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ShardState::Disconnected);
        Self {
            config,
            http,
            session: Arc::new(Session::new()),
            heartbeat: Arc::new(HeartbeatState::new()),
            backoff: Backoff::default(),
            commands,
            command_tx,
            state,
            deferred: Vec::new(),
            identified: false,
        }
    }

    /// Replace the reconnect backoff policy
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn handle(&self) -> GatewayHandle {
        GatewayHandle {
            shard_id: self.config.shard_id,
            commands: self.command_tx.clone(),
            state: self.state.subscribe(),
            heartbeat: Arc::clone(&self.heartbeat),
        }
    }

    pub fn id(&self) -> u32 {
        self.config.shard_id
    }

    pub fn state(&self) -> ShardState {
        *self.state.borrow()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn set_state(&self, state: ShardState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(shard_id = self.config.shard_id, from = %previous, to = %state, "Shard state changed");
        }
    }

    /// Connect and keep the session alive until closed.
    ///
    /// Returns `Ok(())` after [`GatewayHandle::close`] or a clean 1000 close
    /// with `reconnect == false`. Fatal close codes always return their error;
    /// other failures are retried with backoff unless `reconnect` is false.
    pub async fn run(&mut self, sink: &dyn EventSink, reconnect: bool) -> GatewayResult<()> {
        let shard_id = self.config.shard_id;

        loop {
            match self.run_session(sink).await {
                Ok(SessionEnd::Shutdown) => {
                    self.set_state(ShardState::Closed);
                    tracing::info!(shard_id, "Shard closed");
                    return Ok(());
                }
                Ok(SessionEnd::Reconnect) => {
                    self.set_state(ShardState::Disconnected);
                    sink.lifecycle(ShardLifecycle::Disconnected {
                        shard_id,
                        close_code: None,
                    });
                }
                Ok(SessionEnd::Closed { code, was_ready }) => {
                    self.set_state(ShardState::Disconnected);
                    sink.lifecycle(ShardLifecycle::Disconnected {
                        shard_id,
                        close_code: code,
                    });

                    if let Some(err) = code.and_then(|c| GatewayError::from_close_code(c, shard_id)) {
                        tracing::error!(shard_id, close_code = ?code, error = %err, "Fatal gateway close");
                        self.set_state(ShardState::Closed);
                        return Err(err);
                    }
                    if CloseCode::classify(code) == CloseAction::Reidentify {
                        tracing::info!(shard_id, close_code = ?code, "Session invalidated by close code");
                        self.session.clear();
                    }
                    if !reconnect {
                        self.set_state(ShardState::Closed);
                        return match code {
                            Some(1000) => Ok(()),
                            _ => Err(GatewayError::Closed { code }),
                        };
                    }

                    tracing::warn!(shard_id, close_code = ?code, "Gateway connection closed, reconnecting");
                    // A session that never got ready is retried with backoff
                    if !was_ready && self.backoff_or_close().await {
                        return Ok(());
                    }
                }
                Err(err) => {
                    self.set_state(ShardState::Disconnected);
                    sink.lifecycle(ShardLifecycle::Disconnected {
                        shard_id,
                        close_code: None,
                    });
                    if err.is_fatal() || !reconnect {
                        self.set_state(ShardState::Closed);
                        return Err(err);
                    }

                    tracing::warn!(shard_id, error = %err, "Gateway connection failed");
                    if self.backoff_or_close().await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Wait out the next backoff delay; `true` if Close arrived meanwhile
    async fn backoff_or_close(&mut self) -> bool {
        let delay = self.backoff.next_delay();
        tracing::info!(
            shard_id = self.config.shard_id,
            delay_ms = delay.as_millis() as u64,
            "Waiting before reconnect"
        );
        let closed = self.sleep_or_close(delay).await;
        if closed {
            self.set_state(ShardState::Closed);
            tracing::info!(shard_id = self.config.shard_id, "Shard closed while disconnected");
        }
        closed
    }

    /// Sleep while still honoring Close; `true` if Close arrived
    async fn sleep_or_close(&mut self, delay: Duration) -> bool {
        self.until_close(tokio::time::sleep(delay)).await.is_none()
    }

    /// Drive `step` to completion unless Close arrives first.
    ///
    /// Other commands received meanwhile are deferred.
    async fn until_close<F: Future>(&mut self, step: F) -> Option<F::Output> {
        tokio::pin!(step);
        loop {
            tokio::select! {
                output = &mut step => return Some(output),
                command = self.commands.recv() => match command {
                    Some(ShardCommand::Close) | None => return None,
                    Some(command) => self.defer(command),
                },
            }
        }
    }

    fn defer(&mut self, command: ShardCommand) {
        tracing::debug!(shard_id = self.config.shard_id, "Deferring command until the session is ready");
        if let ShardCommand::PresenceUpdate(presence) = &command {
            self.config.presence = Some(presence.clone());
        }
        self.deferred.push(command);
    }

    /// Resume URL, then the configured override, then the REST lookup
    fn gateway_base(&self, resume: bool) -> impl Future<Output = GatewayResult<String>> {
        let preset = resume
            .then(|| self.session.resume_url())
            .flatten()
            .or_else(|| self.config.gateway_url.clone());
        let http = Arc::clone(&self.http);
        async move {
            match preset {
                Some(url) => Ok(url),
                None => Ok(http.get_gateway_url().await?),
            }
        }
    }

    /// One connection from handshake to close
    async fn run_session(&mut self, sink: &dyn EventSink) -> GatewayResult<SessionEnd> {
        let shard_id = self.config.shard_id;
        let resume = self.session.can_resume();

        if !resume && self.identified && self.sleep_or_close(self.config.identify_delay).await {
            return Ok(SessionEnd::Shutdown);
        }

        self.set_state(ShardState::Connecting);
        let lookup = self.gateway_base(resume);
        let Some(base) = self.until_close(lookup).await else {
            return Ok(SessionEnd::Shutdown);
        };
        let url = gateway_query_url(&base?);
        tracing::info!(shard_id, url = %url, resume, "Connecting to gateway");
        let Some(opened) = self.until_close(Transport::open(&url)).await else {
            return Ok(SessionEnd::Shutdown);
        };
        let transport = Arc::new(opened?);

        let hello_wait = tokio::time::timeout(
            self.config.hello_timeout,
            Self::wait_for_hello(&transport, sink),
        );
        let Some(hello) = self.until_close(hello_wait).await else {
            if let Err(e) = transport.close(CloseCode::Normal.as_u16()).await {
                tracing::debug!(shard_id, error = %e, "Close frame not sent");
            }
            return Ok(SessionEnd::Shutdown);
        };
        let hello = match hello {
            Ok(Ok(hello)) => hello,
            Ok(Err(TransportError::Closed { code })) => {
                return Ok(SessionEnd::Closed {
                    code,
                    was_ready: false,
                })
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                let _ = transport.close(CloseCode::Normal.as_u16()).await;
                return Err(GatewayError::HelloTimeout);
            }
        };
        sink.lifecycle(ShardLifecycle::Connected { shard_id });

        let zombie = Arc::new(Notify::new());
        self.heartbeat
            .start(Duration::from_millis(hello.heartbeat_interval));
        let _heartbeat = heartbeat::spawn(
            shard_id,
            Arc::clone(&transport),
            Arc::clone(&self.session),
            Arc::clone(&self.heartbeat),
            Arc::clone(&zombie),
        );

        if resume {
            self.send_resume(&transport).await?;
        } else {
            self.send_identify(&transport).await?;
        }

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(ShardCommand::Close) | None => {
                        if let Err(e) = transport.close(CloseCode::Normal.as_u16()).await {
                            tracing::debug!(shard_id, error = %e, "Close frame not sent");
                        }
                        return Ok(SessionEnd::Shutdown);
                    }
                    Some(command) => {
                        if self.state() == ShardState::Ready {
                            self.send_command(&transport, command).await?;
                        } else {
                            self.defer(command);
                        }
                    }
                },

                () = zombie.notified() => {
                    tracing::warn!(shard_id, "Connection zombied, reconnecting");
                    let _ = transport.close(CloseCode::UnknownError.as_u16()).await;
                    return Ok(SessionEnd::Reconnect);
                }

                frame = transport.receive() => match frame {
                    Ok(message) => {
                        if let Some(end) = self.handle_frame(message, &transport, sink).await? {
                            return Ok(end);
                        }
                    }
                    Err(TransportError::Closed { code }) => {
                        return Ok(SessionEnd::Closed {
                            code,
                            was_ready: self.state() == ShardState::Ready,
                        });
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }
    }

    async fn wait_for_hello(
        transport: &Transport,
        sink: &dyn EventSink,
    ) -> Result<HelloPayload, TransportError> {
        loop {
            let message = transport.receive().await?;
            sink.raw_receive(&message);
            match message.as_hello() {
                Some(hello) => return Ok(hello),
                None => tracing::debug!(op = %message.op, "Ignoring frame before HELLO"),
            }
        }
    }

    async fn send_identify(&mut self, transport: &Transport) -> GatewayResult<()> {
        // A fresh session numbers its events from 1 again
        self.session.clear();

        let payload = IdentifyPayload {
            token: self.config.token.clone(),
            intents: self.config.intents,
            properties: IdentifyProperties::default(),
            shard: [self.config.shard_id, self.config.shard_count],
            large_threshold: self.config.large_threshold,
            presence: self.config.presence.clone(),
            compress: false,
        };
        transport.send(&GatewayMessage::identify(&payload)?).await?;
        self.identified = true;
        self.set_state(ShardState::Identifying);

        tracing::info!(
            shard_id = self.config.shard_id,
            shard_count = self.config.shard_count,
            "Sent IDENTIFY"
        );
        Ok(())
    }

    async fn send_resume(&mut self, transport: &Transport) -> GatewayResult<()> {
        let (Some(session_id), Some(seq)) = (self.session.session_id(), self.session.sequence())
        else {
            return self.send_identify(transport).await;
        };

        let payload = ResumePayload {
            token: self.config.token.clone(),
            session_id: session_id.clone(),
            seq,
        };
        transport.send(&GatewayMessage::resume(&payload)?).await?;
        self.set_state(ShardState::Resuming);

        tracing::info!(shard_id = self.config.shard_id, session_id = %session_id, seq, "Sent RESUME");
        Ok(())
    }

    async fn send_command(&mut self, transport: &Transport, command: ShardCommand) -> GatewayResult<()> {
        let message = match command {
            ShardCommand::PresenceUpdate(presence) => {
                let message = GatewayMessage::presence_update(&presence)?;
                self.config.presence = Some(presence);
                message
            }
            ShardCommand::VoiceStateUpdate(voice) => GatewayMessage::voice_state_update(&voice)?,
            ShardCommand::RequestGuildMembers(request) => {
                GatewayMessage::request_guild_members(&request)?
            }
            ShardCommand::Close => return Ok(()),
        };
        transport.send(&message).await?;
        Ok(())
    }

    async fn flush_deferred(&mut self, transport: &Transport) -> GatewayResult<()> {
        for command in std::mem::take(&mut self.deferred) {
            self.send_command(transport, command).await?;
        }
        Ok(())
    }

    async fn handle_frame(
        &mut self,
        message: GatewayMessage,
        transport: &Transport,
        sink: &dyn EventSink,
    ) -> GatewayResult<Option<SessionEnd>> {
        let shard_id = self.config.shard_id;
        sink.raw_receive(&message);

        match message.op {
            OpCode::Dispatch => {
                let (Some(event_type), Some(seq)) = (message.t, message.s) else {
                    tracing::warn!(shard_id, "Dropping dispatch without type or sequence");
                    return Ok(None);
                };
                if !self.session.advance(seq) {
                    tracing::debug!(shard_id, seq, event = %event_type, "Dropping replayed dispatch");
                    return Ok(None);
                }
                tracing::trace!(shard_id, seq, event = %event_type, "Dispatch received");

                let data = message.d.unwrap_or(Value::Null);
                let ready = if event_type == "READY" {
                    match ReadySession::deserialize(&data) {
                        Ok(ready) => Some(ready),
                        Err(e) => {
                            tracing::warn!(shard_id, error = %e, "READY without a usable session");
                            None
                        }
                    }
                } else {
                    None
                };
                let resumed = event_type == "RESUMED";

                sink.dispatch(DispatchFrame {
                    shard_id,
                    event_type,
                    seq,
                    data,
                });

                if let Some(ready) = ready {
                    self.session
                        .establish(ready.session_id, ready.resume_gateway_url);
                    self.on_session_ready(transport).await?;
                } else if resumed {
                    tracing::info!(shard_id, seq, "Session resumed");
                    self.on_session_ready(transport).await?;
                }
                Ok(None)
            }
            OpCode::Heartbeat => {
                tracing::debug!(shard_id, "Gateway requested a heartbeat");
                transport
                    .send(&GatewayMessage::heartbeat(self.session.sequence()))
                    .await?;
                Ok(None)
            }
            OpCode::HeartbeatAck => {
                self.heartbeat.ack();
                Ok(None)
            }
            OpCode::Reconnect => {
                tracing::info!(shard_id, "Gateway requested a reconnect");
                let _ = transport.close(CloseCode::UnknownError.as_u16()).await;
                Ok(Some(SessionEnd::Reconnect))
            }
            OpCode::InvalidSession => {
                let resumable = message.as_invalid_session().unwrap_or(false);
                tracing::warn!(shard_id, resumable, "Session invalidated");
                let code = if resumable {
                    CloseCode::UnknownError
                } else {
                    self.session.clear();
                    CloseCode::Normal
                };
                let _ = transport.close(code.as_u16()).await;
                Ok(Some(SessionEnd::Reconnect))
            }
            OpCode::Hello => {
                tracing::debug!(shard_id, "Ignoring repeated HELLO");
                Ok(None)
            }
            op => {
                tracing::debug!(shard_id, op = %op, "Ignoring unexpected opcode");
                Ok(None)
            }
        }
    }

    async fn on_session_ready(&mut self, transport: &Transport) -> GatewayResult<()> {
        self.set_state(ShardState::Ready);
        self.backoff.reset();
        self.flush_deferred(transport).await
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("session_id", &self.session.session_id())
            .field("seq", &self.session.sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cord_core::User;
    use cord_http::{HttpError, HttpResult, Method};

    struct NoHttp;

    #[async_trait]
    impl Http for NoHttp {
        async fn get_gateway_url(&self) -> HttpResult<String> {
            Err(HttpError::GatewayNotFound)
        }

        async fn static_login(&self, _token: &str) -> HttpResult<User> {
            Err(HttpError::Unauthorized)
        }

        async fn request(&self, _: Method, _: &str, _: Option<Value>) -> HttpResult<Value> {
            Err(HttpError::GatewayNotFound)
        }
    }

    struct NullSink;

    impl EventSink for NullSink {
        fn dispatch(&self, _frame: DispatchFrame) {}
        fn lifecycle(&self, _event: ShardLifecycle) {}
    }

    #[test]
    fn test_shard_config_from_client_config() {
        let config = ClientConfig::default()
            .with_shard(2, 4)
            .with_gateway_url("ws://localhost:9000");
        let shard = ShardConfig::from_client_config(&config, "token");

        assert_eq!(shard.shard_id, 2);
        assert_eq!(shard.shard_count, 4);
        assert_eq!(shard.gateway_url.as_deref(), Some("ws://localhost:9000"));
        assert_eq!(shard.identify_delay, Duration::from_secs(5));
        assert!(!format!("{shard:?}").contains("token"));
    }

    #[test]
    fn test_new_shard_is_disconnected() {
        let shard = Shard::new(ShardConfig::new("token"), Arc::new(NoHttp));
        let handle = shard.handle();

        assert_eq!(shard.state(), ShardState::Disconnected);
        assert_eq!(handle.state(), ShardState::Disconnected);
        assert_eq!(handle.latency(), None);
    }

    #[test]
    fn test_handle_fails_after_shard_dropped() {
        let shard = Shard::new(ShardConfig::new("token"), Arc::new(NoHttp));
        let handle = shard.handle();
        drop(shard);

        assert!(matches!(handle.close(), Err(GatewayError::ShardStopped)));
    }

    #[tokio::test]
    async fn test_lookup_failure_without_reconnect_returns_error() {
        let mut shard = Shard::new(ShardConfig::new("token"), Arc::new(NoHttp));
        let err = shard.run(&NullSink, false).await.unwrap_err();

        assert!(matches!(err, GatewayError::Http(HttpError::GatewayNotFound)));
        assert_eq!(shard.state(), ShardState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_honored_during_backoff() {
        let mut shard = Shard::new(ShardConfig::new("token"), Arc::new(NoHttp));
        let handle = shard.handle();
        let mut states = handle.subscribe();

        let task = tokio::spawn(async move { shard.run(&NullSink, true).await });

        // First failure puts the shard into backoff
        states
            .wait_for(|s| *s == ShardState::Disconnected)
            .await
            .unwrap();
        handle.close().unwrap();

        let result = task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(handle.state(), ShardState::Closed);
    }
}
