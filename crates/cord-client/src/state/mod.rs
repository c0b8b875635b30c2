//! Connection state
//!
//! The client's [`EventSink`]: turns dispatch frames into cache mutations
//! and [`Event`]s, tracks readiness, and owns member chunk requests.

mod parsers;
mod ready;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cord_cache::Cache;
use cord_common::ClientConfig;
use cord_core::{Intents, Member, MemberCachePolicy, Snowflake};
use cord_gateway::protocol::{GatewayMessage, RequestGuildMembersPayload};
use cord_gateway::{DispatchFrame, EventSink, GatewayHandle, ShardLifecycle};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::dispatcher::{Dispatcher, WaitError};
use crate::error::{ClientError, ClientResult};
use crate::events::Event;

/// Cache and startup behavior taken from [`ClientConfig`]
#[derive(Debug, Clone)]
pub struct StateOptions {
    pub intents: Intents,
    pub member_policy: MemberCachePolicy,
    pub guild_ready_timeout: Duration,
    pub chunk_timeout: Duration,
    pub debug_events: bool,
}

impl From<&ClientConfig> for StateOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            intents: config.intents,
            member_policy: config.member_cache,
            guild_ready_timeout: config.guild_ready_timeout,
            chunk_timeout: config.chunk_timeout,
            debug_events: config.enable_debug_events,
        }
    }
}

impl Default for StateOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// Intake of the running ready-delay task
struct Startup {
    generation: u64,
    guilds: mpsc::UnboundedSender<Snowflake>,
}

/// An outstanding REQUEST_GUILD_MEMBERS
struct ChunkRequest {
    guild_id: Snowflake,
    members: Vec<Member>,
    done: Option<oneshot::Sender<Vec<Member>>>,
}

struct StateInner {
    cache: Arc<Cache>,
    dispatcher: Dispatcher,
    options: StateOptions,
    gateway: RwLock<Option<GatewayHandle>>,
    ready: watch::Sender<bool>,
    /// Feeds startup GUILD_CREATEs to the ready-delay task while it runs
    startup: Mutex<Option<Startup>>,
    generation: AtomicU64,
    ready_task: Mutex<Option<JoinHandle<()>>>,
    chunk_requests: DashMap<String, ChunkRequest>,
}

/// Gateway-facing half of the client
#[derive(Clone)]
pub struct ConnectionState {
    inner: Arc<StateInner>,
}

impl ConnectionState {
    pub fn new(cache: Arc<Cache>, dispatcher: Dispatcher, options: StateOptions) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(StateInner {
                cache,
                dispatcher,
                options,
                gateway: RwLock::new(None),
                ready,
                startup: Mutex::new(None),
                generation: AtomicU64::new(0),
                ready_task: Mutex::new(None),
                chunk_requests: DashMap::new(),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.inner.cache
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn options(&self) -> &StateOptions {
        &self.inner.options
    }

    pub fn set_gateway(&self, handle: Option<GatewayHandle>) {
        *self.inner.gateway.write() = handle;
    }

    pub fn gateway(&self) -> Option<GatewayHandle> {
        self.inner.gateway.read().clone()
    }

    // === Readiness ===

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Resolve once the startup guild backlog has been processed
    pub async fn wait_until_ready(&self) {
        let mut ready = self.inner.ready.subscribe();
        // The sender lives as long as `self`
        let _ = ready.wait_for(|ready| *ready).await;
    }

    fn set_ready(&self, ready: bool) {
        self.inner.ready.send_replace(ready);
    }

    /// Forget readiness and stop any startup in progress
    pub fn reset(&self) {
        self.set_ready(false);
        self.inner.startup.lock().take();
        if let Some(task) = self.inner.ready_task.lock().take() {
            task.abort();
        }
        self.inner.chunk_requests.clear();
    }

    /// Begin a ready delay for the guilds announced in READY
    fn begin_startup(&self, guilds: HashSet<Snowflake>) {
        self.reset();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.inner.startup.lock() = Some(Startup {
            generation,
            guilds: sender,
        });

        let task = tokio::spawn(ready::guild_backlog(self.clone(), generation, guilds, receiver));
        *self.inner.ready_task.lock() = Some(task);
    }

    /// Hand a startup guild to the ready-delay task.
    ///
    /// Returns `false` when no ready delay is collecting guilds.
    fn forward_startup_guild(&self, guild_id: Snowflake) -> bool {
        self.inner
            .startup
            .lock()
            .as_ref()
            .is_some_and(|startup| startup.guilds.send(guild_id).is_ok())
    }

    /// Stop collecting startup guilds; `false` if `generation` was superseded
    fn end_startup_intake(&self, generation: u64) -> bool {
        let mut startup = self.inner.startup.lock();
        if startup.as_ref().is_some_and(|s| s.generation == generation) {
            startup.take();
            true
        } else {
            false
        }
    }

    /// Mark the session ready unless a newer READY superseded `generation`
    fn finish_startup(&self, generation: u64) -> bool {
        if self.inner.generation.load(Ordering::Relaxed) != generation {
            return false;
        }
        self.set_ready(true);
        true
    }

    fn emit(&self, event: Event) {
        self.inner.dispatcher.dispatch(event);
    }

    // === Chunking ===

    /// Request every member of a guild over the gateway and wait for the
    /// final chunk. Members are cached as chunks arrive.
    pub async fn chunk_guild(&self, guild_id: Snowflake, timeout: Duration) -> ClientResult<Vec<Member>> {
        let gateway = self.gateway().ok_or(ClientError::NotConnected)?;
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let (done, receiver) = oneshot::channel();

        self.inner.chunk_requests.insert(
            nonce.clone(),
            ChunkRequest {
                guild_id,
                members: Vec::new(),
                done: Some(done),
            },
        );
        tracing::debug!(guild_id = %guild_id, nonce = %nonce, "Requesting guild members");

        if let Err(e) = gateway.request_guild_members(RequestGuildMembersPayload::all(guild_id, nonce.clone())) {
            self.inner.chunk_requests.remove(&nonce);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(members)) => Ok(members),
            Ok(Err(_)) => Err(WaitError::Cancelled.into()),
            Err(_) => {
                self.inner.chunk_requests.remove(&nonce);
                tracing::warn!(guild_id = %guild_id, "Timed out waiting for guild member chunks");
                Err(WaitError::Timeout.into())
            }
        }
    }

    /// Record a chunk against its request; completes it on the last chunk
    fn complete_chunk(&self, nonce: &str, guild_id: Snowflake, members: Vec<Member>, last: bool) {
        let Some(mut request) = self.inner.chunk_requests.get_mut(nonce) else {
            return;
        };
        if request.guild_id != guild_id {
            return;
        }
        request.members.extend(members);
        if !last {
            return;
        }
        let members = std::mem::take(&mut request.members);
        let done = request.done.take();
        drop(request);

        self.inner.chunk_requests.remove(nonce);
        if let Some(done) = done {
            let _ = done.send(members);
        }
    }
}

impl EventSink for ConnectionState {
    fn dispatch(&self, frame: DispatchFrame) {
        self.parse(&frame.event_type, frame.data);
    }

    fn lifecycle(&self, event: ShardLifecycle) {
        match event {
            ShardLifecycle::Connected { shard_id } => {
                tracing::info!(shard_id, "Connected to gateway");
                self.emit(Event::Connect);
            }
            ShardLifecycle::Disconnected {
                shard_id,
                close_code,
            } => {
                tracing::info!(shard_id, close_code = ?close_code, "Disconnected from gateway");
                self.emit(Event::Disconnect);
            }
        }
    }

    fn raw_receive(&self, frame: &GatewayMessage) {
        if !self.inner.options.debug_events {
            return;
        }
        match serde_json::to_value(frame) {
            Ok(value) => self.emit(Event::SocketRawReceive(value)),
            Err(e) => tracing::debug!(error = %e, "Raw frame not re-encodable"),
        }
    }
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionState")
            .field("ready", &self.is_ready())
            .field("options", &self.inner.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    use crate::dispatcher::HandlerError;

    fn sf(id: u64) -> Snowflake {
        Snowflake::new(id)
    }

    fn state(debug_events: bool) -> ConnectionState {
        let options = StateOptions {
            debug_events,
            ..StateOptions::default()
        };
        ConnectionState::new(
            Arc::new(Cache::new(Some(10), MemberCachePolicy::All)),
            Dispatcher::new(),
            options,
        )
    }

    fn any(_: &Event) -> Result<bool, HandlerError> {
        Ok(true)
    }

    fn chunk(index: u32, count: u32, user: u64) -> Value {
        json!({
            "guild_id": "10",
            "members": [{"user": {"id": user.to_string(), "username": "u"}}],
            "chunk_index": index,
            "chunk_count": count,
            "nonce": "abc"
        })
    }

    #[tokio::test]
    async fn test_chunk_request_completes_on_last_chunk() {
        let state = state(false);
        let (done, receiver) = oneshot::channel();
        state.inner.chunk_requests.insert(
            "abc".to_string(),
            ChunkRequest {
                guild_id: sf(10),
                members: Vec::new(),
                done: Some(done),
            },
        );

        state.parse("GUILD_MEMBERS_CHUNK", chunk(0, 2, 1));
        assert!(state.inner.chunk_requests.contains_key("abc"));

        state.parse("GUILD_MEMBERS_CHUNK", chunk(1, 2, 2));
        let members = receiver.await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(state.inner.chunk_requests.is_empty());
    }

    #[tokio::test]
    async fn test_chunk_guild_needs_gateway() {
        let state = state(false);
        let result = state.chunk_guild(sf(10), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let state = state(false);
        let connect = state.dispatcher().register_listener("connect", any, None);
        let disconnect = state.dispatcher().register_listener("disconnect", any, None);

        state.lifecycle(ShardLifecycle::Connected { shard_id: 0 });
        state.lifecycle(ShardLifecycle::Disconnected {
            shard_id: 0,
            close_code: Some(4000),
        });
        connect.wait().await.unwrap();
        disconnect.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_raw_receive_only_with_debug_events() {
        let quiet = state(false);
        let waiter = quiet.dispatcher().register_listener("socket_raw_receive", any, None);
        quiet.raw_receive(&GatewayMessage::heartbeat(Some(3)));
        assert_eq!(quiet.dispatcher().waiter_count("socket_raw_receive"), 1);
        waiter.cancel();

        let verbose = state(true);
        let waiter = verbose.dispatcher().register_listener("socket_raw_receive", any, None);
        verbose.raw_receive(&GatewayMessage::heartbeat(Some(3)));
        match waiter.wait().await.unwrap().as_ref() {
            Event::SocketRawReceive(frame) => assert_eq!(frame["op"], 1),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reset_clears_readiness() {
        let state = state(false);
        state.parse("READY", json!({
            "v": 10,
            "user": {"id": "1", "username": "bot"},
            "guilds": [],
            "session_id": "s"
        }));
        state.wait_until_ready().await;
        assert!(state.is_ready());

        state.reset();
        assert!(!state.is_ready());
    }
}
