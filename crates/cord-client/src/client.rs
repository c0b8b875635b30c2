//! The client facade
//!
//! Owns the cache, the dispatcher and the REST collaborator, and drives one
//! gateway shard. Cheap to clone; clones share everything.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cord_cache::Cache;
use cord_common::ClientConfig;
use cord_core::{Channel, Emoji, Guild, Member, Message, Snowflake, User};
use cord_gateway::protocol::{Activity, PresenceUpdatePayload, Status, VoiceStateUpdatePayload};
use cord_gateway::{Shard, ShardConfig};
use cord_http::{Http, HttpError, Method, RestClient};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use crate::dispatcher::{Dispatcher, HandlerError, HandlerResult, ListenerId};
use crate::error::{ClientError, ClientResult};
use crate::events::Event;
use crate::state::{ConnectionState, StateOptions};

struct ClientInner {
    config: ClientConfig,
    http: Arc<dyn Http>,
    cache: Arc<Cache>,
    dispatcher: Dispatcher,
    state: ConnectionState,
    token: RwLock<Option<String>>,
    /// Presence sent with every IDENTIFY
    presence: RwLock<Option<PresenceUpdatePayload>>,
    closed: AtomicBool,
}

/// Discord gateway client
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a client that talks to `config.api_base` over HTTPS
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let http = Arc::new(RestClient::new(config.api_base.clone()));
        Self::with_http(config, http)
    }

    /// Create a client with a custom REST collaborator
    pub fn with_http(config: ClientConfig, http: Arc<dyn Http>) -> ClientResult<Self> {
        config.validate()?;

        let cache = Arc::new(Cache::new(config.max_messages, config.member_cache));
        let dispatcher = Dispatcher::new();
        let state = ConnectionState::new(
            Arc::clone(&cache),
            dispatcher.clone(),
            StateOptions::from(&config),
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                http,
                cache,
                dispatcher,
                state,
                token: RwLock::new(None),
                presence: RwLock::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // === Lifecycle ===

    /// Validate `token` over REST and remember it for `connect`
    pub async fn login(&self, token: &str) -> ClientResult<User> {
        let token = token.trim();
        tracing::info!("Logging in using static token");

        let user = match self.inner.http.static_login(token).await {
            Ok(user) => user,
            Err(HttpError::Unauthorized) => return Err(ClientError::LoginFailure),
            Err(e) => return Err(e.into()),
        };

        self.inner.cache.set_current_user(user.clone());
        *self.inner.token.write() = Some(token.to_string());
        tracing::info!(user = %user.tag(), "Logged in");
        Ok(user)
    }

    /// Run the gateway connection until it is closed or fails.
    ///
    /// With `reconnect` the shard retries transient failures with backoff;
    /// without it the first disconnect ends the call. A client that never
    /// called [`Client::login`] logs in with the configured token.
    pub async fn connect(&self, reconnect: bool) -> ClientResult<()> {
        let logged_in = self.inner.token.read().clone();
        let token = match (logged_in, &self.inner.config.token) {
            (Some(token), _) => token,
            (None, Some(configured)) => {
                self.login(configured).await?;
                self.inner.token.read().clone().ok_or(ClientError::NotLoggedIn)?
            }
            (None, None) => return Err(ClientError::NotLoggedIn),
        };
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let mut config = ShardConfig::from_client_config(&self.inner.config, token);
        config.presence = self.inner.presence.read().clone();
        let mut shard = Shard::new(config, Arc::clone(&self.inner.http));

        self.inner.state.set_gateway(Some(shard.handle()));
        // `close` may have run before the handle was visible
        let result = if self.is_closed() {
            Ok(())
        } else {
            shard.run(&self.inner.state, reconnect).await
        };
        self.inner.state.set_gateway(None);
        self.inner.state.reset();

        result.map_err(Into::into)
    }

    /// `login` followed by `connect`
    pub async fn start(&self, token: &str, reconnect: bool) -> ClientResult<()> {
        self.login(token).await?;
        self.connect(reconnect).await
    }

    /// Close the gateway connection; a running `connect` returns shortly after
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Closing client");
        if let Some(gateway) = self.inner.state.gateway() {
            // The shard may already have stopped on its own
            let _ = gateway.close();
        }
        self.inner.state.reset();
    }

    /// Forget the closed state and the cache so the client can connect again
    pub fn clear(&self) {
        self.inner.closed.store(false, Ordering::SeqCst);
        self.inner.state.reset();
        self.inner.cache.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Whether startup finished for the current session
    pub fn is_ready(&self) -> bool {
        self.inner.state.is_ready()
    }

    pub async fn wait_until_ready(&self) {
        self.inner.state.wait_until_ready().await;
    }

    /// Blocking entry point: build a runtime, `start`, and close on Ctrl-C
    /// or SIGTERM.
    ///
    /// Must not be called from inside a tokio runtime.
    pub fn run(self, token: impl Into<String>) -> anyhow::Result<()> {
        let token = token.into();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;

        runtime.block_on(async move {
            let session = self.start(&token, true);
            tokio::pin!(session);

            tokio::select! {
                result = &mut session => return result.context("gateway session ended"),
                () = shutdown_signal() => {}
            }

            tracing::info!("Shutdown signal received");
            self.close();
            session.await.context("gateway session ended")
        })
    }

    // === Events ===

    /// Dispatch an event to waiters and handlers as if it came from the gateway
    pub fn dispatch(&self, event: Event) {
        self.inner.dispatcher.dispatch(event);
    }

    /// Wait for the next `event` accepted by `predicate`
    pub async fn wait_for<P>(&self, event: &str, predicate: P, timeout: Option<Duration>) -> ClientResult<Arc<Event>>
    where
        P: Fn(&Event) -> Result<bool, HandlerError> + Send + Sync + 'static,
    {
        let waiter = self.inner.dispatcher.register_listener(event, predicate, timeout);
        Ok(waiter.wait().await?)
    }

    /// Set the primary handler for `event`, replacing any previous one
    pub fn event<F, Fut>(&self, event: &str, handler: F)
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner.dispatcher.event(event, handler);
    }

    pub fn add_listener<F, Fut>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner.dispatcher.add_listener(event, handler)
    }

    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        self.inner.dispatcher.remove_listener(event, id)
    }

    /// Replace the hook that receives handler errors and panics
    pub fn set_error_hook<F>(&self, hook: F)
    where
        F: Fn(&str, &HandlerError) + Send + Sync + 'static,
    {
        self.inner.dispatcher.set_error_hook(hook);
    }

    // === Cache ===

    pub fn cache(&self) -> &Arc<Cache> {
        &self.inner.cache
    }

    /// The logged-in user
    pub fn user(&self) -> Option<User> {
        self.inner.cache.current_user()
    }

    pub fn guilds(&self) -> Vec<Guild> {
        self.inner.cache.guilds()
    }

    pub fn get_guild(&self, guild_id: Snowflake) -> Option<Guild> {
        self.inner.cache.get_guild(guild_id)
    }

    pub fn get_channel(&self, channel_id: Snowflake) -> Option<Channel> {
        self.inner.cache.get_channel(channel_id)
    }

    pub fn get_user(&self, user_id: Snowflake) -> Option<User> {
        self.inner.cache.get_user(user_id)
    }

    pub fn get_emoji(&self, emoji_id: Snowflake) -> Option<Emoji> {
        self.inner.cache.get_emoji(emoji_id)
    }

    pub fn users(&self) -> Vec<User> {
        self.inner.cache.users()
    }

    pub fn private_channels(&self) -> Vec<Channel> {
        self.inner.cache.private_channels()
    }

    pub fn cached_messages(&self) -> Vec<Message> {
        self.inner.cache.cached_messages()
    }

    // === Gateway ===

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        self.inner.state.gateway().and_then(|g| g.latency())
    }

    /// Change the bot's presence.
    ///
    /// Kept for future IDENTIFYs and sent right away when connected.
    pub fn change_presence(&self, status: Status, activity: Option<Activity>) -> ClientResult<()> {
        let presence = PresenceUpdatePayload::new(status, activity);
        *self.inner.presence.write() = Some(presence.clone());

        if let Some(gateway) = self.inner.state.gateway() {
            gateway.update_presence(presence)?;
        }
        Ok(())
    }

    /// Join, move between, or leave (`channel_id: None`) voice channels
    pub fn change_voice_state(
        &self,
        guild_id: Snowflake,
        channel_id: Option<Snowflake>,
        self_mute: bool,
        self_deaf: bool,
    ) -> ClientResult<()> {
        let gateway = self.inner.state.gateway().ok_or(ClientError::NotConnected)?;
        gateway.update_voice_state(VoiceStateUpdatePayload {
            guild_id,
            channel_id,
            self_mute,
            self_deaf,
        })?;
        Ok(())
    }

    /// Request every member of a guild and wait for the last chunk
    pub async fn chunk_guild(&self, guild_id: Snowflake) -> ClientResult<Vec<Member>> {
        self.inner
            .state
            .chunk_guild(guild_id, self.inner.config.chunk_timeout)
            .await
    }

    // === REST fallbacks ===

    /// Cached user, or `GET /users/{id}`
    pub async fn fetch_user(&self, user_id: Snowflake) -> ClientResult<User> {
        if let Some(user) = self.inner.cache.get_user(user_id) {
            return Ok(user);
        }
        self.fetch(&format!("/users/{user_id}")).await
    }

    /// Cached channel, or `GET /channels/{id}`
    pub async fn fetch_channel(&self, channel_id: Snowflake) -> ClientResult<Channel> {
        if let Some(channel) = self.inner.cache.get_channel(channel_id) {
            return Ok(channel);
        }
        self.fetch(&format!("/channels/{channel_id}")).await
    }

    /// Cached guild, or `GET /guilds/{id}`
    pub async fn fetch_guild(&self, guild_id: Snowflake) -> ClientResult<Guild> {
        if let Some(guild) = self.inner.cache.get_guild(guild_id) {
            return Ok(guild);
        }
        self.fetch(&format!("/guilds/{guild_id}")).await
    }

    /// Cached message, or `GET /channels/{channel_id}/messages/{id}`
    pub async fn fetch_message(&self, channel_id: Snowflake, message_id: Snowflake) -> ClientResult<Message> {
        if let Some(message) = self.inner.cache.get_message(message_id) {
            return Ok(message);
        }
        self.fetch(&format!("/channels/{channel_id}/messages/{message_id}"))
            .await
    }

    async fn fetch<T: DeserializeOwned>(&self, route: &str) -> ClientResult<T> {
        tracing::debug!(route = %route, "Cache miss, fetching over REST");
        let value = self.inner.http.request(Method::GET, route, None).await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("ready", &self.is_ready())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Resolve on Ctrl-C or, on unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
