//! # cord-client
//!
//! The application-facing half of cord: a [`Client`] that logs in, runs a
//! gateway shard, keeps the connection-state cache current and delivers
//! [`Event`]s to `on_<name>` handlers and one-shot waiters.
//!
//! ```no_run
//! use cord_client::{Client, ClientConfig, Event};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::from_env()?;
//!     let token = config.token.clone().unwrap_or_default();
//!     let client = Client::new(config)?;
//!
//!     client.event("message", |event| async move {
//!         if let Event::Message(message) = event.as_ref() {
//!             tracing::info!(content = %message.content, "message");
//!         }
//!         Ok::<_, cord_client::HandlerError>(())
//!     });
//!
//!     client.run(token)
//! }
//! ```

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod state;

pub use client::Client;
pub use dispatcher::{Dispatcher, HandlerError, HandlerResult, ListenerId, WaitError, Waiter};
pub use error::{ClientError, ClientResult};
pub use events::Event;
pub use state::{ConnectionState, StateOptions};

pub use cord_common::ClientConfig;
pub use cord_core::{Intents, MemberCachePolicy, Snowflake};
pub use cord_gateway::protocol::{Activity, ActivityType, Status};
