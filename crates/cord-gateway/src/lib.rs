//! # cord-gateway
//!
//! Client side of the Discord WebSocket gateway: wire protocol, reconnect
//! backoff, the transport with its heartbeat, and the [`Shard`] state
//! machine that ties them together.

pub mod backoff;
pub mod error;
pub mod events;
pub mod protocol;
pub mod shard;
pub mod sink;
pub mod transport;

pub use backoff::Backoff;
pub use error::{GatewayError, GatewayResult};
pub use shard::{GatewayHandle, Shard, ShardCommand, ShardConfig, ShardState};
pub use sink::{DispatchFrame, EventSink, ShardLifecycle};
