//! Transport session
//!
//! One WebSocket connection plus the session and heartbeat state that
//! outlive it.

mod connection;
pub(crate) mod heartbeat;
mod session;

pub use connection::{Transport, TransportError};
pub use heartbeat::HeartbeatState;
pub use session::Session;
