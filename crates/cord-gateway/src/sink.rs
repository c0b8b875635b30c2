//! Where a shard delivers what it receives

use serde_json::Value;

use crate::protocol::GatewayMessage;

/// One DISPATCH frame, already past sequence de-duplication
#[derive(Debug, Clone)]
pub struct DispatchFrame {
    pub shard_id: u32,
    /// `t` of the frame, e.g. `MESSAGE_CREATE`
    pub event_type: String,
    pub seq: u64,
    pub data: Value,
}

/// Connection lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardLifecycle {
    /// Socket open and HELLO received
    Connected { shard_id: u32 },
    /// The connection ended; the shard may reconnect
    Disconnected {
        shard_id: u32,
        close_code: Option<u16>,
    },
}

/// Consumer of a shard's inbound traffic.
///
/// Called from the shard's task in wire order. Implementations must not
/// block: anything slow belongs in a spawned task.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, frame: DispatchFrame);

    fn lifecycle(&self, event: ShardLifecycle);

    /// Every decoded inbound frame, before any handling
    fn raw_receive(&self, _frame: &GatewayMessage) {}
}
