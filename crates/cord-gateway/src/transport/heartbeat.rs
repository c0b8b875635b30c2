//! Heartbeat task for zombie connection detection.
//!
//! Runs alongside the shard loop. The first beat goes out after
//! `interval * jitter`, then one per interval. If the previous beat was never
//! acknowledged when the next one is due the connection is a zombie: the
//! task wakes the shard through a `Notify` and exits.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{Session, Transport};
use crate::protocol::GatewayMessage;

#[derive(Debug)]
struct Inner {
    interval: Duration,
    acked: bool,
    last_send: Option<Instant>,
    latency: Option<Duration>,
}

/// Heartbeat bookkeeping, shared by the heartbeat task and the shard loop
#[derive(Debug)]
pub struct HeartbeatState {
    inner: Mutex<Inner>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                interval: Duration::ZERO,
                acked: true,
                last_send: None,
                latency: None,
            }),
        }
    }
}

impl HeartbeatState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new connection with the interval from HELLO.
    ///
    /// The last measured latency is kept.
    pub fn start(&self, interval: Duration) {
        let mut inner = self.inner.lock();
        inner.interval = interval;
        inner.acked = true;
        inner.last_send = None;
    }

    pub fn interval(&self) -> Duration {
        self.inner.lock().interval
    }

    /// Mark a beat as sent.
    ///
    /// Returns `false` without changing anything when the previous beat is
    /// still unacknowledged.
    pub fn begin_beat(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.acked {
            return false;
        }
        inner.acked = false;
        inner.last_send = Some(Instant::now());
        true
    }

    /// Record HEARTBEAT_ACK
    pub fn ack(&self) {
        let mut inner = self.inner.lock();
        inner.acked = true;
        if let Some(sent) = inner.last_send {
            inner.latency = Some(sent.elapsed());
        }
        tracing::trace!(latency = ?inner.latency, "Heartbeat ACK received");
    }

    pub fn is_acked(&self) -> bool {
        self.inner.lock().acked
    }

    /// Time between the last beat and its ACK
    pub fn latency(&self) -> Option<Duration> {
        self.inner.lock().latency
    }
}

/// Aborts the wrapped task when dropped
#[derive(Debug)]
pub(crate) struct HeartbeatTask(JoinHandle<()>);

impl Drop for HeartbeatTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawn the heartbeat loop for one connection
pub(crate) fn spawn(
    shard_id: u32,
    transport: Arc<Transport>,
    session: Arc<Session>,
    state: Arc<HeartbeatState>,
    zombie: Arc<Notify>,
) -> HeartbeatTask {
    HeartbeatTask(tokio::spawn(run(shard_id, transport, session, state, zombie)))
}

async fn run(
    shard_id: u32,
    transport: Arc<Transport>,
    session: Arc<Session>,
    state: Arc<HeartbeatState>,
    zombie: Arc<Notify>,
) {
    let interval = state.interval();
    let jitter: f64 = rand::thread_rng().gen();
    let first_delay = interval.mul_f64(jitter);

    tracing::debug!(
        shard_id,
        interval_ms = interval.as_millis() as u64,
        first_delay_ms = first_delay.as_millis() as u64,
        "Heartbeat task started"
    );
    tokio::time::sleep(first_delay).await;

    loop {
        if !state.begin_beat() {
            tracing::warn!(shard_id, "Heartbeat ACK missed, connection is zombied");
            zombie.notify_one();
            return;
        }

        let seq = session.sequence();
        tracing::debug!(shard_id, seq = ?seq, "Sending heartbeat");
        if let Err(e) = transport.send(&GatewayMessage::heartbeat(seq)).await {
            // The reader sees the same failure; wake the shard in case it is idle
            tracing::debug!(shard_id, error = %e, "Heartbeat send failed");
            zombie.notify_one();
            return;
        }

        tokio::time::sleep(interval).await;
    }
}
