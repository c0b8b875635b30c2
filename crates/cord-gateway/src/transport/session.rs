//! Resumable session state
//!
//! Shared between the shard loop and the heartbeat task.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sequence, session id and resume URL of the current gateway session
#[derive(Debug, Default)]
pub struct Session {
    /// Last processed sequence; 0 means none yet
    sequence: AtomicU64,
    session_id: RwLock<Option<String>>,
    resume_url: RwLock<Option<String>>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last processed sequence number
    pub fn sequence(&self) -> Option<u64> {
        match self.sequence.load(Ordering::Acquire) {
            0 => None,
            seq => Some(seq),
        }
    }

    /// Record a dispatch sequence.
    ///
    /// Returns `false` when `seq` is not newer than the last processed one,
    /// i.e. the frame is a replay that was already delivered.
    pub fn advance(&self, seq: u64) -> bool {
        let previous = self.sequence.fetch_max(seq, Ordering::AcqRel);
        seq > previous
    }

    /// Store the identifiers from READY
    pub fn establish(&self, session_id: String, resume_url: Option<String>) {
        tracing::info!(session_id = %session_id, "Session established");
        *self.session_id.write() = Some(session_id);
        *self.resume_url.write() = resume_url;
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn resume_url(&self) -> Option<String> {
        self.resume_url.read().clone()
    }

    /// A RESUME needs both a session id and a sequence
    pub fn can_resume(&self) -> bool {
        self.session_id.read().is_some() && self.sequence().is_some()
    }

    /// Forget the session; the next connection identifies from scratch
    pub fn clear(&self) {
        self.sequence.store(0, Ordering::Release);
        *self.session_id.write() = None;
        *self.resume_url.write() = None;
    }
}
