//! Session updates published on a `tokio::sync::broadcast` channel.
//!
//! A progress surface subscribes to [`SessionEvents`] and renders each
//! [`SessionUpdate`] without owning the session.

use serde::Serialize;
use tokio::sync::broadcast;
use wardrobe_core::session::{GenerationSession, SessionState};
use wardrobe_core::types::{EntityRef, JobId, Timestamp};

/// Snapshot of a session after a state or progress change.
#[derive(Debug, Clone, Serialize)]
pub struct SessionUpdate {
    pub target: EntityRef,
    pub state: SessionState,
    pub progress_percent: u8,
    pub job_id: Option<JobId>,
    pub at: Timestamp,
}

impl SessionUpdate {
    pub fn snapshot(session: &GenerationSession) -> Self {
        Self {
            target: session.target.clone(),
            state: session.state().clone(),
            progress_percent: session.progress_percent(),
            job_id: session.job_id().cloned(),
            at: chrono::Utc::now(),
        }
    }
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of [`SessionUpdate`]s to any number of subscribers.
#[derive(Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionUpdate>,
}

impl SessionEvents {
    /// Slow receivers observe `RecvError::Lagged` once `capacity` updates
    /// are buffered.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, update: SessionUpdate) {
        // No receivers is fine.
        let _ = self.sender.send(update);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.sender.subscribe()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
