//! The one-session-per-entity guard.
//!
//! A [`SessionGuard`] is taken before the first asynchronous call of a
//! session and released when it is dropped, so every exit path (return,
//! early error, panic unwind, task abort) frees the entity.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use wardrobe_core::types::EntityRef;

use crate::error::SessionError;

/// Set of entities with an active session. Cheap to clone.
#[derive(Clone, Default)]
pub struct SessionGuards {
    active: Arc<Mutex<HashSet<EntityRef>>>,
}

fn lock(active: &Mutex<HashSet<EntityRef>>) -> MutexGuard<'_, HashSet<EntityRef>> {
    active.lock().unwrap_or_else(|e| e.into_inner())
}

impl SessionGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `target`, or fail if a session for it is already active.
    pub fn try_acquire(&self, target: &EntityRef) -> Result<SessionGuard, SessionError> {
        if !lock(&self.active).insert(target.clone()) {
            return Err(SessionError::AlreadyGenerating(target.clone()));
        }
        Ok(SessionGuard {
            target: target.clone(),
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_active(&self, target: &EntityRef) -> bool {
        lock(&self.active).contains(target)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }
}

/// Claim on one entity, released on drop.
#[derive(Debug)]
pub struct SessionGuard {
    target: EntityRef,
    active: Arc<Mutex<HashSet<EntityRef>>>,
}

impl SessionGuard {
    pub fn target(&self) -> &EntityRef {
        &self.target
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.target);
        tracing::debug!(target_entity_id = %self.target, "Session guard released");
    }
}
