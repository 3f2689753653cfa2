use wardrobe_core::types::EntityRef;
use wardrobe_pipeline::error::StoreError;

/// Errors returned to the caller of the controller.
///
/// Everything that goes wrong inside a session is reported through its
/// [`SessionReport`](crate::outcome::SessionReport) instead.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A session for this entity is still running.
    #[error("A generation is already running for {0}")]
    AlreadyGenerating(EntityRef),

    /// The entity could not be read to look for a pending job.
    #[error("Failed to look up pending job for {target}: {source}")]
    PendingLookup {
        target: EntityRef,
        #[source]
        source: StoreError,
    },
}
