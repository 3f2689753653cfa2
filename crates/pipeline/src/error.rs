//! Pipeline and collaborator errors.

use wardrobe_core::classify::FailureKind;
use wardrobe_core::phase::Phase;
use wardrobe_core::session::FailureCause;
use wardrobe_core::types::EntityId;
use wardrobe_jobs::client::JobClientError;

use crate::composite::CompositeError;
use crate::request::Prerequisite;

/// Errors raised by an entity, settings or asset store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Backend error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// The backend answered with something this client cannot use.
    #[error("Unexpected response: {0}")]
    Invalid(String),
}

/// Errors that abort a pipeline run. Nothing is submitted after one.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// An outfit recipe was started with an empty selection.
    #[error("No items selected")]
    NoItemsSelected,

    #[error("Failed to save draft: {0}")]
    PersistDraft(#[source] StoreError),

    /// A required setting is absent. User-actionable, never retried.
    #[error("Missing prerequisite: {}", .0.label())]
    MissingPrerequisite(Prerequisite),

    #[error("Failed to load settings: {0}")]
    Prerequisites(#[source] StoreError),

    /// A selected item has no stored image at all.
    #[error("Item {0} has no images")]
    NoItemImage(EntityId),

    #[error("Failed to download image for item {item_id}: {source}")]
    Download {
        item_id: EntityId,
        #[source]
        source: StoreError,
    },

    #[error("Failed to combine images: {0}")]
    Composite(#[from] CompositeError),

    #[error("Failed to upload image: {0}")]
    Upload(#[source] StoreError),

    #[error("Failed to submit job: {0}")]
    Submit(#[source] JobClientError),

    /// The caller stopped the run between phases.
    #[error("Cancelled")]
    Cancelled,
}

impl PipelineError {
    /// The phase that failed, if the error belongs to one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::NoItemsSelected | Self::Cancelled => None,
            Self::PersistDraft(_) => Some(Phase::PersistDraft),
            Self::MissingPrerequisite(_) | Self::Prerequisites(_) => {
                Some(Phase::ResolvePrerequisites)
            }
            Self::NoItemImage(_) | Self::Download { .. } => Some(Phase::AcquireAssets),
            Self::Composite(_) => Some(Phase::Composite),
            Self::Upload(_) => Some(Phase::Upload),
            Self::Submit(_) => Some(Phase::Submit),
        }
    }

    /// Session failure cause for this error. `None` for cancellation.
    pub fn failure_cause(&self) -> Option<FailureCause> {
        match self {
            Self::Cancelled => None,
            Self::NoItemsSelected | Self::MissingPrerequisite(_) => {
                Some(FailureCause::MissingPrerequisite)
            }
            Self::Submit(e) if e.kind() == FailureKind::PolicyBlocked => Some(FailureCause::Job {
                kind: FailureKind::PolicyBlocked,
            }),
            other => other
                .phase()
                .map(|phase| FailureCause::Phase { phase }),
        }
    }
}
