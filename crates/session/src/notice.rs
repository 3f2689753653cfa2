//! User-facing notices for session outcomes.

use serde::Serialize;
use wardrobe_core::phase::Phase;

/// Shown when a failed job carries no error text.
pub const GENERIC_FAILURE: &str = "Generation failed. Please try again.";

/// What the user is told when a session ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum SessionNotice {
    Completed,
    /// The provider refused the content. The user was not charged.
    PolicyBlocked,
    /// Generic job failure, with the backend text when there is one.
    Failed { detail: Option<String> },
    /// The local budget ran out; the job may still finish.
    StillProcessing,
    /// A setting is missing; `what` names it, e.g. "a reference photo".
    MissingPrerequisite { what: String },
    NoItemsSelected,
    PhaseFailed { phase: Phase },
    Cancelled,
}

impl SessionNotice {
    pub fn message(&self) -> String {
        match self {
            Self::Completed => "Your image is ready.".into(),
            Self::PolicyBlocked => "The image could not be generated because it conflicts with \
                                    the content policy. You have not been charged. Try a \
                                    different photo or selection."
                .into(),
            Self::Failed { detail: Some(detail) } => {
                format!("Generation failed: {detail}. Please try again.")
            }
            Self::Failed { detail: None } => GENERIC_FAILURE.into(),
            Self::StillProcessing => "This is taking longer than usual. It may still be \
                                      completing; check back later."
                .into(),
            Self::MissingPrerequisite { what } => format!("Set up {what} before continuing."),
            Self::NoItemsSelected => "Select at least one item before continuing.".into(),
            Self::PhaseFailed { phase } => phase_message(*phase).into(),
            Self::Cancelled => "Stopped watching. Anything already submitted keeps running.".into(),
        }
    }

    /// Whether the notice reports an error (as opposed to progress or success).
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Completed | Self::StillProcessing | Self::Cancelled)
    }

    /// Whether offering "try again" makes sense.
    pub fn offers_retry(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::PhaseFailed { .. })
    }
}

fn phase_message(phase: Phase) -> &'static str {
    match phase {
        Phase::PersistDraft => "Couldn't save your draft. Please try again.",
        Phase::ResolvePrerequisites => "Couldn't load your settings. Please try again.",
        Phase::AcquireAssets => "Couldn't download the selected items' photos. Please try again.",
        Phase::Composite => "Couldn't combine the selected items' photos. Please try again.",
        Phase::Upload => "Couldn't upload the image. Please try again.",
        Phase::Submit => "Couldn't start the generation. Please try again.",
    }
}
