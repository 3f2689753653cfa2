//! What a finished session reports to its caller.

use serde::Serialize;
use wardrobe_core::job::{GenerationResult, Job};
use wardrobe_core::session::{FailureCause, SessionState};
use wardrobe_core::types::{EntityRef, JobId};

use crate::notice::SessionNotice;

/// How the best-effort trigger call went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "trigger", content = "reason", rename_all = "snake_case")]
pub enum TriggerStatus {
    /// No job was submitted, or the session resumed an existing job.
    NotAttempted,
    Acknowledged,
    /// The trigger failed; polling went ahead anyway.
    Tolerated(String),
}

/// Terminal result of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Succeeded {
        job: Job,
        result: GenerationResult,
        /// The entity as re-read after success, if the read worked.
        entity: Option<serde_json::Value>,
    },
    Failed {
        cause: FailureCause,
        message: String,
    },
    /// Not a failure: the job may still complete and stays discoverable.
    TimedOut { job_id: JobId },
    Cancelled { job_id: Option<JobId> },
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Everything the caller needs once a session has ended.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// The entity as persisted, which may carry a store-assigned id.
    pub target: EntityRef,
    pub outcome: SessionOutcome,
    pub notice: SessionNotice,
    pub job_id: Option<JobId>,
    /// Whether the entity still holds `job_id` for a later `resume`.
    pub pending_recorded: bool,
    pub trigger: TriggerStatus,
    pub progress_percent: u8,
    pub final_state: SessionState,
}
