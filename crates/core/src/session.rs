//! Explicit generation-session state machine.
//!
//! Every call site (outfit render, try-on, headshot, body shot, wardrobe
//! item) drives the same [`SessionState`] through the single
//! [`transition`] function instead of juggling per-screen booleans.
//!
//! ```text
//! Idle -> Preprocessing(phase)* -> Polling { attempt }* -> Succeeded
//!   |            |                     |                 -> Failed
//!   |            +-> Failed            +-> TimedOut
//!   +-> Polling (resume)          any non-terminal -> Cancelled
//! ```

use serde::Serialize;

use crate::classify::FailureKind;
use crate::error::CoreError;
use crate::job::Job;
use crate::phase::Phase;
use crate::types::{EntityRef, JobId, Timestamp};

// ---------------------------------------------------------------------------
// Failure causes
// ---------------------------------------------------------------------------

/// Why a session ended in [`SessionState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    /// A required setting is missing. User-actionable, never retried.
    MissingPrerequisite,
    /// A preprocessing phase failed before or during submission.
    Phase { phase: Phase },
    /// The remote job failed; `kind` comes from error classification.
    Job { kind: FailureKind },
}

impl FailureCause {
    /// Whether the user may simply try the same action again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::MissingPrerequisite => false,
            Self::Phase { .. } => true,
            Self::Job { kind } => *kind != FailureKind::PolicyBlocked,
        }
    }
}

// ---------------------------------------------------------------------------
// States and events
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Preprocessing { phase: Phase },
    Polling { job_id: JobId, attempt: u32 },
    Succeeded { job: Job },
    Failed { cause: FailureCause, message: String },
    TimedOut { job_id: JobId },
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Failed { .. } | Self::TimedOut { .. } | Self::Cancelled
        )
    }

    fn name(&self) -> String {
        match self {
            Self::Idle => "idle".into(),
            Self::Preprocessing { phase } => format!("preprocessing({phase})"),
            Self::Polling { attempt, .. } => format!("polling(attempt {attempt})"),
            Self::Succeeded { .. } => "succeeded".into(),
            Self::Failed { .. } => "failed".into(),
            Self::TimedOut { .. } => "timed_out".into(),
            Self::Cancelled => "cancelled".into(),
        }
    }
}

/// Inputs that move a session between states.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseStarted(Phase),
    /// The job was created remotely; polling begins.
    Submitted(JobId),
    /// Watching resumes for a job submitted by an earlier session.
    Resumed(JobId),
    PollAttempt(u32),
    JobSucceeded(Job),
    Failed { cause: FailureCause, message: String },
    TimedOut,
    Cancelled,
}

impl SessionEvent {
    fn name(&self) -> String {
        match self {
            Self::PhaseStarted(p) => format!("phase_started({p})"),
            Self::Submitted(_) => "submitted".into(),
            Self::Resumed(_) => "resumed".into(),
            Self::PollAttempt(n) => format!("poll_attempt({n})"),
            Self::JobSucceeded(_) => "job_succeeded".into(),
            Self::Failed { .. } => "failed".into(),
            Self::TimedOut => "timed_out".into(),
            Self::Cancelled => "cancelled".into(),
        }
    }
}

/// The single transition function shared by every call site.
pub fn transition(state: &SessionState, event: SessionEvent) -> Result<SessionState, CoreError> {
    use SessionEvent as E;
    use SessionState as S;

    let next = match (state, event) {
        (S::Idle, E::PhaseStarted(phase)) => S::Preprocessing { phase },
        (S::Preprocessing { phase: current }, E::PhaseStarted(phase)) if phase > *current => {
            S::Preprocessing { phase }
        }
        (S::Preprocessing { phase: Phase::Submit }, E::Submitted(job_id)) => {
            S::Polling { job_id, attempt: 0 }
        }
        (S::Idle, E::Resumed(job_id)) => S::Polling { job_id, attempt: 0 },
        (S::Polling { job_id, attempt }, E::PollAttempt(n)) if n >= *attempt => S::Polling {
            job_id: job_id.clone(),
            attempt: n,
        },
        (S::Polling { job_id, .. }, E::JobSucceeded(job)) if job.id == *job_id => {
            S::Succeeded { job }
        }
        (S::Idle | S::Preprocessing { .. } | S::Polling { .. }, E::Failed { cause, message }) => {
            S::Failed { cause, message }
        }
        (S::Polling { job_id, .. }, E::TimedOut) => S::TimedOut {
            job_id: job_id.clone(),
        },
        (S::Idle | S::Preprocessing { .. } | S::Polling { .. }, E::Cancelled) => S::Cancelled,
        (from, event) => {
            return Err(CoreError::InvalidTransition {
                from: from.name(),
                event: event.name(),
            })
        }
    };
    Ok(next)
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Local, ephemeral record of one user-initiated generation.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationSession {
    pub target: EntityRef,
    state: SessionState,
    progress_percent: u8,
    job_id: Option<JobId>,
    pub started_at: Timestamp,
}

impl GenerationSession {
    pub fn new(target: EntityRef) -> Self {
        Self {
            target,
            state: SessionState::Idle,
            progress_percent: 0,
            job_id: None,
            started_at: chrono::Utc::now(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    /// Set once the job exists remotely; `None` before submission.
    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply an event through [`transition`].
    pub fn apply(&mut self, event: SessionEvent) -> Result<&SessionState, CoreError> {
        let next = transition(&self.state, event)?;
        if let SessionState::Polling { job_id, .. } = &next {
            self.job_id = Some(job_id.clone());
        }
        if let SessionState::Succeeded { .. } = &next {
            self.progress_percent = 100;
        }
        self.state = next;
        Ok(&self.state)
    }

    /// Raise progress to `percent`; never lowers it. Returns the new value.
    pub fn advance_progress(&mut self, percent: u8) -> u8 {
        self.progress_percent = self.progress_percent.max(percent.min(100));
        self.progress_percent
    }
}
