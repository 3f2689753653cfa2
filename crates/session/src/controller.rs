//! The generation session controller.
//!
//! One [`GenerationController`] serves every call site. A session runs:
//!
//! 1. claim the entity guard (before any remote call),
//! 2. preprocessing pipeline, ending in `submit`,
//! 3. best-effort `trigger` (failure tolerated),
//! 4. polling until a terminal status, timeout, or cancellation,
//! 5. outcome handling: refresh the entity and clear its pending job on a
//!    terminal result, keep the pending job on timeout or cancellation
//!    (writing it again if the pipeline could not).
//!
//! After submission the entity is addressed by the id the store persisted
//! it under, which may differ from the one in the request.
//!
//! The guard is released when the session's future completes or is
//! dropped, whichever way it ends.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wardrobe_core::classify::FailureKind;
use wardrobe_core::job::{GenerationResult, Job, JobStatus, JobType};
use wardrobe_core::phase::{Phase, ProgressPlan};
use wardrobe_core::session::{FailureCause, GenerationSession, SessionEvent};
use wardrobe_core::types::{EntityKind, EntityRef, JobId};
use wardrobe_jobs::client::JobClient;
use wardrobe_jobs::config::BackendConfig;
use wardrobe_jobs::polling::{Backoff, PollOutcome, PollPolicy, PollingEngine, DEFAULT_POLL_INTERVAL};
use wardrobe_pipeline::error::PipelineError;
use wardrobe_pipeline::pipeline::{PhaseUpdate, PreprocessingPipeline};
use wardrobe_pipeline::request::GenerationRequest;

use crate::error::SessionError;
use crate::events::{SessionEvents, SessionUpdate};
use crate::guard::SessionGuards;
use crate::notice::SessionNotice;
use crate::outcome::{SessionOutcome, SessionReport, TriggerStatus};

/// Drives generation sessions end to end.
pub struct GenerationController {
    pipeline: Arc<PreprocessingPipeline>,
    jobs: Arc<dyn JobClient>,
    engine: PollingEngine,
    guards: SessionGuards,
    events: SessionEvents,
    poll_interval: Duration,
    backoff: Backoff,
}

impl GenerationController {
    pub fn new(pipeline: Arc<PreprocessingPipeline>, jobs: Arc<dyn JobClient>) -> Self {
        Self {
            pipeline,
            engine: PollingEngine::new(jobs.clone()),
            jobs,
            guards: SessionGuards::new(),
            events: SessionEvents::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff: Backoff::Fixed,
        }
    }

    /// Poll with the interval and backoff of `config`.
    pub fn with_backend_config(mut self, config: &BackendConfig) -> Self {
        self.poll_interval = config.poll_interval;
        self.backoff = config.backoff;
        self
    }

    pub fn with_polling(mut self, interval: Duration, backoff: Backoff) -> Self {
        self.poll_interval = interval;
        self.backoff = backoff;
        self
    }

    pub fn guards(&self) -> &SessionGuards {
        &self.guards
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionUpdate> {
        self.events.subscribe()
    }

    pub fn is_generating(&self, target: &EntityRef) -> bool {
        self.guards.is_active(target)
    }

    fn policy(&self, job_type: JobType) -> PollPolicy {
        PollPolicy::for_job_type(job_type, self.poll_interval, self.backoff)
    }

    /// Run a new generation for `request`.
    ///
    /// Returns [`SessionError::AlreadyGenerating`] if the target entity has
    /// a session in flight. Every other problem ends up in the report.
    pub async fn start(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<SessionReport, SessionError> {
        let target = request.target();
        let _guard = self.guards.try_acquire(&target)?;

        tracing::info!(
            target_entity_id = %target,
            job_type = %request.job_type(),
            "Generation session started",
        );

        let mut tracker = Tracker::new(target.clone(), &self.events);
        let run = self
            .pipeline
            .run(&request, cancel, |update| tracker.on_phase(update))
            .await;

        let submission = match run {
            Ok(submission) => submission,
            Err(e) => return Ok(self.pipeline_failed(tracker, e)),
        };

        let job_id = submission.job.id.clone();
        tracker.entity = submission.target.clone();
        tracker.pending_recorded = submission.pending_recorded;
        tracker.apply(SessionEvent::Submitted(job_id.clone()));
        tracker.progress(submission.plan.percent_submitted());

        let trigger = match self.jobs.trigger(&job_id).await {
            Ok(_) => TriggerStatus::Acknowledged,
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    "Trigger failed, polling anyway",
                );
                TriggerStatus::Tolerated(e.to_string())
            }
        };

        let policy = self.policy(submission.job.job_type);
        let outcome = self
            .watch(&mut tracker, &job_id, &policy, &submission.plan, cancel)
            .await;
        Ok(self.finish(tracker, outcome, trigger).await)
    }

    /// Resume watching the job recorded on `target`, if there is one.
    ///
    /// Returns `Ok(None)` when the entity has no pending job.
    pub async fn resume(
        &self,
        target: EntityRef,
        cancel: &CancellationToken,
    ) -> Result<Option<SessionReport>, SessionError> {
        let _guard = self.guards.try_acquire(&target)?;

        let pending = self
            .pipeline
            .entities()
            .pending_job(&target)
            .await
            .map_err(|source| SessionError::PendingLookup {
                target: target.clone(),
                source,
            })?;
        let Some(job_id) = pending else {
            return Ok(None);
        };

        tracing::info!(target_entity_id = %target, job_id = %job_id, "Resuming pending job");
        let mut tracker = Tracker::new(target.clone(), &self.events);
        tracker.pending_recorded = true;
        tracker.apply(SessionEvent::Resumed(job_id.clone()));

        let job_type = match self.jobs.fetch(&job_id).await {
            Ok(job) if job.is_terminal() => {
                let outcome = if job.status == JobStatus::Failed {
                    PollOutcome::Failed(job)
                } else {
                    PollOutcome::Succeeded(job)
                };
                return Ok(Some(
                    self.finish(tracker, outcome, TriggerStatus::NotAttempted)
                        .await,
                ));
            }
            Ok(job) => job.job_type,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Pending job not readable yet");
                longest_job_type(target.kind)
            }
        };

        let plan = ProgressPlan::new(&[Phase::Submit]);
        let outcome = self
            .watch(&mut tracker, &job_id, &self.policy(job_type), &plan, cancel)
            .await;
        Ok(Some(
            self.finish(tracker, outcome, TriggerStatus::NotAttempted)
                .await,
        ))
    }

    async fn watch(
        &self,
        tracker: &mut Tracker<'_>,
        job_id: &JobId,
        policy: &PollPolicy,
        plan: &ProgressPlan,
        cancel: &CancellationToken,
    ) -> PollOutcome {
        let attempts = policy.scheduled_attempts();
        self.engine
            .watch(job_id, policy, cancel, |attempt| {
                tracker.apply(SessionEvent::PollAttempt(attempt));
                tracker.progress(plan.percent_polling(attempt, attempts));
            })
            .await
    }

    fn pipeline_failed(&self, mut tracker: Tracker<'_>, error: PipelineError) -> SessionReport {
        let target = tracker.session.target.clone();

        let Some(cause) = error.failure_cause() else {
            tracker.apply(SessionEvent::Cancelled);
            tracing::info!(target_entity_id = %target, "Session cancelled during preprocessing");
            return tracker.report(
                SessionOutcome::Cancelled { job_id: None },
                SessionNotice::Cancelled,
                TriggerStatus::NotAttempted,
            );
        };

        let notice = match &error {
            PipelineError::MissingPrerequisite(p) => SessionNotice::MissingPrerequisite {
                what: p.label().to_string(),
            },
            PipelineError::NoItemsSelected => SessionNotice::NoItemsSelected,
            _ if cause == (FailureCause::Job { kind: FailureKind::PolicyBlocked }) => {
                SessionNotice::PolicyBlocked
            }
            other => match other.phase() {
                Some(phase) => SessionNotice::PhaseFailed { phase },
                None => SessionNotice::Failed { detail: None },
            },
        };

        let message = error.to_string();
        tracing::warn!(
            target_entity_id = %target,
            phase = error.phase().map(|p| p.as_str()).unwrap_or("none"),
            error = %error,
            "Preprocessing failed",
        );
        tracker.apply(SessionEvent::Failed {
            cause: cause.clone(),
            message: message.clone(),
        });
        tracker.report(
            SessionOutcome::Failed { cause, message },
            notice,
            TriggerStatus::NotAttempted,
        )
    }

    async fn finish(
        &self,
        mut tracker: Tracker<'_>,
        outcome: PollOutcome,
        trigger: TriggerStatus,
    ) -> SessionReport {
        let target = tracker.entity.clone();
        let entities = self.pipeline.entities();

        match outcome {
            PollOutcome::Succeeded(job) => match GenerationResult::from_job(&job) {
                Ok(result) => {
                    tracker.apply(SessionEvent::JobSucceeded(job.clone()));
                    let entity = match entities.refresh(&target).await {
                        Ok(entity) => Some(entity),
                        Err(e) => {
                            tracing::warn!(target_entity_id = %target, error = %e, "Failed to refresh entity");
                            None
                        }
                    };
                    self.clear_pending(&mut tracker, &job.id).await;
                    tracing::info!(
                        target_entity_id = %target,
                        job_id = %job.id,
                        image_id = %result.image_id,
                        "Generation succeeded",
                    );
                    tracker.report(
                        SessionOutcome::Succeeded {
                            job,
                            result,
                            entity,
                        },
                        SessionNotice::Completed,
                        trigger,
                    )
                }
                Err(e) => {
                    let message = e.to_string();
                    self.job_failed(tracker, &job, FailureKind::Fatal, message, trigger)
                        .await
                }
            },
            PollOutcome::Failed(job) => {
                let message = job
                    .error
                    .clone()
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| crate::notice::GENERIC_FAILURE.to_string());
                let kind = self.jobs.classify_error(&message);
                self.job_failed(tracker, &job, kind, message, trigger).await
            }
            PollOutcome::TimedOut { job_id, .. } => {
                tracker.apply(SessionEvent::TimedOut);
                self.ensure_pending(&mut tracker).await;
                tracing::info!(
                    target_entity_id = %target,
                    job_id = %job_id,
                    "Session timed out; job left to finish remotely",
                );
                tracker.report(
                    SessionOutcome::TimedOut { job_id },
                    SessionNotice::StillProcessing,
                    trigger,
                )
            }
            PollOutcome::Cancelled => {
                tracker.apply(SessionEvent::Cancelled);
                self.ensure_pending(&mut tracker).await;
                let job_id = tracker.session.job_id().cloned();
                tracker.report(
                    SessionOutcome::Cancelled { job_id },
                    SessionNotice::Cancelled,
                    trigger,
                )
            }
        }
    }

    async fn job_failed(
        &self,
        mut tracker: Tracker<'_>,
        job: &Job,
        kind: FailureKind,
        message: String,
        trigger: TriggerStatus,
    ) -> SessionReport {
        let target = tracker.entity.clone();
        let cause = FailureCause::Job { kind };
        tracker.apply(SessionEvent::Failed {
            cause: cause.clone(),
            message: message.clone(),
        });
        self.clear_pending(&mut tracker, &job.id).await;

        let notice = if kind == FailureKind::PolicyBlocked {
            SessionNotice::PolicyBlocked
        } else {
            SessionNotice::Failed {
                detail: job.error.clone().filter(|e| !e.trim().is_empty()),
            }
        };
        tracing::error!(
            target_entity_id = %target,
            job_id = %job.id,
            kind = ?kind,
            error = %message,
            "Generation failed",
        );
        tracker.report(SessionOutcome::Failed { cause, message }, notice, trigger)
    }

    async fn clear_pending(&self, tracker: &mut Tracker<'_>, job_id: &JobId) {
        let target = &tracker.entity;
        match self.pipeline.entities().clear_pending_job(target, job_id).await {
            Ok(()) => tracker.pending_recorded = false,
            Err(e) => tracing::warn!(
                target_entity_id = %target,
                job_id = %job_id,
                error = %e,
                "Failed to clear pending job",
            ),
        }
    }

    /// Write the job id to the entity if the pipeline failed to, so a
    /// session that stops watching early can still be resumed.
    async fn ensure_pending(&self, tracker: &mut Tracker<'_>) {
        if tracker.pending_recorded {
            return;
        }
        let Some(job_id) = tracker.session.job_id().cloned() else {
            return;
        };
        let target = &tracker.entity;
        match self.pipeline.entities().record_pending_job(target, &job_id).await {
            Ok(()) => {
                tracing::info!(target_entity_id = %target, job_id = %job_id, "Recorded pending job");
                tracker.pending_recorded = true;
            }
            Err(e) => tracing::warn!(
                target_entity_id = %target,
                job_id = %job_id,
                error = %e,
                "Pending job not recorded, session cannot be resumed",
            ),
        }
    }
}

/// Job type with the largest polling budget for an entity kind, used when a
/// resumed job cannot be read up front.
fn longest_job_type(kind: EntityKind) -> JobType {
    match kind {
        EntityKind::Outfit => JobType::TryOn,
        EntityKind::WardrobeItem => JobType::WardrobeItemGenerate,
        EntityKind::ProfileImage => JobType::HeadshotGenerate,
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Applies events to the session and publishes every change.
struct Tracker<'a> {
    session: GenerationSession,
    events: &'a SessionEvents,
    /// The entity as persisted; starts out as the session target.
    entity: EntityRef,
    /// Whether the entity currently holds the session's job id.
    pending_recorded: bool,
}

impl<'a> Tracker<'a> {
    fn new(target: EntityRef, events: &'a SessionEvents) -> Self {
        Self {
            entity: target.clone(),
            session: GenerationSession::new(target),
            events,
            pending_recorded: false,
        }
    }

    fn apply(&mut self, event: SessionEvent) {
        match self.session.apply(event) {
            Ok(_) => {
                tracing::debug!(
                    target_entity_id = %self.session.target,
                    state = ?self.session.state(),
                    "Session state changed",
                );
                self.publish();
            }
            Err(e) => tracing::warn!(
                target_entity_id = %self.session.target,
                error = %e,
                "Ignoring invalid session transition",
            ),
        }
    }

    fn progress(&mut self, percent: u8) {
        let before = self.session.progress_percent();
        if self.session.advance_progress(percent) != before {
            self.publish();
        }
    }

    fn on_phase(&mut self, update: PhaseUpdate) {
        match update {
            PhaseUpdate::Started { phase, percent } => {
                self.apply(SessionEvent::PhaseStarted(phase));
                self.progress(percent);
            }
            PhaseUpdate::Finished { percent, .. } => self.progress(percent),
        }
    }

    fn publish(&self) {
        self.events.publish(SessionUpdate::snapshot(&self.session));
    }

    fn report(
        self,
        outcome: SessionOutcome,
        notice: SessionNotice,
        trigger: TriggerStatus,
    ) -> SessionReport {
        SessionReport {
            target: self.entity,
            job_id: self.session.job_id().cloned(),
            pending_recorded: self.pending_recorded,
            progress_percent: self.session.progress_percent(),
            final_state: self.session.state().clone(),
            outcome,
            notice,
            trigger,
        }
    }
}
