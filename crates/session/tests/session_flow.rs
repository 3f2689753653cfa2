mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{
    controller_over, memory_controller, outfit, outfit_render, owner, seeded_stores, INTERVAL,
};
use wardrobe_core::classify::FailureKind;
use wardrobe_core::job::{Job, JobStatus, JobType};
use wardrobe_core::phase::Phase;
use wardrobe_core::session::{FailureCause, SessionState};
use wardrobe_core::types::{JobId, OwnerId};
use wardrobe_jobs::client::{JobClient, JobClientError, TriggerAck};
use wardrobe_jobs::memory::{InMemoryJobStore, ScriptStep};
use wardrobe_jobs::polling::{Backoff, PollPolicy};
use wardrobe_pipeline::memory::StoreCall;
use wardrobe_session::error::SessionError;
use wardrobe_session::notice::SessionNotice;
use wardrobe_session::outcome::{SessionOutcome, TriggerStatus};

fn running_then(done: ScriptStep, running_reads: u32) -> Vec<ScriptStep> {
    vec![
        ScriptStep::status(JobStatus::Running).times(running_reads),
        done,
    ]
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn outfit_render_succeeds_on_fifth_poll() {
    let stores = seeded_stores();
    let jobs = Arc::new(InMemoryJobStore::new());
    jobs.enqueue_script(running_then(
        ScriptStep::succeeded(json!({"image_id": "render-1"})),
        4,
    ));
    let controller = memory_controller(&stores, &jobs);

    let report = controller
        .start(
            outfit_render("o1", &["top", "skirt", "boots"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_matches!(
        &report.outcome,
        SessionOutcome::Succeeded { result, entity: Some(_), .. }
            if result.image_id.as_str() == "render-1"
    );
    assert_eq!(report.notice, SessionNotice::Completed);
    assert_eq!(report.trigger, TriggerStatus::Acknowledged);
    assert_eq!(report.progress_percent, 100);
    assert_matches!(report.final_state, SessionState::Succeeded { .. });

    let job_id = report.job_id.clone().unwrap();
    assert_eq!(jobs.submit_count(), 1);
    assert_eq!(jobs.trigger_count(&job_id), 1);
    assert_eq!(jobs.fetch_count(&job_id), 5);

    assert_eq!(stores.pending(&outfit("o1")), None);
    assert_eq!(stores.refresh_count(), 1);
    assert!(!controller.is_generating(&outfit("o1")));
}

#[tokio::test(start_paused = true)]
async fn missing_reference_photo_never_submits() {
    let stores = Arc::new(wardrobe_pipeline::memory::InMemoryStores::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let controller = memory_controller(&stores, &jobs);

    let report = controller
        .start(outfit_render("o1", &["top"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_matches!(
        report.outcome,
        SessionOutcome::Failed { cause: FailureCause::MissingPrerequisite, .. }
    );
    assert_eq!(
        report.notice,
        SessionNotice::MissingPrerequisite {
            what: "a reference photo".into()
        }
    );
    assert!(!report.notice.offers_retry());
    assert_eq!(report.job_id, None);
    assert_eq!(report.trigger, TriggerStatus::NotAttempted);
    assert_eq!(jobs.submit_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_keeps_pending_job_and_releases_guard() {
    let stores = seeded_stores();
    let jobs = Arc::new(InMemoryJobStore::new());
    jobs.enqueue_script(vec![ScriptStep::status(JobStatus::Running).forever()]);
    let controller = memory_controller(&stores, &jobs);

    let report = controller
        .start(outfit_render("o1", &["top"]), &CancellationToken::new())
        .await
        .unwrap();

    let job_id = report.job_id.clone().unwrap();
    assert_matches!(&report.outcome, SessionOutcome::TimedOut { job_id: id } if *id == job_id);
    assert_eq!(report.notice, SessionNotice::StillProcessing);
    assert!(!report.notice.is_error());
    assert!(report.progress_percent < 100);

    let max = JobType::OutfitRender.max_poll_attempts() as usize;
    assert_eq!(jobs.fetch_count(&job_id), max + 1);
    assert!(report.pending_recorded);
    assert_eq!(stores.pending(&outfit("o1")), Some(job_id));
    assert!(!stores
        .calls()
        .iter()
        .any(|c| matches!(c, StoreCall::ClearPending(..))));
    assert!(!controller.is_generating(&outfit("o1")));
}

#[tokio::test(start_paused = true)]
async fn timed_out_session_rewrites_missing_pending_job() {
    let stores = seeded_stores();
    stores.fail_next_record_pending(1, "HTTP 500");
    let jobs = Arc::new(InMemoryJobStore::new());
    let max = JobType::OutfitRender.max_poll_attempts();
    jobs.enqueue_script(running_then(
        ScriptStep::succeeded(json!({"image_id": "late"})),
        max + 4,
    ));
    let controller = memory_controller(&stores, &jobs);

    let report = controller
        .start(outfit_render("o1", &["top"]), &CancellationToken::new())
        .await
        .unwrap();

    let job_id = report.job_id.clone().unwrap();
    assert_matches!(report.outcome, SessionOutcome::TimedOut { .. });
    assert!(report.pending_recorded);
    assert_eq!(stores.pending(&outfit("o1")), Some(job_id.clone()));
    let writes = stores
        .calls()
        .iter()
        .filter(|c| matches!(c, StoreCall::RecordPending(..)))
        .count();
    assert_eq!(writes, 2);

    let resumed = controller
        .resume(outfit("o1"), &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_matches!(
        &resumed.outcome,
        SessionOutcome::Succeeded { job, .. } if job.id == job_id
    );
    assert_eq!(stores.pending(&outfit("o1")), None);
}

#[tokio::test(start_paused = true)]
async fn unrecordable_pending_job_is_flagged_on_the_report() {
    let stores = seeded_stores();
    stores.fail_record_pending("HTTP 500");
    let jobs = Arc::new(InMemoryJobStore::new());
    jobs.enqueue_script(vec![ScriptStep::status(JobStatus::Running).forever()]);
    let controller = memory_controller(&stores, &jobs);

    let report = controller
        .start(outfit_render("o1", &["top"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_matches!(report.outcome, SessionOutcome::TimedOut { .. });
    assert_eq!(report.notice, SessionNotice::StillProcessing);
    assert!(!report.pending_recorded);
    assert_eq!(stores.pending(&outfit("o1")), None);
}

#[tokio::test(start_paused = true)]
async fn outcome_handling_uses_store_assigned_id() {
    let stores = seeded_stores();
    stores.assign_id(&outfit("o1"), "o1-saved");
    let jobs = Arc::new(InMemoryJobStore::new());
    jobs.enqueue_script(running_then(
        ScriptStep::succeeded(json!({"image_id": "render-2"})),
        1,
    ));
    let controller = memory_controller(&stores, &jobs);

    let report = controller
        .start(outfit_render("o1", &["top"]), &CancellationToken::new())
        .await
        .unwrap();

    let saved = outfit("o1-saved");
    assert!(report.outcome.is_success());
    assert_eq!(report.target, saved);
    assert!(!report.pending_recorded);
    let calls = stores.calls();
    assert!(calls
        .iter()
        .any(|c| matches!(c, StoreCall::Refresh(t) if *t == saved)));
    assert!(calls
        .iter()
        .any(|c| matches!(c, StoreCall::ClearPending(t, _) if *t == saved)));
    assert_eq!(stores.pending(&saved), None);
    assert!(!controller.is_generating(&outfit("o1")));
}

#[tokio::test(start_paused = true)]
async fn policy_failure_gets_policy_notice() {
    let stores = seeded_stores();
    let jobs = Arc::new(InMemoryJobStore::new());
    jobs.enqueue_script(running_then(
        ScriptStep::failed("Request rejected: content policy violation"),
        2,
    ));
    let controller = memory_controller(&stores, &jobs);

    let report = controller
        .start(outfit_render("o1", &["top", "skirt"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_matches!(
        &report.outcome,
        SessionOutcome::Failed { cause: FailureCause::Job { kind: FailureKind::PolicyBlocked }, message }
            if message.contains("content policy")
    );
    assert_eq!(report.notice, SessionNotice::PolicyBlocked);
    assert!(report.notice.message().contains("not been charged"));
    assert!(!report.notice.offers_retry());
    assert_eq!(stores.pending(&outfit("o1")), None);
}

#[tokio::test(start_paused = true)]
async fn generic_failure_carries_backend_text() {
    let stores = seeded_stores();
    let jobs = Arc::new(InMemoryJobStore::new());
    jobs.enqueue_script(running_then(ScriptStep::failed("model crashed"), 1));
    let controller = memory_controller(&stores, &jobs);

    let report = controller
        .start(outfit_render("o1", &["top"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_matches!(
        report.outcome,
        SessionOutcome::Failed { cause: FailureCause::Job { kind: FailureKind::Fatal }, .. }
    );
    assert_eq!(
        report.notice,
        SessionNotice::Failed {
            detail: Some("model crashed".into())
        }
    );
    assert!(report.notice.offers_retry());
}

#[tokio::test(start_paused = true)]
async fn trigger_failure_is_tolerated() {
    let stores = seeded_stores();
    let jobs = Arc::new(InMemoryJobStore::new());
    jobs.fail_next_triggers(1, "connection reset by peer");
    jobs.enqueue_script(running_then(
        ScriptStep::succeeded(json!({"image_id": "render-2"})),
        2,
    ));
    let controller = memory_controller(&stores, &jobs);

    let report = controller
        .start(outfit_render("o1", &["top"]), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.outcome.is_success());
    assert_matches!(&report.trigger, TriggerStatus::Tolerated(reason) if reason.contains("connection reset"));
    assert_eq!(jobs.submit_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unreadable_result_is_a_failure() {
    let stores = seeded_stores();
    let jobs = Arc::new(InMemoryJobStore::new());
    jobs.enqueue_script(vec![ScriptStep::succeeded(json!({"unexpected": true}))]);
    let controller = memory_controller(&stores, &jobs);

    let report = controller
        .start(outfit_render("o1", &["top"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_matches!(
        report.outcome,
        SessionOutcome::Failed { cause: FailureCause::Job { kind: FailureKind::Fatal }, .. }
    );
}

#[tokio::test(start_paused = true)]
async fn preprocessing_failure_names_the_phase() {
    let stores = seeded_stores();
    stores.fail_downloads("bucket unavailable");
    let jobs = Arc::new(InMemoryJobStore::new());
    let controller = memory_controller(&stores, &jobs);

    let report = controller
        .start(outfit_render("o1", &["top"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_matches!(
        report.outcome,
        SessionOutcome::Failed { cause: FailureCause::Phase { phase: Phase::AcquireAssets }, .. }
    );
    assert_eq!(
        report.notice,
        SessionNotice::PhaseFailed {
            phase: Phase::AcquireAssets
        }
    );
    assert_eq!(jobs.submit_count(), 0);
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn second_start_for_same_entity_is_rejected() {
    let stores = seeded_stores();
    let jobs = Arc::new(InMemoryJobStore::new());
    jobs.enqueue_script(vec![ScriptStep::status(JobStatus::Running).forever()]);
    let controller = Arc::new(memory_controller(&stores, &jobs));
    let cancel = CancellationToken::new();

    let first = tokio::spawn({
        let controller = controller.clone();
        let cancel = cancel.clone();
        async move {
            controller
                .start(outfit_render("o1", &["top"]), &cancel)
                .await
        }
    });
    while jobs.submit_count() == 0 {
        tokio::task::yield_now().await;
    }
    assert!(controller.is_generating(&outfit("o1")));

    let second = controller
        .start(outfit_render("o1", &["skirt"]), &CancellationToken::new())
        .await;
    assert_matches!(second, Err(SessionError::AlreadyGenerating(target)) if target == outfit("o1"));

    // Another entity is unaffected.
    jobs.enqueue_script(vec![ScriptStep::succeeded(json!({"image_id": "x"}))]);
    let other = controller
        .start(outfit_render("o2", &["skirt"]), &CancellationToken::new())
        .await
        .unwrap();
    assert!(other.outcome.is_success());

    cancel.cancel();
    let first = first.await.unwrap().unwrap();
    assert_matches!(first.outcome, SessionOutcome::Cancelled { job_id: Some(_) });
    assert!(first.job_id.is_some());
    assert_eq!(stores.pending(&outfit("o1")), first.job_id);

    jobs.enqueue_script(vec![ScriptStep::succeeded(json!({"image_id": "y"}))]);
    let again = controller
        .start(outfit_render("o1", &["top"]), &CancellationToken::new())
        .await
        .unwrap();
    assert!(again.outcome.is_success());
}

/// Job client whose reads panic.
struct PanickingJobs {
    inner: InMemoryJobStore,
}

#[async_trait]
impl JobClient for PanickingJobs {
    async fn submit(
        &self,
        owner_id: &OwnerId,
        job_type: JobType,
        input: serde_json::Value,
    ) -> Result<Job, JobClientError> {
        self.inner.submit(owner_id, job_type, input).await
    }

    async fn trigger(&self, job_id: &JobId) -> Result<TriggerAck, JobClientError> {
        self.inner.trigger(job_id).await
    }

    async fn fetch(&self, _job_id: &JobId) -> Result<Job, JobClientError> {
        panic!("store exploded");
    }
}

#[tokio::test(start_paused = true)]
async fn guard_released_when_session_panics() {
    let stores = seeded_stores();
    let jobs = Arc::new(PanickingJobs {
        inner: InMemoryJobStore::new(),
    });
    let controller = Arc::new(controller_over(&stores, jobs));

    let task = tokio::spawn({
        let controller = controller.clone();
        async move {
            controller
                .start(outfit_render("o1", &["top"]), &CancellationToken::new())
                .await
        }
    });
    let err = task.await.unwrap_err();
    assert!(err.is_panic());
    assert!(!controller.is_generating(&outfit("o1")));
    assert_eq!(controller.guards().active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn guard_released_when_session_is_dropped() {
    let stores = seeded_stores();
    let jobs = Arc::new(InMemoryJobStore::new());
    jobs.enqueue_script(vec![ScriptStep::status(JobStatus::Running).forever()]);
    let controller = Arc::new(memory_controller(&stores, &jobs));

    let task = tokio::spawn({
        let controller = controller.clone();
        async move {
            controller
                .start(outfit_render("o1", &["top"]), &CancellationToken::new())
                .await
        }
    });
    while !controller.is_generating(&outfit("o1")) {
        tokio::task::yield_now().await;
    }
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert!(!controller.is_generating(&outfit("o1")));
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancel_before_start_submits_nothing() {
    let stores = seeded_stores();
    let jobs = Arc::new(InMemoryJobStore::new());
    let controller = memory_controller(&stores, &jobs);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = controller
        .start(outfit_render("o1", &["top"]), &cancel)
        .await
        .unwrap();

    assert_matches!(report.outcome, SessionOutcome::Cancelled { job_id: None });
    assert_eq!(report.notice, SessionNotice::Cancelled);
    assert_eq!(report.final_state, SessionState::Cancelled);
    assert_eq!(jobs.submit_count(), 0);
}

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

fn existing_job(id: &str, status: JobStatus) -> Job {
    Job {
        id: JobId::new(id),
        job_type: JobType::OutfitRender,
        status,
        input: json!({"outfit_id": "o1"}),
        result: None,
        error: None,
    }
}

#[tokio::test(start_paused = true)]
async fn resume_watches_recorded_job() {
    let stores = seeded_stores();
    stores.insert_entity(&outfit("o1"), &owner(), Some(JobId::new("job-old")));
    let jobs = Arc::new(InMemoryJobStore::new());
    jobs.insert_job(
        existing_job("job-old", JobStatus::Running),
        running_then(ScriptStep::succeeded(json!({"image_id": "late"})), 3),
    );
    let controller = memory_controller(&stores, &jobs);

    let report = controller
        .resume(outfit("o1"), &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_matches!(
        &report.outcome,
        SessionOutcome::Succeeded { result, .. } if result.image_id.as_str() == "late"
    );
    assert_eq!(report.trigger, TriggerStatus::NotAttempted);
    assert_eq!(jobs.submit_count(), 0);
    assert_eq!(stores.pending(&outfit("o1")), None);
}

#[tokio::test(start_paused = true)]
async fn resume_of_finished_job_does_not_poll() {
    let stores = seeded_stores();
    stores.insert_entity(&outfit("o1"), &owner(), Some(JobId::new("job-old")));
    let jobs = Arc::new(InMemoryJobStore::new());
    let mut failed = existing_job("job-old", JobStatus::Failed);
    failed.error = Some("flagged by moderation".into());
    jobs.insert_job(failed, vec![]);
    let controller = memory_controller(&stores, &jobs);

    let report = controller
        .resume(outfit("o1"), &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.notice, SessionNotice::PolicyBlocked);
    assert_eq!(jobs.fetch_count(&JobId::new("job-old")), 1);
    assert_eq!(stores.pending(&outfit("o1")), None);
}

#[tokio::test(start_paused = true)]
async fn resume_without_pending_job_is_none() {
    let stores = seeded_stores();
    stores.insert_entity(&outfit("o1"), &owner(), None);
    let jobs = Arc::new(InMemoryJobStore::new());
    let controller = memory_controller(&stores, &jobs);

    let report = controller
        .resume(outfit("o1"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_none());
    assert!(!controller.is_generating(&outfit("o1")));
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn updates_are_broadcast_in_order() {
    let stores = seeded_stores();
    let jobs = Arc::new(InMemoryJobStore::new());
    jobs.enqueue_script(running_then(
        ScriptStep::succeeded(json!({"image_id": "render-3"})),
        2,
    ));
    let controller = memory_controller(&stores, &jobs);
    let mut rx = controller.subscribe();

    controller
        .start(outfit_render("o1", &["top", "skirt"]), &CancellationToken::new())
        .await
        .unwrap();

    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }

    assert!(updates.iter().all(|u| u.target == outfit("o1")));
    assert_matches!(
        updates[0].state,
        SessionState::Preprocessing { phase: Phase::PersistDraft }
    );
    assert!(updates
        .windows(2)
        .all(|w| w[0].progress_percent <= w[1].progress_percent));
    assert!(updates
        .iter()
        .any(|u| matches!(u.state, SessionState::Polling { attempt: 3, .. })));

    let last = updates.last().unwrap();
    assert_matches!(last.state, SessionState::Succeeded { .. });
    assert_eq!(last.progress_percent, 100);
    assert!(last.job_id.is_some());
}

#[tokio::test(start_paused = true)]
async fn polling_progress_reaches_band_top_under_backoff() {
    let stores = seeded_stores();
    let jobs = Arc::new(InMemoryJobStore::new());
    let backoff = Backoff::Exponential {
        multiplier: 2.0,
        max_interval: Duration::from_secs(8),
    };
    let reads = PollPolicy::for_job_type(JobType::OutfitRender, INTERVAL, backoff).scheduled_attempts();
    assert!(reads < JobType::OutfitRender.max_poll_attempts());
    jobs.enqueue_script(running_then(
        ScriptStep::succeeded(json!({"image_id": "render-4"})),
        reads - 1,
    ));
    let controller = memory_controller(&stores, &jobs).with_polling(INTERVAL, backoff);
    let mut rx = controller.subscribe();

    let request = outfit_render("o1", &["top"]);
    let top = request.plan().percent_polling(1, 1);
    let report = controller
        .start(request, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.outcome.is_success());

    let mut last_polling = None;
    while let Ok(update) = rx.try_recv() {
        if matches!(update.state, SessionState::Polling { .. }) {
            last_polling = Some(update);
        }
    }
    let last_polling = last_polling.unwrap();
    assert_matches!(last_polling.state, SessionState::Polling { attempt, .. } if attempt == reads);
    assert_eq!(last_polling.progress_percent, top);
}
