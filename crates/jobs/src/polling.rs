//! Job-type-agnostic polling with a bounded wall-clock budget.
//!
//! [`PollingEngine::watch`] reads a job until it reaches a terminal status,
//! the attempt budget runs out, or the caller cancels. When the budget is
//! exhausted it performs exactly one final check before reporting
//! [`PollOutcome::TimedOut`]. Cancelling only stops local observation; the
//! remote job is never touched.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wardrobe_core::job::{Job, JobStatus, JobType};
use wardrobe_core::types::JobId;

use crate::client::JobClient;

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// How the wait between polls evolves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Wait `interval` after every attempt.
    Fixed,
    /// Start at `interval` and grow by `multiplier`, up to `max_interval`.
    Exponential {
        multiplier: f64,
        max_interval: Duration,
    },
}

/// Attempt budget and wait schedule for one watch.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff: Backoff,
}

impl PollPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: Backoff::Fixed,
        }
    }

    /// Policy using the attempt budget of `job_type`.
    pub fn for_job_type(job_type: JobType, interval: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts: job_type.max_poll_attempts(),
            interval,
            backoff,
        }
    }

    /// Total time the engine may spend waiting: `max_attempts * interval`.
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }

    /// Waits that follow each attempt, in order.
    ///
    /// Has at most `max_attempts` entries and never sums past
    /// [`budget`](Self::budget). With exponential backoff the last wait is
    /// shortened to fit and fewer attempts may be scheduled.
    pub fn schedule(&self) -> Vec<Duration> {
        let budget = self.budget();
        let mut waits = Vec::with_capacity(self.max_attempts as usize);
        let mut spent = Duration::ZERO;
        let mut delay = self.interval;

        while waits.len() < self.max_attempts as usize && spent < budget {
            let wait = delay.min(budget - spent);
            waits.push(wait);
            spent += wait;
            delay = next_delay(delay, self);
        }
        waits
    }

    /// Number of scheduled reads, not counting the final check.
    pub fn scheduled_attempts(&self) -> u32 {
        self.schedule().len() as u32
    }
}

/// Calculate the wait that follows `current` under `policy`.
pub fn next_delay(current: Duration, policy: &PollPolicy) -> Duration {
    match policy.backoff {
        Backoff::Fixed => policy.interval,
        Backoff::Exponential {
            multiplier,
            max_interval,
        } => {
            let next_ms = (current.as_millis() as f64 * multiplier) as u64;
            Duration::from_millis(next_ms).min(max_interval)
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// How a watch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Succeeded(Job),
    Failed(Job),
    /// Budget exhausted and the final check was inconclusive. The job may
    /// still complete remotely.
    TimedOut {
        job_id: JobId,
        last_status: Option<JobStatus>,
    },
    /// The caller stopped observing.
    Cancelled,
}

impl PollOutcome {
    fn from_terminal(job: Job) -> Self {
        match job.status {
            JobStatus::Failed => Self::Failed(job),
            _ => Self::Succeeded(job),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Polls a [`JobClient`] until a job settles.
#[derive(Clone)]
pub struct PollingEngine {
    client: Arc<dyn JobClient>,
}

impl PollingEngine {
    pub fn new(client: Arc<dyn JobClient>) -> Self {
        Self { client }
    }

    /// Watch `job_id` under `policy`.
    ///
    /// `on_attempt` is called with the 1-based attempt number before each
    /// scheduled read (not before the final check). Fetch errors of any
    /// kind, including not-found, are logged and polling continues.
    pub async fn watch<F>(
        &self,
        job_id: &JobId,
        policy: &PollPolicy,
        cancel: &CancellationToken,
        mut on_attempt: F,
    ) -> PollOutcome
    where
        F: FnMut(u32) + Send,
    {
        let mut last_status: Option<JobStatus> = None;

        for (index, wait) in policy.schedule().into_iter().enumerate() {
            let attempt = index as u32 + 1;
            if cancel.is_cancelled() {
                return self.cancelled(job_id, attempt);
            }
            on_attempt(attempt);

            tokio::select! {
                _ = cancel.cancelled() => return self.cancelled(job_id, attempt),
                read = self.read(job_id, attempt, &mut last_status) => {
                    if let Some(job) = read {
                        return PollOutcome::from_terminal(job);
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return self.cancelled(job_id, attempt),
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::debug!(job_id = %job_id, "Attempt budget exhausted, running final check");
        let final_read = tokio::select! {
            _ = cancel.cancelled() => return self.cancelled(job_id, policy.max_attempts),
            read = self.read(job_id, policy.max_attempts + 1, &mut last_status) => read,
        };
        if let Some(job) = final_read {
            tracing::info!(job_id = %job_id, status = %job.status, "Final check found terminal job");
            return PollOutcome::from_terminal(job);
        }

        tracing::warn!(
            job_id = %job_id,
            last_status = last_status.map(|s| s.as_str()).unwrap_or("unknown"),
            budget_ms = policy.budget().as_millis() as u64,
            "Polling timed out; job may still complete",
        );
        PollOutcome::TimedOut {
            job_id: job_id.clone(),
            last_status,
        }
    }

    /// One read. Returns the job only if it is terminal.
    async fn read(
        &self,
        job_id: &JobId,
        attempt: u32,
        last_status: &mut Option<JobStatus>,
    ) -> Option<Job> {
        match self.client.fetch(job_id).await {
            Ok(job) => {
                if let Some(prev) = *last_status {
                    if !prev.can_transition_to(job.status) {
                        tracing::warn!(
                            job_id = %job_id,
                            attempt,
                            from = %prev,
                            to = %job.status,
                            "Ignoring non-monotonic status report",
                        );
                        return None;
                    }
                }
                *last_status = Some(job.status);
                tracing::debug!(job_id = %job_id, attempt, status = %job.status, "Polled job");
                job.is_terminal().then_some(job)
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, attempt, error = %e, "Poll attempt failed");
                None
            }
        }
    }

    fn cancelled(&self, job_id: &JobId, attempt: u32) -> PollOutcome {
        tracing::info!(job_id = %job_id, attempt, "Polling cancelled");
        PollOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::memory::{InMemoryJobStore, ScriptStep};
    use wardrobe_core::types::OwnerId;

    fn exponential(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            max_attempts,
            interval: Duration::from_secs(2),
            backoff: Backoff::Exponential {
                multiplier: 2.0,
                max_interval: Duration::from_secs(8),
            },
        }
    }

    async fn submitted(store: &InMemoryJobStore, steps: Vec<ScriptStep>) -> JobId {
        store.enqueue_script(steps);
        store
            .submit(&OwnerId::new("u1"), JobType::HeadshotGenerate, serde_json::json!({}))
            .await
            .unwrap()
            .id
    }

    // -- schedule --

    #[test]
    fn fixed_schedule_fills_budget_exactly() {
        let policy = PollPolicy::fixed(30, Duration::from_secs(2));
        let waits = policy.schedule();
        assert_eq!(waits.len(), 30);
        assert_eq!(waits.iter().sum::<Duration>(), policy.budget());
    }

    #[test]
    fn exponential_schedule_stays_within_budget() {
        let policy = exponential(30);
        let waits = policy.schedule();
        assert!(waits.len() <= 30);
        assert_eq!(waits.iter().sum::<Duration>(), Duration::from_secs(60));
        assert_eq!(&waits[..4], &[
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8),
            Duration::from_secs(8),
        ]);
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let policy = exponential(10);
        assert_eq!(
            next_delay(Duration::from_secs(6), &policy),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn scheduled_attempts_follow_backoff() {
        assert_eq!(PollPolicy::fixed(30, Duration::from_secs(2)).scheduled_attempts(), 30);
        let policy = exponential(30);
        assert_eq!(policy.scheduled_attempts() as usize, policy.schedule().len());
        assert!(policy.scheduled_attempts() < 30);
    }

    #[test]
    fn zero_attempts_schedules_nothing() {
        assert!(PollPolicy::fixed(0, Duration::from_secs(2)).schedule().is_empty());
    }

    // -- engine --

    #[tokio::test(start_paused = true)]
    async fn returns_success_on_terminal_status() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = submitted(&store, vec![
            ScriptStep::status(JobStatus::Running),
            ScriptStep::status(JobStatus::Running),
            ScriptStep::succeeded(serde_json::json!({"headshot_image_id": "img-1"})),
        ])
        .await;

        let engine = PollingEngine::new(store.clone());
        let mut attempts = Vec::new();
        let outcome = engine
            .watch(
                &id,
                &PollPolicy::fixed(30, Duration::from_secs(2)),
                &CancellationToken::new(),
                |n| attempts.push(n),
            )
            .await;

        assert_matches!(outcome, PollOutcome::Succeeded(job) if job.id == id);
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_within_wall_clock_budget() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = submitted(&store, vec![
            ScriptStep::status(JobStatus::Running).times(9),
            ScriptStep::failed("worker crashed"),
        ])
        .await;
        let policy = PollPolicy::fixed(10, Duration::from_secs(2));

        let start = tokio::time::Instant::now();
        let outcome = PollingEngine::new(store)
            .watch(&id, &policy, &CancellationToken::new(), |_| {})
            .await;

        assert_matches!(outcome, PollOutcome::Failed(job) if job.error.as_deref() == Some("worker crashed"));
        assert!(start.elapsed() <= policy.budget());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_do_not_abort() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = submitted(&store, vec![
            ScriptStep::status(JobStatus::Running),
            ScriptStep::succeeded(serde_json::json!({"headshot_image_id": "img-1"})),
        ])
        .await;
        store.fail_next_fetches(4, "503 service unavailable");

        let outcome = PollingEngine::new(store.clone())
            .watch(
                &id,
                &PollPolicy::fixed(30, Duration::from_secs(2)),
                &CancellationToken::new(),
                |_| {},
            )
            .await;

        assert_matches!(outcome, PollOutcome::Succeeded(_));
        assert_eq!(store.fetch_count(&id), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_job_is_polled_until_timeout() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = JobId::new("missing");
        let policy = PollPolicy::fixed(5, Duration::from_secs(2));

        let outcome = PollingEngine::new(store.clone())
            .watch(&id, &policy, &CancellationToken::new(), |_| {})
            .await;

        assert_matches!(outcome, PollOutcome::TimedOut { last_status: None, .. });
        assert_eq!(store.fetch_count(&id), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_one_final_check_before_timeout() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = submitted(&store, vec![ScriptStep::status(JobStatus::Running).forever()]).await;
        let policy = PollPolicy::fixed(30, Duration::from_secs(2));

        let start = tokio::time::Instant::now();
        let outcome = PollingEngine::new(store.clone())
            .watch(&id, &policy, &CancellationToken::new(), |_| {})
            .await;

        assert_matches!(
            outcome,
            PollOutcome::TimedOut { last_status: Some(JobStatus::Running), .. }
        );
        assert_eq!(store.fetch_count(&id), 31);
        assert_eq!(start.elapsed(), policy.budget());
    }

    #[tokio::test(start_paused = true)]
    async fn final_check_can_observe_success() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = submitted(&store, vec![
            ScriptStep::status(JobStatus::Running).times(5),
            ScriptStep::succeeded(serde_json::json!({"headshot_image_id": "late"})),
        ])
        .await;

        let outcome = PollingEngine::new(store.clone())
            .watch(
                &id,
                &PollPolicy::fixed(5, Duration::from_secs(2)),
                &CancellationToken::new(),
                |_| {},
            )
            .await;

        assert_matches!(outcome, PollOutcome::Succeeded(_));
        assert_eq!(store.fetch_count(&id), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = submitted(&store, vec![ScriptStep::status(JobStatus::Running).forever()]).await;
        let cancel = CancellationToken::new();

        let engine = PollingEngine::new(store.clone());
        let watch_id = id.clone();
        let watch_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            engine
                .watch(
                    &watch_id,
                    &PollPolicy::fixed(60, Duration::from_secs(2)),
                    &watch_cancel,
                    |_| {},
                )
                .await
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        let outcome = handle.await.unwrap();

        assert_eq!(outcome, PollOutcome::Cancelled);
        let reads = store.fetch_count(&id);
        assert!(reads <= 3, "read {reads} times");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.fetch_count(&id), reads);
        assert_eq!(store.trigger_count(&id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn regressing_status_is_ignored() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = submitted(&store, vec![
            ScriptStep::status(JobStatus::Running),
            ScriptStep::status(JobStatus::Queued),
            ScriptStep::succeeded(serde_json::json!({"headshot_image_id": "img"})),
        ])
        .await;

        let outcome = PollingEngine::new(store)
            .watch(
                &id,
                &PollPolicy::fixed(10, Duration::from_secs(2)),
                &CancellationToken::new(),
                |_| {},
            )
            .await;
        assert_matches!(outcome, PollOutcome::Succeeded(_));
    }
}
