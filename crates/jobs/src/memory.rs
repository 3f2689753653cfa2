//! In-memory job store.
//!
//! Implements [`JobClient`] without a network. Each submitted job can be
//! given a script of statuses that successive reads walk through, and
//! submit/trigger/fetch failures can be injected. Every call is recorded so
//! callers can assert on what was (and was not) sent to the store.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use wardrobe_core::job::{Job, JobStatus, JobType};
use wardrobe_core::types::{JobId, OwnerId};

use crate::client::{JobClient, JobClientError, TriggerAck};

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repeat {
    Times(u32),
    Forever,
}

/// One status report, served by one or more successive reads.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptStep {
    status: JobStatus,
    result: Option<serde_json::Value>,
    error: Option<String>,
    repeat: Repeat,
}

impl ScriptStep {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            result: None,
            error: None,
            repeat: Repeat::Times(1),
        }
    }

    pub fn succeeded(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            ..Self::status(JobStatus::Succeeded)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::status(JobStatus::Failed)
        }
    }

    /// Serve this step for `n` reads.
    pub fn times(mut self, n: u32) -> Self {
        self.repeat = Repeat::Times(n.max(1));
        self
    }

    /// Serve this step for every remaining read.
    pub fn forever(mut self) -> Self {
        self.repeat = Repeat::Forever;
        self
    }
}

/// A call received by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Submit { owner_id: OwnerId, job_type: JobType },
    Trigger(JobId),
    Fetch(JobId),
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct StoredJob {
    job: Job,
    script: VecDeque<ScriptStep>,
}

#[derive(Default)]
struct Failures {
    remaining: u32,
    message: String,
}

impl Failures {
    fn take(&mut self) -> Option<String> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.message.clone())
    }
}

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, StoredJob>,
    scripts: VecDeque<Vec<ScriptStep>>,
    submit_failures: Failures,
    trigger_failures: Failures,
    fetch_failures: Failures,
    calls: Vec<StoreCall>,
    next_id: u64,
}

/// [`JobClient`] over a process-local map of jobs.
#[derive(Default)]
pub struct InMemoryJobStore {
    state: Mutex<State>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Script for the next submitted job. Scripts are consumed in order,
    /// one per submit.
    pub fn enqueue_script(&self, steps: Vec<ScriptStep>) {
        self.lock().scripts.push_back(steps);
    }

    /// Insert an existing job, as if submitted by an earlier process.
    pub fn insert_job(&self, job: Job, script: Vec<ScriptStep>) {
        self.lock().jobs.insert(
            job.id.clone(),
            StoredJob {
                job,
                script: script.into(),
            },
        );
    }

    /// Fail the next `n` submits with `message`.
    pub fn fail_next_submits(&self, n: u32, message: impl Into<String>) {
        self.lock().submit_failures = Failures {
            remaining: n,
            message: message.into(),
        };
    }

    /// Fail the next `n` triggers with `message`. The job still runs.
    pub fn fail_next_triggers(&self, n: u32, message: impl Into<String>) {
        self.lock().trigger_failures = Failures {
            remaining: n,
            message: message.into(),
        };
    }

    /// Fail the next `n` reads (of any job) with `message`.
    pub fn fail_next_fetches(&self, n: u32, message: impl Into<String>) {
        self.lock().fetch_failures = Failures {
            remaining: n,
            message: message.into(),
        };
    }

    /// Current state of a job without recording a read.
    pub fn job(&self, job_id: &JobId) -> Option<Job> {
        self.lock().jobs.get(job_id).map(|s| s.job.clone())
    }

    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn submit_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Submit { .. }))
    }

    pub fn trigger_count(&self, job_id: &JobId) -> usize {
        self.count(|c| matches!(c, StoreCall::Trigger(id) if id == job_id))
    }

    pub fn fetch_count(&self, job_id: &JobId) -> usize {
        self.count(|c| matches!(c, StoreCall::Fetch(id) if id == job_id))
    }

    fn count(&self, pred: impl Fn(&StoreCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }
}

/// Serve the front step of a script, consuming it when its repeats run out.
fn advance(stored: &mut StoredJob) {
    let Some(step) = stored.script.front_mut() else {
        return;
    };
    stored.job.status = step.status;
    stored.job.result = step.result.clone();
    stored.job.error = step.error.clone();

    if let Repeat::Times(n) = &mut step.repeat {
        *n -= 1;
        if *n == 0 {
            stored.script.pop_front();
        }
    }
}

#[async_trait]
impl JobClient for InMemoryJobStore {
    async fn submit(
        &self,
        owner_id: &OwnerId,
        job_type: JobType,
        input: serde_json::Value,
    ) -> Result<Job, JobClientError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Submit {
            owner_id: owner_id.clone(),
            job_type,
        });
        if let Some(message) = state.submit_failures.take() {
            return Err(JobClientError::SubmitFailed(message));
        }

        state.next_id += 1;
        let job = Job {
            id: JobId::new(format!("job-{}", state.next_id)),
            job_type,
            status: JobStatus::Queued,
            input,
            result: None,
            error: None,
        };
        let script = state.scripts.pop_front().unwrap_or_default();
        state.jobs.insert(
            job.id.clone(),
            StoredJob {
                job: job.clone(),
                script: script.into(),
            },
        );
        Ok(job)
    }

    async fn trigger(&self, job_id: &JobId) -> Result<TriggerAck, JobClientError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Trigger(job_id.clone()));
        if let Some(reason) = state.trigger_failures.take() {
            return Err(JobClientError::TriggerFailed {
                job_id: job_id.clone(),
                reason,
            });
        }
        let stored = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobClientError::NotFound(job_id.clone()))?;
        if stored.job.status == JobStatus::Queued {
            stored.job.status = JobStatus::Running;
        }
        Ok(TriggerAck)
    }

    async fn fetch(&self, job_id: &JobId) -> Result<Job, JobClientError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Fetch(job_id.clone()));
        if let Some(reason) = state.fetch_failures.take() {
            return Err(JobClientError::FetchFailed {
                job_id: job_id.clone(),
                reason,
            });
        }
        let stored = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobClientError::NotFound(job_id.clone()))?;
        advance(stored);
        Ok(stored.job.clone())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn owner() -> OwnerId {
        OwnerId::new("owner-1")
    }

    #[tokio::test]
    async fn submit_creates_one_queued_job() {
        let store = InMemoryJobStore::new();
        let job = store
            .submit(&owner(), JobType::OutfitRender, json!({"outfit_id": "o1"}))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.input["outfit_id"], "o1");
        assert_eq!(store.job_count(), 1);
    }

    #[tokio::test]
    async fn trigger_is_idempotent() {
        let store = InMemoryJobStore::new();
        let job = store
            .submit(&owner(), JobType::OutfitRender, json!({}))
            .await
            .unwrap();

        store.trigger(&job.id).await.unwrap();
        store.trigger(&job.id).await.unwrap();
        store.trigger(&job.id).await.unwrap();

        assert_eq!(store.job_count(), 1);
        assert_eq!(store.submit_count(), 1);
        let current = store.fetch(&job.id).await.unwrap();
        assert_eq!(current.status, JobStatus::Running);
        assert!(current.result.is_none());
    }

    #[tokio::test]
    async fn script_steps_are_served_in_order() {
        let store = InMemoryJobStore::new();
        store.enqueue_script(vec![
            ScriptStep::status(JobStatus::Running).times(2),
            ScriptStep::succeeded(json!({"image_id": "i"})),
        ]);
        let job = store
            .submit(&owner(), JobType::WardrobeItemGenerate, json!({}))
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(store.fetch(&job.id).await.unwrap().status);
        }
        assert_eq!(
            seen,
            vec![
                JobStatus::Running,
                JobStatus::Running,
                JobStatus::Succeeded,
                JobStatus::Succeeded,
                JobStatus::Succeeded,
            ]
        );
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = InMemoryJobStore::new();
        store.fail_next_submits(1, "HTTP 503: unavailable");
        assert_matches!(
            store.submit(&owner(), JobType::TryOn, json!({})).await,
            Err(JobClientError::SubmitFailed(_))
        );
        assert_eq!(store.job_count(), 0);

        let job = store.submit(&owner(), JobType::TryOn, json!({})).await.unwrap();
        store.fail_next_triggers(1, "connection reset");
        assert_matches!(
            store.trigger(&job.id).await,
            Err(JobClientError::TriggerFailed { .. })
        );
        assert!(store.trigger(&job.id).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let missing = JobId::new("nope");
        assert_matches!(store.fetch(&missing).await, Err(JobClientError::NotFound(id)) if id == missing);
        assert_eq!(store.calls(), vec![StoreCall::Fetch(missing)]);
    }
}
