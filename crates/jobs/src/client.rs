//! The typed job client seam.
//!
//! Everything above this layer (pipeline, polling, sessions) talks to the
//! job store through [`JobClient`], so the HTTP implementation and the
//! in-memory store are interchangeable.

use async_trait::async_trait;
use wardrobe_core::classify::{classify_error, FailureKind};
use wardrobe_core::job::{Job, JobType};
use wardrobe_core::types::{JobId, OwnerId};

use crate::api::{BackendApiError, JobStoreApi};

/// Acknowledgement that the store accepted a trigger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerAck;

/// Errors surfaced by a [`JobClient`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobClientError {
    /// The job record could not be created. No job exists remotely.
    #[error("Failed to submit job: {0}")]
    SubmitFailed(String),

    /// The trigger signal was not acknowledged. The job may still run.
    #[error("Failed to trigger job {job_id}: {reason}")]
    TriggerFailed { job_id: JobId, reason: String },

    /// The store has no job with this id (yet).
    #[error("Job {0} not found")]
    NotFound(JobId),

    /// A read failed for any other reason.
    #[error("Failed to fetch job {job_id}: {reason}")]
    FetchFailed { job_id: JobId, reason: String },
}

impl JobClientError {
    /// Classification of the underlying message.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotFound(_) => FailureKind::Transient,
            Self::SubmitFailed(reason)
            | Self::TriggerFailed { reason, .. }
            | Self::FetchFailed { reason, .. } => classify_error(reason),
        }
    }
}

/// Submit, trigger and read generation jobs.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Create exactly one job record. The returned job is `queued`.
    async fn submit(
        &self,
        owner_id: &OwnerId,
        job_type: JobType,
        input: serde_json::Value,
    ) -> Result<Job, JobClientError>;

    /// Best-effort signal to start processing. Safe to repeat: triggering
    /// never creates a job or a result.
    async fn trigger(&self, job_id: &JobId) -> Result<TriggerAck, JobClientError>;

    /// Idempotent read of the current job envelope.
    async fn fetch(&self, job_id: &JobId) -> Result<Job, JobClientError>;

    /// Classify a backend error payload.
    fn classify_error(&self, message: &str) -> FailureKind {
        classify_error(message)
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// [`JobClient`] backed by the job store REST API.
pub struct HttpJobClient {
    api: JobStoreApi,
}

impl HttpJobClient {
    pub fn new(api: JobStoreApi) -> Self {
        Self { api }
    }
}

/// Render an API error as the message the store meant to convey.
fn describe(err: &BackendApiError) -> String {
    match err {
        BackendApiError::ApiError { status, body } => {
            let detail = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| {
                    v.get("error")
                        .or_else(|| v.get("message"))
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| body.clone());
            format!("HTTP {status}: {detail}")
        }
        BackendApiError::Request(e) => e.to_string(),
    }
}

#[async_trait]
impl JobClient for HttpJobClient {
    async fn submit(
        &self,
        owner_id: &OwnerId,
        job_type: JobType,
        input: serde_json::Value,
    ) -> Result<Job, JobClientError> {
        let created = self
            .api
            .create_job(owner_id, job_type, &input)
            .await
            .map_err(|e| JobClientError::SubmitFailed(describe(&e)))?;

        tracing::info!(
            job_id = %created.id,
            job_type = %job_type,
            status = %created.status,
            "Job created",
        );

        Ok(Job {
            id: created.id,
            job_type,
            status: created.status,
            input,
            result: None,
            error: None,
        })
    }

    async fn trigger(&self, job_id: &JobId) -> Result<TriggerAck, JobClientError> {
        self.api
            .trigger(job_id)
            .await
            .map(|()| TriggerAck)
            .map_err(|e| JobClientError::TriggerFailed {
                job_id: job_id.clone(),
                reason: if e.is_timeout() {
                    "trigger request timed out".to_string()
                } else {
                    describe(&e)
                },
            })
    }

    async fn fetch(&self, job_id: &JobId) -> Result<Job, JobClientError> {
        self.api.get_job(job_id).await.map_err(|e| {
            if e.status() == Some(404) {
                JobClientError::NotFound(job_id.clone())
            } else {
                JobClientError::FetchFailed {
                    job_id: job_id.clone(),
                    reason: describe(&e),
                }
            }
        })
    }
}
