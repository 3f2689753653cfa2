//! REST client for the job store endpoints.
//!
//! Wraps the three calls the orchestrator consumes (create, trigger,
//! read) using [`reqwest`]. Knows nothing about polling or sessions.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wardrobe_core::job::{Job, JobStatus, JobType};
use wardrobe_core::types::{JobId, OwnerId};

/// HTTP client for a job store deployment.
pub struct JobStoreApi {
    client: reqwest::Client,
    base_url: String,
    trigger_timeout: Duration,
}

/// Body of `POST /jobs`.
#[derive(Debug, Serialize)]
struct CreateJobRequest<'a> {
    owner_id: &'a OwnerId,
    #[serde(rename = "type")]
    job_type: JobType,
    input: &'a serde_json::Value,
}

/// Response of `POST /jobs`: the new job id and its initial status.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobResponse {
    pub id: JobId,
    pub status: JobStatus,
}

/// Errors from the job store REST layer.
#[derive(Debug, thiserror::Error)]
pub enum BackendApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The store returned a non-2xx status code.
    #[error("Job store error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body, usually a JSON error envelope.
        body: String,
    },
}

impl BackendApiError {
    /// HTTP status of an API error, if the request got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Request(e) if e.is_timeout())
    }
}

impl JobStoreApi {
    /// Create an API client for a job store.
    ///
    /// * `base_url`        - e.g. `https://api.example.com/v1`.
    /// * `trigger_timeout` - upper bound for the best-effort trigger call.
    pub fn new(client: reqwest::Client, base_url: String, trigger_timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            trigger_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /jobs` -- create one job record with status `queued`.
    pub async fn create_job(
        &self,
        owner_id: &OwnerId,
        job_type: JobType,
        input: &serde_json::Value,
    ) -> Result<CreateJobResponse, BackendApiError> {
        let body = CreateJobRequest {
            owner_id,
            job_type,
            input,
        };

        let response = self
            .client
            .post(format!("{}/jobs", self.base_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `POST /jobs/{id}/trigger` -- ask the worker pool to start processing.
    pub async fn trigger(&self, job_id: &JobId) -> Result<(), BackendApiError> {
        let response = self
            .client
            .post(format!("{}/jobs/{}/trigger", self.base_url, job_id))
            .timeout(self.trigger_timeout)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// `GET /jobs/{id}` -- read the current job envelope.
    pub async fn get_job(&self, job_id: &JobId) -> Result<Job, BackendApiError> {
        let response = self
            .client
            .get(format!("{}/jobs/{}", self.base_url, job_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, capturing the body
    /// text into [`BackendApiError::ApiError`] otherwise.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, BackendApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), BackendApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
