//! Remote job model: types, statuses and typed result extraction.
//!
//! A [`Job`] is created by the client with status `queued` and from then
//! on is mutated exclusively by the remote worker. The client only ever
//! observes it, so the transition rules here are used to validate what
//! the store reports rather than to drive the store.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{AssetId, JobId};

// ---------------------------------------------------------------------------
// Job type
// ---------------------------------------------------------------------------

/// The closed set of generation job types. Determines input and result shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    OutfitRender,
    TryOn,
    HeadshotGenerate,
    BodyShotGenerate,
    WardrobeItemGenerate,
}

/// Polling attempt budget for headshot and body-shot jobs.
pub const PORTRAIT_MAX_ATTEMPTS: u32 = 30;

/// Polling attempt budget for outfit renders and wardrobe item photos.
pub const RENDER_MAX_ATTEMPTS: u32 = 60;

/// Polling attempt budget for try-on renders, the heaviest job type.
pub const TRY_ON_MAX_ATTEMPTS: u32 = 120;

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::OutfitRender,
        JobType::TryOn,
        JobType::HeadshotGenerate,
        JobType::BodyShotGenerate,
        JobType::WardrobeItemGenerate,
    ];

    /// Wire name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutfitRender => "outfit_render",
            Self::TryOn => "try_on",
            Self::HeadshotGenerate => "headshot_generate",
            Self::BodyShotGenerate => "body_shot_generate",
            Self::WardrobeItemGenerate => "wardrobe_item_generate",
        }
    }

    /// Default number of poll attempts before the final check.
    ///
    /// Heavier renders get a larger budget.
    pub fn max_poll_attempts(self) -> u32 {
        match self {
            Self::HeadshotGenerate | Self::BodyShotGenerate => PORTRAIT_MAX_ATTEMPTS,
            Self::OutfitRender | Self::WardrobeItemGenerate => RENDER_MAX_ATTEMPTS,
            Self::TryOn => TRY_ON_MAX_ATTEMPTS,
        }
    }

    /// Key in the result payload that carries the generated image id.
    fn result_image_key(self) -> &'static str {
        match self {
            Self::HeadshotGenerate => "headshot_image_id",
            Self::BodyShotGenerate => "body_image_id",
            Self::OutfitRender | Self::TryOn | Self::WardrobeItemGenerate => "image_id",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown job type '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Job status
// ---------------------------------------------------------------------------

/// Remote job status. `queued -> running -> {succeeded, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// `succeeded` and `failed` are final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Succeeded | Self::Failed => 2,
        }
    }

    /// Whether an observed move from `self` to `next` respects monotonicity.
    ///
    /// Re-observing the same status is allowed (polls are idempotent reads),
    /// and a worker may skip `running` entirely. Nothing leaves a terminal
    /// status.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Job record
// ---------------------------------------------------------------------------

/// The job envelope as returned by `GET job(job_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    #[serde(default)]
    pub input: serde_json::Value,
    /// Present only when `status = succeeded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Present only when `status = failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, rejecting any non-monotonic change.
    pub fn observe_status(&mut self, next: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status.to_string(),
                event: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Result extraction
// ---------------------------------------------------------------------------

/// Text fields the wardrobe item generator suggests alongside the photo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemSuggestions {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// The fields of a succeeded job's result that the client acts on.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub job_type: JobType,
    pub image_id: AssetId,
    pub suggestions: Option<ItemSuggestions>,
}

impl GenerationResult {
    /// Extract the typed result from a succeeded job.
    ///
    /// The type-specific image key is preferred; a generic `image_id`
    /// is accepted as a fallback for every type.
    pub fn from_job(job: &Job) -> Result<Self, CoreError> {
        if job.status != JobStatus::Succeeded {
            return Err(CoreError::Validation(format!(
                "Job {} has status {}, expected succeeded",
                job.id, job.status
            )));
        }
        let result = job.result.as_ref().ok_or_else(|| {
            CoreError::Validation(format!("Job {} succeeded without a result", job.id))
        })?;

        let image_id = [job.job_type.result_image_key(), "image_id"]
            .into_iter()
            .find_map(|key| result.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty()))
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Result of job {} has no '{}'",
                    job.id,
                    job.job_type.result_image_key()
                ))
            })?;

        let suggestions = match job.job_type {
            JobType::WardrobeItemGenerate => result
                .get("suggested")
                .cloned()
                .map(serde_json::from_value::<ItemSuggestions>)
                .transpose()
                .map_err(|e| {
                    CoreError::Validation(format!("Malformed suggestions in job {}: {e}", job.id))
                })?,
            _ => None,
        };

        Ok(Self {
            job_type: job.job_type,
            image_id: AssetId::new(image_id),
            suggestions,
        })
    }
}
