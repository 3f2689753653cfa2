//! Backend configuration loaded from environment variables.

use std::time::Duration;

use wardrobe_core::job::JobType;

use crate::api::JobStoreApi;
use crate::client::HttpJobClient;
use crate::polling::{Backoff, PollPolicy};

/// Growth factor applied between polls when `POLL_BACKOFF=exponential`.
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable is set but cannot be parsed.
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    /// The HTTP client could not be built from the configuration.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Connection and polling settings for the job store.
///
/// All fields have defaults suitable for a local backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// Base URL of the REST API (default: `http://localhost:54321`).
    pub base_url: String,
    /// Per-request HTTP timeout (default: 30 s).
    pub request_timeout: Duration,
    /// Timeout for the best-effort trigger call (default: 10 s).
    pub trigger_timeout: Duration,
    /// Base polling interval (default: 2000 ms).
    pub poll_interval: Duration,
    pub backoff: Backoff,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".into(),
            request_timeout: Duration::from_secs(30),
            trigger_timeout: Duration::from_secs(10),
            poll_interval: crate::polling::DEFAULT_POLL_INTERVAL,
            backoff: Backoff::Fixed,
        }
    }
}

impl BackendConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                  |
    /// |------------------------|--------------------------|
    /// | `BACKEND_URL`          | `http://localhost:54321` |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                     |
    /// | `TRIGGER_TIMEOUT_SECS` | `10`                     |
    /// | `POLL_INTERVAL_MS`     | `2000`                   |
    /// | `POLL_BACKOFF`         | `fixed`                  |
    /// | `POLL_MAX_INTERVAL_MS` | `8000`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let base_url = lookup("BACKEND_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.base_url);

        let request_timeout = Duration::from_secs(parse_u64(&lookup, "REQUEST_TIMEOUT_SECS", 30)?);
        let trigger_timeout = Duration::from_secs(parse_u64(&lookup, "TRIGGER_TIMEOUT_SECS", 10)?);
        let poll_interval = Duration::from_millis(parse_u64(&lookup, "POLL_INTERVAL_MS", 2000)?);
        if poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "POLL_INTERVAL_MS",
                value: "0".into(),
            });
        }
        let max_interval = Duration::from_millis(parse_u64(&lookup, "POLL_MAX_INTERVAL_MS", 8000)?);

        let backoff = match lookup("POLL_BACKOFF").as_deref().map(str::trim) {
            None | Some("") | Some("fixed") => Backoff::Fixed,
            Some("exponential") => Backoff::Exponential {
                multiplier: BACKOFF_MULTIPLIER,
                max_interval: max_interval.max(poll_interval),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "POLL_BACKOFF",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            base_url,
            request_timeout,
            trigger_timeout,
            poll_interval,
            backoff,
        })
    }

    /// Polling policy for one job type.
    pub fn poll_policy(&self, job_type: JobType) -> PollPolicy {
        PollPolicy::for_job_type(job_type, self.poll_interval, self.backoff)
    }

    /// Build the shared HTTP client with the configured timeout.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        Ok(reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()?)
    }

    /// Build a [`HttpJobClient`] for the configured backend.
    pub fn job_client(&self, http: reqwest::Client) -> HttpJobClient {
        HttpJobClient::new(JobStoreApi::new(
            http,
            self.base_url.clone(),
            self.trigger_timeout,
        ))
    }
}

fn parse_u64<F>(lookup: &F, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}
