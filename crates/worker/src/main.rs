//! `wardrobe-watch` -- watch generation jobs from the command line.
//!
//! Polls each job id given on the command line until it settles or its
//! attempt budget runs out, then logs the outcome. Ctrl-C stops watching;
//! the jobs keep running remotely.
//!
//! ```text
//! wardrobe-watch <job-id>[:<job-type>] ...
//! ```
//!
//! Without a job type the job is read once to learn it.
//!
//! # Environment variables
//!
//! See [`BackendConfig::from_env`]; `RUST_LOG` controls log filtering.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wardrobe_core::job::{GenerationResult, JobType};
use wardrobe_core::types::JobId;
use wardrobe_jobs::client::JobClient;
use wardrobe_jobs::config::BackendConfig;
use wardrobe_jobs::polling::{PollOutcome, PollingEngine};

/// Budget used when a job cannot be read up front.
const FALLBACK_JOB_TYPE: JobType = JobType::TryOn;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wardrobe_worker=info,wardrobe_jobs=info,wardrobe_session=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let targets = std::env::args()
        .skip(1)
        .map(|arg| parse_target(&arg))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if targets.is_empty() {
        anyhow::bail!("usage: wardrobe-watch <job-id>[:<job-type>] ...");
    }

    let config = BackendConfig::from_env().context("Failed to load backend configuration")?;
    let client: Arc<dyn JobClient> = Arc::new(config.job_client(config.http_client()?));
    let engine = PollingEngine::new(client.clone());

    tracing::info!(
        base_url = %config.base_url,
        jobs = targets.len(),
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Starting wardrobe-watch",
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, no longer watching");
                cancel.cancel();
            }
        }
    });

    let watches = targets.into_iter().map(|(job_id, job_type)| {
        let client = client.clone();
        let engine = engine.clone();
        let config = &config;
        let cancel = &cancel;
        async move {
            let job_type = match job_type {
                Some(t) => t,
                None => learn_job_type(client.as_ref(), &job_id).await,
            };
            let policy = config.poll_policy(job_type);
            let outcome = engine
                .watch(&job_id, &policy, cancel, |attempt| {
                    tracing::debug!(job_id = %job_id, attempt, "Polling");
                })
                .await;
            report(&job_id, outcome)
        }
    });
    let settled = futures::future::join_all(watches).await;

    let succeeded = settled.iter().filter(|ok| **ok).count();
    tracing::info!(succeeded, total = settled.len(), "Done");
    Ok(())
}

fn parse_target(arg: &str) -> anyhow::Result<(JobId, Option<JobType>)> {
    match arg.split_once(':') {
        Some((id, job_type)) => {
            let job_type = job_type
                .parse::<JobType>()
                .map_err(|e| anyhow::anyhow!("{arg}: {e}"))?;
            Ok((JobId::new(id), Some(job_type)))
        }
        None => Ok((JobId::new(arg), None)),
    }
}

async fn learn_job_type(client: &dyn JobClient, job_id: &JobId) -> JobType {
    match client.fetch(job_id).await {
        Ok(job) => job.job_type,
        Err(e) => {
            tracing::warn!(
                job_id = %job_id,
                error = %e,
                fallback = %FALLBACK_JOB_TYPE,
                "Could not read job type",
            );
            FALLBACK_JOB_TYPE
        }
    }
}

/// Log the outcome. Returns `true` on success.
fn report(job_id: &JobId, outcome: PollOutcome) -> bool {
    match outcome {
        PollOutcome::Succeeded(job) => match GenerationResult::from_job(&job) {
            Ok(result) => {
                tracing::info!(job_id = %job_id, image_id = %result.image_id, "Job succeeded");
                true
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Job succeeded without a usable result");
                false
            }
        },
        PollOutcome::Failed(job) => {
            let error = job.error.unwrap_or_default();
            tracing::error!(
                job_id = %job_id,
                kind = ?wardrobe_core::classify::classify_error(&error),
                error = %error,
                "Job failed",
            );
            false
        }
        PollOutcome::TimedOut { last_status, .. } => {
            tracing::warn!(
                job_id = %job_id,
                last_status = last_status.map(|s| s.as_str()).unwrap_or("unknown"),
                "Still processing after the attempt budget",
            );
            false
        }
        PollOutcome::Cancelled => false,
    }
}
