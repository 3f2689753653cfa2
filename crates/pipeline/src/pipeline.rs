//! The preprocessing pipeline.
//!
//! Phases run strictly in order; each one's output feeds the next. Any
//! error aborts the run before submission, so a job is only created once
//! every earlier phase has succeeded, and never before the draft has been
//! persisted.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use wardrobe_core::assets::select_primary;
use wardrobe_core::cache::TtlCache;
use wardrobe_core::job::Job;
use wardrobe_core::phase::{Phase, ProgressPlan};
use wardrobe_core::types::{AssetId, EntityId, EntityRef};
use wardrobe_jobs::client::JobClient;

use crate::composite;
use crate::error::{PipelineError, StoreError};
use crate::request::{GenerationRequest, PreparedInputs};
use crate::stores::{AssetStore, DraftEntity, EntityStore, PersistedDraft, SettingsStore};

/// How long a resolved asset URL is reused.
pub const DEFAULT_URL_TTL: Duration = Duration::from_secs(300);

/// What happens to a draft this run created when a later phase fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DraftCleanup {
    /// Leave the draft in place for the user to recover.
    #[default]
    Retain,
    /// Soft-delete it. Drafts that existed before the run are never touched.
    Archive,
}

/// Progress notifications emitted while the pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseUpdate {
    Started { phase: Phase, percent: u8 },
    Finished { phase: Phase, percent: u8 },
}

/// A job created by a successful run. Trigger and polling are up to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// The entity as persisted. Its id is the store's, which may differ
    /// from the one in the request.
    pub target: EntityRef,
    pub job: Job,
    pub plan: ProgressPlan,
    /// Whether the job id was written to the entity for later resumption.
    pub pending_recorded: bool,
}

/// The stores the pipeline reads from and writes to.
#[derive(Clone)]
pub struct Collaborators {
    pub entities: Arc<dyn EntityStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub assets: Arc<dyn AssetStore>,
}

/// Runs a [`GenerationRequest`] through its phases and submits the job.
pub struct PreprocessingPipeline {
    stores: Collaborators,
    jobs: Arc<dyn JobClient>,
    url_cache: TtlCache<String, String>,
    cleanup: DraftCleanup,
}

impl PreprocessingPipeline {
    pub fn new(stores: Collaborators, jobs: Arc<dyn JobClient>) -> Self {
        Self {
            stores,
            jobs,
            url_cache: TtlCache::new(DEFAULT_URL_TTL),
            cleanup: DraftCleanup::default(),
        }
    }

    pub fn with_cleanup(mut self, cleanup: DraftCleanup) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_url_ttl(mut self, ttl: Duration) -> Self {
        self.url_cache = TtlCache::new(ttl);
        self
    }

    pub fn entities(&self) -> &Arc<dyn EntityStore> {
        &self.stores.entities
    }

    /// Forget every cached asset URL.
    pub fn invalidate_urls(&self) {
        self.url_cache.clear();
    }

    /// Run every phase of `request` and submit the job.
    ///
    /// Cancellation is honoured between phases. Once submission has
    /// started the run completes, so a created job always has its id
    /// recorded.
    pub async fn run<F>(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> Result<Submission, PipelineError>
    where
        F: FnMut(PhaseUpdate) + Send,
    {
        let plan = request.plan();
        let target = request.target();

        if plan.contains(Phase::AcquireAssets) && request.item_ids().is_empty() {
            return Err(PipelineError::NoItemsSelected);
        }

        let mut step = Stepper {
            plan: &plan,
            target: &target,
            cancel,
            on_update: &mut on_update,
        };

        step.begin(Phase::PersistDraft)?;
        let draft = self
            .stores
            .entities
            .persist_draft(&DraftEntity {
                target: target.clone(),
                owner_id: request.owner_id().clone(),
                fields: request.draft_fields(),
            })
            .await
            .map_err(PipelineError::PersistDraft)?;
        step.end(Phase::PersistDraft);

        // Everything after this point addresses the entity by the id the
        // store persisted it under.
        let persisted = EntityRef::new(target.kind, draft.id.clone());
        if persisted != target {
            tracing::debug!(
                requested = %target,
                persisted = %persisted,
                "Store assigned a different entity id",
            );
        }

        match self.after_persist(request, &persisted, &mut step).await {
            Ok(job) => {
                let pending_recorded = self.record_pending(&persisted, &job).await;
                Ok(Submission {
                    target: persisted,
                    job,
                    plan,
                    pending_recorded,
                })
            }
            Err(e) => {
                self.clean_up(&persisted, &draft, &e).await;
                Err(e)
            }
        }
    }

    async fn after_persist<F>(
        &self,
        request: &GenerationRequest,
        persisted: &EntityRef,
        step: &mut Stepper<'_, F>,
    ) -> Result<Job, PipelineError>
    where
        F: FnMut(PhaseUpdate) + Send,
    {
        let owner_id = request.owner_id();
        let mut prepared = PreparedInputs::default();

        if step.plan.contains(Phase::ResolvePrerequisites) {
            step.begin(Phase::ResolvePrerequisites)?;
            prepared.prerequisite = self.resolve_prerequisite(request).await?;
            step.end(Phase::ResolvePrerequisites);
        }

        let mut sources = Vec::new();
        if step.plan.contains(Phase::AcquireAssets) {
            step.begin(Phase::AcquireAssets)?;
            sources = self.acquire(request.item_ids()).await?;
            step.end(Phase::AcquireAssets);
        }

        let mut upload = request.upload_payload().map(<[u8]>::to_vec);
        if step.plan.contains(Phase::Composite) {
            step.begin(Phase::Composite)?;
            upload = Some(composite::stack_vertical_blocking(sources).await?);
            step.end(Phase::Composite);
        }

        if step.plan.contains(Phase::Upload) {
            step.begin(Phase::Upload)?;
            let bytes = upload.ok_or_else(|| {
                PipelineError::Upload(StoreError::Invalid("nothing to upload".into()))
            })?;
            prepared.uploaded = Some(self.upload(request, &persisted.id, bytes).await?);
            step.end(Phase::Upload);
        }

        step.begin(Phase::Submit)?;
        prepared.model = match self.stores.settings.model_preference(owner_id).await {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!(owner_id = %owner_id, error = %e, "Model preference unavailable, using default");
                None
            }
        };
        let job = self
            .jobs
            .submit(
                owner_id,
                request.job_type(),
                request.job_input(&persisted.id, &prepared),
            )
            .await
            .map_err(PipelineError::Submit)?;

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            target_entity_id = %persisted,
            "Job submitted",
        );
        Ok(job)
    }

    async fn resolve_prerequisite(
        &self,
        request: &GenerationRequest,
    ) -> Result<Option<AssetId>, PipelineError> {
        let Some(prerequisite) = request.prerequisite() else {
            return Ok(None);
        };
        if let Some(supplied) = request.supplied_prerequisite() {
            return Ok(Some(supplied.clone()));
        }
        self.stores
            .settings
            .prerequisite(request.owner_id(), prerequisite)
            .await
            .map_err(PipelineError::Prerequisites)?
            .map(Some)
            .ok_or(PipelineError::MissingPrerequisite(prerequisite))
    }

    /// Download the primary image of every item, preserving selection order.
    async fn acquire(&self, item_ids: &[EntityId]) -> Result<Vec<Vec<u8>>, PipelineError> {
        try_join_all(item_ids.iter().map(|item_id| self.acquire_one(item_id))).await
    }

    async fn acquire_one(&self, item_id: &EntityId) -> Result<Vec<u8>, PipelineError> {
        let download_error = |source| PipelineError::Download {
            item_id: item_id.clone(),
            source,
        };

        let assets = self
            .stores
            .assets
            .list_item_assets(item_id)
            .await
            .map_err(download_error)?;
        let primary =
            select_primary(&assets).ok_or_else(|| PipelineError::NoItemImage(item_id.clone()))?;

        let url = match self.url_cache.get(&primary.storage_path) {
            Some(url) => url,
            None => {
                let url = self
                    .stores
                    .assets
                    .resolve_url(&primary.storage_path)
                    .await
                    .map_err(download_error)?;
                self.url_cache
                    .insert(primary.storage_path.clone(), url.clone());
                url
            }
        };

        match self.stores.assets.download(&url).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                // A stale signed URL is the usual cause; do not reuse it.
                self.url_cache.invalidate(&primary.storage_path);
                Err(download_error(e))
            }
        }
    }

    async fn upload(
        &self,
        request: &GenerationRequest,
        entity_id: &EntityId,
        bytes: Vec<u8>,
    ) -> Result<AssetId, PipelineError> {
        let (file_name, content_type) = match request {
            GenerationRequest::WardrobeItem { .. } => (format!("{entity_id}-source.jpg"), "image/jpeg"),
            _ => (format!("{entity_id}-composite.png"), "image/png"),
        };
        self.stores
            .assets
            .upload(request.owner_id(), &file_name, content_type, bytes)
            .await
            .map_err(PipelineError::Upload)
    }

    async fn record_pending(&self, target: &EntityRef, job: &Job) -> bool {
        match self.stores.entities.record_pending_job(target, &job.id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    target_entity_id = %target,
                    error = %e,
                    "Failed to record pending job on entity",
                );
                false
            }
        }
    }

    async fn clean_up(&self, target: &EntityRef, draft: &PersistedDraft, error: &PipelineError) {
        if matches!(error, PipelineError::Cancelled) {
            return;
        }
        if self.cleanup != DraftCleanup::Archive || !draft.created {
            tracing::debug!(target_entity_id = %target, "Leaving draft in place after failure");
            return;
        }
        match self.stores.entities.archive_draft(target).await {
            Ok(()) => tracing::info!(target_entity_id = %target, "Archived draft after failure"),
            Err(e) => tracing::warn!(
                target_entity_id = %target,
                error = %e,
                "Failed to archive draft",
            ),
        }
    }
}

/// Emits phase updates and checks for cancellation between phases.
struct Stepper<'a, F> {
    plan: &'a ProgressPlan,
    target: &'a EntityRef,
    cancel: &'a CancellationToken,
    on_update: &'a mut F,
}

impl<F> Stepper<'_, F>
where
    F: FnMut(PhaseUpdate) + Send,
{
    fn begin(&mut self, phase: Phase) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            tracing::info!(target_entity_id = %self.target, phase = %phase, "Pipeline cancelled");
            return Err(PipelineError::Cancelled);
        }
        tracing::debug!(target_entity_id = %self.target, phase = %phase, "Phase started");
        (self.on_update)(PhaseUpdate::Started {
            phase,
            percent: self.plan.percent_at_start(phase),
        });
        Ok(())
    }

    fn end(&mut self, phase: Phase) {
        (self.on_update)(PhaseUpdate::Finished {
            phase,
            percent: self.plan.percent_at_end(phase),
        });
    }
}
