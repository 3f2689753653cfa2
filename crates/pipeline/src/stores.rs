//! Collaborator seams consumed by the pipeline and the session controller.

use async_trait::async_trait;
use wardrobe_core::assets::ItemAsset;
use wardrobe_core::types::{AssetId, EntityId, EntityRef, JobId, OwnerId};

use crate::error::StoreError;
use crate::request::Prerequisite;

/// A draft to create or update in the persist-draft phase.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftEntity {
    pub target: EntityRef,
    pub owner_id: OwnerId,
    pub fields: serde_json::Value,
}

/// Result of persisting a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedDraft {
    pub id: EntityId,
    /// `true` if this call created the row, `false` if it updated one.
    pub created: bool,
}

/// Domain entities that generation results attach to.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Upsert the draft by id. The returned id is what later phases and the
    /// job input reference.
    async fn persist_draft(&self, draft: &DraftEntity) -> Result<PersistedDraft, StoreError>;

    /// Soft-delete a draft.
    async fn archive_draft(&self, target: &EntityRef) -> Result<(), StoreError>;

    /// Remember the job generating this entity so a later visit can resume.
    async fn record_pending_job(&self, target: &EntityRef, job_id: &JobId)
        -> Result<(), StoreError>;

    /// Forget the pending job, but only if it is still `job_id`.
    async fn clear_pending_job(&self, target: &EntityRef, job_id: &JobId)
        -> Result<(), StoreError>;

    async fn pending_job(&self, target: &EntityRef) -> Result<Option<JobId>, StoreError>;

    /// Re-read the entity so newly attached media is visible.
    async fn refresh(&self, target: &EntityRef) -> Result<serde_json::Value, StoreError>;
}

/// Per-user configuration.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// The asset configured for `prerequisite`, if the user has set one up.
    async fn prerequisite(
        &self,
        owner_id: &OwnerId,
        prerequisite: Prerequisite,
    ) -> Result<Option<AssetId>, StoreError>;

    /// Preferred generation model, if any.
    async fn model_preference(&self, owner_id: &OwnerId) -> Result<Option<String>, StoreError>;
}

/// Binary assets in storage.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn list_item_assets(&self, item_id: &EntityId) -> Result<Vec<ItemAsset>, StoreError>;

    /// Resolve a storage reference to a fetchable URL.
    async fn resolve_url(&self, storage_path: &str) -> Result<String, StoreError>;

    async fn download(&self, url: &str) -> Result<Vec<u8>, StoreError>;

    /// Store a blob and return its new asset id.
    async fn upload(
        &self,
        owner_id: &OwnerId,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<AssetId, StoreError>;
}
