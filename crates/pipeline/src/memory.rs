//! In-process entity, settings and asset stores.
//!
//! Item images are real PNGs so the composite phase runs unchanged.
//! Failures can be injected per operation and every call is recorded.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::json;
use wardrobe_core::assets::{AssetKind, ItemAsset};
use wardrobe_core::types::{AssetId, EntityId, EntityRef, JobId, OwnerId};

use crate::error::StoreError;
use crate::pipeline::Collaborators;
use crate::request::Prerequisite;
use crate::stores::{AssetStore, DraftEntity, EntityStore, PersistedDraft, SettingsStore};

/// Encode a single-colour PNG.
pub fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(rgb));
    let mut out = Cursor::new(Vec::new());
    // Encoding an in-memory RGB buffer as PNG only fails on allocation.
    if DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .is_err()
    {
        return Vec::new();
    }
    out.into_inner()
}

/// A call received by [`InMemoryStores`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    PersistDraft(EntityRef),
    ArchiveDraft(EntityRef),
    RecordPending(EntityRef, JobId),
    ClearPending(EntityRef, JobId),
    Refresh(EntityRef),
    Prerequisite(Prerequisite),
    ListAssets(EntityId),
    ResolveUrl(String),
    Download(String),
    Upload(String),
}

#[derive(Debug, Clone)]
struct EntityRecord {
    owner_id: OwnerId,
    fields: serde_json::Value,
    pending_job: Option<JobId>,
    archived: bool,
}

#[derive(Default)]
struct Failures {
    persist: Option<String>,
    settings: Option<String>,
    downloads: Option<String>,
    uploads: Option<String>,
    record_pending: Option<String>,
    /// Failures left before `record_pending` stops firing; `None` is unlimited.
    record_pending_left: Option<u32>,
}

#[derive(Default)]
struct State {
    entities: HashMap<EntityRef, EntityRecord>,
    prerequisites: HashMap<(OwnerId, Prerequisite), AssetId>,
    models: HashMap<OwnerId, String>,
    item_assets: HashMap<EntityId, Vec<ItemAsset>>,
    blobs: HashMap<String, Vec<u8>>,
    uploads: HashMap<AssetId, Vec<u8>>,
    failures: Failures,
    assigned_ids: HashMap<EntityRef, EntityId>,
    calls: Vec<StoreCall>,
    next_asset: u64,
}

/// Implements [`EntityStore`], [`SettingsStore`] and [`AssetStore`] in memory.
#[derive(Default)]
pub struct InMemoryStores {
    state: Mutex<State>,
}

fn injected(body: &str) -> StoreError {
    StoreError::Api {
        status: 503,
        body: body.to_string(),
    }
}

impl InMemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All three collaborator handles backed by this store.
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            entities: self.clone(),
            settings: self.clone(),
            assets: self.clone(),
        }
    }

    // ---- setup ----

    pub fn set_prerequisite(&self, owner_id: &OwnerId, prerequisite: Prerequisite, asset: AssetId) {
        self.lock()
            .prerequisites
            .insert((owner_id.clone(), prerequisite), asset);
    }

    pub fn set_model(&self, owner_id: &OwnerId, model: impl Into<String>) {
        self.lock().models.insert(owner_id.clone(), model.into());
    }

    /// Store a solid-colour image for an item. Returns its asset id.
    pub fn add_item_image(
        &self,
        item_id: &EntityId,
        kind: AssetKind,
        sort_order: i32,
        width: u32,
        height: u32,
        rgb: [u8; 3],
    ) -> AssetId {
        self.add_asset(item_id, kind, sort_order, solid_png(width, height, rgb))
    }

    /// Store arbitrary bytes as an item's primary image.
    pub fn add_raw_item_image(&self, item_id: &EntityId, bytes: Vec<u8>) -> AssetId {
        self.add_asset(item_id, AssetKind::Primary, 0, bytes)
    }

    fn add_asset(&self, item_id: &EntityId, kind: AssetKind, sort_order: i32, bytes: Vec<u8>) -> AssetId {
        let mut state = self.lock();
        let n = state.item_assets.get(item_id).map_or(0, Vec::len);
        let id = AssetId::new(format!("{item_id}-{n}"));
        let storage_path = format!("items/{item_id}/{n}.png");
        state.blobs.insert(storage_path.clone(), bytes);
        state
            .item_assets
            .entry(item_id.clone())
            .or_default()
            .push(ItemAsset {
                id: id.clone(),
                item_id: item_id.clone(),
                kind,
                sort_order,
                storage_path,
            });
        id
    }

    /// Seed an entity as if it had been created earlier.
    pub fn insert_entity(&self, target: &EntityRef, owner_id: &OwnerId, pending_job: Option<JobId>) {
        self.lock().entities.insert(
            target.clone(),
            EntityRecord {
                owner_id: owner_id.clone(),
                fields: json!({}),
                pending_job,
                archived: false,
            },
        );
    }

    pub fn fail_persist(&self, message: impl Into<String>) {
        self.lock().failures.persist = Some(message.into());
    }

    pub fn fail_settings(&self, message: impl Into<String>) {
        self.lock().failures.settings = Some(message.into());
    }

    pub fn fail_downloads(&self, message: impl Into<String>) {
        self.lock().failures.downloads = Some(message.into());
    }

    pub fn fail_uploads(&self, message: impl Into<String>) {
        self.lock().failures.uploads = Some(message.into());
    }

    pub fn fail_record_pending(&self, message: impl Into<String>) {
        let mut state = self.lock();
        state.failures.record_pending = Some(message.into());
        state.failures.record_pending_left = None;
    }

    /// Fail only the next `n` pending-job writes.
    pub fn fail_next_record_pending(&self, n: u32, message: impl Into<String>) {
        let mut state = self.lock();
        state.failures.record_pending = Some(message.into());
        state.failures.record_pending_left = Some(n);
    }

    /// Persist drafts for `requested` under `assigned`, as a backend that
    /// generates its own ids would.
    pub fn assign_id(&self, requested: &EntityRef, assigned: impl Into<EntityId>) {
        self.lock()
            .assigned_ids
            .insert(requested.clone(), assigned.into());
    }

    /// Un-archive an entity.
    pub fn restore(&self, target: &EntityRef) {
        if let Some(record) = self.lock().entities.get_mut(target) {
            record.archived = false;
        }
    }

    // ---- inspection ----

    /// Draft fields of an entity, if it exists.
    pub fn entity(&self, target: &EntityRef) -> Option<serde_json::Value> {
        self.lock().entities.get(target).map(|r| r.fields.clone())
    }

    pub fn is_archived(&self, target: &EntityRef) -> bool {
        self.lock()
            .entities
            .get(target)
            .is_some_and(|r| r.archived)
    }

    /// Pending job id without recording a call.
    pub fn pending(&self, target: &EntityRef) -> Option<JobId> {
        self.lock()
            .entities
            .get(target)
            .and_then(|r| r.pending_job.clone())
    }

    /// Bytes of an uploaded asset.
    pub fn uploaded(&self, asset_id: &AssetId) -> Option<Vec<u8>> {
        self.lock().uploads.get(asset_id).cloned()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn persist_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::PersistDraft(_)))
    }

    pub fn resolve_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::ResolveUrl(_)))
    }

    pub fn refresh_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Refresh(_)))
    }

    fn count(&self, pred: impl Fn(&StoreCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl EntityStore for InMemoryStores {
    async fn persist_draft(&self, draft: &DraftEntity) -> Result<PersistedDraft, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::PersistDraft(draft.target.clone()));
        if let Some(message) = &state.failures.persist {
            return Err(injected(message));
        }

        let key = match state.assigned_ids.get(&draft.target) {
            Some(id) => EntityRef::new(draft.target.kind, id.clone()),
            None => draft.target.clone(),
        };
        let created = match state.entities.get_mut(&key) {
            Some(record) => {
                if let (Some(fields), serde_json::Value::Object(new)) =
                    (record.fields.as_object_mut(), draft.fields.clone())
                {
                    fields.extend(new);
                }
                false
            }
            None => {
                state.entities.insert(
                    key.clone(),
                    EntityRecord {
                        owner_id: draft.owner_id.clone(),
                        fields: draft.fields.clone(),
                        pending_job: None,
                        archived: false,
                    },
                );
                true
            }
        };
        Ok(PersistedDraft { id: key.id, created })
    }

    async fn archive_draft(&self, target: &EntityRef) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::ArchiveDraft(target.clone()));
        let record = state.entities.get_mut(target).ok_or_else(|| StoreError::NotFound {
            what: "entity",
            id: target.to_string(),
        })?;
        record.archived = true;
        Ok(())
    }

    async fn record_pending_job(
        &self,
        target: &EntityRef,
        job_id: &JobId,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state
            .calls
            .push(StoreCall::RecordPending(target.clone(), job_id.clone()));
        if let Some(message) = state.failures.record_pending.clone() {
            match &mut state.failures.record_pending_left {
                Some(0) => {}
                Some(left) => {
                    *left -= 1;
                    return Err(injected(&message));
                }
                None => return Err(injected(&message)),
            }
        }
        let record = state.entities.get_mut(target).ok_or_else(|| StoreError::NotFound {
            what: "entity",
            id: target.to_string(),
        })?;
        record.pending_job = Some(job_id.clone());
        Ok(())
    }

    async fn clear_pending_job(
        &self,
        target: &EntityRef,
        job_id: &JobId,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state
            .calls
            .push(StoreCall::ClearPending(target.clone(), job_id.clone()));
        if let Some(record) = state.entities.get_mut(target) {
            if record.pending_job.as_ref() == Some(job_id) {
                record.pending_job = None;
            }
        }
        Ok(())
    }

    async fn pending_job(&self, target: &EntityRef) -> Result<Option<JobId>, StoreError> {
        Ok(self.pending(target))
    }

    async fn refresh(&self, target: &EntityRef) -> Result<serde_json::Value, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Refresh(target.clone()));
        let record = state.entities.get(target).ok_or_else(|| StoreError::NotFound {
            what: "entity",
            id: target.to_string(),
        })?;
        Ok(json!({
            "id": target.id,
            "kind": target.kind,
            "owner_id": record.owner_id,
            "fields": record.fields,
            "pending_job_id": record.pending_job,
            "archived": record.archived,
        }))
    }
}

#[async_trait]
impl SettingsStore for InMemoryStores {
    async fn prerequisite(
        &self,
        owner_id: &OwnerId,
        prerequisite: Prerequisite,
    ) -> Result<Option<AssetId>, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Prerequisite(prerequisite));
        if let Some(message) = &state.failures.settings {
            return Err(injected(message));
        }
        Ok(state
            .prerequisites
            .get(&(owner_id.clone(), prerequisite))
            .cloned())
    }

    async fn model_preference(&self, owner_id: &OwnerId) -> Result<Option<String>, StoreError> {
        Ok(self.lock().models.get(owner_id).cloned())
    }
}

#[async_trait]
impl AssetStore for InMemoryStores {
    async fn list_item_assets(&self, item_id: &EntityId) -> Result<Vec<ItemAsset>, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::ListAssets(item_id.clone()));
        Ok(state.item_assets.get(item_id).cloned().unwrap_or_default())
    }

    async fn resolve_url(&self, storage_path: &str) -> Result<String, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::ResolveUrl(storage_path.to_string()));
        if !state.blobs.contains_key(storage_path) {
            return Err(StoreError::NotFound {
                what: "object",
                id: storage_path.to_string(),
            });
        }
        Ok(format!("memory://{storage_path}"))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Download(url.to_string()));
        if let Some(message) = &state.failures.downloads {
            return Err(injected(message));
        }
        let path = url.strip_prefix("memory://").unwrap_or(url);
        state.blobs.get(path).cloned().ok_or_else(|| StoreError::NotFound {
            what: "object",
            id: url.to_string(),
        })
    }

    async fn upload(
        &self,
        _owner_id: &OwnerId,
        file_name: &str,
        _content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<AssetId, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Upload(file_name.to_string()));
        if let Some(message) = &state.failures.uploads {
            return Err(injected(message));
        }
        state.next_asset += 1;
        let id = AssetId::new(format!("asset-{}", state.next_asset));
        state.uploads.insert(id.clone(), bytes);
        Ok(id)
    }
}
