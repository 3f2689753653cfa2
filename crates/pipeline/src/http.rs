//! REST implementations of the pipeline collaborators.
//!
//! | Call                 | Endpoint                                          |
//! |----------------------|---------------------------------------------------|
//! | persist draft        | `PUT    /entities/{kind}/{id}`                    |
//! | archive draft        | `POST   /entities/{kind}/{id}/archive`            |
//! | record pending job   | `PUT    /entities/{kind}/{id}/pending-job`        |
//! | clear pending job    | `DELETE /entities/{kind}/{id}/pending-job/{job}`  |
//! | refresh / pending    | `GET    /entities/{kind}/{id}`                    |
//! | prerequisite         | `GET    /settings/{owner}/prerequisites/{key}`    |
//! | model preference     | `GET    /settings/{owner}`                        |
//! | item assets          | `GET    /items/{id}/assets`                       |
//! | resolve storage URL  | `POST   /storage/sign`                            |
//! | upload               | `POST   /storage/upload` (multipart)              |

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use wardrobe_core::assets::ItemAsset;
use wardrobe_core::types::{AssetId, EntityId, EntityRef, JobId, OwnerId};

use crate::error::StoreError;
use crate::request::Prerequisite;
use crate::stores::{AssetStore, DraftEntity, EntityStore, PersistedDraft, SettingsStore};

/// HTTP client for the entity, settings and storage endpoints.
#[derive(Clone)]
pub struct RestStores {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct AssetRef {
    id: AssetId,
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct UserSettings {
    #[serde(default)]
    model_preference: Option<String>,
}

fn prerequisite_key(prerequisite: Prerequisite) -> &'static str {
    match prerequisite {
        Prerequisite::ReferenceImage => "reference_image",
        Prerequisite::SourceSelfie => "selfie",
        Prerequisite::ActiveHeadshot => "active_headshot",
    }
}

impl RestStores {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn entity_url(&self, target: &EntityRef) -> String {
        format!("{}/entities/{}/{}", self.base_url, target.kind, target.id)
    }

    // ---- private helpers ----

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, StoreError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), StoreError> {
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn get_entity(&self, target: &EntityRef) -> Result<serde_json::Value, StoreError> {
        let response = self.client.get(self.entity_url(target)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                what: "entity",
                id: target.to_string(),
            });
        }
        Self::parse_response(response).await
    }
}

#[async_trait]
impl EntityStore for RestStores {
    async fn persist_draft(&self, draft: &DraftEntity) -> Result<PersistedDraft, StoreError> {
        let response = self
            .client
            .put(self.entity_url(&draft.target))
            .json(&json!({
                "owner_id": draft.owner_id,
                "status": "draft",
                "fields": draft.fields,
            }))
            .send()
            .await?;
        let created = response.status() == StatusCode::CREATED;
        let body: serde_json::Value = Self::parse_response(response).await?;
        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(EntityId::new)
            .ok_or_else(|| StoreError::Invalid("persisted draft has no id".into()))?;
        Ok(PersistedDraft { id, created })
    }

    async fn archive_draft(&self, target: &EntityRef) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!("{}/archive", self.entity_url(target)))
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn record_pending_job(
        &self,
        target: &EntityRef,
        job_id: &JobId,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .put(format!("{}/pending-job", self.entity_url(target)))
            .json(&json!({ "job_id": job_id }))
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn clear_pending_job(
        &self,
        target: &EntityRef,
        job_id: &JobId,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(format!("{}/pending-job/{}", self.entity_url(target), job_id))
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn pending_job(&self, target: &EntityRef) -> Result<Option<JobId>, StoreError> {
        let entity = self.get_entity(target).await?;
        Ok(entity
            .get("pending_job_id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(JobId::new))
    }

    async fn refresh(&self, target: &EntityRef) -> Result<serde_json::Value, StoreError> {
        self.get_entity(target).await
    }
}

#[async_trait]
impl SettingsStore for RestStores {
    async fn prerequisite(
        &self,
        owner_id: &OwnerId,
        prerequisite: Prerequisite,
    ) -> Result<Option<AssetId>, StoreError> {
        let response = self
            .client
            .get(format!(
                "{}/settings/{}/prerequisites/{}",
                self.base_url,
                owner_id,
                prerequisite_key(prerequisite)
            ))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let asset: Option<AssetRef> = Self::parse_response(response).await?;
        Ok(asset.map(|a| a.id))
    }

    async fn model_preference(&self, owner_id: &OwnerId) -> Result<Option<String>, StoreError> {
        let response = self
            .client
            .get(format!("{}/settings/{}", self.base_url, owner_id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let settings: UserSettings = Self::parse_response(response).await?;
        Ok(settings.model_preference)
    }
}

#[async_trait]
impl AssetStore for RestStores {
    async fn list_item_assets(&self, item_id: &EntityId) -> Result<Vec<ItemAsset>, StoreError> {
        let response = self
            .client
            .get(format!("{}/items/{}/assets", self.base_url, item_id))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn resolve_url(&self, storage_path: &str) -> Result<String, StoreError> {
        let response = self
            .client
            .post(format!("{}/storage/sign", self.base_url))
            .json(&json!({ "path": storage_path }))
            .send()
            .await?;
        let signed: SignedUrl = Self::parse_response(response).await?;
        Ok(signed.url)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let response = Self::ensure_success(self.client.get(url).send().await?).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(StoreError::Invalid(format!("empty body from {url}")));
        }
        Ok(bytes.to_vec())
    }

    async fn upload(
        &self,
        owner_id: &OwnerId,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<AssetId, StoreError> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)?;
        let form = Form::new()
            .text("owner_id", owner_id.to_string())
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/storage/upload", self.base_url))
            .multipart(form)
            .send()
            .await?;
        let asset: AssetRef = Self::parse_response(response).await?;
        Ok(asset.id)
    }
}
