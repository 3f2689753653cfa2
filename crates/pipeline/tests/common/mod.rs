use std::sync::Arc;

use wardrobe_core::assets::AssetKind;
use wardrobe_core::types::{AssetId, EntityId, OwnerId};
use wardrobe_jobs::memory::InMemoryJobStore;
use wardrobe_pipeline::memory::InMemoryStores;
use wardrobe_pipeline::pipeline::PreprocessingPipeline;
use wardrobe_pipeline::request::{GenerationRequest, Prerequisite};

pub const OWNER: &str = "owner-1";

pub fn owner() -> OwnerId {
    OwnerId::new(OWNER)
}

/// Stores with a reference photo and three items, each with a primary
/// image plus a decoy photo that must not be picked.
pub fn seeded_stores() -> Arc<InMemoryStores> {
    let stores = Arc::new(InMemoryStores::new());
    stores.set_prerequisite(&owner(), Prerequisite::ReferenceImage, AssetId::new("ref-photo"));
    stores.set_model(&owner(), "studio-v2");
    for (item, color) in [
        ("top", [220, 20, 20]),
        ("skirt", [20, 220, 20]),
        ("boots", [20, 20, 220]),
    ] {
        let id = EntityId::new(item);
        stores.add_item_image(&id, AssetKind::Photo, 0, 40, 40, [0, 0, 0]);
        stores.add_item_image(&id, AssetKind::Primary, 5, 80, 60, color);
    }
    stores
}

pub fn pipeline_over(
    stores: &Arc<InMemoryStores>,
    jobs: &Arc<InMemoryJobStore>,
) -> PreprocessingPipeline {
    PreprocessingPipeline::new(stores.collaborators(), jobs.clone())
}

pub fn outfit_render(outfit_id: &str, items: &[&str]) -> GenerationRequest {
    GenerationRequest::OutfitRender {
        owner_id: owner(),
        outfit_id: EntityId::new(outfit_id),
        name: Some("Weekend".into()),
        item_ids: items.iter().map(|i| EntityId::new(*i)).collect(),
    }
}
