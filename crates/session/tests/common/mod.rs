use std::sync::Arc;
use std::time::Duration;

use wardrobe_core::assets::AssetKind;
use wardrobe_core::types::{AssetId, EntityId, EntityKind, EntityRef, OwnerId};
use wardrobe_jobs::client::JobClient;
use wardrobe_jobs::memory::InMemoryJobStore;
use wardrobe_jobs::polling::Backoff;
use wardrobe_pipeline::memory::InMemoryStores;
use wardrobe_pipeline::pipeline::PreprocessingPipeline;
use wardrobe_pipeline::request::{GenerationRequest, Prerequisite};
use wardrobe_session::controller::GenerationController;

pub const OWNER: &str = "owner-1";

pub const INTERVAL: Duration = Duration::from_millis(2000);

pub fn owner() -> OwnerId {
    OwnerId::new(OWNER)
}

/// Stores with a reference photo and three items with primary images.
pub fn seeded_stores() -> Arc<InMemoryStores> {
    let stores = Arc::new(InMemoryStores::new());
    stores.set_prerequisite(&owner(), Prerequisite::ReferenceImage, AssetId::new("ref-photo"));
    for (item, color) in [
        ("top", [220, 20, 20]),
        ("skirt", [20, 220, 20]),
        ("boots", [20, 20, 220]),
    ] {
        stores.add_item_image(&EntityId::new(item), AssetKind::Primary, 0, 64, 48, color);
    }
    stores
}

pub fn controller_over(
    stores: &Arc<InMemoryStores>,
    jobs: Arc<dyn JobClient>,
) -> GenerationController {
    let pipeline = PreprocessingPipeline::new(stores.collaborators(), jobs.clone());
    GenerationController::new(Arc::new(pipeline), jobs).with_polling(INTERVAL, Backoff::Fixed)
}

pub fn memory_controller(
    stores: &Arc<InMemoryStores>,
    jobs: &Arc<InMemoryJobStore>,
) -> GenerationController {
    controller_over(stores, jobs.clone())
}

pub fn outfit_render(outfit_id: &str, items: &[&str]) -> GenerationRequest {
    GenerationRequest::OutfitRender {
        owner_id: owner(),
        outfit_id: EntityId::new(outfit_id),
        name: Some("Weekend".into()),
        item_ids: items.iter().map(|i| EntityId::new(*i)).collect(),
    }
}

pub fn outfit(outfit_id: &str) -> EntityRef {
    EntityRef::new(EntityKind::Outfit, outfit_id)
}
