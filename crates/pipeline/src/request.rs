//! The five generation recipes and what each one runs.

use serde_json::{json, Value};
use wardrobe_core::job::JobType;
use wardrobe_core::phase::{Phase, ProgressPlan};
use wardrobe_core::types::{AssetId, EntityId, EntityKind, EntityRef, OwnerId};

/// A user setting a recipe cannot run without.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prerequisite {
    /// The active full-body reference photo outfits are rendered onto.
    ReferenceImage,
    /// The selfie a headshot is generated from.
    SourceSelfie,
    /// The active generated headshot a body shot is built around.
    ActiveHeadshot,
}

impl Prerequisite {
    /// What the user has to set up, as shown in "set up X before continuing".
    pub fn label(self) -> &'static str {
        match self {
            Self::ReferenceImage => "a reference photo",
            Self::SourceSelfie => "a selfie",
            Self::ActiveHeadshot => "a headshot",
        }
    }

    /// Key of the job input field carrying the resolved asset.
    fn input_key(self) -> &'static str {
        match self {
            Self::ReferenceImage => "reference_image_id",
            Self::SourceSelfie => "selfie_image_id",
            Self::ActiveHeadshot => "headshot_image_id",
        }
    }
}

/// One user-initiated generation.
///
/// Target ids are chosen by the caller. New drafts use
/// [`EntityId::generate`] so the session has a key before anything is
/// persisted; drafts are upserted by id.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationRequest {
    /// Render a (new or edited) outfit onto the user's reference photo.
    OutfitRender {
        owner_id: OwnerId,
        outfit_id: EntityId,
        name: Option<String>,
        item_ids: Vec<EntityId>,
    },
    /// Try a selection of items on, against an existing outfit.
    TryOn {
        owner_id: OwnerId,
        outfit_id: EntityId,
        item_ids: Vec<EntityId>,
    },
    Headshot {
        owner_id: OwnerId,
        profile_image_id: EntityId,
        /// Selfie to use instead of the one stored in settings.
        selfie: Option<AssetId>,
    },
    BodyShot {
        owner_id: OwnerId,
        profile_image_id: EntityId,
    },
    /// Generate a catalogue photo (and suggested fields) for an item.
    WardrobeItem {
        owner_id: OwnerId,
        item_id: EntityId,
        description: Option<String>,
        /// Photo taken by the user, uploaded before submission.
        photo: Option<Vec<u8>>,
    },
}

impl GenerationRequest {
    pub fn owner_id(&self) -> &OwnerId {
        match self {
            Self::OutfitRender { owner_id, .. }
            | Self::TryOn { owner_id, .. }
            | Self::Headshot { owner_id, .. }
            | Self::BodyShot { owner_id, .. }
            | Self::WardrobeItem { owner_id, .. } => owner_id,
        }
    }

    /// The entity the result is attached to; key of the session guard.
    pub fn target(&self) -> EntityRef {
        match self {
            Self::OutfitRender { outfit_id, .. } | Self::TryOn { outfit_id, .. } => {
                EntityRef::new(EntityKind::Outfit, outfit_id.clone())
            }
            Self::Headshot {
                profile_image_id, ..
            }
            | Self::BodyShot {
                profile_image_id, ..
            } => EntityRef::new(EntityKind::ProfileImage, profile_image_id.clone()),
            Self::WardrobeItem { item_id, .. } => {
                EntityRef::new(EntityKind::WardrobeItem, item_id.clone())
            }
        }
    }

    pub fn job_type(&self) -> JobType {
        match self {
            Self::OutfitRender { .. } => JobType::OutfitRender,
            Self::TryOn { .. } => JobType::TryOn,
            Self::Headshot { .. } => JobType::HeadshotGenerate,
            Self::BodyShot { .. } => JobType::BodyShotGenerate,
            Self::WardrobeItem { .. } => JobType::WardrobeItemGenerate,
        }
    }

    /// The phases this recipe runs, in order.
    pub fn phases(&self) -> Vec<Phase> {
        match self {
            Self::OutfitRender { .. } | Self::TryOn { .. } => Phase::ALL.to_vec(),
            Self::Headshot { .. } | Self::BodyShot { .. } => vec![
                Phase::PersistDraft,
                Phase::ResolvePrerequisites,
                Phase::Submit,
            ],
            Self::WardrobeItem { photo: Some(_), .. } => {
                vec![Phase::PersistDraft, Phase::Upload, Phase::Submit]
            }
            Self::WardrobeItem { photo: None, .. } => vec![Phase::PersistDraft, Phase::Submit],
        }
    }

    pub fn plan(&self) -> ProgressPlan {
        ProgressPlan::new(&self.phases())
    }

    pub fn prerequisite(&self) -> Option<Prerequisite> {
        match self {
            Self::OutfitRender { .. } | Self::TryOn { .. } => Some(Prerequisite::ReferenceImage),
            Self::Headshot { .. } => Some(Prerequisite::SourceSelfie),
            Self::BodyShot { .. } => Some(Prerequisite::ActiveHeadshot),
            Self::WardrobeItem { .. } => None,
        }
    }

    /// A prerequisite supplied with the request instead of from settings.
    pub fn supplied_prerequisite(&self) -> Option<&AssetId> {
        match self {
            Self::Headshot { selfie, .. } => selfie.as_ref(),
            _ => None,
        }
    }

    /// Selected wardrobe items, for the recipes that composite them.
    pub fn item_ids(&self) -> &[EntityId] {
        match self {
            Self::OutfitRender { item_ids, .. } | Self::TryOn { item_ids, .. } => item_ids,
            _ => &[],
        }
    }

    /// Bytes uploaded as-is when no composite is built.
    pub fn upload_payload(&self) -> Option<&[u8]> {
        match self {
            Self::WardrobeItem { photo, .. } => photo.as_deref(),
            _ => None,
        }
    }

    /// Fields written by the persist-draft phase.
    pub fn draft_fields(&self) -> Value {
        match self {
            Self::OutfitRender { name, item_ids, .. } => json!({
                "name": name,
                "item_ids": item_ids,
            }),
            Self::TryOn { item_ids, .. } => json!({ "try_on_item_ids": item_ids }),
            Self::Headshot { .. } => json!({ "kind": "headshot" }),
            Self::BodyShot { .. } => json!({ "kind": "body" }),
            Self::WardrobeItem { description, .. } => json!({ "description": description }),
        }
    }

    /// Job input built from the request and what the phases produced.
    ///
    /// `entity_id` is the id the entity was persisted under, which the
    /// store may have assigned.
    pub fn job_input(&self, entity_id: &EntityId, prepared: &PreparedInputs) -> Value {
        let mut input = Value::Object(serde_json::Map::from_iter([(
            format!("{}_id", entity_key(self.target().kind)),
            json!(entity_id),
        )]));
        let fields = match self {
            Self::OutfitRender { item_ids, .. } | Self::TryOn { item_ids, .. } => {
                json!({ "item_ids": item_ids })
            }
            Self::WardrobeItem { description, .. } => json!({ "description": description }),
            Self::Headshot { .. } | Self::BodyShot { .. } => json!({}),
        };
        merge(&mut input, fields);

        if let (Some(prerequisite), Some(asset)) = (self.prerequisite(), &prepared.prerequisite) {
            input[prerequisite.input_key()] = json!(asset);
        }
        if let Some(uploaded) = &prepared.uploaded {
            let key = match self {
                Self::WardrobeItem { .. } => "source_image_id",
                _ => "composite_image_id",
            };
            input[key] = json!(uploaded);
        }
        if let Some(model) = &prepared.model {
            input["model"] = json!(model);
        }
        input
    }
}

fn entity_key(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Outfit => "outfit",
        EntityKind::WardrobeItem => "item",
        EntityKind::ProfileImage => "profile_image",
    }
}

fn merge(into: &mut Value, from: Value) {
    if let (Value::Object(into), Value::Object(from)) = (into, from) {
        into.extend(from);
    }
}

/// What the phases before submission produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedInputs {
    pub prerequisite: Option<AssetId>,
    pub uploaded: Option<AssetId>,
    pub model: Option<String>,
}
