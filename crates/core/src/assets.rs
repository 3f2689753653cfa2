//! Stored asset references and primary-asset selection.

use serde::{Deserialize, Serialize};

use crate::types::{AssetId, EntityId};

/// The role an image plays for a wardrobe item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// The canonical product shot (background removed).
    Primary,
    /// Any other photo of the item.
    Photo,
    /// Close-ups of fabric, labels, details.
    Detail,
}

/// A stored image belonging to a wardrobe item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAsset {
    pub id: AssetId,
    pub item_id: EntityId,
    pub kind: AssetKind,
    #[serde(default)]
    pub sort_order: i32,
    /// Storage reference resolved to a fetchable URL before download.
    pub storage_path: String,
}

/// Pick the asset used to represent an item in a composite.
///
/// Canonical kind first, then explicit sort order, then id so the choice
/// is deterministic even when sort orders collide.
pub fn select_primary(assets: &[ItemAsset]) -> Option<&ItemAsset> {
    assets.iter().min_by(|a, b| {
        let a_key = (a.kind != AssetKind::Primary, a.sort_order);
        let b_key = (b.kind != AssetKind::Primary, b.sort_order);
        a_key.cmp(&b_key).then_with(|| a.id.cmp(&b.id))
    })
}
