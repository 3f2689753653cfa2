//! Identifier newtypes shared across crates.
//!
//! Every identifier handed out by the backend is opaque: the client
//! never parses or orders them, it only compares and forwards them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier string.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

define_id! {
    /// Identifier of a remote job record, assigned by the job store.
    JobId
}

define_id! {
    /// Identifier of the user that owns a job or entity.
    OwnerId
}

define_id! {
    /// Identifier of a domain entity (outfit, wardrobe item, profile image).
    EntityId
}

define_id! {
    /// Identifier of a stored binary asset.
    AssetId
}

impl EntityId {
    /// Generate a fresh client-side id for a draft that does not exist yet.
    ///
    /// Drafts are upserted by id, so generating the id up front gives the
    /// session guard a stable key before the first remote call.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// The kind of domain entity a generation result is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Outfit,
    WardrobeItem,
    ProfileImage,
}

impl EntityKind {
    /// Stable lowercase name, used in REST paths and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Outfit => "outfit",
            Self::WardrobeItem => "wardrobe_item",
            Self::ProfileImage => "profile_image",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully qualified reference to a target entity.
///
/// This is the key of the one-session-per-entity guard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}
