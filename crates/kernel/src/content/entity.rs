//! Entity kinds served by the API.

use serde::Serialize;

use crate::store::CollectionHandle;

pub const TOURS: CollectionHandle = CollectionHandle {
    name: "tours",
    protected_fields: &[],
};

pub const REVIEWS: CollectionHandle = CollectionHandle {
    name: "reviews",
    protected_fields: &[],
};

/// Credential material never leaves the store.
pub const USERS: CollectionHandle = CollectionHandle {
    name: "users",
    protected_fields: &[
        "password",
        "passwordConfirm",
        "passwordResetToken",
        "passwordResetExpires",
    ],
};

/// The entity types of the system.
///
/// Tours are parents owning a rating summary; reviews are their children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Tour,
    Review,
    User,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Tour, EntityKind::Review, EntityKind::User];

    pub fn collection(self) -> &'static CollectionHandle {
        match self {
            EntityKind::Tour => &TOURS,
            EntityKind::Review => &REVIEWS,
            EntityKind::User => &USERS,
        }
    }

    /// Singular name used in messages.
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Tour => "tour",
            EntityKind::Review => "review",
            EntityKind::User => "user",
        }
    }

    /// Response envelope key for a list of this kind.
    pub fn plural(self) -> &'static str {
        self.collection().name
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
