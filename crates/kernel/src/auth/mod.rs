//! Authentication and authorization capabilities.
//!
//! The core never checks roles inline. Callers hold an [`Authorizer`] and
//! consult it before invoking an operation; the visibility hook reads the
//! outcome from the `HookContext` instead of asking again.

mod hasher;
mod token;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::EntityKind;

pub use hasher::{Argon2Hasher, CredentialHasher, ResetToken, digest_reset_token};
pub use token::{TokenClaims, TokenService};

/// Account roles, lowest privilege first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    User,
    Guide,
    LeadGuide,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::User, Role::Guide, Role::LeadGuide, Role::Admin];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Guide => "guide",
            Role::LeadGuide => "lead-guide",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == value)
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }
}

/// Operations subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    /// See documents hidden from ordinary reads.
    ViewHidden,
    Create,
    Update,
    Delete,
    /// Update or delete many documents by filter.
    Bulk,
    /// Run a full aggregate reconciliation.
    Reconcile,
}

/// Authorization capability.
pub trait Authorizer: Send + Sync {
    fn is_authorized(&self, principal: Option<&Principal>, action: Action, resource: EntityKind)
    -> bool;
}

/// Static role table.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoleAuthorizer;

impl RoleAuthorizer {
    fn allowed_roles(action: Action, resource: EntityKind) -> &'static [Role] {
        use Role::*;
        match (resource, action) {
            (EntityKind::User, Action::Read) => &[Admin],
            (_, Action::Read) => &Role::ALL,
            (EntityKind::Tour, Action::ViewHidden) => &[LeadGuide, Admin],
            (EntityKind::Tour, Action::Create | Action::Update | Action::Delete) => {
                &[LeadGuide, Admin]
            }
            (EntityKind::Review, Action::Create) => &[User],
            (EntityKind::Review, Action::Update | Action::Delete) => &[User, Admin],
            (EntityKind::Review, Action::Bulk) => &[Admin],
            (_, Action::Reconcile) => &[Admin],
            _ => &[],
        }
    }
}

impl Authorizer for RoleAuthorizer {
    fn is_authorized(
        &self,
        principal: Option<&Principal>,
        action: Action,
        resource: EntityKind,
    ) -> bool {
        principal.is_some_and(|p| Self::allowed_roles(action, resource).contains(&p.role))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn as_role(role: Role) -> Principal {
        Principal::new(Uuid::now_v7(), role)
    }

    #[test]
    fn anonymous_is_never_authorized() {
        let auth = RoleAuthorizer;
        assert!(!auth.is_authorized(None, Action::Read, EntityKind::Tour));
        assert!(!auth.is_authorized(None, Action::ViewHidden, EntityKind::Tour));
    }

    #[test]
    fn tour_writes_need_lead_guide_or_admin() {
        let auth = RoleAuthorizer;
        for (role, allowed) in [
            (Role::User, false),
            (Role::Guide, false),
            (Role::LeadGuide, true),
            (Role::Admin, true),
        ] {
            let p = as_role(role);
            assert_eq!(
                auth.is_authorized(Some(&p), Action::Create, EntityKind::Tour),
                allowed,
                "{role:?}"
            );
            assert_eq!(
                auth.is_authorized(Some(&p), Action::ViewHidden, EntityKind::Tour),
                allowed
            );
        }
    }

    #[test]
    fn only_users_write_reviews() {
        let auth = RoleAuthorizer;
        assert!(auth.is_authorized(Some(&as_role(Role::User)), Action::Create, EntityKind::Review));
        assert!(!auth.is_authorized(Some(&as_role(Role::Admin)), Action::Create, EntityKind::Review));
        assert!(auth.is_authorized(Some(&as_role(Role::Admin)), Action::Delete, EntityKind::Review));
    }

    #[test]
    fn user_listing_is_admin_only() {
        let auth = RoleAuthorizer;
        assert!(!auth.is_authorized(Some(&as_role(Role::LeadGuide)), Action::Read, EntityKind::User));
        assert!(auth.is_authorized(Some(&as_role(Role::Admin)), Action::Read, EntityKind::User));
    }

    #[test]
    fn roles_round_trip() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("root"), None);
        assert_eq!(serde_json::to_value(Role::LeadGuide).unwrap(), "lead-guide");
    }
}
