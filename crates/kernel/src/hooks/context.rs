//! Per-operation hook context.

use std::time::{Duration, Instant};

use crate::auth::{Action, Authorizer, Principal};
use crate::content::EntityKind;

/// The operation a hook chain runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Find,
    Get,
    Create,
    Update,
    Delete,
    UpdateMany,
    DeleteMany,
    Aggregate,
}

/// Context shared by every hook of one retrieval or mutation.
///
/// Lives for a single call. Privilege decisions are made once, when the
/// context is built, and carried as capabilities.
#[derive(Debug, Clone)]
pub struct HookContext {
    started: Instant,
    principal: Option<Principal>,
    operation: OperationKind,
    bypass_visibility: bool,
}

impl HookContext {
    /// Context for a caller-initiated operation on `entity`.
    pub fn new(
        operation: OperationKind,
        entity: EntityKind,
        principal: Option<&Principal>,
        authorizer: &dyn Authorizer,
    ) -> Self {
        Self {
            started: Instant::now(),
            principal: principal.cloned(),
            operation,
            bypass_visibility: authorizer.is_authorized(principal, Action::ViewHidden, entity),
        }
    }

    /// Context for internal work (reconciliation, account lookups) that
    /// sees every document.
    pub fn system(operation: OperationKind) -> Self {
        Self {
            started: Instant::now(),
            principal: None,
            operation,
            bypass_visibility: true,
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    /// Whether hidden documents stay visible.
    pub fn bypass_visibility(&self) -> bool {
        self.bypass_visibility
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::{Role, RoleAuthorizer};
    use uuid::Uuid;

    #[test]
    fn bypass_follows_the_authorizer() {
        let guide = Principal::new(Uuid::now_v7(), Role::Guide);
        let admin = Principal::new(Uuid::now_v7(), Role::Admin);

        let ctx = HookContext::new(OperationKind::Find, EntityKind::Tour, Some(&guide), &RoleAuthorizer);
        assert!(!ctx.bypass_visibility());
        assert_eq!(ctx.principal(), Some(&guide));

        let ctx = HookContext::new(OperationKind::Find, EntityKind::Tour, Some(&admin), &RoleAuthorizer);
        assert!(ctx.bypass_visibility());

        let ctx = HookContext::new(OperationKind::Find, EntityKind::Tour, None, &RoleAuthorizer);
        assert!(!ctx.bypass_visibility());
    }

    #[test]
    fn system_context_sees_everything() {
        let ctx = HookContext::system(OperationKind::Aggregate);
        assert!(ctx.bypass_visibility());
        assert!(ctx.principal().is_none());
        assert_eq!(ctx.operation(), OperationKind::Aggregate);
    }
}
