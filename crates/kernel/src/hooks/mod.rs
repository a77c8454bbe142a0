//! Lifecycle hooks for persist and retrieve operations.
//!
//! - [`HookRegistry`]: ordered callback chains per entity kind and phase
//! - [`HookContext`]: per-operation timing, principal and capabilities
//! - [`standard_registry`]: the hooks every deployment installs

mod context;
mod registry;
mod standard;

pub use context::{HookContext, OperationKind};
pub use registry::{Hook, HookFn, HookPayload, HookRegistry, PersistPayload, Phase, Timing};
pub use standard::{
    ACTIVE_FLAG, HIDDEN_FLAG, active_only, derive_slug, duration_weeks, hash_credentials,
    record_timing, slugify, standard_registry, visibility_filter,
};
