//! Lifecycle hook registry.
//!
//! Hooks are plain callbacks keyed by entity kind, timing and phase. Each
//! chain runs in registration order; every hook takes the payload by value
//! and hands back a (possibly modified) payload. The registry is built once
//! at startup and shared read-only behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::content::EntityKind;
use crate::error::{AppError, AppResult};
use crate::query::ComposedQuery;
use crate::store::{Document, DocumentPatch, PipelineStage};

use super::HookContext;

/// Which kind of operation a hook attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Persist,
    Retrieve,
}

/// Before or after the store is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timing {
    Pre,
    Post,
}

/// A write on its way to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistPayload {
    /// Target document; `None` for inserts and bulk writes.
    pub id: Option<Uuid>,
    pub patch: DocumentPatch,
    pub is_new: bool,
}

/// Data handed through a hook chain.
#[derive(Debug, Clone, PartialEq)]
pub enum HookPayload {
    /// Pre-retrieve: the composed query.
    Query(ComposedQuery),
    /// Pre-retrieve: an aggregation pipeline.
    Pipeline(Vec<PipelineStage>),
    /// Pre-persist: the pending write.
    Persist(PersistPayload),
    /// Post-retrieve and post-persist: the documents read or written.
    Documents(Vec<Document>),
    /// Post-retrieve: aggregation output rows.
    Rows(Vec<Value>),
}

impl HookPayload {
    fn kind(&self) -> &'static str {
        match self {
            HookPayload::Query(_) => "query",
            HookPayload::Pipeline(_) => "pipeline",
            HookPayload::Persist(_) => "persist",
            HookPayload::Documents(_) => "documents",
            HookPayload::Rows(_) => "rows",
        }
    }

    fn mismatch(self, expected: &str) -> AppError {
        AppError::Internal(anyhow::anyhow!(
            "hook chain returned a {} payload where {expected} was expected",
            self.kind()
        ))
    }

    pub fn into_query(self) -> AppResult<ComposedQuery> {
        match self {
            HookPayload::Query(query) => Ok(query),
            other => Err(other.mismatch("query")),
        }
    }

    pub fn into_pipeline(self) -> AppResult<Vec<PipelineStage>> {
        match self {
            HookPayload::Pipeline(stages) => Ok(stages),
            other => Err(other.mismatch("pipeline")),
        }
    }

    pub fn into_persist(self) -> AppResult<PersistPayload> {
        match self {
            HookPayload::Persist(persist) => Ok(persist),
            other => Err(other.mismatch("persist")),
        }
    }

    pub fn into_documents(self) -> AppResult<Vec<Document>> {
        match self {
            HookPayload::Documents(docs) => Ok(docs),
            other => Err(other.mismatch("documents")),
        }
    }

    pub fn into_rows(self) -> AppResult<Vec<Value>> {
        match self {
            HookPayload::Rows(rows) => Ok(rows),
            other => Err(other.mismatch("rows")),
        }
    }
}

/// Hook callback. Returning an error aborts the rest of the chain.
pub type HookFn = dyn Fn(&HookContext, HookPayload) -> AppResult<HookPayload> + Send + Sync;

/// A named hook.
#[derive(Clone)]
pub struct Hook {
    pub name: &'static str,
    func: Arc<HookFn>,
}

impl Hook {
    pub fn new<F>(name: &'static str, func: F) -> Self
    where
        F: Fn(&HookContext, HookPayload) -> AppResult<HookPayload> + Send + Sync + 'static,
    {
        Self {
            name,
            func: Arc::new(func),
        }
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook").field("name", &self.name).finish()
    }
}

type ChainKey = (EntityKind, Timing, Phase);

/// Ordered hook chains per entity kind, timing and phase.
#[derive(Debug, Default)]
pub struct HookRegistry {
    chains: HashMap<ChainKey, Vec<Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pre(&mut self, entity: EntityKind, phase: Phase, hook: Hook) {
        self.register(entity, Timing::Pre, phase, hook);
    }

    pub fn register_post(&mut self, entity: EntityKind, phase: Phase, hook: Hook) {
        self.register(entity, Timing::Post, phase, hook);
    }

    fn register(&mut self, entity: EntityKind, timing: Timing, phase: Phase, hook: Hook) {
        self.chains
            .entry((entity, timing, phase))
            .or_default()
            .push(hook);
    }

    /// Hooks of one chain, in run order.
    pub fn hooks(&self, entity: EntityKind, timing: Timing, phase: Phase) -> &[Hook] {
        self.chains
            .get(&(entity, timing, phase))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn handler_count(&self, entity: EntityKind, timing: Timing, phase: Phase) -> usize {
        self.hooks(entity, timing, phase).len()
    }

    pub fn hook_names(&self, entity: EntityKind, timing: Timing, phase: Phase) -> Vec<&'static str> {
        self.hooks(entity, timing, phase)
            .iter()
            .map(|h| h.name)
            .collect()
    }

    /// Run a chain. The first failing hook aborts the chain and its error
    /// is returned.
    pub fn run(
        &self,
        entity: EntityKind,
        timing: Timing,
        phase: Phase,
        ctx: &HookContext,
        payload: HookPayload,
    ) -> AppResult<HookPayload> {
        self.hooks(entity, timing, phase)
            .iter()
            .try_fold(payload, |payload, hook| {
                (hook.func)(ctx, payload).inspect_err(|e| {
                    debug!(hook = hook.name, %entity, error = %e, "hook aborted chain");
                })
            })
    }

    /// Run a post chain whose failure must not undo the operation.
    ///
    /// On error the failure is logged and the original payload returned.
    pub fn run_best_effort(
        &self,
        entity: EntityKind,
        timing: Timing,
        phase: Phase,
        ctx: &HookContext,
        payload: HookPayload,
    ) -> HookPayload {
        if self.hooks(entity, timing, phase).is_empty() {
            return payload;
        }
        match self.run(entity, timing, phase, ctx, payload.clone()) {
            Ok(out) => out,
            Err(e) => {
                warn!(%entity, ?phase, error = %e, "post hook failed; keeping result");
                payload
            }
        }
    }
}
