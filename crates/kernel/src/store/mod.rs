//! Document store abstraction.
//!
//! The core talks to persistence through [`DocumentStore`]. Two engines ship:
//! [`MemoryStore`] for development and tests, and [`PgStore`], which keeps
//! every collection in a single JSONB table.

mod document;
mod memory;
pub mod pipeline;
mod postgres;
mod sql;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::query::{ComposedQuery, FilterClause};

pub use document::Document;
pub use memory::MemoryStore;
pub use pipeline::{Accumulator, GroupKey, GroupStage, PipelineStage};
pub use postgres::PgStore;

/// Errors raised by a store engine.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key in {collection} on ({})", fields.join(", "))]
    UniqueViolation {
        collection: String,
        fields: Vec<String>,
    },

    #[error("statement timed out")]
    Timeout,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the same operation could succeed if simply retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout | StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Static description of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionHandle {
    pub name: &'static str,
    /// Fields never returned from a retrieval.
    pub protected_fields: &'static [&'static str],
}

/// A partial update: fields to set and fields to remove.
///
/// Keys may be dotted paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentPatch {
    pub set: Map<String, Value>,
    pub unset: Vec<String>,
}

impl DocumentPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `set`.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    /// Builder-style `unset`.
    pub fn without(mut self, field: impl Into<String>) -> Self {
        self.unset.push(field.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// Whether the patch touches `field`.
    pub fn touches(&self, field: &str) -> bool {
        self.set.contains_key(field) || self.unset.iter().any(|f| f == field)
    }
}

impl From<Map<String, Value>> for DocumentPatch {
    fn from(set: Map<String, Value>) -> Self {
        Self {
            set,
            unset: Vec::new(),
        }
    }
}

/// Persistence engine for JSON documents grouped into collections.
///
/// Every method is a single engine operation. Implementations keep the
/// `__v` revision counter: 0 on insert, incremented on each update.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Run a composed query: filter, sort, project, paginate.
    async fn find(&self, query: &ComposedQuery) -> StoreResult<Vec<Document>>;

    /// Fetch one document unprojected.
    async fn get(&self, collection: &str, id: Uuid) -> StoreResult<Option<Document>>;

    /// Insert a new document. The id must be unused.
    async fn insert(&self, collection: &str, document: Document) -> StoreResult<Document>;

    /// Apply a patch, returning the updated document if it existed.
    async fn update(
        &self,
        collection: &str,
        id: Uuid,
        patch: &DocumentPatch,
    ) -> StoreResult<Option<Document>>;

    /// Delete a document, returning it if it existed.
    async fn delete(&self, collection: &str, id: Uuid) -> StoreResult<Option<Document>>;

    /// Apply a patch to every document matching all filters.
    async fn update_many(
        &self,
        collection: &str,
        filters: &[FilterClause],
        patch: &DocumentPatch,
    ) -> StoreResult<u64>;

    /// Delete every document matching all filters.
    async fn delete_many(&self, collection: &str, filters: &[FilterClause]) -> StoreResult<u64>;

    /// Run an aggregation pipeline; rows are plain JSON objects.
    async fn aggregate(&self, collection: &str, stages: &[PipelineStage])
    -> StoreResult<Vec<Value>>;

    /// Declare a unique key over one or more fields.
    ///
    /// Documents missing any of the fields are not constrained.
    async fn ensure_unique_index(&self, collection: &str, fields: &[&str]) -> StoreResult<()>;

    /// Cheap liveness probe.
    async fn is_healthy(&self) -> bool;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(StoreError::Timeout.is_transient());
        assert!(StoreError::Unavailable("pool closed".into()).is_transient());
        assert!(!StoreError::Backend("bad".into()).is_transient());
        assert!(
            !StoreError::UniqueViolation {
                collection: "reviews".into(),
                fields: vec!["tour".into()]
            }
            .is_transient()
        );
    }

    #[test]
    fn patch_touches() {
        let patch = DocumentPatch::new().with("name", "x").without("slug");
        assert!(patch.touches("name"));
        assert!(patch.touches("slug"));
        assert!(!patch.touches("price"));
        assert!(!patch.is_empty());
    }
}
