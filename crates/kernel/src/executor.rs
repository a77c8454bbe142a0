//! Retrieval executor.
//!
//! Runs composed queries and aggregation pipelines against the store. It
//! never writes; engine errors are passed through tagged with the
//! operation that produced them.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::query::ComposedQuery;
use crate::store::{Document, DocumentStore, PipelineStage};

/// Read-only access to the store.
#[derive(Clone)]
pub struct RetrievalExecutor {
    store: Arc<dyn DocumentStore>,
}

impl RetrievalExecutor {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Run a composed query.
    pub async fn execute(&self, query: &ComposedQuery) -> AppResult<Vec<Document>> {
        let docs = self
            .store
            .find(query)
            .await
            .map_err(|e| AppError::store(format!("find {}", query.collection()), e))?;
        debug!(collection = query.collection(), results = docs.len(), "query executed");
        Ok(docs)
    }

    /// Run an aggregation pipeline.
    pub async fn aggregate(
        &self,
        collection: &str,
        stages: &[PipelineStage],
    ) -> AppResult<Vec<Value>> {
        self.store
            .aggregate(collection, stages)
            .await
            .map_err(|e| AppError::store(format!("aggregate {collection}"), e))
    }
}

impl std::fmt::Debug for RetrievalExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalExecutor").finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::content::EntityKind;
    use crate::query::{QueryBuilder, RetrievalRequest};
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn empty_collection_is_success() {
        let executor = RetrievalExecutor::new(Arc::new(MemoryStore::new()));
        let query = QueryBuilder::build(EntityKind::Tour.collection(), RetrievalRequest::default());
        assert!(executor.execute(&query).await.unwrap().is_empty());
        assert!(executor.aggregate("tours", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn returns_projected_documents() {
        let store = Arc::new(MemoryStore::new());
        let Value::Object(map) = json!({ "name": "Forest Hiker", "price": 397 }) else {
            unreachable!()
        };
        store.insert("tours", Document::new(map)).await.unwrap();

        let executor = RetrievalExecutor::new(store);
        let query = QueryBuilder::build(EntityKind::Tour.collection(), RetrievalRequest::default());
        let docs = executor.execute(&query).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].get("__v").is_none());
        assert_eq!(docs[0].get_str("name"), Some("Forest Hiker"));
    }
}
