//! In-process document store.
//!
//! Backs `memory://` deployments and the test suite. Every operation takes
//! the lock once, so each call is atomic with respect to the others.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::query::{ComposedQuery, FilterClause, QueryStage, VERSION_FIELD};

use super::pipeline::{self, PipelineStage};
use super::{Document, DocumentPatch, DocumentStore, StoreError, StoreResult};

#[derive(Default)]
struct Collection {
    /// Keyed by id; v7 ids keep insertion order.
    documents: BTreeMap<Uuid, Document>,
    unique_keys: Vec<Vec<String>>,
}

impl Collection {
    /// Check `candidate` against every unique key, ignoring `skip` ids.
    fn check_unique(
        &self,
        name: &str,
        candidate: &Document,
        skip: &HashSet<Uuid>,
        pending: &[Document],
    ) -> StoreResult<()> {
        for fields in &self.unique_keys {
            let Some(key) = unique_key(candidate, fields) else {
                continue;
            };
            let clash = self
                .documents
                .values()
                .filter(|d| d.id != candidate.id && !skip.contains(&d.id))
                .chain(pending.iter().filter(|d| d.id != candidate.id))
                .any(|d| unique_key(d, fields).is_some_and(|other| same_key(&key, &other)));
            if clash {
                return Err(StoreError::UniqueViolation {
                    collection: name.to_string(),
                    fields: fields.clone(),
                });
            }
        }
        Ok(())
    }

    fn matching(&self, filters: &[FilterClause]) -> Vec<Uuid> {
        self.documents
            .values()
            .filter(|d| pipeline::matches(&d.to_json(), filters))
            .map(|d| d.id)
            .collect()
    }
}

/// Values of `fields` in `doc`, or `None` if any is missing.
fn unique_key<'a>(doc: &'a Document, fields: &[String]) -> Option<Vec<&'a Value>> {
    fields
        .iter()
        .map(|f| doc.get(f).filter(|v| !v.is_null()))
        .collect()
}

fn same_key(a: &[&Value], b: &[&Value]) -> bool {
    a.iter()
        .zip(b)
        .all(|(x, y)| pipeline::compare_json(Some(*x), Some(*y)) == Ordering::Equal)
}

/// Document store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    write_faults: RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `collection` fail as unavailable until
    /// [`clear_faults`](Self::clear_faults) is called.
    ///
    /// Lets tests exercise failure paths that follow a committed write.
    pub fn fail_writes_to(&self, collection: &str) {
        self.write_faults.write().insert(collection.to_string());
    }

    pub fn clear_faults(&self) {
        self.write_faults.write().clear();
    }

    fn check_fault(&self, collection: &str) -> StoreResult<()> {
        if self.write_faults.read().contains(collection) {
            return Err(StoreError::Unavailable(format!(
                "writes to {collection} are failing"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, query: &ComposedQuery) -> StoreResult<Vec<Document>> {
        let collections = self.collections.read();
        let Some(collection) = collections.get(query.collection()) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<(Value, Document)> = collection
            .documents
            .values()
            .map(|d| (d.to_json(), d.clone()))
            .collect();

        for stage in query.stages() {
            match stage {
                QueryStage::Filter(clauses) => {
                    rows.retain(|(json, _)| pipeline::matches(json, clauses));
                }
                // Stable: ties keep id order.
                QueryStage::Sort(keys) => {
                    rows.sort_by(|(a, _), (b, _)| pipeline::compare_rows(a, b, keys));
                }
                QueryStage::Project(projection) => {
                    for (_, doc) in rows.iter_mut() {
                        *doc = doc.project(projection);
                    }
                }
                QueryStage::Paginate(page) => {
                    let offset = usize::try_from(page.offset).unwrap_or(usize::MAX);
                    let limit = usize::try_from(page.limit).unwrap_or(usize::MAX);
                    rows = rows.into_iter().skip(offset).take(limit).collect();
                }
            }
        }

        Ok(rows.into_iter().map(|(_, doc)| doc).collect())
    }

    async fn get(&self, collection: &str, id: Uuid) -> StoreResult<Option<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.documents.get(&id))
            .cloned())
    }

    async fn insert(&self, collection: &str, mut document: Document) -> StoreResult<Document> {
        self.check_fault(collection)?;
        let mut collections = self.collections.write();
        let entry = collections.entry(collection.to_string()).or_default();
        if entry.documents.contains_key(&document.id) {
            return Err(StoreError::UniqueViolation {
                collection: collection.to_string(),
                fields: vec!["id".to_string()],
            });
        }
        document.set(VERSION_FIELD, Value::from(0));
        entry.check_unique(collection, &document, &HashSet::new(), &[])?;
        entry.documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn update(
        &self,
        collection: &str,
        id: Uuid,
        patch: &DocumentPatch,
    ) -> StoreResult<Option<Document>> {
        self.check_fault(collection)?;
        let mut collections = self.collections.write();
        let Some(entry) = collections.get_mut(collection) else {
            return Ok(None);
        };
        let Some(current) = entry.documents.get(&id) else {
            return Ok(None);
        };

        let mut updated = current.clone();
        updated.apply(patch);
        updated.bump_version();
        entry.check_unique(collection, &updated, &HashSet::new(), &[])?;
        entry.documents.insert(id, updated.clone());
        Ok(Some(updated))
    }

    async fn delete(&self, collection: &str, id: Uuid) -> StoreResult<Option<Document>> {
        self.check_fault(collection)?;
        Ok(self
            .collections
            .write()
            .get_mut(collection)
            .and_then(|c| c.documents.remove(&id)))
    }

    async fn update_many(
        &self,
        collection: &str,
        filters: &[FilterClause],
        patch: &DocumentPatch,
    ) -> StoreResult<u64> {
        self.check_fault(collection)?;
        let mut collections = self.collections.write();
        let Some(entry) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let ids = entry.matching(filters);
        let updated: Vec<Document> = ids
            .iter()
            .filter_map(|id| entry.documents.get(id))
            .map(|doc| {
                let mut doc = doc.clone();
                doc.apply(patch);
                doc.bump_version();
                doc
            })
            .collect();

        // All or nothing: validate every new version before committing any.
        let replaced: HashSet<Uuid> = ids.iter().copied().collect();
        for doc in &updated {
            entry.check_unique(collection, doc, &replaced, &updated)?;
        }
        let count = updated.len() as u64;
        for doc in updated {
            entry.documents.insert(doc.id, doc);
        }
        Ok(count)
    }

    async fn delete_many(&self, collection: &str, filters: &[FilterClause]) -> StoreResult<u64> {
        self.check_fault(collection)?;
        let mut collections = self.collections.write();
        let Some(entry) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let ids = entry.matching(filters);
        for id in &ids {
            entry.documents.remove(id);
        }
        Ok(ids.len() as u64)
    }

    async fn aggregate(
        &self,
        collection: &str,
        stages: &[PipelineStage],
    ) -> StoreResult<Vec<Value>> {
        let rows: Vec<Value> = self
            .collections
            .read()
            .get(collection)
            .map(|c| c.documents.values().map(Document::to_json).collect())
            .unwrap_or_default();
        Ok(pipeline::evaluate(rows, stages))
    }

    async fn ensure_unique_index(&self, collection: &str, fields: &[&str]) -> StoreResult<()> {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let mut collections = self.collections.write();
        let entry = collections.entry(collection.to_string()).or_default();
        if entry.unique_keys.contains(&fields) {
            return Ok(());
        }

        let docs: Vec<&Document> = entry.documents.values().collect();
        for (i, doc) in docs.iter().enumerate() {
            let Some(key) = unique_key(doc, &fields) else {
                continue;
            };
            if docs[i + 1..]
                .iter()
                .any(|d| unique_key(d, &fields).is_some_and(|other| same_key(&key, &other)))
            {
                return Err(StoreError::UniqueViolation {
                    collection: collection.to_string(),
                    fields,
                });
            }
        }

        entry.unique_keys.push(fields);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}
