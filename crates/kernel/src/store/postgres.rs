//! PostgreSQL document store.
//!
//! Every operation runs in its own transaction with a `statement_timeout`
//! applied through `SET LOCAL`, so a slow query surfaces as
//! [`StoreError::Timeout`] instead of holding a connection indefinitely.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::db;
use crate::query::{ComposedQuery, FilterClause};

use super::pipeline::{self, PipelineStage};
use super::sql;
use super::{Document, DocumentPatch, DocumentStore, StoreError, StoreResult};

/// Constraint name to `(collection, fields)`.
type UniqueKeys = DashMap<String, (String, Vec<String>)>;

const PRIMARY_KEY: &str = "documents_pkey";

/// Shape of a `row_to_json` row.
#[derive(Deserialize)]
struct RawRow {
    id: Uuid,
    body: Map<String, Value>,
}

fn decode(row: Value) -> StoreResult<Document> {
    let raw: RawRow =
        serde_json::from_value(row).map_err(|e| StoreError::Backend(e.to_string()))?;
    Ok(Document::with_id(raw.id, raw.body))
}

fn body_of(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Classify a driver error.
fn map_error(err: sqlx::Error, unique_keys: &UniqueKeys) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => {
                let constraint = db.constraint().unwrap_or_default();
                if constraint == PRIMARY_KEY {
                    return StoreError::UniqueViolation {
                        collection: sql::TABLE.to_string(),
                        fields: vec!["id".to_string()],
                    };
                }
                let (collection, fields) = unique_keys
                    .get(constraint)
                    .map(|entry| entry.value().clone())
                    .unwrap_or_else(|| (sql::TABLE.to_string(), Vec::new()));
                StoreError::UniqueViolation { collection, fields }
            }
            // query_canceled: statement_timeout fired.
            Some("57014") => StoreError::Timeout,
            // serialization_failure, deadlock_detected, admin_shutdown
            Some("40001" | "40P01" | "57P01") => StoreError::Unavailable(db.message().to_string()),
            _ => StoreError::Backend(db.message().to_string()),
        },
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Unavailable(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

/// Document store over a single PostgreSQL JSONB table.
pub struct PgStore {
    pool: PgPool,
    statement_timeout: Duration,
    unique_keys: UniqueKeys,
}

impl PgStore {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
            unique_keys: DashMap::new(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn err(&self, err: sqlx::Error) -> StoreError {
        map_error(err, &self.unique_keys)
    }

    async fn begin(&self) -> StoreResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(|e| self.err(e))?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = '{}ms'",
            self.statement_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| self.err(e))?;
        Ok(tx)
    }

    async fn fetch_rows(&self, sql: &str) -> StoreResult<Vec<Value>> {
        let mut tx = self.begin().await?;
        let rows: Vec<Value> = sqlx::query_scalar(sql)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| self.err(e))?;
        tx.commit().await.map_err(|e| self.err(e))?;
        Ok(rows)
    }

    /// Read-modify-write one document inside `tx`.
    async fn update_in(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        collection: &str,
        id: Uuid,
        patch: &DocumentPatch,
    ) -> StoreResult<Option<Document>> {
        let body: Option<Value> = sqlx::query_scalar(
            "SELECT body FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| self.err(e))?;

        let Some(body) = body else {
            return Ok(None);
        };

        let mut document = Document::with_id(id, body_of(body));
        document.apply(patch);
        document.bump_version();

        sqlx::query("UPDATE documents SET body = $3 WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .bind(Value::Object(document.fields.clone()))
            .execute(&mut **tx)
            .await
            .map_err(|e| self.err(e))?;

        Ok(Some(document))
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn find(&self, query: &ComposedQuery) -> StoreResult<Vec<Document>> {
        let sql = sql::find_sql(query);
        debug!(collection = query.collection(), %sql, "find");
        self.fetch_rows(&sql)
            .await?
            .into_iter()
            .map(|row| decode(row).map(|doc| doc.project(query.projection())))
            .collect()
    }

    async fn get(&self, collection: &str, id: Uuid) -> StoreResult<Option<Document>> {
        let mut tx = self.begin().await?;
        let body: Option<Value> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| self.err(e))?;
        tx.commit().await.map_err(|e| self.err(e))?;
        Ok(body.map(|body| Document::with_id(id, body_of(body))))
    }

    async fn insert(&self, collection: &str, mut document: Document) -> StoreResult<Document> {
        document.set(crate::query::VERSION_FIELD, Value::from(0));
        let mut tx = self.begin().await?;
        sqlx::query("INSERT INTO documents (id, collection, body) VALUES ($1, $2, $3)")
            .bind(document.id)
            .bind(collection)
            .bind(Value::Object(document.fields.clone()))
            .execute(&mut *tx)
            .await
            .map_err(|e| self.err(e))?;
        tx.commit().await.map_err(|e| self.err(e))?;
        Ok(document)
    }

    async fn update(
        &self,
        collection: &str,
        id: Uuid,
        patch: &DocumentPatch,
    ) -> StoreResult<Option<Document>> {
        let mut tx = self.begin().await?;
        let updated = self.update_in(&mut tx, collection, id, patch).await?;
        tx.commit().await.map_err(|e| self.err(e))?;
        Ok(updated)
    }

    async fn delete(&self, collection: &str, id: Uuid) -> StoreResult<Option<Document>> {
        let mut tx = self.begin().await?;
        let body: Option<Value> = sqlx::query_scalar(
            "DELETE FROM documents WHERE collection = $1 AND id = $2 RETURNING body",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| self.err(e))?;
        tx.commit().await.map_err(|e| self.err(e))?;
        Ok(body.map(|body| Document::with_id(id, body_of(body))))
    }

    async fn update_many(
        &self,
        collection: &str,
        filters: &[FilterClause],
        patch: &DocumentPatch,
    ) -> StoreResult<u64> {
        let mut tx = self.begin().await?;
        let ids: Vec<Uuid> = sqlx::query_scalar(&sql::lock_ids_sql(collection, filters))
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| self.err(e))?;

        let mut count = 0u64;
        for id in ids {
            if self.update_in(&mut tx, collection, id, patch).await?.is_some() {
                count += 1;
            }
        }
        // Dropping tx on an error above rolls every row back.
        tx.commit().await.map_err(|e| self.err(e))?;
        Ok(count)
    }

    async fn delete_many(&self, collection: &str, filters: &[FilterClause]) -> StoreResult<u64> {
        let mut tx = self.begin().await?;
        let result = sqlx::query(&sql::delete_sql(collection, filters))
            .execute(&mut *tx)
            .await
            .map_err(|e| self.err(e))?;
        tx.commit().await.map_err(|e| self.err(e))?;
        Ok(result.rows_affected())
    }

    async fn aggregate(
        &self,
        collection: &str,
        stages: &[PipelineStage],
    ) -> StoreResult<Vec<Value>> {
        // Leading match stages become the WHERE clause.
        let leading = stages
            .iter()
            .take_while(|s| matches!(s, PipelineStage::Match(_)))
            .count();
        let filters: Vec<FilterClause> = stages[..leading]
            .iter()
            .filter_map(|s| match s {
                PipelineStage::Match(clauses) => Some(clauses.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect();
        let rest = &stages[leading..];

        if let Some(PipelineStage::Group(group)) = rest.first()
            && let Some(sql) = sql::group_sql(collection, &filters, group)
        {
            debug!(collection, %sql, "aggregate pushed down");
            let rows = self.fetch_rows(&sql).await?;
            return Ok(pipeline::evaluate(rows, &rest[1..]));
        }

        let rows = self
            .fetch_rows(&sql::match_sql(collection, &filters))
            .await?
            .into_iter()
            .map(|row| decode(row).map(|doc| doc.to_json()))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(pipeline::evaluate(rows, rest))
    }

    async fn ensure_unique_index(&self, collection: &str, fields: &[&str]) -> StoreResult<()> {
        let Some((name, ddl)) = sql::unique_index_sql(collection, fields) else {
            return Err(StoreError::Backend(format!(
                "cannot index {collection} on ({})",
                fields.join(", ")
            )));
        };
        self.unique_keys.insert(
            name.clone(),
            (
                collection.to_string(),
                fields.iter().map(|f| f.to_string()).collect(),
            ),
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| self.err(e))?;
        debug!(index = %name, "unique index ensured");
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        db::check_health(&self.pool).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pool_errors_are_classified() {
        let keys = UniqueKeys::new();
        assert!(matches!(
            map_error(sqlx::Error::PoolTimedOut, &keys),
            StoreError::Timeout
        ));
        assert!(matches!(
            map_error(sqlx::Error::PoolClosed, &keys),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_error(sqlx::Error::RowNotFound, &keys),
            StoreError::Backend(_)
        ));
    }

    #[test]
    fn rows_decode_into_documents() {
        let id = Uuid::now_v7();
        let doc = decode(json!({ "id": id, "body": { "name": "a" } })).unwrap();
        assert_eq!(doc.id, id);
        assert_eq!(doc.get_str("name"), Some("a"));
        assert!(decode(json!({ "body": {} })).is_err());
    }
}
