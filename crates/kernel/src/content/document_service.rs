//! Document service.
//!
//! Entry point for every tour, review and user operation. Retrievals run
//! sanitize, build, pre-retrieve hooks, execute, post-retrieve hooks.
//! Writes run pre-persist hooks, the store write, post-persist hooks and,
//! for reviews, the rating summary recomputation of every affected tour.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate::{AggregateMaintainer, AggregateSummary, PARENT_REF, RATINGS_AVERAGE, RATINGS_QUANTITY};
use crate::auth::{Action, Authorizer, Principal};
use crate::error::{AppError, AppResult, ValidationError};
use crate::executor::RetrievalExecutor;
use crate::hooks::{HookContext, HookPayload, HookRegistry, OperationKind, PersistPayload, Phase, Timing};
use crate::models::{CreateReview, CreateTour, UpdateReview, UpdateTour, WriteInput};
use crate::query::{
    ComposedQuery, FilterClause, FilterOperator, FilterValue, Pagination, Projection, QueryBuilder,
    RetrievalRequest, sanitize,
};
use crate::store::{Document, DocumentPatch, DocumentStore, GroupKey, GroupStage, PipelineStage};

use super::EntityKind;

/// Raw query parameters as received.
pub type RawParams = [(String, String)];

/// Author fields copied onto retrieved reviews.
const AUTHOR_FIELDS: [&str; 2] = ["name", "photo"];

/// Current time in the format stored on documents.
pub(crate) fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Strip protected fields and the revision counter from a written document.
pub(crate) fn present(kind: EntityKind, doc: Document) -> Document {
    let mut projection = Projection::default();
    for field in kind.collection().protected_fields {
        projection.hide(field);
    }
    doc.project(&projection)
}

fn object(map: Map<String, Value>) -> DocumentPatch {
    DocumentPatch::from(map)
}

/// Tour, review and user operations.
pub struct DocumentService {
    store: Arc<dyn DocumentStore>,
    executor: RetrievalExecutor,
    hooks: Arc<HookRegistry>,
    authorizer: Arc<dyn Authorizer>,
    maintainer: Arc<AggregateMaintainer>,
}

impl DocumentService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        hooks: Arc<HookRegistry>,
        authorizer: Arc<dyn Authorizer>,
        maintainer: Arc<AggregateMaintainer>,
    ) -> Self {
        Self {
            executor: RetrievalExecutor::new(Arc::clone(&store)),
            store,
            hooks,
            authorizer,
            maintainer,
        }
    }

    /// Declare the unique keys the engine must enforce.
    pub async fn ensure_indexes(&self) -> AppResult<()> {
        for (kind, fields) in [
            (EntityKind::Review, &[PARENT_REF, "user"][..]),
            (EntityKind::User, &["email"][..]),
        ] {
            let collection = kind.collection().name;
            self.store
                .ensure_unique_index(collection, fields)
                .await
                .map_err(|e| AppError::store(format!("index {collection}"), e))?;
        }
        info!("unique indexes ensured");
        Ok(())
    }

    pub fn maintainer(&self) -> &Arc<AggregateMaintainer> {
        &self.maintainer
    }

    pub(crate) fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Fail with `AuthorizationDenied` unless the actor may act.
    pub fn authorize(
        &self,
        actor: Option<&Principal>,
        action: Action,
        kind: EntityKind,
    ) -> AppResult<()> {
        if self.authorizer.is_authorized(actor, action, kind) {
            Ok(())
        } else {
            debug!(%kind, ?action, "authorization denied");
            Err(AppError::AuthorizationDenied)
        }
    }

    pub(super) fn context(
        &self,
        operation: OperationKind,
        kind: EntityKind,
        actor: Option<&Principal>,
    ) -> HookContext {
        HookContext::new(operation, kind, actor, self.authorizer.as_ref())
    }

    // ------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------

    /// List documents matching raw query parameters.
    pub async fn list(
        &self,
        kind: EntityKind,
        actor: Option<&Principal>,
        params: &RawParams,
    ) -> AppResult<Vec<Document>> {
        self.list_scoped(kind, actor, params, None).await
    }

    /// List the reviews of one tour.
    pub async fn list_reviews_of(
        &self,
        tour: Uuid,
        actor: Option<&Principal>,
        params: &RawParams,
    ) -> AppResult<Vec<Document>> {
        // A hidden or missing tour has no listable reviews.
        self.get(EntityKind::Tour, actor, tour).await?;
        let scope = FilterClause::eq(PARENT_REF, tour.to_string().as_str());
        self.list_scoped(EntityKind::Review, actor, params, Some(scope))
            .await
    }

    async fn list_scoped(
        &self,
        kind: EntityKind,
        actor: Option<&Principal>,
        params: &RawParams,
        scope: Option<FilterClause>,
    ) -> AppResult<Vec<Document>> {
        self.authorize(actor, Action::Read, kind)?;
        let request = parse_params(kind, params)?;
        let mut query = QueryBuilder::build(kind.collection(), request);
        if let Some(clause) = scope {
            query.and_filter(clause);
        }
        let ctx = self.context(OperationKind::Find, kind, actor);
        self.run_query(kind, &ctx, query).await
    }

    /// Fetch one document by id.
    pub async fn get(
        &self,
        kind: EntityKind,
        actor: Option<&Principal>,
        id: Uuid,
    ) -> AppResult<Document> {
        self.authorize(actor, Action::Read, kind)?;
        let ctx = self.context(OperationKind::Get, kind, actor);
        self.run_query(kind, &ctx, QueryBuilder::by_id(kind.collection(), id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::not_found(kind.label(), id))
    }

    /// Run a composed query through the retrieve hooks.
    async fn run_query(
        &self,
        kind: EntityKind,
        ctx: &HookContext,
        query: ComposedQuery,
    ) -> AppResult<Vec<Document>> {
        let query = self
            .hooks
            .run(kind, Timing::Pre, Phase::Retrieve, ctx, HookPayload::Query(query))?
            .into_query()?;
        let mut docs = self.executor.execute(&query).await?;
        if kind == EntityKind::Review {
            self.populate_authors(&mut docs).await?;
        }
        self.hooks
            .run(kind, Timing::Post, Phase::Retrieve, ctx, HookPayload::Documents(docs))?
            .into_documents()
    }

    /// Run an aggregation pipeline through the retrieve hooks.
    pub(crate) async fn run_pipeline(
        &self,
        kind: EntityKind,
        ctx: &HookContext,
        stages: Vec<PipelineStage>,
    ) -> AppResult<Vec<Value>> {
        let stages = self
            .hooks
            .run(kind, Timing::Pre, Phase::Retrieve, ctx, HookPayload::Pipeline(stages))?
            .into_pipeline()?;
        let rows = self
            .executor
            .aggregate(kind.collection().name, &stages)
            .await?;
        self.hooks
            .run(kind, Timing::Post, Phase::Retrieve, ctx, HookPayload::Rows(rows))?
            .into_rows()
    }

    /// Replace each review's `user` id with the author's name and photo.
    ///
    /// Authors that are missing or deactivated keep the bare id.
    async fn populate_authors(&self, docs: &mut [Document]) -> AppResult<()> {
        let ids: BTreeSet<String> = docs
            .iter()
            .filter_map(|d| d.get_str("user"))
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let users = EntityKind::User;
        let request = RetrievalRequest {
            filters: vec![FilterClause::new(
                "id",
                FilterOperator::In,
                FilterValue::List(ids.iter().map(|id| FilterValue::String(id.clone())).collect()),
            )],
            sort: Vec::new(),
            projection: Projection::include(AUTHOR_FIELDS),
            pagination: Pagination {
                offset: 0,
                limit: ids.len() as u64,
            },
        };
        let ctx = HookContext::system(OperationKind::Find);
        let query = self
            .hooks
            .run(
                users,
                Timing::Pre,
                Phase::Retrieve,
                &ctx,
                HookPayload::Query(QueryBuilder::build(users.collection(), request)),
            )?
            .into_query()?;

        let authors: HashMap<String, Value> = self
            .executor
            .execute(&query)
            .await?
            .into_iter()
            .map(|author| (author.id.to_string(), author.to_json()))
            .collect();

        for doc in docs.iter_mut() {
            let author = doc.get_str("user").and_then(|id| authors.get(id)).cloned();
            if let Some(author) = author {
                doc.set("user", author);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Create a tour or review from a request body.
    pub async fn create(
        &self,
        kind: EntityKind,
        actor: Option<&Principal>,
        body: Value,
    ) -> AppResult<Document> {
        self.authorize(actor, Action::Create, kind)?;
        let mut fields = match kind {
            EntityKind::Tour => {
                let mut fields = CreateTour::from_body(body)?;
                fields.insert(RATINGS_QUANTITY.into(), Value::from(AggregateSummary::EMPTY.count));
                fields.insert(RATINGS_AVERAGE.into(), Value::from(AggregateSummary::EMPTY.average));
                fields
            }
            EntityKind::Review => {
                let mut fields = CreateReview::from_body(body)?;
                if !fields.contains_key(PARENT_REF) {
                    return Err(ValidationError::InvalidDocument(
                        "a review must belong to a tour".to_string(),
                    )
                    .into());
                }
                if !fields.contains_key("user")
                    && let Some(actor) = actor
                {
                    fields.insert("user".into(), Value::String(actor.id.to_string()));
                }
                self.require_parent(&fields).await?;
                fields
            }
            EntityKind::User => {
                return Err(ValidationError::InvalidDocument(
                    "accounts are created through signup".to_string(),
                )
                .into());
            }
        };
        fields.insert("createdAt".into(), Value::String(timestamp()));

        let ctx = self.context(OperationKind::Create, kind, actor);
        let doc = self.persist_new(kind, &ctx, fields).await?;

        if kind == EntityKind::Review
            && let Some(tour) = doc.get_uuid(PARENT_REF)
        {
            self.maintainer.on_child_changed(tour).await;
        }
        Ok(present(kind, doc))
    }

    /// Apply a partial update from a request body.
    pub async fn update(
        &self,
        kind: EntityKind,
        actor: Option<&Principal>,
        id: Uuid,
        body: Value,
    ) -> AppResult<Document> {
        self.authorize(actor, Action::Update, kind)?;
        let fields = match kind {
            EntityKind::Tour => UpdateTour::from_body(body)?,
            EntityKind::Review => UpdateReview::from_body(body)?,
            EntityKind::User => {
                return Err(ValidationError::InvalidDocument(
                    "accounts are updated through /users/me".to_string(),
                )
                .into());
            }
        };

        // The old tour must be read before the write replaces it.
        let previous_parent = if kind == EntityKind::Review {
            self.require_parent(&fields).await?;
            self.load(kind, id).await?.get_uuid(PARENT_REF)
        } else {
            None
        };

        let ctx = self.context(OperationKind::Update, kind, actor);
        let doc = self.persist_patch(kind, &ctx, id, object(fields)).await?;

        if kind == EntityKind::Review {
            let parents = previous_parent.into_iter().chain(doc.get_uuid(PARENT_REF));
            self.maintainer.on_children_changed(parents).await;
        }
        Ok(present(kind, doc))
    }

    /// Delete one document.
    pub async fn delete(
        &self,
        kind: EntityKind,
        actor: Option<&Principal>,
        id: Uuid,
    ) -> AppResult<()> {
        self.authorize(actor, Action::Delete, kind)?;
        let collection = kind.collection().name;
        let removed = self
            .store
            .delete(collection, id)
            .await
            .map_err(|e| AppError::store(format!("delete {kind}"), e))?
            .ok_or_else(|| AppError::not_found(kind.label(), id))?;

        if kind == EntityKind::Review
            && let Some(tour) = removed.get_uuid(PARENT_REF)
        {
            self.maintainer.on_child_changed(tour).await;
        }
        Ok(())
    }

    /// Update every review matching the filter parameters.
    ///
    /// Returns the number of reviews changed. Every tour that owned a
    /// matching review, and the tour reviews were moved to, is recomputed.
    pub async fn update_reviews_where(
        &self,
        actor: Option<&Principal>,
        params: &RawParams,
        body: Value,
    ) -> AppResult<u64> {
        let kind = EntityKind::Review;
        self.authorize(actor, Action::Bulk, kind)?;
        let filters = bulk_filters(params)?;
        let fields = UpdateReview::from_body(body)?;
        self.require_parent(&fields).await?;

        let ctx = self.context(OperationKind::UpdateMany, kind, actor);
        let persist = self
            .hooks
            .run(
                kind,
                Timing::Pre,
                Phase::Persist,
                &ctx,
                HookPayload::Persist(PersistPayload {
                    id: None,
                    patch: object(fields),
                    is_new: false,
                }),
            )?
            .into_persist()?;

        let mut parents = self.parents_matching(&filters).await?;
        if let Some(tour) = persist
            .patch
            .set
            .get(PARENT_REF)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
        {
            parents.push(tour);
        }

        let changed = self
            .store
            .update_many(kind.collection().name, &filters, &persist.patch)
            .await
            .map_err(|e| AppError::store("update reviews", e))?;
        info!(changed, tours = parents.len(), "reviews updated by filter");

        self.maintainer.on_children_changed(parents).await;
        Ok(changed)
    }

    /// Delete every review matching the filter parameters.
    pub async fn delete_reviews_where(
        &self,
        actor: Option<&Principal>,
        params: &RawParams,
    ) -> AppResult<u64> {
        let kind = EntityKind::Review;
        self.authorize(actor, Action::Bulk, kind)?;
        let filters = bulk_filters(params)?;

        let parents = self.parents_matching(&filters).await?;
        let removed = self
            .store
            .delete_many(kind.collection().name, &filters)
            .await
            .map_err(|e| AppError::store("delete reviews", e))?;
        info!(removed, tours = parents.len(), "reviews deleted by filter");

        self.maintainer.on_children_changed(parents).await;
        Ok(removed)
    }

    /// Distinct tours owning a review that matches `filters`.
    async fn parents_matching(&self, filters: &[FilterClause]) -> AppResult<Vec<Uuid>> {
        let rows = self
            .executor
            .aggregate(
                EntityKind::Review.collection().name,
                &[
                    PipelineStage::Match(filters.to_vec()),
                    PipelineStage::Group(GroupStage::new(GroupKey::Field(PARENT_REF.to_string()))),
                ],
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("_id").and_then(Value::as_str))
            .filter_map(|id| Uuid::parse_str(id).ok())
            .collect())
    }

    /// Fail with not found when review fields name a tour that does not exist.
    async fn require_parent(&self, fields: &Map<String, Value>) -> AppResult<()> {
        let Some(tour) = fields.get(PARENT_REF).and_then(Value::as_str) else {
            return Ok(());
        };
        let id = Uuid::parse_str(tour).map_err(|_| {
            ValidationError::InvalidDocument(format!("{tour} is not a valid tour id"))
        })?;
        self.load(EntityKind::Tour, id).await.map(|_| ())
    }

    /// Read a document unprojected.
    pub(crate) async fn load(&self, kind: EntityKind, id: Uuid) -> AppResult<Document> {
        self.store
            .get(kind.collection().name, id)
            .await
            .map_err(|e| AppError::store(format!("get {kind}"), e))?
            .ok_or_else(|| AppError::not_found(kind.label(), id))
    }

    /// Insert a new document through the persist hooks.
    pub(crate) async fn persist_new(
        &self,
        kind: EntityKind,
        ctx: &HookContext,
        fields: Map<String, Value>,
    ) -> AppResult<Document> {
        let persist = self
            .hooks
            .run(
                kind,
                Timing::Pre,
                Phase::Persist,
                ctx,
                HookPayload::Persist(PersistPayload {
                    id: None,
                    patch: object(fields),
                    is_new: true,
                }),
            )?
            .into_persist()?;

        let doc = self
            .store
            .insert(kind.collection().name, Document::new(persist.patch.set))
            .await
            .map_err(|e| AppError::store(format!("insert {kind}"), e))?;
        debug!(%kind, id = %doc.id, "document created");
        Ok(self.after_persist(kind, ctx, doc))
    }

    /// Patch an existing document through the persist hooks.
    pub(crate) async fn persist_patch(
        &self,
        kind: EntityKind,
        ctx: &HookContext,
        id: Uuid,
        patch: DocumentPatch,
    ) -> AppResult<Document> {
        let persist = self
            .hooks
            .run(
                kind,
                Timing::Pre,
                Phase::Persist,
                ctx,
                HookPayload::Persist(PersistPayload {
                    id: Some(id),
                    patch,
                    is_new: false,
                }),
            )?
            .into_persist()?;

        let doc = self
            .store
            .update(kind.collection().name, id, &persist.patch)
            .await
            .map_err(|e| AppError::store(format!("update {kind}"), e))?
            .ok_or_else(|| AppError::not_found(kind.label(), id))?;
        debug!(%kind, %id, "document updated");
        Ok(self.after_persist(kind, ctx, doc))
    }

    /// Post-persist hooks. The write has committed; failures only log.
    fn after_persist(&self, kind: EntityKind, ctx: &HookContext, doc: Document) -> Document {
        let payload = HookPayload::Documents(vec![doc.clone()]);
        match self
            .hooks
            .run_best_effort(kind, Timing::Post, Phase::Persist, ctx, payload)
        {
            HookPayload::Documents(mut docs) if docs.len() == 1 => docs.remove(0),
            _ => doc,
        }
    }
}

impl std::fmt::Debug for DocumentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentService")
            .field("maintainer", &self.maintainer)
            .finish()
    }
}

/// Sanitize raw parameters, refusing to filter or sort on protected fields.
fn parse_params(kind: EntityKind, params: &RawParams) -> AppResult<RetrievalRequest> {
    let request = sanitize(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    let protected = kind.collection().protected_fields;
    let touched = request
        .filters
        .iter()
        .map(|f| f.field.as_str())
        .chain(request.sort.iter().map(|s| s.field.as_str()));
    for field in touched {
        let root = field.split('.').next().unwrap_or(field);
        if protected.contains(&root) {
            return Err(ValidationError::InvalidField(field.to_string()).into());
        }
    }
    Ok(request)
}

/// Filters for a bulk operation. An empty filter is refused so a missing
/// parameter cannot touch every review.
fn bulk_filters(params: &RawParams) -> AppResult<Vec<FilterClause>> {
    let filters = parse_params(EntityKind::Review, params)?.filters;
    if filters.is_empty() {
        return Err(ValidationError::InvalidDocument(
            "bulk operations require at least one filter".to_string(),
        )
        .into());
    }
    Ok(filters)
}
