//! Query composition.
//!
//! [`QueryBuilder`] turns a [`RetrievalRequest`] into an inert
//! [`ComposedQuery`] bound to one collection. Nothing is read until a
//! [`RetrievalExecutor`](crate::executor::RetrievalExecutor) runs it, which
//! leaves a window for pre-retrieve hooks to tighten the filter.

use serde::Serialize;
use uuid::Uuid;

use crate::store::CollectionHandle;

use super::types::{
    FilterClause, Pagination, Projection, RetrievalRequest, SortKey, VERSION_FIELD,
};

/// One retrieval stage, in application order.
#[derive(Debug, Clone, Copy)]
pub enum QueryStage<'a> {
    Filter(&'a [FilterClause]),
    Sort(&'a [SortKey]),
    Project(&'a Projection),
    Paginate(Pagination),
}

/// A fully built, not yet executed retrieval plan.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComposedQuery {
    collection: String,
    filters: Vec<FilterClause>,
    sort: Vec<SortKey>,
    projection: Projection,
    pagination: Pagination,
}

impl ComposedQuery {
    /// Collection this query targets.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn filters(&self) -> &[FilterClause] {
        &self.filters
    }

    pub fn sort(&self) -> &[SortKey] {
        &self.sort
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    /// Stages in their fixed order: filter, sort, projection, pagination.
    ///
    /// Sorting precedes projection so a sort key may be projected away, and
    /// the offset/limit window is taken over the complete sorted set.
    pub fn stages(&self) -> [QueryStage<'_>; 4] {
        [
            QueryStage::Filter(&self.filters),
            QueryStage::Sort(&self.sort),
            QueryStage::Project(&self.projection),
            QueryStage::Paginate(self.pagination),
        ]
    }

    /// AND another clause into the filter stage.
    pub fn and_filter(&mut self, clause: FilterClause) {
        if !self.filters.contains(&clause) {
            self.filters.push(clause);
        }
    }

    /// Whether any filter clause references `field`.
    pub fn filters_on(&self, field: &str) -> bool {
        self.filters.iter().any(|f| f.field == field)
    }
}

/// Builds [`ComposedQuery`] values.
pub struct QueryBuilder;

impl QueryBuilder {
    /// Compose a request against a collection.
    ///
    /// Fields the collection marks as protected are hidden from the
    /// projection whatever the client asked for.
    pub fn build(collection: &CollectionHandle, request: RetrievalRequest) -> ComposedQuery {
        let RetrievalRequest {
            filters,
            sort,
            mut projection,
            pagination,
        } = request;

        for field in collection.protected_fields {
            projection.hide(field);
        }

        ComposedQuery {
            collection: collection.name.to_string(),
            filters,
            sort,
            projection,
            pagination,
        }
    }

    /// Compose a single-document lookup by id.
    pub fn by_id(collection: &CollectionHandle, id: Uuid) -> ComposedQuery {
        Self::build(
            collection,
            RetrievalRequest {
                filters: vec![FilterClause::eq("id", id.to_string().as_str())],
                sort: Vec::new(),
                projection: Projection::exclude([VERSION_FIELD]),
                pagination: Pagination { offset: 0, limit: 1 },
            },
        )
    }
}
