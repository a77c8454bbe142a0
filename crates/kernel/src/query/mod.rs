//! Query composition layer.
//!
//! This module provides:
//! - `sanitize`: raw client parameters to a typed `RetrievalRequest`
//! - `QueryBuilder`: `RetrievalRequest` to an inert `ComposedQuery`
//! - Types: FilterOperator, FilterClause, SortKey, Projection, Pagination

mod builder;
mod sanitizer;
pub mod types;

pub use builder::{ComposedQuery, QueryBuilder, QueryStage};
pub use sanitizer::{RESERVED_KEYS, is_valid_field_name, sanitize};
pub use types::{
    DEFAULT_LIMIT, DEFAULT_SORT_FIELD, FilterClause, FilterOperator, FilterValue, Pagination,
    Projection, ProjectionMode, RetrievalRequest, SortDirection, SortKey, VERSION_FIELD,
};
