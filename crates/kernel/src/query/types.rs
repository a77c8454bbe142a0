//! Retrieval request types.
//!
//! A [`RetrievalRequest`] is the typed, validated form of a client's raw query
//! parameters. Nothing in here can carry an operator outside
//! [`FilterOperator`], so anything built from it is safe to hand to a store.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Page size used when the client sends no usable `limit`.
pub const DEFAULT_LIMIT: u64 = 100;

/// Field used for the default sort (newest first).
pub const DEFAULT_SORT_FIELD: &str = "createdAt";

/// Internal revision counter maintained by the stores; hidden by default.
pub const VERSION_FIELD: &str = "__v";

/// Comparison operators accepted from clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Ne,
    In,
}

impl FilterOperator {
    /// The full operator vocabulary.
    pub const ALL: [FilterOperator; 7] = [
        FilterOperator::Eq,
        FilterOperator::Gt,
        FilterOperator::Gte,
        FilterOperator::Lt,
        FilterOperator::Lte,
        FilterOperator::Ne,
        FilterOperator::In,
    ];

    /// Parse a bracket token such as the `gte` in `price[gte]`.
    ///
    /// Exact, case-sensitive match only.
    pub fn parse(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == token)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::Ne => "ne",
            FilterOperator::In => "in",
        }
    }
}

/// Filter value types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FilterValue {
    /// Boolean value.
    Boolean(bool),
    /// Integer value.
    Integer(i64),
    /// Float value.
    Float(f64),
    /// String value.
    String(String),
    /// List of values (for `in`).
    List(Vec<FilterValue>),
}

impl FilterValue {
    /// Infer a scalar from raw query text.
    ///
    /// `true`/`false` become booleans, integral text becomes an integer,
    /// other finite numbers become floats, everything else stays a string.
    pub fn infer(raw: &str) -> Self {
        match raw {
            "true" => return FilterValue::Boolean(true),
            "false" => return FilterValue::Boolean(false),
            _ => {}
        }
        if let Ok(i) = raw.parse::<i64>() {
            return FilterValue::Integer(i);
        }
        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() && !raw.trim().is_empty() => FilterValue::Float(f),
            _ => FilterValue::String(raw.to_string()),
        }
    }

    /// Convert to the JSON representation stores compare against.
    pub fn to_json(&self) -> Value {
        match self {
            FilterValue::Boolean(b) => Value::Bool(*b),
            FilterValue::Integer(i) => Value::from(*i),
            FilterValue::Float(f) => Value::from(*f),
            FilterValue::String(s) => Value::String(s.clone()),
            FilterValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    /// Textual form, used when a string field is compared against a value
    /// that was inferred as a number or boolean.
    pub fn to_text(&self) -> String {
        match self {
            FilterValue::Boolean(b) => b.to_string(),
            FilterValue::Integer(i) => i.to_string(),
            FilterValue::Float(f) => f.to_string(),
            FilterValue::String(s) => s.clone(),
            FilterValue::List(items) => items
                .iter()
                .map(Self::to_text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Values to test against for membership (`in`); scalars yield themselves.
    pub fn members(&self) -> Vec<&FilterValue> {
        match self {
            FilterValue::List(items) => items.iter().collect(),
            other => vec![other],
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Boolean(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

/// A single `(field, operator, value)` predicate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterClause {
    /// Field path (dots address nested fields).
    pub field: String,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

impl FilterClause {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::Eq, value.into())
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One sort key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Whether a projection lists the fields to keep or the fields to drop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionMode {
    Include,
    Exclude,
}

/// Field projection. The document id is always kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Projection {
    pub mode: ProjectionMode,
    pub fields: BTreeSet<String>,
}

impl Projection {
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: ProjectionMode::Include,
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: ProjectionMode::Exclude,
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Remove `field` from the visible set regardless of mode.
    pub fn hide(&mut self, field: &str) {
        match self.mode {
            ProjectionMode::Include => {
                self.fields.remove(field);
            }
            ProjectionMode::Exclude => {
                self.fields.insert(field.to_string());
            }
        }
    }
}

impl Default for Projection {
    fn default() -> Self {
        Self::exclude([VERSION_FIELD])
    }
}

/// Offset/limit window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Pagination {
    /// Window for a 1-based page.
    pub fn for_page(page: u64, limit: u64) -> Self {
        Self {
            offset: page.saturating_sub(1).saturating_mul(limit),
            limit,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::for_page(1, DEFAULT_LIMIT)
    }
}

/// Typed, validated retrieval request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalRequest {
    pub filters: Vec<FilterClause>,
    pub sort: Vec<SortKey>,
    pub projection: Projection,
    pub pagination: Pagination,
}

impl Default for RetrievalRequest {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            sort: vec![SortKey::desc(DEFAULT_SORT_FIELD)],
            projection: Projection::default(),
            pagination: Pagination::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn operator_tokens_round_trip() {
        for op in FilterOperator::ALL {
            assert_eq!(FilterOperator::parse(op.as_str()), Some(op));
        }
        assert_eq!(FilterOperator::parse("$gte"), None);
        assert_eq!(FilterOperator::parse("GTE"), None);
        assert_eq!(FilterOperator::parse("regex"), None);
    }

    #[test]
    fn infer_scalars() {
        assert_eq!(FilterValue::infer("500"), FilterValue::Integer(500));
        assert_eq!(FilterValue::infer("4.5"), FilterValue::Float(4.5));
        assert_eq!(FilterValue::infer("true"), FilterValue::Boolean(true));
        assert_eq!(FilterValue::infer("easy"), FilterValue::from("easy"));
        assert_eq!(FilterValue::infer("NaN"), FilterValue::from("NaN"));
        assert_eq!(FilterValue::infer(""), FilterValue::from(""));
    }

    #[test]
    fn page_offsets() {
        assert_eq!(Pagination::for_page(1, 5).offset, 0);
        assert_eq!(Pagination::for_page(3, 5).offset, 10);
        assert_eq!(Pagination::for_page(0, 5).offset, 0);
    }

    #[test]
    fn hide_respects_mode() {
        let mut include = Projection::include(["name", "password"]);
        include.hide("password");
        assert!(!include.fields.contains("password"));

        let mut exclude = Projection::default();
        exclude.hide("password");
        assert!(exclude.fields.contains("password"));
        assert!(exclude.fields.contains(VERSION_FIELD));
    }

    #[test]
    fn default_request_sorts_newest_first() {
        let request = RetrievalRequest::default();
        assert_eq!(request.sort, vec![SortKey::desc("createdAt")]);
        assert_eq!(request.pagination, Pagination { offset: 0, limit: 100 });
    }
}
