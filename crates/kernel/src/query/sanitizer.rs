//! Raw query parameter sanitizer.
//!
//! Turns the untrusted `key=value` pairs of a request into a typed
//! [`RetrievalRequest`]. Operators are recognised only in the bracket form
//! `field[op]=value` and only from the fixed [`FilterOperator`] vocabulary.
//! Any other operator token rejects the whole request: a partially applied
//! filter would silently widen the result set.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ValidationError;

use super::types::{
    DEFAULT_LIMIT, DEFAULT_SORT_FIELD, FilterClause, FilterOperator, FilterValue, Pagination,
    Projection, RetrievalRequest, SortKey,
};

#[allow(clippy::expect_used)]
static FIELD_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z0-9_]+)*$").expect("valid field name pattern")
});

/// Keys that configure the retrieval rather than filter it.
pub const RESERVED_KEYS: [&str; 4] = ["page", "sort", "limit", "fields"];

/// Prefix marking a descending sort key.
const DESCENDING_MARKER: char = '-';

/// Sanitize raw query parameters into a retrieval request.
///
/// Pure: no I/O, no side effects. For repeated reserved keys the last
/// occurrence wins; repeated filter keys are all kept (they are ANDed).
pub fn sanitize<I, K, V>(params: I) -> Result<RetrievalRequest, ValidationError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut page = None;
    let mut limit = None;
    let mut sort = None;
    let mut fields = None;
    let mut filters: Vec<FilterClause> = Vec::new();

    for (key, value) in params {
        let (key, value) = (key.as_ref(), value.as_ref());
        match key {
            "page" => page = Some(value.to_string()),
            "limit" => limit = Some(value.to_string()),
            "sort" => sort = Some(value.to_string()),
            "fields" => fields = Some(value.to_string()),
            _ => {
                let clause = parse_filter(key, value)?;
                if !filters.contains(&clause) {
                    filters.push(clause);
                }
            }
        }
    }

    let page = parse_positive("page", page.as_deref())?.unwrap_or(1);
    let limit = parse_positive("limit", limit.as_deref())?.unwrap_or(DEFAULT_LIMIT);

    Ok(RetrievalRequest {
        filters,
        sort: parse_sort(sort.as_deref())?,
        projection: parse_fields(fields.as_deref())?,
        pagination: Pagination::for_page(page, limit),
    })
}

/// Parse one filter key/value pair.
fn parse_filter(key: &str, value: &str) -> Result<FilterClause, ValidationError> {
    let (field, operator) = match key.split_once('[') {
        None => (key, FilterOperator::Eq),
        Some((field, rest)) => {
            let token = rest.strip_suffix(']').unwrap_or(rest);
            // Only a single, well-formed `[op]` suffix is accepted.
            let operator = if rest.ends_with(']') && !token.contains(['[', ']']) {
                FilterOperator::parse(token)
            } else {
                None
            };
            let Some(operator) = operator else {
                return Err(ValidationError::InvalidOperator {
                    field: field.to_string(),
                    operator: token.to_string(),
                });
            };
            (field, operator)
        }
    };

    if !is_valid_field_name(field) {
        return Err(ValidationError::InvalidField(field.to_string()));
    }

    let value = match operator {
        FilterOperator::In => {
            FilterValue::List(value.split(',').map(FilterValue::infer).collect())
        }
        _ => FilterValue::infer(value),
    };

    Ok(FilterClause::new(field, operator, value))
}

/// Parse `page`/`limit`. Absent or non-positive values yield `None`.
fn parse_positive(key: &str, raw: Option<&str>) -> Result<Option<u64>, ValidationError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let parsed: i64 = trimmed
        .parse()
        .map_err(|_| ValidationError::InvalidPaginationValue {
            key: key.to_string(),
            value: raw.to_string(),
        })?;
    Ok(u64::try_from(parsed).ok().filter(|v| *v > 0))
}

/// Parse the `sort` value: comma-separated fields, `-` for descending.
fn parse_sort(raw: Option<&str>) -> Result<Vec<SortKey>, ValidationError> {
    let mut keys = Vec::new();
    for part in raw.unwrap_or_default().split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let key = match part.strip_prefix(DESCENDING_MARKER) {
            Some(field) => SortKey::desc(field),
            None => SortKey::asc(part),
        };
        if !is_valid_field_name(&key.field) {
            return Err(ValidationError::InvalidField(key.field));
        }
        if !keys.iter().any(|k: &SortKey| k.field == key.field) {
            keys.push(key);
        }
    }

    if keys.is_empty() {
        keys.push(SortKey::desc(DEFAULT_SORT_FIELD));
    }
    Ok(keys)
}

/// Parse the `fields` value into an include-list projection.
fn parse_fields(raw: Option<&str>) -> Result<Projection, ValidationError> {
    let mut fields = Vec::new();
    for part in raw.unwrap_or_default().split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if !is_valid_field_name(part) {
            return Err(ValidationError::InvalidField(part.to_string()));
        }
        fields.push(part);
    }

    if fields.is_empty() {
        Ok(Projection::default())
    } else {
        Ok(Projection::include(fields))
    }
}

/// Validate a field name for use in queries.
///
/// Dot-separated segments of ASCII alphanumerics and underscores, the first
/// starting with a letter or underscore.
pub fn is_valid_field_name(name: &str) -> bool {
    FIELD_NAME_RE.is_match(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::types::{ProjectionMode, SortDirection, VERSION_FIELD};

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_params_use_defaults() {
        let request = sanitize(params(&[])).unwrap();
        assert!(request.filters.is_empty());
        assert_eq!(request.sort, vec![SortKey::desc("createdAt")]);
        assert_eq!(request.projection.mode, ProjectionMode::Exclude);
        assert!(request.projection.fields.contains(VERSION_FIELD));
        assert_eq!(request.pagination, Pagination { offset: 0, limit: 100 });
    }

    #[test]
    fn reserved_keys_never_become_filters() {
        let request = sanitize(params(&[
            ("page", "2"),
            ("sort", "price"),
            ("limit", "10"),
            ("fields", "name"),
            ("difficulty", "easy"),
        ]))
        .unwrap();

        assert_eq!(request.filters.len(), 1);
        assert_eq!(request.filters[0], FilterClause::eq("difficulty", "easy"));
    }

    #[test]
    fn bracket_operators_are_translated() {
        let request = sanitize(params(&[
            ("price[gte]", "500"),
            ("duration[lt]", "10"),
            ("ratingsAverage[ne]", "4.5"),
        ]))
        .unwrap();

        assert_eq!(
            request.filters,
            vec![
                FilterClause::new("price", FilterOperator::Gte, FilterValue::Integer(500)),
                FilterClause::new("duration", FilterOperator::Lt, FilterValue::Integer(10)),
                FilterClause::new("ratingsAverage", FilterOperator::Ne, FilterValue::Float(4.5)),
            ]
        );
    }

    #[test]
    fn in_operator_splits_list() {
        let request = sanitize(params(&[("difficulty[in]", "easy,medium")])).unwrap();
        assert_eq!(
            request.filters[0].value,
            FilterValue::List(vec!["easy".into(), "medium".into()])
        );
    }

    #[test]
    fn unknown_operator_rejects_request() {
        let err = sanitize(params(&[("price[regex]", ".*"), ("name", "x")])).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidOperator {
                field: "price".into(),
                operator: "regex".into()
            }
        );
    }

    #[test]
    fn dollar_operator_is_rejected() {
        let err = sanitize(params(&[("price[$gt]", "1")])).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidOperator { .. }));
    }

    #[test]
    fn malformed_brackets_are_rejected() {
        for key in ["price[gte", "price[gte][lt]", "price[]", "price[gte]x"] {
            let err = sanitize(params(&[(key, "1")])).unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidOperator { .. }),
                "{key} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn invalid_field_names_are_rejected() {
        for key in ["$where", "a..b", "1abc", "na me", "price]", ""] {
            let err = sanitize(params(&[(key, "1")])).unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidField(_)),
                "{key:?} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn pagination_offset_is_page_times_limit() {
        let request = sanitize(params(&[("page", "3"), ("limit", "5")])).unwrap();
        assert_eq!(request.pagination, Pagination { offset: 10, limit: 5 });
    }

    #[test]
    fn non_positive_pagination_falls_back() {
        let request = sanitize(params(&[("page", "0"), ("limit", "-4")])).unwrap();
        assert_eq!(request.pagination, Pagination { offset: 0, limit: 100 });
    }

    #[test]
    fn non_numeric_pagination_is_an_error() {
        let err = sanitize(params(&[("limit", "ten")])).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidPaginationValue {
                key: "limit".into(),
                value: "ten".into()
            }
        );
        assert!(sanitize(params(&[("page", "1.5")])).is_err());
    }

    #[test]
    fn sort_parses_direction_markers() {
        let request = sanitize(params(&[("sort", "-ratingsAverage,price,,")])).unwrap();
        assert_eq!(request.sort.len(), 2);
        assert_eq!(request.sort[0].field, "ratingsAverage");
        assert_eq!(request.sort[0].direction, SortDirection::Desc);
        assert_eq!(request.sort[1].direction, SortDirection::Asc);
    }

    #[test]
    fn empty_sort_uses_default() {
        let request = sanitize(params(&[("sort", " , ")])).unwrap();
        assert_eq!(request.sort, vec![SortKey::desc("createdAt")]);
    }

    #[test]
    fn fields_become_include_list() {
        let request = sanitize(params(&[("fields", "name,price, summary")])).unwrap();
        assert_eq!(request.projection, Projection::include(["name", "price", "summary"]));
    }

    #[test]
    fn last_reserved_value_wins() {
        let request = sanitize(params(&[("limit", "3"), ("limit", "7")])).unwrap();
        assert_eq!(request.pagination.limit, 7);
    }

    #[test]
    fn duplicate_filters_are_collapsed() {
        let request = sanitize(params(&[("duration", "5"), ("duration", "5")])).unwrap();
        assert_eq!(request.filters.len(), 1);
    }

    #[test]
    fn field_name_validation() {
        assert!(is_valid_field_name("price"));
        assert!(is_valid_field_name("_id"));
        assert!(is_valid_field_name("startLocation.coordinates"));
        assert!(!is_valid_field_name("startLocation."));
        assert!(!is_valid_field_name("$ne"));
        assert!(!is_valid_field_name("a-b"));
    }
}
