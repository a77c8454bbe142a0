//! SQL rendering for [`PgStore`](super::PgStore).
//!
//! Documents live in one `documents` table as `(id, collection, body jsonb)`.
//! Field paths are rendered as `body #> '{a,b}'`; only names passing
//! [`is_valid_field_name`] are ever interpolated, and values are inlined by
//! SeaQuery's escaping. A clause that cannot be rendered restricts the result
//! to nothing rather than being dropped.

use sea_query::{
    Alias, Cond, Expr, ExprTrait, LockType, NullOrdering, Order, PostgresQueryBuilder, Query,
    SelectStatement, SimpleExpr,
};
use uuid::Uuid;

use crate::query::{
    ComposedQuery, FilterClause, FilterOperator, FilterValue, QueryStage, SortDirection, SortKey,
    is_valid_field_name,
};

use super::pipeline::{Accumulator, GroupKey, GroupStage};

pub(super) const TABLE: &str = "documents";

/// Longest identifier PostgreSQL keeps without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// JSONB expression for a field path, or `None` if the name is unsafe.
pub(super) fn path_expr(path: &str) -> Option<String> {
    if path == "id" {
        return Some("to_jsonb(id::text)".to_string());
    }
    if !is_valid_field_name(path) {
        return None;
    }
    Some(format!("(body #> '{{{}}}')", path.replace('.', ",")))
}

/// Numeric view of a field: its value for JSON numbers, NULL otherwise.
fn numeric_expr(path: &str) -> Option<String> {
    let p = path_expr(path)?;
    Some(format!(
        "CASE WHEN jsonb_typeof({p}) = 'number' THEN ({p} #>> '{{}}')::float8 END"
    ))
}

fn restrict(field: &str) -> SimpleExpr {
    tracing::error!(field, "unrenderable field in filter; restricting results");
    Expr::cust("FALSE")
}

fn eq_template(p: &str) -> String {
    format!(
        "COALESCE({p} @> $1::jsonb OR (jsonb_typeof({p}) = 'string' AND {p} #>> '{{}}' = $2), FALSE)"
    )
}

fn eq_values(value: &FilterValue) -> [String; 2] {
    [value.to_json().to_string(), value.to_text()]
}

/// Render one filter clause.
pub(super) fn condition(clause: &FilterClause) -> SimpleExpr {
    // Primary-key lookups use the column so the index applies.
    if clause.field == "id"
        && clause.operator == FilterOperator::Eq
        && let FilterValue::String(raw) = &clause.value
        && let Ok(id) = Uuid::parse_str(raw)
    {
        return Expr::col(Alias::new("id")).eq(id);
    }

    let Some(p) = path_expr(&clause.field) else {
        return restrict(&clause.field);
    };

    match clause.operator {
        FilterOperator::Eq => Expr::cust_with_values(eq_template(&p), eq_values(&clause.value)),
        FilterOperator::Ne => Expr::cust_with_values(
            format!("NOT {}", eq_template(&p)),
            eq_values(&clause.value),
        ),
        FilterOperator::In => {
            let members = clause.value.members();
            if members.is_empty() {
                return Expr::cust("FALSE");
            }
            let mut cond = Cond::any();
            for member in members {
                cond = cond.add(Expr::cust_with_values(eq_template(&p), eq_values(member)));
            }
            cond.into()
        }
        FilterOperator::Gt => range(&p, ">", &clause.value),
        FilterOperator::Gte => range(&p, ">=", &clause.value),
        FilterOperator::Lt => range(&p, "<", &clause.value),
        FilterOperator::Lte => range(&p, "<=", &clause.value),
    }
}

fn range(p: &str, op: &str, value: &FilterValue) -> SimpleExpr {
    let json = value.to_json().to_string();
    Expr::cust_with_values(
        format!("(jsonb_typeof({p}) = jsonb_typeof($1::jsonb) AND {p} {op} $2::jsonb)"),
        [json.clone(), json],
    )
}

fn scoped(select: &mut SelectStatement, collection: &str, filters: &[FilterClause]) {
    select
        .from(Alias::new(TABLE))
        .and_where(Expr::col(Alias::new("collection")).eq(collection));
    for clause in filters {
        select.and_where(condition(clause));
    }
}

fn add_sort(select: &mut SelectStatement, keys: &[SortKey]) {
    for key in keys {
        let Some(p) = path_expr(&key.field) else {
            tracing::warn!(field = %key.field, "skipping unrenderable sort key");
            continue;
        };
        // Missing fields sort lowest in both directions' sense.
        let (order, nulls) = match key.direction {
            SortDirection::Asc => (Order::Asc, NullOrdering::First),
            SortDirection::Desc => (Order::Desc, NullOrdering::Last),
        };
        select.order_by_expr_with_nulls(Expr::cust(p), order, nulls);
    }
    select.order_by(Alias::new("id"), Order::Asc);
}

fn wrap_rows(select: &SelectStatement) -> String {
    let inner = select.to_string(PostgresQueryBuilder);
    format!("SELECT row_to_json(t) FROM ({inner}) t")
}

/// Render a composed query. Projection is left to the caller.
pub(super) fn find_sql(query: &ComposedQuery) -> String {
    let mut select = Query::select();
    select.column(Alias::new("id")).column(Alias::new("body"));
    select
        .from(Alias::new(TABLE))
        .and_where(Expr::col(Alias::new("collection")).eq(query.collection()));

    for stage in query.stages() {
        match stage {
            QueryStage::Filter(clauses) => {
                for clause in clauses {
                    select.and_where(condition(clause));
                }
            }
            QueryStage::Sort(keys) => add_sort(&mut select, keys),
            QueryStage::Project(_) => {}
            QueryStage::Paginate(page) => {
                select.limit(page.limit).offset(page.offset);
            }
        }
    }

    wrap_rows(&select)
}

/// Rows matching `filters`, in id order.
pub(super) fn match_sql(collection: &str, filters: &[FilterClause]) -> String {
    let mut select = Query::select();
    select.column(Alias::new("id")).column(Alias::new("body"));
    scoped(&mut select, collection, filters);
    select.order_by(Alias::new("id"), Order::Asc);
    wrap_rows(&select)
}

/// Ids matching `filters`, locked for update.
pub(super) fn lock_ids_sql(collection: &str, filters: &[FilterClause]) -> String {
    let mut select = Query::select();
    select.column(Alias::new("id"));
    scoped(&mut select, collection, filters);
    select
        .order_by(Alias::new("id"), Order::Asc)
        .lock(LockType::Update);
    select.to_string(PostgresQueryBuilder)
}

pub(super) fn delete_sql(collection: &str, filters: &[FilterClause]) -> String {
    let mut delete = Query::delete();
    delete
        .from_table(Alias::new(TABLE))
        .and_where(Expr::col(Alias::new("collection")).eq(collection));
    for clause in filters {
        delete.and_where(condition(clause));
    }
    delete.to_string(PostgresQueryBuilder)
}

/// Render a group stage as SQL when every part of it can be pushed down.
///
/// Returns `None` for month keys and min/max/push accumulators, which the
/// caller evaluates in process instead.
pub(super) fn group_sql(
    collection: &str,
    filters: &[FilterClause],
    group: &GroupStage,
) -> Option<String> {
    let key = match &group.key {
        GroupKey::Constant => None,
        GroupKey::Field(path) => Some(path_expr(path)?),
        GroupKey::MonthOf(_) => return None,
    };

    let mut pairs = vec![format!("'_id', {}", key.as_deref().unwrap_or("NULL"))];
    for (name, accumulator) in &group.outputs {
        if !is_valid_field_name(name) || name.contains('.') {
            return None;
        }
        let value = match accumulator {
            Accumulator::Count => "count(*)".to_string(),
            Accumulator::Sum(path) => format!("COALESCE(sum({}), 0)", numeric_expr(path)?),
            Accumulator::Avg(path) => format!("avg({})", numeric_expr(path)?),
            Accumulator::Min(_) | Accumulator::Max(_) | Accumulator::Push(_) => return None,
        };
        pairs.push(format!("'{name}', {value}"));
    }

    let mut select = Query::select();
    select.expr(Expr::cust(format!("jsonb_build_object({})", pairs.join(", "))));
    scoped(&mut select, collection, filters);
    if let Some(key) = key {
        select.add_group_by([Expr::cust(key)]);
    }
    // An ungrouped aggregate over no rows still yields one row; drop it.
    select.and_having(Expr::cust("count(*) > 0"));
    Some(select.to_string(PostgresQueryBuilder))
}

/// Name and DDL of a partial unique index over `fields` in `collection`.
///
/// The index only covers rows where every field is present and not null.
pub(super) fn unique_index_sql(collection: &str, fields: &[&str]) -> Option<(String, String)> {
    if fields.is_empty() || !is_valid_field_name(collection) || collection.contains('.') {
        return None;
    }
    let paths = fields
        .iter()
        .map(|f| path_expr(f).filter(|_| *f != "id"))
        .collect::<Option<Vec<_>>>()?;

    let mut name = format!(
        "{TABLE}_{collection}_{}_key",
        fields.join("_").replace('.', "_")
    )
    .to_lowercase();
    name.truncate(MAX_IDENTIFIER_LEN);

    let columns = paths
        .iter()
        .map(|p| format!("({p})"))
        .collect::<Vec<_>>()
        .join(", ");
    let predicate = paths
        .iter()
        .map(|p| format!("jsonb_typeof({p}) <> 'null'"))
        .collect::<Vec<_>>()
        .join(" AND ");

    let ddl = format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {name} ON {TABLE} ({columns}) \
         WHERE collection = '{collection}' AND {predicate}"
    );
    Some((name, ddl))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::{Pagination, Projection, QueryBuilder, RetrievalRequest};
    use crate::store::CollectionHandle;

    const TOURS: CollectionHandle = CollectionHandle {
        name: "tours",
        protected_fields: &[],
    };

    fn render(clause: FilterClause) -> String {
        let mut select = Query::select();
        select.column(Alias::new("id")).and_where(condition(&clause));
        select.to_string(PostgresQueryBuilder)
    }

    #[test]
    fn paths_are_rendered_as_jsonb_paths() {
        assert_eq!(path_expr("price").unwrap(), "(body #> '{price}')");
        assert_eq!(
            path_expr("startLocation.address").unwrap(),
            "(body #> '{startLocation,address}')"
        );
        assert!(path_expr("x'); DROP TABLE documents; --").is_none());
    }

    #[test]
    fn find_renders_stages() {
        let request = RetrievalRequest {
            filters: vec![FilterClause::new(
                "price",
                FilterOperator::Gte,
                FilterValue::Integer(500),
            )],
            sort: vec![SortKey::desc("ratingsAverage")],
            projection: Projection::default(),
            pagination: Pagination::for_page(3, 10),
        };
        let sql = find_sql(&QueryBuilder::build(&TOURS, request));

        assert!(sql.starts_with("SELECT row_to_json(t) FROM ("));
        assert!(sql.contains("\"collection\" = 'tours'"));
        assert!(sql.contains("(body #> '{price}') >= '500'::jsonb"));
        assert!(sql.contains("ORDER BY (body #> '{ratingsAverage}') DESC NULLS LAST"));
        assert!(sql.contains("LIMIT 10"));
        assert!(sql.contains("OFFSET 20"));
    }

    #[test]
    fn string_values_are_escaped() {
        let sql = render(FilterClause::eq("name", "it's"));
        assert!(sql.contains("it''s") || sql.contains("it\\'s"));
        assert!(!sql.contains("it's'"));
    }

    #[test]
    fn ne_is_negated_eq() {
        let sql = render(FilterClause::new(
            "secretTour",
            FilterOperator::Ne,
            FilterValue::Boolean(true),
        ));
        assert!(sql.contains("NOT COALESCE((body #> '{secretTour}') @> 'true'::jsonb"));
    }

    #[test]
    fn id_equality_uses_column() {
        let id = Uuid::nil();
        let sql = render(FilterClause::eq("id", id.to_string().as_str()));
        assert!(sql.contains("\"id\" = '00000000-0000-0000-0000-000000000000'"));
    }

    #[test]
    fn empty_in_list_restricts() {
        let sql = render(FilterClause::new(
            "difficulty",
            FilterOperator::In,
            FilterValue::List(Vec::new()),
        ));
        assert!(sql.contains("FALSE"));
    }

    #[test]
    fn invalid_field_restricts() {
        let sql = render(FilterClause::eq("bad name", "x"));
        assert!(sql.contains("FALSE"));
    }

    #[test]
    fn group_pushdown() {
        let group = GroupStage::new(GroupKey::Constant)
            .with("nRating", Accumulator::Count)
            .with("avgRating", Accumulator::Avg("rating".into()));
        let sql = group_sql("reviews", &[FilterClause::eq("tour", "t")], &group).unwrap();
        assert!(sql.contains("jsonb_build_object('_id', NULL, 'nRating', count(*), 'avgRating', avg("));
        assert!(sql.contains("HAVING count(*) > 0"));
        assert!(!sql.contains("GROUP BY"));

        let keyed = GroupStage::new(GroupKey::Field("difficulty".into()))
            .with("numTours", Accumulator::Count);
        let sql = group_sql("tours", &[], &keyed).unwrap();
        assert!(sql.contains("GROUP BY (body #> '{difficulty}')"));
    }

    #[test]
    fn group_without_pushdown() {
        let month = GroupStage::new(GroupKey::MonthOf("startDates".into()))
            .with("n", Accumulator::Count);
        assert!(group_sql("tours", &[], &month).is_none());
        let push = GroupStage::new(GroupKey::Constant).with("names", Accumulator::Push("name".into()));
        assert!(group_sql("tours", &[], &push).is_none());
    }

    #[test]
    fn unique_index_ddl() {
        let (name, ddl) = unique_index_sql("reviews", &["tour", "user"]).unwrap();
        assert_eq!(name, "documents_reviews_tour_user_key");
        assert!(ddl.contains("((body #> '{tour}')), ((body #> '{user}'))"));
        assert!(ddl.contains("WHERE collection = 'reviews'"));
        assert!(unique_index_sql("reviews", &[]).is_none());
        assert!(unique_index_sql("bad'name", &["x"]).is_none());
    }
}
