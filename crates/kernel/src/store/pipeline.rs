//! Aggregation pipelines and in-process predicate evaluation.
//!
//! The comparison rules here follow PostgreSQL `jsonb` semantics so that
//! [`MemoryStore`](super::MemoryStore) and [`PgStore`](super::PgStore)
//! return the same rows for the same query:
//!
//! - `eq` matches when the field equals the value, when the field is an
//!   array containing the value, or when the field is a string whose text
//!   equals the value's text. A missing field never matches.
//! - `ne` is the negation of `eq`, so a missing field matches.
//! - range operators compare only values of the same JSON type.
//! - `in` matches when `eq` matches any member.
//! - ordering across types is Null < String < Number < Boolean < Array < Object,
//!   and a missing field sorts as null.

use std::cmp::Ordering;

use chrono::{DateTime, Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::query::{FilterClause, FilterOperator, FilterValue, SortDirection, SortKey};

/// One aggregation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Keep rows matching every clause.
    Match(Vec<FilterClause>),
    /// Emit one row per element of an array field. Rows where the field is
    /// missing, null or an empty array are dropped.
    Unwind(String),
    Group(GroupStage),
    Sort(Vec<SortKey>),
    Limit(u64),
}

/// Grouping key for a [`GroupStage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    /// All rows fall in one group with a null key.
    Constant,
    /// Group by the value of a field.
    Field(String),
    /// Group by the calendar month (1-12) of a timestamp or date field.
    MonthOf(String),
}

/// Per-group accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accumulator {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
    Push(String),
}

/// Group rows and compute accumulators. Output rows carry the key under
/// `_id` and each accumulator under its output name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStage {
    pub key: GroupKey,
    pub outputs: Vec<(String, Accumulator)>,
}

impl GroupStage {
    pub fn new(key: GroupKey) -> Self {
        Self {
            key,
            outputs: Vec::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, accumulator: Accumulator) -> Self {
        self.outputs.push((name.into(), accumulator));
        self
    }
}

/// Run a pipeline over rows held in memory.
pub fn evaluate(mut rows: Vec<Value>, stages: &[PipelineStage]) -> Vec<Value> {
    for stage in stages {
        rows = match stage {
            PipelineStage::Match(clauses) => rows
                .into_iter()
                .filter(|row| matches(row, clauses))
                .collect(),
            PipelineStage::Unwind(path) => unwind(rows, path),
            PipelineStage::Group(group) => group_rows(rows, group),
            PipelineStage::Sort(keys) => {
                sort_rows(&mut rows, keys);
                rows
            }
            PipelineStage::Limit(n) => {
                rows.truncate(usize::try_from(*n).unwrap_or(usize::MAX));
                rows
            }
        };
    }
    rows
}

/// Resolve a dotted path in a JSON object.
pub fn lookup<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(row, |value, segment| value.as_object()?.get(segment))
}

/// Whether a row satisfies every clause.
pub fn matches(row: &Value, clauses: &[FilterClause]) -> bool {
    clauses.iter().all(|clause| clause_matches(row, clause))
}

fn clause_matches(row: &Value, clause: &FilterClause) -> bool {
    let field = lookup(row, &clause.field);
    match clause.operator {
        FilterOperator::Eq => value_eq(field, &clause.value),
        FilterOperator::Ne => !value_eq(field, &clause.value),
        FilterOperator::In => clause
            .value
            .members()
            .into_iter()
            .any(|member| value_eq(field, member)),
        FilterOperator::Gt => range(field, &clause.value, Ordering::is_gt),
        FilterOperator::Gte => range(field, &clause.value, Ordering::is_ge),
        FilterOperator::Lt => range(field, &clause.value, Ordering::is_lt),
        FilterOperator::Lte => range(field, &clause.value, Ordering::is_le),
    }
}

fn value_eq(field: Option<&Value>, target: &FilterValue) -> bool {
    let Some(field) = field else {
        return false;
    };
    let json = target.to_json();
    let contained = match (field, &json) {
        (Value::Array(items), scalar) if !scalar.is_array() && !scalar.is_object() => {
            items.iter().any(|item| json_eq(item, scalar))
        }
        _ => json_eq(field, &json),
    };
    contained || field.as_str().is_some_and(|s| s == target.to_text())
}

fn range(field: Option<&Value>, target: &FilterValue, accept: fn(Ordering) -> bool) -> bool {
    let Some(field) = field else {
        return false;
    };
    let target = target.to_json();
    if type_rank(field) != type_rank(&target) || field.is_array() || field.is_object() {
        return false;
    }
    accept(compare_json(Some(field), Some(&target)))
}

/// Structural equality with numeric comparison by value (`5 == 5.0`).
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| json_eq(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| json_eq(v, other)))
        }
        _ => a == b,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over optional JSON values; missing sorts as null.
pub fn compare_json(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x.len().cmp(&y.len()).then_with(|| {
            x.iter()
                .zip(y)
                .map(|(a, b)| compare_json(Some(a), Some(b)))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        }),
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()).then_with(|| {
            x.iter()
                .zip(y.iter())
                .map(|((ka, va), (kb, vb))| {
                    ka.cmp(kb).then_with(|| compare_json(Some(va), Some(vb)))
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        }),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Compare two rows by a list of sort keys.
pub fn compare_rows(a: &Value, b: &Value, keys: &[SortKey]) -> Ordering {
    keys.iter()
        .map(|key| {
            let ord = compare_json(lookup(a, &key.field), lookup(b, &key.field));
            match key.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        })
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Stable sort by the given keys.
pub fn sort_rows(rows: &mut [Value], keys: &[SortKey]) {
    rows.sort_by(|a, b| compare_rows(a, b, keys));
}

fn unwind(rows: Vec<Value>, path: &str) -> Vec<Value> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        match lookup(&row, path) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for item in items.clone() {
                    let mut copy = row.clone();
                    replace_at(&mut copy, path, item);
                    out.push(copy);
                }
            }
            Some(_) => out.push(row),
        }
    }
    out
}

fn replace_at(row: &mut Value, path: &str, value: Value) {
    let mut current = row;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        let Some(next) = map.get_mut(segment) else {
            return;
        };
        current = next;
    }
}

/// Calendar month (1-12) of an RFC 3339 timestamp or `YYYY-MM-DD` date.
pub fn month_of(value: &Value) -> Option<u32> {
    let text = value.as_str()?;
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.month())
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d").map(|d| d.month()))
        .ok()
}

struct GroupState {
    key: Value,
    rows: Vec<Value>,
}

fn group_key(row: &Value, key: &GroupKey) -> Value {
    match key {
        GroupKey::Constant => Value::Null,
        GroupKey::Field(path) => lookup(row, path).cloned().unwrap_or(Value::Null),
        GroupKey::MonthOf(path) => lookup(row, path)
            .and_then(month_of)
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}

fn group_rows(rows: Vec<Value>, stage: &GroupStage) -> Vec<Value> {
    // Groups keep first-seen order.
    let mut groups: Vec<GroupState> = Vec::new();
    for row in rows {
        let key = group_key(&row, &stage.key);
        match groups.iter_mut().find(|g| json_eq(&g.key, &key)) {
            Some(group) => group.rows.push(row),
            None => groups.push(GroupState {
                key,
                rows: vec![row],
            }),
        }
    }

    groups
        .into_iter()
        .map(|group| {
            let mut out = Map::new();
            for (name, accumulator) in &stage.outputs {
                out.insert(name.clone(), accumulate(&group.rows, accumulator));
            }
            out.insert("_id".to_string(), group.key);
            Value::Object(out)
        })
        .collect()
}

fn accumulate(rows: &[Value], accumulator: &Accumulator) -> Value {
    let values = |path: &str| -> Vec<&Value> {
        rows.iter()
            .filter_map(|row| lookup(row, path))
            .filter(|v| !v.is_null())
            .collect()
    };
    let numbers = |path: &str| -> Vec<f64> {
        values(path).into_iter().filter_map(Value::as_f64).collect()
    };

    match accumulator {
        Accumulator::Count => Value::from(rows.len()),
        Accumulator::Sum(path) => Value::from(numbers(path).into_iter().sum::<f64>()),
        Accumulator::Avg(path) => {
            let nums = numbers(path);
            if nums.is_empty() {
                Value::Null
            } else {
                Value::from(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        Accumulator::Min(path) => values(path)
            .into_iter()
            .min_by(|a, b| compare_json(Some(a), Some(b)))
            .cloned()
            .unwrap_or(Value::Null),
        Accumulator::Max(path) => values(path)
            .into_iter()
            .max_by(|a, b| compare_json(Some(a), Some(b)))
            .cloned()
            .unwrap_or(Value::Null),
        Accumulator::Push(path) => Value::Array(values(path).into_iter().cloned().collect()),
    }
}
