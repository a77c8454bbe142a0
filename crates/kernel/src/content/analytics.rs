//! Tour analytics.

use serde_json::Value;

use crate::aggregate::{DEFAULT_RATINGS_AVERAGE, RATINGS_AVERAGE, RATINGS_QUANTITY};
use crate::auth::{Action, Principal};
use crate::error::{AppResult, ValidationError};
use crate::hooks::OperationKind;
use crate::query::{FilterClause, FilterOperator, FilterValue, SortKey};
use crate::store::{Accumulator, GroupKey, GroupStage, PipelineStage};

use super::{DocumentService, EntityKind};

/// Raw parameters applied by the top-5-cheap alias.
pub const TOP_FIVE_CHEAP: [(&str, &str); 3] = [
    ("limit", "5"),
    ("sort", "-ratingsAverage,price"),
    ("fields", "name,price,summary"),
];

/// Merge the top-5-cheap preset over the caller's parameters.
///
/// The preset replaces any caller value for its keys; other parameters,
/// such as filters or `page`, are kept.
pub fn top_five_cheap(params: &[(String, String)]) -> Vec<(String, String)> {
    params
        .iter()
        .filter(|(key, _)| !TOP_FIVE_CHEAP.iter().any(|(preset, _)| preset == key))
        .cloned()
        .chain(
            TOP_FIVE_CHEAP
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
        .collect()
}

/// Stats per difficulty over well-rated tours.
pub fn tour_stats_pipeline() -> Vec<PipelineStage> {
    vec![
        PipelineStage::Match(vec![FilterClause::new(
            RATINGS_AVERAGE,
            FilterOperator::Gte,
            FilterValue::Float(DEFAULT_RATINGS_AVERAGE),
        )]),
        PipelineStage::Group(
            GroupStage::new(GroupKey::Field("difficulty".to_string()))
                .with("numTours", Accumulator::Count)
                .with("numRatings", Accumulator::Sum(RATINGS_QUANTITY.to_string()))
                .with("avgRating", Accumulator::Avg(RATINGS_AVERAGE.to_string()))
                .with("avgPrice", Accumulator::Avg("price".to_string()))
                .with("minPrice", Accumulator::Min("price".to_string()))
                .with("maxPrice", Accumulator::Max("price".to_string())),
        ),
        PipelineStage::Sort(vec![SortKey::asc("avgPrice")]),
    ]
}

/// Tour starts per month of `year`, busiest month first.
pub fn monthly_plan_pipeline(year: i32) -> Vec<PipelineStage> {
    vec![
        PipelineStage::Unwind("startDates".to_string()),
        PipelineStage::Match(vec![
            FilterClause::new(
                "startDates",
                FilterOperator::Gte,
                FilterValue::String(format!("{year:04}-01-01")),
            ),
            FilterClause::new(
                "startDates",
                FilterOperator::Lt,
                FilterValue::String(format!("{:04}-01-01", year + 1)),
            ),
        ]),
        PipelineStage::Group(
            GroupStage::new(GroupKey::MonthOf("startDates".to_string()))
                .with("numTourStarts", Accumulator::Count)
                .with("tours", Accumulator::Push("name".to_string())),
        ),
        PipelineStage::Sort(vec![SortKey::desc("numTourStarts"), SortKey::asc("_id")]),
        PipelineStage::Limit(12),
    ]
}

/// Rename the group key `_id` to `field`.
fn rename_key(rows: Vec<Value>, field: &str) -> Vec<Value> {
    rows.into_iter()
        .map(|mut row| {
            if let Some(map) = row.as_object_mut()
                && let Some(key) = map.remove("_id")
            {
                map.insert(field.to_string(), key);
            }
            row
        })
        .collect()
}

impl DocumentService {
    /// Price and rating statistics per difficulty.
    pub async fn tour_stats(&self, actor: Option<&Principal>) -> AppResult<Vec<Value>> {
        let kind = EntityKind::Tour;
        self.authorize(actor, Action::Read, kind)?;
        let ctx = self.context(OperationKind::Aggregate, kind, actor);
        let rows = self.run_pipeline(kind, &ctx, tour_stats_pipeline()).await?;
        Ok(rename_key(rows, "difficulty"))
    }

    /// Number of tour starts and tour names per month of `year`.
    pub async fn monthly_plan(
        &self,
        actor: Option<&Principal>,
        year: i32,
    ) -> AppResult<Vec<Value>> {
        let kind = EntityKind::Tour;
        self.authorize(actor, Action::Read, kind)?;
        if !(1..=9998).contains(&year) {
            return Err(
                ValidationError::InvalidDocument(format!("'{year}' is not a valid year")).into(),
            );
        }
        let ctx = self.context(OperationKind::Aggregate, kind, actor);
        let rows = self
            .run_pipeline(kind, &ctx, monthly_plan_pipeline(year))
            .await?;
        Ok(rename_key(rows, "month"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::pipeline::evaluate;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn preset_replaces_caller_values() {
        let merged = top_five_cheap(&params(&[
            ("limit", "50"),
            ("difficulty", "easy"),
            ("sort", "name"),
        ]));
        assert_eq!(
            merged,
            params(&[
                ("difficulty", "easy"),
                ("limit", "5"),
                ("sort", "-ratingsAverage,price"),
                ("fields", "name,price,summary"),
            ])
        );
    }

    #[test]
    fn stats_group_by_difficulty() {
        let rows = vec![
            json!({ "difficulty": "easy", "price": 397, "ratingsAverage": 4.7, "ratingsQuantity": 37 }),
            json!({ "difficulty": "easy", "price": 497, "ratingsAverage": 4.8, "ratingsQuantity": 23 }),
            json!({ "difficulty": "difficult", "price": 997, "ratingsAverage": 4.6, "ratingsQuantity": 6 }),
            json!({ "difficulty": "medium", "price": 1197, "ratingsAverage": 3.9, "ratingsQuantity": 1 }),
        ];
        let out = rename_key(evaluate(rows, &tour_stats_pipeline()), "difficulty");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["difficulty"], json!("easy"));
        assert_eq!(out[0]["numTours"], json!(2));
        assert_eq!(out[0]["avgPrice"], json!(447.0));
        assert_eq!(out[0]["minPrice"], json!(397));
        assert_eq!(out[1]["difficulty"], json!("difficult"));
    }

    #[test]
    fn plan_counts_starts_per_month() {
        let rows = vec![
            json!({ "name": "A", "startDates": ["2021-06-19T09:00:00Z", "2021-07-20T09:00:00Z", "2022-06-01T09:00:00Z"] }),
            json!({ "name": "B", "startDates": ["2021-07-05T09:00:00Z"] }),
            json!({ "name": "C", "startDates": [] }),
        ];
        let out = rename_key(evaluate(rows, &monthly_plan_pipeline(2021)), "month");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["month"], json!(7));
        assert_eq!(out[0]["numTourStarts"], json!(2));
        assert_eq!(out[0]["tours"], json!(["A", "B"]));
        assert_eq!(out[1]["month"], json!(6));
    }
}
