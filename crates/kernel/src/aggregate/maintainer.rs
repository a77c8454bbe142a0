//! Rating summary maintenance.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::content::EntityKind;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::query::FilterClause;
use crate::store::{
    Accumulator, DocumentPatch, DocumentStore, GroupKey, GroupStage, PipelineStage,
};

/// Number of reviews, stored on the tour.
pub const RATINGS_QUANTITY: &str = "ratingsQuantity";

/// Mean review rating, stored on the tour.
pub const RATINGS_AVERAGE: &str = "ratingsAverage";

/// Average shown for a tour with no reviews.
pub const DEFAULT_RATINGS_AVERAGE: f64 = 4.5;

/// Field on a review naming its tour.
pub const PARENT_REF: &str = "tour";

/// Field on a review holding its rating.
pub const RATING: &str = "rating";

/// A tour's derived review summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateSummary {
    pub count: u64,
    pub average: f64,
}

impl AggregateSummary {
    /// Summary of a tour without reviews.
    pub const EMPTY: AggregateSummary = AggregateSummary {
        count: 0,
        average: DEFAULT_RATINGS_AVERAGE,
    };

    /// Read the summary off an aggregation row.
    fn from_row(row: Option<&Value>) -> Self {
        let count = row
            .and_then(|r| r.get("nRating"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        match row.and_then(|r| r.get("avgRating")).and_then(Value::as_f64) {
            Some(average) if count > 0 => Self { count, average },
            _ => Self::EMPTY,
        }
    }

    fn to_patch(self) -> DocumentPatch {
        DocumentPatch::new()
            .with(RATINGS_QUANTITY, self.count)
            .with(RATINGS_AVERAGE, self.average)
    }
}

/// Keeps `ratingsQuantity` and `ratingsAverage` on each tour equal to a
/// fresh aggregation over its reviews.
///
/// The summary is always overwritten, never adjusted by a delta, so a
/// duplicated or missed event cannot make it drift. Parents whose
/// recomputation fails are queued for the reconciliation sweep.
///
/// Queue entries carry the sequence number of the failure. A later success
/// clears an entry only if that entry predates the start of the successful
/// run, so an overlapping run that read fewer reviews cannot discard it.
pub struct AggregateMaintainer {
    store: Arc<dyn DocumentStore>,
    metrics: Arc<Metrics>,
    pending: DashMap<Uuid, u64>,
    sequence: AtomicU64,
}

impl AggregateMaintainer {
    pub fn new(store: Arc<dyn DocumentStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            metrics,
            pending: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// The grouped aggregation computing one tour's summary.
    pub fn summary_pipeline(parent: Uuid) -> Vec<PipelineStage> {
        vec![
            PipelineStage::Match(vec![FilterClause::eq(
                PARENT_REF,
                parent.to_string().as_str(),
            )]),
            PipelineStage::Group(
                GroupStage::new(GroupKey::Constant)
                    .with("nRating", Accumulator::Count)
                    .with("avgRating", Accumulator::Avg(RATING.to_string())),
            ),
        ]
    }

    /// Recompute and store one tour's summary.
    ///
    /// A tour that no longer exists is not an error; the computed summary
    /// is returned either way.
    pub async fn recompute(&self, parent: Uuid) -> AppResult<AggregateSummary> {
        let reviews = EntityKind::Review.collection().name;
        let tours = EntityKind::Tour.collection().name;

        let rows = self
            .store
            .aggregate(reviews, &Self::summary_pipeline(parent))
            .await
            .map_err(|e| AppError::store("aggregate reviews", e))?;
        let summary = AggregateSummary::from_row(rows.first());

        let updated = self
            .store
            .update(tours, parent, &summary.to_patch())
            .await
            .map_err(|e| AppError::store("update tour summary", e))?;
        if updated.is_none() {
            debug!(tour_id = %parent, "summary computed for a missing tour");
        }

        debug!(
            tour_id = %parent,
            count = summary.count,
            average = summary.average,
            "rating summary recomputed"
        );
        Ok(summary)
    }

    /// React to a committed review write.
    ///
    /// The recomputation runs in its own task and is awaited, so the caller
    /// sees a fresh summary but cannot cancel the work by going away.
    /// Failures never reach the caller: they are logged and the tour is
    /// queued for reconciliation.
    pub async fn on_child_changed(self: &Arc<Self>, parent: Uuid) {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.recompute_or_enqueue(parent).await });
        if let Err(e) = task.await {
            error!(tour_id = %parent, error = %e, "rating summary task aborted");
            self.enqueue(parent);
        }
    }

    /// [`on_child_changed`](Self::on_child_changed) for each distinct parent.
    pub async fn on_children_changed<I>(self: &Arc<Self>, parents: I)
    where
        I: IntoIterator<Item = Uuid>,
    {
        let parents: BTreeSet<Uuid> = parents.into_iter().collect();
        for parent in parents {
            self.on_child_changed(parent).await;
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    pub(super) async fn recompute_or_enqueue(&self, parent: Uuid) -> bool {
        let started = self.next_sequence();
        match self.recompute(parent).await {
            Ok(_) => {
                self.metrics.record_recompute(true);
                if self
                    .pending
                    .remove_if(&parent, |_, queued| *queued < started)
                    .is_some()
                {
                    info!(tour_id = %parent, "stale rating summary repaired");
                    self.metrics.set_reconcile_pending(self.pending.len());
                }
                true
            }
            Err(source) => {
                self.metrics.record_recompute(false);
                let err = AppError::ConsistencyRecompute {
                    parent,
                    source: Box::new(source),
                };
                error!(
                    tour_id = %parent,
                    error = %err,
                    source = ?std::error::Error::source(&err),
                    "rating summary left stale; queued for reconciliation"
                );
                self.enqueue(parent);
                false
            }
        }
    }

    fn enqueue(&self, parent: Uuid) {
        let queued = self.next_sequence();
        self.pending.insert(parent, queued);
        self.metrics.set_reconcile_pending(self.pending.len());
    }

    /// Tours waiting for reconciliation.
    pub fn pending(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.pending.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub(super) fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }
}

impl std::fmt::Debug for AggregateMaintainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateMaintainer")
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{Document, MemoryStore};
    use serde_json::{Map, json};

    fn object(value: Value) -> Map<String, Value> {
        let Value::Object(map) = value else {
            panic!("expected object")
        };
        map
    }

    async fn setup() -> (Arc<MemoryStore>, Arc<AggregateMaintainer>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let tour = store
            .insert("tours", Document::new(object(json!({ "name": "Forest Hiker" }))))
            .await
            .unwrap();
        let maintainer = Arc::new(AggregateMaintainer::new(
            store.clone(),
            Arc::new(Metrics::new()),
        ));
        (store, maintainer, tour.id)
    }

    async fn add_review(store: &MemoryStore, tour: Uuid, rating: i64) -> Uuid {
        store
            .insert(
                "reviews",
                Document::new(object(json!({
                    "review": "fine",
                    "rating": rating,
                    "tour": tour.to_string(),
                    "user": Uuid::now_v7().to_string(),
                }))),
            )
            .await
            .unwrap()
            .id
    }

    async fn stored_summary(store: &MemoryStore, tour: Uuid) -> (u64, f64) {
        let doc = store.get("tours", tour).await.unwrap().unwrap();
        (
            doc.get(RATINGS_QUANTITY).and_then(Value::as_u64).unwrap(),
            doc.get_f64(RATINGS_AVERAGE).unwrap(),
        )
    }

    #[tokio::test]
    async fn no_reviews_gives_defaults() {
        let (store, maintainer, tour) = setup().await;
        let summary = maintainer.recompute(tour).await.unwrap();
        assert_eq!(summary, AggregateSummary::EMPTY);
        assert_eq!(stored_summary(&store, tour).await, (0, 4.5));
    }

    #[tokio::test]
    async fn recompute_is_a_full_mean() {
        let (store, maintainer, tour) = setup().await;
        add_review(&store, tour, 5).await;
        add_review(&store, tour, 3).await;
        add_review(&store, Uuid::now_v7(), 1).await;

        let summary = maintainer.recompute(tour).await.unwrap();
        assert_eq!(summary.count, 2);
        assert!((summary.average - 4.0).abs() < 1e-9);
        assert_eq!(stored_summary(&store, tour).await, (2, 4.0));
    }

    #[tokio::test]
    async fn recompute_is_idempotent() {
        let (store, maintainer, tour) = setup().await;
        add_review(&store, tour, 4).await;
        add_review(&store, tour, 1).await;
        let first = maintainer.recompute(tour).await.unwrap();
        let second = maintainer.recompute(tour).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_tour_is_not_an_error() {
        let (_, maintainer, _) = setup().await;
        assert_eq!(
            maintainer.recompute(Uuid::now_v7()).await.unwrap(),
            AggregateSummary::EMPTY
        );
    }

    #[tokio::test]
    async fn failures_are_queued_not_raised() {
        let (store, maintainer, tour) = setup().await;
        add_review(&store, tour, 5).await;
        store.fail_writes_to("tours");

        maintainer.on_child_changed(tour).await;
        assert_eq!(maintainer.pending(), vec![tour]);

        store.clear_faults();
        maintainer.on_child_changed(tour).await;
        assert!(maintainer.pending().is_empty());
        assert_eq!(stored_summary(&store, tour).await, (1, 5.0));
    }

    #[test]
    fn summary_from_rows() {
        assert_eq!(AggregateSummary::from_row(None), AggregateSummary::EMPTY);
        let row = json!({ "_id": null, "nRating": 0, "avgRating": null });
        assert_eq!(AggregateSummary::from_row(Some(&row)), AggregateSummary::EMPTY);
        let row = json!({ "_id": null, "nRating": 3, "avgRating": 3.5 });
        assert_eq!(
            AggregateSummary::from_row(Some(&row)),
            AggregateSummary {
                count: 3,
                average: 3.5
            }
        );
    }
}
