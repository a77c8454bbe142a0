//! Reconciliation of stale rating summaries.
//!
//! A background task periodically retries every tour whose recomputation
//! failed. An administrator can also request a full sweep that recomputes
//! every tour.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::content::EntityKind;
use crate::error::{AppError, AppResult};

use super::AggregateMaintainer;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub attempted: usize,
    pub repaired: usize,
    pub still_pending: usize,
}

impl AggregateMaintainer {
    /// Retry every queued tour once.
    pub async fn drain_pending(&self) -> ReconcileReport {
        let queued = self.pending();
        let mut report = ReconcileReport {
            attempted: queued.len(),
            ..ReconcileReport::default()
        };
        for parent in queued {
            if self.recompute_or_enqueue(parent).await {
                report.repaired += 1;
            }
        }
        report.still_pending = self.pending().len();
        report
    }

    /// Recompute the summary of every tour.
    pub async fn full_sweep(&self) -> AppResult<ReconcileReport> {
        let tours = EntityKind::Tour.collection().name;
        let rows = self
            .store()
            .aggregate(tours, &[])
            .await
            .map_err(|e| AppError::store("list tours", e))?;
        let ids: Vec<Uuid> = rows
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_str))
            .filter_map(|id| Uuid::parse_str(id).ok())
            .collect();

        let mut report = ReconcileReport {
            attempted: ids.len(),
            ..ReconcileReport::default()
        };
        for parent in ids {
            if self.recompute_or_enqueue(parent).await {
                report.repaired += 1;
            }
        }
        report.still_pending = self.pending().len();
        info!(
            attempted = report.attempted,
            still_pending = report.still_pending,
            "full rating summary sweep finished"
        );
        Ok(report)
    }
}

/// Handle to the background reconciler.
pub struct Reconciler {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Reconciler {
    /// Spawn the periodic sweep. Returns `None` when `period` is zero.
    pub fn spawn(maintainer: Arc<AggregateMaintainer>, period: Duration) -> Option<Self> {
        if period.is_zero() {
            info!("rating summary reconciliation disabled");
            return None;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_reconciler(maintainer, period, stop_rx));
        Some(Self { stop_tx, handle })
    }

    /// Stop the task and wait for the pass in progress to finish.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "reconciler task ended abnormally");
        }
    }
}

async fn run_reconciler(
    maintainer: Arc<AggregateMaintainer>,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if maintainer.pending().is_empty() {
                    continue;
                }
                let report = maintainer.drain_pending().await;
                if report.still_pending > 0 {
                    warn!(
                        attempted = report.attempted,
                        still_pending = report.still_pending,
                        "rating summaries still stale after reconciliation"
                    );
                } else {
                    info!(repaired = report.repaired, "rating summaries reconciled");
                }
            }
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    debug!("reconciler stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::aggregate::{RATINGS_AVERAGE, RATINGS_QUANTITY};
    use crate::metrics::Metrics;
    use crate::store::{Document, DocumentStore, MemoryStore};
    use serde_json::json;

    fn tour_doc() -> Document {
        let Value::Object(map) = json!({ "name": "Sea Explorer" }) else {
            unreachable!()
        };
        Document::new(map)
    }

    #[tokio::test]
    async fn drain_repairs_queued_tours() {
        let store = Arc::new(MemoryStore::new());
        let tour = store.insert("tours", tour_doc()).await.unwrap().id;
        let maintainer = Arc::new(AggregateMaintainer::new(store.clone(), Arc::new(Metrics::new())));

        store.fail_writes_to("tours");
        maintainer.on_child_changed(tour).await;
        assert_eq!(maintainer.drain_pending().await.still_pending, 1);

        store.clear_faults();
        let report = maintainer.drain_pending().await;
        assert_eq!(
            report,
            ReconcileReport {
                attempted: 1,
                repaired: 1,
                still_pending: 0
            }
        );
    }

    #[tokio::test]
    async fn full_sweep_overwrites_tampered_summaries() {
        let store = Arc::new(MemoryStore::new());
        let mut doc = tour_doc();
        doc.set(RATINGS_QUANTITY, json!(99));
        doc.set(RATINGS_AVERAGE, json!(1.0));
        let tour = store.insert("tours", doc).await.unwrap().id;
        let maintainer = AggregateMaintainer::new(store.clone(), Arc::new(Metrics::new()));

        let report = maintainer.full_sweep().await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.repaired, 1);

        let doc = store.get("tours", tour).await.unwrap().unwrap();
        assert_eq!(doc.get(RATINGS_QUANTITY), Some(&json!(0)));
        assert_eq!(doc.get_f64(RATINGS_AVERAGE), Some(4.5));
    }

    #[tokio::test]
    async fn zero_period_disables_the_task() {
        let maintainer = Arc::new(AggregateMaintainer::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Metrics::new()),
        ));
        assert!(Reconciler::spawn(maintainer.clone(), Duration::ZERO).is_none());

        let reconciler = Reconciler::spawn(maintainer, Duration::from_secs(60)).unwrap();
        reconciler.shutdown().await;
    }
}
