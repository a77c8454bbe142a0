//! Derived rating summaries on tours.
//!
//! - [`AggregateMaintainer`]: recomputes a tour's summary after review writes
//! - [`Reconciler`]: background retry of summaries left stale by failures

mod maintainer;
mod reconcile;

pub use maintainer::{
    AggregateMaintainer, AggregateSummary, DEFAULT_RATINGS_AVERAGE, PARENT_REF, RATING,
    RATINGS_AVERAGE, RATINGS_QUANTITY,
};
pub use reconcile::{ReconcileReport, Reconciler};
