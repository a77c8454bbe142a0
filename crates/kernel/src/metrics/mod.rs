//! Prometheus metrics.

use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// HTTP request labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: String,
    pub path: String,
    pub status: u16,
}

/// Retrieval labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EntityLabels {
    pub entity: String,
}

/// Application metrics.
pub struct Metrics {
    registry: Registry,

    /// HTTP request counter by method/path/status.
    pub http_requests: Family<HttpLabels, Counter>,

    pub http_duration_seconds: Family<HttpLabels, Histogram>,

    /// Retrieval duration per entity, fed by the post-retrieve timing hook.
    pub retrieval_duration_seconds: Family<EntityLabels, Histogram>,

    pub aggregate_recomputes: Counter,

    pub aggregate_recompute_failures: Counter,

    /// Parents waiting for the reconciliation sweep.
    pub reconcile_pending: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_requests = Family::<HttpLabels, Counter>::default();
        registry.register(
            "http_requests_total",
            "Total HTTP requests",
            http_requests.clone(),
        );

        let http_duration_seconds = Family::<HttpLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 12))
        });
        registry.register(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_duration_seconds.clone(),
        );

        let retrieval_duration_seconds =
            Family::<EntityLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.0001, 2.0, 14))
            });
        registry.register(
            "retrieval_duration_seconds",
            "Retrieval duration in seconds",
            retrieval_duration_seconds.clone(),
        );

        let aggregate_recomputes = Counter::default();
        registry.register(
            "aggregate_recomputes_total",
            "Rating summary recomputations",
            aggregate_recomputes.clone(),
        );

        let aggregate_recompute_failures = Counter::default();
        registry.register(
            "aggregate_recompute_failures_total",
            "Rating summary recomputations that failed",
            aggregate_recompute_failures.clone(),
        );

        let reconcile_pending = Gauge::default();
        registry.register(
            "reconcile_pending",
            "Tours queued for reconciliation",
            reconcile_pending.clone(),
        );

        Self {
            registry,
            http_requests,
            http_duration_seconds,
            retrieval_duration_seconds,
            aggregate_recomputes,
            aggregate_recompute_failures,
            reconcile_pending,
        }
    }

    /// Record an HTTP request.
    pub fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = HttpLabels {
            method: method.to_string(),
            path: normalize_path(path),
            status,
        };

        self.http_requests.get_or_create(&labels).inc();
        self.http_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_retrieval(&self, entity: &str, duration_secs: f64) {
        let labels = EntityLabels {
            entity: entity.to_string(),
        };
        self.retrieval_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_recompute(&self, ok: bool) {
        self.aggregate_recomputes.inc();
        if !ok {
            self.aggregate_recompute_failures.inc();
        }
    }

    pub fn set_reconcile_pending(&self, pending: usize) {
        self.reconcile_pending
            .set(i64::try_from(pending).unwrap_or(i64::MAX));
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        // Writing into a String cannot fail.
        #[allow(clippy::expect_used)]
        encode(&mut buffer, &self.registry).expect("encoding metrics");
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish()
    }
}

/// Replace id segments with `{id}` to bound label cardinality.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|s| {
            if uuid::Uuid::parse_str(s).is_ok()
                || (!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
                || (s.len() >= 32 && s.chars().all(|c| c.is_ascii_hexdigit()))
            {
                "{id}"
            } else {
                s
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_normalized() {
        assert_eq!(normalize_path("/api/v1/tours/monthly-plan/2021"), "/api/v1/tours/monthly-plan/{id}");
        assert_eq!(
            normalize_path("/api/v1/tours/550e8400-e29b-41d4-a716-446655440000"),
            "/api/v1/tours/{id}"
        );
        assert_eq!(normalize_path("/api/v1/reviews"), "/api/v1/reviews");
        assert_eq!(
            normalize_path(&format!("/api/v1/users/reset-password/{}", "ab".repeat(32))),
            "/api/v1/users/reset-password/{id}"
        );
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn recompute_counters() {
        let metrics = Metrics::new();
        metrics.record_recompute(true);
        metrics.record_recompute(false);
        assert_eq!(metrics.aggregate_recomputes.get(), 2);
        assert_eq!(metrics.aggregate_recompute_failures.get(), 1);

        let output = metrics.encode();
        assert!(output.contains("aggregate_recomputes_total"));
        assert!(output.contains("reconcile_pending"));
    }

    #[test]
    fn retrieval_histogram_is_labelled() {
        let metrics = Metrics::new();
        metrics.record_retrieval("tours", 0.002);
        assert!(metrics.encode().contains("entity=\"tours\""));
    }
}
