//! Metrics collector using prometheus-client.
//!
//! Tracks request outcomes, same-backend retries, failovers and backend
//! liveness.

use crate::backend::BackendAddress;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Labels for request metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub status: String,
}

/// Labels for per-backend metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    pub backend: String,
}

/// Labels for health check metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HealthCheckLabels {
    pub backend: String,
    pub result: HealthCheckResult,
}

/// Result of a health check.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum HealthCheckResult {
    Success,
    Failure,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    requests_total: Family<RequestLabels, Counter>,
    request_duration_seconds: Histogram,
    forward_retries_total: Family<BackendLabels, Counter>,
    failovers_total: Family<BackendLabels, Counter>,
    /// 1 = alive, 0 = dead.
    backend_alive: Family<BackendLabels, Gauge>,
    health_checks_total: Family<HealthCheckLabels, Counter>,
    registry: Registry,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<RequestLabels, Counter>::default();
        // 1ms .. ~10s
        let request_duration_seconds = Histogram::new(exponential_buckets(0.001, 2.5, 11));
        let forward_retries_total = Family::<BackendLabels, Counter>::default();
        let failovers_total = Family::<BackendLabels, Counter>::default();
        let backend_alive = Family::<BackendLabels, Gauge>::default();
        let health_checks_total = Family::<HealthCheckLabels, Counter>::default();

        registry.register(
            "rrproxy_requests",
            "Total number of client requests answered",
            requests_total.clone(),
        );
        registry.register(
            "rrproxy_request_duration_seconds",
            "Client request duration in seconds, retries included",
            request_duration_seconds.clone(),
        );
        registry.register(
            "rrproxy_forward_retries",
            "Forward attempts repeated against the same backend",
            forward_retries_total.clone(),
        );
        registry.register(
            "rrproxy_failovers",
            "Backends marked dead by request failover",
            failovers_total.clone(),
        );
        registry.register(
            "rrproxy_backend_alive",
            "Backend liveness (1=alive, 0=dead)",
            backend_alive.clone(),
        );
        registry.register(
            "rrproxy_health_checks",
            "Total number of health check probes",
            health_checks_total.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                requests_total,
                request_duration_seconds,
                forward_retries_total,
                failovers_total,
                backend_alive,
                health_checks_total,
                registry,
            }),
        }
    }

    /// Encode every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.inner.registry)?;
        Ok(buffer)
    }

    /// Record a request answered to a client.
    pub fn record_request(&self, status: u16, duration: Duration) {
        self.inner
            .requests_total
            .get_or_create(&RequestLabels {
                status: status.to_string(),
            })
            .inc();
        self.inner
            .request_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Record a forward repeated against the same backend.
    pub fn record_retry(&self, backend: &BackendAddress) {
        self.inner
            .forward_retries_total
            .get_or_create(&backend_labels(backend))
            .inc();
    }

    /// Record a backend being marked dead after exhausting its retries.
    pub fn record_failover(&self, backend: &BackendAddress) {
        let labels = backend_labels(backend);
        self.inner.failovers_total.get_or_create(&labels).inc();
        self.inner.backend_alive.get_or_create(&labels).set(0);
    }

    /// Update backend liveness.
    pub fn set_backend_alive(&self, backend: &BackendAddress, alive: bool) {
        self.inner
            .backend_alive
            .get_or_create(&backend_labels(backend))
            .set(if alive { 1 } else { 0 });
    }

    /// Record a health check result.
    pub fn record_health_check(&self, backend: &BackendAddress, success: bool) {
        let labels = HealthCheckLabels {
            backend: backend.to_string(),
            result: if success {
                HealthCheckResult::Success
            } else {
                HealthCheckResult::Failure
            },
        };
        self.inner.health_checks_total.get_or_create(&labels).inc();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn backend_labels(backend: &BackendAddress) -> BackendLabels {
    BackendLabels {
        backend: backend.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> BackendAddress {
        "http://127.0.0.1:8080".parse().unwrap()
    }

    #[test]
    fn test_record_request() {
        let collector = MetricsCollector::new();
        collector.record_request(200, Duration::from_millis(50));
        collector.record_request(503, Duration::from_millis(5));

        let encoded = collector.encode().unwrap();
        assert!(encoded.contains("rrproxy_requests_total{status=\"200\"} 1"));
        assert!(encoded.contains("rrproxy_requests_total{status=\"503\"} 1"));
        assert!(encoded.contains("rrproxy_request_duration_seconds_count 2"));
    }

    #[test]
    fn test_retry_and_failover() {
        let collector = MetricsCollector::new();
        collector.set_backend_alive(&backend(), true);
        collector.record_retry(&backend());
        collector.record_retry(&backend());
        collector.record_failover(&backend());

        let encoded = collector.encode().unwrap();
        assert!(encoded.contains(
            "rrproxy_forward_retries_total{backend=\"http://127.0.0.1:8080\"} 2"
        ));
        assert!(encoded.contains("rrproxy_failovers_total{backend=\"http://127.0.0.1:8080\"} 1"));
        assert!(encoded.contains("rrproxy_backend_alive{backend=\"http://127.0.0.1:8080\"} 0"));
    }

    #[test]
    fn test_health_check_recording() {
        let collector = MetricsCollector::new();
        collector.record_health_check(&backend(), true);
        collector.record_health_check(&backend(), false);

        let encoded = collector.encode().unwrap();
        assert!(encoded.contains("result=\"Success\""));
        assert!(encoded.contains("result=\"Failure\""));
    }
}
