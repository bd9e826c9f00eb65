use crate::error::{GuardError, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Create a new metrics service, installing the global recorder.
    ///
    /// Only one recorder can be installed per process.
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            GuardError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        describe_counter!(
            "admission_guard_decisions_total",
            "Admission decisions by identity kind and outcome"
        );
        describe_counter!(
            "admission_guard_store_errors_total",
            "Admission checks that failed before a decision was reached"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

/// Record an admission decision
pub fn record_decision(identity: &str, allowed: bool) {
    let labels = [
        ("identity", identity.to_string()),
        ("outcome", outcome_label(allowed).to_string()),
    ];
    counter!("admission_guard_decisions_total", &labels).increment(1);
}

/// Record a check that failed in the counter store
pub fn record_store_error(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!("admission_guard_store_errors_total", &labels).increment(1);
}

fn outcome_label(allowed: bool) -> &'static str {
    if allowed {
        "admitted"
    } else {
        "rejected"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_label() {
        assert_eq!(outcome_label(true), "admitted");
        assert_eq!(outcome_label(false), "rejected");
    }

    #[test]
    fn test_record_functions_dont_panic() {
        // These functions should not panic even if recorder isn't installed
        record_decision("ip", true);
        record_decision("token", false);
        record_store_error("store_unavailable");
        record_store_error("cancelled");
    }
}
