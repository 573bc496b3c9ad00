//! Metrics collection and exposition.
//!
//! # Metrics
//! - `messaging_requests_total` (counter): requests by outcome (success, failure)
//! - `messaging_suspensions_total` (counter): suspensions armed, by reason
//! - `messaging_connections_established_total` (counter): successful establishes
//!
//! # Design Decisions
//! - Updates go through the `metrics` facade and are no-ops until a recorder is installed
//! - The Prometheus exporter is opt-in via `observability.metrics_enabled`

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

pub const REQUESTS_TOTAL: &str = "messaging_requests_total";
pub const SUSPENSIONS_TOTAL: &str = "messaging_suspensions_total";
pub const CONNECTIONS_ESTABLISHED_TOTAL: &str = "messaging_connections_established_total";

/// Install the Prometheus recorder and its HTTP scrape endpoint.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(address: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(|e| format!("failed to install metrics exporter: {e}"))
}

pub fn record_request(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_suspension(reason: &'static str) {
    metrics::counter!(SUSPENSIONS_TOTAL, "reason" => reason).increment(1);
}

pub fn record_connection_established() {
    metrics::counter!(CONNECTIONS_ESTABLISHED_TOTAL).increment(1);
}
