//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, upstream outcomes, connections)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): replies by method, status
//! - `gateway_request_duration_seconds` (histogram): time from parsed request to written reply
//! - `gateway_upstream_requests_total` (counter): responder exchanges by outcome
//! - `gateway_vhost_fallback_total` (counter): requests routed to the default host
//! - `gateway_active_connections` (gauge): current connection count
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op, so tests need no setup
//! - Status and method are the only per-request labels

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one reply written to a client.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record the outcome of one responder exchange.
pub fn record_upstream(outcome: &'static str) {
    counter!("gateway_upstream_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_vhost_fallback() {
    counter!("gateway_vhost_fallback_total").increment(1);
}

pub fn connection_opened() {
    gauge!("gateway_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("gateway_active_connections").decrement(1.0);
}
