//! Metrics collection and exposition.
//!
//! # Metrics
//! - `docwire_requests_total` (counter): completed requests by method, outcome
//! - `docwire_request_duration_seconds` (histogram): end-to-end latency
//! - `docwire_queue_wait_seconds` (histogram): time spent waiting for a connection
//! - `docwire_failovers_total` (counter): failover hops by the host that failed
//! - `docwire_host_health` (gauge): 1=healthy, 0=unhealthy
//! - `docwire_pool_connections` (gauge): open connections per host
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, outcome: &'static str, start: Instant) {
    counter!("docwire_requests_total", "method" => method.to_string(), "outcome" => outcome)
        .increment(1);
    histogram!("docwire_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_queue_wait(host: &str, waited: Duration) {
    histogram!("docwire_queue_wait_seconds", "host" => host.to_string())
        .record(waited.as_secs_f64());
}

pub fn record_failover(host: &str) {
    counter!("docwire_failovers_total", "host" => host.to_string()).increment(1);
}

pub fn record_host_health(host: &str, healthy: bool) {
    gauge!("docwire_host_health", "host" => host.to_string()).set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_pool_connections(host: &str, open: usize) {
    gauge!("docwire_pool_connections", "host" => host.to_string()).set(open as f64);
}
