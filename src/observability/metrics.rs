//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define control channel metrics (requests, connections, signals)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `ctrl_requests_total` (counter): responses sent, by status code
//! - `ctrl_active_connections` (gauge): current connection count
//! - `ctrl_signals_total` (counter): signals bridged into the reactor, by number
//!
//! # Design Decisions
//! - Without an installed recorder every update is a no-op
//! - Exporter runs on its own thread, outside the reactor loop

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record one response sent on a control connection.
pub fn record_request(status: u16) {
    ::metrics::counter!("ctrl_requests_total", "status" => status.to_string()).increment(1);
}

/// Publish the number of live connections.
pub fn set_active_connections(active: u64) {
    ::metrics::gauge!("ctrl_active_connections").set(active as f64);
}

/// Record one signal delivered to the reactor.
pub fn record_signal(signum: i32) {
    ::metrics::counter!("ctrl_signals_total", "signum" => signum.to_string()).increment(1);
}
