//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define endpoint metrics (lifecycle, faults, registrations, connections)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `nse_lifecycle_state` (gauge): 0=starting, 1=running, 2=draining, 3=stopped
//! - `nse_subsystem_faults_total` (counter): faults by subsystem
//! - `nse_registrations_total` (counter): registry calls by operation, outcome
//! - `nse_listener_connections_total` (counter): accepted connections by outcome
//! - `nse_listener_active_connections` (gauge): live listener connections
//! - `nse_dataplane_connects_total` (counter): dataplane connect attempts by outcome
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are low-cardinality static strings

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::lifecycle::{LifecycleState, Subsystem};

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_lifecycle_state(state: LifecycleState) {
    metrics::gauge!("nse_lifecycle_state").set(state.as_gauge());
}

pub fn record_fault(subsystem: Subsystem) {
    metrics::counter!("nse_subsystem_faults_total", "subsystem" => subsystem.as_str()).increment(1);
}

pub fn record_registration(operation: &'static str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(
        "nse_registrations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_connection(outcome: &'static str) {
    metrics::counter!("nse_listener_connections_total", "outcome" => outcome).increment(1);
}

pub fn record_active_connections(count: u64) {
    metrics::gauge!("nse_listener_active_connections").set(count as f64);
}

pub fn record_dataplane_connect(outcome: &'static str) {
    metrics::counter!("nse_dataplane_connects_total", "outcome" => outcome).increment(1);
}
