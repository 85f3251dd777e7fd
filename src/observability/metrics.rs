//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ldapd_connections_total` (counter): sessions accepted
//! - `ldapd_connections_active` (gauge): current session count
//! - `ldapd_operations_total` (counter): operations admitted, by kind
//! - `ldapd_operations_abandoned_total` (counter): explicit abandons
//! - `ldapd_binds_total` (counter): bind attempts, by outcome
//! - `ldapd_tls_upgrades_total` (counter): STARTTLS attempts, by outcome

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on the given address.
pub fn init_metrics(addr: SocketAddr) {
    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        tracing::error!(error = %e, "Failed to install metrics exporter");
    } else {
        tracing::info!(address = %addr, "Metrics exporter listening");
    }
}

/// Record a newly accepted session.
pub fn record_connection_opened() {
    counter!("ldapd_connections_total").increment(1);
    gauge!("ldapd_connections_active").increment(1.0);
}

/// Record a finished session.
pub fn record_connection_closed() {
    gauge!("ldapd_connections_active").decrement(1.0);
}

/// Record an admitted directory operation.
pub fn record_operation(kind: &'static str) {
    counter!("ldapd_operations_total", "op" => kind).increment(1);
}

/// Record one explicitly abandoned operation.
pub fn record_abandoned() {
    counter!("ldapd_operations_abandoned_total").increment(1);
}

/// Record a bind attempt.
pub fn record_bind(outcome: &'static str) {
    counter!("ldapd_binds_total", "outcome" => outcome).increment(1);
}

/// Record a STARTTLS attempt.
pub fn record_tls_upgrade(outcome: &'static str) {
    counter!("ldapd_tls_upgrades_total", "outcome" => outcome).increment(1);
}
