//! Metrics collection and exposition.
//!
//! # Metrics
//! - `security_rate_limited_total` (counter): rejected requests by rule
//! - `security_events_total` (counter): recorded security events by type
//! - `security_threats_total` (counter): pattern matches by pattern, severity
//! - `security_mitigations_total` (counter): mitigation outcomes by pattern
//! - `security_audit_failures_total` (counter): sink failures by operation
//! - `security_monitored_keys` (gauge): clients with a live event log
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter, so the
//! core can be used without a metrics endpoint.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::security::audit::Severity;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rate_limited(rule: &str) {
    counter!("security_rate_limited_total", "rule" => rule.to_string()).increment(1);
}

pub fn record_security_event(event_type: &str) {
    counter!("security_events_total", "type" => event_type.to_string()).increment(1);
}

pub fn record_threat(pattern: &str, severity: Severity) {
    counter!(
        "security_threats_total",
        "pattern" => pattern.to_string(),
        "severity" => severity.as_str()
    )
    .increment(1);
}

pub fn record_mitigation(pattern: &str, outcome: &'static str) {
    counter!(
        "security_mitigations_total",
        "pattern" => pattern.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_audit_failure(operation: &'static str) {
    counter!("security_audit_failures_total", "operation" => operation).increment(1);
}

pub fn record_monitored_keys(count: usize) {
    gauge!("security_monitored_keys").set(count as f64);
}
