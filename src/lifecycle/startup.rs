//! Startup orchestration.
//!
//! Builds the security core from a validated config. Construction errors are
//! fatal so misconfigured rules never reach the request path.

use std::sync::Arc;

use chrono::Duration;

use crate::config::MonitorConfig;
use crate::security::audit::MemoryAuditSink;
use crate::security::clock::{Clock, SystemClock};
use crate::security::error::SecurityError;
use crate::security::events::EventStore;
use crate::security::rate_limit::RuleTable;
use crate::security::{SecurityMonitor, ThreatDetector};

pub fn build_monitor(config: &MonitorConfig) -> Result<(Arc<SecurityMonitor>, Arc<MemoryAuditSink>), SecurityError> {
    build_monitor_with_clock(config, Arc::new(SystemClock))
}

/// Build the monitor and its in-memory audit sink around `clock`.
pub fn build_monitor_with_clock(
    config: &MonitorConfig,
    clock: Arc<dyn Clock>,
) -> Result<(Arc<SecurityMonitor>, Arc<MemoryAuditSink>), SecurityError> {
    let rules = RuleTable::new(config.rate_limits.clone())?;

    let store = Arc::new(EventStore::new(
        config.event_store.max_events_per_key,
        Duration::seconds(config.event_store.ttl_secs as i64),
    ));
    let sink = Arc::new(MemoryAuditSink::new(config.audit.capacity, clock.clone()));

    let mut detector = ThreatDetector::new(store, sink.clone(), clock.clone());
    if !config.event_store.inline_cleanup {
        detector = detector.without_inline_cleanup();
    }

    let monitor = Arc::new(SecurityMonitor::new(rules, detector, sink.clone(), clock));
    Ok((monitor, sink))
}
